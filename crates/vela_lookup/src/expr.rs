//! Residual filter expressions and their three-valued evaluation.

use vela_common::value::Value;

use crate::exec::KeyParts;
use crate::{DST_COL, RANK_COL, SRC_COL, TYPE_COL};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

/// Filter expression tree. Property leaves resolve against either the
/// index-resident columns or the fully decoded record, depending on where
/// the filter node sits in the plan.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Constant(Value),
    /// Element list, only meaningful on the right side of `In`/`NotIn`.
    List(Vec<Expr>),
    TagProperty(String),
    EdgeProperty(String),
    EdgeSrc(String),
    EdgeTypeExpr(String),
    EdgeRank(String),
    EdgeDst(String),
    Logical {
        op: LogicalOp,
        operands: Vec<Expr>,
    },
    Relational {
        op: RelOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
}

impl Expr {
    /// `left op right` convenience constructor.
    pub fn rel(op: RelOp, left: Expr, right: Expr) -> Expr {
        Expr::Relational {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(operands: Vec<Expr>) -> Expr {
        Expr::Logical {
            op: LogicalOp::And,
            operands,
        }
    }

    pub fn or(operands: Vec<Expr>) -> Expr {
        Expr::Logical {
            op: LogicalOp::Or,
            operands,
        }
    }
}

/// Row context a filter evaluates against.
pub struct EvalContext<'a> {
    pub key: &'a KeyParts,
    pub props: &'a std::collections::BTreeMap<String, Value>,
}

/// Evaluate an expression; unknown properties and null operands propagate as
/// `Null`.
pub fn eval(expr: &Expr, ctx: &EvalContext<'_>) -> Value {
    match expr {
        Expr::Constant(value) => value.clone(),
        Expr::List(_) => Value::Null,
        Expr::TagProperty(name) | Expr::EdgeProperty(name) => {
            ctx.props.get(name).cloned().unwrap_or(Value::Null)
        }
        Expr::EdgeSrc(name) => edge_key_value(ctx.key, name, SRC_COL),
        Expr::EdgeTypeExpr(name) => edge_key_value(ctx.key, name, TYPE_COL),
        Expr::EdgeRank(name) => edge_key_value(ctx.key, name, RANK_COL),
        Expr::EdgeDst(name) => edge_key_value(ctx.key, name, DST_COL),
        Expr::Logical { op, operands } => eval_logical(*op, operands, ctx),
        Expr::Relational { op, left, right } => eval_relational(*op, left, right, ctx),
        Expr::Not(inner) => match eval(inner, ctx) {
            Value::Bool(v) => Value::Bool(!v),
            _ => Value::Null,
        },
    }
}

fn edge_key_value(key: &KeyParts, name: &str, expected: &str) -> Value {
    if name != expected {
        return Value::Null;
    }
    match key {
        KeyParts::Edge {
            src,
            edge_type,
            rank,
            dst,
        } => match expected {
            SRC_COL => src.clone(),
            TYPE_COL => Value::Int(*edge_type as i64),
            RANK_COL => Value::Int(*rank),
            DST_COL => dst.clone(),
            _ => Value::Null,
        },
        KeyParts::Vertex { .. } => Value::Null,
    }
}

fn eval_logical(op: LogicalOp, operands: &[Expr], ctx: &EvalContext<'_>) -> Value {
    let mut saw_null = false;
    for operand in operands {
        match (op, eval(operand, ctx)) {
            (LogicalOp::And, Value::Bool(false)) => return Value::Bool(false),
            (LogicalOp::Or, Value::Bool(true)) => return Value::Bool(true),
            (_, Value::Bool(_)) => {}
            _ => saw_null = true,
        }
    }
    if saw_null {
        Value::Null
    } else {
        Value::Bool(op == LogicalOp::And)
    }
}

fn eval_relational(op: RelOp, left: &Expr, right: &Expr, ctx: &EvalContext<'_>) -> Value {
    if matches!(op, RelOp::In | RelOp::NotIn) {
        let Expr::List(elements) = right else {
            return Value::Null;
        };
        let needle = eval(left, ctx);
        if needle.is_null() {
            return Value::Null;
        }
        let mut found = false;
        for element in elements {
            let candidate = eval(element, ctx);
            if candidate.is_null() {
                return Value::Null;
            }
            if candidate == needle {
                found = true;
            }
        }
        return Value::Bool(if op == RelOp::In { found } else { !found });
    }

    let lhs = eval(left, ctx);
    let rhs = eval(right, ctx);
    let Some(ordering) = lhs.partial_compare(&rhs) else {
        return Value::Null;
    };
    let result = match op {
        RelOp::Eq => ordering.is_eq(),
        RelOp::Ne => !ordering.is_eq(),
        RelOp::Lt => ordering.is_lt(),
        RelOp::Le => ordering.is_le(),
        RelOp::Gt => ordering.is_gt(),
        RelOp::Ge => ordering.is_ge(),
        RelOp::In | RelOp::NotIn => unreachable!("handled above"),
    };
    Value::Bool(result)
}
