//! Index lookup planning and execution.
//!
//! A lookup request names an index per query context, column hints that
//! constrain the scan, an optional residual filter, and the columns to
//! yield. The planner compiles each context into one of four pipeline
//! shapes, joins them under a shared dedup/aggregate trailer, and the plan
//! executes against an `IndexAccess` implementation on the storage node.

pub mod cache;
pub mod exec;
pub mod expr;
pub mod plan;
pub mod planner;

pub use cache::{IndexCache, SchemaCache, SpaceInfo};
pub use exec::{IndexAccess, IndexEntry, KeyParts, LookupResult, VertexCache};
pub use plan::{NodeId, Plan, PlanNode};
pub use planner::LookupPlanner;

use vela_common::value::Value;
use vela_common::{IndexId, SpaceId};

use expr::Expr;

/// Column names that resolve from the index entry key instead of a record.
pub const VID_COL: &str = "_vid";
pub const TAG_COL: &str = "_tag";
pub const SRC_COL: &str = "_src";
pub const TYPE_COL: &str = "_type";
pub const RANK_COL: &str = "_rank";
pub const DST_COL: &str = "_dst";

/// True for columns that decode from key parts of an index entry.
pub fn is_key_component(name: &str) -> bool {
    matches!(
        name,
        VID_COL | TAG_COL | SRC_COL | TYPE_COL | RANK_COL | DST_COL
    )
}

/// Column names valid inside an edge key.
pub fn is_edge_key_component(name: &str) -> bool {
    matches!(name, SRC_COL | TYPE_COL | RANK_COL | DST_COL)
}

/// Per-column predicate constraining an index scan.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnHint {
    /// Equality on one indexed column; usable as a scan-prefix component.
    Equal { column: String, value: Value },
    /// Half-open range `[begin, end)` on one indexed column. Either bound
    /// may be absent.
    Range {
        column: String,
        begin: Option<Value>,
        end: Option<Value>,
    },
}

impl ColumnHint {
    pub fn column(&self) -> &str {
        match self {
            ColumnHint::Equal { column, .. } => column,
            ColumnHint::Range { column, .. } => column,
        }
    }
}

/// One index choice with its hints and optional residual filter.
#[derive(Clone, Debug)]
pub struct IndexQueryContext {
    pub index_id: IndexId,
    pub column_hints: Vec<ColumnHint>,
    pub filter: Option<Expr>,
}

/// The lookup request a storage node receives.
#[derive(Clone, Debug)]
pub struct LookupIndexRequest {
    pub space_id: SpaceId,
    pub is_edge: bool,
    pub tag_or_edge_id: i32,
    pub contexts: Vec<IndexQueryContext>,
    pub yield_columns: Vec<String>,
}
