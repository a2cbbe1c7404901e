//! Compilation of lookup requests into execution plans.

use std::sync::Arc;

use tracing::error;

use vela_common::schema::{IndexItem, Schema};
use vela_common::{ErrorCode, SchemaVer};

use crate::cache::{IndexCache, SchemaCache};
use crate::exec::{
    AggregateNode, DeDupNode, IndexEdgeNode, IndexFilterNode, IndexOutputNode, IndexScanNode,
    IndexVertexNode, RangeBound, ScanRange, VertexCache,
};
use crate::expr::Expr;
use crate::plan::{NodeId, Plan, PlanNode};
use crate::{
    is_edge_key_component, is_key_component, ColumnHint, IndexQueryContext, LookupIndexRequest,
};

/// Validated request state shared by the per-context builders.
struct PlanContext {
    is_edge: bool,
    tag_or_edge: i32,
    #[allow(dead_code)]
    vid_len: i16,
    #[allow(dead_code)]
    is_int_vid: bool,
    schema_versions: Vec<(SchemaVer, Schema)>,
    col_names: Vec<String>,
    dedup_pos: Vec<usize>,
}

/// Builds a `Plan` from a `LookupIndexRequest` using the node-local schema
/// and index caches.
pub struct LookupPlanner<'a> {
    schemas: &'a SchemaCache,
    indexes: &'a IndexCache,
    vertex_cache: Option<Arc<VertexCache>>,
}

impl<'a> LookupPlanner<'a> {
    pub fn new(schemas: &'a SchemaCache, indexes: &'a IndexCache) -> Self {
        Self {
            schemas,
            indexes,
            vertex_cache: None,
        }
    }

    /// Route vertex decoding through a shared record cache.
    pub fn with_vertex_cache(mut self, cache: Arc<VertexCache>) -> Self {
        self.vertex_cache = Some(cache);
        self
    }

    /// Validate the request and compile the full DAG: one pipeline per
    /// context feeding a shared dedup/aggregate trailer.
    pub fn build_plan(&self, req: &LookupIndexRequest) -> Result<Plan, ErrorCode> {
        let ctx = self.request_check(req)?;
        let mut plan = Plan::new(req.space_id, ctx.col_names.clone());

        let mut outputs = Vec::with_capacity(req.contexts.len());
        for query_ctx in &req.contexts {
            let output = self.build_context_plan(&mut plan, &ctx, query_ctx, &req.yield_columns)?;
            outputs.push(output);
        }

        let dedup = plan.add_node(
            PlanNode::DeDup(DeDupNode {
                positions: ctx.dedup_pos.clone(),
            }),
            outputs,
        );
        plan.add_node(PlanNode::Aggregate(AggregateNode), vec![dedup]);
        plan.finish()?;
        Ok(plan)
    }

    /// Resolve the vid shape and schema versions, and reject structurally
    /// empty requests.
    fn request_check(&self, req: &LookupIndexRequest) -> Result<PlanContext, ErrorCode> {
        let Some(space) = self.schemas.space(req.space_id) else {
            error!(space = req.space_id, "space not present in schema cache");
            return Err(ErrorCode::NotFound);
        };

        let schema_versions = if req.is_edge {
            if self.schemas.edge_name(req.space_id, req.tag_or_edge_id).is_none() {
                return Err(ErrorCode::EdgeNotFound);
            }
            let versions = self
                .schemas
                .all_ver_edge_schemas(req.space_id, req.tag_or_edge_id)
                .ok_or(ErrorCode::EdgeNotFound)?;
            if versions.is_empty() {
                return Err(ErrorCode::EdgeNotFound);
            }
            versions.to_vec()
        } else {
            if self.schemas.tag_name(req.space_id, req.tag_or_edge_id).is_none() {
                return Err(ErrorCode::TagNotFound);
            }
            let versions = self
                .schemas
                .all_ver_tag_schemas(req.space_id, req.tag_or_edge_id)
                .ok_or(ErrorCode::TagNotFound)?;
            if versions.is_empty() {
                return Err(ErrorCode::TagNotFound);
            }
            versions.to_vec()
        };

        if req.contexts.is_empty() || req.yield_columns.is_empty() {
            return Err(ErrorCode::InvalidOperation);
        }

        let col_names = req.yield_columns.clone();
        let dedup_pos = col_names
            .iter()
            .enumerate()
            .filter(|(_, col)| is_key_component(col))
            .map(|(pos, _)| pos)
            .collect();

        Ok(PlanContext {
            is_edge: req.is_edge,
            tag_or_edge: req.tag_or_edge_id,
            vid_len: space.vid_len,
            is_int_vid: space.is_int_vid,
            schema_versions,
            col_names,
            dedup_pos,
        })
    }

    /// Compile one query context. The shape is a pure function of
    /// `(need_data, need_filter)`:
    ///
    /// | need_data | need_filter | pipeline                          |
    /// |-----------|-------------|-----------------------------------|
    /// | false     | false       | Scan -> Output                    |
    /// | true      | false       | Scan -> Decode -> Output          |
    /// | false     | true        | Scan -> Filter -> Output          |
    /// | true      | true        | Scan -> Decode -> Filter -> Output|
    fn build_context_plan(
        &self,
        plan: &mut Plan,
        ctx: &PlanContext,
        query_ctx: &IndexQueryContext,
        yields: &[String],
    ) -> Result<NodeId, ErrorCode> {
        let index = if ctx.is_edge {
            self.indexes.get_edge_index(plan.space, query_ctx.index_id)
        } else {
            self.indexes.get_tag_index(plan.space, query_ctx.index_id)
        }
        .ok_or(ErrorCode::IndexNotFound)?;

        let mut need_filter = query_ctx.filter.is_some();
        // A yield column that is neither a key component nor an indexed
        // field forces a full record fetch.
        let mut need_data = yields
            .iter()
            .any(|col| !is_key_component(col) && !index.has_field(col));

        // A filter that leaves the index's field set must run after the
        // record is decoded so its columns are populated.
        if let Some(filter) = &query_ctx.filter {
            if is_outside_index(filter, index) {
                need_data = true;
                need_filter = true;
            }
        }

        if need_data && ctx.schema_versions.is_empty() {
            return Err(if ctx.is_edge {
                ErrorCode::EdgeNotFound
            } else {
                ErrorCode::TagNotFound
            });
        }

        let scan = plan.add_node(
            PlanNode::IndexScan(IndexScanNode {
                index_id: query_ctx.index_id,
                range: build_scan_range(index, &query_ctx.column_hints)?,
            }),
            vec![],
        );

        let mut upstream = scan;
        if need_data {
            upstream = if ctx.is_edge {
                plan.add_node(
                    PlanNode::IndexEdge(IndexEdgeNode {
                        edge_type: ctx.tag_or_edge,
                    }),
                    vec![upstream],
                )
            } else {
                plan.add_node(
                    PlanNode::IndexVertex(IndexVertexNode {
                        tag: ctx.tag_or_edge,
                        cache: self.vertex_cache.clone(),
                    }),
                    vec![upstream],
                )
            };
        }
        if need_filter {
            let expr = query_ctx
                .filter
                .clone()
                .ok_or(ErrorCode::InvalidOperation)?;
            upstream = plan.add_node(PlanNode::IndexFilter(IndexFilterNode { expr }), vec![upstream]);
        }

        Ok(plan.add_node(
            PlanNode::IndexOutput(IndexOutputNode {
                yields: yields.to_vec(),
            }),
            vec![upstream],
        ))
    }
}

/// Structural walk deciding whether a filter references any column outside
/// the index's field set (edge key components excepted).
pub fn is_outside_index(filter: &Expr, index: &IndexItem) -> bool {
    match filter {
        Expr::Logical { operands, .. } => operands
            .iter()
            .any(|operand| is_outside_index(operand, index)),
        Expr::Relational { left, right, .. } => {
            is_outside_index(left, index) || is_outside_index(right, index)
        }
        Expr::EdgeSrc(name)
        | Expr::EdgeTypeExpr(name)
        | Expr::EdgeRank(name)
        | Expr::EdgeDst(name) => !is_edge_key_component(name),
        Expr::TagProperty(name) | Expr::EdgeProperty(name) => !index.has_field(name),
        _ => false,
    }
}

/// Translate column hints into the scan constraint: equality hints must
/// cover a leading run of the index fields, with at most one range hint
/// directly behind it. Anything else cannot be planned.
fn build_scan_range(index: &IndexItem, hints: &[ColumnHint]) -> Result<ScanRange, ErrorCode> {
    let mut remaining: Vec<&ColumnHint> = hints.iter().collect();
    let mut range = ScanRange::default();
    for field in &index.fields {
        let Some(pos) = remaining
            .iter()
            .position(|hint| hint.column() == field.name)
        else {
            break;
        };
        if range.range.is_some() {
            error!(column = %field.name, "column hint behind a range hint");
            return Err(ErrorCode::InvalidOperation);
        }
        match remaining.remove(pos) {
            ColumnHint::Equal { column, value } => {
                range.eq.push((column.clone(), value.clone()));
            }
            ColumnHint::Range { column, begin, end } => {
                range.range = Some(RangeBound {
                    column: column.clone(),
                    begin: begin.clone(),
                    end: end.clone(),
                });
            }
        }
    }
    if !remaining.is_empty() {
        error!("column hints do not form an index prefix");
        return Err(ErrorCode::InvalidOperation);
    }
    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::RelOp;
    use crate::SpaceInfo;
    use vela_common::schema::{ColumnDef, PropertyType, SchemaId};
    use vela_common::value::Value;

    fn tag_index(fields: &[&str]) -> IndexItem {
        IndexItem {
            index_id: 5,
            index_name: "idx".to_string(),
            schema_id: SchemaId::Tag(2),
            schema_name: "person".to_string(),
            fields: fields
                .iter()
                .map(|name| ColumnDef::new(*name, PropertyType::Int64))
                .collect(),
        }
    }

    fn caches(fields: &[&str]) -> (SchemaCache, IndexCache) {
        let mut schemas = SchemaCache::new();
        schemas.add_space(1, SpaceInfo { vid_len: 8, is_int_vid: false });
        let schema = Schema {
            columns: ["c1", "c2", "c3"]
                .iter()
                .map(|name| ColumnDef::new(*name, PropertyType::Int64))
                .collect(),
        };
        schemas.add_tag(1, 2, "person", vec![(0, schema)]);
        let mut indexes = IndexCache::new();
        indexes.add_tag_index(1, tag_index(fields));
        (schemas, indexes)
    }

    fn request(contexts: Vec<IndexQueryContext>, yields: &[&str]) -> LookupIndexRequest {
        LookupIndexRequest {
            space_id: 1,
            is_edge: false,
            tag_or_edge_id: 2,
            contexts,
            yield_columns: yields.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn shape_of(plan: &Plan) -> Vec<&'static str> {
        (0..plan.node_count())
            .map(|idx| plan.node(NodeId(idx)).kind())
            .collect()
    }

    fn ctx(filter: Option<Expr>) -> IndexQueryContext {
        IndexQueryContext {
            index_id: 5,
            column_hints: vec![ColumnHint::Equal {
                column: "c1".to_string(),
                value: Value::Int(1),
            }],
            filter,
        }
    }

    #[test]
    fn shape_is_a_pure_function_of_need_data_and_need_filter() {
        let (schemas, indexes) = caches(&["c1", "c2"]);
        let planner = LookupPlanner::new(&schemas, &indexes);

        // needData=F needFilter=F: yields covered by the index.
        let plan = planner.build_plan(&request(vec![ctx(None)], &["c1"])).unwrap();
        assert_eq!(
            shape_of(&plan),
            vec!["IndexScan", "IndexOutput", "DeDup", "Aggregate"]
        );

        // needData=T needFilter=F: c3 is outside the index.
        let plan = planner.build_plan(&request(vec![ctx(None)], &["c3"])).unwrap();
        assert_eq!(
            shape_of(&plan),
            vec!["IndexScan", "IndexVertex", "IndexOutput", "DeDup", "Aggregate"]
        );

        // needData=F needFilter=T: filter over indexed columns only.
        let covered = Expr::rel(
            RelOp::Gt,
            Expr::TagProperty("c2".to_string()),
            Expr::Constant(Value::Int(1)),
        );
        let plan = planner
            .build_plan(&request(vec![ctx(Some(covered))], &["c1"]))
            .unwrap();
        assert_eq!(
            shape_of(&plan),
            vec!["IndexScan", "IndexFilter", "IndexOutput", "DeDup", "Aggregate"]
        );

        // needData=T needFilter=T.
        let covered = Expr::rel(
            RelOp::Gt,
            Expr::TagProperty("c2".to_string()),
            Expr::Constant(Value::Int(1)),
        );
        let plan = planner
            .build_plan(&request(vec![ctx(Some(covered))], &["c3"]))
            .unwrap();
        assert_eq!(
            shape_of(&plan),
            vec![
                "IndexScan",
                "IndexVertex",
                "IndexFilter",
                "IndexOutput",
                "DeDup",
                "Aggregate"
            ]
        );
    }

    #[test]
    fn filter_outside_index_forces_decode() {
        let (schemas, indexes) = caches(&["c1", "c2"]);
        let planner = LookupPlanner::new(&schemas, &indexes);
        // Filter references c3, which the index does not carry, so the plan
        // must decode even though the yield is covered.
        let outside = Expr::rel(
            RelOp::Gt,
            Expr::TagProperty("c3".to_string()),
            Expr::Constant(Value::Int(1)),
        );
        let plan = planner
            .build_plan(&request(vec![ctx(Some(outside))], &["c1"]))
            .unwrap();
        assert_eq!(
            shape_of(&plan),
            vec![
                "IndexScan",
                "IndexVertex",
                "IndexFilter",
                "IndexOutput",
                "DeDup",
                "Aggregate"
            ]
        );
    }

    #[test]
    fn two_runs_produce_isomorphic_plans() {
        let (schemas, indexes) = caches(&["c1", "c2"]);
        let planner = LookupPlanner::new(&schemas, &indexes);
        let req = request(vec![ctx(None)], &["c3", "_vid"]);
        let a = planner.build_plan(&req).unwrap();
        let b = planner.build_plan(&req).unwrap();
        assert_eq!(shape_of(&a), shape_of(&b));
        for idx in 0..a.node_count() {
            assert_eq!(a.deps(NodeId(idx)), b.deps(NodeId(idx)));
        }
    }

    #[test]
    fn validation_failures() {
        let (schemas, indexes) = caches(&["c1"]);
        let planner = LookupPlanner::new(&schemas, &indexes);

        // Empty yield list.
        let req = request(vec![ctx(None)], &[]);
        assert_eq!(
            planner.build_plan(&req).unwrap_err(),
            ErrorCode::InvalidOperation
        );

        // Empty contexts.
        let req = request(vec![], &["c1"]);
        assert_eq!(
            planner.build_plan(&req).unwrap_err(),
            ErrorCode::InvalidOperation
        );

        // Unknown index id.
        let mut bad = ctx(None);
        bad.index_id = 42;
        let req = request(vec![bad], &["c1"]);
        assert_eq!(planner.build_plan(&req).unwrap_err(), ErrorCode::IndexNotFound);

        // Unknown tag id.
        let mut req = request(vec![ctx(None)], &["c1"]);
        req.tag_or_edge_id = 99;
        assert_eq!(planner.build_plan(&req).unwrap_err(), ErrorCode::TagNotFound);
    }

    #[test]
    fn dedup_positions_mark_key_components() {
        let (schemas, indexes) = caches(&["c1"]);
        let planner = LookupPlanner::new(&schemas, &indexes);
        let plan = planner
            .build_plan(&request(vec![ctx(None)], &["_vid", "c1", "_tag"]))
            .unwrap();
        let dedup = (0..plan.node_count())
            .map(NodeId)
            .find(|id| matches!(plan.node(*id), PlanNode::DeDup(_)))
            .unwrap();
        let PlanNode::DeDup(node) = plan.node(dedup) else {
            unreachable!();
        };
        assert_eq!(node.positions, vec![0, 2]);
    }

    #[test]
    fn hints_must_form_an_index_prefix() {
        let index = tag_index(&["c1", "c2", "c3"]);

        // Equality prefix plus trailing range is fine.
        let good = build_scan_range(
            &index,
            &[
                ColumnHint::Equal {
                    column: "c1".to_string(),
                    value: Value::Int(1),
                },
                ColumnHint::Range {
                    column: "c2".to_string(),
                    begin: Some(Value::Int(0)),
                    end: None,
                },
            ],
        )
        .unwrap();
        assert_eq!(good.eq.len(), 1);
        assert!(good.range.is_some());

        // A hint skipping c1 does not constrain an ordered scan.
        let gap = build_scan_range(
            &index,
            &[ColumnHint::Equal {
                column: "c2".to_string(),
                value: Value::Int(1),
            }],
        );
        assert_eq!(gap, Err(ErrorCode::InvalidOperation));

        // A hint on a column the index does not carry is unplannable.
        let alien = build_scan_range(
            &index,
            &[ColumnHint::Equal {
                column: "cx".to_string(),
                value: Value::Int(1),
            }],
        );
        assert_eq!(alien, Err(ErrorCode::InvalidOperation));
    }

    #[test]
    fn outside_index_walk_covers_node_kinds() {
        let index = tag_index(&["c1", "c2"]);

        let covered = Expr::and(vec![
            Expr::rel(
                RelOp::Eq,
                Expr::TagProperty("c1".to_string()),
                Expr::Constant(Value::Int(1)),
            ),
            Expr::rel(
                RelOp::Gt,
                Expr::TagProperty("c2".to_string()),
                Expr::Constant(Value::Int(0)),
            ),
        ]);
        assert!(!is_outside_index(&covered, &index));

        let uncovered = Expr::or(vec![
            Expr::rel(
                RelOp::Eq,
                Expr::TagProperty("c1".to_string()),
                Expr::Constant(Value::Int(1)),
            ),
            Expr::rel(
                RelOp::Eq,
                Expr::TagProperty("c9".to_string()),
                Expr::Constant(Value::Int(1)),
            ),
        ]);
        assert!(is_outside_index(&uncovered, &index));

        // Edge key components are always inside.
        let edge_key = Expr::rel(
            RelOp::Eq,
            Expr::EdgeRank("_rank".to_string()),
            Expr::Constant(Value::Int(0)),
        );
        assert!(!is_outside_index(&edge_key, &index));

        // An edge-key expression over a non-key name is outside.
        let bad_edge_key = Expr::rel(
            RelOp::Eq,
            Expr::EdgeRank("weight".to_string()),
            Expr::Constant(Value::Int(0)),
        );
        assert!(is_outside_index(&bad_edge_key, &index));

        // Constants are inside by default.
        assert!(!is_outside_index(&Expr::Constant(Value::Bool(true)), &index));
    }
}
