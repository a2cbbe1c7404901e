//! End-to-end plan execution against an in-memory index backend.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::Arc;

use vela_common::schema::{ColumnDef, IndexItem, PropertyType, Schema, SchemaId};
use vela_common::value::Value;
use vela_common::{EdgeType, ErrorCode, IndexId, SpaceId, TagId};
use vela_lookup::exec::ScanRange;
use vela_lookup::expr::{Expr, RelOp};
use vela_lookup::{
    ColumnHint, IndexAccess, IndexCache, IndexEntry, IndexQueryContext, KeyParts,
    LookupIndexRequest, LookupPlanner, SchemaCache, SpaceInfo, VertexCache,
};

/// Index entries plus vertex records, with a fetch counter for cache tests.
#[derive(Default)]
struct MockStore {
    entries: Vec<(IndexId, IndexEntry)>,
    vertices: BTreeMap<String, BTreeMap<String, Value>>,
    edges: BTreeMap<String, BTreeMap<String, Value>>,
    vertex_fetches: Cell<usize>,
}

impl MockStore {
    fn add_vertex_entry(&mut self, index: IndexId, vid: &str, tag: TagId, cols: &[(&str, i64)]) {
        self.entries.push((
            index,
            IndexEntry {
                key: KeyParts::Vertex {
                    vid: Value::Str(vid.to_string()),
                    tag,
                },
                index_values: cols
                    .iter()
                    .map(|(name, value)| (name.to_string(), Value::Int(*value)))
                    .collect(),
            },
        ));
    }

    fn add_vertex(&mut self, vid: &str, cols: &[(&str, i64)]) {
        self.vertices.insert(
            vid.to_string(),
            cols.iter()
                .map(|(name, value)| (name.to_string(), Value::Int(*value)))
                .collect(),
        );
    }
}

impl IndexAccess for MockStore {
    fn scan_index(
        &self,
        _space: SpaceId,
        index_id: IndexId,
        range: &ScanRange,
    ) -> Result<Vec<IndexEntry>, ErrorCode> {
        Ok(self
            .entries
            .iter()
            .filter(|(id, entry)| *id == index_id && range.matches(&entry.index_values))
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    fn fetch_vertex(
        &self,
        _space: SpaceId,
        vid: &Value,
        _tag: TagId,
    ) -> Result<Option<BTreeMap<String, Value>>, ErrorCode> {
        self.vertex_fetches.set(self.vertex_fetches.get() + 1);
        Ok(self.vertices.get(&vid.to_string()).cloned())
    }

    fn fetch_edge(
        &self,
        _space: SpaceId,
        src: &Value,
        edge_type: EdgeType,
        rank: i64,
        dst: &Value,
    ) -> Result<Option<BTreeMap<String, Value>>, ErrorCode> {
        let key = format!("{src}/{edge_type}/{rank}/{dst}");
        Ok(self.edges.get(&key).cloned())
    }
}

fn person_caches() -> (SchemaCache, IndexCache) {
    let mut schemas = SchemaCache::new();
    schemas.add_space(
        1,
        SpaceInfo {
            vid_len: 8,
            is_int_vid: false,
        },
    );
    let schema = Schema {
        columns: ["c1", "c2", "c3"]
            .iter()
            .map(|name| ColumnDef::new(*name, PropertyType::Int64))
            .collect(),
    };
    schemas.add_tag(1, 2, "person", vec![(0, schema)]);

    let mut indexes = IndexCache::new();
    indexes.add_tag_index(
        1,
        IndexItem {
            index_id: 5,
            index_name: "i_c1_c2".to_string(),
            schema_id: SchemaId::Tag(2),
            schema_name: "person".to_string(),
            fields: vec![
                ColumnDef::new("c1", PropertyType::Int64),
                ColumnDef::new("c2", PropertyType::Int64),
            ],
        },
    );
    (schemas, indexes)
}

fn person_store() -> MockStore {
    let mut store = MockStore::default();
    // Four persons indexed on (c1, c2); c3 lives only in the record.
    store.add_vertex_entry(5, "v1", 2, &[("c1", 1), ("c2", 0)]);
    store.add_vertex_entry(5, "v2", 2, &[("c1", 1), ("c2", 2)]);
    store.add_vertex_entry(5, "v3", 2, &[("c1", 1), ("c2", 5)]);
    store.add_vertex_entry(5, "v4", 2, &[("c1", 9), ("c2", 7)]);
    store.add_vertex("v1", &[("c1", 1), ("c2", 0), ("c3", 10)]);
    store.add_vertex("v2", &[("c1", 1), ("c2", 2), ("c3", 20)]);
    store.add_vertex("v3", &[("c1", 1), ("c2", 5), ("c3", 30)]);
    store.add_vertex("v4", &[("c1", 9), ("c2", 7), ("c3", 40)]);
    store
}

fn person_request(filter: Option<Expr>, yields: &[&str]) -> LookupIndexRequest {
    LookupIndexRequest {
        space_id: 1,
        is_edge: false,
        tag_or_edge_id: 2,
        contexts: vec![IndexQueryContext {
            index_id: 5,
            column_hints: vec![ColumnHint::Equal {
                column: "c1".to_string(),
                value: Value::Int(1),
            }],
            filter,
        }],
        yield_columns: yields.iter().map(|s| s.to_string()).collect(),
    }
}

#[test]
fn uncovered_yield_with_residual_filter_decodes_then_filters() {
    let (schemas, indexes) = person_caches();
    let planner = LookupPlanner::new(&schemas, &indexes);
    let store = person_store();

    // lookup where c1 == 1 and c2 > 1 yield c3
    let filter = Expr::rel(
        RelOp::Gt,
        Expr::TagProperty("c2".to_string()),
        Expr::Constant(Value::Int(1)),
    );
    let plan = planner
        .build_plan(&person_request(Some(filter), &["c3"]))
        .unwrap();
    let result = plan.execute(&store).unwrap();

    assert_eq!(result.dataset.col_names, vec!["c3".to_string()]);
    assert_eq!(
        result.dataset.rows,
        vec![vec![Value::Int(20)], vec![Value::Int(30)]]
    );
    assert_eq!(result.stats.rows_returned, 2);
}

#[test]
fn covered_scan_never_touches_records() {
    let (schemas, indexes) = person_caches();
    let planner = LookupPlanner::new(&schemas, &indexes);
    let store = person_store();

    let plan = planner
        .build_plan(&person_request(None, &["c2", "_vid"]))
        .unwrap();
    let result = plan.execute(&store).unwrap();

    assert_eq!(store.vertex_fetches.get(), 0);
    assert_eq!(result.dataset.rows.len(), 3);
    assert_eq!(
        result.dataset.rows[0],
        vec![Value::Int(0), Value::Str("v1".to_string())]
    );
}

#[test]
fn range_hint_bounds_the_scan() {
    let (schemas, indexes) = person_caches();
    let planner = LookupPlanner::new(&schemas, &indexes);
    let store = person_store();

    let req = LookupIndexRequest {
        space_id: 1,
        is_edge: false,
        tag_or_edge_id: 2,
        contexts: vec![IndexQueryContext {
            index_id: 5,
            column_hints: vec![
                ColumnHint::Equal {
                    column: "c1".to_string(),
                    value: Value::Int(1),
                },
                ColumnHint::Range {
                    column: "c2".to_string(),
                    begin: Some(Value::Int(1)),
                    end: Some(Value::Int(5)),
                },
            ],
            filter: None,
        }],
        yield_columns: vec!["_vid".to_string()],
    };
    let result = planner.build_plan(&req).unwrap().execute(&store).unwrap();
    assert_eq!(result.dataset.rows, vec![vec![Value::Str("v2".to_string())]]);
}

#[test]
fn duplicate_contexts_dedup_on_key_positions_in_first_appearance_order() {
    let (schemas, indexes) = person_caches();
    let planner = LookupPlanner::new(&schemas, &indexes);
    let store = person_store();

    // Two identical contexts produce the same rows twice; dedup keyed on the
    // _vid position keeps the first appearance of each.
    let mut req = person_request(None, &["_vid", "c2"]);
    req.contexts.push(req.contexts[0].clone());
    let result = planner.build_plan(&req).unwrap().execute(&store).unwrap();

    let vids: Vec<_> = result
        .dataset
        .rows
        .iter()
        .map(|row| row[0].to_string())
        .collect();
    assert_eq!(vids, vec!["v1", "v2", "v3"]);
}

#[test]
fn filter_drops_null_evaluations() {
    let (schemas, indexes) = person_caches();
    let planner = LookupPlanner::new(&schemas, &indexes);
    let mut store = person_store();
    // v5 has no c3 in its record: the filter evaluates to null and the row
    // is dropped, not emitted.
    store.add_vertex_entry(5, "v5", 2, &[("c1", 1), ("c2", 9)]);
    store.add_vertex("v5", &[("c1", 1), ("c2", 9)]);

    let filter = Expr::rel(
        RelOp::Gt,
        Expr::TagProperty("c3".to_string()),
        Expr::Constant(Value::Int(0)),
    );
    let plan = planner
        .build_plan(&person_request(Some(filter), &["_vid"]))
        .unwrap();
    let result = plan.execute(&store).unwrap();
    let vids: Vec<_> = result
        .dataset
        .rows
        .iter()
        .map(|row| row[0].to_string())
        .collect();
    assert_eq!(vids, vec!["v1", "v2", "v3"]);
}

#[test]
fn vanished_records_are_skipped_by_the_decode_node() {
    let (schemas, indexes) = person_caches();
    let planner = LookupPlanner::new(&schemas, &indexes);
    let mut store = person_store();
    // Index entry without a backing record.
    store.add_vertex_entry(5, "ghost", 2, &[("c1", 1), ("c2", 3)]);

    let plan = planner.build_plan(&person_request(None, &["c3"])).unwrap();
    let result = plan.execute(&store).unwrap();
    assert_eq!(result.dataset.rows.len(), 3);
}

#[test]
fn vertex_cache_short_circuits_repeat_fetches() {
    let (schemas, indexes) = person_caches();
    let cache = Arc::new(VertexCache::new(16));
    let planner = LookupPlanner::new(&schemas, &indexes).with_vertex_cache(cache);
    let store = person_store();

    let plan = planner.build_plan(&person_request(None, &["c3"])).unwrap();
    plan.execute(&store).unwrap();
    let cold = store.vertex_fetches.get();
    assert_eq!(cold, 3);

    plan.execute(&store).unwrap();
    assert_eq!(store.vertex_fetches.get(), cold, "second run must hit the cache");
}

#[test]
fn edge_lookup_decodes_edge_records() {
    let mut schemas = SchemaCache::new();
    schemas.add_space(
        1,
        SpaceInfo {
            vid_len: 8,
            is_int_vid: false,
        },
    );
    let schema = Schema {
        columns: vec![
            ColumnDef::new("weight", PropertyType::Int64),
            ColumnDef::new("since", PropertyType::Int64),
        ],
    };
    schemas.add_edge(1, 3, "likes", vec![(0, schema)]);
    let mut indexes = IndexCache::new();
    indexes.add_edge_index(
        1,
        IndexItem {
            index_id: 7,
            index_name: "i_weight".to_string(),
            schema_id: SchemaId::Edge(3),
            schema_name: "likes".to_string(),
            fields: vec![ColumnDef::new("weight", PropertyType::Int64)],
        },
    );

    let mut store = MockStore::default();
    store.entries.push((
        7,
        IndexEntry {
            key: KeyParts::Edge {
                src: Value::Str("a".to_string()),
                edge_type: 3,
                rank: 0,
                dst: Value::Str("b".to_string()),
            },
            index_values: BTreeMap::from([("weight".to_string(), Value::Int(4))]),
        },
    ));
    store.edges.insert(
        "a/3/0/b".to_string(),
        BTreeMap::from([
            ("weight".to_string(), Value::Int(4)),
            ("since".to_string(), Value::Int(2020)),
        ]),
    );

    let planner = LookupPlanner::new(&schemas, &indexes);
    let req = LookupIndexRequest {
        space_id: 1,
        is_edge: true,
        tag_or_edge_id: 3,
        contexts: vec![IndexQueryContext {
            index_id: 7,
            column_hints: vec![ColumnHint::Equal {
                column: "weight".to_string(),
                value: Value::Int(4),
            }],
            filter: None,
        }],
        yield_columns: vec![
            "_src".to_string(),
            "_dst".to_string(),
            "since".to_string(),
        ],
    };
    let result = planner.build_plan(&req).unwrap().execute(&store).unwrap();
    assert_eq!(
        result.dataset.rows,
        vec![vec![
            Value::Str("a".to_string()),
            Value::Str("b".to_string()),
            Value::Int(2020),
        ]]
    );
}
