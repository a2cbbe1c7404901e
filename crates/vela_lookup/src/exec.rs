//! Execution nodes of a lookup plan and the storage access seam they run
//! against.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use vela_common::value::{DataSet, Value};
use vela_common::{EdgeType, ErrorCode, IndexId, SpaceId, TagId};

use crate::expr::{eval, EvalContext, Expr};
use crate::{DST_COL, RANK_COL, SRC_COL, TAG_COL, TYPE_COL, VID_COL};

/// Primary-key part of an index entry.
#[derive(Clone, Debug, PartialEq)]
pub enum KeyParts {
    Vertex {
        vid: Value,
        tag: TagId,
    },
    Edge {
        src: Value,
        edge_type: EdgeType,
        rank: i64,
        dst: Value,
    },
}

impl KeyParts {
    /// Resolve a key-component column, `Null` when the column does not
    /// belong to this key kind.
    pub fn component(&self, name: &str) -> Value {
        match self {
            KeyParts::Vertex { vid, tag } => match name {
                VID_COL => vid.clone(),
                TAG_COL => Value::Int(*tag as i64),
                _ => Value::Null,
            },
            KeyParts::Edge {
                src,
                edge_type,
                rank,
                dst,
            } => match name {
                SRC_COL => src.clone(),
                TYPE_COL => Value::Int(*edge_type as i64),
                RANK_COL => Value::Int(*rank),
                DST_COL => dst.clone(),
                _ => Value::Null,
            },
        }
    }
}

/// One raw index entry: the primary key plus the index-resident columns.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexEntry {
    pub key: KeyParts,
    pub index_values: BTreeMap<String, Value>,
}

/// Scan constraint derived from column hints: an equality prefix and at most
/// one trailing half-open range.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanRange {
    pub eq: Vec<(String, Value)>,
    pub range: Option<RangeBound>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RangeBound {
    pub column: String,
    pub begin: Option<Value>,
    pub end: Option<Value>,
}

impl ScanRange {
    /// Whether an entry's index-resident values satisfy this constraint.
    /// Provided for `IndexAccess` implementations.
    pub fn matches(&self, values: &BTreeMap<String, Value>) -> bool {
        for (column, expected) in &self.eq {
            if values.get(column) != Some(expected) {
                return false;
            }
        }
        if let Some(bound) = &self.range {
            let Some(actual) = values.get(&bound.column) else {
                return false;
            };
            if let Some(begin) = &bound.begin {
                match actual.partial_compare(begin) {
                    Some(ordering) if ordering.is_ge() => {}
                    _ => return false,
                }
            }
            if let Some(end) = &bound.end {
                match actual.partial_compare(end) {
                    Some(ordering) if ordering.is_lt() => {}
                    _ => return false,
                }
            }
        }
        true
    }
}

/// Storage access used by the execution nodes. The physical index layout
/// stays behind this trait.
pub trait IndexAccess {
    fn scan_index(
        &self,
        space: SpaceId,
        index_id: IndexId,
        range: &ScanRange,
    ) -> Result<Vec<IndexEntry>, ErrorCode>;

    fn fetch_vertex(
        &self,
        space: SpaceId,
        vid: &Value,
        tag: TagId,
    ) -> Result<Option<BTreeMap<String, Value>>, ErrorCode>;

    fn fetch_edge(
        &self,
        space: SpaceId,
        src: &Value,
        edge_type: EdgeType,
        rank: i64,
        dst: &Value,
    ) -> Result<Option<BTreeMap<String, Value>>, ErrorCode>;
}

/// LRU cache of decoded vertex records shared across plans.
#[derive(Debug)]
pub struct VertexCache {
    inner: Mutex<LruCache<(SpaceId, TagId, String), BTreeMap<String, Value>>>,
}

impl VertexCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("non-zero capacity");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn get(&self, space: SpaceId, tag: TagId, vid: &Value) -> Option<BTreeMap<String, Value>> {
        let mut guard = self.inner.lock().ok()?;
        guard.get(&(space, tag, vid.to_string())).cloned()
    }

    fn put(&self, space: SpaceId, tag: TagId, vid: &Value, props: BTreeMap<String, Value>) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.put((space, tag, vid.to_string()), props);
        }
    }
}

/// Row flowing between plan nodes: the entry key plus whatever columns are
/// populated at this stage (index-resident, later fully decoded).
#[derive(Clone, Debug, PartialEq)]
pub struct ExecRow {
    pub key: KeyParts,
    pub props: BTreeMap<String, Value>,
}

/// Result statistics finalized by the aggregate node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecStats {
    pub rows_returned: usize,
}

/// Final product of a plan execution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LookupResult {
    pub dataset: DataSet,
    pub stats: ExecStats,
}

/// Emits raw index entries for one `(index, hints)` pair.
#[derive(Clone, Debug)]
pub struct IndexScanNode {
    pub index_id: IndexId,
    pub range: ScanRange,
}

impl IndexScanNode {
    pub fn run(&self, access: &dyn IndexAccess, space: SpaceId) -> Result<Vec<ExecRow>, ErrorCode> {
        let entries = access.scan_index(space, self.index_id, &self.range)?;
        Ok(entries
            .into_iter()
            .map(|entry| ExecRow {
                key: entry.key,
                props: entry.index_values,
            })
            .collect())
    }
}

/// Replaces index-resident columns with the fully decoded vertex record,
/// optionally through the vertex cache. Entries whose record has vanished
/// are dropped.
#[derive(Clone, Debug)]
pub struct IndexVertexNode {
    pub tag: TagId,
    pub cache: Option<Arc<VertexCache>>,
}

impl IndexVertexNode {
    pub fn run(
        &self,
        access: &dyn IndexAccess,
        space: SpaceId,
        input: Vec<ExecRow>,
    ) -> Result<Vec<ExecRow>, ErrorCode> {
        let mut out = Vec::with_capacity(input.len());
        for row in input {
            let KeyParts::Vertex { vid, .. } = &row.key else {
                return Err(ErrorCode::InvalidOperation);
            };
            if let Some(cache) = &self.cache {
                if let Some(props) = cache.get(space, self.tag, vid) {
                    out.push(ExecRow { key: row.key, props });
                    continue;
                }
            }
            match access.fetch_vertex(space, vid, self.tag)? {
                Some(props) => {
                    if let Some(cache) = &self.cache {
                        cache.put(space, self.tag, vid, props.clone());
                    }
                    out.push(ExecRow { key: row.key, props });
                }
                None => continue,
            }
        }
        Ok(out)
    }
}

/// Edge counterpart of `IndexVertexNode`.
#[derive(Clone, Debug)]
pub struct IndexEdgeNode {
    pub edge_type: EdgeType,
}

impl IndexEdgeNode {
    pub fn run(
        &self,
        access: &dyn IndexAccess,
        space: SpaceId,
        input: Vec<ExecRow>,
    ) -> Result<Vec<ExecRow>, ErrorCode> {
        let mut out = Vec::with_capacity(input.len());
        for row in input {
            let KeyParts::Edge {
                src, rank, dst, ..
            } = &row.key
            else {
                return Err(ErrorCode::InvalidOperation);
            };
            match access.fetch_edge(space, src, self.edge_type, *rank, dst)? {
                Some(props) => out.push(ExecRow { key: row.key, props }),
                None => continue,
            }
        }
        Ok(out)
    }
}

/// Drops rows whose residual filter evaluates to false or null.
#[derive(Clone, Debug)]
pub struct IndexFilterNode {
    pub expr: Expr,
}

impl IndexFilterNode {
    pub fn run(&self, input: Vec<ExecRow>) -> Vec<ExecRow> {
        input
            .into_iter()
            .filter(|row| {
                let ctx = EvalContext {
                    key: &row.key,
                    props: &row.props,
                };
                eval(&self.expr, &ctx).is_true()
            })
            .collect()
    }
}

/// Projects the yield list, in declared order, into the result dataset.
#[derive(Clone, Debug)]
pub struct IndexOutputNode {
    pub yields: Vec<String>,
}

impl IndexOutputNode {
    pub fn run(&self, input: Vec<ExecRow>, dataset: &mut DataSet) {
        for row in input {
            let projected = self
                .yields
                .iter()
                .map(|col| {
                    if crate::is_key_component(col) {
                        row.key.component(col)
                    } else {
                        row.props.get(col).cloned().unwrap_or(Value::Null)
                    }
                })
                .collect();
            dataset.rows.push(projected);
        }
    }
}

/// Removes duplicate rows by the configured positions; survivors keep their
/// first-appearance order. An empty position list disables deduplication.
#[derive(Clone, Debug)]
pub struct DeDupNode {
    pub positions: Vec<usize>,
}

impl DeDupNode {
    pub fn run(&self, dataset: &mut DataSet) {
        if self.positions.is_empty() {
            return;
        }
        let mut seen = std::collections::HashSet::new();
        let positions = self.positions.clone();
        dataset.rows.retain(|row| {
            let key = positions
                .iter()
                .map(|pos| format!("{:?}", row.get(*pos)))
                .collect::<Vec<_>>()
                .join("\u{1f}");
            seen.insert(key)
        });
    }
}

/// Finalizes the dataset statistics.
#[derive(Clone, Debug)]
pub struct AggregateNode;

impl AggregateNode {
    pub fn run(&self, dataset: &DataSet, stats: &mut ExecStats) {
        stats.rows_returned = dataset.rows.len();
    }
}
