//! The owned plan arena.
//!
//! Nodes live in a single `Plan` value; producers are referenced by index
//! into that arena, never by pointer. `finish` derives the topological
//! execution order once; execution walks that order and streams row batches
//! between nodes.

use std::collections::HashMap;

use vela_common::value::DataSet;
use vela_common::{ErrorCode, SpaceId};

use crate::exec::{
    AggregateNode, DeDupNode, ExecRow, ExecStats, IndexAccess, IndexEdgeNode, IndexFilterNode,
    IndexOutputNode, IndexScanNode, IndexVertexNode, LookupResult,
};

/// Handle of a node inside its owning plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// One execution node.
#[derive(Debug)]
pub enum PlanNode {
    IndexScan(IndexScanNode),
    IndexVertex(IndexVertexNode),
    IndexEdge(IndexEdgeNode),
    IndexFilter(IndexFilterNode),
    IndexOutput(IndexOutputNode),
    DeDup(DeDupNode),
    Aggregate(AggregateNode),
}

impl PlanNode {
    pub fn kind(&self) -> &'static str {
        match self {
            PlanNode::IndexScan(_) => "IndexScan",
            PlanNode::IndexVertex(_) => "IndexVertex",
            PlanNode::IndexEdge(_) => "IndexEdge",
            PlanNode::IndexFilter(_) => "IndexFilter",
            PlanNode::IndexOutput(_) => "IndexOutput",
            PlanNode::DeDup(_) => "DeDup",
            PlanNode::Aggregate(_) => "Aggregate",
        }
    }
}

#[derive(Debug)]
struct PlanEntry {
    node: PlanNode,
    deps: Vec<NodeId>,
}

/// A finished lookup plan: node arena, dependency edges, derived execution
/// order, and the result column names.
#[derive(Debug)]
pub struct Plan {
    entries: Vec<PlanEntry>,
    order: Vec<NodeId>,
    pub space: SpaceId,
    pub col_names: Vec<String>,
}

impl Plan {
    pub fn new(space: SpaceId, col_names: Vec<String>) -> Self {
        Self {
            entries: Vec::new(),
            order: Vec::new(),
            space,
            col_names,
        }
    }

    /// Add a node declaring its producers. Dependencies must already be in
    /// the arena, which keeps the graph acyclic by construction; `finish`
    /// still validates.
    pub fn add_node(&mut self, node: PlanNode, deps: Vec<NodeId>) -> NodeId {
        let id = NodeId(self.entries.len());
        self.entries.push(PlanEntry { node, deps });
        id
    }

    pub fn node(&self, id: NodeId) -> &PlanNode {
        &self.entries[id.0].node
    }

    pub fn deps(&self, id: NodeId) -> &[NodeId] {
        &self.entries[id.0].deps
    }

    pub fn node_count(&self) -> usize {
        self.entries.len()
    }

    /// The derived execution order; empty before `finish`.
    pub fn topo_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Derive the topological execution order, rejecting cycles and dangling
    /// dependencies.
    pub fn finish(&mut self) -> Result<(), ErrorCode> {
        let count = self.entries.len();
        let mut indegree = vec![0usize; count];
        let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (idx, entry) in self.entries.iter().enumerate() {
            for dep in &entry.deps {
                if dep.0 >= count {
                    return Err(ErrorCode::InvalidOperation);
                }
                indegree[idx] += 1;
                consumers[dep.0].push(idx);
            }
        }

        let mut ready: Vec<usize> = (0..count).filter(|idx| indegree[*idx] == 0).collect();
        let mut order = Vec::with_capacity(count);
        while let Some(idx) = ready.pop() {
            order.push(NodeId(idx));
            for consumer in &consumers[idx] {
                indegree[*consumer] -= 1;
                if indegree[*consumer] == 0 {
                    ready.push(*consumer);
                }
            }
        }

        if order.len() != count {
            return Err(ErrorCode::InvalidOperation);
        }
        self.order = order;
        Ok(())
    }

    /// Run the plan against a storage access implementation.
    pub fn execute(&self, access: &dyn IndexAccess) -> Result<LookupResult, ErrorCode> {
        if self.order.len() != self.entries.len() {
            return Err(ErrorCode::InvalidOperation);
        }

        let mut dataset = DataSet::with_columns(self.col_names.clone());
        let mut stats = ExecStats::default();
        let mut streams: HashMap<NodeId, Vec<ExecRow>> = HashMap::new();

        for id in &self.order {
            let entry = &self.entries[id.0];
            // Row-producing nodes have exactly one upstream row stream.
            let input = |streams: &mut HashMap<NodeId, Vec<ExecRow>>| -> Vec<ExecRow> {
                entry
                    .deps
                    .first()
                    .and_then(|dep| streams.remove(dep))
                    .unwrap_or_default()
            };
            match &entry.node {
                PlanNode::IndexScan(node) => {
                    let rows = node.run(access, self.space)?;
                    streams.insert(*id, rows);
                }
                PlanNode::IndexVertex(node) => {
                    let rows = node.run(access, self.space, input(&mut streams))?;
                    streams.insert(*id, rows);
                }
                PlanNode::IndexEdge(node) => {
                    let rows = node.run(access, self.space, input(&mut streams))?;
                    streams.insert(*id, rows);
                }
                PlanNode::IndexFilter(node) => {
                    let rows = node.run(input(&mut streams));
                    streams.insert(*id, rows);
                }
                PlanNode::IndexOutput(node) => {
                    node.run(input(&mut streams), &mut dataset);
                }
                PlanNode::DeDup(node) => {
                    node.run(&mut dataset);
                }
                PlanNode::Aggregate(node) => {
                    node.run(&dataset, &mut stats);
                }
            }
        }

        Ok(LookupResult { dataset, stats })
    }
}
