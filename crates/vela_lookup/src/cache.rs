//! Read-only schema and index caches consumed by the planner.
//!
//! A storage node fills these from the catalog; the planner never reads the
//! catalog store directly.

use std::collections::HashMap;

use vela_common::schema::{IndexItem, Schema};
use vela_common::{EdgeType, IndexId, SchemaVer, SpaceId, TagId};

/// Vid shape of one space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpaceInfo {
    pub vid_len: i16,
    pub is_int_vid: bool,
}

/// Tag/edge schemas of every cached space, all versions, ascending.
#[derive(Default)]
pub struct SchemaCache {
    spaces: HashMap<SpaceId, SpaceInfo>,
    tag_names: HashMap<(SpaceId, TagId), String>,
    edge_names: HashMap<(SpaceId, EdgeType), String>,
    tag_schemas: HashMap<(SpaceId, TagId), Vec<(SchemaVer, Schema)>>,
    edge_schemas: HashMap<(SpaceId, EdgeType), Vec<(SchemaVer, Schema)>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_space(&mut self, space: SpaceId, info: SpaceInfo) {
        self.spaces.insert(space, info);
    }

    pub fn add_tag(
        &mut self,
        space: SpaceId,
        tag: TagId,
        name: impl Into<String>,
        schemas: Vec<(SchemaVer, Schema)>,
    ) {
        self.tag_names.insert((space, tag), name.into());
        self.tag_schemas.insert((space, tag), schemas);
    }

    pub fn add_edge(
        &mut self,
        space: SpaceId,
        edge: EdgeType,
        name: impl Into<String>,
        schemas: Vec<(SchemaVer, Schema)>,
    ) {
        self.edge_names.insert((space, edge), name.into());
        self.edge_schemas.insert((space, edge), schemas);
    }

    pub fn space(&self, space: SpaceId) -> Option<SpaceInfo> {
        self.spaces.get(&space).copied()
    }

    pub fn tag_name(&self, space: SpaceId, tag: TagId) -> Option<&str> {
        self.tag_names.get(&(space, tag)).map(String::as_str)
    }

    pub fn edge_name(&self, space: SpaceId, edge: EdgeType) -> Option<&str> {
        self.edge_names.get(&(space, edge)).map(String::as_str)
    }

    /// All versions of one tag schema, ascending; `None` when unknown.
    pub fn all_ver_tag_schemas(
        &self,
        space: SpaceId,
        tag: TagId,
    ) -> Option<&[(SchemaVer, Schema)]> {
        self.tag_schemas.get(&(space, tag)).map(Vec::as_slice)
    }

    pub fn all_ver_edge_schemas(
        &self,
        space: SpaceId,
        edge: EdgeType,
    ) -> Option<&[(SchemaVer, Schema)]> {
        self.edge_schemas.get(&(space, edge)).map(Vec::as_slice)
    }
}

/// Index descriptors keyed by owning space and index id.
#[derive(Default)]
pub struct IndexCache {
    tag_indexes: HashMap<(SpaceId, IndexId), IndexItem>,
    edge_indexes: HashMap<(SpaceId, IndexId), IndexItem>,
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tag_index(&mut self, space: SpaceId, item: IndexItem) {
        self.tag_indexes.insert((space, item.index_id), item);
    }

    pub fn add_edge_index(&mut self, space: SpaceId, item: IndexItem) {
        self.edge_indexes.insert((space, item.index_id), item);
    }

    pub fn get_tag_index(&self, space: SpaceId, index: IndexId) -> Option<&IndexItem> {
        self.tag_indexes.get(&(space, index))
    }

    pub fn get_edge_index(&self, space: SpaceId, index: IndexId) -> Option<&IndexItem> {
        self.edge_indexes.get(&(space, index))
    }
}
