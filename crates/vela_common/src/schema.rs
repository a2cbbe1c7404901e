//! Catalog descriptors: spaces, tag/edge schemas, and secondary indexes.

use serde::{Deserialize, Serialize};

use crate::value::Value;
use crate::{EdgeType, IndexId, SpaceId, TagId};

/// Property type of a schema column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyType {
    Bool,
    Int64,
    Double,
    FixedString,
    String,
    Timestamp,
}

impl PropertyType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(PropertyType::Bool),
            1 => Some(PropertyType::Int64),
            2 => Some(PropertyType::Double),
            3 => Some(PropertyType::FixedString),
            4 => Some(PropertyType::String),
            5 => Some(PropertyType::Timestamp),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            PropertyType::Bool => 0,
            PropertyType::Int64 => 1,
            PropertyType::Double => 2,
            PropertyType::FixedString => 3,
            PropertyType::String => 4,
            PropertyType::Timestamp => 5,
        }
    }
}

/// One column of a tag or edge schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub prop_type: PropertyType,
    pub nullable: bool,
    pub default: Option<Value>,
    /// Byte length for fixed-width string columns; 0 otherwise.
    pub fixed_len: u16,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, prop_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            prop_type,
            nullable: false,
            default: None,
            fixed_len: 0,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// A versioned column list. Multiple versions of a schema coexist; the
/// newest one is the active version.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<ColumnDef>,
}

impl Schema {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Target of an index: one tag or one edge type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaId {
    Tag(TagId),
    Edge(EdgeType),
}

impl SchemaId {
    pub fn raw_id(self) -> i32 {
        match self {
            SchemaId::Tag(id) => id,
            SchemaId::Edge(id) => id,
        }
    }

    pub fn is_edge(self) -> bool {
        matches!(self, SchemaId::Edge(_))
    }
}

/// Kind of a single schema alteration item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlterSchemaOp {
    Add,
    Change,
    Drop,
}

/// One alteration applied by an alter-schema request.
#[derive(Clone, Debug)]
pub struct AlterSchemaItem {
    pub op: AlterSchemaOp,
    pub columns: Vec<ColumnDef>,
}

/// A secondary index over an ordered column list of one schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexItem {
    pub index_id: IndexId,
    pub index_name: String,
    pub schema_id: SchemaId,
    pub schema_name: String,
    pub fields: Vec<ColumnDef>,
}

impl IndexItem {
    /// True if `name` is one of the indexed fields.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }
}

/// Vertex id representation of a space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VidType {
    FixedString,
    Int64,
}

/// Properties of a graph space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpaceDesc {
    pub space_name: String,
    pub partition_num: i32,
    pub replica_factor: i32,
    pub vid_type: VidType,
    pub vid_len: i16,
    pub group_name: Option<String>,
}

impl SpaceDesc {
    pub fn is_int_vid(&self) -> bool {
        self.vid_type == VidType::Int64
    }
}

/// Rebuild state of an index, persisted under the rebuild-status family.
pub const REBUILD_RUNNING: &[u8] = b"RUNNING";
pub const REBUILD_SUCCEEDED: &[u8] = b"SUCCEEDED";
pub const REBUILD_FAILED: &[u8] = b"FAILED";
