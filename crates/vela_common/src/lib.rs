//! Shared identifiers, addresses, and descriptors for the vela catalog
//! service and the index lookup layer.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod config;
pub mod error;
pub mod schema;
pub mod value;

pub use error::{ErrorCode, StoreError};

/// Id of a graph space.
pub type SpaceId = i32;
/// Id of a partition within a space.
pub type PartitionId = i32;
/// Id of a vertex tag schema.
pub type TagId = i32;
/// Id of an edge type schema.
pub type EdgeType = i32;
/// Id of a secondary index.
pub type IndexId = i32;
/// Version of a tag or edge schema. Versions start at 0.
pub type SchemaVer = i64;
/// Leader election term.
pub type TermId = i64;

/// The catalog itself lives in one replicated KV group: a single default
/// space with a single default partition.
pub const DEFAULT_SPACE_ID: SpaceId = 0;
pub const DEFAULT_PART_ID: PartitionId = 0;

/// Network address of a cluster host.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostAddr {
    pub host: String,
    pub port: u16,
}

impl HostAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Translate a consensus-peer address to the service address. The
    /// service listener is bound one port below the raft listener.
    pub fn from_raft_addr(&self) -> Self {
        Self {
            host: self.host.clone(),
            port: self.port.saturating_sub(1),
        }
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Role a host registered under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostRole {
    Graph,
    Meta,
    Storage,
    Unknown,
}

impl HostRole {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => HostRole::Graph,
            1 => HostRole::Meta,
            2 => HostRole::Storage,
            _ => HostRole::Unknown,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            HostRole::Graph => 0,
            HostRole::Meta => 1,
            HostRole::Storage => 2,
            HostRole::Unknown => 255,
        }
    }
}

/// Derived liveness of a host, classified from its last heartbeat.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostStatus {
    Online,
    Offline,
}

/// Validity of a snapshot/backup record. `Valid` is only written after every
/// per-host checkpoint succeeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotStatus {
    Invalid,
    Valid,
}

impl SnapshotStatus {
    pub fn from_u8(raw: u8) -> Self {
        if raw == 1 {
            SnapshotStatus::Valid
        } else {
            SnapshotStatus::Invalid
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            SnapshotStatus::Invalid => 0,
            SnapshotStatus::Valid => 1,
        }
    }
}

/// Write-blocking sign broadcast to storage hosts around a checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignType {
    BlockOn,
    BlockOff,
}
