//! Typed error codes shared across the catalog store and processors.

use thiserror::Error;

/// Result codes reported by catalog processors. Every processor produces
/// exactly one code per request, on every path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ErrorCode {
    /// The catalog partition changed leader; the caller should retry against
    /// the new leader.
    #[error("leader changed")]
    LeaderChanged,
    /// A key or named entity was not found.
    #[error("not found")]
    NotFound,
    /// Replication or engine IO failure.
    #[error("store failure")]
    StoreFailure,
    /// An outbound admin RPC failed.
    #[error("rpc failure")]
    RpcFailure,
    /// A schema alteration would break an existing index.
    #[error("index conflict")]
    Conflict,
    /// The named entity (or an identical index) already exists.
    #[error("existed")]
    Existed,
    #[error("index not found")]
    IndexNotFound,
    #[error("tag not found")]
    TagNotFound,
    #[error("edge not found")]
    EdgeNotFound,
    /// The request is malformed (empty contexts, empty yield list, ...).
    #[error("invalid operation")]
    InvalidOperation,
    /// A backup cannot start while an index rebuild is running.
    #[error("backup rejected: index rebuild running")]
    BackupBuildingIndex,
    /// At least one storage host refused to block writes.
    #[error("block write failure")]
    BlockWriteFailure,
    /// No active hosts of the required role.
    #[error("no hosts")]
    NoHosts,
    /// The backup request resolved to an empty space set.
    #[error("backup space not found")]
    BackupSpaceNotFound,
    /// Exporting the catalog families failed.
    #[error("backup failure")]
    BackupFailure,
}

/// Errors surfaced by the replicated KV store.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("leader changed")]
    LeaderChanged,
    #[error("key not found")]
    KeyNotFound,
    #[error("store failure: {0}")]
    StoreFailure(String),
}

impl StoreError {
    pub fn failure(msg: impl Into<String>) -> Self {
        StoreError::StoreFailure(msg.into())
    }
}

impl From<StoreError> for ErrorCode {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LeaderChanged => ErrorCode::LeaderChanged,
            StoreError::KeyNotFound => ErrorCode::NotFound,
            StoreError::StoreFailure(_) => ErrorCode::StoreFailure,
        }
    }
}
