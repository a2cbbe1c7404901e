//! Replicated key/value facade the catalog lives on.
//!
//! This crate provides the `KvEngine` abstraction, two engine
//! implementations (`MemoryEngine` in-memory and `FjallEngine` on-disk), and
//! `CatalogStore`: the single-space, single-partition replicated store the
//! metadata processors talk to. Writes are asynchronous and acknowledged on
//! the replicator task; `CatalogStore` also carries the one-shot latch
//! adapter that makes each write look synchronous to a processor.

pub mod engine;
pub mod iter;
pub mod store;

pub use engine::{FjallEngine, KvEngine, MemoryEngine};
pub use iter::ScanIter;
pub use store::{CatalogStore, StoreOptions};

use vela_common::StoreError;

/// Engine accepts compaction filters.
pub const SC_FILTERING: u32 = 1;
/// Engine supports asynchronous operations.
pub const SC_ASYNC: u32 = 2;

/// One key/value pair submitted to the store.
pub type Kv = (Vec<u8>, Vec<u8>);

/// A single operation inside a replicated batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Remove { key: Vec<u8> },
    RemoveRange { start: Vec<u8>, end: Vec<u8> },
}

/// A batch applied atomically by the replicator: either every operation is
/// applied to a quorum or none is.
pub type Batch = Vec<BatchOp>;

/// Completion callback of an asynchronous write. Invoked exactly once, on
/// the replicator task.
pub type WriteCallback = Box<dyn FnOnce(Result<(), StoreError>) + Send + 'static>;

/// Closure run on the replicator task producing an encoded batch, or `None`
/// to abort the operation.
pub type AtomicOp = Box<dyn FnOnce() -> Option<Batch> + Send + 'static>;
