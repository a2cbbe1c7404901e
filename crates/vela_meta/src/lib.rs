//! The vela catalog service.
//!
//! All metadata of the graph cluster (spaces, schemas, indexes, hosts,
//! partitions, snapshots) lives in one replicated KV group. This crate holds
//! the key codec, the named lock registry, the processor base every
//! mutation follows, the host/leader registry, the space/schema/index
//! managers, and the backup coordinator.

pub mod admin;
pub mod backup;
pub mod cache_loader;
pub mod hosts;
pub mod indexes;
pub mod keys;
pub mod locks;
pub mod processor;
pub mod schemas;
pub mod spaces;

pub use admin::{AdminClient, LocalAdminClient};
pub use locks::{LockMode, LockName, LockRegistry};
pub use processor::{MetaResult, Processor};
