//! The replicated catalog store.
//!
//! All metadata lives in one default space with one default partition, so
//! the store models exactly one replicated group. Writes go through an
//! unbounded channel to the replicator task, which applies each batch to the
//! engine in submission order and fires the completion callback from there.
//! That task is the source of the total write order the processors rely on.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use vela_common::{HostAddr, PartitionId, SpaceId, StoreError};

use crate::engine::{KeyFilter, KvEngine};
use crate::iter::ScanIter;
use crate::{AtomicOp, Batch, BatchOp, Kv, WriteCallback, SC_ASYNC};

/// Static wiring of the catalog group.
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Service address of this replica.
    pub local_host: HostAddr,
    /// Consensus-peer addresses of the catalog partition (raft listeners).
    pub raft_peers: Vec<HostAddr>,
    /// Root directory for checkpoints and meta exports.
    pub data_dir: PathBuf,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            local_host: HostAddr::new("127.0.0.1", 9559),
            raft_peers: vec![HostAddr::new("127.0.0.1", 9560)],
            data_dir: std::env::temp_dir().join("vela_catalog"),
        }
    }
}

enum Commit {
    Batch { batch: Batch, cb: WriteCallback },
    Atomic { op: AtomicOp, cb: WriteCallback },
}

/// Synchronous reads, asynchronous replicated writes, one leader flag.
pub struct CatalogStore {
    engine: Arc<dyn KvEngine>,
    tx: mpsc::UnboundedSender<Commit>,
    leader: AtomicBool,
    blocked: Arc<AtomicBool>,
    opts: StoreOptions,
}

impl CatalogStore {
    /// Create the store and spawn its replicator task. The store starts as
    /// leader of the default partition; drivers and tests may demote it with
    /// `set_leader`.
    pub fn new(engine: Arc<dyn KvEngine>, opts: StoreOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let blocked = Arc::new(AtomicBool::new(false));
        tokio::spawn(replicator_loop(engine.clone(), blocked.clone(), rx));
        Self {
            engine,
            tx,
            leader: AtomicBool::new(true),
            blocked,
            opts,
        }
    }

    pub fn capability(&self) -> u32 {
        self.engine.capability() | SC_ASYNC
    }

    pub fn options(&self) -> &StoreOptions {
        &self.opts
    }

    pub fn is_leader(&self, _space: SpaceId, _part: PartitionId) -> bool {
        self.leader.load(Ordering::Acquire)
    }

    /// Demote or promote this replica. Exposed for election drivers and
    /// tests.
    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::Release);
    }

    /// Current leader of the partition, or `LeaderChanged` when this replica
    /// lost the lease and cannot name a successor.
    pub fn part_leader(
        &self,
        _space: SpaceId,
        _part: PartitionId,
    ) -> Result<HostAddr, StoreError> {
        if self.leader.load(Ordering::Acquire) {
            Ok(self.opts.local_host.clone())
        } else {
            Err(StoreError::LeaderChanged)
        }
    }

    /// Consensus-peer addresses of the catalog partition.
    pub fn part_peers(&self) -> Vec<HostAddr> {
        self.opts.raft_peers.clone()
    }

    fn check_leader(&self) -> Result<(), StoreError> {
        if self.leader.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::LeaderChanged)
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.check_leader()?;
        match self.engine.get(key) {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(StoreError::KeyNotFound),
            Err(err) => Err(StoreError::failure(err.to_string())),
        }
    }

    /// Batch read preserving input order; missing keys come back as `None`.
    pub fn multi_get(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        self.check_leader()?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            match self.engine.get(key) {
                Ok(value) => out.push(value),
                Err(err) => return Err(StoreError::failure(err.to_string())),
            }
        }
        Ok(out)
    }

    pub fn prefix(&self, prefix: &[u8]) -> Result<ScanIter, StoreError> {
        self.check_leader()?;
        self.engine
            .prefix(prefix)
            .map(ScanIter::new)
            .map_err(|err| StoreError::failure(err.to_string()))
    }

    pub fn range(&self, start: &[u8], end: &[u8]) -> Result<ScanIter, StoreError> {
        self.check_leader()?;
        self.engine
            .range(start, end)
            .map(ScanIter::new)
            .map_err(|err| StoreError::failure(err.to_string()))
    }

    pub fn range_with_prefix(&self, start: &[u8], prefix: &[u8]) -> Result<ScanIter, StoreError> {
        self.check_leader()?;
        self.engine
            .range_with_prefix(start, prefix)
            .map(ScanIter::new)
            .map_err(|err| StoreError::failure(err.to_string()))
    }

    fn submit(&self, commit: Commit) {
        if let Err(mpsc::error::SendError(commit)) = self.tx.send(commit) {
            let cb = match commit {
                Commit::Batch { cb, .. } => cb,
                Commit::Atomic { cb, .. } => cb,
            };
            cb(Err(StoreError::failure("replicator stopped")));
        }
    }

    fn submit_batch(&self, batch: Batch, cb: WriteCallback) {
        if let Err(err) = self.check_leader() {
            cb(Err(err));
            return;
        }
        self.submit(Commit::Batch { batch, cb });
    }

    pub fn async_multi_put(&self, kvs: Vec<Kv>, cb: WriteCallback) {
        let batch = kvs
            .into_iter()
            .map(|(key, value)| BatchOp::Put { key, value })
            .collect();
        self.submit_batch(batch, cb);
    }

    pub fn async_remove(&self, key: Vec<u8>, cb: WriteCallback) {
        self.submit_batch(vec![BatchOp::Remove { key }], cb);
    }

    pub fn async_multi_remove(&self, keys: Vec<Vec<u8>>, cb: WriteCallback) {
        let batch = keys.into_iter().map(|key| BatchOp::Remove { key }).collect();
        self.submit_batch(batch, cb);
    }

    pub fn async_remove_range(&self, start: Vec<u8>, end: Vec<u8>, cb: WriteCallback) {
        self.submit_batch(vec![BatchOp::RemoveRange { start, end }], cb);
    }

    /// Mixed put/remove batch, applied as one unit.
    pub fn async_append_batch(&self, batch: Batch, cb: WriteCallback) {
        self.submit_batch(batch, cb);
    }

    /// Run `op` on the replicator task; the produced batch is applied
    /// atomically, a `None` return aborts the operation.
    pub fn async_atomic_op(&self, op: AtomicOp, cb: WriteCallback) {
        if let Err(err) = self.check_leader() {
            cb(Err(err));
            return;
        }
        self.submit(Commit::Atomic { op, cb });
    }

    /// Await one replicated write: issue the async call with a one-shot
    /// latch callback and block this task until the ack is delivered. The
    /// single suspension point of every processor write.
    async fn wait_latch(
        &self,
        issue: impl FnOnce(&Self, WriteCallback),
    ) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        issue(
            self,
            Box::new(move |res| {
                let _ = tx.send(res);
            }),
        );
        rx.await
            .unwrap_or_else(|_| Err(StoreError::failure("write latch dropped")))
    }

    pub async fn sync_multi_put(&self, kvs: Vec<Kv>) -> Result<(), StoreError> {
        self.wait_latch(|store, cb| store.async_multi_put(kvs, cb)).await
    }

    pub async fn sync_remove(&self, key: Vec<u8>) -> Result<(), StoreError> {
        self.wait_latch(|store, cb| store.async_remove(key, cb)).await
    }

    pub async fn sync_multi_remove(&self, keys: Vec<Vec<u8>>) -> Result<(), StoreError> {
        self.wait_latch(|store, cb| store.async_multi_remove(keys, cb)).await
    }

    pub async fn sync_remove_range(&self, start: Vec<u8>, end: Vec<u8>) -> Result<(), StoreError> {
        self.wait_latch(|store, cb| store.async_remove_range(start, end, cb))
            .await
    }

    pub async fn sync_append_batch(&self, batch: Batch) -> Result<(), StoreError> {
        self.wait_latch(|store, cb| store.async_append_batch(batch, cb)).await
    }

    pub async fn sync_atomic_op(&self, op: AtomicOp) -> Result<(), StoreError> {
        self.wait_latch(|store, cb| store.async_atomic_op(op, cb)).await
    }

    pub fn sync(&self) -> Result<(), StoreError> {
        self.flush()
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.engine
            .flush()
            .map_err(|err| StoreError::failure(err.to_string()))
    }

    pub fn compact(&self) -> Result<(), StoreError> {
        self.engine
            .compact()
            .map_err(|err| StoreError::failure(err.to_string()))
    }

    pub fn ingest(&self, files: &[PathBuf]) -> Result<(), StoreError> {
        self.engine
            .restore_from_files(files)
            .map_err(|err| StoreError::failure(err.to_string()))
    }

    /// Block or unblock local writes. While blocked, submitted batches fail
    /// without touching the engine.
    pub fn set_write_blocking(&self, sign: bool) {
        self.blocked.store(sign, Ordering::Release);
    }

    pub fn create_checkpoint(&self, name: &str) -> Result<PathBuf, StoreError> {
        self.engine
            .create_checkpoint(&self.opts.data_dir.join("checkpoints"), name)
            .map_err(|err| StoreError::failure(err.to_string()))
    }

    pub fn drop_checkpoint(&self, name: &str) -> Result<(), StoreError> {
        self.engine
            .drop_checkpoint(&self.opts.data_dir.join("checkpoints"), name)
            .map_err(|err| StoreError::failure(err.to_string()))
    }

    /// Export one key family for off-node restore.
    pub fn backup_table(
        &self,
        name: &str,
        table_prefix: &[u8],
        filter: Option<KeyFilter<'_>>,
    ) -> Result<Vec<PathBuf>, StoreError> {
        self.engine
            .backup_table(
                &self.opts.data_dir.join("backups"),
                name,
                table_prefix,
                filter,
            )
            .map_err(|err| StoreError::failure(err.to_string()))
    }

    pub fn restore_from_files(&self, files: &[PathBuf]) -> Result<(), StoreError> {
        self.engine
            .restore_from_files(files)
            .map_err(|err| StoreError::failure(err.to_string()))
    }

    /// Direct engine path used only by restore tooling; skips replication.
    pub fn multi_put_without_replicator(&self, kvs: Vec<Kv>) -> Result<(), StoreError> {
        let batch: Batch = kvs
            .into_iter()
            .map(|(key, value)| BatchOp::Put { key, value })
            .collect();
        self.engine
            .apply_batch(&batch)
            .map_err(|err| StoreError::failure(err.to_string()))
    }
}

/// Apply commits in submission order and acknowledge each on completion.
async fn replicator_loop(
    engine: Arc<dyn KvEngine>,
    blocked: Arc<AtomicBool>,
    mut rx: mpsc::UnboundedReceiver<Commit>,
) {
    while let Some(commit) = rx.recv().await {
        let (batch, cb) = match commit {
            Commit::Batch { batch, cb } => (batch, cb),
            Commit::Atomic { op, cb } => match op() {
                Some(batch) => (batch, cb),
                None => {
                    cb(Err(StoreError::failure("atomic op aborted")));
                    continue;
                }
            },
        };

        if blocked.load(Ordering::Acquire) {
            cb(Err(StoreError::failure("writes blocked")));
            continue;
        }

        let result = engine
            .apply_batch(&batch)
            .map_err(|err| {
                warn!(error = ?err, "catalog batch apply failed");
                StoreError::failure(err.to_string())
            });
        cb(result);
    }
}

impl std::fmt::Debug for CatalogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogStore")
            .field("local_host", &self.opts.local_host)
            .field("leader", &self.leader.load(Ordering::Acquire))
            .finish()
    }
}
