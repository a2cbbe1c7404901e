//! Outbound admin surface used by the snapshot coordinator.

use std::sync::Arc;

use async_trait::async_trait;

use vela_common::{HostAddr, SignType, SpaceId};
use vela_store::CatalogStore;

/// Checkpoint and write-blocking operations on a remote storage host.
#[async_trait]
pub trait AdminClient: Send + Sync {
    /// Create a named checkpoint for `space` on `host`; returns the
    /// checkpoint directory reported by the host.
    async fn create_snapshot(
        &self,
        space: SpaceId,
        name: &str,
        host: &HostAddr,
    ) -> anyhow::Result<String>;

    async fn drop_snapshot(&self, space: SpaceId, name: &str, host: &HostAddr)
        -> anyhow::Result<()>;

    async fn blocking_writes(
        &self,
        space: SpaceId,
        sign: SignType,
        host: &HostAddr,
    ) -> anyhow::Result<()>;
}

/// Admin client of a single-node deployment: every "remote" operation lands
/// on the local store.
pub struct LocalAdminClient {
    store: Arc<CatalogStore>,
}

impl LocalAdminClient {
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AdminClient for LocalAdminClient {
    async fn create_snapshot(
        &self,
        space: SpaceId,
        name: &str,
        _host: &HostAddr,
    ) -> anyhow::Result<String> {
        let dir = self
            .store
            .create_checkpoint(&format!("{name}_{space}"))
            .map_err(|err| anyhow::anyhow!("create checkpoint failed: {err}"))?;
        Ok(dir.display().to_string())
    }

    async fn drop_snapshot(
        &self,
        space: SpaceId,
        name: &str,
        _host: &HostAddr,
    ) -> anyhow::Result<()> {
        self.store
            .drop_checkpoint(&format!("{name}_{space}"))
            .map_err(|err| anyhow::anyhow!("drop checkpoint failed: {err}"))
    }

    async fn blocking_writes(
        &self,
        _space: SpaceId,
        sign: SignType,
        _host: &HostAddr,
    ) -> anyhow::Result<()> {
        self.store.set_write_blocking(sign == SignType::BlockOn);
        Ok(())
    }
}
