//! Shared plumbing of every catalog mutation.
//!
//! A processor acquires its locks, resolves names to ids, reads current
//! state, computes one batch of puts/removes, issues it through the store's
//! write latch, and reports exactly one result code. The helpers here are
//! that skeleton; the per-entity processors live in `spaces`, `schemas`,
//! `indexes`, `hosts` and `backup`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error};

use vela_common::config::LivenessFlags;
use vela_common::schema::{AlterSchemaItem, AlterSchemaOp, ColumnDef, IndexItem, Schema};
use vela_common::{EdgeType, ErrorCode, HostAddr, IndexId, SchemaVer, SpaceId, TagId};
use vela_store::{CatalogStore, Kv, ScanIter};

use crate::keys;
use crate::locks::{LockName, LockRegistry};

/// Result type of every processor: exactly one code per request.
pub type MetaResult<T> = Result<T, ErrorCode>;

/// Wall-clock milliseconds used for heartbeat math and the revision cursor.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Shared context of the catalog processors.
#[derive(Clone)]
pub struct Processor {
    store: Arc<CatalogStore>,
    locks: Arc<LockRegistry>,
    flags: LivenessFlags,
}

impl Processor {
    pub fn new(store: Arc<CatalogStore>, locks: Arc<LockRegistry>, flags: LivenessFlags) -> Self {
        Self { store, locks, flags }
    }

    pub fn store(&self) -> &Arc<CatalogStore> {
        &self.store
    }

    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    pub fn flags(&self) -> LivenessFlags {
        self.flags
    }

    // ---- reads ----

    pub fn do_get(&self, key: &[u8]) -> MetaResult<Vec<u8>> {
        self.store.get(key).map_err(ErrorCode::from)
    }

    /// Batch read; missing keys come back as `None`.
    pub fn do_multi_get(&self, keys: &[Vec<u8>]) -> MetaResult<Vec<Option<Vec<u8>>>> {
        self.store.multi_get(keys).map_err(ErrorCode::from)
    }

    pub fn do_prefix(&self, prefix: &[u8]) -> MetaResult<ScanIter> {
        self.store.prefix(prefix).map_err(|err| {
            debug!(error = %err, "prefix scan failed");
            ErrorCode::from(err)
        })
    }

    /// Values of every entry in `[start, end)`.
    pub fn do_scan(&self, start: &[u8], end: &[u8]) -> MetaResult<Vec<Vec<u8>>> {
        let mut iter = self.store.range(start, end).map_err(ErrorCode::from)?;
        let mut values = Vec::new();
        while iter.valid() {
            values.push(iter.val().to_vec());
            iter.next();
        }
        Ok(values)
    }

    // ---- writes (each blocks on one replication latch) ----

    pub async fn do_put(&self, data: Vec<Kv>) -> MetaResult<()> {
        self.store.sync_multi_put(data).await.map_err(ErrorCode::from)
    }

    pub async fn do_remove(&self, key: Vec<u8>) -> MetaResult<()> {
        self.store.sync_remove(key).await.map_err(ErrorCode::from)
    }

    pub async fn do_multi_remove(&self, keys: Vec<Vec<u8>>) -> MetaResult<()> {
        self.store.sync_multi_remove(keys).await.map_err(ErrorCode::from)
    }

    pub async fn do_remove_range(&self, start: Vec<u8>, end: Vec<u8>) -> MetaResult<()> {
        self.store
            .sync_remove_range(start, end)
            .await
            .map_err(ErrorCode::from)
    }

    pub async fn do_sync_put(&self, data: Vec<Kv>) -> MetaResult<()> {
        self.store.sync_multi_put(data).await.map_err(|err| {
            error!(error = %err, "put data error on catalog store");
            ErrorCode::from(err)
        })
    }

    /// Write the batch, then stamp the revision cursor observers use.
    pub async fn do_sync_put_and_update(&self, data: Vec<Kv>) -> MetaResult<()> {
        self.do_sync_put(data).await?;
        self.update_last_update_time().await
    }

    pub async fn do_sync_multi_remove_and_update(&self, keys: Vec<Vec<u8>>) -> MetaResult<()> {
        self.store.sync_multi_remove(keys).await.map_err(|err| {
            error!(error = %err, "remove data error on catalog store");
            ErrorCode::from(err)
        })?;
        self.update_last_update_time().await
    }

    pub async fn update_last_update_time(&self) -> MetaResult<()> {
        let stamp = (
            keys::LAST_UPDATE_TIME_KEY.to_vec(),
            keys::i64_val(now_ms()),
        );
        self.store
            .sync_multi_put(vec![stamp])
            .await
            .map_err(ErrorCode::from)
    }

    pub fn last_update_time(&self) -> MetaResult<i64> {
        let raw = self.do_get(keys::LAST_UPDATE_TIME_KEY)?;
        keys::parse_i64_val(&raw).map_err(|_| ErrorCode::StoreFailure)
    }

    /// Allocate the next numeric id. Serialized on the id write-lock; the
    /// counter write must acknowledge before the value is handed out.
    pub async fn auto_increment_id(&self) -> MetaResult<i32> {
        let _guard = self.locks.write(LockName::Id).await;
        let id = match self.do_get(keys::ID_KEY) {
            Ok(raw) => keys::parse_id_val(&raw).map_err(|_| ErrorCode::StoreFailure)? + 1,
            Err(ErrorCode::NotFound) => 1,
            Err(other) => return Err(other),
        };
        self.do_sync_put(vec![(keys::ID_KEY.to_vec(), keys::id_val(id))])
            .await?;
        Ok(id)
    }

    // ---- name and schema resolution ----

    pub fn space_exists(&self, space: SpaceId) -> MetaResult<()> {
        self.do_get(&keys::space_key(space)).map(|_| ())
    }

    pub fn get_space_id(&self, name: &str) -> MetaResult<SpaceId> {
        let raw = self.do_get(&keys::index_space_key(name))?;
        keys::parse_id_val(&raw).map_err(|_| ErrorCode::StoreFailure)
    }

    pub fn get_tag_id(&self, space: SpaceId, name: &str) -> MetaResult<TagId> {
        let raw = self.do_get(&keys::index_tag_key(space, name))?;
        keys::parse_id_val(&raw).map_err(|_| ErrorCode::StoreFailure)
    }

    pub fn get_edge_type(&self, space: SpaceId, name: &str) -> MetaResult<EdgeType> {
        let raw = self.do_get(&keys::index_edge_key(space, name))?;
        keys::parse_id_val(&raw).map_err(|_| ErrorCode::StoreFailure)
    }

    pub fn get_index_id(&self, space: SpaceId, name: &str) -> MetaResult<IndexId> {
        let raw = self.do_get(&keys::index_index_key(space, name))?;
        keys::parse_id_val(&raw).map_err(|_| ErrorCode::StoreFailure)
    }

    /// Newest version of a tag schema. The version component of schema keys
    /// is order-inverted, so the first prefix row is the newest.
    pub fn get_latest_tag_schema(
        &self,
        space: SpaceId,
        tag: TagId,
    ) -> MetaResult<(SchemaVer, Schema)> {
        let iter = self.do_prefix(&keys::schema_tag_prefix(space, tag))?;
        if !iter.valid() {
            return Err(ErrorCode::NotFound);
        }
        let ver = keys::parse_schema_ver(iter.key()).map_err(|_| ErrorCode::StoreFailure)?;
        let schema = keys::parse_schema(iter.val()).map_err(|_| ErrorCode::StoreFailure)?;
        Ok((ver, schema))
    }

    pub fn get_latest_edge_schema(
        &self,
        space: SpaceId,
        edge: EdgeType,
    ) -> MetaResult<(SchemaVer, Schema)> {
        let iter = self.do_prefix(&keys::schema_edge_prefix(space, edge))?;
        if !iter.valid() {
            return Err(ErrorCode::NotFound);
        }
        let ver = keys::parse_schema_ver(iter.key()).map_err(|_| ErrorCode::StoreFailure)?;
        let schema = keys::parse_schema(iter.val()).map_err(|_| ErrorCode::StoreFailure)?;
        Ok((ver, schema))
    }

    /// Every index whose target schema id is `tag_or_edge`.
    pub fn get_indexes(&self, space: SpaceId, tag_or_edge: i32) -> MetaResult<Vec<IndexItem>> {
        let mut iter = self.do_prefix(&keys::index_prefix(space))?;
        let mut items = Vec::new();
        while iter.valid() {
            let item = keys::parse_index(iter.val()).map_err(|_| ErrorCode::StoreFailure)?;
            if item.schema_id.raw_id() == tag_or_edge {
                items.push(item);
            }
            iter.next();
        }
        Ok(items)
    }

    /// Every registered host address.
    pub fn all_hosts(&self) -> MetaResult<Vec<HostAddr>> {
        let mut iter = self.do_prefix(&keys::host_prefix())?;
        let mut hosts = Vec::new();
        while iter.valid() {
            let host = keys::parse_host_key(iter.key()).map_err(|_| ErrorCode::StoreFailure)?;
            hosts.push(host);
            iter.next();
        }
        Ok(hosts)
    }
}

/// Reject a schema alteration that changes or drops a column referenced by
/// any existing index.
pub fn index_check(items: &[IndexItem], alter_items: &[AlterSchemaItem]) -> MetaResult<()> {
    for index in items {
        for alter in alter_items {
            if !matches!(alter.op, AlterSchemaOp::Change | AlterSchemaOp::Drop) {
                continue;
            }
            for col in &alter.columns {
                if index.has_field(&col.name) {
                    error!(
                        index = %index.index_name,
                        column = %col.name,
                        "index conflict on alter"
                    );
                    return Err(ErrorCode::Conflict);
                }
            }
        }
    }
    Ok(())
}

/// True when `fields` matches the leading fields of `item` exactly, i.e. the
/// new index would duplicate an existing one.
pub fn check_index_exist(fields: &[ColumnDef], item: &IndexItem) -> bool {
    if fields.is_empty() {
        error!(index = %item.index_name, "index has existed");
        return true;
    }
    for (i, field) in fields.iter().enumerate() {
        match item.fields.get(i) {
            Some(existing) if existing.name == field.name => {}
            _ => break,
        }
        if i == fields.len() - 1 {
            error!(index = %item.index_name, "index has existed");
            return true;
        }
    }
    false
}
