//! Shared helpers for catalog integration tests.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use vela_common::config::LivenessFlags;
use vela_common::schema::{ColumnDef, PropertyType, Schema, SpaceDesc, VidType};
use vela_common::{HostAddr, HostRole, SignType, SpaceId};
use vela_meta::hosts::register_host;
use vela_meta::spaces::{create_space, CreateSpaceReq};
use vela_meta::{AdminClient, LockRegistry, Processor};
use vela_store::{CatalogStore, MemoryEngine, StoreOptions};

/// In-memory catalog plus the tempdir its checkpoints and exports land in.
pub struct TestCatalog {
    pub proc: Processor,
    pub store: Arc<CatalogStore>,
    _data_dir: TempDir,
}

pub fn test_catalog() -> TestCatalog {
    let data_dir = tempfile::tempdir().expect("create test dir");
    let store = Arc::new(CatalogStore::new(
        Arc::new(MemoryEngine::new()),
        StoreOptions {
            data_dir: data_dir.path().to_path_buf(),
            ..StoreOptions::default()
        },
    ));
    let proc = Processor::new(
        store.clone(),
        Arc::new(LockRegistry::new()),
        LivenessFlags::default(),
    );
    TestCatalog {
        proc,
        store,
        _data_dir: data_dir,
    }
}

/// Register `count` storage hosts with fresh heartbeats.
pub async fn seed_hosts(proc: &Processor, count: usize) -> Vec<HostAddr> {
    let mut hosts = Vec::with_capacity(count);
    for idx in 0..count {
        let host = HostAddr::new("127.0.0.1", 45_000 + idx as u16);
        register_host(proc, &host, HostRole::Storage, "deadbeef")
            .await
            .expect("register host");
        hosts.push(host);
    }
    hosts
}

pub fn space_desc(name: &str, parts: i32, replica_factor: i32) -> SpaceDesc {
    SpaceDesc {
        space_name: name.to_string(),
        partition_num: parts,
        replica_factor,
        vid_type: VidType::FixedString,
        vid_len: 8,
        group_name: None,
    }
}

pub async fn seed_space(proc: &Processor, name: &str, parts: i32) -> SpaceId {
    create_space(
        proc,
        CreateSpaceReq {
            desc: space_desc(name, parts, 1),
            if_not_exists: false,
        },
    )
    .await
    .expect("create space")
}

pub fn sample_schema(columns: &[&str]) -> Schema {
    Schema {
        columns: columns
            .iter()
            .map(|name| ColumnDef::new(*name, PropertyType::Int64))
            .collect(),
    }
}

/// Admin calls observed by the mock client, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminCall {
    CreateSnapshot {
        space: SpaceId,
        name: String,
        host: HostAddr,
    },
    DropSnapshot {
        space: SpaceId,
        name: String,
        host: HostAddr,
    },
    Blocking {
        space: SpaceId,
        sign: SignType,
        host: HostAddr,
    },
}

/// Recording admin client with per-host `BLOCK_ON` failure injection.
#[derive(Default)]
pub struct MockAdminClient {
    pub calls: Mutex<Vec<AdminCall>>,
    pub reject_block_on: Mutex<HashSet<HostAddr>>,
}

impl MockAdminClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_block_on(&self, host: &HostAddr) {
        self.reject_block_on.lock().unwrap().insert(host.clone());
    }

    pub fn calls(&self) -> Vec<AdminCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn block_calls(&self, sign: SignType) -> Vec<AdminCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, AdminCall::Blocking { sign: s, .. } if *s == sign))
            .collect()
    }
}

#[async_trait]
impl AdminClient for MockAdminClient {
    async fn create_snapshot(
        &self,
        space: SpaceId,
        name: &str,
        host: &HostAddr,
    ) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push(AdminCall::CreateSnapshot {
            space,
            name: name.to_string(),
            host: host.clone(),
        });
        Ok(format!("/cp/{space}/{name}"))
    }

    async fn drop_snapshot(
        &self,
        space: SpaceId,
        name: &str,
        host: &HostAddr,
    ) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(AdminCall::DropSnapshot {
            space,
            name: name.to_string(),
            host: host.clone(),
        });
        Ok(())
    }

    async fn blocking_writes(
        &self,
        space: SpaceId,
        sign: SignType,
        host: &HostAddr,
    ) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(AdminCall::Blocking {
            space,
            sign,
            host: host.clone(),
        });
        if sign == SignType::BlockOn && self.reject_block_on.lock().unwrap().contains(host) {
            anyhow::bail!("host {host} refused to block writes");
        }
        Ok(())
    }
}
