//! Active-host detection and the host/leader listing processor.

use std::collections::HashMap;

use anyhow::Context;
use tracing::{error, info, warn};

use vela_common::{
    ErrorCode, HostAddr, HostRole, HostStatus, PartitionId, SpaceId, DEFAULT_PART_ID,
    DEFAULT_SPACE_ID,
};

use crate::keys;
use crate::processor::{now_ms, MetaResult, Processor};

/// Heartbeat record stored under the host family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostInfo {
    pub role: HostRole,
    pub last_hb_ms: i64,
    pub git_sha: String,
}

impl HostInfo {
    pub fn new(role: HostRole, last_hb_ms: i64, git_sha: impl Into<String>) -> Self {
        Self {
            role,
            last_hb_ms,
            git_sha: git_sha.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.role.as_u8()];
        out.extend_from_slice(&self.last_hb_ms.to_le_bytes());
        out.extend_from_slice(&(self.git_sha.len() as u16).to_le_bytes());
        out.extend_from_slice(self.git_sha.as_bytes());
        out
    }

    /// Tolerates trailing bytes appended by newer encoders.
    pub fn decode(raw: &[u8]) -> anyhow::Result<Self> {
        anyhow::ensure!(raw.len() >= 11, "host info too short");
        let role = HostRole::from_u8(raw[0]);
        let mut hb = [0u8; 8];
        hb.copy_from_slice(&raw[1..9]);
        let last_hb_ms = i64::from_le_bytes(hb);
        let mut len = [0u8; 2];
        len.copy_from_slice(&raw[9..11]);
        let sha_len = u16::from_le_bytes(len) as usize;
        anyhow::ensure!(raw.len() >= 11 + sha_len, "host info sha truncated");
        let git_sha =
            String::from_utf8(raw[11..11 + sha_len].to_vec()).context("git sha not utf8")?;
        Ok(Self {
            role,
            last_hb_ms,
            git_sha,
        })
    }
}

/// One row of a host listing.
#[derive(Clone, Debug)]
pub struct HostItem {
    pub host: HostAddr,
    pub role: HostRole,
    pub git_sha: String,
    pub status: HostStatus,
    /// Space name -> partitions this host leads.
    pub leader_parts: HashMap<String, Vec<PartitionId>>,
    /// Space name -> partitions hosted here.
    pub all_parts: HashMap<String, Vec<PartitionId>>,
}

/// What a host listing should return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListHostType {
    Graph,
    Meta,
    Storage,
    /// Storage hosts together with leader and partition placement.
    Alloc,
}

/// Record (or refresh) a host's heartbeat.
pub async fn register_host(
    proc: &Processor,
    host: &HostAddr,
    role: HostRole,
    git_sha: &str,
) -> MetaResult<()> {
    let info = HostInfo::new(role, now_ms(), git_sha);
    proc.do_put(vec![(keys::host_key(host), info.encode())]).await
}

/// Hosts whose last heartbeat is inside the online window.
pub fn active_hosts(proc: &Processor) -> MetaResult<Vec<HostAddr>> {
    let flags = proc.flags();
    let mut iter = proc.do_prefix(&keys::host_prefix())?;
    let now = now_ms();
    let mut hosts = Vec::new();
    while iter.valid() {
        let info = HostInfo::decode(iter.val()).map_err(|_| ErrorCode::StoreFailure)?;
        if now - info.last_hb_ms < flags.online_window_ms() {
            hosts.push(keys::parse_host_key(iter.key()).map_err(|_| ErrorCode::StoreFailure)?);
        }
        iter.next();
    }
    Ok(hosts)
}

/// The host/leader listing processor.
pub struct ListHostsProcessor<'a> {
    proc: &'a Processor,
    items: Vec<HostItem>,
    space_ids: Vec<SpaceId>,
    space_names: HashMap<SpaceId, String>,
}

impl<'a> ListHostsProcessor<'a> {
    pub fn new(proc: &'a Processor) -> Self {
        Self {
            proc,
            items: Vec::new(),
            space_ids: Vec::new(),
            space_names: HashMap::new(),
        }
    }

    pub async fn process(mut self, kind: ListHostType) -> MetaResult<Vec<HostItem>> {
        let _space_guard = self.proc.locks().read(crate::locks::LockName::Space).await;
        self.load_space_names()?;
        match kind {
            ListHostType::Alloc => {
                self.fill_leaders()?;
                self.fill_all_parts()?;
            }
            ListHostType::Graph => self.all_hosts_with_status(HostRole::Graph)?,
            ListHostType::Meta => self.all_meta_hosts_status()?,
            ListHostType::Storage => self.all_hosts_with_status(HostRole::Storage)?,
        }
        Ok(self.items)
    }

    /// Meta hosts are the consensus peers of the catalog partition; their
    /// service address is the raft address shifted down one port.
    fn all_meta_hosts_status(&mut self) -> MetaResult<()> {
        // A follower cannot answer for the group membership.
        self.proc
            .store()
            .part_leader(DEFAULT_SPACE_ID, DEFAULT_PART_ID)
            .map_err(ErrorCode::from)?;
        for peer in self.proc.store().part_peers() {
            self.items.push(HostItem {
                host: peer.from_raft_addr(),
                role: HostRole::Meta,
                git_sha: String::new(),
                status: HostStatus::Online,
                leader_parts: HashMap::new(),
                all_parts: HashMap::new(),
            });
        }
        Ok(())
    }

    /// Scan the host family, classify liveness, and queue hosts beyond the
    /// removal threshold for asynchronous deletion.
    fn all_hosts_with_status(&mut self, role: HostRole) -> MetaResult<()> {
        if role == HostRole::Meta {
            return self.all_meta_hosts_status();
        }
        let flags = self.proc.flags();
        let mut iter = self.proc.do_prefix(&keys::host_prefix()).map_err(|code| {
            if code == ErrorCode::LeaderChanged {
                code
            } else {
                ErrorCode::NoHosts
            }
        })?;

        let now = now_ms();
        let mut expired_keys = Vec::new();
        while iter.valid() {
            let info = HostInfo::decode(iter.val()).map_err(|_| ErrorCode::StoreFailure)?;
            if info.role != role {
                iter.next();
                continue;
            }
            let host = keys::parse_host_key(iter.key()).map_err(|_| ErrorCode::StoreFailure)?;
            let age_ms = now - info.last_hb_ms;
            if age_ms < flags.removed_window_ms() {
                let status = if age_ms < flags.online_window_ms() {
                    HostStatus::Online
                } else {
                    HostStatus::Offline
                };
                self.items.push(HostItem {
                    host,
                    role: info.role,
                    git_sha: info.git_sha,
                    status,
                    leader_parts: HashMap::new(),
                    all_parts: HashMap::new(),
                });
            } else {
                expired_keys.push(iter.key().to_vec());
            }
            iter.next();
        }

        remove_expired_hosts(self.proc, expired_keys);
        Ok(())
    }

    /// Attach leader records to the storage host rows, dropping leaders
    /// whose host is no longer active.
    fn fill_leaders(&mut self) -> MetaResult<()> {
        self.all_hosts_with_status(HostRole::Storage)?;
        let active = active_hosts(self.proc)?;

        let mut iter = self.proc.do_prefix(&keys::leader_prefix()).map_err(|code| {
            if code == ErrorCode::LeaderChanged {
                code
            } else {
                ErrorCode::NoHosts
            }
        })?;
        while iter.valid() {
            let (space, part) =
                keys::parse_leader_key(iter.key()).map_err(|_| ErrorCode::StoreFailure)?;
            let (host, _term, status) =
                keys::parse_leader_val(iter.val()).map_err(|_| ErrorCode::StoreFailure)?;
            if status != 0 {
                iter.next();
                continue;
            }
            if !active.contains(&host) {
                info!(host = %host, "skip inactive leader host");
                iter.next();
                continue;
            }
            let Some(space_name) = self.space_names.get(&space) else {
                iter.next();
                continue;
            };
            if let Some(item) = self.items.iter_mut().find(|item| item.host == host) {
                item.leader_parts
                    .entry(space_name.clone())
                    .or_default()
                    .push(part);
            }
            iter.next();
        }
        Ok(())
    }

    /// Attach the full per-host partition list, space by space.
    fn fill_all_parts(&mut self) -> MetaResult<()> {
        let mut all_parts: HashMap<HostAddr, HashMap<String, Vec<PartitionId>>> = HashMap::new();
        for space in &self.space_ids {
            let space_name = self.space_names[space].clone();
            let mut iter = self.proc.do_prefix(&keys::part_prefix(*space))?;
            while iter.valid() {
                let part =
                    keys::parse_part_key_part_id(iter.key()).map_err(|_| ErrorCode::StoreFailure)?;
                let hosts =
                    keys::parse_part_val(iter.val()).map_err(|_| ErrorCode::StoreFailure)?;
                for host in hosts {
                    all_parts
                        .entry(host)
                        .or_default()
                        .entry(space_name.clone())
                        .or_default()
                        .push(part);
                }
                iter.next();
            }
        }

        for (host, parts) in all_parts {
            if let Some(item) = self.items.iter_mut().find(|item| item.host == host) {
                item.all_parts = parts;
            }
        }
        Ok(())
    }

    fn load_space_names(&mut self) -> MetaResult<()> {
        let mut iter = self.proc.do_prefix(&keys::space_prefix()).map_err(|code| {
            if code == ErrorCode::LeaderChanged {
                code
            } else {
                ErrorCode::NoHosts
            }
        })?;
        while iter.valid() {
            let space =
                keys::parse_space_key_id(iter.key()).map_err(|_| ErrorCode::StoreFailure)?;
            let desc = keys::parse_space_val(iter.val()).map_err(|_| ErrorCode::StoreFailure)?;
            self.space_ids.push(space);
            self.space_names.insert(space, desc.space_name);
            iter.next();
        }
        Ok(())
    }
}

/// Fire-and-forget removal of hosts long past the removal threshold. The
/// listing itself never waits on this write.
fn remove_expired_hosts(proc: &Processor, expired_keys: Vec<Vec<u8>>) {
    if expired_keys.is_empty() {
        return;
    }
    warn!(count = expired_keys.len(), "removing long-offline hosts");
    proc.store().async_multi_remove(
        expired_keys,
        Box::new(|result| {
            if let Err(err) = result {
                error!(error = %err, "async remove of expired hosts failed");
            }
        }),
    );
}
