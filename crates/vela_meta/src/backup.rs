//! Multi-host backup coordination.
//!
//! A backup stages an `INVALID` snapshot record, blocks writes on every
//! participating storage host, checkpoints each of them, exports the catalog
//! families, unblocks, and only then commits the record as `VALID`. The
//! `INVALID` record is written as its own committed batch so a coordinator
//! crash anywhere in between leaves an observable recovery marker for the
//! garbage-collection pass.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use tracing::{error, info, warn};

use vela_common::schema::{SpaceDesc, REBUILD_RUNNING};
use vela_common::{
    ErrorCode, HostAddr, SignType, SnapshotStatus, SpaceId, DEFAULT_PART_ID, DEFAULT_SPACE_ID,
};

use crate::admin::AdminClient;
use crate::keys;
use crate::locks::LockName;
use crate::processor::{now_ms, MetaResult, Processor};

/// One host's checkpoint directory for one space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckpointInfo {
    pub host: HostAddr,
    pub dir: String,
}

#[derive(Clone, Debug)]
pub struct SpaceBackupInfo {
    pub space: SpaceDesc,
    pub cp_dirs: Vec<CheckpointInfo>,
}

/// Reply of a successful backup.
#[derive(Clone, Debug)]
pub struct BackupMeta {
    pub backup_name: String,
    pub meta_files: Vec<PathBuf>,
    pub backup_info: HashMap<SpaceId, SpaceBackupInfo>,
    pub hosts: Vec<HostAddr>,
}

#[derive(Clone, Debug, Default)]
pub struct CreateBackupReq {
    /// Space names to back up; `None` means every space.
    pub spaces: Option<Vec<String>>,
}

/// Drives checkpoint, drop and write-blocking broadcasts for one backup,
/// scoped to a space set.
pub struct Snapshot<'a> {
    proc: &'a Processor,
    client: &'a dyn AdminClient,
    spaces: HashSet<SpaceId>,
}

impl<'a> Snapshot<'a> {
    pub fn new(proc: &'a Processor, client: &'a dyn AdminClient) -> Self {
        Self {
            proc,
            client,
            spaces: HashSet::new(),
        }
    }

    pub fn set_spaces(&mut self, spaces: HashSet<SpaceId>) {
        self.spaces = spaces;
    }

    /// Request a named checkpoint from every (space, host) pair.
    pub async fn create_checkpoints(
        &self,
        name: &str,
    ) -> MetaResult<HashMap<SpaceId, Vec<CheckpointInfo>>> {
        let spaces_hosts = self.spaces_hosts()?;
        let mut info: HashMap<SpaceId, Vec<CheckpointInfo>> = HashMap::new();
        for (space, hosts) in spaces_hosts {
            for host in hosts {
                let dir = self
                    .client
                    .create_snapshot(space, name, &host)
                    .await
                    .map_err(|err| {
                        error!(space, host = %host, error = %err, "checkpoint create failed");
                        ErrorCode::RpcFailure
                    })?;
                info.entry(space).or_default().push(CheckpointInfo { host, dir });
            }
        }
        Ok(info)
    }

    /// Drop a named checkpoint on the given hosts. Failures are logged and
    /// skipped so one unreachable host cannot wedge cleanup.
    pub async fn drop_checkpoints(&self, name: &str, hosts: &[HostAddr]) -> MetaResult<()> {
        let spaces_hosts = self.spaces_hosts()?;
        for (space, space_hosts) in spaces_hosts {
            for host in space_hosts {
                if !hosts.contains(&host) {
                    continue;
                }
                if let Err(err) = self.client.drop_snapshot(space, name, &host).await {
                    error!(
                        checkpoint = %name,
                        host = %host,
                        error = %err,
                        "failed to drop checkpoint"
                    );
                }
            }
        }
        Ok(())
    }

    /// Broadcast a write-blocking sign to every (space, host) pair. On a
    /// rejected `BlockOn` the broadcast stops early; `BlockOff` is always
    /// best-effort across all hosts.
    pub async fn blocking_writes(&self, sign: SignType) -> MetaResult<()> {
        let spaces_hosts = self.spaces_hosts()?;
        let mut ret = Ok(());
        'spaces: for (space, hosts) in spaces_hosts {
            for host in hosts {
                info!(space, host = %host, sign = ?sign, "sending write-blocking sign");
                if let Err(err) = self.client.blocking_writes(space, sign, &host).await {
                    error!(space, host = %host, error = %err, "blocking sign failed");
                    ret = Err(ErrorCode::BlockWriteFailure);
                    if sign == SignType::BlockOn {
                        break 'spaces;
                    }
                }
            }
        }
        ret
    }

    /// Partition hosts per space, restricted to the coordinator's scope.
    fn spaces_hosts(&self) -> MetaResult<BTreeMap<SpaceId, BTreeSet<HostAddr>>> {
        // Every failure except a leader change degrades to a store failure.
        let mut iter = self
            .proc
            .do_prefix(&keys::all_parts_prefix())
            .map_err(|code| {
                if code == ErrorCode::LeaderChanged {
                    code
                } else {
                    ErrorCode::StoreFailure
                }
            })?;
        let mut out: BTreeMap<SpaceId, BTreeSet<HostAddr>> = BTreeMap::new();
        while iter.valid() {
            let space =
                keys::parse_part_key_space_id(iter.key()).map_err(|_| ErrorCode::StoreFailure)?;
            if !self.spaces.is_empty() && !self.spaces.contains(&space) {
                iter.next();
                continue;
            }
            let hosts = keys::parse_part_val(iter.val()).map_err(|_| ErrorCode::StoreFailure)?;
            out.entry(space).or_default().extend(hosts);
            iter.next();
        }
        Ok(out)
    }
}

/// Any index rebuild in flight forbids a backup.
fn is_index_rebuilding(proc: &Processor) -> MetaResult<bool> {
    let mut iter = proc.do_prefix(&keys::rebuild_index_status_prefix())?;
    while iter.valid() {
        if iter.val() == REBUILD_RUNNING {
            return Ok(true);
        }
        iter.next();
    }
    Ok(false)
}

/// Resolve the backup scope to space ids: the named spaces, or all of them.
fn space_names_to_ids(proc: &Processor, names: Option<&[String]>) -> MetaResult<HashSet<SpaceId>> {
    let mut spaces = HashSet::new();
    match names {
        Some(names) => {
            let lookup_keys: Vec<Vec<u8>> =
                names.iter().map(|name| keys::index_space_key(name)).collect();
            let values = proc.do_multi_get(&lookup_keys)?;
            for (name, value) in names.iter().zip(values) {
                match value {
                    Some(raw) => {
                        spaces.insert(
                            keys::parse_id_val(&raw).map_err(|_| ErrorCode::StoreFailure)?,
                        );
                    }
                    None => warn!(space = %name, "backup skips unknown space"),
                }
            }
        }
        None => {
            let mut iter = proc.do_prefix(&keys::space_prefix())?;
            while iter.valid() {
                spaces.insert(
                    keys::parse_space_key_id(iter.key()).map_err(|_| ErrorCode::StoreFailure)?,
                );
                iter.next();
            }
        }
    }
    if spaces.is_empty() {
        error!("no spaces to back up");
        return Err(ErrorCode::BackupSpaceNotFound);
    }
    Ok(spaces)
}

/// Export the catalog families relevant to `spaces` as record files.
fn backup_catalog_tables(
    proc: &Processor,
    spaces: &HashSet<SpaceId>,
    backup_name: &str,
) -> MetaResult<Vec<PathBuf>> {
    let in_scope = |key: &[u8]| -> bool {
        if key.len() < 5 {
            return false;
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&key[1..5]);
        spaces.contains(&i32::from_le_bytes(raw))
    };

    let mut files = Vec::new();
    let space_scoped = [
        keys::TAG_SPACE,
        keys::TAG_PART,
        keys::TAG_TAG,
        keys::TAG_TAG_NAME,
        keys::TAG_EDGE,
        keys::TAG_EDGE_NAME,
        keys::TAG_INDEX,
        keys::TAG_INDEX_NAME,
    ];
    for tag in space_scoped {
        let dump = proc
            .store()
            .backup_table(backup_name, &[tag], Some(&in_scope))
            .map_err(|err| {
                error!(family = tag, error = %err, "catalog family export failed");
                ErrorCode::BackupFailure
            })?;
        files.extend(dump);
    }
    // Name indexes of spaces key by name, and hosts are global: dump whole.
    for tag in [keys::TAG_SPACE_NAME, keys::TAG_HOST] {
        let dump = proc
            .store()
            .backup_table(backup_name, &[tag], None)
            .map_err(|err| {
                error!(family = tag, error = %err, "catalog family export failed");
                ErrorCode::BackupFailure
            })?;
        files.extend(dump);
    }
    Ok(files)
}

/// The backup protocol. See the module docs for the step ordering and the
/// crash-recovery contract.
pub async fn create_backup(
    proc: &Processor,
    client: &dyn AdminClient,
    req: CreateBackupReq,
) -> MetaResult<BackupMeta> {
    // Only the catalog leader may coordinate a backup.
    if !proc.store().is_leader(DEFAULT_SPACE_ID, DEFAULT_PART_ID) {
        return Err(ErrorCode::LeaderChanged);
    }

    {
        let _space_guard = proc.locks().read(LockName::Space).await;
        if is_index_rebuilding(proc)? {
            error!("index rebuild running, backup rejected");
            return Err(ErrorCode::BackupBuildingIndex);
        }
    }

    // Exclusive across all snapshot/backup operations from here on.
    let _snapshot_guard = proc.locks().write(LockName::Snapshot).await;

    let hosts = crate::hosts::active_hosts(proc)?;
    if hosts.is_empty() {
        error!("no active hosts for backup");
        return Err(ErrorCode::NoHosts);
    }

    let spaces = {
        let _space_guard = proc.locks().read(LockName::Space).await;
        space_names_to_ids(proc, req.spaces.as_deref())?
    };

    let backup_name = format!("BACKUP_{}", now_ms());

    // Stage the recovery anchor before anything touches a storage host.
    proc.do_sync_put(vec![(
        keys::snapshot_key(&backup_name),
        keys::snapshot_val(SnapshotStatus::Invalid, &keys::join_hosts(&hosts)),
    )])
    .await?;

    let mut snapshot = Snapshot::new(proc, client);
    snapshot.set_spaces(spaces.clone());

    if let Err(code) = snapshot.blocking_writes(SignType::BlockOn).await {
        error!("write blocking rejected, compensating with unblock");
        if snapshot.blocking_writes(SignType::BlockOff).await.is_err() {
            error!("cancel write blocking failed");
        }
        return Err(code);
    }

    let checkpoints = match snapshot.create_checkpoints(&backup_name).await {
        Ok(info) => info,
        Err(code) => {
            error!("checkpoint creation failed, compensating with unblock");
            if snapshot.blocking_writes(SignType::BlockOff).await.is_err() {
                error!("cancel write blocking failed");
            }
            return Err(code);
        }
    };

    let meta_files = backup_catalog_tables(proc, &spaces, &backup_name)?;

    if let Err(code) = snapshot.blocking_writes(SignType::BlockOff).await {
        // The checkpoints stand; the stuck block is reported to the caller
        // and lifted by the storage hosts' own watchdog.
        error!("cancel write blocking failed after checkpointing");
        return Err(code);
    }

    // The backup becomes durable only with this overwrite.
    proc.do_sync_put(vec![(
        keys::snapshot_key(&backup_name),
        keys::snapshot_val(SnapshotStatus::Valid, &keys::join_hosts(&hosts)),
    )])
    .await?;

    let mut backup_info = HashMap::new();
    for space in &spaces {
        let raw = proc.do_get(&keys::space_key(*space))?;
        let desc = keys::parse_space_val(&raw).map_err(|_| ErrorCode::StoreFailure)?;
        backup_info.insert(
            *space,
            SpaceBackupInfo {
                space: desc,
                cp_dirs: checkpoints.get(space).cloned().unwrap_or_default(),
            },
        );
    }

    info!(backup = %backup_name, files = meta_files.len(), "backup done");
    Ok(BackupMeta {
        backup_name,
        meta_files,
        backup_info,
        hosts,
    })
}

/// Remove a backup record and its per-host checkpoints.
pub async fn drop_backup(
    proc: &Processor,
    client: &dyn AdminClient,
    name: &str,
) -> MetaResult<()> {
    let _snapshot_guard = proc.locks().write(LockName::Snapshot).await;

    let raw = proc.do_get(&keys::snapshot_key(name))?;
    let (_status, hosts_raw) =
        keys::parse_snapshot_val(&raw).map_err(|_| ErrorCode::StoreFailure)?;
    let hosts = keys::split_hosts(&hosts_raw).map_err(|_| ErrorCode::StoreFailure)?;

    let snapshot = Snapshot::new(proc, client);
    snapshot.drop_checkpoints(name, &hosts).await?;
    proc.do_sync_multi_remove_and_update(vec![keys::snapshot_key(name)])
        .await?;
    info!(backup = %name, "dropped backup");
    Ok(())
}

/// Recovery pass for coordinator crashes: every `INVALID` snapshot record is
/// deleted together with its dangling checkpoints. Returns how many records
/// were collected.
pub async fn gc_stale_snapshots(proc: &Processor, client: &dyn AdminClient) -> MetaResult<usize> {
    let _snapshot_guard = proc.locks().write(LockName::Snapshot).await;

    let mut stale = Vec::new();
    {
        let mut iter = proc.do_prefix(&keys::snapshot_prefix())?;
        while iter.valid() {
            let (status, hosts_raw) =
                keys::parse_snapshot_val(iter.val()).map_err(|_| ErrorCode::StoreFailure)?;
            if status == SnapshotStatus::Invalid {
                let name =
                    keys::parse_snapshot_name(iter.key()).map_err(|_| ErrorCode::StoreFailure)?;
                let hosts =
                    keys::split_hosts(&hosts_raw).map_err(|_| ErrorCode::StoreFailure)?;
                stale.push((name, hosts));
            }
            iter.next();
        }
    }

    if stale.is_empty() {
        return Ok(0);
    }

    let snapshot = Snapshot::new(proc, client);
    let mut doomed_keys = Vec::with_capacity(stale.len());
    for (name, hosts) in &stale {
        warn!(snapshot = %name, "collecting stale snapshot");
        snapshot.drop_checkpoints(name, hosts).await?;
        doomed_keys.push(keys::snapshot_key(name));
    }
    proc.do_sync_multi_remove_and_update(doomed_keys).await?;
    Ok(stale.len())
}
