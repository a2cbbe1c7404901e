//! Space lifecycle: creation with partition placement, cascade drop, reads.

use tracing::{error, info};

use vela_common::schema::SpaceDesc;
use vela_common::{ErrorCode, SpaceId};

use crate::hosts::active_hosts;
use crate::keys;
use crate::locks::{LockMode, LockName};
use crate::processor::{MetaResult, Processor};

#[derive(Clone, Debug)]
pub struct CreateSpaceReq {
    pub desc: SpaceDesc,
    pub if_not_exists: bool,
}

/// Create a space: allocate its id, then write the name index, the payload,
/// and the initial partition placement in one replicated batch.
pub async fn create_space(proc: &Processor, req: CreateSpaceReq) -> MetaResult<SpaceId> {
    let _guard = proc.locks().write(LockName::Space).await;
    let desc = req.desc;

    match proc.get_space_id(&desc.space_name) {
        Ok(existing) => {
            if req.if_not_exists {
                return Ok(existing);
            }
            error!(space = %desc.space_name, "create space failed, already existed");
            return Err(ErrorCode::Existed);
        }
        Err(ErrorCode::NotFound) => {}
        Err(other) => return Err(other),
    }

    if desc.partition_num <= 0 || desc.replica_factor <= 0 {
        return Err(ErrorCode::InvalidOperation);
    }

    let hosts = active_hosts(proc)?;
    if hosts.is_empty() {
        return Err(ErrorCode::NoHosts);
    }
    if (desc.replica_factor as usize) > hosts.len() {
        error!(
            replica_factor = desc.replica_factor,
            active_hosts = hosts.len(),
            "not enough active hosts for replica factor"
        );
        return Err(ErrorCode::InvalidOperation);
    }

    let space_id = proc.auto_increment_id().await?;

    let mut data = vec![
        (keys::index_space_key(&desc.space_name), keys::id_val(space_id)),
        (keys::space_key(space_id), keys::space_val(&desc)),
    ];
    // Round-robin replica placement over the active host list.
    for part in 1..=desc.partition_num {
        let picked: Vec<_> = (0..desc.replica_factor as usize)
            .map(|replica| hosts[((part as usize - 1) + replica) % hosts.len()].clone())
            .collect();
        data.push((keys::part_key(space_id, part), keys::part_val(&picked)));
    }

    proc.do_sync_put_and_update(data).await?;
    info!(space = %desc.space_name, id = space_id, "created space");
    Ok(space_id)
}

/// Drop a space and every record that references its id, in one batch.
pub async fn drop_space(proc: &Processor, name: &str, if_exists: bool) -> MetaResult<()> {
    let _guards = proc
        .locks()
        .acquire(&[
            (LockName::Snapshot, LockMode::Read),
            (LockName::Space, LockMode::Write),
        ])
        .await;

    let space_id = match proc.get_space_id(name) {
        Ok(id) => id,
        Err(ErrorCode::NotFound) if if_exists => return Ok(()),
        Err(code) => {
            error!(space = %name, code = %code, "drop space failed");
            return Err(code);
        }
    };

    let mut delete_keys = Vec::new();
    for prefix in space_scoped_prefixes(space_id) {
        let mut iter = proc.do_prefix(&prefix)?;
        while iter.valid() {
            delete_keys.push(iter.key().to_vec());
            iter.next();
        }
    }
    delete_keys.push(keys::statis_key(space_id));
    delete_keys.push(keys::index_space_key(name));
    delete_keys.push(keys::space_key(space_id));

    proc.do_sync_multi_remove_and_update(delete_keys).await?;
    info!(space = %name, id = space_id, "dropped space");
    Ok(())
}

/// Every family prefix that holds records scoped to one space id.
fn space_scoped_prefixes(space: SpaceId) -> Vec<Vec<u8>> {
    vec![
        keys::part_prefix(space),
        keys::schema_tags_prefix(space),
        keys::tag_name_prefix(space),
        keys::schema_edges_prefix(space),
        keys::edge_name_prefix(space),
        keys::index_prefix(space),
        keys::index_name_prefix(space),
        keys::role_space_prefix(space),
        keys::listener_prefix(space),
        keys::leader_space_prefix(space),
        keys::rebuild_index_status_space_prefix(space),
    ]
}

pub fn get_space(proc: &Processor, name: &str) -> MetaResult<(SpaceId, SpaceDesc)> {
    let space_id = proc.get_space_id(name)?;
    let raw = proc.do_get(&keys::space_key(space_id))?;
    let desc = keys::parse_space_val(&raw).map_err(|_| ErrorCode::StoreFailure)?;
    Ok((space_id, desc))
}

pub fn list_spaces(proc: &Processor) -> MetaResult<Vec<(SpaceId, String)>> {
    let mut iter = proc.do_prefix(&keys::space_prefix())?;
    let mut out = Vec::new();
    while iter.valid() {
        let id = keys::parse_space_key_id(iter.key()).map_err(|_| ErrorCode::StoreFailure)?;
        let desc = keys::parse_space_val(iter.val()).map_err(|_| ErrorCode::StoreFailure)?;
        out.push((id, desc.space_name));
        iter.next();
    }
    Ok(out)
}
