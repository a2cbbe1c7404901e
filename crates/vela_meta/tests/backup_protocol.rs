//! Backup coordinator protocol: happy path, gates, compensation, recovery.

mod common;

use common::{seed_hosts, seed_space, test_catalog, AdminCall, MockAdminClient};
use vela_common::schema::REBUILD_RUNNING;
use vela_common::{ErrorCode, SignType, SnapshotStatus};
use vela_meta::backup::{create_backup, drop_backup, gc_stale_snapshots, CreateBackupReq};
use vela_meta::keys;

fn snapshot_records(
    proc: &vela_meta::Processor,
) -> Vec<(String, SnapshotStatus, String)> {
    let mut iter = proc.do_prefix(&keys::snapshot_prefix()).unwrap();
    let mut out = Vec::new();
    while iter.valid() {
        let name = keys::parse_snapshot_name(iter.key()).unwrap();
        let (status, hosts) = keys::parse_snapshot_val(iter.val()).unwrap();
        out.push((name, status, hosts));
        iter.next();
    }
    out
}

#[tokio::test]
async fn backup_happy_path_commits_valid_and_unblocks_every_host() {
    let catalog = test_catalog();
    let proc = &catalog.proc;
    let hosts = seed_hosts(proc, 2).await;
    seed_space(proc, "a", 2).await;
    seed_space(proc, "b", 1).await;

    let client = MockAdminClient::new();
    let meta = create_backup(
        proc,
        &client,
        CreateBackupReq {
            spaces: Some(vec!["a".to_string(), "b".to_string()]),
        },
    )
    .await
    .unwrap();

    // Snapshot record is VALID and lists exactly the reported hosts.
    let records = snapshot_records(proc);
    assert_eq!(records.len(), 1);
    let (name, status, recorded_hosts) = &records[0];
    assert_eq!(name, &meta.backup_name);
    assert_eq!(*status, SnapshotStatus::Valid);
    assert_eq!(
        keys::split_hosts(recorded_hosts).unwrap(),
        meta.hosts,
    );
    assert_eq!(meta.hosts, hosts);

    // Every space carries checkpoint directories in the reply.
    assert_eq!(meta.backup_info.len(), 2);
    for info in meta.backup_info.values() {
        assert!(!info.cp_dirs.is_empty(), "space without checkpoint dirs");
    }
    assert!(!meta.meta_files.is_empty(), "meta export produced no files");

    // BLOCK_OFF reached every (space, host) pair that saw BLOCK_ON.
    let on: Vec<_> = client
        .block_calls(SignType::BlockOn)
        .into_iter()
        .map(|call| match call {
            AdminCall::Blocking { space, host, .. } => (space, host),
            _ => unreachable!(),
        })
        .collect();
    let off: Vec<_> = client
        .block_calls(SignType::BlockOff)
        .into_iter()
        .map(|call| match call {
            AdminCall::Blocking { space, host, .. } => (space, host),
            _ => unreachable!(),
        })
        .collect();
    assert!(!on.is_empty());
    for pair in &on {
        assert!(off.contains(pair), "{pair:?} was never unblocked");
    }
}

#[tokio::test]
async fn backup_rejected_while_index_rebuild_runs() {
    let catalog = test_catalog();
    let proc = &catalog.proc;
    seed_hosts(proc, 1).await;
    let space = seed_space(proc, "s", 1).await;

    proc.do_put(vec![(
        keys::rebuild_index_status_key(space, "t_idx"),
        REBUILD_RUNNING.to_vec(),
    )])
    .await
    .unwrap();

    let client = MockAdminClient::new();
    let result = create_backup(proc, &client, CreateBackupReq::default()).await;
    assert_eq!(result.unwrap_err(), ErrorCode::BackupBuildingIndex);

    // No snapshot record was staged and no host was touched.
    assert!(snapshot_records(proc).is_empty());
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn backup_block_failure_compensates_and_leaves_invalid_marker() {
    let catalog = test_catalog();
    let proc = &catalog.proc;
    let hosts = seed_hosts(proc, 2).await;
    seed_space(proc, "a", 2).await;

    let client = MockAdminClient::new();
    client.reject_block_on(&hosts[1]);

    let result = create_backup(proc, &client, CreateBackupReq::default()).await;
    assert_eq!(result.unwrap_err(), ErrorCode::BlockWriteFailure);

    // Compensation unblocked the survivors.
    assert!(!client.block_calls(SignType::BlockOff).is_empty());
    // No checkpoint was requested.
    assert!(client
        .calls()
        .iter()
        .all(|call| !matches!(call, AdminCall::CreateSnapshot { .. })));

    // At most an INVALID record lingers; no VALID record is observable.
    let records = snapshot_records(proc);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].1, SnapshotStatus::Invalid);
}

#[tokio::test]
async fn stale_invalid_snapshot_is_garbage_collected() {
    let catalog = test_catalog();
    let proc = &catalog.proc;
    let hosts = seed_hosts(proc, 1).await;
    seed_space(proc, "a", 1).await;

    // Simulate a coordinator crash between staging and commit.
    proc.do_put(vec![(
        keys::snapshot_key("BACKUP_crashed"),
        keys::snapshot_val(SnapshotStatus::Invalid, &keys::join_hosts(&hosts)),
    )])
    .await
    .unwrap();

    let client = MockAdminClient::new();
    let collected = gc_stale_snapshots(proc, &client).await.unwrap();
    assert_eq!(collected, 1);
    assert!(snapshot_records(proc).is_empty());
    assert!(client
        .calls()
        .iter()
        .any(|call| matches!(call, AdminCall::DropSnapshot { name, .. } if name == "BACKUP_crashed")));

    // VALID records survive the pass.
    proc.do_put(vec![(
        keys::snapshot_key("BACKUP_ok"),
        keys::snapshot_val(SnapshotStatus::Valid, &keys::join_hosts(&hosts)),
    )])
    .await
    .unwrap();
    assert_eq!(gc_stale_snapshots(proc, &client).await.unwrap(), 0);
    assert_eq!(snapshot_records(proc).len(), 1);
}

#[tokio::test]
async fn backup_gates_on_leader_hosts_and_spaces() {
    let catalog = test_catalog();
    let proc = &catalog.proc;
    let client = MockAdminClient::new();

    // Followers refuse to coordinate.
    catalog.store.set_leader(false);
    assert_eq!(
        create_backup(proc, &client, CreateBackupReq::default())
            .await
            .unwrap_err(),
        ErrorCode::LeaderChanged
    );
    catalog.store.set_leader(true);

    // No active hosts.
    assert_eq!(
        create_backup(proc, &client, CreateBackupReq::default())
            .await
            .unwrap_err(),
        ErrorCode::NoHosts
    );

    // Hosts but no spaces resolve to an empty scope.
    seed_hosts(proc, 1).await;
    assert_eq!(
        create_backup(proc, &client, CreateBackupReq::default())
            .await
            .unwrap_err(),
        ErrorCode::BackupSpaceNotFound
    );
}

#[tokio::test]
async fn drop_backup_removes_record_and_checkpoints() {
    let catalog = test_catalog();
    let proc = &catalog.proc;
    seed_hosts(proc, 1).await;
    seed_space(proc, "a", 1).await;

    let client = MockAdminClient::new();
    let meta = create_backup(proc, &client, CreateBackupReq::default())
        .await
        .unwrap();

    drop_backup(proc, &client, &meta.backup_name).await.unwrap();
    assert!(snapshot_records(proc).is_empty());
    assert!(client.calls().iter().any(|call| matches!(
        call,
        AdminCall::DropSnapshot { name, .. } if *name == meta.backup_name
    )));
}
