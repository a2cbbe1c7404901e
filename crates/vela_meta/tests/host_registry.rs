//! Host liveness classification, expiration, and leader joining.

mod common;

use std::time::Duration;

use common::{seed_hosts, seed_space, test_catalog};
use vela_common::{ErrorCode, HostAddr, HostRole, HostStatus};
use vela_meta::hosts::{HostInfo, ListHostType, ListHostsProcessor};
use vela_meta::keys;
use vela_meta::processor::now_ms;

async fn put_host(
    proc: &vela_meta::Processor,
    host: &HostAddr,
    role: HostRole,
    last_hb_ms: i64,
) {
    let info = HostInfo::new(role, last_hb_ms, "cafe01");
    proc.do_put(vec![(keys::host_key(host), info.encode())])
        .await
        .unwrap();
}

#[tokio::test]
async fn hosts_classify_online_offline_and_expire() {
    let catalog = test_catalog();
    let proc = &catalog.proc;
    let flags = proc.flags();
    let now = now_ms();

    let online = HostAddr::new("10.0.0.1", 44500);
    let offline = HostAddr::new("10.0.0.2", 44500);
    let expired = HostAddr::new("10.0.0.3", 44500);
    put_host(proc, &online, HostRole::Storage, now).await;
    put_host(
        proc,
        &offline,
        HostRole::Storage,
        now - flags.online_window_ms() - 1_000,
    )
    .await;
    put_host(
        proc,
        &expired,
        HostRole::Storage,
        now - flags.removed_window_ms() - 1_000,
    )
    .await;
    // A graph host must not show up in a storage listing.
    put_host(proc, &HostAddr::new("10.0.0.4", 44500), HostRole::Graph, now).await;

    let items = ListHostsProcessor::new(proc)
        .process(ListHostType::Storage)
        .await
        .unwrap();
    assert_eq!(items.len(), 2);
    let status_of = |host: &HostAddr| {
        items
            .iter()
            .find(|item| &item.host == host)
            .map(|item| item.status)
    };
    assert_eq!(status_of(&online), Some(HostStatus::Online));
    assert_eq!(status_of(&offline), Some(HostStatus::Offline));
    assert_eq!(status_of(&expired), None);

    // Expiration is queued asynchronously; the record disappears shortly
    // after the listing returns.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        proc.do_get(&keys::host_key(&expired)),
        Err(ErrorCode::NotFound)
    );
    assert!(proc.do_get(&keys::host_key(&online)).is_ok());
}

#[tokio::test]
async fn alloc_listing_joins_leaders_and_parts() {
    let catalog = test_catalog();
    let proc = &catalog.proc;
    let hosts = seed_hosts(proc, 2).await;
    let space = seed_space(proc, "g", 2).await;

    // One leader record per partition: one on an active host, one on a host
    // that never heartbeats.
    let dead = HostAddr::new("10.9.9.9", 44500);
    proc.do_put(vec![
        (
            keys::leader_key(space, 1),
            keys::leader_val(&hosts[0], 3, 0),
        ),
        (keys::leader_key(space, 2), keys::leader_val(&dead, 3, 0)),
    ])
    .await
    .unwrap();

    let items = ListHostsProcessor::new(proc)
        .process(ListHostType::Alloc)
        .await
        .unwrap();

    let leader_item = items.iter().find(|item| item.host == hosts[0]).unwrap();
    assert_eq!(leader_item.leader_parts.get("g"), Some(&vec![1]));
    // The dead host is not even listed, so its leader record is dropped.
    assert!(items.iter().all(|item| item.host != dead));

    // Every listed storage host carries its partition placement.
    for item in &items {
        assert!(
            item.all_parts.contains_key("g"),
            "host {} has no parts for g",
            item.host
        );
    }
}

#[tokio::test]
async fn meta_listing_reports_consensus_peers_on_service_ports() {
    let catalog = test_catalog();
    let proc = &catalog.proc;
    let items = ListHostsProcessor::new(proc)
        .process(ListHostType::Meta)
        .await
        .unwrap();
    // StoreOptions::default registers one raft peer on 9560; the service
    // address is one port below.
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].host, HostAddr::new("127.0.0.1", 9559));
    assert_eq!(items[0].role, HostRole::Meta);
    assert_eq!(items[0].status, HostStatus::Online);
}
