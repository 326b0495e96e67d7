//! Pull reconciliation against a mocked backend

use std::time::Duration;

use assert_matches::assert_matches;
use opsync::model::{EntityStatus, GroupFilter, HostFilter, ReasonCode};
use opsync::monitor::MonitorError;
use opsync::storage::InventoryStore;
use opsync::sync::SyncError;
use pretty_assertions::assert_eq;
use wiremock::{Mock, MockServer};

use super::helpers::*;

#[tokio::test]
async fn pull_hosts_creates_then_updates_local_records() {
    let server = MockServer::start().await;
    mount_login(&server, "session-1").await;
    Mock::given(rpc_method("host.get"))
        .respond_with(rpc_result(serde_json::json!([
            remote_host_json("10084", "web-1", Some(("2", "Linux servers"))),
            remote_host_json("10085", "web-2", Some(("2", "Linux servers"))),
        ])))
        .mount(&server)
        .await;

    let (store, reconciler, _events) = test_context();
    let monitor_id = store
        .add_monitor(test_monitor(&server.uri(), None))
        .await
        .unwrap();

    let result = reconciler.pull_hosts(monitor_id).await.unwrap();
    assert_eq!(result.added, 2);
    assert_eq!(result.updated, 0);
    assert_eq!(result.failed, 0);
    assert_eq!(result.total, 2);

    // every remote host exists locally with its external id set
    let hosts = store
        .search_hosts(&HostFilter::for_monitor(monitor_id))
        .await
        .unwrap();
    assert_eq!(hosts.len(), 2);
    assert!(hosts.iter().all(|h| h.external_id.is_some()));
    assert!(hosts.iter().all(|h| h.status == EntityStatus::Active));

    // a local group was materialized from the remote metadata
    let groups = store
        .search_groups(&GroupFilter::for_monitor(monitor_id))
        .await
        .unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].external_id.as_deref(), Some("2"));
    assert!(hosts.iter().all(|h| h.group_id == Some(groups[0].id)));

    // the session token obtained during the pull is cached
    let monitor = store.get_monitor(monitor_id).await.unwrap();
    assert_eq!(monitor.auth_token.as_deref(), Some("session-1"));
    assert_eq!(monitor.status, EntityStatus::Active);

    // second pull converges to updates, not duplicates
    let result = reconciler.pull_hosts(monitor_id).await.unwrap();
    assert_eq!(result.added, 0);
    assert_eq!(result.updated, 2);
    let hosts = store
        .search_hosts(&HostFilter::for_monitor(monitor_id))
        .await
        .unwrap();
    assert_eq!(hosts.len(), 2);
}

#[tokio::test]
async fn pull_hosts_flags_vanished_hosts_without_deleting() {
    let server = MockServer::start().await;
    Mock::given(rpc_method("host.get"))
        .respond_with(rpc_result(serde_json::json!([
            remote_host_json("10084", "web-1", None),
        ])))
        .mount(&server)
        .await;

    let (store, reconciler, _events) = test_context();
    let monitor_id = store
        .add_monitor(test_monitor(&server.uri(), Some("cached")))
        .await
        .unwrap();
    let gone_id = store
        .add_host(test_host(monitor_id, "gone-host", Some("999")))
        .await
        .unwrap();
    let item_id = store
        .add_item(test_item(gone_id, "cpu load", Some("5555")))
        .await
        .unwrap();

    reconciler.pull_hosts(monitor_id).await.unwrap();

    // the vanished host is flagged, never deleted
    let gone = store.get_host(gone_id).await.unwrap();
    assert_eq!(gone.status, EntityStatus::Error);
    let reason = gone.status_reason.unwrap();
    assert_eq!(reason.code, ReasonCode::NotFoundOnMonitor);
    assert_eq!(reason.text, "host not found on monitor");

    // the flag cascades to its items
    let item = store.get_item(item_id).await.unwrap();
    assert_eq!(item.status, EntityStatus::Error);

    // the host that is still reported stays healthy
    let hosts = store
        .search_hosts(&HostFilter::for_monitor(monitor_id))
        .await
        .unwrap();
    assert_eq!(hosts.len(), 2);
    let present = hosts
        .iter()
        .find(|h| h.external_id.as_deref() == Some("10084"))
        .unwrap();
    assert_eq!(present.status, EntityStatus::Active);
}

#[tokio::test]
async fn pull_from_disabled_monitor_fails_fast_and_cascades() {
    let (store, reconciler, _events) = test_context();

    let mut monitor = test_monitor("http://127.0.0.1:1", Some("cached"));
    monitor.status = EntityStatus::Disabled;
    let monitor_id = store.add_monitor(monitor).await.unwrap();

    let host_id = store
        .add_host(test_host(monitor_id, "web-1", Some("10084")))
        .await
        .unwrap();
    let item_id = store
        .add_item(test_item(host_id, "cpu load", Some("1001")))
        .await
        .unwrap();

    let err = reconciler.pull_hosts(monitor_id).await.unwrap_err();
    assert_matches!(
        err,
        SyncError::MonitorInactive {
            status: EntityStatus::Disabled,
            ..
        }
    );

    let monitor = store.get_monitor(monitor_id).await.unwrap();
    assert_eq!(monitor.status, EntityStatus::Error);
    let reason = monitor.status_reason.unwrap();
    assert_eq!(reason.code, ReasonCode::MonitorInactive);
    assert_eq!(reason.text, "monitor is not active (status: disabled)");

    // every host of the monitor carries the same reason, cascading to items
    let host = store.get_host(host_id).await.unwrap();
    assert_eq!(host.status, EntityStatus::Error);
    assert_eq!(host.status_reason.unwrap().text, reason.text);

    let item = store.get_item(item_id).await.unwrap();
    assert_eq!(item.status, EntityStatus::Error);
    assert_eq!(item.status_reason.unwrap().text, reason.text);
}

#[tokio::test]
async fn pull_hosts_authentication_failure_cascades_reason() {
    let server = MockServer::start().await;
    Mock::given(rpc_method("user.login"))
        .respond_with(rpc_error(
            "Invalid params.",
            "Login name or password is incorrect.",
        ))
        .mount(&server)
        .await;

    let (store, reconciler, _events) = test_context();
    let monitor_id = store
        .add_monitor(test_monitor(&server.uri(), None))
        .await
        .unwrap();
    let host_id = store
        .add_host(test_host(monitor_id, "web-1", Some("10084")))
        .await
        .unwrap();

    let err = reconciler.pull_hosts(monitor_id).await.unwrap_err();
    assert_matches!(err, SyncError::Monitor(MonitorError::AuthenticationFailed(_)));

    let monitor = store.get_monitor(monitor_id).await.unwrap();
    assert_eq!(monitor.status, EntityStatus::Error);
    assert_eq!(
        monitor.status_reason.as_ref().unwrap().code,
        ReasonCode::AuthenticationFailed
    );
    let host = store.get_host(host_id).await.unwrap();
    assert_eq!(host.status, EntityStatus::Error);
    assert_eq!(
        host.status_reason.unwrap().code,
        ReasonCode::AuthenticationFailed
    );
}

#[tokio::test]
async fn pull_groups_links_existing_group_by_name() {
    let server = MockServer::start().await;
    Mock::given(rpc_method("hostgroup.get"))
        .respond_with(rpc_result(serde_json::json!([
            { "groupid": "2", "name": "Linux servers" },
            { "groupid": "4", "name": "Databases" },
        ])))
        .mount(&server)
        .await;

    let (store, reconciler, _events) = test_context();
    let monitor_id = store
        .add_monitor(test_monitor(&server.uri(), Some("cached")))
        .await
        .unwrap();

    // a group created locally before it ever existed remotely
    let local_id = store
        .add_group(opsync::model::Group {
            id: 0,
            name: "Linux servers".to_string(),
            description: String::new(),
            monitor_id: None,
            external_id: None,
            enabled: true,
            status: EntityStatus::Active,
            status_reason: None,
            health_score: 100,
            last_sync_at: None,
            external_source: String::new(),
        })
        .await
        .unwrap();

    let result = reconciler.pull_groups(monitor_id).await.unwrap();
    assert_eq!(result.total, 2);
    assert_eq!(result.added, 1); // only "Databases" is new
    assert_eq!(result.updated, 1); // "Linux servers" got linked

    let linked = store.get_group(local_id).await.unwrap();
    assert_eq!(linked.external_id.as_deref(), Some("2"));
    assert_eq!(linked.monitor_id, Some(monitor_id));
    assert!(linked.last_sync_at.is_some());

    let groups = store
        .search_groups(&GroupFilter::for_monitor(monitor_id))
        .await
        .unwrap();
    assert_eq!(groups.len(), 2);
}

#[tokio::test]
async fn pull_items_syncs_and_flags_vanished_items() {
    let server = MockServer::start().await;
    Mock::given(rpc_method("item.get"))
        .respond_with(rpc_result(serde_json::json!([
            remote_item_json("1001", "10084", "CPU load", "0.42"),
            remote_item_json("1002", "10084", "Free memory", "123456"),
        ])))
        .mount(&server)
        .await;

    let (store, reconciler, _events) = test_context();
    let monitor_id = store
        .add_monitor(test_monitor(&server.uri(), Some("cached")))
        .await
        .unwrap();
    let host_id = store
        .add_host(test_host(monitor_id, "web-1", Some("10084")))
        .await
        .unwrap();
    let stale_id = store
        .add_item(test_item(host_id, "Old metric", Some("9999")))
        .await
        .unwrap();

    let result = reconciler.pull_host_items(monitor_id, host_id).await.unwrap();
    assert_eq!(result.added, 2);
    assert_eq!(result.total, 2);

    let items = store.items_for_host(host_id).await.unwrap();
    assert_eq!(items.len(), 3);

    let cpu = items
        .iter()
        .find(|i| i.external_id.as_deref() == Some("1001"))
        .unwrap();
    assert_eq!(cpu.last_value.as_deref(), Some("0.42"));
    assert_eq!(cpu.status, EntityStatus::Active);

    let stale = store.get_item(stale_id).await.unwrap();
    assert_eq!(stale.status, EntityStatus::Error);
    assert_eq!(
        stale.status_reason.unwrap().text,
        "item not found on monitor"
    );
}

#[tokio::test]
async fn pull_items_requires_materialized_host() {
    let (store, reconciler, _events) = test_context();
    let monitor_id = store
        .add_monitor(test_monitor("http://127.0.0.1:1", Some("cached")))
        .await
        .unwrap();
    // no external id: the host has never been pushed or pulled
    let host_id = store
        .add_host(test_host(monitor_id, "local-only", None))
        .await
        .unwrap();

    let err = reconciler
        .pull_host_items(monitor_id, host_id)
        .await
        .unwrap_err();
    assert_matches!(err, SyncError::HostInactive { .. });

    let host = store.get_host(host_id).await.unwrap();
    assert_eq!(host.status, EntityStatus::Error);
}

#[tokio::test]
async fn pull_emits_sync_complete_event() {
    let server = MockServer::start().await;
    Mock::given(rpc_method("host.get"))
        .respond_with(rpc_result(serde_json::json!([
            remote_host_json("10084", "web-1", None),
        ])))
        .mount(&server)
        .await;

    let (store, reconciler, events) = test_context();
    let mut rx = events.subscribe();
    let monitor_id = store
        .add_monitor(test_monitor(&server.uri(), Some("cached")))
        .await
        .unwrap();

    reconciler.pull_hosts(monitor_id).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        opsync::events::OutboundEvent::SyncComplete {
            entity,
            monitor_id: mid,
            result,
            ..
        } => {
            assert_eq!(entity, "hosts");
            assert_eq!(mid, monitor_id);
            assert_eq!(result.added, 1);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn pull_records_history_and_snapshot() {
    let server = MockServer::start().await;
    Mock::given(rpc_method("host.get"))
        .respond_with(rpc_result(serde_json::json!([
            remote_host_json("10084", "web-1", None),
        ])))
        .mount(&server)
        .await;

    let (store, reconciler, _events) = test_context();
    let monitor_id = store
        .add_monitor(test_monitor(&server.uri(), Some("cached")))
        .await
        .unwrap();

    reconciler.pull_hosts(monitor_id).await.unwrap();

    assert_eq!(store.host_history_len().await, 1);
    let snapshots = store.snapshots().await;
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].active_hosts, 1);
}
