//! Push reconciliation against a mocked backend

use assert_matches::assert_matches;
use opsync::model::{EntityStatus, ReasonCode};
use opsync::storage::InventoryStore;
use opsync::sync::SyncError;
use pretty_assertions::assert_eq;
use wiremock::{Mock, MockServer};

use super::helpers::*;

#[tokio::test]
async fn push_host_without_group_creates_default_group_first() {
    let server = MockServer::start().await;

    // no remote group named Default yet, no remote host with that name
    Mock::given(rpc_method("hostgroup.get"))
        .respond_with(rpc_result(serde_json::json!([])))
        .mount(&server)
        .await;
    Mock::given(rpc_method("hostgroup.create"))
        .respond_with(rpc_result(serde_json::json!({ "groupids": ["7"] })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(rpc_method("host.get"))
        .respond_with(rpc_result(serde_json::json!([])))
        .mount(&server)
        .await;
    Mock::given(rpc_method("host.create"))
        .and(wiremock::matchers::body_partial_json(serde_json::json!({
            "params": { "groups": [{ "groupid": "7" }] }
        })))
        .respond_with(rpc_result(serde_json::json!({ "hostids": ["10500"] })))
        .expect(1)
        .mount(&server)
        .await;

    let (store, reconciler, _events) = test_context();
    let monitor_id = store
        .add_monitor(test_monitor(&server.uri(), Some("cached")))
        .await
        .unwrap();
    let host_id = store
        .add_host(test_host(monitor_id, "web-42", None))
        .await
        .unwrap();

    let result = reconciler.push_host(monitor_id, host_id).await.unwrap();
    assert_eq!(result.added, 1);
    assert_eq!(result.total, 1);

    // the returned external id is persisted
    let host = store.get_host(host_id).await.unwrap();
    assert_eq!(host.external_id.as_deref(), Some("10500"));
    assert_eq!(host.status, EntityStatus::Active);
}

#[tokio::test]
async fn push_host_links_remote_host_with_same_name() {
    let server = MockServer::start().await;

    Mock::given(rpc_method("hostgroup.get"))
        .respond_with(rpc_result(serde_json::json!([
            { "groupid": "7", "name": "Default" }
        ])))
        .mount(&server)
        .await;
    Mock::given(rpc_method("host.get"))
        .respond_with(rpc_result(serde_json::json!([
            remote_host_json("10600", "web-42", None),
        ])))
        .mount(&server)
        .await;
    Mock::given(rpc_method("host.update"))
        .respond_with(rpc_result(serde_json::json!({ "hostids": ["10600"] })))
        .expect(1)
        .mount(&server)
        .await;

    let (store, reconciler, _events) = test_context();
    let monitor_id = store
        .add_monitor(test_monitor(&server.uri(), Some("cached")))
        .await
        .unwrap();
    let host_id = store
        .add_host(test_host(monitor_id, "web-42", None))
        .await
        .unwrap();

    let result = reconciler.push_host(monitor_id, host_id).await.unwrap();
    assert_eq!(result.updated, 1);
    assert_eq!(
        store.get_host(host_id).await.unwrap().external_id.as_deref(),
        Some("10600")
    );
}

#[tokio::test]
async fn push_hosts_partial_failure_keeps_going() {
    let server = MockServer::start().await;

    Mock::given(rpc_method("hostgroup.get"))
        .respond_with(rpc_result(serde_json::json!([
            { "groupid": "7", "name": "Default" }
        ])))
        .mount(&server)
        .await;
    Mock::given(rpc_method("host.get"))
        .respond_with(rpc_result(serde_json::json!([])))
        .mount(&server)
        .await;

    // one specific host fails remotely, the others are created fine
    Mock::given(rpc_method("host.create"))
        .and(wiremock::matchers::body_partial_json(serde_json::json!({
            "params": { "host": "bad-host" }
        })))
        .respond_with(rpc_error("Invalid params.", "Host name already in use."))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(rpc_method("host.create"))
        .respond_with(rpc_result(serde_json::json!({ "hostids": ["10700"] })))
        .with_priority(5)
        .mount(&server)
        .await;

    let (store, reconciler, _events) = test_context();
    let monitor_id = store
        .add_monitor(test_monitor(&server.uri(), Some("cached")))
        .await
        .unwrap();
    let good_a = store
        .add_host(test_host(monitor_id, "good-a", None))
        .await
        .unwrap();
    let bad = store
        .add_host(test_host(monitor_id, "bad-host", None))
        .await
        .unwrap();
    let good_b = store
        .add_host(test_host(monitor_id, "good-b", None))
        .await
        .unwrap();

    let result = reconciler.push_hosts(monitor_id).await.unwrap();
    assert_eq!(result.added, 2);
    assert_eq!(result.failed, 1);
    assert_eq!(result.total, 3);

    // the successes are persisted despite the failure in between
    assert!(store.get_host(good_a).await.unwrap().external_id.is_some());
    assert!(store.get_host(good_b).await.unwrap().external_id.is_some());

    let failed = store.get_host(bad).await.unwrap();
    assert_eq!(failed.external_id, None);
    assert_eq!(failed.status, EntityStatus::Error);
    assert_eq!(failed.status_reason.unwrap().code, ReasonCode::PushFailed);
}

#[tokio::test]
async fn push_host_to_error_monitor_is_rejected() {
    let (store, reconciler, _events) = test_context();
    let mut monitor = test_monitor("http://127.0.0.1:1", Some("cached"));
    monitor.status = EntityStatus::Error;
    let monitor_id = store.add_monitor(monitor).await.unwrap();
    let host_id = store
        .add_host(test_host(monitor_id, "web-1", None))
        .await
        .unwrap();

    let err = reconciler.push_host(monitor_id, host_id).await.unwrap_err();
    assert_matches!(err, SyncError::MonitorInactive { .. });

    let host = store.get_host(host_id).await.unwrap();
    assert_eq!(host.status, EntityStatus::Error);
}

#[tokio::test]
async fn push_host_ownership_mismatch_is_rejected() {
    let (store, reconciler, _events) = test_context();
    let owner = store
        .add_monitor(test_monitor("http://127.0.0.1:1", Some("cached")))
        .await
        .unwrap();
    let other = store
        .add_monitor(test_monitor("http://127.0.0.1:1", Some("cached")))
        .await
        .unwrap();
    let host_id = store
        .add_host(test_host(owner, "web-1", None))
        .await
        .unwrap();

    let err = reconciler.push_host(other, host_id).await.unwrap_err();
    assert_matches!(err, SyncError::OwnershipMismatch(_));

    let host = store.get_host(host_id).await.unwrap();
    assert_eq!(
        host.status_reason.unwrap().code,
        ReasonCode::OwnershipMismatch
    );
}

#[tokio::test]
async fn push_item_materializes_host_first() {
    let server = MockServer::start().await;

    Mock::given(rpc_method("hostgroup.get"))
        .respond_with(rpc_result(serde_json::json!([])))
        .mount(&server)
        .await;
    Mock::given(rpc_method("hostgroup.create"))
        .respond_with(rpc_result(serde_json::json!({ "groupids": ["7"] })))
        .mount(&server)
        .await;
    Mock::given(rpc_method("host.get"))
        .respond_with(rpc_result(serde_json::json!([])))
        .mount(&server)
        .await;
    Mock::given(rpc_method("host.create"))
        .respond_with(rpc_result(serde_json::json!({ "hostids": ["10500"] })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(rpc_method("item.create"))
        .and(wiremock::matchers::body_partial_json(serde_json::json!({
            "params": { "hostid": "10500" }
        })))
        .respond_with(rpc_result(serde_json::json!({ "itemids": ["2001"] })))
        .expect(1)
        .mount(&server)
        .await;

    let (store, reconciler, _events) = test_context();
    let monitor_id = store
        .add_monitor(test_monitor(&server.uri(), Some("cached")))
        .await
        .unwrap();
    let host_id = store
        .add_host(test_host(monitor_id, "web-42", None))
        .await
        .unwrap();
    let item_id = store
        .add_item(test_item(host_id, "cpu load", None))
        .await
        .unwrap();

    let result = reconciler
        .push_item(monitor_id, host_id, item_id)
        .await
        .unwrap();
    assert_eq!(result.added, 1);

    let host = store.get_host(host_id).await.unwrap();
    assert_eq!(host.external_id.as_deref(), Some("10500"));

    let item = store.get_item(item_id).await.unwrap();
    assert_eq!(item.external_id.as_deref(), Some("2001"));
    assert_eq!(item.external_host_id.as_deref(), Some("10500"));
}

#[tokio::test]
async fn push_group_creates_remote_group_and_links_it() {
    let server = MockServer::start().await;
    Mock::given(rpc_method("hostgroup.get"))
        .respond_with(rpc_result(serde_json::json!([])))
        .mount(&server)
        .await;
    Mock::given(rpc_method("hostgroup.create"))
        .respond_with(rpc_result(serde_json::json!({ "groupids": ["31"] })))
        .expect(1)
        .mount(&server)
        .await;

    let (store, reconciler, _events) = test_context();
    let monitor_id = store
        .add_monitor(test_monitor(&server.uri(), Some("cached")))
        .await
        .unwrap();
    let group_id = store
        .add_group(opsync::model::Group {
            id: 0,
            name: "Edge".to_string(),
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

    let result = reconciler.push_group(monitor_id, group_id).await.unwrap();
    assert_eq!(result.added, 1);

    let group = store.get_group(group_id).await.unwrap();
    assert_eq!(group.external_id.as_deref(), Some("31"));
    assert_eq!(group.monitor_id, Some(monitor_id));
}
