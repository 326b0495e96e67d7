//! Helper functions for integration tests

use std::sync::Arc;

use opsync::events::EventHub;
use opsync::model::{EntityStatus, Host, Item, Monitor, ProtocolKind};
use opsync::monitor::HttpClientFactory;
use opsync::storage::MemoryStore;
use opsync::sync::Reconciler;
use wiremock::matchers::body_partial_json;
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn test_monitor(url: &str, token: Option<&str>) -> Monitor {
    Monitor {
        id: 0,
        name: "zabbix-lab".to_string(),
        url: url.to_string(),
        username: "ops".to_string(),
        password: "secret".to_string(),
        auth_token: token.map(String::from),
        event_token: "evt-lab".to_string(),
        description: String::new(),
        protocol: ProtocolKind::Zabbix,
        enabled: true,
        status: EntityStatus::Active,
        status_reason: None,
        health_score: 100,
    }
}

pub fn test_host(monitor_id: u64, name: &str, external_id: Option<&str>) -> Host {
    Host {
        id: 0,
        name: name.to_string(),
        external_id: external_id.map(String::from),
        monitor_id,
        group_id: None,
        site_id: None,
        description: String::new(),
        enabled: true,
        status: EntityStatus::Active,
        status_reason: None,
        ip_addr: "10.0.0.10".to_string(),
        health_score: 100,
        last_sync_at: None,
        external_source: String::new(),
    }
}

pub fn test_item(host_id: u64, name: &str, external_id: Option<&str>) -> Item {
    Item {
        id: 0,
        name: name.to_string(),
        host_id,
        external_id: external_id.map(String::from),
        external_host_id: None,
        value_type: "float".to_string(),
        last_value: Some("1".to_string()),
        units: String::new(),
        enabled: true,
        status: EntityStatus::Active,
        status_reason: None,
    }
}

/// Store + reconciler wired against the default HTTP client factory
pub fn test_context() -> (Arc<MemoryStore>, Reconciler, EventHub) {
    let store = Arc::new(MemoryStore::new());
    let events = EventHub::default();
    let reconciler = Reconciler::new(
        store.clone(),
        Arc::new(HttpClientFactory::default()),
        events.clone(),
    );
    (store, reconciler, events)
}

pub fn rpc_result(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": 1,
    }))
}

pub fn rpc_error(message: &str, data: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "jsonrpc": "2.0",
        "error": { "code": -32602, "message": message, "data": data },
        "id": 1,
    }))
}

/// Match a JSON-RPC call by method name
pub fn rpc_method(method: &str) -> impl wiremock::Match {
    body_partial_json(serde_json::json!({ "method": method }))
}

pub async fn mount_login(server: &MockServer, token: &str) {
    Mock::given(rpc_method("user.login"))
        .respond_with(rpc_result(serde_json::json!(token)))
        .mount(server)
        .await;
}

pub fn remote_host_json(id: &str, name: &str, group: Option<(&str, &str)>) -> serde_json::Value {
    let mut host = serde_json::json!({
        "hostid": id,
        "host": name,
        "name": name,
        "description": "",
        "status": "0",
        "active_available": "1",
        "interfaces": [{ "interfaceid": "1", "ip": "192.168.1.10" }],
    });
    if let Some((gid, gname)) = group {
        host["groups"] = serde_json::json!([{ "groupid": gid, "name": gname }]);
    }
    host
}

pub fn remote_item_json(id: &str, host_id: &str, name: &str, value: &str) -> serde_json::Value {
    serde_json::json!({
        "itemid": id,
        "hostid": host_id,
        "name": name,
        "key_": name,
        "lastvalue": value,
        "units": "",
        "value_type": "0",
        "status": "0",
        "lastclock": "1700000000",
    })
}

/// Poll an async predicate until it holds or the timeout elapses.
pub async fn wait_until<F, Fut>(timeout: std::time::Duration, mut predicate: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
}
