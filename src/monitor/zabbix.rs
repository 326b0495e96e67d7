//! Zabbix-style JSON-RPC client
//!
//! Speaks the `api_jsonrpc.php` dialect: a single POST endpoint, method
//! strings like `host.get`, and a session token obtained via `user.login`
//! and passed in the `auth` field of subsequent calls.
//!
//! The HTTP client is built once and reused across requests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::trace;

use super::{
    MonitorClient, MonitorError, MonitorResult, RemoteHost, RemoteHostGroup, RemoteItem,
};

#[derive(Debug, Deserialize)]
struct RpcError {
    #[allow(dead_code)]
    code: i64,
    message: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct WireInterface {
    #[serde(default)]
    ip: String,
}

#[derive(Debug, Deserialize)]
struct WireGroup {
    groupid: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireHost {
    hostid: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    active_available: String,
    #[serde(default)]
    interfaces: Vec<WireInterface>,
    #[serde(default)]
    groups: Vec<WireGroup>,
    #[serde(default)]
    hostgroups: Vec<WireGroup>,
}

#[derive(Debug, Deserialize)]
struct WireItem {
    itemid: String,
    #[serde(default)]
    hostid: String,
    #[serde(default)]
    name: String,
    #[serde(default, rename = "key_")]
    key: String,
    #[serde(default)]
    lastvalue: String,
    #[serde(default)]
    units: String,
    #[serde(default)]
    value_type: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    lastclock: String,
}

impl WireHost {
    fn into_remote(self) -> RemoteHost {
        let ip = self
            .interfaces
            .first()
            .map(|i| i.ip.clone())
            .unwrap_or_default();

        let status = match self.status.as_str() {
            "0" => "up",
            "1" => "down",
            _ => "unknown",
        };

        let mut metadata = HashMap::new();
        metadata.insert("host".to_string(), self.host);
        metadata.insert("active_available".to_string(), self.active_available);

        // newer backends report "hostgroups", older ones "groups"
        let groups = if self.hostgroups.is_empty() {
            self.groups
        } else {
            self.hostgroups
        };
        if let Some(first) = groups.first() {
            metadata.insert("groupid".to_string(), first.groupid.clone());
            metadata.insert("groupname".to_string(), first.name.clone());
        }

        RemoteHost {
            id: self.hostid,
            name: self.name,
            ip_address: ip,
            description: self.description,
            enabled: status != "down",
            status: status.to_string(),
            metadata,
        }
    }
}

impl WireItem {
    fn into_remote(self) -> RemoteItem {
        let value = match self.lastvalue.as_str() {
            "" => None,
            v => Some(v.to_string()),
        };
        RemoteItem {
            id: self.itemid,
            host_id: self.hostid,
            name: self.name,
            key: self.key,
            value,
            units: self.units,
            value_type: self.value_type,
            enabled: self.status != "1",
            timestamp: self.lastclock.parse().ok().filter(|ts| *ts != 0),
        }
    }
}

fn value_type_code(value_type: &str) -> u8 {
    match value_type {
        "float" => 0,
        "char" => 1,
        "log" => 2,
        "text" => 4,
        _ => 3, // unsigned
    }
}

/// JSON-RPC client for Zabbix-compatible backends
pub struct ZabbixClient {
    url: String,
    username: String,
    password: String,
    token: Mutex<Option<String>>,
    client: reqwest::Client,
    req_id: AtomicU64,
}

impl ZabbixClient {
    pub fn new(
        url: &str,
        username: &str,
        password: &str,
        timeout_secs: u64,
    ) -> MonitorResult<Self> {
        if url.is_empty() {
            return Err(MonitorError::InvalidResponse(
                "monitor URL is required".to_string(),
            ));
        }

        let mut url = url.to_string();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            url = format!("http://{url}");
        }
        let url = url.trim_end_matches('/').to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| MonitorError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            url,
            username: username.to_string(),
            password: password.to_string(),
            token: Mutex::new(None),
            client,
            req_id: AtomicU64::new(0),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api_jsonrpc.php", self.url)
    }

    async fn call(&self, method: &str, params: Value) -> MonitorResult<Value> {
        let id = self.req_id.fetch_add(1, Ordering::Relaxed) + 1;

        let mut body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        if method != "user.login"
            && let Some(token) = self.auth_token()
        {
            body["auth"] = Value::String(token);
        }

        trace!("calling {method} on {}", self.url);

        let response = self.client.post(self.endpoint()).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(MonitorError::ConnectionFailed(format!(
                "HTTP {status} from {url}",
                status = response.status(),
                url = self.url,
            )));
        }

        let rpc: RpcResponse = response
            .json()
            .await
            .map_err(|e| MonitorError::InvalidResponse(e.to_string()))?;

        if let Some(error) = rpc.error {
            let detail = format!("{} - {}", error.message, error.data);
            if method == "user.login"
                || error.data.contains("Not authorized")
                || error.data.contains("Session terminated")
            {
                return Err(MonitorError::AuthenticationFailed(detail));
            }
            return Err(MonitorError::Api(detail));
        }

        rpc.result
            .ok_or_else(|| MonitorError::InvalidResponse("missing result field".to_string()))
    }

    fn parse<T: serde::de::DeserializeOwned>(&self, result: Value) -> MonitorResult<T> {
        serde_json::from_value(result).map_err(|e| MonitorError::InvalidResponse(e.to_string()))
    }

    async fn get_host_with(&self, extra: (&str, Value)) -> MonitorResult<Option<RemoteHost>> {
        let mut params = json!({
            "output": ["hostid", "host", "name", "description", "status", "active_available"],
            "selectInterfaces": ["interfaceid", "ip"],
            "selectHostGroups": "extend",
            "selectGroups": "extend",
        });
        params[extra.0] = extra.1;

        let result = self.call("host.get", params).await?;
        let hosts: Vec<WireHost> = self.parse(result)?;
        Ok(hosts.into_iter().next().map(WireHost::into_remote))
    }
}

#[async_trait]
impl MonitorClient for ZabbixClient {
    async fn authenticate(&self) -> MonitorResult<()> {
        if self.username.is_empty() && self.password.is_empty() {
            return match self.auth_token() {
                Some(_) => Ok(()),
                None => Err(MonitorError::AuthenticationFailed(
                    "no credentials configured".to_string(),
                )),
            };
        }

        let result = self
            .call(
                "user.login",
                json!({
                    "username": self.username,
                    "password": self.password,
                }),
            )
            .await?;

        let token: String = self.parse(result)?;
        self.set_auth_token(token);
        Ok(())
    }

    fn auth_token(&self) -> Option<String> {
        self.token.lock().ok().and_then(|guard| guard.clone())
    }

    fn set_auth_token(&self, token: String) {
        if let Ok(mut guard) = self.token.lock() {
            *guard = Some(token);
        }
    }

    async fn get_hosts(&self) -> MonitorResult<Vec<RemoteHost>> {
        let result = self
            .call(
                "host.get",
                json!({
                    "output": ["hostid", "host", "name", "description", "status", "active_available"],
                    "selectInterfaces": ["interfaceid", "ip"],
                    "selectHostGroups": "extend",
                    "selectGroups": "extend",
                }),
            )
            .await?;

        let hosts: Vec<WireHost> = self.parse(result)?;
        Ok(hosts.into_iter().map(WireHost::into_remote).collect())
    }

    async fn get_host_by_id(&self, id: &str) -> MonitorResult<Option<RemoteHost>> {
        self.get_host_with(("hostids", json!(id))).await
    }

    async fn get_host_by_name(&self, name: &str) -> MonitorResult<Option<RemoteHost>> {
        self.get_host_with(("filter", json!({ "host": [name] }))).await
    }

    async fn create_host(&self, host: &RemoteHost) -> MonitorResult<RemoteHost> {
        let group_id = host
            .metadata
            .get("groupid")
            .cloned()
            .filter(|gid| !gid.is_empty())
            .ok_or_else(|| MonitorError::Api("host group id is required".to_string()))?;

        let result = self
            .call(
                "host.create",
                json!({
                    "host": host.name,
                    "interfaces": [{
                        "type": 1,
                        "main": 1,
                        "useip": 1,
                        "ip": host.ip_address,
                        "dns": "",
                        "port": "10050",
                    }],
                    "groups": [{ "groupid": group_id }],
                }),
            )
            .await?;

        #[derive(Deserialize)]
        struct Created {
            hostids: Vec<String>,
        }
        let created: Created = self.parse(result)?;
        let id = created
            .hostids
            .into_iter()
            .next()
            .ok_or_else(|| MonitorError::InvalidResponse("no host id returned".to_string()))?;

        let mut remote = host.clone();
        remote.id = id;
        Ok(remote)
    }

    async fn update_host(&self, host: &RemoteHost) -> MonitorResult<()> {
        if host.id.is_empty() {
            return Err(MonitorError::Api("host id is required".to_string()));
        }
        let mut params = json!({
            "hostid": host.id,
            "host": host.name,
            "name": host.name,
            "description": host.description,
        });
        if let Some(gid) = host.metadata.get("groupid").filter(|gid| !gid.is_empty()) {
            params["groups"] = json!([{ "groupid": gid }]);
        }
        self.call("host.update", params).await?;
        Ok(())
    }

    async fn get_items(&self, remote_host_id: &str) -> MonitorResult<Vec<RemoteItem>> {
        let result = self
            .call(
                "item.get",
                json!({
                    "output": ["itemid", "hostid", "name", "key_", "lastvalue", "units",
                               "value_type", "status", "lastclock"],
                    "hostids": remote_host_id,
                }),
            )
            .await?;

        let items: Vec<WireItem> = self.parse(result)?;
        Ok(items.into_iter().map(WireItem::into_remote).collect())
    }

    async fn get_item_by_id(&self, id: &str) -> MonitorResult<Option<RemoteItem>> {
        let result = self
            .call(
                "item.get",
                json!({
                    "output": ["itemid", "hostid", "name", "key_", "lastvalue", "units",
                               "value_type", "status", "lastclock"],
                    "itemids": id,
                }),
            )
            .await?;

        let items: Vec<WireItem> = self.parse(result)?;
        Ok(items.into_iter().next().map(WireItem::into_remote))
    }

    async fn create_item(&self, item: &RemoteItem) -> MonitorResult<RemoteItem> {
        if item.host_id.is_empty() {
            return Err(MonitorError::Api("item host id is required".to_string()));
        }

        let result = self
            .call(
                "item.create",
                json!({
                    "hostid": item.host_id,
                    "name": item.name,
                    "key_": item.key,
                    // trapper items accept pushed values without a poller
                    "type": 2,
                    "value_type": value_type_code(&item.value_type),
                    "units": item.units,
                }),
            )
            .await?;

        #[derive(Deserialize)]
        struct Created {
            itemids: Vec<String>,
        }
        let created: Created = self.parse(result)?;
        let id = created
            .itemids
            .into_iter()
            .next()
            .ok_or_else(|| MonitorError::InvalidResponse("no item id returned".to_string()))?;

        let mut remote = item.clone();
        remote.id = id;
        Ok(remote)
    }

    async fn update_item(&self, item: &RemoteItem) -> MonitorResult<()> {
        if item.id.is_empty() {
            return Err(MonitorError::Api("item id is required".to_string()));
        }
        self.call(
            "item.update",
            json!({
                "itemid": item.id,
                "name": item.name,
                "units": item.units,
                "status": if item.enabled { "0" } else { "1" },
            }),
        )
        .await?;
        Ok(())
    }

    async fn get_host_groups(&self) -> MonitorResult<Vec<RemoteHostGroup>> {
        let result = self.call("hostgroup.get", json!({ "output": "extend" })).await?;
        let groups: Vec<WireGroup> = self.parse(result)?;
        Ok(groups
            .into_iter()
            .map(|g| RemoteHostGroup {
                id: g.groupid,
                name: g.name,
            })
            .collect())
    }

    async fn get_host_group_by_name(&self, name: &str) -> MonitorResult<Option<String>> {
        let result = self
            .call(
                "hostgroup.get",
                json!({
                    "output": "extend",
                    "filter": { "name": [name] },
                }),
            )
            .await?;
        let groups: Vec<WireGroup> = self.parse(result)?;
        Ok(groups.into_iter().next().map(|g| g.groupid))
    }

    async fn create_host_group(&self, name: &str) -> MonitorResult<String> {
        if name.is_empty() {
            return Err(MonitorError::Api("host group name is required".to_string()));
        }

        // idempotent: reuse an existing group with the same name
        if let Some(existing) = self.get_host_group_by_name(name).await? {
            return Ok(existing);
        }

        let result = self.call("hostgroup.create", json!({ "name": name })).await?;

        #[derive(Deserialize)]
        struct Created {
            groupids: Vec<String>,
        }
        let created: Created = self.parse(result)?;
        created
            .groupids
            .into_iter()
            .next()
            .ok_or_else(|| MonitorError::InvalidResponse("no group id returned".to_string()))
    }

    async fn update_host_group(&self, id: &str, name: &str) -> MonitorResult<()> {
        self.call(
            "hostgroup.update",
            json!({ "groupid": id, "name": name }),
        )
        .await?;
        Ok(())
    }
}
