//! External monitor adapter
//!
//! Unified contract for talking to a remote monitoring backend. The
//! reconcilers only ever see the [`MonitorClient`] trait; the concrete wire
//! protocol lives behind it (currently the Zabbix-style JSON-RPC client in
//! [`zabbix`]).
//!
//! Clients are cheap to construct and created per reconciliation run from a
//! [`ClientFactory`], which is the seam the tests use to point operations at
//! a mock server.

pub mod zabbix;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use crate::model::{Monitor, ProtocolKind};

/// Host record as reported by the remote backend
#[derive(Debug, Clone, Default)]
pub struct RemoteHost {
    pub id: String,
    pub name: String,
    pub ip_address: String,
    pub description: String,
    pub enabled: bool,
    /// Raw availability as reported remotely ("up", "down", "unknown")
    pub status: String,
    pub metadata: HashMap<String, String>,
}

/// Metric record as reported by the remote backend
#[derive(Debug, Clone, Default)]
pub struct RemoteItem {
    pub id: String,
    pub host_id: String,
    pub name: String,
    pub key: String,
    pub value: Option<String>,
    pub units: String,
    pub value_type: String,
    pub enabled: bool,
    pub timestamp: Option<i64>,
}

/// Host group record as reported by the remote backend
#[derive(Debug, Clone)]
pub struct RemoteHostGroup {
    pub id: String,
    pub name: String,
}

/// Result type alias for adapter operations
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Errors surfaced by the remote backend or the transport
#[derive(Debug, Clone)]
pub enum MonitorError {
    /// Credentials rejected or no session could be established
    AuthenticationFailed(String),

    /// The backend could not be reached
    ConnectionFailed(String),

    /// The call exceeded its deadline
    Timeout,

    /// The requested remote record does not exist
    NotFound(String),

    /// The backend answered with an API-level error
    Api(String),

    /// The backend answered with something we could not decode
    InvalidResponse(String),

    /// No client implementation for the monitor's protocol
    UnsupportedProtocol(ProtocolKind),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::AuthenticationFailed(msg) => {
                write!(f, "authentication failed: {msg}")
            }
            MonitorError::ConnectionFailed(msg) => write!(f, "connection failed: {msg}"),
            MonitorError::Timeout => write!(f, "request timed out"),
            MonitorError::NotFound(what) => write!(f, "{what} not found on monitor"),
            MonitorError::Api(msg) => write!(f, "monitor API error: {msg}"),
            MonitorError::InvalidResponse(msg) => write!(f, "invalid monitor response: {msg}"),
            MonitorError::UnsupportedProtocol(kind) => {
                write!(f, "unsupported monitor protocol: {kind}")
            }
        }
    }
}

impl std::error::Error for MonitorError {}

impl From<reqwest::Error> for MonitorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            MonitorError::Timeout
        } else if err.is_connect() {
            MonitorError::ConnectionFailed(err.to_string())
        } else if err.is_decode() {
            MonitorError::InvalidResponse(err.to_string())
        } else {
            MonitorError::ConnectionFailed(err.to_string())
        }
    }
}

/// Contract against a remote monitoring backend
///
/// All calls may fail with connection/auth/timeout errors. Implementations
/// cache the session token internally so a client can be handed a
/// pre-authenticated session via [`MonitorClient::set_auth_token`].
#[async_trait]
pub trait MonitorClient: Send + Sync {
    /// Establish a session with the backend
    async fn authenticate(&self) -> MonitorResult<()>;

    /// Currently cached session token, if any
    fn auth_token(&self) -> Option<String>;

    /// Seed the client with an existing session token
    fn set_auth_token(&self, token: String);

    async fn get_hosts(&self) -> MonitorResult<Vec<RemoteHost>>;
    async fn get_host_by_id(&self, id: &str) -> MonitorResult<Option<RemoteHost>>;
    async fn get_host_by_name(&self, name: &str) -> MonitorResult<Option<RemoteHost>>;

    /// Create a host remotely; returns the record with its new id
    async fn create_host(&self, host: &RemoteHost) -> MonitorResult<RemoteHost>;
    async fn update_host(&self, host: &RemoteHost) -> MonitorResult<()>;

    /// Fetch all items attached to a remote host
    async fn get_items(&self, remote_host_id: &str) -> MonitorResult<Vec<RemoteItem>>;
    async fn get_item_by_id(&self, id: &str) -> MonitorResult<Option<RemoteItem>>;

    /// Create an item remotely; returns the record with its new id
    async fn create_item(&self, item: &RemoteItem) -> MonitorResult<RemoteItem>;
    async fn update_item(&self, item: &RemoteItem) -> MonitorResult<()>;

    async fn get_host_groups(&self) -> MonitorResult<Vec<RemoteHostGroup>>;
    async fn get_host_group_by_name(&self, name: &str) -> MonitorResult<Option<String>>;

    /// Create a host group remotely; returns its external id
    async fn create_host_group(&self, name: &str) -> MonitorResult<String>;
    async fn update_host_group(&self, id: &str, name: &str) -> MonitorResult<()>;
}

/// Builds a client for a monitor registration
pub trait ClientFactory: Send + Sync {
    fn client_for(&self, monitor: &Monitor) -> MonitorResult<Box<dyn MonitorClient>>;
}

/// Default factory creating HTTP clients by protocol
pub struct HttpClientFactory {
    timeout_secs: u64,
}

impl HttpClientFactory {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self::new(30)
    }
}

impl ClientFactory for HttpClientFactory {
    fn client_for(&self, monitor: &Monitor) -> MonitorResult<Box<dyn MonitorClient>> {
        match monitor.protocol {
            ProtocolKind::Zabbix => Ok(Box::new(zabbix::ZabbixClient::new(
                &monitor.url,
                &monitor.username,
                &monitor.password,
                self.timeout_secs,
            )?)),
            other => Err(MonitorError::UnsupportedProtocol(other)),
        }
    }
}
