use tracing::trace;

/// Periodic pull loop configuration
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Discovery interval (groups + hosts) in seconds
    #[serde(default = "default_sync_interval")]
    pub interval_seconds: u64,

    /// Metric polling interval (items) in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// How many monitors are synced in parallel
    #[serde(default = "default_sync_concurrency")]
    pub concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_sync_interval(),
            poll_interval_seconds: default_poll_interval(),
            concurrency: default_sync_concurrency(),
        }
    }
}

/// Periodic status probe configuration
#[derive(Debug, Clone, serde::Deserialize)]
pub struct StatusCheckConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_status_check_interval")]
    pub interval_seconds: u64,

    #[serde(default = "default_status_check_concurrency")]
    pub concurrency: usize,
}

impl Default for StatusCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_status_check_interval(),
            concurrency: default_status_check_concurrency(),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, serde::Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
        }
    }
}

/// Concurrency cap for group/site detail aggregation
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DetailConfig {
    #[serde(default = "default_detail_concurrency")]
    pub detail_concurrency: usize,
}

impl Default for DetailConfig {
    fn default() -> Self {
        Self {
            detail_concurrency: default_detail_concurrency(),
        }
    }
}

/// Outbound notification throttling windows; zero disables a scope
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub global_interval_seconds: u64,

    #[serde(default)]
    pub media_type_interval_seconds: u64,

    #[serde(default)]
    pub media_interval_seconds: u64,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub status_check: StatusCheckConfig,

    #[serde(default)]
    pub workers: WorkerConfig,

    #[serde(default)]
    pub group: DetailConfig,

    #[serde(default)]
    pub site: DetailConfig,

    #[serde(default)]
    pub media_rate_limit: RateLimitConfig,
}

fn default_true() -> bool {
    true
}

fn default_sync_interval() -> u64 {
    300
}

fn default_poll_interval() -> u64 {
    60
}

fn default_sync_concurrency() -> usize {
    2
}

fn default_status_check_interval() -> u64 {
    300
}

fn default_status_check_concurrency() -> usize {
    4
}

fn default_worker_count() -> usize {
    4
}

fn default_detail_concurrency() -> usize {
    10
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|_| anyhow::anyhow!("Invalid configuration file provided!"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
