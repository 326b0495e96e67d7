//! Periodic status probes
//!
//! Re-authenticates every monitor on the configured interval and refreshes
//! group and site statuses from their member hosts. A failed probe marks the
//! monitor and all of its descendants with the failure reason; a successful
//! one refreshes the cached session token and recomputes the cascade.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::{Instant, interval_at};
use tracing::{debug, error, info, instrument, warn};

use crate::concurrency::run_with_limit;
use crate::config::StatusCheckConfig;
use crate::model::{EntityStatus, GroupFilter, Id, Monitor};
use crate::monitor::{ClientFactory, MonitorClient};
use crate::status::StatusEngine;
use crate::storage::{InventoryStore, StoreResult};
use crate::sync::SyncError;

/// Outcome of one status probe
#[derive(Debug, Clone)]
pub struct StatusCheckResult {
    pub id: Id,
    pub name: String,
    pub status: EntityStatus,
    pub error: Option<String>,
}

/// Probes monitors and refreshes derived statuses
#[derive(Clone)]
pub struct StatusChecker {
    store: Arc<dyn InventoryStore>,
    engine: StatusEngine,
    clients: Arc<dyn ClientFactory>,
    concurrency: usize,
}

impl StatusChecker {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        clients: Arc<dyn ClientFactory>,
        concurrency: usize,
    ) -> Self {
        let engine = StatusEngine::new(store.clone());
        Self {
            store,
            engine,
            clients,
            concurrency,
        }
    }

    /// Probe a single monitor: authenticate, persist the refreshed token and
    /// recompute the cascade; mark everything on failure.
    pub async fn check_monitor(&self, monitor: &Monitor) -> StatusCheckResult {
        let mut result = StatusCheckResult {
            id: monitor.id,
            name: monitor.name.clone(),
            status: monitor.status,
            error: None,
        };

        if !monitor.enabled {
            if let Err(e) = self
                .store
                .update_monitor_status_reason(monitor.id, EntityStatus::Disabled, None)
                .await
            {
                warn!(monitor_id = monitor.id, "failed to persist disabled status: {e}");
            }
            result.status = EntityStatus::Disabled;
            return result;
        }

        let client = match self.clients.client_for(monitor) {
            Ok(client) => client,
            Err(e) => {
                let err = SyncError::Monitor(e);
                let _ = self
                    .engine
                    .set_monitor_related_error(monitor.id, err.as_reason())
                    .await;
                error!(monitor_id = monitor.id, "status check failed to create client: {err}");
                result.status = EntityStatus::Error;
                result.error = Some(err.to_string());
                return result;
            }
        };

        if let Some(token) = &monitor.auth_token {
            client.set_auth_token(token.clone());
        }

        if let Err(e) = client.authenticate().await {
            let err = SyncError::Monitor(e);
            let _ = self
                .engine
                .set_monitor_related_error(monitor.id, err.as_reason())
                .await;
            error!(monitor_id = monitor.id, "status check authentication failed: {err}");
            result.status = EntityStatus::Error;
            result.error = Some(err.to_string());
            return result;
        }

        if let Some(token) = client.auth_token() {
            if let Err(e) = self
                .store
                .update_monitor_auth_token(monitor.id, Some(token))
                .await
            {
                warn!(monitor_id = monitor.id, "failed to persist auth token: {e}");
            }
        }
        if let Err(e) = self
            .store
            .update_monitor_status_reason(monitor.id, EntityStatus::Active, None)
            .await
        {
            warn!(monitor_id = monitor.id, "failed to persist active status: {e}");
        }
        if let Err(e) = self.engine.recompute_monitor_related(monitor.id).await {
            warn!(monitor_id = monitor.id, "status check recompute failed: {e}");
        }

        result.status = EntityStatus::Active;
        result
    }

    /// Probe all monitors with bounded concurrency.
    pub async fn check_all_monitors(&self) -> StoreResult<Vec<StatusCheckResult>> {
        let monitors = self.store.list_monitors().await?;
        let total = monitors.len();

        let results = Arc::new(Mutex::new(Vec::with_capacity(total)));
        let monitors = Arc::new(monitors);
        let checker = self.clone();
        let results_ref = results.clone();

        run_with_limit(total, self.concurrency, move |i| {
            let checker = checker.clone();
            let monitors = monitors.clone();
            let results = results_ref.clone();
            async move {
                let result = checker.check_monitor(&monitors[i]).await;
                results.lock().await.push(result);
            }
        })
        .await;

        let mut results = Arc::try_unwrap(results)
            .map(|m| m.into_inner())
            .unwrap_or_default();
        results.sort_by_key(|r| r.id);
        Ok(results)
    }

    /// Recompute every group's status from its member hosts.
    pub async fn check_all_groups(&self) -> StoreResult<Vec<StatusCheckResult>> {
        let groups = self.store.search_groups(&GroupFilter::default()).await?;
        let mut results = Vec::with_capacity(groups.len());
        for group in groups {
            let mut result = StatusCheckResult {
                id: group.id,
                name: group.name.clone(),
                status: group.status,
                error: None,
            };
            match self.engine.recompute_group(group.id).await {
                Ok(status) => result.status = status,
                Err(e) => {
                    warn!(group_id = group.id, "group status check failed: {e}");
                    result.status = EntityStatus::Error;
                    result.error = Some(e.to_string());
                }
            }
            results.push(result);
        }
        Ok(results)
    }

    /// Recompute every site's status from its member hosts.
    pub async fn check_all_sites(&self) -> StoreResult<Vec<StatusCheckResult>> {
        let sites = self.store.search_sites(&GroupFilter::default()).await?;
        let mut results = Vec::with_capacity(sites.len());
        for site in sites {
            let mut result = StatusCheckResult {
                id: site.id,
                name: site.name.clone(),
                status: site.status,
                error: None,
            };
            match self.engine.recompute_site(site.id).await {
                Ok(status) => result.status = status,
                Err(e) => {
                    warn!(site_id = site.id, "site status check failed: {e}");
                    result.status = EntityStatus::Error;
                    result.error = Some(e.to_string());
                }
            }
            results.push(result);
        }
        Ok(results)
    }

    async fn check_everything(&self) {
        if let Err(e) = self.check_all_monitors().await {
            error!("status check failed to load monitors: {e}");
        }
        if let Err(e) = self.check_all_groups().await {
            error!("status check failed to load groups: {e}");
        }
        if let Err(e) = self.check_all_sites().await {
            error!("status check failed to load sites: {e}");
        }
    }
}

#[derive(Debug)]
enum StatusCheckCommand {
    CheckNow { respond_to: oneshot::Sender<()> },
    Shutdown,
}

struct StatusCheckActor {
    checker: StatusChecker,
    interval_duration: Duration,
    command_rx: mpsc::Receiver<StatusCheckCommand>,
}

impl StatusCheckActor {
    #[instrument(skip(self))]
    async fn run(mut self) {
        debug!("starting status check actor");

        let mut ticker = interval_at(
            Instant::now() + self.interval_duration,
            self.interval_duration,
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.checker.check_everything().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        StatusCheckCommand::CheckNow { respond_to } => {
                            self.checker.check_everything().await;
                            let _ = respond_to.send(());
                        }
                        StatusCheckCommand::Shutdown => break,
                    }
                }

                else => break,
            }
        }

        debug!("status check actor stopped");
    }
}

/// Handle for controlling a status check loop
#[derive(Clone)]
pub struct StatusCheckHandle {
    sender: mpsc::Sender<StatusCheckCommand>,
}

impl StatusCheckHandle {
    /// Spawn the periodic loop. Returns `None` when disabled by
    /// configuration.
    pub fn spawn(config: &StatusCheckConfig, checker: StatusChecker) -> Option<Self> {
        if !config.enabled {
            info!("status checks disabled via configuration");
            return None;
        }

        info!(interval_seconds = config.interval_seconds, "status checks enabled");

        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let actor = StatusCheckActor {
            checker,
            interval_duration: Duration::from_secs(config.interval_seconds.max(1)),
            command_rx: cmd_rx,
        };
        tokio::spawn(actor.run());

        Some(Self { sender: cmd_tx })
    }

    /// Run one full check pass immediately and wait for it.
    pub async fn check_now(&self) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StatusCheckCommand::CheckNow { respond_to: tx })
            .await?;
        rx.await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.sender.send(StatusCheckCommand::Shutdown).await?;
        Ok(())
    }
}
