//! Periodic direct sync over all monitors
//!
//! Pulls groups, hosts and items for every enabled monitor on the configured
//! interval, with at most `sync.concurrency` monitors in flight. Errors per
//! monitor are logged and the pass continues; the next pass corrects.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, interval_at};
use tracing::{debug, error, info, instrument, warn};

use crate::concurrency::run_with_limit;
use crate::config::SyncConfig;
use crate::storage::InventoryStore;
use crate::sync::Reconciler;

#[derive(Debug)]
enum AutoSyncCommand {
    /// Run one full sync pass now
    SyncNow { respond_to: oneshot::Sender<()> },

    /// Change the loop interval
    UpdateInterval { interval_secs: u64 },

    Shutdown,
}

pub struct AutoSyncActor {
    reconciler: Reconciler,
    interval_duration: Duration,
    concurrency: usize,
    command_rx: mpsc::Receiver<AutoSyncCommand>,
}

impl AutoSyncActor {
    #[instrument(skip(self))]
    async fn run(mut self) {
        debug!("starting auto sync actor");

        let mut ticker = interval_at(
            Instant::now() + self.interval_duration,
            self.interval_duration,
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.pull_all_monitors().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        AutoSyncCommand::SyncNow { respond_to } => {
                            self.pull_all_monitors().await;
                            let _ = respond_to.send(());
                        }
                        AutoSyncCommand::UpdateInterval { interval_secs } => {
                            debug!("updating sync interval to {interval_secs}s");
                            self.interval_duration = Duration::from_secs(interval_secs.max(1));
                            ticker = interval_at(
                                Instant::now() + self.interval_duration,
                                self.interval_duration,
                            );
                        }
                        AutoSyncCommand::Shutdown => break,
                    }
                }

                else => break,
            }
        }

        debug!("auto sync actor stopped");
    }

    /// One pass: every enabled monitor, bounded parallelism.
    async fn pull_all_monitors(&self) {
        info!("auto sync started: pulling data from all monitors");

        let monitors = match self.reconciler.store().list_monitors().await {
            Ok(monitors) => monitors,
            Err(e) => {
                error!("auto sync failed to load monitors: {e}");
                return;
            }
        };

        let count = monitors.len();
        let monitors = Arc::new(monitors);
        let reconciler = self.reconciler.clone();

        run_with_limit(count, self.concurrency, move |i| {
            let monitors = monitors.clone();
            let reconciler = reconciler.clone();
            async move {
                let monitor = &monitors[i];
                if !monitor.enabled {
                    debug!(monitor_id = monitor.id, name = %monitor.name, "skipping disabled monitor");
                    return;
                }

                info!(monitor_id = monitor.id, name = %monitor.name, "auto sync syncing monitor");
                if let Err(e) = reconciler.pull_groups(monitor.id).await {
                    warn!(monitor_id = monitor.id, "auto sync groups failed: {e}");
                }
                if let Err(e) = reconciler.pull_hosts_inner(monitor.id, false).await {
                    warn!(monitor_id = monitor.id, "auto sync hosts failed: {e}");
                }
                if let Err(e) = reconciler.pull_items_inner(monitor.id, false).await {
                    warn!(monitor_id = monitor.id, "auto sync items failed: {e}");
                }
            }
        })
        .await;

        info!("auto sync finished: all monitors processed");
    }
}

/// Handle for controlling an [`AutoSyncActor`]
#[derive(Clone)]
pub struct AutoSyncHandle {
    sender: mpsc::Sender<AutoSyncCommand>,
}

impl AutoSyncHandle {
    /// Spawn the auto-sync loop. Returns `None` when disabled by
    /// configuration.
    pub fn spawn(config: &SyncConfig, reconciler: Reconciler) -> Option<Self> {
        if !config.enabled {
            info!("auto sync disabled via configuration");
            return None;
        }

        info!(
            interval_seconds = config.interval_seconds,
            concurrency = config.concurrency,
            "auto sync enabled"
        );

        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let actor = AutoSyncActor {
            reconciler,
            interval_duration: Duration::from_secs(config.interval_seconds.max(1)),
            concurrency: config.concurrency,
            command_rx: cmd_rx,
        };
        tokio::spawn(actor.run());

        Some(Self { sender: cmd_tx })
    }

    /// Run one sync pass immediately and wait for it to finish.
    pub async fn sync_now(&self) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AutoSyncCommand::SyncNow { respond_to: tx })
            .await?;
        rx.await?;
        Ok(())
    }

    pub async fn update_interval(&self, interval_secs: u64) -> anyhow::Result<()> {
        self.sender
            .send(AutoSyncCommand::UpdateInterval { interval_secs })
            .await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.sender.send(AutoSyncCommand::Shutdown).await?;
        Ok(())
    }
}
