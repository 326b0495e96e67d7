//! Periodic task producer
//!
//! Enqueues discovery work (groups + hosts) on the sync interval and metric
//! polling work (items) on the poll interval, for every monitor that is
//! Active or Syncing. The workers do the actual pulling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};
use tracing::{debug, error, instrument, warn};

use crate::config::SyncConfig;
use crate::model::EntityStatus;
use crate::queue::{Task, TaskQueue, TaskType};
use crate::storage::InventoryStore;

#[derive(Debug)]
enum SchedulerCommand {
    /// Enqueue one round of discovery + polling tasks immediately
    ScheduleNow {
        respond_to: tokio::sync::oneshot::Sender<()>,
    },
    Shutdown,
}

pub struct SchedulerActor {
    store: Arc<dyn InventoryStore>,
    queue: Arc<TaskQueue>,
    discovery_interval: Duration,
    poll_interval: Duration,
    command_rx: mpsc::Receiver<SchedulerCommand>,
}

impl SchedulerActor {
    #[instrument(skip(self))]
    async fn run(mut self) {
        debug!("starting scheduler actor");

        // first rounds fire after one full interval; the startup kick is the
        // owner's `schedule_now` call
        let mut discovery_ticker =
            interval_at(Instant::now() + self.discovery_interval, self.discovery_interval);
        let mut poll_ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);

        loop {
            tokio::select! {
                _ = discovery_ticker.tick() => {
                    self.schedule_discovery().await;
                }

                _ = poll_ticker.tick() => {
                    self.schedule_polling().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SchedulerCommand::ScheduleNow { respond_to } => {
                            self.schedule_discovery().await;
                            self.schedule_polling().await;
                            let _ = respond_to.send(());
                        }
                        SchedulerCommand::Shutdown => break,
                    }
                }

                else => break,
            }
        }

        debug!("scheduler actor stopped");
    }

    async fn syncable_monitor_ids(&self) -> Vec<crate::model::Id> {
        match self.store.list_monitors().await {
            Ok(monitors) => monitors
                .into_iter()
                .filter(|m| {
                    matches!(m.status, EntityStatus::Active | EntityStatus::Syncing)
                })
                .map(|m| m.id)
                .collect(),
            Err(e) => {
                error!("failed to load monitors for scheduling: {e}");
                Vec::new()
            }
        }
    }

    async fn schedule_discovery(&self) {
        for monitor_id in self.syncable_monitor_ids().await {
            for task_type in [TaskType::PullGroupsFromMonitor, TaskType::PullHostsFromMonitor] {
                let task = Task::for_monitor(task_type, monitor_id);
                if let Err(e) = self.queue.enqueue(task).await {
                    warn!(monitor_id, %task_type, "failed to enqueue task: {e}");
                }
            }
        }
    }

    async fn schedule_polling(&self) {
        for monitor_id in self.syncable_monitor_ids().await {
            let task = Task::for_monitor(TaskType::PullItemsFromMonitor, monitor_id);
            if let Err(e) = self.queue.enqueue(task).await {
                warn!(monitor_id, "failed to enqueue poll task: {e}");
            }
        }
    }
}

/// Handle for controlling a [`SchedulerActor`]
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Spawn the scheduler with the configured intervals.
    pub fn spawn(config: &SyncConfig, store: Arc<dyn InventoryStore>, queue: Arc<TaskQueue>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let actor = SchedulerActor {
            store,
            queue,
            discovery_interval: Duration::from_secs(config.interval_seconds.max(1)),
            poll_interval: Duration::from_secs(config.poll_interval_seconds.max(1)),
            command_rx: cmd_rx,
        };
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Enqueue one scheduling round immediately (testing and manual kicks).
    pub async fn schedule_now(&self) -> anyhow::Result<()> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SchedulerCommand::ScheduleNow { respond_to: tx })
            .await?;
        rx.await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.sender.send(SchedulerCommand::Shutdown).await?;
        Ok(())
    }
}
