//! Worker pool draining the task queue
//!
//! A fixed set of workers loops on a blocking multi-type dequeue and
//! dispatches each task to the matching reconciler operation. A dequeue
//! timeout just re-loops; a failed task is retried until its budget is
//! exhausted, then dead-lettered exactly once. A worker never exits its
//! loop because of a single task failure.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::events::OutboundEvent;
use crate::queue::{Task, TaskQueue, TaskType};
use crate::sync::{Reconciler, SyncError};

/// How long one dequeue blocks before re-looping
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Backoff after a queue-level error (not a task failure)
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Handle owning the worker tasks
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers draining `queue` into `reconciler`.
    pub fn spawn(count: usize, queue: Arc<TaskQueue>, reconciler: Reconciler) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = (0..count)
            .map(|id| {
                let queue = queue.clone();
                let reconciler = reconciler.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(worker_loop(id, queue, reconciler, shutdown_rx))
            })
            .collect();

        debug!(worker_count = count, "task workers started");
        Self {
            shutdown_tx,
            handles,
        }
    }

    /// Stop all workers and wait for them to finish their current task.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

#[instrument(skip(queue, reconciler, shutdown_rx), fields(worker = id))]
async fn worker_loop(
    id: usize,
    queue: Arc<TaskQueue>,
    reconciler: Reconciler,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!("worker started");

    loop {
        let dequeued = tokio::select! {
            _ = shutdown_rx.changed() => break,
            dequeued = queue.dequeue_any(&TaskType::ALL, DEQUEUE_TIMEOUT) => dequeued,
        };

        let task = match dequeued {
            // timeout: nothing to do, loop again
            Ok(None) => continue,
            Ok(Some(task)) => task,
            Err(e) => {
                error!("failed to dequeue task: {e}");
                tokio::time::sleep(QUEUE_ERROR_BACKOFF).await;
                continue;
            }
        };

        if let Err(e) = dispatch(&reconciler, &task).await {
            warn!(task_id = %task.id, task_type = %task.task_type, "task failed: {e}");
            handle_task_failure(&queue, task).await;
        }
    }

    debug!("worker stopped");
}

/// Route a task to the reconciler operation it names.
async fn dispatch(reconciler: &Reconciler, task: &Task) -> Result<(), DispatchError> {
    let monitor_id = || task.monitor_id().ok_or(DispatchError::MissingParam("monitor_id"));
    let host_id = || task.host_id().ok_or(DispatchError::MissingParam("host_id"));
    let item_id = || task.item_id().ok_or(DispatchError::MissingParam("item_id"));

    match task.task_type {
        TaskType::PullHostsFromMonitor => {
            reconciler.pull_hosts(monitor_id()?).await?;
        }
        TaskType::PullGroupsFromMonitor => {
            reconciler.pull_groups(monitor_id()?).await?;
        }
        TaskType::PullItemsFromMonitor => {
            reconciler.pull_items(monitor_id()?).await?;
        }
        TaskType::PullHostFromMonitor => {
            reconciler.pull_host(monitor_id()?, host_id()?).await?;
        }
        TaskType::PullItemFromMonitor => {
            reconciler
                .pull_item(monitor_id()?, host_id()?, item_id()?)
                .await?;
        }
        TaskType::PushHostToMonitor => {
            reconciler.push_host(monitor_id()?, host_id()?).await?;
        }
        TaskType::PushItemToMonitor => {
            reconciler
                .push_item(monitor_id()?, host_id()?, item_id()?)
                .await?;
        }
        TaskType::GenerateAlerts => {
            // alert generation lives outside the sync core; hand it off
            let count = task.count().unwrap_or(5) as u32;
            reconciler
                .events
                .broadcast(OutboundEvent::AlertsRequested { count });
        }
    }
    Ok(())
}

/// Retry accounting: requeue until the budget is used up, then dead-letter.
async fn handle_task_failure(queue: &TaskQueue, mut task: Task) {
    task.retries += 1;
    if task.retries >= task.max_retry {
        let task_id = task.id.clone();
        let retries = task.retries;
        if let Err(e) = queue.send_to_dead_letter(task, "max retries exceeded").await {
            error!(task_id = %task_id, "failed to dead-letter task: {e}");
            return;
        }
        warn!(task_id = %task_id, retries, "task sent to dead letter");
    } else if let Err(e) = queue.requeue(task).await {
        error!("failed to re-queue task: {e}");
    }
}

#[derive(Debug)]
enum DispatchError {
    MissingParam(&'static str),
    Sync(SyncError),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::MissingParam(name) => write!(f, "invalid task params: missing {name}"),
            DispatchError::Sync(e) => write!(f, "{e}"),
        }
    }
}

impl From<SyncError> for DispatchError {
    fn from(e: SyncError) -> Self {
        DispatchError::Sync(e)
    }
}
