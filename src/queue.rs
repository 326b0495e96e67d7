//! Durable typed task queue
//!
//! Multi-queue broker for asynchronous reconciliation work. One queue per
//! task type; [`TaskQueue::dequeue_any`] blocks across all listed types
//! simultaneously so an empty high-priority queue never starves the others.
//! A timeout is a normal outcome (`Ok(None)`), not an error.
//!
//! Durability is delegated to a [`TaskStore`] port: enqueued tasks are
//! written through and pending ones reload on startup. Tasks that exhaust
//! their retry budget move to the dead-letter queue exactly once.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tracing::debug;

use crate::model::Id;
use crate::storage::StoreResult;

/// Default retry budget for new tasks
pub const DEFAULT_MAX_RETRY: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    PullHostsFromMonitor,
    PullGroupsFromMonitor,
    PullItemsFromMonitor,
    PullHostFromMonitor,
    PullItemFromMonitor,
    PushHostToMonitor,
    PushItemToMonitor,
    GenerateAlerts,
}

impl TaskType {
    /// Every known task type, in dispatch order
    pub const ALL: [TaskType; 8] = [
        TaskType::PullHostsFromMonitor,
        TaskType::PullGroupsFromMonitor,
        TaskType::PullItemsFromMonitor,
        TaskType::PullHostFromMonitor,
        TaskType::PullItemFromMonitor,
        TaskType::PushHostToMonitor,
        TaskType::PushItemToMonitor,
        TaskType::GenerateAlerts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::PullHostsFromMonitor => "pull_hosts",
            TaskType::PullGroupsFromMonitor => "pull_groups",
            TaskType::PullItemsFromMonitor => "pull_items",
            TaskType::PullHostFromMonitor => "pull_host",
            TaskType::PullItemFromMonitor => "pull_item",
            TaskType::PushHostToMonitor => "push_host",
            TaskType::PushItemToMonitor => "push_item",
            TaskType::GenerateAlerts => "generate_alerts",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A queued unit of reconciliation work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub params: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub retries: u32,
    pub max_retry: u32,
}

impl Task {
    pub fn new(task_type: TaskType, params: HashMap<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("{}:{}", task_type, now.timestamp_nanos_opt().unwrap_or_default()),
            task_type,
            params,
            created_at: now,
            retries: 0,
            max_retry: DEFAULT_MAX_RETRY,
        }
    }

    /// Convenience constructor for the common monitor-scoped tasks
    pub fn for_monitor(task_type: TaskType, monitor_id: Id) -> Self {
        Self::new(
            task_type,
            HashMap::from([("monitor_id".to_string(), Value::from(monitor_id))]),
        )
    }

    fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(Value::as_u64)
    }

    pub fn monitor_id(&self) -> Option<Id> {
        self.param_u64("monitor_id")
    }

    pub fn host_id(&self) -> Option<Id> {
        self.param_u64("host_id")
    }

    pub fn item_id(&self) -> Option<Id> {
        self.param_u64("item_id")
    }

    pub fn count(&self) -> Option<u64> {
        self.param_u64("count")
    }
}

/// A task that exhausted its retry budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub task: Task,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Durability port for the queue; pending tasks survive a restart of the
/// broker's owner when backed by real persistence.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn save_task(&self, task: &Task) -> StoreResult<()>;
    async fn remove_task(&self, id: &str) -> StoreResult<()>;
    async fn pending_tasks(&self) -> StoreResult<Vec<Task>>;
    async fn save_dead_letter(&self, entry: &DeadLetter) -> StoreResult<()>;
    async fn dead_letters(&self) -> StoreResult<Vec<DeadLetter>>;
}

/// In-memory task store (tests and single-process deployments)
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<String, Task>>,
    dead: Mutex<Vec<DeadLetter>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn save_task(&self, task: &Task) -> StoreResult<()> {
        lock_or_recover(&self.tasks).insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn remove_task(&self, id: &str) -> StoreResult<()> {
        lock_or_recover(&self.tasks).remove(id);
        Ok(())
    }

    async fn pending_tasks(&self) -> StoreResult<Vec<Task>> {
        let mut tasks: Vec<Task> = lock_or_recover(&self.tasks).values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn save_dead_letter(&self, entry: &DeadLetter) -> StoreResult<()> {
        lock_or_recover(&self.dead).push(entry.clone());
        Ok(())
    }

    async fn dead_letters(&self) -> StoreResult<Vec<DeadLetter>> {
        Ok(lock_or_recover(&self.dead).clone())
    }
}

/// Typed multi-queue broker
pub struct TaskQueue {
    queues: Mutex<HashMap<TaskType, VecDeque<Task>>>,
    notify: Notify,
    store: Option<std::sync::Arc<dyn TaskStore>>,
    dead: Mutex<Vec<DeadLetter>>,
}

impl TaskQueue {
    /// Broker without write-through persistence
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            store: None,
            dead: Mutex::new(Vec::new()),
        }
    }

    /// Broker with write-through persistence; pending tasks are reloaded
    /// from the store.
    pub async fn with_store(store: std::sync::Arc<dyn TaskStore>) -> StoreResult<Self> {
        let queue = Self {
            queues: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            store: Some(store.clone()),
            dead: Mutex::new(Vec::new()),
        };

        let pending = store.pending_tasks().await?;
        if !pending.is_empty() {
            debug!("reloading {} pending tasks", pending.len());
        }
        {
            let mut queues = lock_or_recover(&queue.queues);
            for task in pending {
                queues.entry(task.task_type).or_default().push_back(task);
            }
        }
        Ok(queue)
    }

    /// Add a task to its queue; returns the task id.
    pub async fn enqueue(&self, task: Task) -> StoreResult<String> {
        if let Some(store) = &self.store {
            store.save_task(&task).await?;
        }
        let id = task.id.clone();
        {
            let mut queues = lock_or_recover(&self.queues);
            queues.entry(task.task_type).or_default().push_back(task);
        }
        self.notify.notify_one();
        Ok(id)
    }

    /// Put a task back at the end of its queue (retry path).
    pub async fn requeue(&self, task: Task) -> StoreResult<()> {
        if let Some(store) = &self.store {
            store.save_task(&task).await?;
        }
        {
            let mut queues = lock_or_recover(&self.queues);
            queues.entry(task.task_type).or_default().push_back(task);
        }
        self.notify.notify_one();
        Ok(())
    }

    fn try_pop(&self, types: &[TaskType]) -> Option<Task> {
        let mut queues = lock_or_recover(&self.queues);
        let mut popped = None;
        for task_type in types {
            if let Some(queue) = queues.get_mut(task_type)
                && let Some(task) = queue.pop_front()
            {
                popped = Some(task);
                break;
            }
        }
        if popped.is_some() && queues.values().any(|q| !q.is_empty()) {
            // more work is waiting; wake another consumer
            self.notify.notify_one();
        }
        popped
    }

    /// Take the next task of any of the listed types, waiting up to
    /// `timeout`. Returns `Ok(None)` on timeout.
    pub async fn dequeue_any(
        &self,
        types: &[TaskType],
        timeout: Duration,
    ) -> StoreResult<Option<Task>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register interest before checking so a concurrent enqueue
            // cannot slip between the check and the wait
            notified.as_mut().enable();

            if let Some(task) = self.try_pop(types) {
                if let Some(store) = &self.store {
                    store.remove_task(&task.id).await?;
                }
                return Ok(Some(task));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    /// Move a task to the dead-letter queue.
    pub async fn send_to_dead_letter(&self, task: Task, reason: &str) -> StoreResult<()> {
        let entry = DeadLetter {
            task,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        };
        if let Some(store) = &self.store {
            store.save_dead_letter(&entry).await?;
            store.remove_task(&entry.task.id).await?;
        }
        lock_or_recover(&self.dead).push(entry);
        Ok(())
    }

    pub fn queue_len(&self, task_type: TaskType) -> usize {
        lock_or_recover(&self.queues)
            .get(&task_type)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Queue lengths per task type
    pub fn stats(&self) -> HashMap<TaskType, usize> {
        lock_or_recover(&self.queues)
            .iter()
            .map(|(task_type, queue)| (*task_type, queue.len()))
            .collect()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        lock_or_recover(&self.dead).clone()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn enqueue_then_dequeue_round_trips() {
        let queue = TaskQueue::new();
        let task = Task::for_monitor(TaskType::PullHostsFromMonitor, 7);
        let id = queue.enqueue(task).await.unwrap();

        let got = queue
            .dequeue_any(&TaskType::ALL, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.id, id);
        assert_eq!(got.monitor_id(), Some(7));
        assert_eq!(got.max_retry, DEFAULT_MAX_RETRY);
    }

    #[tokio::test]
    async fn dequeue_timeout_is_none_not_error() {
        let queue = TaskQueue::new();
        let started = Instant::now();
        let got = queue
            .dequeue_any(&TaskType::ALL, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(got.is_none());
        assert!(started.elapsed() >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn dequeue_any_sees_every_listed_queue() {
        let queue = TaskQueue::new();
        queue
            .enqueue(Task::for_monitor(TaskType::PullItemsFromMonitor, 1))
            .await
            .unwrap();

        // the first listed queue is empty; the task must still be found
        let got = queue
            .dequeue_any(
                &[TaskType::PullHostsFromMonitor, TaskType::PullItemsFromMonitor],
                Duration::from_millis(100),
            )
            .await
            .unwrap();
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn dequeue_only_returns_requested_types() {
        let queue = TaskQueue::new();
        queue
            .enqueue(Task::for_monitor(TaskType::PullItemsFromMonitor, 1))
            .await
            .unwrap();

        let got = queue
            .dequeue_any(&[TaskType::PullHostsFromMonitor], Duration::from_millis(50))
            .await
            .unwrap();
        assert!(got.is_none());
        assert_eq!(queue.queue_len(TaskType::PullItemsFromMonitor), 1);
    }

    #[tokio::test]
    async fn blocked_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(TaskQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .dequeue_any(&TaskType::ALL, Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue
            .enqueue(Task::for_monitor(TaskType::PullHostsFromMonitor, 1))
            .await
            .unwrap();

        let got = waiter.await.unwrap();
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn dead_letter_records_reason() {
        let queue = TaskQueue::new();
        let mut task = Task::for_monitor(TaskType::PullHostsFromMonitor, 1);
        task.retries = task.max_retry;
        queue
            .send_to_dead_letter(task.clone(), "max retries exceeded")
            .await
            .unwrap();

        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].task.id, task.id);
        assert_eq!(dead[0].reason, "max retries exceeded");
    }

    #[tokio::test]
    async fn store_backed_queue_reloads_pending_tasks() {
        let store = Arc::new(MemoryTaskStore::new());
        {
            let queue = TaskQueue::with_store(store.clone()).await.unwrap();
            queue
                .enqueue(Task::for_monitor(TaskType::PullHostsFromMonitor, 7))
                .await
                .unwrap();
            // dropped without dequeueing: the task stays in the store
        }

        let revived = TaskQueue::with_store(store.clone()).await.unwrap();
        let got = revived
            .dequeue_any(&TaskType::ALL, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.monitor_id(), Some(7));

        // dequeued tasks leave the store
        assert!(store.pending_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn task_serializes_with_snake_case_type() {
        let task = Task::for_monitor(TaskType::PullHostsFromMonitor, 7);
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["type"], "pull_hosts");
        assert_eq!(value["params"]["monitor_id"], 7);
    }
}
