//! Worker pool and queue behavior end to end

use std::sync::Arc;
use std::time::Duration;

use opsync::model::HostFilter;
use opsync::queue::{Task, TaskQueue, TaskType};
use opsync::storage::InventoryStore;
use opsync::actors::WorkerPool;
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::helpers::*;

#[tokio::test]
async fn worker_executes_enqueued_pull_task() {
    let server = MockServer::start().await;
    Mock::given(rpc_method("host.get"))
        .respond_with(rpc_result(serde_json::json!([
            remote_host_json("10084", "web-1", None),
        ])))
        .mount(&server)
        .await;

    let (store, reconciler, _events) = test_context();
    let monitor_id = store
        .add_monitor(test_monitor(&server.uri(), Some("cached")))
        .await
        .unwrap();

    let queue = Arc::new(TaskQueue::new());
    let pool = WorkerPool::spawn(2, queue.clone(), reconciler);

    queue
        .enqueue(Task::for_monitor(TaskType::PullHostsFromMonitor, monitor_id))
        .await
        .unwrap();

    let synced = wait_until(Duration::from_secs(5), || {
        let store = store.clone();
        async move {
            store
                .count_hosts(&HostFilter::for_monitor(monitor_id))
                .await
                .unwrap()
                == 1
        }
    })
    .await;
    assert!(synced, "worker never materialized the pulled host");

    pool.shutdown().await;
}

#[tokio::test]
async fn task_failing_repeatedly_is_dead_lettered_exactly_once() {
    let (store, reconciler, _events) = test_context();
    // connection refused on every call
    let monitor_id = store
        .add_monitor(test_monitor("http://127.0.0.1:1", Some("cached")))
        .await
        .unwrap();

    let queue = Arc::new(TaskQueue::new());
    let pool = WorkerPool::spawn(2, queue.clone(), reconciler);

    let mut task = Task::for_monitor(TaskType::PullHostsFromMonitor, monitor_id);
    task.max_retry = 2;
    let task_id = task.id.clone();
    queue.enqueue(task).await.unwrap();

    let dead = wait_until(Duration::from_secs(5), || {
        let queue = queue.clone();
        async move { !queue.dead_letters().is_empty() }
    })
    .await;
    assert!(dead, "task never reached the dead letter queue");

    // give the pool a chance to misbehave before asserting exactness
    tokio::time::sleep(Duration::from_millis(200)).await;
    let dead = queue.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].task.id, task_id);
    assert_eq!(dead[0].task.retries, 2);
    assert_eq!(dead[0].reason, "max retries exceeded");
    assert_eq!(queue.queue_len(TaskType::PullHostsFromMonitor), 0);

    pool.shutdown().await;
}

#[tokio::test]
async fn task_recovering_within_budget_is_never_dead_lettered() {
    let server = MockServer::start().await;

    // the first two fetches blow up, the third succeeds
    Mock::given(rpc_method("host.get"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(rpc_method("host.get"))
        .respond_with(rpc_result(serde_json::json!([
            remote_host_json("10084", "web-1", None),
        ])))
        .with_priority(5)
        .mount(&server)
        .await;

    let (store, reconciler, _events) = test_context();
    let monitor_id = store
        .add_monitor(test_monitor(&server.uri(), Some("cached")))
        .await
        .unwrap();

    let queue = Arc::new(TaskQueue::new());
    let pool = WorkerPool::spawn(2, queue.clone(), reconciler);

    // budget of three attempts: fail, fail, succeed
    let mut task = Task::for_monitor(TaskType::PullHostsFromMonitor, monitor_id);
    task.max_retry = 3;
    queue.enqueue(task).await.unwrap();

    let synced = wait_until(Duration::from_secs(5), || {
        let store = store.clone();
        async move {
            store
                .count_hosts(&HostFilter::for_monitor(monitor_id))
                .await
                .unwrap()
                == 1
        }
    })
    .await;
    assert!(synced, "task never succeeded after retries");
    assert!(queue.dead_letters().is_empty());

    pool.shutdown().await;
}

#[tokio::test]
async fn workers_survive_poisonous_tasks() {
    let server = MockServer::start().await;
    Mock::given(rpc_method("host.get"))
        .respond_with(rpc_result(serde_json::json!([
            remote_host_json("10084", "web-1", None),
        ])))
        .mount(&server)
        .await;

    let (store, reconciler, _events) = test_context();
    let monitor_id = store
        .add_monitor(test_monitor(&server.uri(), Some("cached")))
        .await
        .unwrap();

    let queue = Arc::new(TaskQueue::new());
    let pool = WorkerPool::spawn(1, queue.clone(), reconciler);

    // a task with no params fails on dispatch every time
    let mut poison = Task::new(TaskType::PullHostsFromMonitor, Default::default());
    poison.max_retry = 1;
    queue.enqueue(poison).await.unwrap();

    // the single worker must still process real work afterwards
    queue
        .enqueue(Task::for_monitor(TaskType::PullHostsFromMonitor, monitor_id))
        .await
        .unwrap();

    let synced = wait_until(Duration::from_secs(5), || {
        let store = store.clone();
        async move {
            store
                .count_hosts(&HostFilter::for_monitor(monitor_id))
                .await
                .unwrap()
                == 1
        }
    })
    .await;
    assert!(synced, "worker died on a poisonous task");
    assert_eq!(queue.dead_letters().len(), 1);

    pool.shutdown().await;
}
