use std::sync::Arc;

use clap::Parser;
use opsync::actors::{AutoSyncHandle, SchedulerHandle, StatusCheckHandle, StatusChecker, WorkerPool};
use opsync::config::{Config, read_config_file};
use opsync::events::EventHub;
use opsync::monitor::HttpClientFactory;
use opsync::queue::{MemoryTaskStore, TaskQueue};
use opsync::storage::MemoryStore;
use opsync::sync::Reconciler;
use tracing::{debug, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("opsync", LevelFilter::TRACE),
        ("opsync_hub", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(path) => read_config_file(path)?,
        None => Config::default(),
    };

    let store = Arc::new(MemoryStore::new());
    let clients = Arc::new(HttpClientFactory::default());
    let events = EventHub::default();
    let reconciler = Reconciler::new(store.clone(), clients.clone(), events.clone());

    let task_store = Arc::new(MemoryTaskStore::new());
    let queue = Arc::new(TaskQueue::with_store(task_store).await?);

    let workers = WorkerPool::spawn(config.workers.count, queue.clone(), reconciler.clone());

    let scheduler = SchedulerHandle::spawn(&config.sync, store.clone(), queue.clone());
    scheduler.schedule_now().await?;

    let auto_sync = AutoSyncHandle::spawn(&config.sync, reconciler.clone());

    let checker = StatusChecker::new(store.clone(), clients, config.status_check.concurrency);
    let status_checks = StatusCheckHandle::spawn(&config.status_check, checker);

    // log the sync traffic so a headless hub is observable
    let mut event_rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            debug!("event: {event:?}");
        }
    });

    info!("hub running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    if let Some(status_checks) = status_checks {
        let _ = status_checks.shutdown().await;
    }
    if let Some(auto_sync) = auto_sync {
        let _ = auto_sync.shutdown().await;
    }
    let _ = scheduler.shutdown().await;
    workers.shutdown().await;

    Ok(())
}
