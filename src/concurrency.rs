//! Bounded fan-out helper
//!
//! Caps the number of in-flight operations against a remote API. The
//! semaphore bounds admission; the join set is the fan-in barrier.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

/// Run `f(0..total)` with at most `limit` invocations executing
/// concurrently, returning once all of them have completed.
///
/// A `limit` of zero is treated as one.
pub async fn run_with_limit<F, Fut>(total: usize, limit: usize, f: F)
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    if total == 0 {
        return;
    }
    let limit = limit.max(1).min(total);

    let semaphore = Arc::new(Semaphore::new(limit));
    let mut tasks = JoinSet::new();

    for index in 0..total {
        // closed only if the semaphore is dropped, which it is not
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let fut = f(index);
        tasks.spawn(async move {
            let _permit = permit;
            fut.await;
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!("bounded task panicked: {e}");
        }
    }
}
