use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Called with the number of finished tasks after each completion
pub type ProgressFn = Arc<dyn Fn(usize) + Send + Sync>;

/// Dispatch one task per segment id on at most `workers` concurrent tasks.
///
/// Tasks write their own results back by id, so completion order does not
/// matter. Once `cancel` fires no new ids are dispatched; tasks already
/// running are still awaited so they can record their outcome. Returns the
/// ids that were never dispatched.
pub async fn run_pool<F, Fut>(
    ids: Vec<usize>,
    workers: usize,
    cancel: &CancellationToken,
    on_done: ProgressFn,
    task: F,
) -> Vec<usize>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();
    let mut finished = 0;
    let mut undispatched = Vec::new();
    let mut pending = ids.into_iter();

    while let Some(id) = pending.next() {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            undispatched.push(id);
            undispatched.extend(pending.by_ref());
            break;
        };

        let fut = task(id);
        tasks.spawn(async move {
            fut.await;
            drop(permit);
        });

        // Reap whatever already finished so progress stays current
        while let Some(joined) = tasks.try_join_next() {
            finished += 1;
            if let Err(e) = joined {
                error!("Segment task failed to complete: {}", e);
            }
            on_done(finished);
        }
    }

    while let Some(joined) = tasks.join_next().await {
        finished += 1;
        if let Err(e) = joined {
            error!("Segment task failed to complete: {}", e);
        }
        on_done(finished);
    }

    if !undispatched.is_empty() {
        debug!("{} segments were not dispatched before cancellation", undispatched.len());
    }
    undispatched
}
