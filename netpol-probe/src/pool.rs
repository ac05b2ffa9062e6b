//! Fixed-size worker pool over bounded channels

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Run `work` over `items` with at most `workers` in flight.
///
/// Results arrive in completion order. Closing the job channel after the last
/// item is what lets the workers drain and exit.
pub async fn run_worker_pool<T, R, F, Fut>(items: Vec<T>, workers: usize, work: F) -> Vec<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let count = items.len();
    if count == 0 {
        return Vec::new();
    }

    let (job_tx, job_rx) = mpsc::channel::<T>(count);
    let (result_tx, mut result_rx) = mpsc::channel::<R>(count);
    let job_rx = Arc::new(Mutex::new(job_rx));
    let work = Arc::new(work);

    let worker_count = workers.clamp(1, count);
    for worker_id in 0..worker_count {
        let job_rx = Arc::clone(&job_rx);
        let result_tx = result_tx.clone();
        let work = Arc::clone(&work);
        tokio::spawn(async move {
            let mut handled = 0usize;
            loop {
                let next = job_rx.lock().await.recv().await;
                let Some(item) = next else { break };
                let result = work(item).await;
                handled += 1;
                if result_tx.send(result).await.is_err() {
                    break;
                }
            }
            debug!("Worker {} finished after {} jobs", worker_id, handled);
        });
    }
    drop(result_tx);

    for item in items {
        if job_tx.send(item).await.is_err() {
            break;
        }
    }
    drop(job_tx);

    let mut results = Vec::with_capacity(count);
    while let Some(result) = result_rx.recv().await {
        results.push(result);
    }
    if results.len() != count {
        warn!("Worker pool returned {} of {} results", results.len(), count);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_items_processed() {
        let mut results = run_worker_pool((0..50).collect(), 4, |n: u32| async move { n * 2 }).await;
        results.sort();
        assert_eq!(results, (0..50).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_empty_input() {
        let results: Vec<u32> = run_worker_pool(Vec::<u32>::new(), 4, |n| async move { n }).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));

        let results = run_worker_pool((0..20).collect(), 3, move |n: u32| {
            let active = Arc::clone(&a);
            let peak = Arc::clone(&p);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                n
            }
        })
        .await;

        assert_eq!(results.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
