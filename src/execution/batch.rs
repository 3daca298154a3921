//! Bounded Batch Execution
//!
//! Runs independent jobs in fixed windows: up to `window` futures are in
//! flight at once, and the next window starts only after every future in
//! the current one has settled. Used for running several workflow runs side
//! by side; steps within one run are never batched.

use std::future::Future;

use futures::future::join_all;
use log::debug;

/// Default number of simultaneously in-flight jobs.
pub const DEFAULT_WINDOW: usize = 3;

/// Maps each item to a future and awaits them window by window.
///
/// Results come back in input order. A window of zero is treated as one.
pub async fn run_in_batches<I, F, Fut>(items: I, window: usize, mut f: F) -> Vec<Fut::Output>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future,
{
    let window = window.max(1);
    let mut results = Vec::new();
    let mut items = items.into_iter().peekable();
    let mut batch_number = 0;

    while items.peek().is_some() {
        let batch: Vec<Fut> = items.by_ref().take(window).map(&mut f).collect();
        batch_number += 1;
        debug!("Starting batch {} with {} job(s)", batch_number, batch.len());

        results.extend(join_all(batch).await);
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_in_input_order() {
        let results = run_in_batches(vec![30u64, 10, 20, 5], 3, |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            ms * 2
        })
        .await;

        assert_eq!(results, vec![60, 20, 40, 10]);
    }

    #[tokio::test]
    async fn test_window_bounds_concurrency() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        run_in_batches(0..7, 3, |_| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_next_window_waits_for_slowest() {
        let log = Arc::new(Mutex::new(Vec::new()));

        run_in_batches(vec![("a", 40u64), ("b", 1), ("c", 1)], 2, |(name, ms)| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(format!("start {}", name));
                tokio::time::sleep(Duration::from_millis(ms)).await;
                log.lock().unwrap().push(format!("end {}", name));
            }
        })
        .await;

        let log = log.lock().unwrap();
        let end_a = log.iter().position(|l| l == "end a").unwrap();
        let start_c = log.iter().position(|l| l == "start c").unwrap();
        assert!(end_a < start_c);
    }

    #[tokio::test]
    async fn test_empty_and_zero_window() {
        let empty: Vec<u8> = run_in_batches(Vec::<u8>::new(), 3, |x| async move { x }).await;
        assert!(empty.is_empty());

        let results = run_in_batches(1..=3, 0, |x| async move { x }).await;
        assert_eq!(results, vec![1, 2, 3]);
    }
}
