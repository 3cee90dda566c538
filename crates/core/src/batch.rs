//! The Batch Runner (C10): a fixed worker pool draining a bounded job
//! channel, with periodic throughput/ETA progress reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

const PROGRESS_INTERVAL: u64 = 100;

pub struct BatchCounters {
    pub processed: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
}

impl BatchCounters {
    fn new() -> Self {
        Self { processed: AtomicU64::new(0), succeeded: AtomicU64::new(0), failed: AtomicU64::new(0) }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchProgress {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub total: u64,
    pub throughput_per_sec: f64,
    pub eta_seconds: Option<f64>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchSummary {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub elapsed_seconds: f64,
}

/// Run `job` across `items` using `workers` threads, bounded channel depth
/// `2 * workers`, invoking `on_progress` every [`PROGRESS_INTERVAL`] items.
pub fn run_batch<T, F>(items: Vec<T>, workers: usize, job: F, on_progress: impl Fn(BatchProgress) + Send + Sync + 'static) -> BatchSummary
where
    T: Send + 'static,
    F: Fn(T) -> bool + Send + Sync + 'static,
{
    let workers = workers.max(1);
    let total = items.len() as u64;
    let (tx, rx) = mpsc::sync_channel::<T>(2 * workers);
    let rx = Arc::new(std::sync::Mutex::new(rx));
    let counters = Arc::new(BatchCounters::new());
    let job = Arc::new(job);
    let on_progress = Arc::new(on_progress);
    let started = Instant::now();

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let rx = rx.clone();
        let counters = counters.clone();
        let job = job.clone();
        let on_progress = on_progress.clone();
        handles.push(std::thread::spawn(move || loop {
            let item = {
                let locked = rx.lock().unwrap();
                locked.recv()
            };
            let Ok(item) = item else { break };
            let ok = job(item);
            let processed = counters.processed.fetch_add(1, Ordering::Relaxed) + 1;
            if ok {
                counters.succeeded.fetch_add(1, Ordering::Relaxed);
            } else {
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            if processed % PROGRESS_INTERVAL == 0 {
                let elapsed = started.elapsed().as_secs_f64();
                let throughput = if elapsed > 0.0 { processed as f64 / elapsed } else { 0.0 };
                let remaining = total.saturating_sub(processed);
                let eta = if throughput > 0.0 { Some(remaining as f64 / throughput) } else { None };
                on_progress(BatchProgress {
                    processed,
                    succeeded: counters.succeeded.load(Ordering::Relaxed),
                    failed: counters.failed.load(Ordering::Relaxed),
                    total,
                    throughput_per_sec: throughput,
                    eta_seconds: eta,
                });
            }
        }));
    }

    for item in items {
        if tx.send(item).is_err() {
            break;
        }
    }
    drop(tx);

    for h in handles {
        let _ = h.join();
    }

    BatchSummary {
        processed: counters.processed.load(Ordering::Relaxed),
        succeeded: counters.succeeded.load(Ordering::Relaxed),
        failed: counters.failed.load(Ordering::Relaxed),
        elapsed_seconds: started.elapsed().as_secs_f64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn all_items_are_processed_exactly_once() {
        let items: Vec<i32> = (0..250).collect();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let summary = run_batch(
            items,
            4,
            move |n| n % 7 != 0,
            move |_p| {
                let _ = &seen_clone;
            },
        );
        assert_eq!(summary.processed, 250);
        assert_eq!(summary.succeeded + summary.failed, 250);
    }

    #[test]
    fn progress_fires_every_hundred_items() {
        let items: Vec<i32> = (0..305).collect();
        let calls = Arc::new(AtomicU64::new(0));
        let calls_clone = calls.clone();
        let summary = run_batch(items, 2, |_n| true, move |_p| {
            calls_clone.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(summary.processed, 305);
        assert!(calls.load(Ordering::Relaxed) >= 3);
    }
}
