//! Fixed-size worker pools for bulk document work.
//!
//! Read-only passes (`fan_out`, `fold_batches`) split the items into
//! contiguous batches, one per worker, and drain results through a bounded
//! channel until every worker has dropped its sender. Mutation passes
//! (`run_cancellable`) pull from a shared job queue and stop at the first
//! error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::error::{Result, VaultError};

/// `min(available parallelism, items)`; never zero when there is work.
pub fn worker_count(items: usize) -> usize {
    if items == 0 {
        return 0;
    }
    let available = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    available.clamp(1, items)
}

/// Run `work` over contiguous batches of `items` on scoped threads and
/// collect everything the workers send. Emission order is unspecified.
pub fn fan_out<T, M, F>(items: &[T], work: F) -> Vec<M>
where
    T: Sync,
    M: Send,
    F: Fn(&[T], &flume::Sender<M>) + Sync,
{
    let workers = worker_count(items.len());
    if workers == 0 {
        return Vec::new();
    }
    let batch_size = items.len().div_ceil(workers);
    let (tx, rx) = flume::bounded(items.len());

    thread::scope(|scope| {
        let work = &work;
        for batch in items.chunks(batch_size) {
            let tx = tx.clone();
            scope.spawn(move || work(batch, &tx));
        }
        drop(tx);
        rx.iter().collect()
    })
}

/// One accumulator per worker, for commutative merges by the caller.
pub fn fold_batches<T, A, F>(items: &[T], work: F) -> Vec<A>
where
    T: Sync,
    A: Send,
    F: Fn(&[T]) -> A + Sync,
{
    fan_out(items, |batch, tx| {
        let _ = tx.send(work(batch));
    })
}

/// What a cancellable batch managed before stopping.
#[derive(Debug)]
pub struct BatchOutcome<R> {
    pub completed: Vec<R>,
    /// The first error any worker reported; its arrival cancelled the rest.
    pub first_error: Option<VaultError>,
}

/// Process `items` through a bounded job queue. The first failing item
/// raises a shared cancellation flag; workers check it before each item and
/// stop. Completed work is reported, never undone.
pub fn run_cancellable<T, R, F>(items: Vec<T>, work: F) -> BatchOutcome<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> Result<R> + Sync,
{
    let workers = worker_count(items.len());
    if workers == 0 {
        return BatchOutcome {
            completed: Vec::new(),
            first_error: None,
        };
    }

    let (job_tx, job_rx) = flume::bounded(items.len());
    for item in items {
        if job_tx.send(item).is_err() {
            break;
        }
    }
    drop(job_tx);

    let cancelled = AtomicBool::new(false);
    let (result_tx, result_rx) = flume::bounded(workers);

    thread::scope(|scope| {
        let work = &work;
        let cancelled = &cancelled;
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for item in job_rx.iter() {
                    if cancelled.load(Ordering::Acquire) {
                        break;
                    }
                    match work(item) {
                        Ok(r) => {
                            let _ = result_tx.send(Ok(r));
                        }
                        Err(e) => {
                            if !cancelled.swap(true, Ordering::AcqRel) {
                                let _ = result_tx.send(Err(e));
                            }
                            break;
                        }
                    }
                }
            });
        }
        drop(result_tx);

        let mut outcome = BatchOutcome {
            completed: Vec::new(),
            first_error: None,
        };
        for result in result_rx.iter() {
            match result {
                Ok(r) => outcome.completed.push(r),
                Err(e) => outcome.first_error = Some(e),
            }
        }
        outcome
    })
}
