//! Bounded-parallelism driver for per-file work.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::stream::FuturesUnordered;
use futures::{FutureExt as _, StreamExt as _};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, FileError};

/// Parallelism used when none is configured: 3 on machines with up to four
/// threads, otherwise one less than the available threads.
pub fn default_parallelism() -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    parallelism_for(available)
}

fn parallelism_for(available: usize) -> usize {
    if available <= 4 { 3 } else { available - 1 }
}

/// Outcome counts of one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Items the caller left out before running (not attempted at all).
    pub skipped: usize,
}

impl RunSummary {
    fn record<R>(&mut self, result: &Result<R, FileError>) {
        match result {
            Ok(_) => self.succeeded += 1,
            Err(FileError::Cancelled) => self.cancelled += 1,
            Err(_) => self.failed += 1,
        }
    }

    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }
}

/// Runs `op` for every item with at most `limit` operations in flight.
///
/// Every item's result, success or failure, is handed to `on_complete` as
/// soon as it is available; a failing or panicking item never stops the
/// others. `on_complete` runs on the calling task, one result at a time, so
/// it may hold mutable state.
///
/// Once `cancel` fires no further items are started. Operations already in
/// flight get the same token and are awaited to completion, then
/// [`Error::Cancelled`] is returned.
pub async fn run_bounded<T, R, F, Fut, C>(
    items: impl IntoIterator<Item = T>,
    limit: usize,
    cancel: &CancellationToken,
    op: F,
    mut on_complete: C,
) -> Result<RunSummary, Error>
where
    T: Clone,
    F: Fn(T, CancellationToken) -> Fut,
    Fut: Future<Output = Result<R, FileError>>,
    C: FnMut(T, Result<R, FileError>),
{
    let limit = limit.max(1);
    let mut pending = items.into_iter().peekable();
    let mut in_flight = FuturesUnordered::new();
    let mut summary = RunSummary::default();

    loop {
        while in_flight.len() < limit && !cancel.is_cancelled() {
            let Some(item) = pending.next() else {
                break;
            };
            let work = op(item.clone(), cancel.clone());
            in_flight.push(async move {
                let result = AssertUnwindSafe(work)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(FileError::Panicked(panic_message(&*panic))));
                (item, result)
            });
        }

        let Some((item, result)) = in_flight.next().await else {
            break;
        };
        summary.record(&result);
        on_complete(item, result);
    }

    if cancel.is_cancelled() && (pending.peek().is_some() || summary.cancelled > 0) {
        return Err(Error::Cancelled);
    }
    Ok(summary)
}

/// Runs `work` unless `cancel` fires first. Dropping `work` on cancellation
/// also drops (and kills) any child process it owns.
pub async fn until_cancelled<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T, FileError>>,
) -> Result<T, FileError> {
    if cancel.is_cancelled() {
        return Err(FileError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FileError::Cancelled),
        result = work => result,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn default_parallelism_follows_core_count() {
        assert_eq!(parallelism_for(1), 3);
        assert_eq!(parallelism_for(4), 3);
        assert_eq!(parallelism_for(5), 4);
        assert_eq!(parallelism_for(16), 15);
        assert!(default_parallelism() >= 3);
    }

    #[tokio::test]
    async fn never_exceeds_the_limit() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let mut done = Vec::new();

        let summary = run_bounded(
            0..12u32,
            3,
            &cancel,
            |i, _| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5 + (i as u64 % 4) * 3)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(i * 2)
                }
            },
            |i, result| done.push((i, result.unwrap())),
        )
        .await
        .unwrap();

        assert_eq!(summary.succeeded, 12);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        done.sort();
        assert_eq!(done, (0..12).map(|i| (i, i * 2)).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn failures_are_isolated_and_reported_once() {
        let cancel = CancellationToken::new();
        let mut failures: HashMap<u32, usize> = HashMap::new();
        let mut successes = 0;

        let summary = run_bounded(
            0..8u32,
            2,
            &cancel,
            |i, _| async move {
                tokio::task::yield_now().await;
                match i {
                    2 | 5 => Err(FileError::NoAudioStream),
                    6 => panic!("tool wrapper exploded"),
                    _ => Ok(()),
                }
            },
            |i, result| match result {
                Ok(()) => successes += 1,
                Err(_) => *failures.entry(i).or_default() += 1,
            },
        )
        .await
        .unwrap();

        assert_eq!(successes, 5);
        assert_eq!(failures, HashMap::from([(2, 1), (5, 1), (6, 1)]));
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.attempted(), 8);
    }

    #[tokio::test]
    async fn panics_carry_their_message() {
        let cancel = CancellationToken::new();
        let mut messages = Vec::new();
        run_bounded(
            [1u8],
            1,
            &cancel,
            |_, _| async move {
                if true {
                    panic!("boom");
                }
                Ok(())
            },
            |_, result: Result<(), FileError>| {
                if let Err(FileError::Panicked(msg)) = result {
                    messages.push(msg);
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(messages, ["boom"]);
    }

    #[tokio::test]
    async fn cancellation_stops_issuing_new_work() {
        let cancel = CancellationToken::new();
        let started = AtomicUsize::new(0);
        let mut completed = Vec::new();

        let result = run_bounded(
            0..20u32,
            2,
            &cancel,
            |i, token| {
                started.fetch_add(1, Ordering::SeqCst);
                async move {
                    until_cancelled(&token, async {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        Ok(i)
                    })
                    .await
                }
            },
            |i, result| {
                if result.is_ok() {
                    completed.push(i);
                }
                if completed.len() == 3 {
                    cancel.cancel();
                }
            },
        )
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(started.load(Ordering::SeqCst) < 20);
        assert!(completed.len() >= 3 && completed.len() < 20);
    }

    #[tokio::test]
    async fn cancelled_token_runs_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = AtomicUsize::new(0);
        let result = run_bounded(
            0..4u32,
            2,
            &cancel,
            |_, _| {
                started.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
            |_, _: Result<(), FileError>| {},
        )
        .await;
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn until_cancelled_interrupts_pending_work() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let result: Result<(), _> = until_cancelled(&cancel, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(FileError::Cancelled)));
    }
}
