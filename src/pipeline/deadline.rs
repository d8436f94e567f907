//! Bounded waits with an explicit, tagged outcome.
//!
//! Long-running steps (rendering, remote calls) run under a deadline and
//! report one of three outcomes instead of racing a timer against the work
//! and turning the loser into an error. On timeout the shared [`CancelFlag`]
//! is raised so blocking work that cannot be aborted from outside (pdfium on
//! a `spawn_blocking` thread) stops at its next checkpoint.

use crate::error::AssetError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Cooperative cancellation shared between the waiter and the worker.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a deadline-bounded operation ended.
#[derive(Debug)]
pub enum DeadlineOutcome<T> {
    Completed(T),
    TimedOut,
    Failed(AssetError),
}

impl<T> DeadlineOutcome<T> {
    /// Collapse into a `Result`, mapping a timeout with `on_timeout`.
    pub fn into_result(self, on_timeout: impl FnOnce() -> AssetError) -> Result<T, AssetError> {
        match self {
            DeadlineOutcome::Completed(v) => Ok(v),
            DeadlineOutcome::TimedOut => Err(on_timeout()),
            DeadlineOutcome::Failed(e) => Err(e),
        }
    }
}

/// Run `work` for at most `limit`; raise `cancel` if the limit is hit.
pub async fn run_with_deadline<T, F>(
    limit: Duration,
    cancel: &CancelFlag,
    work: F,
) -> DeadlineOutcome<T>
where
    F: Future<Output = Result<T, AssetError>>,
{
    match tokio::time::timeout(limit, work).await {
        Ok(Ok(value)) => DeadlineOutcome::Completed(value),
        Ok(Err(e)) => DeadlineOutcome::Failed(e),
        Err(_) => {
            cancel.cancel();
            DeadlineOutcome::TimedOut
        }
    }
}

/// Like [`run_with_deadline`], but on timeout keeps driving `work` after
/// raising `cancel` until it returns, for at most another `limit`.
///
/// For work that writes into a directory the caller removes afterwards:
/// when this returns, the worker has stopped (it finishes at most the page
/// it was on) and cleanup cannot race a late write.
pub async fn run_until_stopped<T, F>(
    limit: Duration,
    cancel: &CancelFlag,
    work: F,
) -> DeadlineOutcome<T>
where
    F: Future<Output = Result<T, AssetError>>,
{
    let mut work = std::pin::pin!(work);
    match tokio::time::timeout(limit, &mut work).await {
        Ok(Ok(value)) => DeadlineOutcome::Completed(value),
        Ok(Err(e)) => DeadlineOutcome::Failed(e),
        Err(_) => {
            cancel.cancel();
            if tokio::time::timeout(limit, work).await.is_err() {
                warn!(
                    "Cancelled work still running {}s after its deadline",
                    limit.as_secs_f32()
                );
            }
            DeadlineOutcome::TimedOut
        }
    }
}

/// Bound a single remote call. A timeout is reported as
/// [`AssetError::StorageUnavailable`]; nothing is retried.
pub async fn bounded_call<T, F>(
    limit: Duration,
    operation: &'static str,
    work: F,
) -> Result<T, AssetError>
where
    F: Future<Output = Result<T, AssetError>>,
{
    run_with_deadline(limit, &CancelFlag::new(), work)
        .await
        .into_result(|| AssetError::StorageUnavailable {
            operation,
            detail: format!("no response within {}s", limit.as_secs_f32()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completed_within_limit() {
        let flag = CancelFlag::new();
        let out = run_with_deadline(Duration::from_secs(1), &flag, async { Ok(7) }).await;
        assert!(matches!(out, DeadlineOutcome::Completed(7)));
        assert!(!flag.is_cancelled());
    }

    #[tokio::test]
    async fn failure_is_passed_through() {
        let flag = CancelFlag::new();
        let out: DeadlineOutcome<()> = run_with_deadline(Duration::from_secs(1), &flag, async {
            Err(AssetError::Internal("boom".into()))
        })
        .await;
        assert!(matches!(out, DeadlineOutcome::Failed(AssetError::Internal(_))));
    }

    #[tokio::test]
    async fn timeout_raises_cancel_flag() {
        let flag = CancelFlag::new();
        let out: DeadlineOutcome<()> = run_with_deadline(Duration::from_millis(20), &flag, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(out, DeadlineOutcome::TimedOut));
        assert!(flag.is_cancelled());
    }

    #[tokio::test]
    async fn drained_timeout_returns_after_worker_stops() {
        let flag = CancelFlag::new();
        let stopped = Arc::new(AtomicBool::new(false));
        let (worker_flag, worker_stopped) = (flag.clone(), stopped.clone());

        let out: DeadlineOutcome<()> = run_until_stopped(Duration::from_millis(20), &flag, async move {
            while !worker_flag.is_cancelled() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            worker_stopped.store(true, Ordering::SeqCst);
            Err(AssetError::Internal("cancelled".into()))
        })
        .await;

        assert!(matches!(out, DeadlineOutcome::TimedOut));
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn drained_timeout_gives_up_on_stuck_worker() {
        let flag = CancelFlag::new();
        let out: DeadlineOutcome<()> =
            run_until_stopped(Duration::from_millis(10), &flag, std::future::pending()).await;
        assert!(matches!(out, DeadlineOutcome::TimedOut));
        assert!(flag.is_cancelled());
    }

    #[tokio::test]
    async fn bounded_call_maps_timeout_to_storage_unavailable() {
        let err = bounded_call(Duration::from_millis(10), "upload", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            AssetError::StorageUnavailable {
                operation: "upload",
                ..
            }
        ));
    }
}
