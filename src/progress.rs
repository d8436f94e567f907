//! Observer trait for coordinator lifecycle events.
//!
//! Inject an [`Arc<dyn LifecycleObserver>`] with
//! [`crate::coordinator::AssetCoordinator::with_observer`] to receive each
//! state transition of a replace or delete run, per-asset upload events,
//! and best-effort cleanup failures.
//!
//! # Example
//!
//! ```rust
//! use portfolio_assets::{LifecycleObserver, OwnerKey, Stage};
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct StageLog(Mutex<Vec<Stage>>);
//!
//! impl LifecycleObserver for StageLog {
//!     fn on_stage(&self, _key: &OwnerKey, stage: Stage) {
//!         self.0.lock().unwrap().push(stage);
//!     }
//! }
//!
//! let log: Arc<dyn LifecycleObserver> = Arc::new(StageLog::default());
//! ```

use crate::model::OwnerKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// States of one coordinator run.
///
/// A replace walks `Start → Staged → Rendered → Uploaded → Persisted →
/// Cleaned`; image replaces skip `Rendered`, deletes go straight from
/// `Start` to `Persisted`. `Failed` is reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Start,
    Staged,
    Rendered,
    Uploaded,
    Persisted,
    Cleaned,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Cleaned | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Start => "START",
            Stage::Staged => "STAGED",
            Stage::Rendered => "RENDERED",
            Stage::Uploaded => "UPLOADED",
            Stage::Persisted => "PERSISTED",
            Stage::Cleaned => "CLEANED",
            Stage::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Called by the coordinator as a run progresses.
///
/// Implementations must be `Send + Sync`: runs for different owners execute
/// concurrently, and uploads inside one run may report from different tasks.
/// All methods default to no-ops.
pub trait LifecycleObserver: Send + Sync {
    /// Called on every state transition, including the final one.
    fn on_stage(&self, key: &OwnerKey, stage: Stage) {
        let _ = (key, stage);
    }

    /// Called after each remote object of the new generation is stored.
    ///
    /// # Arguments
    /// * `done`  — uploads finished so far in this run
    /// * `total` — uploads this run will attempt
    fn on_asset_uploaded(&self, key: &OwnerKey, done: usize, total: usize) {
        let _ = (key, done, total);
    }

    /// Called when a previous-generation object could not be deleted.
    /// The run still succeeds; the object is left for manual cleanup.
    fn on_cleanup_failure(&self, key: &OwnerKey, storage_id: &str, error: &str) {
        let _ = (key, storage_id, error);
    }
}

/// Default observer; ignores every event.
pub struct NoopObserver;

impl LifecycleObserver for NoopObserver {}

/// Convenience alias for the type held by the coordinator.
pub type SharedObserver = Arc<dyn LifecycleObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AssetKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        stages: Mutex<Vec<Stage>>,
        uploads: AtomicUsize,
        failures: AtomicUsize,
    }

    impl LifecycleObserver for Recording {
        fn on_stage(&self, _key: &OwnerKey, stage: Stage) {
            self.stages.lock().unwrap().push(stage);
        }

        fn on_asset_uploaded(&self, _key: &OwnerKey, _done: usize, _total: usize) {
            self.uploads.fetch_add(1, Ordering::SeqCst);
        }

        fn on_cleanup_failure(&self, _key: &OwnerKey, _storage_id: &str, _error: &str) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_observer_does_not_panic() {
        let key = OwnerKey::new("u1", AssetKind::Resume);
        let obs = NoopObserver;
        obs.on_stage(&key, Stage::Start);
        obs.on_asset_uploaded(&key, 1, 3);
        obs.on_cleanup_failure(&key, "id", "boom");
    }

    #[test]
    fn recording_observer_receives_events() {
        let key = OwnerKey::new("u1", AssetKind::Resume);
        let obs = Recording::default();
        for s in [Stage::Start, Stage::Staged, Stage::Failed] {
            obs.on_stage(&key, s);
        }
        obs.on_asset_uploaded(&key, 1, 1);
        obs.on_cleanup_failure(&key, "old", "timeout");

        assert_eq!(
            *obs.stages.lock().unwrap(),
            vec![Stage::Start, Stage::Staged, Stage::Failed]
        );
        assert_eq!(obs.uploads.load(Ordering::SeqCst), 1);
        assert_eq!(obs.failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn terminal_stages() {
        assert!(Stage::Cleaned.is_terminal());
        assert!(Stage::Failed.is_terminal());
        assert!(!Stage::Persisted.is_terminal());
        assert_eq!(Stage::Rendered.to_string(), "RENDERED");
    }
}
