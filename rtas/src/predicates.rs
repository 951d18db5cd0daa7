//! Idempotence predicates attached to task units.
//!
//! A unit carries an ordered list of [`UpToDate`] checks. The runner skips
//! the unit's action if any check holds. Checks that fail to evaluate count
//! as "not up to date" so a diagnostic problem never blocks a pipeline.

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::Label;
use crate::errors::ActionError;
use crate::transport::{FingerprintTracker, SharedTransport};

/// Boxed future returned by a check.
pub type CheckFuture = BoxFuture<'static, Result<bool, ActionError>>;

type CheckFn = dyn Fn() -> CheckFuture + Send + Sync;

/// One up-to-date predicate.
#[derive(Clone)]
pub enum UpToDate {
    /// An evaluable boolean check.
    Check {
        /// Name shown in unit records.
        name: String,
        /// The check itself.
        func: Arc<CheckFn>,
    },
    /// True once the unit has succeeded. Persisted by the runner.
    RunOnce,
}

impl UpToDate {
    /// Creates a check from an async closure.
    pub fn check<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, ActionError>> + Send + 'static,
    {
        Self::Check {
            name: name.into(),
            func: Arc::new(move || func().boxed()),
        }
    }

    /// A check with a fixed answer.
    #[must_use]
    pub fn constant(name: impl Into<String>, value: bool) -> Self {
        Self::check(name, move || future::ready(Ok(value)))
    }

    /// The run-once marker.
    #[must_use]
    pub fn run_once() -> Self {
        Self::RunOnce
    }

    /// Returns the predicate's name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Check { name, .. } => name,
            Self::RunOnce => "run_once",
        }
    }

    /// Returns true for the run-once marker.
    #[must_use]
    pub fn is_run_once(&self) -> bool {
        matches!(self, Self::RunOnce)
    }

    /// Evaluates the predicate, failing open.
    ///
    /// The run-once marker evaluates to false here; the runner answers it
    /// from its own store.
    pub async fn evaluate(&self, label: &Label) -> bool {
        match self {
            Self::RunOnce => false,
            Self::Check { name, func } => match func().await {
                Ok(satisfied) => {
                    debug!(label = %label, predicate = %name, satisfied, "evaluated up-to-date check");
                    satisfied
                }
                Err(e) => {
                    warn!(label = %label, predicate = %name, error = %e, "up-to-date check failed; treating as stale");
                    false
                }
            },
        }
    }
}

impl fmt::Debug for UpToDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Check { name, .. } => f.debug_struct("Check").field("name", name).finish(),
            Self::RunOnce => f.write_str("RunOnce"),
        }
    }
}

/// True if every path exists on the transport's host.
#[must_use]
pub fn remote_paths_exist(transport: SharedTransport, paths: Vec<String>) -> UpToDate {
    UpToDate::check("remote_paths_exist", move || {
        let transport = transport.clone();
        let paths = paths.clone();
        async move {
            for path in &paths {
                if !transport.path_exists(path).await? {
                    return Ok(false);
                }
            }
            Ok(!paths.is_empty())
        }
    })
}

/// True if every path's remote fingerprint equals the one last recorded.
#[must_use]
pub fn remote_fingerprint_unchanged(
    tracker: Arc<FingerprintTracker>,
    transport: SharedTransport,
    paths: Vec<String>,
) -> UpToDate {
    UpToDate::check("remote_fingerprint_unchanged", move || {
        let tracker = tracker.clone();
        let transport = transport.clone();
        let paths = paths.clone();
        async move {
            if paths.is_empty() {
                return Ok(false);
            }
            tracker.unchanged(transport.as_ref(), &paths).await
        }
    })
}

/// OR-composes a unit's predicates.
///
/// `run_once_done` is the runner's record of whether the unit already
/// succeeded once.
pub async fn any_satisfied(predicates: &[UpToDate], label: &Label, run_once_done: bool) -> bool {
    for predicate in predicates {
        let satisfied = if predicate.is_run_once() {
            run_once_done
        } else {
            predicate.evaluate(label).await
        };
        if satisfied {
            return true;
        }
    }
    false
}
