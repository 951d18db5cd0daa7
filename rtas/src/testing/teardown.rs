//! Teardown registry used by the reference runner.

use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use tracing::{debug, warn};

use crate::core::{Action, Label};

/// A teardown that raised or panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownFailure {
    /// Label of the unit the teardown belongs to.
    pub label: Label,
    /// Name of the teardown action.
    pub action: String,
    /// Error or panic text.
    pub message: String,
}

/// Teardowns of executed units, run in LIFO order.
///
/// Units register when they execute; [`TeardownRegistry::run_all`] drains
/// the registry, so every teardown runs at most once.
#[derive(Default)]
pub struct TeardownRegistry {
    entries: Mutex<Vec<(Label, Action)>>,
}

impl TeardownRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the teardowns of an executed unit.
    pub fn register(&self, label: &Label, actions: &[Action]) {
        let mut entries = self.entries.lock();
        for action in actions {
            entries.push((label.clone(), action.clone()));
        }
    }

    /// Returns the number of pending teardowns.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Runs every pending teardown, last registered first.
    ///
    /// Failures and panics are collected; they never stop the others.
    pub async fn run_all(&self) -> Vec<TeardownFailure> {
        let entries = std::mem::take(&mut *self.entries.lock());
        let mut failures = Vec::new();

        for (label, action) in entries.into_iter().rev() {
            let result = match std::panic::catch_unwind(AssertUnwindSafe(|| action.invoke())) {
                Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                Err(panic) => Err(panic),
            };
            let message = match result {
                Ok(Ok(_)) => {
                    debug!(label = %label, action = action.name(), "teardown done");
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            warn!(label = %label, action = action.name(), error = %message, "teardown failed");
            failures.push(TeardownFailure {
                label,
                action: action.name().to_string(),
                message,
            });
        }
        failures
    }
}

impl std::fmt::Debug for TeardownRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeardownRegistry")
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("teardown panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("teardown panicked: {s}")
    } else {
        "teardown panicked".to_string()
    }
}
