//! Failure guard: stops new side-effecting work for a host after its first
//! failure.
//!
//! The guard is cooperative. Builders consult [`FailureGuard::is_aborted`]
//! before scheduling, and every wrapped action consults it again before
//! invoking user code. Units that were already emitted are not cancelled;
//! the runner refuses them once their dependencies failed.

mod outcome;

pub use outcome::{OutcomeLog, OutcomeStatus, TaskOutcome};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

use crate::core::{Action, Label};
use crate::errors::ActionError;

/// Guard state of a pipeline instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardState {
    /// No wrapped action has failed.
    Running,
    /// A wrapped action failed; new work is refused.
    Aborted,
}

/// The failure that aborted a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortCause {
    /// Label of the failing unit.
    pub label: Label,
    /// Error text.
    pub error: String,
    /// Error class.
    pub kind: String,
    /// When the failure was recorded.
    pub at: DateTime<Utc>,
}

/// Per-host failure guard.
///
/// Only the first failure is kept as the abort cause.
#[derive(Debug)]
pub struct FailureGuard {
    host: String,
    aborted: AtomicBool,
    cause: RwLock<Option<AbortCause>>,
    outcomes: OutcomeLog,
}

impl FailureGuard {
    /// Creates a running guard for a host.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            aborted: AtomicBool::new(false),
            cause: RwLock::new(None),
            outcomes: OutcomeLog::new(),
        }
    }

    /// Returns the host identifier.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> GuardState {
        if self.is_aborted() {
            GuardState::Aborted
        } else {
            GuardState::Running
        }
    }

    /// Returns true once a wrapped action has failed.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Returns the abort cause, if aborted.
    #[must_use]
    pub fn cause(&self) -> Option<AbortCause> {
        self.cause.read().clone()
    }

    /// Returns the outcome log.
    #[must_use]
    pub fn outcomes(&self) -> &OutcomeLog {
        &self.outcomes
    }

    /// Moves the guard to `Aborted`. Returns false if it already was.
    pub fn abort(&self, label: &Label, err: &ActionError) -> bool {
        if self
            .aborted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            error!(host = %self.host, label = %label, error = %err, "host aborted");
            *self.cause.write() = Some(AbortCause {
                label: label.clone(),
                error: err.to_string(),
                kind: err.kind().to_string(),
                at: Utc::now(),
            });
            true
        } else {
            false
        }
    }

    /// Returns the guard to `Running`. The outcome log is kept.
    pub fn reset(&self) {
        self.aborted.store(false, Ordering::SeqCst);
        *self.cause.write() = None;
    }

    fn aborted_error(&self) -> ActionError {
        let cause_label = self
            .cause()
            .map_or_else(|| Label::from(self.host.as_str()), |c| c.label);
        ActionError::Aborted { cause_label }
    }

    /// Wraps an action so it short-circuits once the host is aborted and
    /// aborts the host if it fails.
    #[must_use]
    pub fn wrap(self: &Arc<Self>, label: Label, action: Action) -> Action {
        let guard = Arc::clone(self);
        let name = action.name().to_string();
        Action::new(name, move || {
            let guard = Arc::clone(&guard);
            let label = label.clone();
            let action = action.clone();
            async move {
                if guard.is_aborted() {
                    let err = guard.aborted_error();
                    warn!(host = %guard.host, label = %label, "skipping action of aborted host");
                    guard
                        .outcomes
                        .record(label, TaskOutcome::aborted(err.to_string()));
                    return Err(err);
                }

                match action.invoke().await {
                    Ok(value) => {
                        guard
                            .outcomes
                            .record(label, TaskOutcome::success(render_value(&value)));
                        Ok(value)
                    }
                    Err(err) => {
                        guard
                            .outcomes
                            .record(label.clone(), TaskOutcome::error(err.kind(), err.to_string()));
                        guard.abort(&label, &err);
                        Err(err)
                    }
                }
            }
        })
    }

    /// An action that never runs user code and fails with `Aborted`.
    ///
    /// Emitted in place of the work of an already-aborted host.
    #[must_use]
    pub fn stand_in(self: &Arc<Self>, label: Label) -> Action {
        let guard = Arc::clone(self);
        Action::new("aborted", move || {
            let err = guard.aborted_error();
            guard
                .outcomes
                .record(label.clone(), TaskOutcome::aborted(err.to_string()));
            futures::future::ready(Err(err))
        })
    }
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_action(counter: &Arc<AtomicUsize>, fail: bool) -> Action {
        let counter = counter.clone();
        Action::from_fn("work", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            if fail {
                Err(anyhow::anyhow!("disk full"))
            } else {
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_failure_aborts_and_short_circuits() {
        let guard = Arc::new(FailureGuard::new("h1"));
        let counter = Arc::new(AtomicUsize::new(0));

        let failing = guard.wrap(Label::from("a"), counting_action(&counter, true));
        let later = guard.wrap(Label::from("b"), counting_action(&counter, false));

        assert!(failing.invoke().await.is_err());
        assert_eq!(guard.state(), GuardState::Aborted);

        let err = later.invoke().await.unwrap_err();
        assert!(matches!(err, ActionError::Aborted { ref cause_label } if cause_label.as_str() == "a"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(
            guard.outcomes().latest(&Label::from("b")).map(|o| o.status),
            Some(OutcomeStatus::Aborted)
        );
    }

    #[tokio::test]
    async fn test_first_cause_wins() {
        let guard = Arc::new(FailureGuard::new("h1"));
        let first = ActionError::Connection("one".to_string());
        let second = ActionError::Connection("two".to_string());

        assert!(guard.abort(&Label::from("a"), &first));
        assert!(!guard.abort(&Label::from("b"), &second));

        let cause = guard.cause().unwrap();
        assert_eq!(cause.label.as_str(), "a");
        assert_eq!(cause.kind, "connection");
    }

    #[tokio::test]
    async fn test_reset_returns_to_running() {
        let guard = Arc::new(FailureGuard::new("h1"));
        guard.abort(&Label::from("a"), &ActionError::Connection("x".to_string()));
        guard.reset();

        assert_eq!(guard.state(), GuardState::Running);
        assert!(guard.cause().is_none());
    }

    #[tokio::test]
    async fn test_success_recorded_with_output() {
        let guard = Arc::new(FailureGuard::new("h1"));
        let action = guard.wrap(
            Label::from("cmd"),
            Action::new("echo", || async { Ok(serde_json::json!("hello")) }),
        );
        action.invoke().await.unwrap();

        let outcome = guard.outcomes().latest(&Label::from("cmd")).unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.detail, "hello");
    }

    #[tokio::test]
    async fn test_stand_in_fails_without_user_code() {
        let guard = Arc::new(FailureGuard::new("h1"));
        guard.abort(&Label::from("x"), &ActionError::Connection("down".to_string()));

        let stand_in = guard.stand_in(Label::from("deploy:h1:rtas"));
        assert!(matches!(
            stand_in.invoke().await,
            Err(ActionError::Aborted { .. })
        ));
    }
}
