//! Per-label outcome log of a pipeline instance.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::Label;

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The action returned normally.
    Success,
    /// The action raised.
    Error,
    /// The guard short-circuited the action.
    Aborted,
}

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// How the invocation ended.
    pub status: OutcomeStatus,
    /// Output on success, error text otherwise.
    pub detail: String,
    /// Error class for failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// When the outcome was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl TaskOutcome {
    /// A successful outcome.
    #[must_use]
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            detail: detail.into(),
            error_kind: None,
            recorded_at: Utc::now(),
        }
    }

    /// A failed outcome.
    #[must_use]
    pub fn error(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            detail: detail.into(),
            error_kind: Some(kind.into()),
            recorded_at: Utc::now(),
        }
    }

    /// A short-circuited outcome.
    #[must_use]
    pub fn aborted(detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Aborted,
            detail: detail.into(),
            error_kind: Some("aborted".to_string()),
            recorded_at: Utc::now(),
        }
    }

    /// Returns true if the invocation succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Outcomes keyed by label, in invocation order per label.
#[derive(Debug, Default)]
pub struct OutcomeLog {
    entries: Mutex<BTreeMap<Label, Vec<TaskOutcome>>>,
}

impl OutcomeLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an outcome under a label.
    pub fn record(&self, label: Label, outcome: TaskOutcome) {
        self.entries.lock().entry(label).or_default().push(outcome);
    }

    /// Returns every outcome recorded under a label.
    #[must_use]
    pub fn get(&self, label: &Label) -> Vec<TaskOutcome> {
        self.entries.lock().get(label).cloned().unwrap_or_default()
    }

    /// Returns the latest outcome recorded under a label.
    #[must_use]
    pub fn latest(&self, label: &Label) -> Option<TaskOutcome> {
        self.entries
            .lock()
            .get(label)
            .and_then(|outcomes| outcomes.last().cloned())
    }

    /// Returns every non-successful (label, outcome) pair.
    #[must_use]
    pub fn failures(&self) -> Vec<(Label, TaskOutcome)> {
        self.entries
            .lock()
            .iter()
            .flat_map(|(label, outcomes)| {
                outcomes
                    .iter()
                    .filter(|o| !o.is_success())
                    .map(move |o| (label.clone(), o.clone()))
            })
            .collect()
    }

    /// Returns a copy of the whole log.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<Label, Vec<TaskOutcome>> {
        self.entries.lock().clone()
    }

    /// Returns the number of labels with outcomes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Clears the log.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_query() {
        let log = OutcomeLog::new();
        let label = Label::from("deploy:h1:remote_step");

        log.record(label.clone(), TaskOutcome::success("ok"));
        log.record(label.clone(), TaskOutcome::error("remote_command", "boom"));

        assert_eq!(log.get(&label).len(), 2);
        assert_eq!(log.latest(&label).map(|o| o.status), Some(OutcomeStatus::Error));
        assert_eq!(log.failures().len(), 1);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_outcome_serializes() {
        let outcome = TaskOutcome::aborted("after deploy:h1:ship_file:a");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "aborted");
        assert_eq!(json["error_kind"], "aborted");
    }
}
