//! Reference sequential runner.
//!
//! The crate never runs what it builds; an external task runner does. This
//! runner is the smallest faithful one: it walks a validated graph in
//! dependency order and applies the run contract every emitted unit relies
//! on.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{InMemoryRunOnceStore, RunOnceStore, TeardownFailure, TeardownRegistry};
use crate::core::{Label, TaskStatus, TaskUnit};
use crate::errors::{ActionError, GraphValidationError};
use crate::graph::TaskGraph;
use crate::predicates::any_satisfied;

/// What one pass over a graph did.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    statuses: BTreeMap<Label, TaskStatus>,
    executed: Vec<Label>,
    errors: BTreeMap<Label, String>,
    teardown_failures: Vec<TeardownFailure>,
}

impl RunReport {
    /// Returns the status of a unit; `Pending` if it was never visited.
    #[must_use]
    pub fn status(&self, label: &str) -> TaskStatus {
        self.statuses.get(label).copied().unwrap_or_default()
    }

    /// Returns every visited unit with its status.
    #[must_use]
    pub fn statuses(&self) -> &BTreeMap<Label, TaskStatus> {
        &self.statuses
    }

    /// Returns the units whose action was invoked, in invocation order.
    #[must_use]
    pub fn executed(&self) -> &[Label] {
        &self.executed
    }

    /// Returns true if the unit's action was invoked.
    #[must_use]
    pub fn was_executed(&self, label: &str) -> bool {
        self.executed.iter().any(|l| l.as_str() == label)
    }

    /// Returns the error text of a failed unit.
    #[must_use]
    pub fn error(&self, label: &str) -> Option<&str> {
        self.errors.get(label).map(String::as_str)
    }

    /// Returns how many units ended with `status`.
    #[must_use]
    pub fn count(&self, status: TaskStatus) -> usize {
        self.statuses.values().filter(|s| **s == status).count()
    }

    /// Returns the labels of units that ended with `status`.
    #[must_use]
    pub fn with_status(&self, status: TaskStatus) -> Vec<&Label> {
        self.statuses
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(l, _)| l)
            .collect()
    }

    /// Returns the teardowns that failed.
    #[must_use]
    pub fn teardown_failures(&self) -> &[TeardownFailure] {
        &self.teardown_failures
    }

    /// Returns true if no unit failed or was blocked.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.statuses.values().any(TaskStatus::is_failure)
    }
}

/// Runs a graph one unit at a time.
///
/// A unit runs only when every in-graph dependency ended `Ok` or
/// `UpToDate`. A unit with up-to-date checks is skipped when any check holds
/// and all its declared outputs exist locally. Teardowns of every unit whose
/// action actually ran, failed or not, run once at the end of the pass, last
/// first. A unit short-circuited by its host's failure guard registers none.
pub struct SequentialRunner {
    run_once: Arc<dyn RunOnceStore>,
}

impl SequentialRunner {
    /// Creates a runner with a fresh in-memory run-once store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryRunOnceStore::new()))
    }

    /// Creates a runner that keeps run-once markers in `store`.
    #[must_use]
    pub fn with_store(store: Arc<dyn RunOnceStore>) -> Self {
        Self { run_once: store }
    }

    /// Validates `units` and runs them.
    pub async fn run_units(
        &self,
        units: impl IntoIterator<Item = TaskUnit>,
    ) -> Result<RunReport, GraphValidationError> {
        let graph = TaskGraph::new(units)?;
        Ok(self.run(&graph).await)
    }

    /// Runs every unit of `graph` in execution order.
    pub async fn run(&self, graph: &TaskGraph) -> RunReport {
        let mut report = RunReport::default();
        let teardowns = TeardownRegistry::new();

        for label in graph.execution_order() {
            let Some(unit) = graph.get(label.as_str()) else {
                continue;
            };
            let status = self.run_unit(graph, unit, &mut report, &teardowns).await;
            debug!(label = %label, status = %status, "unit finished");
            report.statuses.insert(label.clone(), status);
        }

        report.teardown_failures = teardowns.run_all().await;
        info!(
            ok = report.count(TaskStatus::Ok),
            up_to_date = report.count(TaskStatus::UpToDate),
            failed = report.count(TaskStatus::Failed),
            blocked = report.count(TaskStatus::Blocked),
            "run finished"
        );
        report
    }

    async fn run_unit(
        &self,
        graph: &TaskGraph,
        unit: &TaskUnit,
        report: &mut RunReport,
        teardowns: &TeardownRegistry,
    ) -> TaskStatus {
        let label = unit.label();

        let blocked = unit.dependencies().iter().any(|dep| {
            graph.get(dep.as_str()).is_some() && !report.status(dep.as_str()).is_success()
        });
        if blocked {
            return TaskStatus::Blocked;
        }

        if self.is_up_to_date(unit).await {
            return TaskStatus::UpToDate;
        }

        let Some(action) = unit.action() else {
            return TaskStatus::Ok;
        };

        report.executed.push(label.clone());
        let result = action.invoke().await;
        // A guard short-circuit never ran the user action, so there is
        // nothing to tear down.
        if !matches!(result, Err(ActionError::Aborted { .. })) {
            teardowns.register(label, unit.teardown());
        }
        match result {
            Ok(_) => {
                if unit.is_run_once() {
                    self.run_once.mark_done(label).await;
                }
                TaskStatus::Ok
            }
            Err(e) => {
                warn!(label = %label, error = %e, "unit failed");
                report.errors.insert(label.clone(), e.to_string());
                TaskStatus::Failed
            }
        }
    }

    async fn is_up_to_date(&self, unit: &TaskUnit) -> bool {
        if unit.up_to_date().is_empty() {
            return false;
        }
        let run_once_done = unit.is_run_once() && self.run_once.is_done(unit.label()).await;
        if !any_satisfied(unit.up_to_date(), unit.label(), run_once_done).await {
            return false;
        }
        for output in unit.declared_outputs() {
            if !tokio::fs::try_exists(output).await.unwrap_or(false) {
                return false;
            }
        }
        true
    }
}

impl Default for SequentialRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SequentialRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialRunner").finish_non_exhaustive()
    }
}
