//! Test assertions for runs and outcome logs.

use super::RunReport;
use crate::core::{Label, TaskStatus, TaskUnit};
use crate::graph::TaskGraph;
use crate::guard::{OutcomeLog, OutcomeStatus};

/// Asserts that a unit ended with the expected status.
pub fn assert_status(report: &RunReport, label: &str, expected: TaskStatus) {
    let actual = report.status(label);
    assert_eq!(
        actual, expected,
        "Expected '{label}' to be {expected}, got {actual}. Statuses: {:?}",
        report.statuses()
    );
}

/// Asserts that no unit failed or was blocked.
pub fn assert_run_succeeded(report: &RunReport) {
    assert!(
        report.is_success(),
        "Expected a clean run, got failures: {:?} / blocked: {:?}",
        report.with_status(TaskStatus::Failed),
        report.with_status(TaskStatus::Blocked)
    );
}

/// Asserts that the latest recorded outcome of a label has the expected status.
pub fn assert_outcome(log: &OutcomeLog, label: &str, expected: OutcomeStatus) {
    let latest = log.latest(&Label::from(label));
    assert_eq!(
        latest.as_ref().map(|o| o.status),
        Some(expected),
        "Expected outcome {expected:?} for '{label}', got {latest:?}"
    );
}

/// Asserts that `units` form a valid graph and returns it.
pub fn assert_valid_graph(units: Vec<TaskUnit>) -> TaskGraph {
    match TaskGraph::new(units) {
        Ok(graph) => graph,
        Err(e) => panic!("Expected a valid task graph: {e}"),
    }
}

/// Asserts that a unit depends on exactly the given labels.
pub fn assert_depends_on(graph: &TaskGraph, label: &str, expected: &[&str]) {
    let Some(unit) = graph.get(label) else {
        panic!("Expected unit '{label}' in graph");
    };
    let actual: Vec<&str> = unit.dependencies().iter().map(|d| d.as_str()).collect();
    let mut expected = expected.to_vec();
    expected.sort_unstable();
    assert_eq!(actual, expected, "Unexpected dependencies of '{label}'");
}
