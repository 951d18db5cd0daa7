//! Task units: the atomic, schedulable records handed to the external runner.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use super::{Action, Label, Phase};
use crate::errors::RtasError;
use crate::predicates::UpToDate;

/// What role a unit plays in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Carries a side-effecting action.
    Work,
    /// Synthetic "all per-item units of a phase are done" unit.
    Group,
    /// Synthetic "all phases of this instance done" unit.
    Terminal,
    /// Batch-level unit that precedes every pipeline of the batch.
    BatchEnter,
    /// Batch-level unit that follows every pipeline of the batch.
    BatchFinal,
}

/// An immutable task unit.
///
/// Fields are only reachable through accessors; a unit never changes once
/// [`TaskUnitBuilder::build`] returns it.
#[derive(Debug, Clone)]
pub struct TaskUnit {
    label: Label,
    kind: UnitKind,
    phase: Option<Phase>,
    action: Option<Action>,
    dependencies: BTreeSet<Label>,
    up_to_date: Vec<UpToDate>,
    declared_inputs: Vec<PathBuf>,
    declared_outputs: Vec<PathBuf>,
    teardown: Vec<Action>,
    doc: Option<String>,
}

impl TaskUnit {
    /// Starts building a unit.
    #[must_use]
    pub fn builder(label: impl Into<Label>, kind: UnitKind) -> TaskUnitBuilder {
        TaskUnitBuilder::new(label, kind)
    }

    /// Returns the label.
    #[must_use]
    pub fn label(&self) -> &Label {
        &self.label
    }

    /// Returns the unit kind.
    #[must_use]
    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    /// Returns the phase this unit belongs to, if any.
    #[must_use]
    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    /// Returns the action, or `None` for pure group units.
    #[must_use]
    pub fn action(&self) -> Option<&Action> {
        self.action.as_ref()
    }

    /// Returns the labels that must complete before this unit runs.
    #[must_use]
    pub fn dependencies(&self) -> &BTreeSet<Label> {
        &self.dependencies
    }

    /// Returns the up-to-date checks (any true means skip).
    #[must_use]
    pub fn up_to_date(&self) -> &[UpToDate] {
        &self.up_to_date
    }

    /// Returns true if a run-once marker is attached.
    #[must_use]
    pub fn is_run_once(&self) -> bool {
        self.up_to_date.iter().any(UpToDate::is_run_once)
    }

    /// Returns the declared input files (`file_dep`).
    #[must_use]
    pub fn declared_inputs(&self) -> &[PathBuf] {
        &self.declared_inputs
    }

    /// Returns the declared output files (`targets`).
    #[must_use]
    pub fn declared_outputs(&self) -> &[PathBuf] {
        &self.declared_outputs
    }

    /// Returns the teardown invocables.
    #[must_use]
    pub fn teardown(&self) -> &[Action] {
        &self.teardown
    }

    /// Returns the documentation string.
    #[must_use]
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// Produces the serialisable record consumed by external runners.
    #[must_use]
    pub fn describe(&self) -> TaskUnitRecord {
        TaskUnitRecord {
            label: self.label.clone(),
            kind: self.kind,
            phase: self.phase,
            action: self.action.as_ref().map(|a| a.name().to_string()),
            dependencies: self.dependencies.iter().cloned().collect(),
            up_to_date: self.up_to_date.iter().map(|u| u.name().to_string()).collect(),
            targets: self.declared_outputs.clone(),
            file_dep: self.declared_inputs.clone(),
            teardown: self.teardown.iter().map(|a| a.name().to_string()).collect(),
            doc: self.doc.clone(),
        }
    }
}

/// Serialisable view of a task unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskUnitRecord {
    /// The unit label.
    pub label: Label,
    /// The unit kind.
    pub kind: UnitKind,
    /// The phase, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    /// Name of the action, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Dependency labels.
    #[serde(default)]
    pub dependencies: Vec<Label>,
    /// Names of the up-to-date checks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub up_to_date: Vec<String>,
    /// Declared outputs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<PathBuf>,
    /// Declared inputs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_dep: Vec<PathBuf>,
    /// Names of the teardown invocables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teardown: Vec<String>,
    /// Documentation string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

/// Mutable staging form of a task unit, used while a pipeline is being built.
#[derive(Debug, Clone)]
pub struct TaskUnitBuilder {
    label: Label,
    kind: UnitKind,
    phase: Option<Phase>,
    action: Option<Action>,
    dependencies: BTreeSet<Label>,
    up_to_date: Vec<UpToDate>,
    declared_inputs: Vec<PathBuf>,
    declared_outputs: Vec<PathBuf>,
    teardown: Vec<Action>,
    doc: Option<String>,
}

impl TaskUnitBuilder {
    /// Creates a builder with a fixed label.
    #[must_use]
    pub fn new(label: impl Into<Label>, kind: UnitKind) -> Self {
        Self {
            label: label.into(),
            kind,
            phase: None,
            action: None,
            dependencies: BTreeSet::new(),
            up_to_date: Vec::new(),
            declared_inputs: Vec::new(),
            declared_outputs: Vec::new(),
            teardown: Vec::new(),
            doc: None,
        }
    }

    /// Returns the label the unit will carry.
    #[must_use]
    pub fn label(&self) -> &Label {
        &self.label
    }

    /// Sets the phase.
    #[must_use]
    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Sets the action.
    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<Label>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    /// Adds dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<Label>>) -> Self {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Adds up-to-date checks.
    #[must_use]
    pub fn with_up_to_date(mut self, checks: impl IntoIterator<Item = UpToDate>) -> Self {
        self.up_to_date.extend(checks);
        self
    }

    /// Adds declared inputs.
    #[must_use]
    pub fn with_inputs(mut self, paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.declared_inputs.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Adds declared outputs.
    #[must_use]
    pub fn with_outputs(mut self, paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.declared_outputs.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Adds teardown invocables.
    #[must_use]
    pub fn with_teardown(mut self, actions: impl IntoIterator<Item = Action>) -> Self {
        self.teardown.extend(actions);
        self
    }

    /// Sets the documentation string.
    #[must_use]
    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Adds a dependency in place. Used by the sequence chainer.
    pub fn add_dependencies(&mut self, deps: impl IntoIterator<Item = Label>) {
        self.dependencies.extend(deps);
    }

    /// Adds declared inputs in place.
    pub fn add_inputs(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        self.declared_inputs.extend(paths);
    }

    /// Validates and freezes the unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the label is empty, the unit depends on itself,
    /// or a work unit carries no action.
    pub fn build(self) -> Result<TaskUnit, RtasError> {
        if self.label.as_str().trim().is_empty() {
            return Err(RtasError::InvalidUnit {
                label: self.label,
                reason: "label cannot be empty".to_string(),
            });
        }
        if self.dependencies.contains(&self.label) {
            return Err(RtasError::InvalidUnit {
                reason: "unit cannot depend on itself".to_string(),
                label: self.label,
            });
        }
        if self.kind == UnitKind::Work && self.action.is_none() {
            return Err(RtasError::InvalidUnit {
                label: self.label,
                reason: "work unit has no action".to_string(),
            });
        }

        Ok(TaskUnit {
            label: self.label,
            kind: self.kind,
            phase: self.phase,
            action: self.action,
            dependencies: self.dependencies,
            up_to_date: self.up_to_date,
            declared_inputs: self.declared_inputs,
            declared_outputs: self.declared_outputs,
            teardown: self.teardown,
            doc: self.doc,
        })
    }
}
