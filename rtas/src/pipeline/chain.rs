//! Draining: chaining the staged phases into task units.

use std::collections::BTreeSet;
use std::mem;
use std::path::PathBuf;
use tracing::{debug, warn};

use super::sequence::{ItemPhase, PhaseSlots, RemoteSlot, Rtas};
use crate::core::{Label, Namespace, Phase, TaskUnit, TaskUnitBuilder, UnitKind};
use crate::errors::RtasError;

impl Rtas {
    /// Emits the task units of the current namespace and consumes it.
    ///
    /// Phases are chained in their fixed order. Each phase depends on the
    /// terminal unit of the nearest earlier non-empty phase; the first one
    /// depends on the namespace's entry anchors. The namespace terminal
    /// `<namespace>:rtas` is always emitted last.
    ///
    /// An aborted host emits only its terminal unit, carrying an action that
    /// fails with the abort cause.
    pub fn drain(&mut self) -> Result<Vec<TaskUnit>, RtasError> {
        let aborted = self.is_aborted();
        let guard = self.guard().clone();
        let scope = self.scope_mut()?;
        if scope.drained {
            return Err(RtasError::AlreadyConsumed {
                namespace: scope.namespace.to_string(),
            });
        }
        scope.drained = true;
        let slots = mem::take(&mut scope.slots);
        let namespace = scope.namespace.clone();
        let entry = scope.entry.clone();
        let terminal = namespace.terminal();

        if aborted {
            warn!(namespace = %namespace, "host aborted; emitting terminal unit only");
            let unit = TaskUnitBuilder::new(terminal.clone(), UnitKind::Terminal)
                .with_action(guard.stand_in(terminal))
                .with_dependencies(entry)
                .with_doc(format!("{namespace}: aborted"))
                .build()?;
            return Ok(vec![unit]);
        }

        let mut units = Vec::new();
        let last = chain_phases(&namespace, slots, entry, &mut units)?;
        units.push(
            TaskUnitBuilder::new(terminal, UnitKind::Terminal)
                .with_dependencies(last)
                .with_doc(format!("{namespace}: all phases done"))
                .build()?,
        );

        debug!(namespace = %namespace, units = units.len(), "sequence drained");
        Ok(units)
    }
}

/// Emits every staged phase, returning the labels the terminal depends on.
fn chain_phases(
    namespace: &Namespace,
    slots: PhaseSlots,
    entry: BTreeSet<Label>,
    units: &mut Vec<TaskUnit>,
) -> Result<BTreeSet<Label>, RtasError> {
    let mut prev = entry;
    let mut fetched: Vec<PathBuf> = Vec::new();

    if let Some(unit) = slots.local_pre {
        prev = single(unit, prev, units)?;
    }
    if let Some(phase) = slots.ship {
        prev = items(namespace, Phase::ShipFiles, phase.items, prev, units)?;
    }
    match slots.remote {
        Some(RemoteSlot::Fixed(unit)) => prev = single(unit, prev, units)?,
        Some(RemoteSlot::Iter { steps, .. }) if !steps.is_empty() => {
            prev = iterated(namespace, steps, prev, units)?;
        }
        _ => {}
    }
    if let Some(ItemPhase { items: staged, local_paths }) = slots.fetch {
        fetched = local_paths;
        prev = items(namespace, Phase::FetchFiles, staged, prev, units)?;
    }
    if let Some(mut unit) = slots.local_post {
        unit.add_inputs(fetched);
        prev = single(unit, prev, units)?;
    }
    Ok(prev)
}

fn single(
    mut unit: TaskUnitBuilder,
    prev: BTreeSet<Label>,
    units: &mut Vec<TaskUnit>,
) -> Result<BTreeSet<Label>, RtasError> {
    unit.add_dependencies(prev);
    let label = unit.label().clone();
    units.push(unit.build()?);
    Ok(BTreeSet::from([label]))
}

/// Per-item units all depend on `prev`; the group unit depends on all items.
fn items(
    namespace: &Namespace,
    phase: Phase,
    staged: Vec<TaskUnitBuilder>,
    prev: BTreeSet<Label>,
    units: &mut Vec<TaskUnit>,
) -> Result<BTreeSet<Label>, RtasError> {
    let mut members = BTreeSet::new();
    for mut item in staged {
        item.add_dependencies(prev.iter().cloned());
        members.insert(item.label().clone());
        units.push(item.build()?);
    }
    group(namespace, phase, members, units)
}

/// Iterator steps run one after another; the group unit closes the chain.
fn iterated(
    namespace: &Namespace,
    steps: Vec<TaskUnitBuilder>,
    mut prev: BTreeSet<Label>,
    units: &mut Vec<TaskUnit>,
) -> Result<BTreeSet<Label>, RtasError> {
    let mut members = BTreeSet::new();
    for step in steps {
        members.insert(step.label().clone());
        prev = single(step, prev, units)?;
    }
    group(namespace, Phase::RemoteStep, members, units)
}

fn group(
    namespace: &Namespace,
    phase: Phase,
    members: BTreeSet<Label>,
    units: &mut Vec<TaskUnit>,
) -> Result<BTreeSet<Label>, RtasError> {
    let label = namespace.phase_label(phase);
    units.push(
        TaskUnitBuilder::new(label.clone(), UnitKind::Group)
            .with_phase(phase)
            .with_dependencies(members)
            .with_doc(format!("{namespace}: {phase}"))
            .build()?,
    );
    Ok(BTreeSet::from([label]))
}
