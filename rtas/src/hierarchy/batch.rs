//! Batch assembly: one definition applied to many hosts.
//!
//! A batch wraps the per-host pipelines between two synthetic units. The
//! root-enter unit `<batch>:enter` precedes every super sequence of the
//! batch; the leaf-final unit `<batch>:final` depends on every terminal of
//! every host that assembled successfully, so another batch can depend on
//! the whole batch through a single label.

use std::collections::HashSet;
use tracing::{error, info, warn};

use crate::core::{Label, TaskUnit, TaskUnitBuilder, UnitKind};
use crate::errors::{ActionError, RtasError};
use crate::pipeline::Rtas;

/// Label of a batch's root-enter unit.
#[must_use]
pub fn root_enter_label(batch: &str) -> Label {
    Label::new(format!("{batch}:enter"))
}

/// Label of a batch's leaf-final unit.
#[must_use]
pub fn leaf_final_label(batch: &str) -> Label {
    Label::new(format!("{batch}:final"))
}

/// Everything a batch emitted.
#[derive(Debug)]
pub struct BatchUnits {
    /// Root-enter first, then every host's units, then leaf-final.
    pub units: Vec<TaskUnit>,
    /// Label of the root-enter unit.
    pub root_enter: Label,
    /// Label of the leaf-final unit.
    pub leaf_final: Label,
    /// Hosts whose units were emitted.
    pub assembled_hosts: Vec<String>,
    /// Hosts whose definition failed; they emit nothing.
    pub skipped_hosts: Vec<String>,
}

/// Assembles one batch over `hosts`.
///
/// For each host a super sequence `name:host` is begun, anchored under the
/// root-enter unit, and `define` is called to build it. `define` returns the
/// units it drained itself (e.g. the super sequence before beginning a sub);
/// whatever is still pending afterwards is drained automatically.
///
/// Hosts already aborted when the batch is built are skipped. A host whose
/// definition fails is aborted and left out: its units are
/// discarded and its labels do not appear in leaf-final. Labels colliding
/// across hosts fail the whole batch.
pub fn build_batch<F>(
    name: &str,
    hosts: &mut [Rtas],
    task_dep: &[Label],
    mut define: F,
) -> Result<BatchUnits, RtasError>
where
    F: FnMut(&mut Rtas) -> Result<Vec<TaskUnit>, RtasError>,
{
    if name.trim().is_empty() {
        return Err(RtasError::EmptyName);
    }

    let root_enter = root_enter_label(name);
    let leaf_final = leaf_final_label(name);

    let mut units = vec![TaskUnitBuilder::new(root_enter.clone(), UnitKind::BatchEnter)
        .with_dependencies(task_dep.iter().cloned())
        .with_doc(format!("{name}: batch enter"))
        .build()?];
    let mut final_deps = Vec::new();
    let mut assembled_hosts = Vec::new();
    let mut skipped_hosts = Vec::new();

    for rtas in hosts.iter_mut() {
        if rtas.is_aborted() {
            warn!(batch = name, host = %rtas.host(), "host already aborted; skipped");
            skipped_hosts.push(rtas.host().to_string());
            continue;
        }
        match assemble_host(name, rtas, &root_enter, &mut define) {
            Ok(host_units) => {
                final_deps.extend(rtas.hierarchy_labels());
                assembled_hosts.push(rtas.host().to_string());
                units.extend(host_units);
            }
            Err(err) => {
                let label = rtas
                    .hierarchy()
                    .map_or_else(|| Label::new(rtas.host()), |h| h.super_terminal().clone());
                error!(batch = name, host = %rtas.host(), error = %err, "host definition failed; host skipped");
                rtas.guard()
                    .abort(&label, &ActionError::Local(anyhow::Error::new(err)));
                skipped_hosts.push(rtas.host().to_string());
            }
        }
    }

    units.push(
        TaskUnitBuilder::new(leaf_final.clone(), UnitKind::BatchFinal)
            .with_dependencies(final_deps)
            .with_doc(format!("{name}: batch final"))
            .build()?,
    );

    let mut seen = HashSet::with_capacity(units.len());
    for unit in &units {
        if !seen.insert(unit.label()) {
            return Err(RtasError::DuplicateLabel(unit.label().clone()));
        }
    }

    info!(
        batch = name,
        units = units.len(),
        assembled = assembled_hosts.len(),
        skipped = skipped_hosts.len(),
        "batch assembled"
    );
    Ok(BatchUnits {
        units,
        root_enter,
        leaf_final,
        assembled_hosts,
        skipped_hosts,
    })
}

fn assemble_host<F>(
    name: &str,
    rtas: &mut Rtas,
    root_enter: &Label,
    define: &mut F,
) -> Result<Vec<TaskUnit>, RtasError>
where
    F: FnMut(&mut Rtas) -> Result<Vec<TaskUnit>, RtasError>,
{
    rtas.set_batch_entry(Some(root_enter.clone()));
    let result = rtas
        .begin_super(name, std::iter::empty::<&str>())
        .and_then(|()| define(rtas));
    rtas.set_batch_entry(None);

    let mut units = result?;
    if rtas.has_pending() {
        units.extend(rtas.drain()?);
    }
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Action;
    use crate::errors::ActionError;
    use crate::pipeline::TaskDirectives;
    use crate::testing::InMemoryTransport;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn hosts(names: &[&str]) -> Vec<Rtas> {
        names
            .iter()
            .map(|h| {
                let mut rtas = Rtas::new(*h);
                rtas.add_identity("root", Arc::new(InMemoryTransport::new(*h, "root")), true);
                rtas
            })
            .collect()
    }

    fn unit<'a>(units: &'a [TaskUnit], label: &str) -> &'a TaskUnit {
        units.iter().find(|u| u.label().as_str() == label).unwrap()
    }

    #[test]
    fn test_batch_anchors() {
        let mut hosts = hosts(&["h1", "h2"]);
        let batch = build_batch("setup", &mut hosts, &[Label::from("base:final")], |rtas| {
            rtas.remote_step(["uptime"], TaskDirectives::new())?;
            Ok(Vec::new())
        })
        .unwrap();

        assert_eq!(batch.units.first().map(|u| u.label().as_str()), Some("setup:enter"));
        assert_eq!(batch.units.last().map(|u| u.label().as_str()), Some("setup:final"));
        assert!(unit(&batch.units, "setup:enter")
            .dependencies()
            .contains(&Label::from("base:final")));
        assert!(unit(&batch.units, "setup:h2:remote_step")
            .dependencies()
            .contains(&Label::from("setup:enter")));

        let finals: Vec<&str> = unit(&batch.units, "setup:final")
            .dependencies()
            .iter()
            .map(Label::as_str)
            .collect();
        assert_eq!(finals, vec!["setup:h1:rtas", "setup:h2:rtas"]);
        assert_eq!(batch.assembled_hosts, vec!["h1", "h2"]);
    }

    #[test]
    fn test_leaf_final_covers_subs() {
        let mut hosts = hosts(&["h1"]);
        let batch = build_batch("svc", &mut hosts, &[], |rtas| {
            rtas.local_pre(Action::noop("pre"), TaskDirectives::new())?;
            let mut units = rtas.drain()?;
            rtas.begin_sub(["worker"])?;
            rtas.remote_step(["echo sub"], TaskDirectives::new())?;
            units.extend(rtas.drain()?);
            rtas.begin_sub(["extra"])?;
            Ok(units)
        })
        .unwrap();

        let finals: Vec<&str> = unit(&batch.units, "svc:final")
            .dependencies()
            .iter()
            .map(Label::as_str)
            .collect();
        assert_eq!(finals, vec!["svc:h1:extra:rtas", "svc:h1:rtas", "svc:h1:worker:rtas"]);
        // The undrained "extra" sub was drained automatically.
        assert!(batch.units.iter().any(|u| u.label().as_str() == "svc:h1:extra:rtas"));
    }

    #[test]
    fn test_failed_definition_skips_host() {
        let mut hosts = hosts(&["good", "bad"]);
        let batch = build_batch("b", &mut hosts, &[], |rtas| {
            if rtas.host() == "bad" {
                rtas.set_active_identity("nobody")?;
            }
            rtas.remote_step(["true"], TaskDirectives::new())?;
            Ok(Vec::new())
        })
        .unwrap();

        assert_eq!(batch.skipped_hosts, vec!["bad"]);
        assert!(batch.units.iter().all(|u| !u.label().as_str().contains(":bad:")));
        let finals: Vec<&str> = unit(&batch.units, "b:final")
            .dependencies()
            .iter()
            .map(Label::as_str)
            .collect();
        assert_eq!(finals, vec!["b:good:rtas"]);
        assert!(hosts[1].is_aborted());
        assert!(!hosts[0].is_aborted());
    }

    #[test]
    fn test_aborted_host_is_skipped() {
        let mut hosts = hosts(&["h1", "h2"]);
        hosts[1].guard().abort(
            &Label::from("earlier:h2:rtas"),
            &ActionError::Connection("unreachable".to_string()),
        );

        let mut defined = Vec::new();
        let batch = build_batch("later", &mut hosts, &[], |rtas| {
            defined.push(rtas.host().to_string());
            rtas.remote_step(["true"], TaskDirectives::new())?;
            Ok(Vec::new())
        })
        .unwrap();

        assert_eq!(defined, vec!["h1"]);
        assert_eq!(batch.skipped_hosts, vec!["h2"]);
        assert!(batch.units.iter().all(|u| !u.label().as_str().starts_with("later:h2")));
        assert_eq!(
            hosts[1].abort_cause().map(|c| c.label),
            Some(Label::from("earlier:h2:rtas"))
        );
    }

    #[test]
    fn test_no_hosts() {
        let batch = build_batch("empty", &mut [], &[], |_| Ok(Vec::new())).unwrap();
        assert_eq!(batch.units.len(), 2);
        assert!(unit(&batch.units, "empty:final").dependencies().is_empty());
    }

    #[test]
    fn test_same_host_twice_collides() {
        let mut hosts = hosts(&["h1", "h1"]);
        let err = build_batch("dup", &mut hosts, &[], |_| Ok(Vec::new())).unwrap_err();
        assert!(matches!(err, RtasError::DuplicateLabel(_)));
    }

    #[test]
    fn test_abort_error_kind() {
        let mut hosts = hosts(&["h1"]);
        build_batch("x", &mut hosts, &[], |_| Err(RtasError::EmptyName)).unwrap();
        let cause = hosts[0].abort_cause().unwrap();
        assert_eq!(cause.kind, ActionError::Local(anyhow::anyhow!("x")).kind());
        assert_eq!(cause.label.as_str(), "x:h1:rtas");
    }
}
