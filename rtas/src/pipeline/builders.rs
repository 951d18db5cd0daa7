//! Phase builders.
//!
//! Each builder turns user work into staged task units for the current
//! namespace. Builders never run anything. Calling a builder again for the
//! same phase replaces the staged definition, except for the remote step
//! iterator which accumulates until finalized. Builders called while the
//! host is aborted schedule nothing.

use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::sequence::{ItemPhase, RemoteSlot, Rtas};
use super::{FileSpec, RemoteStep, TaskDirectives};
use crate::core::{Action, Label, Namespace, Phase, TaskUnitBuilder, UnitKind};
use crate::errors::{ActionError, RtasError};
use crate::predicates::{remote_fingerprint_unchanged, remote_paths_exist, UpToDate};
use crate::transport::{shell_quote, SharedTransport};

impl Rtas {
    /// Stages the local step run before anything touches the host.
    pub fn local_pre(&mut self, action: Action, directives: TaskDirectives) -> Result<(), RtasError> {
        let namespace = self.scope()?.namespace.clone();
        if self.skip_if_aborted(Phase::LocalPre) {
            return Ok(());
        }
        let unit = self.local_unit(&namespace, Phase::LocalPre, action, directives);
        self.scope_mut()?.slots.local_pre = Some(unit);
        Ok(())
    }

    /// Stages the local step run after everything else on the host.
    ///
    /// Files fetched by this namespace become declared inputs of the step.
    pub fn local_post(&mut self, action: Action, directives: TaskDirectives) -> Result<(), RtasError> {
        let namespace = self.scope()?.namespace.clone();
        if self.skip_if_aborted(Phase::LocalPost) {
            return Ok(());
        }
        let unit = self.local_unit(&namespace, Phase::LocalPost, action, directives);
        self.scope_mut()?.slots.local_post = Some(unit);
        Ok(())
    }

    /// Stages one upload unit per file into `dest_dir` on the host.
    ///
    /// A file is up to date when its destination, and every remote path in
    /// `targets`, already exists. `file_dep` and `local_file_dep` are extra
    /// local inputs of each file unit.
    pub fn ship_files<I>(
        &mut self,
        files: I,
        dest_dir: impl AsRef<Path>,
        directives: TaskDirectives,
    ) -> Result<(), RtasError>
    where
        I: IntoIterator,
        I::Item: Into<FileSpec>,
    {
        let files: Vec<FileSpec> = files.into_iter().map(Into::into).collect();
        if files.is_empty() {
            return Ok(());
        }
        let namespace = self.scope()?.namespace.clone();
        if self.skip_if_aborted(Phase::ShipFiles) {
            return Ok(());
        }
        let transport = self.active_transport()?;
        let extra_targets = directives.remote_targets();
        let extra_inputs: Vec<PathBuf> = directives
            .file_dep
            .iter()
            .chain(&directives.local_file_dep)
            .cloned()
            .collect();
        let doc_prefix = directives
            .doc
            .clone()
            .unwrap_or_else(|| format!("{}: ship local file to remote", namespace.terminal()));

        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(files.len());
        for spec in files {
            let (basename, destination) = resolve(&namespace, Phase::ShipFiles, &spec, dest_dir.as_ref())?;
            let label = namespace.item_label(Phase::ShipFiles, &basename);
            if !seen.insert(label.clone()) {
                return Err(RtasError::DuplicateLabel(label));
            }
            let remote_path = destination.to_string_lossy().into_owned();

            let mut teardown = Vec::new();
            if spec.clean_local {
                teardown.push(remove_local(spec.source.clone()));
            }
            if spec.clean_remote {
                teardown.push(remove_remote(transport.clone(), remote_path.clone()));
            }
            teardown.extend(directives.teardown.iter().cloned());

            let action = put_file(transport.clone(), spec.source.clone(), remote_path.clone());
            let doc = format!("{doc_prefix}: {}", spec.source.display());
            let required: Vec<String> = std::iter::once(remote_path)
                .chain(extra_targets.iter().cloned())
                .collect();
            let mut up_to_date = vec![remote_paths_exist(transport.clone(), required)];
            up_to_date.extend(directives.up_to_date.iter().cloned());

            items.push(
                TaskUnitBuilder::new(label.clone(), UnitKind::Work)
                    .with_phase(Phase::ShipFiles)
                    .with_action(self.guard().wrap(label, action))
                    .with_dependencies(directives.task_dep.iter().cloned())
                    .with_inputs(std::iter::once(spec.source.clone()).chain(extra_inputs.iter().cloned()))
                    .with_up_to_date(up_to_date)
                    .with_teardown(teardown)
                    .with_doc(doc),
            );
        }

        self.scope_mut()?.slots.ship = Some(ItemPhase {
            items,
            local_paths: Vec::new(),
        });
        Ok(())
    }

    /// Stages a fixed list of remote steps as one unit, stopping at the
    /// first failing step.
    pub fn remote_step<I>(&mut self, steps: I, directives: TaskDirectives) -> Result<(), RtasError>
    where
        I: IntoIterator,
        I::Item: Into<RemoteStep>,
    {
        let steps: Vec<RemoteStep> = steps.into_iter().map(Into::into).collect();
        if steps.is_empty() {
            return Ok(());
        }
        let scope = self.scope()?;
        let namespace = scope.namespace.clone();
        if matches!(scope.slots.remote, Some(RemoteSlot::Iter { .. })) {
            return Err(RtasError::RemoteModeConflict {
                namespace: namespace.to_string(),
                existing: "iterator",
            });
        }
        if self.skip_if_aborted(Phase::RemoteStep) {
            return Ok(());
        }
        let transport = self.active_transport()?;

        let label = namespace.phase_label(Phase::RemoteStep);
        let action = run_steps(transport.clone(), self.service().clone(), label.clone(), steps);
        let doc = directives
            .doc
            .clone()
            .unwrap_or_else(|| format!("{}: remote-step", namespace.terminal()));
        let unit = self.remote_unit(label, action, &transport, directives, doc);

        self.scope_mut()?.slots.remote = Some(RemoteSlot::Fixed(unit));
        Ok(())
    }

    /// Appends one named step to the remote step iterator.
    ///
    /// Each step is its own unit labelled `namespace:remote_step:<name>`,
    /// chained to the step before it.
    pub fn append_remote_step(
        &mut self,
        name: &str,
        step: impl Into<RemoteStep>,
        directives: TaskDirectives,
    ) -> Result<(), RtasError> {
        if name.trim().is_empty() {
            return Err(RtasError::EmptyName);
        }
        let scope = self.scope()?;
        let namespace = scope.namespace.clone();
        let label = namespace.item_label(Phase::RemoteStep, name);
        match &scope.slots.remote {
            Some(RemoteSlot::Fixed(_)) => {
                return Err(RtasError::RemoteModeConflict {
                    namespace: namespace.to_string(),
                    existing: "fixed",
                });
            }
            Some(RemoteSlot::Iter { finalized: true, .. }) => {
                return Err(RtasError::RemoteStepsFinalized {
                    namespace: namespace.to_string(),
                });
            }
            Some(RemoteSlot::Iter { steps, .. }) if steps.iter().any(|s| *s.label() == label) => {
                return Err(RtasError::DuplicateLabel(label));
            }
            _ => {}
        }
        if self.skip_if_aborted(Phase::RemoteStep) {
            return Ok(());
        }
        let transport = self.active_transport()?;

        let action = run_steps(
            transport.clone(),
            self.service().clone(),
            label.clone(),
            vec![step.into()],
        );
        let doc = directives
            .doc
            .clone()
            .unwrap_or_else(|| format!("{}: remote step : {name}", namespace.terminal()));
        let unit = self.remote_unit(label, action, &transport, directives, doc);

        let slot = &mut self.scope_mut()?.slots.remote;
        match slot {
            Some(RemoteSlot::Iter { steps, .. }) => steps.push(unit),
            _ => {
                *slot = Some(RemoteSlot::Iter {
                    steps: vec![unit],
                    finalized: false,
                });
            }
        }
        Ok(())
    }

    /// Closes the remote step iterator.
    ///
    /// Returns the label of the iterator's group unit, or `None` if the
    /// iterator is not in use or was already finalized. Draining finalizes
    /// implicitly.
    pub fn finalize_remote_steps(&mut self) -> Result<Option<Label>, RtasError> {
        let scope = self.scope_mut()?;
        let label = scope.namespace.phase_label(Phase::RemoteStep);
        match &mut scope.slots.remote {
            Some(RemoteSlot::Iter { finalized, .. }) if !*finalized => {
                *finalized = true;
                Ok(Some(label))
            }
            _ => Ok(None),
        }
    }

    /// Stages one download unit per file into the default fetch directory.
    pub fn fetch_files<I>(&mut self, files: I, directives: TaskDirectives) -> Result<(), RtasError>
    where
        I: IntoIterator,
        I::Item: Into<FileSpec>,
    {
        let dir = self.fetch_dir().to_path_buf();
        self.fetch_files_into(files, dir, directives)
    }

    /// Stages one download unit per file into `local_dir`.
    ///
    /// A file is up to date when its remote fingerprint, and those of the
    /// remote paths in `file_dep`, are unchanged since the last successful
    /// fetch and every local output exists. `targets` are extra local
    /// outputs of each file unit.
    pub fn fetch_files_into<I>(
        &mut self,
        files: I,
        local_dir: impl AsRef<Path>,
        directives: TaskDirectives,
    ) -> Result<(), RtasError>
    where
        I: IntoIterator,
        I::Item: Into<FileSpec>,
    {
        let files: Vec<FileSpec> = files.into_iter().map(Into::into).collect();
        if files.is_empty() {
            return Ok(());
        }
        let namespace = self.scope()?.namespace.clone();
        if self.skip_if_aborted(Phase::FetchFiles) {
            return Ok(());
        }
        let transport = self.active_transport()?;
        let tracker = Arc::clone(self.fingerprints());
        let extra_fingerprints = directives.remote_file_dep();
        let doc_prefix = directives
            .doc
            .clone()
            .unwrap_or_else(|| format!("{}: fetch-file", namespace.terminal()));

        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(files.len());
        let mut local_paths = Vec::with_capacity(files.len());
        for spec in files {
            let (basename, local_path) = resolve(&namespace, Phase::FetchFiles, &spec, local_dir.as_ref())?;
            let label = namespace.item_label(Phase::FetchFiles, &basename);
            if !seen.insert(label.clone()) {
                return Err(RtasError::DuplicateLabel(label));
            }
            let remote_path = spec.source.to_string_lossy().into_owned();

            let mut teardown = Vec::new();
            if spec.clean_local {
                teardown.push(remove_local(local_path.clone()));
            }
            if spec.clean_remote {
                teardown.push(remove_remote(transport.clone(), remote_path.clone()));
            }
            teardown.extend(directives.teardown.iter().cloned());

            let fingerprinted: Vec<String> = std::iter::once(remote_path.clone())
                .chain(extra_fingerprints.iter().cloned())
                .collect();
            let action = get_file(
                transport.clone(),
                Arc::clone(&tracker),
                remote_path.clone(),
                local_path.clone(),
                fingerprinted.clone(),
            );
            let mut up_to_date = vec![remote_fingerprint_unchanged(
                Arc::clone(&tracker),
                transport.clone(),
                fingerprinted,
            )];
            up_to_date.extend(directives.up_to_date.iter().cloned());

            items.push(
                TaskUnitBuilder::new(label.clone(), UnitKind::Work)
                    .with_phase(Phase::FetchFiles)
                    .with_action(self.guard().wrap(label, action))
                    .with_dependencies(directives.task_dep.iter().cloned())
                    .with_outputs(std::iter::once(local_path.clone()).chain(directives.targets.iter().cloned()))
                    .with_inputs(directives.local_file_dep.iter().cloned())
                    .with_up_to_date(up_to_date)
                    .with_teardown(teardown)
                    .with_doc(format!("{doc_prefix} {remote_path}")),
            );
            local_paths.push(local_path);
        }

        self.scope_mut()?.slots.fetch = Some(ItemPhase { items, local_paths });
        Ok(())
    }

    fn skip_if_aborted(&self, phase: Phase) -> bool {
        if !self.is_aborted() {
            return false;
        }
        let cause = self
            .abort_cause()
            .map(|c| c.label.to_string())
            .unwrap_or_default();
        warn!(host = %self.host(), phase = %phase, cause = %cause, "host aborted; phase not scheduled");
        true
    }

    fn local_unit(
        &self,
        namespace: &Namespace,
        phase: Phase,
        action: Action,
        directives: TaskDirectives,
    ) -> TaskUnitBuilder {
        let label = namespace.phase_label(phase);
        let doc = directives
            .doc
            .unwrap_or_else(|| format!("{}: {}", namespace.terminal(), phase.group_name()));
        TaskUnitBuilder::new(label.clone(), UnitKind::Work)
            .with_phase(phase)
            .with_action(self.guard().wrap(label, action))
            .with_dependencies(directives.task_dep)
            .with_outputs(directives.targets)
            .with_inputs(directives.file_dep)
            .with_up_to_date(directives.up_to_date)
            .with_teardown(directives.teardown)
            .with_doc(doc)
    }

    fn remote_unit(
        &self,
        label: Label,
        action: Action,
        transport: &SharedTransport,
        directives: TaskDirectives,
        doc: String,
    ) -> TaskUnitBuilder {
        let targets = directives.remote_targets();
        let file_dep = directives.remote_file_dep();

        let mut up_to_date = directives.up_to_date;
        if !targets.is_empty() {
            up_to_date.push(remote_paths_exist(transport.clone(), targets));
        }
        if !file_dep.is_empty() {
            up_to_date.push(remote_fingerprint_unchanged(
                Arc::clone(self.fingerprints()),
                transport.clone(),
                file_dep,
            ));
        }

        TaskUnitBuilder::new(label.clone(), UnitKind::Work)
            .with_phase(Phase::RemoteStep)
            .with_action(self.guard().wrap(label, action))
            .with_dependencies(directives.task_dep)
            .with_inputs(directives.local_file_dep)
            .with_up_to_date(up_to_date)
            .with_teardown(directives.teardown)
            .with_doc(doc)
    }
}

/// Resolves a descriptor's base name and destination.
fn resolve(
    namespace: &Namespace,
    phase: Phase,
    spec: &FileSpec,
    dir: &Path,
) -> Result<(String, PathBuf), RtasError> {
    match (spec.basename(), spec.destination(dir)) {
        (Some(basename), Some(destination)) => Ok((basename, destination)),
        _ => Err(RtasError::InvalidUnit {
            label: namespace.phase_label(phase),
            reason: format!("'{}' has no file name", spec.source.display()),
        }),
    }
}

fn put_file(transport: SharedTransport, local: PathBuf, remote: String) -> Action {
    Action::new("ship_file", move || {
        let transport = transport.clone();
        let local = local.clone();
        let remote = remote.clone();
        async move {
            transport.put(&local, &remote).await.map_err(|e| {
                debug!(host = %transport.host(), file = %local.display(), error = %e, "ship failed");
                ActionError::from(e)
            })?;
            Ok(Value::String(remote))
        }
    })
}

fn get_file(
    transport: SharedTransport,
    tracker: Arc<crate::transport::FingerprintTracker>,
    remote: String,
    local: PathBuf,
    fingerprinted: Vec<String>,
) -> Action {
    Action::new("fetch_file", move || {
        let transport = transport.clone();
        let tracker = Arc::clone(&tracker);
        let remote = remote.clone();
        let local = local.clone();
        let fingerprinted = fingerprinted.clone();
        async move {
            transport.get(&remote, &local).await.map_err(|e| {
                debug!(host = %transport.host(), file = %remote, error = %e, "fetch failed");
                ActionError::from(e)
            })?;
            if let Err(e) = tracker.record(transport.as_ref(), &fingerprinted).await {
                warn!(host = %transport.host(), file = %remote, error = %e, "could not record fingerprint");
            }
            Ok(Value::String(local.to_string_lossy().into_owned()))
        }
    })
}

fn run_steps(
    transport: SharedTransport,
    service: crate::rpc::ServiceSlot,
    label: Label,
    steps: Vec<RemoteStep>,
) -> Action {
    let name = match steps.as_slice() {
        [single] => single.describe(),
        _ => "remote_step".to_string(),
    };
    Action::new(name, move || {
        let transport = transport.clone();
        let service = service.clone();
        let label = label.clone();
        let steps = steps.clone();
        async move {
            let mut outputs = Vec::with_capacity(steps.len());
            for step in &steps {
                outputs.push(step.execute(&transport, &service, &label).await?);
            }
            Ok(if outputs.len() == 1 {
                outputs.swap_remove(0)
            } else {
                Value::Array(outputs)
            })
        }
    })
}

fn remove_local(path: PathBuf) -> Action {
    Action::new("clean_local", move || {
        let path = path.clone();
        async move {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    info!(file = %path.display(), "local file removed");
                    Ok(Value::Null)
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Value::Null),
                Err(e) => Err(ActionError::Io(e)),
            }
        }
    })
}

fn remove_remote(transport: SharedTransport, path: String) -> Action {
    Action::new("clean_remote", move || {
        let transport = transport.clone();
        let path = path.clone();
        async move {
            let output = transport.run(&format!("rm -f {}", shell_quote(&path))).await?;
            if output.is_clean() {
                info!(host = %transport.host(), file = %path, "remote file removed");
            } else {
                debug!(host = %transport.host(), file = %path, stderr = %output.stderr.trim(), "failed to remove remote file");
            }
            Ok(Value::Null)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskStatus;
    use crate::testing::{InMemoryTransport, SequentialRunner, TransportCall};
    use pretty_assertions::assert_eq;

    const NONE: [&str; 0] = [];

    fn rtas_with(transport: InMemoryTransport) -> Rtas {
        let mut rtas = Rtas::new("h1");
        rtas.add_identity("root", Arc::new(transport), true);
        rtas.begin_super("deploy", NONE).unwrap();
        rtas
    }

    #[test]
    fn test_builders_require_super() {
        let mut rtas = Rtas::new("h1");
        let result = rtas.local_pre(Action::noop("prep"), TaskDirectives::new());
        assert!(matches!(result, Err(RtasError::NoSuperSequence { .. })));
    }

    #[test]
    fn test_remote_modes_are_exclusive() {
        let mut rtas = rtas_with(InMemoryTransport::new("h1", "root"));
        rtas.remote_step(["uptime"], TaskDirectives::new()).unwrap();
        let err = rtas
            .append_remote_step("a", "ls", TaskDirectives::new())
            .unwrap_err();
        assert!(matches!(err, RtasError::RemoteModeConflict { existing: "fixed", .. }));

        let mut rtas = rtas_with(InMemoryTransport::new("h1", "root"));
        rtas.append_remote_step("a", "ls", TaskDirectives::new()).unwrap();
        let err = rtas.remote_step(["uptime"], TaskDirectives::new()).unwrap_err();
        assert!(matches!(err, RtasError::RemoteModeConflict { existing: "iterator", .. }));
    }

    #[test]
    fn test_finalized_iterator_rejects_appends() {
        let mut rtas = rtas_with(InMemoryTransport::new("h1", "root"));
        rtas.append_remote_step("a", "ls", TaskDirectives::new()).unwrap();
        assert_eq!(
            rtas.finalize_remote_steps().unwrap(),
            Some(Label::from("deploy:h1:remote_step"))
        );
        assert_eq!(rtas.finalize_remote_steps().unwrap(), None);
        assert!(matches!(
            rtas.append_remote_step("b", "ls", TaskDirectives::new()),
            Err(RtasError::RemoteStepsFinalized { .. })
        ));
    }

    #[test]
    fn test_duplicate_basenames_rejected() {
        let mut rtas = rtas_with(InMemoryTransport::new("h1", "root"));
        let err = rtas
            .ship_files(["/a/app.conf", "/b/app.conf"], "/etc", TaskDirectives::new())
            .unwrap_err();
        assert!(matches!(err, RtasError::DuplicateLabel(ref l) if l.as_str() == "deploy:h1:ship_file:app.conf"));

        let err = rtas
            .append_remote_step("same", "ls", TaskDirectives::new())
            .and_then(|()| rtas.append_remote_step("same", "pwd", TaskDirectives::new()))
            .unwrap_err();
        assert!(matches!(err, RtasError::DuplicateLabel(_)));
    }

    #[test]
    fn test_remote_builders_need_identity() {
        let mut rtas = Rtas::new("h1");
        rtas.begin_super("deploy", NONE).unwrap();
        assert!(matches!(
            rtas.remote_step(["ls"], TaskDirectives::new()),
            Err(RtasError::NoActiveIdentity { .. })
        ));
        // Local phases do not touch the host.
        assert!(rtas.local_pre(Action::noop("prep"), TaskDirectives::new()).is_ok());
    }

    #[test]
    fn test_empty_inputs_are_noops() {
        let mut rtas = rtas_with(InMemoryTransport::new("h1", "root"));
        rtas.ship_files(Vec::<FileSpec>::new(), "/tmp", TaskDirectives::new()).unwrap();
        rtas.remote_step(Vec::<RemoteStep>::new(), TaskDirectives::new()).unwrap();
        rtas.fetch_files(Vec::<FileSpec>::new(), TaskDirectives::new()).unwrap();

        let units = rtas.drain().unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].label().as_str(), "deploy:h1:rtas");
    }

    #[test]
    fn test_second_call_overwrites() {
        let mut rtas = rtas_with(InMemoryTransport::new("h1", "root"));
        rtas.ship_files(["/src/a.txt"], "/tmp", TaskDirectives::new()).unwrap();
        rtas.ship_files(["/src/b.txt"], "/tmp", TaskDirectives::new()).unwrap();

        let labels: Vec<String> = rtas
            .drain()
            .unwrap()
            .iter()
            .map(|u| u.label().to_string())
            .collect();
        assert!(labels.contains(&"deploy:h1:ship_file:b.txt".to_string()));
        assert!(!labels.contains(&"deploy:h1:ship_file:a.txt".to_string()));
    }

    #[test]
    fn test_aborted_host_schedules_nothing() {
        let mut rtas = rtas_with(InMemoryTransport::new("h1", "root"));
        rtas.guard()
            .abort(&Label::from("deploy:h1:ship_file:a"), &ActionError::Connection("x".to_string()));

        rtas.remote_step(["touch done"], TaskDirectives::new()).unwrap();
        rtas.local_post(Action::noop("post"), TaskDirectives::new()).unwrap();

        let units = rtas.drain().unwrap();
        assert_eq!(units.len(), 1);
        assert!(units[0].action().is_some());
    }

    #[test]
    fn test_remote_directives_become_predicates() {
        let mut rtas = rtas_with(InMemoryTransport::new("h1", "root"));
        rtas.remote_step(
            ["make install"],
            TaskDirectives::new()
                .targets(["/opt/app/bin/app"])
                .file_dep(["/opt/app/src/main.c"])
                .local_file_dep(["./Makefile"])
                .run_once(),
        )
        .unwrap();

        let units = rtas.drain().unwrap();
        let remote = units
            .iter()
            .find(|u| u.label().as_str() == "deploy:h1:remote_step")
            .unwrap();
        let names: Vec<&str> = remote.up_to_date().iter().map(UpToDate::name).collect();
        assert_eq!(
            names,
            vec!["run_once", "remote_paths_exist", "remote_fingerprint_unchanged"]
        );
        assert_eq!(remote.declared_inputs(), &[PathBuf::from("./Makefile")]);
        assert!(remote.declared_outputs().is_empty());
    }

    #[test]
    fn test_fetch_outputs_feed_local_post() {
        let mut rtas = rtas_with(InMemoryTransport::new("h1", "root"));
        rtas.fetch_files_into(["/var/log/app.log"], "/tmp/logs", TaskDirectives::new())
            .unwrap();
        rtas.local_post(
            Action::noop("summarise"),
            TaskDirectives::new().file_dep(["/tmp/config.json"]),
        )
        .unwrap();

        let units = rtas.drain().unwrap();
        let post = units
            .iter()
            .find(|u| u.label().as_str() == "deploy:h1:local_step_post")
            .unwrap();
        assert_eq!(
            post.declared_inputs(),
            &[PathBuf::from("/tmp/config.json"), PathBuf::from("/tmp/logs/app.log")]
        );
    }

    #[test]
    fn test_cleanup_flags_add_teardowns() {
        let mut rtas = rtas_with(InMemoryTransport::new("h1", "root"));
        rtas.ship_files(
            [FileSpec::new("/src/run.sh").clean_local().clean_remote()],
            "/tmp",
            TaskDirectives::new(),
        )
        .unwrap();

        let units = rtas.drain().unwrap();
        let ship = units
            .iter()
            .find(|u| u.label().as_str() == "deploy:h1:ship_file:run.sh")
            .unwrap();
        let names: Vec<&str> = ship.teardown().iter().map(Action::name).collect();
        assert_eq!(names, vec!["clean_local", "clean_remote"]);
    }

    fn puts_to(transport: &InMemoryTransport) -> Vec<String> {
        transport
            .journal()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Put { remote, .. } => Some(remote),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_ship_directives_reach_file_units() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("app.conf");
        let schema = dir.path().join("schema.sql");
        std::fs::write(&source, "port=1").unwrap();
        std::fs::write(&schema, "create table t;").unwrap();

        let transport = Arc::new(InMemoryTransport::new("h1", "root"));
        let mut rtas = Rtas::new("h1");
        rtas.add_identity("root", transport.clone(), true);
        rtas.begin_super("deploy", NONE).unwrap();
        rtas.ship_files(
            [source.clone()],
            "/etc/app",
            TaskDirectives::new()
                .targets(["/etc/app/.reloaded"])
                .file_dep([schema.clone()])
                .doc("push app config"),
        )
        .unwrap();
        let units = rtas.drain().unwrap();

        let unit = &units[0];
        assert_eq!(unit.declared_inputs(), &[source.clone(), schema]);
        assert_eq!(
            unit.doc(),
            Some(format!("push app config: {}", source.display()).as_str())
        );

        // The file exists remotely but the extra target does not: ship again.
        let runner = SequentialRunner::new();
        runner.run_units(units.clone()).await.unwrap();
        let again = runner.run_units(units.clone()).await.unwrap();
        assert_eq!(again.status("deploy:h1:ship_file:app.conf"), TaskStatus::Ok);
        assert_eq!(puts_to(&transport).len(), 2);

        transport.write_remote_file("/etc/app/.reloaded", "");
        let settled = runner.run_units(units).await.unwrap();
        assert_eq!(settled.status("deploy:h1:ship_file:app.conf"), TaskStatus::UpToDate);
        assert_eq!(puts_to(&transport).len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_directives_reach_file_units() {
        let dir = tempfile::tempdir().unwrap();
        let summary = dir.path().join("summary.txt");
        let transport = Arc::new(
            InMemoryTransport::new("h1", "root")
                .with_remote_file("/var/log/app.log", "ok\n")
                .with_remote_file("/var/log/app.idx", "1\n"),
        );
        let mut rtas = Rtas::new("h1");
        rtas.add_identity("root", transport.clone(), true);
        rtas.begin_super("collect", NONE).unwrap();
        rtas.fetch_files_into(
            ["/var/log/app.log"],
            dir.path(),
            TaskDirectives::new()
                .targets([summary.clone()])
                .file_dep(["/var/log/app.idx"])
                .local_file_dep(["/etc/collect.toml"]),
        )
        .unwrap();
        let units = rtas.drain().unwrap();

        let unit = &units[0];
        assert_eq!(
            unit.declared_outputs(),
            &[dir.path().join("app.log"), summary.clone()]
        );
        assert_eq!(unit.declared_inputs(), &[PathBuf::from("/etc/collect.toml")]);

        let runner = SequentialRunner::new();
        runner.run_units(units.clone()).await.unwrap();
        assert!(rtas.fingerprints().get("h1", "/var/log/app.idx").is_some());

        std::fs::write(&summary, "done").unwrap();
        let settled = runner.run_units(units.clone()).await.unwrap();
        assert_eq!(settled.status("collect:h1:fetch_file:app.log"), TaskStatus::UpToDate);

        // A change to the extra remote dependency makes the fetch stale.
        transport.write_remote_file("/var/log/app.idx", "2\n");
        let stale = runner.run_units(units).await.unwrap();
        assert_eq!(stale.status("collect:h1:fetch_file:app.log"), TaskStatus::Ok);
    }

    #[tokio::test]
    async fn test_identity_switch_is_not_retroactive() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.txt");
        std::fs::write(&source, "a").unwrap();

        let alice = Arc::new(InMemoryTransport::new("h1", "alice"));
        let bob = Arc::new(InMemoryTransport::new("h1", "bob"));
        let mut rtas = Rtas::new("h1");
        rtas.add_identity("alice", alice.clone(), true);
        rtas.add_identity("bob", bob.clone(), false);
        rtas.begin_super("deploy", NONE).unwrap();

        rtas.ship_files([source.clone()], "/srv", TaskDirectives::new()).unwrap();
        rtas.set_active_identity("bob").unwrap();
        rtas.remote_step(["touch /srv/marker"], TaskDirectives::new()).unwrap();
        let mut units = rtas.drain().unwrap();

        rtas.begin_sub(["again"]).unwrap();
        rtas.ship_files([source], "/opt", TaskDirectives::new()).unwrap();
        units.extend(rtas.drain().unwrap());

        let report = SequentialRunner::new().run_units(units).await.unwrap();
        assert!(report.is_success());

        assert_eq!(puts_to(&alice), vec!["/srv/a.txt"]);
        assert!(alice.commands_run().is_empty());
        assert_eq!(puts_to(&bob), vec!["/opt/a.txt"]);
        assert_eq!(bob.commands_run(), vec!["touch /srv/marker"]);
    }
}
