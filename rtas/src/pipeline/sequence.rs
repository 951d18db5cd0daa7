//! The per-host pipeline instance and its namespace hierarchy.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::RtasConfig;
use crate::core::{Label, Namespace, TaskUnitBuilder};
use crate::errors::RtasError;
use crate::guard::{AbortCause, FailureGuard, OutcomeLog};
use crate::hierarchy::HierarchyRegistry;
use crate::rpc::ServiceSlot;
use crate::transport::{FingerprintTracker, IdentitySet, SharedTransport, SshTransport};

/// Units staged for a per-item phase (ship or fetch).
#[derive(Debug, Default)]
pub(super) struct ItemPhase {
    pub(super) items: Vec<TaskUnitBuilder>,
    /// Local paths written by a fetch phase.
    pub(super) local_paths: Vec<PathBuf>,
}

/// The remote phase is either one fixed unit or an additive chain.
#[derive(Debug)]
pub(super) enum RemoteSlot {
    Fixed(TaskUnitBuilder),
    Iter {
        steps: Vec<TaskUnitBuilder>,
        finalized: bool,
    },
}

/// The five phase slots of the current namespace.
#[derive(Debug, Default)]
pub(super) struct PhaseSlots {
    pub(super) local_pre: Option<TaskUnitBuilder>,
    pub(super) ship: Option<ItemPhase>,
    pub(super) remote: Option<RemoteSlot>,
    pub(super) fetch: Option<ItemPhase>,
    pub(super) local_post: Option<TaskUnitBuilder>,
}

impl PhaseSlots {
    pub(super) fn is_empty(&self) -> bool {
        self.local_pre.is_none()
            && self.ship.is_none()
            && self.remote.is_none()
            && self.fetch.is_none()
            && self.local_post.is_none()
    }
}

/// State of the namespace currently being built.
#[derive(Debug)]
pub(super) struct Scope {
    pub(super) hierarchy: HierarchyRegistry,
    pub(super) namespace: Namespace,
    /// Labels the first unit of the namespace depends on.
    pub(super) entry: BTreeSet<Label>,
    pub(super) slots: PhaseSlots,
    pub(super) drained: bool,
}

/// A remote task action sequence: one host's five-phase pipeline.
///
/// Build it with the phase builders, then [`Rtas::drain`] it into task
/// units. The guard, outcome log, fingerprints, and service slot are shared
/// with every unit the instance emits.
pub struct Rtas {
    host: String,
    identities: IdentitySet,
    guard: Arc<FailureGuard>,
    fingerprints: Arc<FingerprintTracker>,
    service: ServiceSlot,
    fetch_dir: PathBuf,
    batch_entry: BTreeSet<Label>,
    pub(super) scope: Option<Scope>,
}

impl Rtas {
    /// Creates a pipeline instance for a host with no identities.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            guard: Arc::new(FailureGuard::new(host.clone())),
            host,
            identities: IdentitySet::new(),
            fingerprints: Arc::new(FingerprintTracker::new()),
            service: ServiceSlot::new(),
            fetch_dir: PathBuf::from("/tmp"),
            batch_entry: BTreeSet::new(),
            scope: None,
        }
    }

    /// Creates an instance with an SSH identity for the configured user.
    #[must_use]
    pub fn from_config(host: impl Into<String>, config: &RtasConfig) -> Self {
        let host = host.into();
        let transport = SshTransport::new(host.clone(), config.ssh.clone());
        let mut rtas = Self::new(host).with_fetch_dir(config.fetch_dir.clone());
        rtas.add_identity(config.ssh.user.clone(), Arc::new(transport), true);
        rtas
    }

    /// Sets the default local directory for fetched files.
    #[must_use]
    pub fn with_fetch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fetch_dir = dir.into();
        self
    }

    /// Shares a fingerprint tracker, e.g. one loaded from disk.
    #[must_use]
    pub fn with_fingerprints(mut self, tracker: Arc<FingerprintTracker>) -> Self {
        self.fingerprints = tracker;
        self
    }

    /// Returns the host identifier.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Registers a transport identity.
    pub fn add_identity(
        &mut self,
        name: impl Into<String>,
        transport: SharedTransport,
        make_active: bool,
    ) {
        let name = name.into();
        debug!(host = %self.host, identity = %name, make_active, "identity registered");
        self.identities.add(name, transport, make_active);
    }

    /// Switches the identity used by units built from now on.
    pub fn set_active_identity(&mut self, name: &str) -> Result<(), RtasError> {
        if self.identities.set_active(name) {
            Ok(())
        } else {
            Err(RtasError::UnknownIdentity {
                host: self.host.clone(),
                identity: name.to_string(),
            })
        }
    }

    /// Returns the active identity's name.
    #[must_use]
    pub fn active_identity(&self) -> Option<&str> {
        self.identities.active_name()
    }

    /// Returns the registered identities.
    #[must_use]
    pub fn identities(&self) -> &IdentitySet {
        &self.identities
    }

    /// Returns the failure guard.
    #[must_use]
    pub fn guard(&self) -> &Arc<FailureGuard> {
        &self.guard
    }

    /// Returns true once an action of this host has failed.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.guard.is_aborted()
    }

    /// Returns what aborted the host.
    #[must_use]
    pub fn abort_cause(&self) -> Option<AbortCause> {
        self.guard.cause()
    }

    /// Returns the per-label outcome log.
    #[must_use]
    pub fn outcomes(&self) -> &OutcomeLog {
        self.guard.outcomes()
    }

    /// Returns the remote fingerprint tracker.
    #[must_use]
    pub fn fingerprints(&self) -> &Arc<FingerprintTracker> {
        &self.fingerprints
    }

    /// Returns the execution service slot.
    #[must_use]
    pub fn service(&self) -> &ServiceSlot {
        &self.service
    }

    /// Returns the default fetch directory.
    #[must_use]
    pub fn fetch_dir(&self) -> &Path {
        &self.fetch_dir
    }

    /// Returns the namespace currently being built.
    #[must_use]
    pub fn namespace(&self) -> Option<&Namespace> {
        self.scope.as_ref().map(|s| &s.namespace)
    }

    /// Returns the terminal label of the namespace currently being built.
    #[must_use]
    pub fn terminal_label(&self) -> Option<Label> {
        self.namespace().map(Namespace::terminal)
    }

    /// Returns the hierarchy of the current super sequence.
    #[must_use]
    pub fn hierarchy(&self) -> Option<&HierarchyRegistry> {
        self.scope.as_ref().map(|s| &s.hierarchy)
    }

    /// Returns the terminal labels of the super sequence and all its subs.
    #[must_use]
    pub fn hierarchy_labels(&self) -> Vec<Label> {
        self.hierarchy().map(HierarchyRegistry::labels).unwrap_or_default()
    }

    /// Returns true if the current namespace has not been drained yet.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.scope.as_ref().is_some_and(|s| !s.drained)
    }

    /// Resets into a fresh super namespace `name:host[:qualifiers]`.
    ///
    /// Clears the abort flag and starts a new hierarchy. Inside a batch the
    /// first unit of the namespace depends on the batch's root-enter unit.
    pub fn begin_super<I>(&mut self, name: &str, qualifiers: I) -> Result<(), RtasError>
    where
        I: IntoIterator,
        I::Item: fmt::Display,
    {
        if name.trim().is_empty() {
            return Err(RtasError::EmptyName);
        }

        let namespace = Namespace::root(name, &self.host, qualifiers);
        self.guard.reset();
        info!(host = %self.host, namespace = %namespace, "super sequence begun");

        self.scope = Some(Scope {
            hierarchy: HierarchyRegistry::new(namespace.clone()),
            namespace,
            entry: self.batch_entry.clone(),
            slots: PhaseSlots::default(),
            drained: false,
        });
        Ok(())
    }

    /// Anchors super sequences begun from now on under a batch entry unit.
    pub(crate) fn set_batch_entry(&mut self, entry: Option<Label>) {
        self.batch_entry = entry.into_iter().collect();
    }

    /// Resets the phase slots into a child namespace of the super sequence.
    ///
    /// The child's first unit depends on the super terminal. The current
    /// namespace must have been drained.
    pub fn begin_sub<I>(&mut self, qualifiers: I) -> Result<(), RtasError>
    where
        I: IntoIterator,
        I::Item: fmt::Display,
    {
        let host = self.host.clone();
        let scope = self
            .scope
            .as_mut()
            .ok_or(RtasError::NoSuperSequence { host: host.clone() })?;

        if !scope.drained {
            return Err(RtasError::UndrainedSequence {
                namespace: scope.namespace.to_string(),
            });
        }

        let namespace = scope.hierarchy.root().namespace.child(qualifiers);
        if !scope.hierarchy.register_sub(namespace.clone()) {
            return Err(RtasError::AlreadyConsumed {
                namespace: namespace.to_string(),
            });
        }

        debug!(host = %host, namespace = %namespace, "sub sequence begun");
        scope.entry = BTreeSet::from([scope.hierarchy.super_terminal().clone()]);
        scope.namespace = namespace;
        scope.slots = PhaseSlots::default();
        scope.drained = false;
        Ok(())
    }

    pub(super) fn scope(&self) -> Result<&Scope, RtasError> {
        self.scope.as_ref().ok_or_else(|| RtasError::NoSuperSequence {
            host: self.host.clone(),
        })
    }

    pub(super) fn scope_mut(&mut self) -> Result<&mut Scope, RtasError> {
        let host = self.host.clone();
        self.scope
            .as_mut()
            .ok_or(RtasError::NoSuperSequence { host })
    }

    pub(super) fn active_transport(&self) -> Result<SharedTransport, RtasError> {
        self.identities
            .active()
            .cloned()
            .ok_or_else(|| RtasError::NoActiveIdentity {
                host: self.host.clone(),
            })
    }
}

impl fmt::Debug for Rtas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rtas")
            .field("host", &self.host)
            .field("active_identity", &self.active_identity())
            .field("namespace", &self.namespace())
            .field("aborted", &self.is_aborted())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ActionError;
    use crate::testing::InMemoryTransport;

    const NONE: [&str; 0] = [];

    #[test]
    fn test_unknown_identity_is_error() {
        let mut rtas = Rtas::new("h1");
        rtas.add_identity("adming", Arc::new(InMemoryTransport::new("h1", "adming")), true);

        assert!(rtas.set_active_identity("adming").is_ok());
        assert!(matches!(
            rtas.set_active_identity("root"),
            Err(RtasError::UnknownIdentity { .. })
        ));
    }

    #[test]
    fn test_begin_sub_requires_super() {
        let mut rtas = Rtas::new("h1");
        assert!(matches!(
            rtas.begin_sub(["x"]),
            Err(RtasError::NoSuperSequence { .. })
        ));
    }

    #[test]
    fn test_begin_sub_requires_drain() {
        let mut rtas = Rtas::new("h1");
        rtas.begin_super("deploy", NONE).unwrap();
        assert!(matches!(
            rtas.begin_sub(["x"]),
            Err(RtasError::UndrainedSequence { .. })
        ));
    }

    #[test]
    fn test_sub_namespace_and_hierarchy() {
        let mut rtas = Rtas::new("h1");
        rtas.begin_super("deploy", NONE).unwrap();
        rtas.drain().unwrap();
        rtas.begin_sub(["worker", "3"]).unwrap();

        assert_eq!(rtas.namespace().map(Namespace::as_str), Some("deploy:h1:worker_3"));
        assert_eq!(
            rtas.hierarchy_labels(),
            vec![Label::from("deploy:h1:rtas"), Label::from("deploy:h1:worker_3:rtas")]
        );

        rtas.drain().unwrap();
        assert!(matches!(
            rtas.begin_sub(["worker", "3"]),
            Err(RtasError::AlreadyConsumed { .. })
        ));
    }

    #[test]
    fn test_begin_super_clears_abort() {
        let mut rtas = Rtas::new("h1");
        rtas.guard()
            .abort(&Label::from("x"), &ActionError::Connection("down".to_string()));
        assert!(rtas.is_aborted());

        rtas.begin_super("deploy", NONE).unwrap();
        assert!(!rtas.is_aborted());
        assert!(rtas.abort_cause().is_none());
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut rtas = Rtas::new("h1");
        assert!(matches!(rtas.begin_super("  ", NONE), Err(RtasError::EmptyName)));
    }

    #[test]
    fn test_from_config_registers_ssh_identity() {
        let config = RtasConfig::default().with_fetch_dir("/var/fetch");
        let rtas = Rtas::from_config("10.0.0.7", &config);
        assert_eq!(rtas.active_identity(), Some("root"));
        assert_eq!(rtas.fetch_dir(), Path::new("/var/fetch"));
    }
}
