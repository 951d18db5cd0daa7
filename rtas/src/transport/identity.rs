//! Named transport identities with one active at a time.

use std::collections::BTreeMap;

use super::SharedTransport;

/// The transports registered on a pipeline instance.
///
/// Switching the active identity affects only units built afterwards.
#[derive(Debug, Clone, Default)]
pub struct IdentitySet {
    identities: BTreeMap<String, SharedTransport>,
    active: Option<String>,
}

impl IdentitySet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transport under a name, replacing any previous one.
    pub fn add(&mut self, name: impl Into<String>, transport: SharedTransport, make_active: bool) {
        let name = name.into();
        self.identities.insert(name.clone(), transport);
        if make_active || self.active.is_none() {
            self.active = Some(name);
        }
    }

    /// Makes a registered identity active. Returns false if it is unknown.
    pub fn set_active(&mut self, name: &str) -> bool {
        if self.identities.contains_key(name) {
            self.active = Some(name.to_string());
            true
        } else {
            false
        }
    }

    /// Returns the active identity's name.
    #[must_use]
    pub fn active_name(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Returns the active transport.
    #[must_use]
    pub fn active(&self) -> Option<&SharedTransport> {
        self.active.as_ref().and_then(|name| self.identities.get(name))
    }

    /// Returns a transport by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SharedTransport> {
        self.identities.get(name)
    }

    /// Returns the registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.identities.keys().map(String::as_str)
    }

    /// Returns the number of registered identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Returns true if no identity is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}
