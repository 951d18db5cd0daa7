//! Hierarchy registry: the super sequence of a host and its sub sequences.

use chrono::{DateTime, Utc};

use crate::core::{Label, Namespace};

/// One sequence registered in a hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceInfo {
    /// The sequence namespace.
    pub namespace: Namespace,
    /// Its terminal label.
    pub terminal: Label,
    /// The super namespace, for sub sequences.
    pub parent: Option<Namespace>,
    /// When the sequence was begun.
    pub began_at: DateTime<Utc>,
}

/// The super sequence of one host and every sub sequence nested under it.
#[derive(Debug, Clone)]
pub struct HierarchyRegistry {
    root: SequenceInfo,
    subs: Vec<SequenceInfo>,
}

impl HierarchyRegistry {
    /// Creates a registry rooted at a super namespace.
    #[must_use]
    pub fn new(super_namespace: Namespace) -> Self {
        Self {
            root: SequenceInfo {
                terminal: super_namespace.terminal(),
                namespace: super_namespace,
                parent: None,
                began_at: Utc::now(),
            },
            subs: Vec::new(),
        }
    }

    /// Returns the super sequence.
    #[must_use]
    pub fn root(&self) -> &SequenceInfo {
        &self.root
    }

    /// Returns the super sequence's terminal label.
    #[must_use]
    pub fn super_terminal(&self) -> &Label {
        &self.root.terminal
    }

    /// Registers a sub sequence. Returns false if it is already known.
    pub fn register_sub(&mut self, namespace: Namespace) -> bool {
        if self.contains(&namespace) {
            return false;
        }
        self.subs.push(SequenceInfo {
            terminal: namespace.terminal(),
            namespace,
            parent: Some(self.root.namespace.clone()),
            began_at: Utc::now(),
        });
        true
    }

    /// Returns true if the namespace is the super or a registered sub sequence.
    #[must_use]
    pub fn contains(&self, namespace: &Namespace) -> bool {
        self.root.namespace == *namespace || self.subs.iter().any(|s| s.namespace == *namespace)
    }

    /// Returns the sub sequences in registration order.
    #[must_use]
    pub fn subs(&self) -> &[SequenceInfo] {
        &self.subs
    }

    /// Returns the super terminal followed by every sub terminal.
    #[must_use]
    pub fn labels(&self) -> Vec<Label> {
        std::iter::once(&self.root)
            .chain(self.subs.iter())
            .map(|s| s.terminal.clone())
            .collect()
    }

    /// Returns the number of sequences, super included.
    #[must_use]
    pub fn len(&self) -> usize {
        1 + self.subs.len()
    }

    /// Always false: a registry holds at least its super sequence.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: [&str; 0] = [];

    #[test]
    fn test_labels_union() {
        let root = Namespace::root("deploy", "h1", NONE);
        let mut registry = HierarchyRegistry::new(root.clone());

        assert!(registry.register_sub(root.child(["worker", "0"])));
        assert!(registry.register_sub(root.child(["worker", "1"])));
        assert!(!registry.register_sub(root.child(["worker", "1"])));

        let labels: Vec<String> = registry.labels().iter().map(ToString::to_string).collect();
        assert_eq!(
            labels,
            vec!["deploy:h1:rtas", "deploy:h1:worker_0:rtas", "deploy:h1:worker_1:rtas"]
        );
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.subs()[0].parent.as_ref(), Some(&root));
    }

    #[test]
    fn test_root_is_contained() {
        let root = Namespace::root("deploy", "h1", NONE);
        let registry = HierarchyRegistry::new(root.clone());
        assert!(registry.contains(&root));
        assert_eq!(registry.super_terminal().as_str(), "deploy:h1:rtas");
    }
}
