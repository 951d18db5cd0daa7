//! Task labels and pipeline namespaces.
//!
//! Labels are colon-delimited strings of the form `namespace:phase[:qualifier]`.
//! The namespace always embeds the host identifier and the nesting path, so
//! units from different pipeline instances never collide.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use super::Phase;

/// Reserved suffix of the unit meaning "all phases of this instance done".
pub const TERMINAL_SUFFIX: &str = "rtas";

/// A unique task label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    /// Creates a label from a raw string.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Returns the label as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this label belongs to `namespace` or one of its children.
    #[must_use]
    pub fn is_within(&self, namespace: &Namespace) -> bool {
        self.0
            .strip_prefix(namespace.as_str())
            .is_some_and(|rest| rest.starts_with(':'))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Label {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Label {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for Label {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Label {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// The label prefix shared by every unit of one pipeline instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    /// Creates the namespace of a super sequence: `name:host[:qualifiers]`.
    #[must_use]
    pub fn root<I>(name: &str, host: &str, qualifiers: I) -> Self
    where
        I: IntoIterator,
        I::Item: fmt::Display,
    {
        let base = format!("{name}:{host}");
        match join_qualifiers(qualifiers) {
            Some(q) => Self(format!("{base}:{q}")),
            None => Self(base),
        }
    }

    /// Creates a child namespace: `self:qualifiers`.
    ///
    /// Qualifiers are joined with `_`; an empty list yields `self:sub`.
    #[must_use]
    pub fn child<I>(&self, qualifiers: I) -> Self
    where
        I: IntoIterator,
        I::Item: fmt::Display,
    {
        let q = join_qualifiers(qualifiers).unwrap_or_else(|| "sub".to_string());
        Self(format!("{}:{q}", self.0))
    }

    /// Returns the namespace as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Label of a phase's group (or single) unit.
    #[must_use]
    pub fn phase_label(&self, phase: Phase) -> Label {
        Label(format!("{}:{}", self.0, phase.group_name()))
    }

    /// Label of a per-item unit within a phase.
    #[must_use]
    pub fn item_label(&self, phase: Phase, qualifier: &str) -> Label {
        Label(format!("{}:{}:{qualifier}", self.0, phase.item_name()))
    }

    /// Label of this instance's terminal unit.
    #[must_use]
    pub fn terminal(&self) -> Label {
        Label(format!("{}:{TERMINAL_SUFFIX}", self.0))
    }

    /// Returns true if `other` is nested under this namespace.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        other
            .0
            .strip_prefix(self.0.as_str())
            .is_some_and(|rest| rest.starts_with(':'))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn join_qualifiers<I>(qualifiers: I) -> Option<String>
where
    I: IntoIterator,
    I::Item: fmt::Display,
{
    let joined = qualifiers
        .into_iter()
        .map(|q| q.to_string())
        .collect::<Vec<_>>()
        .join("_");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_QUALIFIERS: [&str; 0] = [];

    #[test]
    fn test_root_namespace() {
        let ns = Namespace::root("deploy", "10.0.0.5", NO_QUALIFIERS);
        assert_eq!(ns.as_str(), "deploy:10.0.0.5");

        let ns = Namespace::root("deploy", "10.0.0.5", ["rack", "2"]);
        assert_eq!(ns.as_str(), "deploy:10.0.0.5:rack_2");
    }

    #[test]
    fn test_child_namespace_is_prefixed() {
        let root = Namespace::root("deploy", "h1", NO_QUALIFIERS);
        let child = root.child(["worker_id:0"]);
        assert_eq!(child.as_str(), "deploy:h1:worker_id:0");
        assert!(root.contains(&child));
        assert!(child.terminal().is_within(&root));
    }

    #[test]
    fn test_phase_labels() {
        let ns = Namespace::root("deploy", "h1", NO_QUALIFIERS);
        assert_eq!(ns.phase_label(Phase::ShipFiles).as_str(), "deploy:h1:ship_files");
        assert_eq!(
            ns.item_label(Phase::ShipFiles, "a.txt").as_str(),
            "deploy:h1:ship_file:a.txt"
        );
        assert_eq!(ns.terminal().as_str(), "deploy:h1:rtas");
    }

    #[test]
    fn test_prefix_match_requires_separator() {
        let ns = Namespace::root("deploy", "h1", NO_QUALIFIERS);
        assert!(!Label::from("deploy:h10:rtas").is_within(&ns));
        assert!(Label::from("deploy:h1:rtas").is_within(&ns));
    }

    #[test]
    fn test_label_serializes_transparently() {
        let label = Label::from("a:b");
        assert_eq!(serde_json::to_string(&label).unwrap(), r#""a:b""#);
    }
}
