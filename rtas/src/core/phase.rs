//! The five pipeline phases.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A phase of a remote task action sequence, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Local preparation before anything touches the host.
    LocalPre,
    /// Upload of local files to the host.
    ShipFiles,
    /// Remote command or remote call execution.
    RemoteStep,
    /// Download of remote files.
    FetchFiles,
    /// Local finalization.
    LocalPost,
}

impl Phase {
    /// All phases in their fixed emission order.
    pub const ORDER: [Self; 5] = [
        Self::LocalPre,
        Self::ShipFiles,
        Self::RemoteStep,
        Self::FetchFiles,
        Self::LocalPost,
    ];

    /// Label segment of the phase's group or single unit.
    #[must_use]
    pub fn group_name(self) -> &'static str {
        match self {
            Self::LocalPre => "local_step_pre",
            Self::ShipFiles => "ship_files",
            Self::RemoteStep => "remote_step",
            Self::FetchFiles => "fetch_files",
            Self::LocalPost => "local_step_post",
        }
    }

    /// Label segment of the phase's per-item units.
    #[must_use]
    pub fn item_name(self) -> &'static str {
        match self {
            Self::ShipFiles => "ship_file",
            Self::FetchFiles => "fetch_file",
            other => other.group_name(),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.group_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_is_sorted() {
        let mut sorted = Phase::ORDER;
        sorted.sort();
        assert_eq!(sorted, Phase::ORDER);
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(Phase::LocalPre.to_string(), "local_step_pre");
        assert_eq!(Phase::FetchFiles.item_name(), "fetch_file");
        assert_eq!(Phase::RemoteStep.item_name(), "remote_step");
    }
}
