//! Node status enum.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeStatus {
    /// The node body was never invoked.
    #[default]
    NotRun,
    /// The node completed successfully.
    Succeeded,
    /// The node completed, but some of its work failed.
    SucceededWithErrors,
    /// The node failed.
    Failed,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRun => write!(f, "not_run"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::SucceededWithErrors => write!(f, "succeeded_with_errors"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl NodeStatus {
    /// Returns true if the node body ran.
    #[must_use]
    pub fn has_run(&self) -> bool {
        !matches!(self, Self::NotRun)
    }

    /// Returns true for `Succeeded` and `SucceededWithErrors`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::SucceededWithErrors)
    }

    /// Returns true if the node failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}
