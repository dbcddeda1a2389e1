//! Node results. The result tree mirrors the node tree.

use super::NodeStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a node body reports back to the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOutcome {
    /// Status of the body.
    pub status: NodeStatus,
    /// Results of child nodes (composites only).
    pub children: Vec<NodeResult>,
}

impl NodeOutcome {
    /// Creates an outcome with child results.
    #[must_use]
    pub fn with_children(status: NodeStatus, children: Vec<NodeResult>) -> Self {
        Self { status, children }
    }
}

impl From<NodeStatus> for NodeOutcome {
    fn from(status: NodeStatus) -> Self {
        Self {
            status,
            children: Vec::new(),
        }
    }
}

/// The recorded result of executing one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResult {
    /// Node name.
    pub node: String,
    /// Final status.
    pub status: NodeStatus,
    /// Error message, if the body faulted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When execution started (absent for nodes that never ran).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Wall-clock time spent in the body.
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    /// Child results, in execution order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeResult>,
}

impl NodeResult {
    /// A result for a node whose body was never invoked.
    #[must_use]
    pub fn not_run(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            status: NodeStatus::NotRun,
            error: None,
            started_at: None,
            elapsed: Duration::ZERO,
            children: Vec::new(),
        }
    }

    /// Returns the direct child with the given name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&NodeResult> {
        self.children.iter().find(|c| c.node == name)
    }

    /// Depth-first search for a descendant (or self) by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&NodeResult> {
        if self.node == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// Elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX)
    }

    /// Collects every error message in the tree, depth first.
    #[must_use]
    pub fn errors(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.collect_errors(&mut out);
        out
    }

    fn collect_errors(&self, out: &mut Vec<(String, String)>) {
        if let Some(ref error) = self.error {
            out.push((self.node.clone(), error.clone()));
        }
        for child in &self.children {
            child.collect_errors(out);
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
