//! Error types for the orchestrator.
//!
//! Node bodies return [`NodeError`]; collaborators return
//! [`CollaboratorError`]; the dispatch loops and the binary work with
//! [`OrchestratorError`].

use crate::core::NodeResult;
use crate::model::JobState;
use thiserror::Error;

/// The main error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// An external collaborator failed.
    #[error("{0}")]
    Collaborator(#[from] CollaboratorError),

    /// A node fault escaped a pipeline run.
    #[error("{0}")]
    Node(#[from] NodeFault),

    /// A Job state transition was rejected.
    #[error("{0}")]
    Transition(#[from] TransitionError),

    /// A message or record did not match the expected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The in-process hand-off channel is closed.
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the table, blob, queue, catalog and file-store clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// The requested record or blob does not exist.
    #[error("{kind} '{key}' not found")]
    NotFound {
        /// What was looked up (e.g. "table row", "blob").
        kind: &'static str,
        /// The key that was missing.
        key: String,
    },

    /// An insert collided with an existing record.
    #[error("{kind} '{key}' already exists")]
    AlreadyExists {
        /// What was inserted.
        kind: &'static str,
        /// The colliding key.
        key: String,
    },

    /// An update carried a stale etag.
    #[error("Concurrent modification of '{key}'")]
    Conflict {
        /// The contended key.
        key: String,
    },

    /// The collaborator could not be reached or refused the call.
    #[error("{service} unavailable: {message}")]
    Unavailable {
        /// Which collaborator.
        service: &'static str,
        /// Failure detail.
        message: String,
    },

    /// A stored payload could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CollaboratorError {
    /// Creates an `Unavailable` error.
    #[must_use]
    pub fn unavailable(service: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service,
            message: message.into(),
        }
    }

    /// Returns true if this is a `NotFound`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if this is a `Conflict`.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true if a concurrent writer got there first, either by
    /// inserting the same key or by updating it.
    #[must_use]
    pub fn is_lost_race(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::AlreadyExists { .. })
    }
}

impl From<serde_json::Error> for CollaboratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// A rejected Job state transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Illegal job transition for '{job_id}': {from} -> {to}")]
pub struct TransitionError {
    /// The job.
    pub job_id: String,
    /// Current state.
    pub from: JobState,
    /// Requested state.
    pub to: JobState,
}

/// Errors returned from a node body.
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    /// A collaborator call failed.
    #[error("{0}")]
    Collaborator(#[from] CollaboratorError),

    /// Inbound data did not have the expected shape, or a record was missing.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The subject was not in a state this node can act on.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A Job transition was rejected.
    #[error("{0}")]
    Transition(#[from] TransitionError),

    /// The node body panicked.
    #[error("Node panicked: {0}")]
    Panicked(String),

    /// A child node faulted with `throw_on_error` set.
    #[error("Child '{child}' faulted: {source}")]
    ChildFault {
        /// The faulting child.
        child: String,
        /// The child's error.
        source: Box<NodeError>,
        /// Results recorded before and including the faulting child.
        completed: Vec<NodeResult>,
    },
}

impl NodeError {
    /// Creates a protocol error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Creates an invalid-state error.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Takes the partial child results carried by a `ChildFault`.
    pub fn take_completed(&mut self) -> Vec<NodeResult> {
        match self {
            Self::ChildFault { completed, .. } => std::mem::take(completed),
            _ => Vec::new(),
        }
    }
}

/// A node fault propagated because the effective `throw_on_error` was set.
///
/// The fault is recorded on `result` before it is returned.
#[derive(Debug, Clone, Error)]
#[error("Node '{}' faulted: {error}", result.node)]
pub struct NodeFault {
    /// The recorded result of the faulting node.
    pub result: NodeResult,
    /// The error.
    pub error: NodeError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NodeStatus;

    #[test]
    fn test_collaborator_error_display() {
        let err = CollaboratorError::NotFound {
            kind: "blob",
            key: "jobs/1/summary.json".to_string(),
        };
        assert_eq!(err.to_string(), "blob 'jobs/1/summary.json' not found");
        assert!(err.is_not_found());

        let err = CollaboratorError::unavailable("file store", "timeout");
        assert_eq!(err.to_string(), "file store unavailable: timeout");
        assert!(!err.is_lost_race());
    }

    #[test]
    fn test_lost_race_covers_insert_and_update() {
        let inserted = CollaboratorError::AlreadyExists {
            kind: "table row",
            key: "k".to_string(),
        };
        let updated = CollaboratorError::Conflict { key: "k".to_string() };
        assert!(inserted.is_lost_race());
        assert!(updated.is_lost_race());
        assert!(!inserted.is_conflict());
    }

    #[test]
    fn test_transition_error_display() {
        let err = TransitionError {
            job_id: "j1".to_string(),
            from: JobState::Succeeded,
            to: JobState::Failed,
        };
        assert!(err.to_string().contains("Succeeded -> Failed"));
    }

    #[test]
    fn test_take_completed() {
        let mut err = NodeError::ChildFault {
            child: "b".to_string(),
            source: Box::new(NodeError::protocol("bad")),
            completed: vec![NodeResult::not_run("a")],
        };
        assert_eq!(err.take_completed().len(), 1);
        assert!(err.take_completed().is_empty());
        assert!(NodeError::protocol("x").take_completed().is_empty());
    }

    #[test]
    fn test_node_fault_display() {
        let mut result = NodeResult::not_run("persist");
        result.status = NodeStatus::Failed;
        let fault = NodeFault {
            result,
            error: NodeError::invalid_state("no job"),
        };
        assert_eq!(fault.to_string(), "Node 'persist' faulted: Invalid state: no job");
    }

    #[test]
    fn test_orchestrator_error_from() {
        let err: OrchestratorError = CollaboratorError::unavailable("queue", "down").into();
        assert!(matches!(err, OrchestratorError::Collaborator(_)));
    }
}
