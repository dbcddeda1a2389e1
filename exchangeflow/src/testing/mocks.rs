//! Mock nodes for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::context::ExecutionContext;
use crate::core::{NodeOptions, NodeOutcome, NodeStatus};
use crate::errors::{CollaboratorError, NodeError};
use crate::nodes::Node;

/// A node that always succeeds.
#[derive(Debug)]
pub struct SucceedingNode {
    name: String,
}

impl SucceedingNode {
    /// Creates a new succeeding node.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl<S: Send + 'static> Node<S> for SucceedingNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn perform_execute(&self, _ctx: &ExecutionContext<S>) -> Result<NodeOutcome, NodeError> {
        Ok(NodeStatus::Succeeded.into())
    }
}

/// A node whose body always returns a collaborator error.
#[derive(Debug)]
pub struct FailingNode {
    name: String,
    error: String,
    options: NodeOptions,
}

impl FailingNode {
    /// Creates a new failing node.
    #[must_use]
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
            options: NodeOptions::inherit(),
        }
    }

    /// Sets local option overrides.
    #[must_use]
    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl<S: Send + 'static> Node<S> for FailingNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> NodeOptions {
        self.options
    }

    async fn perform_execute(&self, _ctx: &ExecutionContext<S>) -> Result<NodeOutcome, NodeError> {
        Err(CollaboratorError::unavailable("mock", self.error.clone()).into())
    }
}

/// A node that counts body invocations and succeeds.
#[derive(Debug, Default)]
pub struct RecordingNode {
    name: String,
    calls: AtomicUsize,
}

impl RecordingNode {
    /// Creates a new recording node.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns how many times the body ran.
    #[must_use]
    pub fn body_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: Send + 'static> Node<S> for RecordingNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn perform_execute(&self, _ctx: &ExecutionContext<S>) -> Result<NodeOutcome, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(NodeStatus::Succeeded.into())
    }
}

/// A node whose `should_execute` is always false.
#[derive(Debug, Default)]
pub struct SkippedNode {
    inner: RecordingNode,
}

impl SkippedNode {
    /// Creates a new skipped node.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: RecordingNode::new(name),
        }
    }

    /// Returns how many times the body ran (should stay zero).
    #[must_use]
    pub fn body_calls(&self) -> usize {
        self.inner.body_calls()
    }
}

#[async_trait]
impl<S: Send + 'static> Node<S> for SkippedNode {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn should_execute(&self, _ctx: &ExecutionContext<S>) -> bool {
        false
    }

    async fn perform_execute(&self, ctx: &ExecutionContext<S>) -> Result<NodeOutcome, NodeError> {
        self.inner.perform_execute(ctx).await
    }
}

/// A node whose body panics.
#[derive(Debug)]
pub struct PanickingNode {
    name: String,
}

impl PanickingNode {
    /// Creates a new panicking node.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl<S: Send + 'static> Node<S> for PanickingNode {
    fn name(&self) -> &str {
        &self.name
    }

    #[allow(clippy::panic)]
    async fn perform_execute(&self, _ctx: &ExecutionContext<S>) -> Result<NodeOutcome, NodeError> {
        panic!("node body exploded");
    }
}

/// A node that cancels the run and succeeds.
#[derive(Debug)]
pub struct CancellingNode {
    name: String,
}

impl CancellingNode {
    /// Creates a new cancelling node.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl<S: Send + 'static> Node<S> for CancellingNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn perform_execute(&self, ctx: &ExecutionContext<S>) -> Result<NodeOutcome, NodeError> {
        ctx.cancel(format!("cancelled by {}", self.name));
        Ok(NodeStatus::Succeeded.into())
    }
}
