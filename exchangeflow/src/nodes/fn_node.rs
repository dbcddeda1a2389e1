//! Closure-backed leaf nodes.

use super::Node;
use crate::context::ExecutionContext;
use crate::core::{NodeOptions, NodeOutcome, NodeStatus};
use crate::errors::NodeError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::marker::PhantomData;

/// A leaf node whose body is a synchronous closure over the subject.
///
/// The subject lock is held for the duration of the closure.
pub struct FnNode<S, F> {
    name: String,
    options: NodeOptions,
    func: F,
    _subject: PhantomData<fn(S)>,
}

impl<S, F> FnNode<S, F>
where
    F: Fn(&mut S) -> Result<NodeStatus, NodeError> + Send + Sync,
{
    /// Creates a new function-based node.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            options: NodeOptions::inherit(),
            func,
            _subject: PhantomData,
        }
    }

    /// Sets local option overrides.
    #[must_use]
    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }
}

impl<S, F> Debug for FnNode<S, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnNode").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<S, F> Node<S> for FnNode<S, F>
where
    S: Send + 'static,
    F: Fn(&mut S) -> Result<NodeStatus, NodeError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> NodeOptions {
        self.options
    }

    async fn perform_execute(&self, ctx: &ExecutionContext<S>) -> Result<NodeOutcome, NodeError> {
        let mut subject = ctx.subject().await;
        (self.func)(&mut subject).map(NodeOutcome::from)
    }
}
