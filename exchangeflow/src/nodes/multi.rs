//! Composite nodes: an ordered child list plus a child-execution strategy.

use super::{Node, NodeExecutor};
use crate::context::ExecutionContext;
use crate::core::{aggregate, ExecutionOptions, NodeOptions, NodeOutcome, NodeResult, NodeStatus};
use crate::errors::NodeError;
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// How a [`MultiNode`] dispatches its children.
#[async_trait]
pub trait ChildStrategy<S: Send + 'static>: Send + Sync {
    /// Executes the children and returns one result per child, in
    /// insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::ChildFault`] when a child propagated a fault.
    async fn execute_children(
        &self,
        children: &[Arc<dyn Node<S>>],
        ctx: &ExecutionContext<S>,
        options: ExecutionOptions,
    ) -> Result<Vec<NodeResult>, NodeError>;
}

/// Serial strategy: one child in flight, strictly in order.
///
/// Stops dispatching after a child fails under `continue_on_failure =
/// false`, or once the context is cancelled. Children not dispatched are
/// recorded as `NotRun`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Serial;

#[async_trait]
impl<S: Send + 'static> ChildStrategy<S> for Serial {
    async fn execute_children(
        &self,
        children: &[Arc<dyn Node<S>>],
        ctx: &ExecutionContext<S>,
        options: ExecutionOptions,
    ) -> Result<Vec<NodeResult>, NodeError> {
        let mut results = Vec::with_capacity(children.len());
        let mut halted = false;

        for child in children {
            if !halted && ctx.is_cancelled() {
                debug!(child = %child.name(), reason = ?ctx.cancellation().reason(), "Run cancelled; halting");
                halted = true;
            }
            if halted {
                results.push(NodeResult::not_run(child.name()));
                continue;
            }

            match child.execute(ctx).await {
                Ok(result) => {
                    if result.status == NodeStatus::Failed && !options.continue_on_failure {
                        debug!(child = %child.name(), "Child failed; halting remaining children");
                        halted = true;
                    }
                    results.push(result);
                }
                Err(fault) => {
                    let child_name = fault.result.node.clone();
                    results.push(fault.result);
                    return Err(NodeError::ChildFault {
                        child: child_name,
                        source: Box::new(fault.error),
                        completed: results,
                    });
                }
            }
        }

        Ok(results)
    }
}

/// Parallel strategy: every child in flight at once.
///
/// Shares the aggregation contract with [`Serial`]. Cancellation is only
/// checked before dispatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct Parallel;

#[async_trait]
impl<S: Send + 'static> ChildStrategy<S> for Parallel {
    async fn execute_children(
        &self,
        children: &[Arc<dyn Node<S>>],
        ctx: &ExecutionContext<S>,
        _options: ExecutionOptions,
    ) -> Result<Vec<NodeResult>, NodeError> {
        if ctx.is_cancelled() {
            return Ok(children.iter().map(|c| NodeResult::not_run(c.name())).collect());
        }

        let outcomes = futures::future::join_all(children.iter().map(|c| c.execute(ctx))).await;

        let mut results = Vec::with_capacity(outcomes.len());
        let mut first_fault = None;
        for outcome in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(fault) => {
                    if first_fault.is_none() {
                        first_fault = Some((fault.result.node.clone(), fault.error));
                    }
                    results.push(fault.result);
                }
            }
        }

        match first_fault {
            Some((child, error)) => Err(NodeError::ChildFault {
                child,
                source: Box::new(error),
                completed: results,
            }),
            None => Ok(results),
        }
    }
}

/// A composite node owning an ordered child list.
///
/// Insertion order is execution order. The status is the aggregate of
/// the child statuses under this node's effective options.
pub struct MultiNode<S, X> {
    name: String,
    children: Vec<Arc<dyn Node<S>>>,
    options: NodeOptions,
    strategy: X,
    _subject: PhantomData<fn(S)>,
}

/// The serial pipeline node.
pub type PipelineNode<S> = MultiNode<S, Serial>;

/// The concurrent variant.
pub type ParallelNode<S> = MultiNode<S, Parallel>;

impl<S, X> MultiNode<S, X>
where
    S: Send + 'static,
    X: ChildStrategy<S> + Default,
{
    /// Creates an empty composite.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
            options: NodeOptions::inherit(),
            strategy: X::default(),
            _subject: PhantomData,
        }
    }
}

impl<S, X> MultiNode<S, X>
where
    S: Send + 'static,
    X: ChildStrategy<S>,
{
    /// Appends a child.
    #[must_use]
    pub fn with_child(mut self, child: impl Node<S> + 'static) -> Self {
        self.children.push(Arc::new(child));
        self
    }

    /// Appends a shared child.
    #[must_use]
    pub fn with_shared_child(mut self, child: Arc<dyn Node<S>>) -> Self {
        self.children.push(child);
        self
    }

    /// Appends a child in place.
    pub fn add_child(&mut self, child: Arc<dyn Node<S>>) {
        self.children.push(child);
    }

    /// Sets local option overrides.
    #[must_use]
    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the children in execution order.
    #[must_use]
    pub fn children(&self) -> &[Arc<dyn Node<S>>] {
        &self.children
    }
}

impl<S, X: std::fmt::Debug> std::fmt::Debug for MultiNode<S, X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiNode")
            .field("name", &self.name)
            .field("children", &self.children.len())
            .field("options", &self.options)
            .field("strategy", &self.strategy)
            .finish()
    }
}

#[async_trait]
impl<S, X> Node<S> for MultiNode<S, X>
where
    S: Send + 'static,
    X: ChildStrategy<S>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> NodeOptions {
        self.options
    }

    async fn perform_execute(&self, ctx: &ExecutionContext<S>) -> Result<NodeOutcome, NodeError> {
        let options = self.options.resolve(ctx.options());
        let results = self
            .strategy
            .execute_children(&self.children, ctx, options)
            .await?;
        let statuses: Vec<NodeStatus> = results.iter().map(|r| r.status).collect();
        Ok(NodeOutcome::with_children(aggregate(&statuses, options), results))
    }
}
