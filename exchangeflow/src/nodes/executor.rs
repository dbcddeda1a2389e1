//! The execution wrapper shared by every node.

use super::Node;
use crate::context::ExecutionContext;
use crate::core::{NodeResult, NodeStatus};
use crate::errors::{NodeError, NodeFault};
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{debug, warn, Instrument};

/// Executes a node: hooks, gate, timer and fault boundary.
///
/// Implemented for every [`Node`]; not meant to be implemented by hand.
#[async_trait]
pub trait NodeExecutor<S: Send + 'static> {
    /// Runs the node and returns its recorded result.
    ///
    /// Body errors and panics are captured on the result. When the node's
    /// effective `throw_on_error` is set they are recorded and then
    /// returned as a [`NodeFault`].
    async fn execute(&self, ctx: &ExecutionContext<S>) -> Result<NodeResult, NodeFault>;
}

#[async_trait]
impl<S, N> NodeExecutor<S> for N
where
    S: Send + 'static,
    N: Node<S> + ?Sized,
{
    async fn execute(&self, ctx: &ExecutionContext<S>) -> Result<NodeResult, NodeFault> {
        self.before_execute(ctx).await;

        if !self.should_execute(ctx).await {
            debug!(node = %self.name(), "Node skipped");
            let result = NodeResult::not_run(self.name());
            self.after_execute(ctx, &result).await;
            return Ok(result);
        }

        let options = self.options().resolve(ctx.options());
        let started_at = Utc::now();
        let timer = Instant::now();
        let body = AssertUnwindSafe(self.perform_execute(ctx))
            .catch_unwind()
            .await;
        let elapsed = timer.elapsed();

        let (status, children, error) = match body {
            Ok(Ok(outcome)) => (outcome.status, outcome.children, None),
            Ok(Err(mut err)) => {
                let completed = err.take_completed();
                (NodeStatus::Failed, completed, Some(err))
            }
            Err(payload) => (
                NodeStatus::Failed,
                Vec::new(),
                Some(NodeError::Panicked(panic_message(payload.as_ref()))),
            ),
        };

        if let Some(ref err) = error {
            warn!(node = %self.name(), error = %err, "Node faulted");
        }

        let result = NodeResult {
            node: self.name().to_string(),
            status,
            error: error.as_ref().map(ToString::to_string),
            started_at: Some(started_at),
            elapsed,
            children,
        };

        self.after_execute(ctx, &result).await;

        match error {
            Some(error) if options.throw_on_error => Err(NodeFault { result, error }),
            _ => Ok(result),
        }
    }
}

/// Runs a root node to completion and records the result tree on the context.
///
/// # Errors
///
/// Returns the root's [`NodeFault`] when a fault propagated out of the tree.
/// The faulted result is still recorded on the context.
pub async fn run_pipeline<S, N>(root: &N, ctx: &ExecutionContext<S>) -> Result<NodeResult, NodeFault>
where
    S: Send + 'static,
    N: Node<S> + ?Sized,
{
    let span = tracing::info_span!("pipeline", root = %root.name(), run = ?ctx.run_label());
    let outcome = root.execute(ctx).instrument(span).await;

    let recorded = match &outcome {
        Ok(result) => result.clone(),
        Err(fault) => fault.result.clone(),
    };
    if ctx.record_result(recorded).is_err() {
        warn!(root = %root.name(), "Context already holds a completed run; result not recorded");
    }
    outcome
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
