//! The node trait.

use crate::context::ExecutionContext;
use crate::core::{NodeOptions, NodeOutcome, NodeResult};
use crate::errors::NodeError;
use crate::events::NodeEvent;
use async_trait::async_trait;

/// A unit of executable work over a subject `S`.
///
/// Implementors provide [`perform_execute`](Node::perform_execute); callers
/// go through [`NodeExecutor::execute`](super::NodeExecutor::execute), which
/// wraps the body with the hooks, the `should_execute` gate, timing and the
/// fault boundary.
#[async_trait]
pub trait Node<S: Send + 'static>: Send + Sync {
    /// Returns the name of the node.
    fn name(&self) -> &str;

    /// Local option overrides; unset fields inherit the context's options.
    fn options(&self) -> NodeOptions {
        NodeOptions::inherit()
    }

    /// Decides whether the body runs. A `false` records `NotRun`.
    async fn should_execute(&self, _ctx: &ExecutionContext<S>) -> bool {
        true
    }

    /// The node body.
    async fn perform_execute(&self, ctx: &ExecutionContext<S>) -> Result<NodeOutcome, NodeError>;

    /// Runs before `should_execute`. Reports `node.started` by default.
    async fn before_execute(&self, ctx: &ExecutionContext<S>) {
        ctx.emit(NodeEvent::started(self.name(), ctx.run_label().map(str::to_string)))
            .await;
    }

    /// Runs once the result is recorded. Reports `node.completed` by default.
    async fn after_execute(&self, ctx: &ExecutionContext<S>, result: &NodeResult) {
        ctx.emit(NodeEvent::completed(
            self.name(),
            ctx.run_label().map(str::to_string),
            result.status,
            result.elapsed_ms(),
            result.error.clone(),
        ))
        .await;
    }
}
