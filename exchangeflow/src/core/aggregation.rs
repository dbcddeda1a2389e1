//! Roll-up of child statuses into a composite status.

use super::{ExecutionOptions, NodeStatus};

/// Aggregates child statuses into a summary status.
///
/// Children that never ran are ignored. A failure under
/// `continue_on_failure = false` always dominates; otherwise a mix of
/// outcomes degrades to `SucceededWithErrors`.
#[must_use]
pub fn aggregate(statuses: &[NodeStatus], options: ExecutionOptions) -> NodeStatus {
    let mut succeeded = 0usize;
    let mut with_errors = 0usize;
    let mut failed = 0usize;

    for status in statuses {
        match status {
            NodeStatus::NotRun => {}
            NodeStatus::Succeeded => succeeded += 1,
            NodeStatus::SucceededWithErrors => with_errors += 1,
            NodeStatus::Failed => failed += 1,
        }
    }

    if succeeded + with_errors + failed == 0 {
        return NodeStatus::NotRun;
    }
    if failed > 0 && !options.continue_on_failure {
        return NodeStatus::Failed;
    }
    if with_errors == 0 && failed == 0 {
        return NodeStatus::Succeeded;
    }
    if succeeded == 0 && with_errors == 0 {
        return NodeStatus::Failed;
    }
    NodeStatus::SucceededWithErrors
}
