//! Per-run mutable state passed through a node tree.

mod execution;

pub use execution::ExecutionContext;
