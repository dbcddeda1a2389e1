//! Node trait and the composite execution engine.
//!
//! Nodes are the units of work in an orchestration pipeline. A pipeline is
//! a tree of nodes: leaves do work against the shared subject, composites
//! ([`MultiNode`]) run their children according to a [`ChildStrategy`]
//! and roll the child statuses up with [`aggregate`](crate::core::aggregate).

mod executor;
mod fn_node;
mod multi;
mod node;

pub use executor::{run_pipeline, NodeExecutor};
pub use fn_node::FnNode;
pub use multi::{ChildStrategy, MultiNode, Parallel, ParallelNode, PipelineNode, Serial};
pub use node::Node;
