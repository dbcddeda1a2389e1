//! Core domain model types for the node engine.
//!
//! This module contains the fundamental types every node shares:
//! - Node status enum
//! - Execution options and their per-node resolution
//! - Node results and the aggregation rule for composites

mod aggregation;
mod options;
mod result;
mod status;

pub use aggregation::aggregate;
pub use options::{ExecutionOptions, NodeOptions};
pub use result::{NodeOutcome, NodeResult};
pub use status::NodeStatus;
