//! # Exchangeflow
//!
//! Orchestration of exchange set builds on top of a small composable node
//! engine.
//!
//! - **Node engine**: nodes with lifecycle hooks, gating, timing and fault
//!   capture, composed serially or in parallel with status aggregation
//! - **Assembly pipeline**: turns a request into a job, a file-store batch and
//!   a queued build request for the data standard's worker
//! - **Completion pipeline**: settles a job from the worker's response,
//!   commits or expires batches and replays worker logs
//! - **Dispatch**: queue pollers feeding both pipelines with bounded hand-off
//! - **HTTP surface**: job submission, job reads and worker status reports
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use exchangeflow::prelude::*;
//!
//! let root = PipelineNode::new("greet")
//!     .with_child(FnNode::new("hello", |subject: &mut Vec<String>| {
//!         subject.push("hello".into());
//!         Ok(NodeStatus::Succeeded)
//!     }));
//!
//! let context = ExecutionContext::new(Vec::new());
//! let result = run_pipeline(&root, &context).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod api;
pub mod cancellation;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod core;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod model;
pub mod nodes;
pub mod observability;
pub mod pipelines;
pub mod sequence;
pub mod standards;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::collaborators::{
        BlobStore, CatalogClient, FileStoreClient, QueueClient, TableEntity, TableStore,
    };
    pub use crate::context::ExecutionContext;
    pub use crate::core::{aggregate, ExecutionOptions, NodeOptions, NodeResult, NodeStatus};
    pub use crate::errors::{CollaboratorError, NodeError, NodeFault, OrchestratorError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::model::{
        Build, BuildNodeStatus, BuildStatusRecord, DataStandard, Job, JobState,
    };
    pub use crate::nodes::{run_pipeline, FnNode, Node, NodeExecutor, ParallelNode, PipelineNode};
    pub use crate::pipelines::{AssemblyPipeline, CompletionPipeline, PipelineServices};
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[test]
    fn test_prelude_exposes_engine() {
        let statuses = [NodeStatus::Succeeded, NodeStatus::Failed];
        assert_eq!(
            aggregate(&statuses, ExecutionOptions::lenient()),
            NodeStatus::SucceededWithErrors
        );
        assert_eq!(aggregate(&statuses, ExecutionOptions::strict()), NodeStatus::Failed);
    }
}
