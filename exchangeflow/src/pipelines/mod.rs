//! The two orchestration pipelines.
//!
//! - [`AssemblyPipeline`] turns a request into a Job and dispatches a
//!   build to the data standard's worker queue.
//! - [`CompletionPipeline`] ingests a worker's response and finalizes the
//!   Job, its status record and its batch.

mod assembly;
mod completion;
mod services;

#[cfg(test)]
mod integration_tests;

pub use assembly::{AssemblyOutcome, AssemblyPipeline, AssemblySubject};
pub use completion::{CompletionOutcome, CompletionPipeline, CompletionSubject};
pub use services::PipelineServices;
