use std::sync::Arc;

use crate::pipelines::PipelineServices;

/// Shared state handed to every handler.
///
/// Cheap to clone.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Collaborators.
    pub services: Arc<PipelineServices>,
    /// Queue accepted submissions are written to.
    pub request_queue: Arc<str>,
}

impl AppState {
    /// Creates the state.
    pub fn new(services: Arc<PipelineServices>, request_queue: impl Into<Arc<str>>) -> Self {
        Self {
            services,
            request_queue: request_queue.into(),
        }
    }
}
