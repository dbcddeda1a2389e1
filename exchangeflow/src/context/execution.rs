//! The execution context for one pipeline run.

use crate::cancellation::CancellationToken;
use crate::core::{ExecutionOptions, NodeResult};
use crate::events::{EventSink, NoOpEventSink, NodeEvent};
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, MutexGuard};

/// Mutable state for one run of a node tree.
///
/// Holds the subject the nodes work on, the global execution options,
/// the cancellation flag and, once the run finishes, the result tree.
pub struct ExecutionContext<S> {
    /// The subject shared by every node in the run.
    subject: Mutex<S>,
    /// Global default options; nodes override per field.
    options: ExecutionOptions,
    /// Cooperative cancellation, checked between children.
    cancellation: CancellationToken,
    /// Receives node hook events.
    event_sink: Arc<dyn EventSink>,
    /// Label attached to events (job id, message id).
    run_label: Option<String>,
    /// The root result; written once when the run completes.
    result: OnceLock<NodeResult>,
}

impl<S> ExecutionContext<S> {
    /// Creates a new context around a subject.
    #[must_use]
    pub fn new(subject: S) -> Self {
        Self {
            subject: Mutex::new(subject),
            options: ExecutionOptions::default(),
            cancellation: CancellationToken::new(),
            event_sink: Arc::new(NoOpEventSink),
            run_label: None,
            result: OnceLock::new(),
        }
    }

    /// Sets the global execution options.
    #[must_use]
    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Shares an existing cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Sets the run label.
    #[must_use]
    pub fn with_run_label(mut self, label: impl Into<String>) -> Self {
        self.run_label = Some(label.into());
        self
    }

    /// Locks the subject.
    ///
    /// Do not hold the guard across collaborator calls.
    pub async fn subject(&self) -> MutexGuard<'_, S> {
        self.subject.lock().await
    }

    /// Consumes the context, returning the subject.
    pub fn into_subject(self) -> S {
        self.subject.into_inner()
    }

    /// Returns the global execution options.
    #[must_use]
    pub fn options(&self) -> ExecutionOptions {
        self.options
    }

    /// Returns the run label.
    #[must_use]
    pub fn run_label(&self) -> Option<&str> {
        self.run_label.as_deref()
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Checks if the run is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Requests cancellation of the run.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.cancellation.cancel(reason);
    }

    /// Emits a node event to the sink.
    pub async fn emit(&self, event: NodeEvent) {
        self.event_sink.emit(event).await;
    }

    /// Records the root result. A second call is rejected and returns the
    /// rejected result.
    pub fn record_result(&self, result: NodeResult) -> Result<(), NodeResult> {
        self.result.set(result)
    }

    /// Returns the root result once the run has completed.
    #[must_use]
    pub fn result(&self) -> Option<&NodeResult> {
        self.result.get()
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for ExecutionContext<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("options", &self.options)
            .field("run_label", &self.run_label)
            .field("cancelled", &self.is_cancelled())
            .field("completed", &self.result.get().is_some())
            .finish_non_exhaustive()
    }
}
