//! Event sink trait and implementations.

use crate::core::NodeStatus;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn, Level};

/// The lifecycle point an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeEventKind {
    /// The node is about to run.
    Started,
    /// The node has finished (or was skipped).
    Completed,
}

impl NodeEventKind {
    /// Dotted event name, e.g. `node.started`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "node.started",
            Self::Completed => "node.completed",
        }
    }
}

/// An event emitted by a node hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeEvent {
    /// Lifecycle point.
    pub kind: NodeEventKind,
    /// Node name.
    pub node: String,
    /// Run label (job id, message id).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    /// Status, on completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeStatus>,
    /// Elapsed milliseconds, on completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    /// Error, on a faulted completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeEvent {
    /// A `node.started` event.
    #[must_use]
    pub fn started(node: impl Into<String>, run: Option<String>) -> Self {
        Self {
            kind: NodeEventKind::Started,
            node: node.into(),
            run,
            status: None,
            elapsed_ms: None,
            error: None,
        }
    }

    /// A `node.completed` event.
    #[must_use]
    pub fn completed(
        node: impl Into<String>,
        run: Option<String>,
        status: NodeStatus,
        elapsed_ms: u64,
        error: Option<String>,
    ) -> Self {
        Self {
            kind: NodeEventKind::Completed,
            node: node.into(),
            run,
            status: Some(status),
            elapsed_ms: Some(elapsed_ms),
            error,
        }
    }
}

/// Trait for sinks that receive node events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: NodeEvent);

    /// Emits an event without blocking. Never fails.
    fn try_emit(&self, event: NodeEvent);
}

/// A no-op event sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: NodeEvent) {}

    fn try_emit(&self, _event: NodeEvent) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::DEBUG }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    fn log_event(&self, event: &NodeEvent) {
        let status = event.status.map(|s| s.to_string());
        if event.status == Some(NodeStatus::Failed) {
            warn!(
                event_type = event.kind.as_str(),
                node = %event.node,
                run = ?event.run,
                elapsed_ms = ?event.elapsed_ms,
                error = ?event.error,
                "Node failed"
            );
            return;
        }
        if self.level == Level::INFO {
            info!(
                event_type = event.kind.as_str(),
                node = %event.node,
                run = ?event.run,
                status = ?status,
                elapsed_ms = ?event.elapsed_ms,
                "Event: {}", event.kind.as_str()
            );
        } else {
            debug!(
                event_type = event.kind.as_str(),
                node = %event.node,
                run = ?event.run,
                status = ?status,
                elapsed_ms = ?event.elapsed_ms,
                "Event: {}", event.kind.as_str()
            );
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: NodeEvent) {
        self.log_event(&event);
    }

    fn try_emit(&self, event: NodeEvent) {
        self.log_event(&event);
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<NodeEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<NodeEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns the completion events for one node.
    #[must_use]
    pub fn completions_of(&self, node: &str) -> Vec<NodeEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind == NodeEventKind::Completed && e.node == node)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: NodeEvent) {
        self.events.write().push(event);
    }

    fn try_emit(&self, event: NodeEvent) {
        self.events.write().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_and_logging_sinks() {
        NoOpEventSink.emit(NodeEvent::started("a", None)).await;
        let sink = LoggingEventSink::new(Level::INFO);
        sink.emit(NodeEvent::started("a", Some("job-1".to_string()))).await;
        sink.try_emit(NodeEvent::completed("a", None, NodeStatus::Failed, 3, Some("x".into())));
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(NodeEvent::started("fetch", None)).await;
        sink.try_emit(NodeEvent::completed("fetch", None, NodeStatus::Succeeded, 12, None));

        assert_eq!(sink.len(), 2);
        let done = sink.completions_of("fetch");
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].elapsed_ms, Some(12));
    }

    #[test]
    fn test_event_serialization() {
        let event = NodeEvent::completed("persist", Some("j".into()), NodeStatus::Succeeded, 4, None);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "completed");
        assert_eq!(json["status"], "Succeeded");
        assert!(json.get("error").is_none());
    }
}
