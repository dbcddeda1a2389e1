//! Event sinks fed by node before/after hooks.
//!
//! The default node hooks report every node start and completion here,
//! which is how per-step timing reaches logs or an external reporter
//! without touching node bodies.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, NodeEvent, NodeEventKind};
