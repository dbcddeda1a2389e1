//! Observability setup.

mod subscriber;

pub use subscriber::{init_tracing, LogFormat, TracingInitError, DEFAULT_FILTER};
