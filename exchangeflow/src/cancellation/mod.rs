//! Cooperative cancellation.
//!
//! Pipelines check the token between children; poller loops wait on it
//! to shut down.

mod token;

pub use token::CancellationToken;
