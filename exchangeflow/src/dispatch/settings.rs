use std::time::Duration;

/// Queue names and loop tuning for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Inbound assembly request queue.
    pub request_queue: String,
    /// Inbound worker response queue.
    pub response_queue: String,
    /// Maximum messages taken per receive.
    pub max_messages: usize,
    /// Pause after an empty receive.
    pub poll_interval: Duration,
    /// Pause after a loop error.
    pub error_delay: Duration,
    /// Capacity of the request hand-off channel.
    pub channel_capacity: usize,
    /// Assembly runs allowed in flight at once.
    pub assembly_concurrency: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            request_queue: "exchange-set-requests".to_string(),
            response_queue: "build-responses".to_string(),
            max_messages: 16,
            poll_interval: Duration::from_millis(1000),
            error_delay: Duration::from_millis(5000),
            channel_capacity: 16,
            assembly_concurrency: 1,
        }
    }
}
