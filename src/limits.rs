//! All magic numbers and OOM-prevention bounds, centralized so they can be
//! reasoned about and tuned for a deployment in one place.

/// Limits for content validation to prevent OOM from a malicious or buggy server.
#[derive(Debug, Clone, Copy)]
pub struct ContentLimits {
    pub max_frames_per_content: usize,
    pub max_total_bytes: usize,
    pub max_metadata_bytes: usize,
}

impl Default for ContentLimits {
    fn default() -> Self {
        Self {
            max_frames_per_content: 1000,
            max_total_bytes: 5 * 1024 * 1024,
            max_metadata_bytes: 10 * 1024,
        }
    }
}

/// Limits for the content queue to prevent memory exhaustion.
#[derive(Debug, Clone, Copy)]
pub struct QueueLimits {
    pub max_queued_items: usize,
    pub max_interrupted_items: usize,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_queued_items: 50,
            max_interrupted_items: 10,
        }
    }
}

/// Poll-client backoff and retry configuration.
#[derive(Debug, Clone, Copy)]
pub struct ClientBackoff {
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ClientBackoff {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 300_000,
            timeout_secs: 10,
        }
    }
}

/// Serial connection and reconnection configuration.
#[derive(Debug, Clone, Copy)]
pub struct SerialLimits {
    pub max_consecutive_failures: u32,
    pub initial_reconnect_backoff_ms: u64,
    pub max_reconnect_backoff_ms: u64,
}

impl Default for SerialLimits {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 10,
            initial_reconnect_backoff_ms: 1000,
            max_reconnect_backoff_ms: 60_000,
        }
    }
}

/// HTTP push server limits.
#[derive(Debug, Clone, Copy)]
pub struct ServerLimits {
    pub max_request_size: u64,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_request_size: 10 * 1024 * 1024,
        }
    }
}

/// Main loop timing.
#[derive(Debug, Clone, Copy)]
pub struct LoopTiming {
    /// Sleep interval per iteration. 20ms = 50 iterations/second.
    pub sleep_interval_ms: u64,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            sleep_interval_ms: 20,
        }
    }
}

/// All driver limits bundled into one value, so a single struct threads
/// through every component that needs a bound instead of scattered constants.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverLimits {
    pub content: ContentLimits,
    pub queue: QueueLimits,
    pub client: ClientBackoff,
    pub serial: SerialLimits,
    pub server: ServerLimits,
    pub loop_timing: LoopTiming,
}
