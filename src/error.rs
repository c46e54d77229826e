//! Error taxonomy. `DriverError` covers the fatal/startup path and is the
//! only error type that ever reaches `main` — everything else is recovered
//! locally by the component that produced it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("panel error: {0}")]
    Panel(#[from] PanelError),

    #[error("failed to open serial device: {0}")]
    SerialOpen(String),

    #[error("failed to bind push server on {host}:{port}: {source}")]
    PushBind {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install signal handlers: {0}")]
    SignalHandlers(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Validation errors raised while constructing a `Content`/`Frame`, or while
/// decoding one from the wire. Always rejected at the boundary; never
/// propagated into the playback queue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("invalid base64 frame data: {0}")]
    InvalidBase64(String),

    #[error("frame {index} has dimensions {width}x{height}, but frame 0 has {expected_width}x{expected_height}")]
    FrameDimensionMismatch {
        index: usize,
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },

    #[error("content must have at least one frame")]
    EmptyFrames,

    #[error("too many frames: {count} exceeds limit of {limit}")]
    TooManyFrames { count: usize, limit: usize },

    #[error("content too large: {bytes} bytes exceeds limit of {limit}")]
    TooLarge { bytes: usize, limit: usize },

    #[error("metadata too large: {bytes} bytes exceeds limit of {limit}")]
    MetadataTooLarge { bytes: usize, limit: usize },

    #[error("loop_count can only be set when loop is true")]
    LoopCountWithoutLoop,

    #[error("loop_count must be positive")]
    LoopCountNotPositive,

    #[error("priority {0} out of range 0..=99")]
    PriorityOutOfRange(u8),

    #[error("content {content_id} has frame dimensions {frame_width}x{frame_height}, but display is {display_width}x{display_height}")]
    DisplayDimensionMismatch {
        content_id: String,
        frame_width: u32,
        frame_height: u32,
        display_width: u32,
        display_height: u32,
    },

    #[error("poll_interval_ms must be >= 1000, got {0}")]
    PollIntervalTooShort(u32),

    #[error("status is 'updated' but content is missing")]
    MissingContentForUpdatedStatus,
}

/// Errors produced while packing/validating a matrix against panel geometry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PanelError {
    #[error("layout must be a non-empty rectangular grid")]
    EmptyLayout,

    #[error("layout row {0} has a different length than the rest")]
    RaggedLayout(usize),

    #[error(
        "matrix dimensions {matrix_height}x{matrix_width} don't match panel dimensions {panel_height}x{panel_width}"
    )]
    DimensionMismatch {
        matrix_height: usize,
        matrix_width: usize,
        panel_height: usize,
        panel_width: usize,
    },
}

/// Network/decode errors from a single poll attempt. Counted toward
/// `consecutive_errors`; never surfaced past `poll_client`.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("authentication failed ({status})")]
    Authentication { status: u16 },

    #[error("unexpected status {status}")]
    HttpStatus { status: u16 },

    #[error("invalid response body: {0}")]
    InvalidResponse(String),

    #[error("content validation failed: {0}")]
    Content(#[from] ContentError),
}
