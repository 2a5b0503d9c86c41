//! Domain-specific error types for regcast.
//!
//! All fallible operations return `Result<T, RegcastError>`.
//! No panics on invalid input: every error is typed and recoverable.

use thiserror::Error;

/// The canonical error type for regcast.
#[derive(Debug, Error)]
pub enum RegcastError {
    // ── Codec Errors ─────────────────────────────────────────────
    /// A delta record started with a byte that is not a known opcode.
    #[error("unknown delta opcode: {0:#04x}")]
    UnknownOpcode(u8),

    /// A delta record ended before all of its bytes were present.
    #[error("truncated delta record at offset {offset}: need {needed} bytes, have {available}")]
    TruncatedRecord {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A delta record addressed a register beyond the state vector.
    #[error("register index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// A wire frame exceeded the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A wire frame carried an unknown kind byte.
    #[error("unknown frame kind: {0:#04x}")]
    UnknownFrameKind(u8),

    // ── Lookup Errors ────────────────────────────────────────────
    /// No device is registered under the requested id.
    #[error("device not found: {0}")]
    DeviceNotFound(u32),

    // ── Configuration Errors ─────────────────────────────────────
    /// A configuration value is outside its allowed range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// Delivering to a subscriber transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    // ── Serialization Errors ─────────────────────────────────────
    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// UTF-8 conversion of a text frame failed.
    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

// ── TransportError ───────────────────────────────────────────────

/// Failure of a [`Transport`](crate::transport::Transport) write.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection behind the handle has been closed (tombstoned).
    #[error("transport closed")]
    Closed,

    /// The underlying sink reported an I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the handle is permanently unusable.
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Closed)
    }
}
