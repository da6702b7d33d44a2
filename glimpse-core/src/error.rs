//! Domain-specific error types for the glimpse engine.
//!
//! All fallible operations return `Result<T, EngineError>`.
//! No panics on invalid input — every error is typed and recoverable.

use thiserror::Error;

use crate::capture::CaptureError;

/// The canonical error type for the glimpse engine.
#[derive(Debug, Error)]
pub enum EngineError {
    // ── Registry Errors ──────────────────────────────────────────
    /// All 64 client index bits are taken.
    #[error("no client indices available")]
    NoCapacity,

    /// An operation referenced a client id the registry does not know.
    #[error("unknown client: {id:#010x}")]
    UnknownClient { id: u32 },

    // ── Wire Errors ──────────────────────────────────────────────
    /// The received frame is shorter than its fixed layout requires.
    #[error("truncated frame: need {expected} bytes, got {actual}")]
    TruncatedFrame { expected: usize, actual: usize },

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// A frame field violated the protocol layout.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// UTF-8 conversion of a wire string failed.
    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    // ── Capture Errors ───────────────────────────────────────────
    /// The display backend reported a failure.
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    // ── Transport Errors ─────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for EngineError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        EngineError::ChannelClosed
    }
}
