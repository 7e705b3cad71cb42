//! # Core Error Types
//!
//! All errors raised by frame memory, addressing and configuration.
//!
//! Every variant is fatal for the frame being built: a half-built frame is
//! worthless, so nothing here carries retry semantics.

use thiserror::Error;

/// Errors that can occur in the core layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The head and tail cursors would cross.
    #[error("arena exhausted: requested {requested} bytes with head at {head} and tail at {tail}")]
    ArenaExhausted {
        /// Aligned size of the failed request.
        requested: usize,
        /// Head cursor at the time of the request.
        head: usize,
        /// Tail cursor at the time of the request.
        tail: usize,
    },

    /// A segment was referenced before it was mapped for this frame.
    #[error("segment {segment:#04x} referenced from stream {stream} before it was set this frame")]
    SegmentUnset {
        /// The referenced segment.
        segment: u8,
        /// Chain position of the stream holding the reference.
        stream: usize,
    },

    /// Configuration values are inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration text could not be parsed.
    #[error("configuration parse error: {0}")]
    ConfigParse(String),

    /// Configuration file could not be read.
    #[error("configuration read error: {0}")]
    ConfigIo(String),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
