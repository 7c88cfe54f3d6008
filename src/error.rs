//! Error types for GPSD sentence decoding and client operations
//!
//! Two layers are distinguished. [`DecodeError`] describes a problem with a
//! single line of the daemon's output; it is always recoverable and the
//! stream keeps going. [`GpsdError`] is the crate-level error returned from
//! fallible operations and wraps transport failures, contract violations and
//! decode errors.

use std::sync::Arc;

use thiserror::Error;

/// Per-line decode failure
///
/// None of these abort a connection. They are logged, reported through
/// [`ClientEvent::Decode`](crate::client::ClientEvent::Decode) and the
/// offending line is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The line is not valid JSON
    #[error("malformed line: {message}")]
    Malformed {
        /// Parser diagnostic
        message: String,
    },

    /// The line is valid JSON but not an object
    #[error("line is not a JSON object")]
    NotAnObject,

    /// The line contains bytes that are not UTF-8
    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    /// The line exceeded the configured maximum length and was discarded
    #[error("line exceeds {limit} bytes")]
    LineTooLong {
        /// Configured limit in bytes
        limit: usize,
    },

    /// The stream ended in the middle of a line
    #[error("stream ended mid-line after {len} bytes")]
    TruncatedLine {
        /// Number of bytes of the incomplete line
        len: usize,
    },

    /// The `class` discriminator is missing or names an unsupported sentence
    ///
    /// Informational: well-formed lines from newer daemons land here.
    #[error("unknown sentence class {raw_class:?}")]
    UnknownVariant {
        /// The class tag as received, `None` when absent or not a string
        raw_class: Option<String>,
    },

    /// A declared field is present with an incompatible JSON type
    #[error("field '{field}' of {variant} expected {expected}")]
    FieldTypeMismatch {
        /// Sentence class the field belongs to
        variant: &'static str,
        /// Wire key of the field
        field: &'static str,
        /// Human-readable expected type
        expected: &'static str,
    },
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Malformed {
            message: err.to_string(),
        }
    }
}

/// Main error type for GPSD client operations
///
/// I/O errors are wrapped in `Arc` so the error stays cheap to clone into
/// lifecycle events.
#[derive(Debug, Error)]
pub enum GpsdError {
    /// I/O error occurred during network communication
    #[error("IoError: {0}")]
    IoError(#[source] Arc<std::io::Error>),

    /// JSON serialization error while encoding a request
    #[error("SerdeError: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// GPSD protocol version is not supported
    ///
    /// Missing version numbers are reported as 0.
    #[error("UnsupportedProtocolVersion: {major}.{minor}")]
    UnsupportedProtocolVersion {
        /// Major version reported by the daemon
        major: i64,
        /// Minor version reported by the daemon
        minor: i64,
    },

    /// The daemon closed the connection cleanly between lines
    #[error("connection closed")]
    ConnectionClosed,

    /// A single line could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The client or dispatcher has been closed
    #[error("client is shut down")]
    Shutdown,

    /// `connect` was called while a connection task is already running
    #[error("client is already connected")]
    AlreadyConnected,

    /// A task had to be started outside a tokio runtime
    #[error("must be called from within a tokio runtime")]
    NoRuntime,
}

impl From<std::io::Error> for GpsdError {
    fn from(err: std::io::Error) -> Self {
        GpsdError::IoError(Arc::new(err))
    }
}
