//! Error types for encoder session operations.

use thiserror::Error;

/// Errors that can occur while configuring or driving an encoder session.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The requested format cannot be handled by this encoder.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Invalid parameter passed to the session.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Invalid frame dimensions.
    #[error("invalid frame dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// Call made in the wrong lifecycle state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Buffer index that is not currently leased to the caller.
    #[error("buffer index {0} is not dequeued")]
    InvalidBufferIndex(usize),

    /// The session does not provide this capability.
    #[error("not supported by this session: {0}")]
    Unsupported(String),

    /// The encoder worker is gone.
    #[error("encoder worker stopped unexpectedly")]
    WorkerGone,

    /// Frame conversion error.
    #[error("frame conversion error: {0}")]
    ConversionError(String),

    /// Error reported by the encoder backend.
    #[error("encoder error: {0}")]
    Backend(String),
}

impl CodecError {
    /// Create an UnsupportedFormat error with a message.
    pub fn unsupported_format(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    /// Create an InvalidParam error with a message.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Self::InvalidParam(msg.into())
    }

    /// Create an InvalidOperation error with a message.
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create a Backend error with a message.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Whether this error was raised by `configure` for parameters the
    /// encoder cannot handle. Callers may retry with different parameters.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat(_) | Self::InvalidParam(_) | Self::InvalidDimensions { .. }
        )
    }
}
