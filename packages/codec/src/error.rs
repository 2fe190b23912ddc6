//! Error types for codec backends.

use thiserror::Error;

/// Errors reported by codec backends and format conversion.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The codec cannot accept input / produce output right now.
    ///
    /// From `send_frame` this means the internal queue is full and a packet
    /// must be received first; from `receive_packet` it means more input is
    /// needed before output can be produced.
    #[error("resource temporarily unavailable")]
    Again,

    /// The codec has been flushed and has no more output.
    #[error("end of stream")]
    Eof,

    /// The codec does not know this option.
    #[error("unknown option: {0}")]
    UnknownOption(String),

    /// The codec knows the option but rejected the value.
    #[error("invalid value '{value}' for option '{key}': {reason}")]
    InvalidOptionValue {
        key: String,
        value: String,
        reason: String,
    },

    /// The requested configuration is not supported by this codec.
    #[error("unsupported configuration: {0}")]
    UnsupportedConfig(String),

    /// Unsupported pixel format.
    #[error("unsupported pixel format")]
    UnsupportedPixelFormat,

    /// Unsupported sample format.
    #[error("unsupported sample format")]
    UnsupportedSampleFormat,

    /// Invalid frame dimensions.
    #[error("invalid frame dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// Audio frame does not match the codec's frame size.
    #[error("invalid frame size: expected {expected} samples, got {actual}")]
    InvalidFrameSize { expected: usize, actual: usize },

    /// Codec was used before `open` or after `close`.
    #[error("codec not open")]
    NotOpen,

    /// Codec was opened twice.
    #[error("codec already open")]
    AlreadyOpen,

    /// Encoder name not provided by the library.
    #[error("encoder not found: {0}")]
    EncoderNotFound(String),

    /// Frame conversion error.
    #[error("frame conversion error: {0}")]
    ConversionError(String),

    /// Out of memory.
    #[error("out of memory")]
    OutOfMemory,

    /// Generic/unknown error.
    #[error("codec error: {0}")]
    Generic(String),
}

impl CodecError {
    /// Create an InvalidOptionValue error.
    pub fn invalid_value(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidOptionValue {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create an UnsupportedConfig error with a message.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedConfig(msg.into())
    }

    /// Create a Generic error with a message.
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a ConversionError with a message.
    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::ConversionError(msg.into())
    }

    /// Returns true for the "try again" condition.
    #[must_use]
    pub fn is_again(&self) -> bool {
        matches!(self, Self::Again)
    }

    /// Returns true once the codec is fully drained.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }
}
