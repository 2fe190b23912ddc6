//! Error types for the encode pipeline.

use ffenc_codec::CodecError;
use thiserror::Error;

use crate::hw::HwError;
use crate::instance::State;
use crate::pool::PoolError;
use crate::settings::SettingsError;

/// Errors reported by encode sessions, the codec context and the registry.
///
/// Every variant that can come out of a running session names the codec it
/// happened in, so hosts running several encoders can tell them apart.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Invalid or unsupported configuration for this codec.
    #[error("{codec}: configuration error: {reason}")]
    Configuration { codec: String, reason: String },

    /// The codec refused to open.
    #[error("{codec}: failed to open codec")]
    CodecOpenFailed {
        codec: String,
        #[source]
        source: CodecError,
    },

    /// A codec option value was rejected.
    #[error("{codec}: invalid value '{value}' for option '{key}': {reason}")]
    InvalidOption {
        codec: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Importing a host texture into the encoder failed. The session is
    /// closed afterwards.
    #[error("{codec}: hardware import failed during {operation}")]
    HardwareImportFailed {
        codec: String,
        operation: &'static str,
        #[source]
        source: HwError,
    },

    /// The codec failed while encoding.
    #[error("{codec}: {operation} failed")]
    Codec {
        codec: String,
        operation: &'static str,
        #[source]
        source: CodecError,
    },

    /// Neither input nor output made progress within the retry window.
    #[error("{codec}: {operation} made no progress within the retry window")]
    Stalled {
        codec: String,
        operation: &'static str,
    },

    /// The operation is not allowed in the session's current state.
    #[error("{codec}: {operation} not allowed in state {state}")]
    InvalidState {
        codec: String,
        operation: &'static str,
        state: State,
    },

    /// Frame pool failure.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// No factory is registered under this id.
    #[error("unknown encoder: {0}")]
    UnknownEncoder(String),

    /// Settings could not be read.
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl EncodeError {
    /// Create a Configuration error.
    pub fn configuration(codec: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            codec: codec.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a codec failure during `operation`.
    pub fn codec(codec: impl Into<String>, operation: &'static str, source: CodecError) -> Self {
        Self::Codec {
            codec: codec.into(),
            operation,
            source,
        }
    }

    /// Returns true if the error ended the session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::HardwareImportFailed { .. } | Self::CodecOpenFailed { .. }
        )
    }
}

/// Result alias for pipeline operations.
pub type Result<T, E = EncodeError> = std::result::Result<T, E>;
