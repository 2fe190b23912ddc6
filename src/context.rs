//! Codec context manager.
//!
//! [`CodecContext`] owns one encoder backend through its whole lifecycle:
//! allocated, configured with options, opened with parameters, and closed
//! exactly once, on [`close`](CodecContext::close) or on drop.

use ffenc_codec::{
    CodecError, CodecInfo, CodecLibrary, CodecParameters, EncodedPacket, EncoderBackend, Frame,
};

use crate::cmdline::CodecOptions;
use crate::error::{EncodeError, Result};
use crate::registry::CodecDescriptor;

/// Lifecycle of a codec context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Allocated,
    Open,
    Closed,
}

/// Everything needed to open a codec in one step.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecConfig {
    pub parameters: CodecParameters,
    pub options: CodecOptions,
}

/// Outcome of applying options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigureReport {
    /// Options the codec accepted.
    pub applied: Vec<String>,
    /// Options the codec does not know.
    pub unknown: Vec<String>,
    /// Options the codec only accepts before it is opened.
    pub locked: Vec<String>,
}

/// An encoder backend with managed lifecycle.
pub struct CodecContext {
    backend: Box<dyn EncoderBackend>,
    name: String,
    state: ContextState,
}

impl CodecContext {
    /// Create the backend for `descriptor`, unopened.
    pub fn allocate(library: &dyn CodecLibrary, descriptor: &CodecDescriptor) -> Result<Self> {
        let backend = library.create(&descriptor.codec).map_err(|e| match e {
            CodecError::EncoderNotFound(_) => EncodeError::configuration(
                &descriptor.codec,
                format!("encoder not provided by library '{}'", library.name()),
            ),
            other => EncodeError::codec(&descriptor.codec, "allocate", other),
        })?;
        Ok(Self {
            backend,
            name: descriptor.codec.clone(),
            state: ContextState::Allocated,
        })
    }

    /// Allocate, configure and open in one step. On failure the partially
    /// built context is dropped, which closes the backend.
    pub fn open_with(
        library: &dyn CodecLibrary,
        descriptor: &CodecDescriptor,
        config: &CodecConfig,
    ) -> Result<Self> {
        let mut context = Self::allocate(library, descriptor)?;
        context.configure(&config.options)?;
        context.open(&config.parameters)?;
        Ok(context)
    }

    /// Apply options in order.
    ///
    /// Unknown options are logged and reported; a malformed value fails the
    /// whole call. Options already applied before the failure stay applied.
    pub fn configure(&mut self, options: &CodecOptions) -> Result<ConfigureReport> {
        if self.state == ContextState::Closed {
            return Err(EncodeError::codec(&self.name, "configure", CodecError::NotOpen));
        }
        let mut report = ConfigureReport::default();
        for (key, value) in options.iter() {
            match self.backend.set_option(key, value) {
                Ok(()) => report.applied.push(key.to_string()),
                Err(CodecError::UnknownOption(_)) => {
                    tracing::warn!("{}: unknown option '{}' = '{}' ignored", self.name, key, value);
                    report.unknown.push(key.to_string());
                }
                Err(CodecError::AlreadyOpen) => {
                    tracing::warn!("{}: option '{}' cannot change while encoding", self.name, key);
                    report.locked.push(key.to_string());
                }
                Err(CodecError::InvalidOptionValue { key, value, reason }) => {
                    return Err(EncodeError::InvalidOption {
                        codec: self.name.clone(),
                        key,
                        value,
                        reason,
                    })
                }
                Err(e) => return Err(EncodeError::codec(&self.name, "configure", e)),
            }
        }
        Ok(report)
    }

    /// Open the codec.
    pub fn open(&mut self, params: &CodecParameters) -> Result<()> {
        if self.state != ContextState::Allocated {
            return Err(EncodeError::configuration(
                &self.name,
                format!("cannot open a codec that is {:?}", self.state),
            ));
        }
        match self.backend.open(params) {
            Ok(()) => {
                self.state = ContextState::Open;
                tracing::info!(
                    "opened {} ({:?}, {} bit/s, delay {} frames)",
                    self.name,
                    params.kind(),
                    params.bitrate,
                    self.backend.delay()
                );
                Ok(())
            }
            Err(
                e @ (CodecError::UnsupportedConfig(_)
                | CodecError::UnsupportedPixelFormat
                | CodecError::UnsupportedSampleFormat
                | CodecError::InvalidDimensions { .. }),
            ) => {
                tracing::error!("{}: unsupported configuration: {}", self.name, e);
                Err(EncodeError::configuration(&self.name, e.to_string()))
            }
            Err(e) => {
                tracing::error!("{}: failed to open: {}", self.name, e);
                Err(EncodeError::CodecOpenFailed {
                    codec: self.name.clone(),
                    source: e,
                })
            }
        }
    }

    /// Close the codec. Only the first call reaches the backend.
    pub fn close(&mut self) {
        if self.state == ContextState::Closed {
            return;
        }
        self.backend.close();
        if self.state == ContextState::Open {
            tracing::info!("closed {}", self.name);
        }
        self.state = ContextState::Closed;
    }

    pub fn send_frame(&mut self, frame: &Frame) -> std::result::Result<(), CodecError> {
        self.ensure_open()?;
        self.backend.send_frame(frame)
    }

    pub fn receive_packet(&mut self) -> std::result::Result<EncodedPacket, CodecError> {
        self.ensure_open()?;
        self.backend.receive_packet()
    }

    pub fn flush(&mut self) -> std::result::Result<(), CodecError> {
        self.ensure_open()?;
        self.backend.flush()
    }

    #[must_use]
    pub fn option(&self, key: &str) -> Option<String> {
        self.backend.option(key)
    }

    #[must_use]
    pub fn extradata(&self) -> Option<&[u8]> {
        self.backend.extradata()
    }

    #[must_use]
    pub fn frame_size(&self) -> usize {
        self.backend.frame_size()
    }

    #[must_use]
    pub fn delay(&self) -> u32 {
        self.backend.delay()
    }

    #[must_use]
    pub fn info(&self) -> &CodecInfo {
        self.backend.info()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> ContextState {
        self.state
    }

    fn ensure_open(&self) -> std::result::Result<(), CodecError> {
        if self.state == ContextState::Open {
            Ok(())
        } else {
            Err(CodecError::NotOpen)
        }
    }
}

impl Drop for CodecContext {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{descriptor, MockLibrary, MockScript};
    use ffenc_codec::{PixelFormat, RawLibrary};

    fn config(options: &str) -> CodecConfig {
        CodecConfig {
            parameters: CodecParameters::video(64, 32).pixel_format(PixelFormat::Nv12),
            options: CodecOptions::parse(options),
        }
    }

    #[test]
    fn test_open_with_raw_library() {
        let library = RawLibrary::new();
        let context =
            CodecContext::open_with(&library, &descriptor("rawvideo"), &config("-g=30")).unwrap();
        assert_eq!(context.state(), ContextState::Open);
        assert_eq!(context.option("g").as_deref(), Some("30"));
    }

    #[test]
    fn test_unknown_option_reported_not_fatal() {
        let library = RawLibrary::new();
        let mut context = CodecContext::allocate(&library, &descriptor("rawvideo")).unwrap();
        let report = context
            .configure(&CodecOptions::parse("-b=1000 -bogus=1 -g 12"))
            .unwrap();
        assert_eq!(report.applied, vec!["b", "g"]);
        assert_eq!(report.unknown, vec!["bogus"]);
    }

    #[test]
    fn test_malformed_value_is_fatal() {
        let library = RawLibrary::new();
        let result = CodecContext::open_with(&library, &descriptor("rawvideo"), &config("-g=often"));
        assert!(matches!(
            result,
            Err(EncodeError::InvalidOption { key, value, .. }) if key == "g" && value == "often"
        ));
    }

    #[test]
    fn test_unsupported_config_maps_to_configuration() {
        let library = RawLibrary::new();
        let descriptor = descriptor("pcm_s16le");
        let result = CodecContext::open_with(&library, &descriptor, &config(""));
        assert!(matches!(result, Err(EncodeError::Configuration { .. })));
    }

    #[test]
    fn test_open_failure_maps_to_open_failed_and_closes() {
        let library = MockLibrary::new(MockScript {
            fail_open: true,
            ..MockScript::default()
        });
        let result = CodecContext::open_with(&library, &descriptor("mock264"), &config(""));
        assert!(matches!(result, Err(EncodeError::CodecOpenFailed { .. })));
        assert_eq!(library.log().closes, 1);
    }

    #[test]
    fn test_close_runs_exactly_once() {
        let library = MockLibrary::new(MockScript::default());
        let mut context =
            CodecContext::open_with(&library, &descriptor("mock264"), &config("")).unwrap();
        context.close();
        context.close();
        let frame = Frame::Video(ffenc_codec::VideoFrame::alloc(PixelFormat::Nv12, 64, 32));
        assert!(matches!(context.send_frame(&frame), Err(CodecError::NotOpen)));
        drop(context);
        assert_eq!(library.log().closes, 1);
    }
}
