//! Codec-specific setting handlers.
//!
//! Each codec family has its own option vocabulary (`preset`, `profile`,
//! `rc`, ...). A [`Handler`] seeds its defaults and translates host settings
//! into codec options; the pipeline itself only knows the common keys.

use ffenc_codec::{CodecInfo, PixelFormat};

use crate::cmdline::CodecOptions;
use crate::settings::{Settings, SettingsError};

/// Translation between host settings and the options of one codec.
pub trait Handler: Send + Sync {
    /// Seed handler-specific defaults.
    fn defaults(&self, _info: &CodecInfo, _settings: &mut Settings, _hardware: bool) {}

    /// Append the codec options `settings` map to.
    fn translate(
        &self,
        _info: &CodecInfo,
        _settings: &Settings,
        _options: &mut CodecOptions,
    ) -> Result<(), SettingsError> {
        Ok(())
    }

    /// Replace the pixel format chosen for the codec, for encoders that
    /// advertise formats they do not handle well.
    fn override_pixel_format(&self, _info: &CodecInfo, selected: PixelFormat) -> PixelFormat {
        selected
    }
}

/// Handler for codecs that need nothing beyond the common settings.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHandler;

impl Handler for DefaultHandler {}
