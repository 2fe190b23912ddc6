//! Encoder settings.
//!
//! Hosts hand settings over as a flat key/value object. [`Settings`] keeps
//! the values the host set apart from the defaults factories seed, so a
//! value can be reset to its default by removing it. [`CommonSettings`] is
//! the typed view of the keys every encoder understands.

use std::time::Duration;

use ffenc_codec::{Compliance, PixelFormat};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::pool::DEFAULT_IDLE_THRESHOLD;

/// Keys understood by every encoder.
pub mod keys {
    /// Target bitrate in kbit/s.
    pub const BITRATE: &str = "bitrate";
    /// `seconds` or `frames`.
    pub const KEYFRAME_INTERVAL_TYPE: &str = "keyframe.interval_type";
    /// Keyframe interval when the type is `seconds`.
    pub const KEYFRAME_SECONDS: &str = "keyframe.seconds";
    /// Keyframe interval when the type is `frames`.
    pub const KEYFRAME_FRAMES: &str = "keyframe.frames";
    /// Codec worker threads, 0 for automatic.
    pub const THREADS: &str = "ffmpeg.threads";
    /// Pixel format override, empty for automatic.
    pub const COLOR_FORMAT: &str = "ffmpeg.color_format";
    /// Standard compliance level.
    pub const STANDARD_COMPLIANCE: &str = "ffmpeg.standard_compliance";
    /// Hardware adapter index, -1 for the host's device.
    pub const GPU: &str = "ffmpeg.gpu";
    /// Free-form codec options, `-key=value` tokens.
    pub const CUSTOM_SETTINGS: &str = "ffmpeg.custom_settings";
    /// Idle time in milliseconds after which pooled frames are dropped.
    pub const POOL_IDLE_MS: &str = "pool.idle_ms";
}

/// Settings errors.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("settings must be a JSON object")]
    NotAnObject,

    #[error("setting '{key}' must be {expected}")]
    WrongType { key: String, expected: &'static str },

    #[error("setting '{key}' has invalid value '{value}'")]
    InvalidValue { key: String, value: String },
}

/// Flat key/value settings with a defaults layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    values: Map<String, Value>,
    defaults: Map<String, Value>,
}

impl Settings {
    /// Create empty settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse settings from a JSON object.
    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        match serde_json::from_str::<Value>(text)? {
            Value::Object(values) => Ok(Self {
                values,
                defaults: Map::new(),
            }),
            _ => Err(SettingsError::NotAnObject),
        }
    }

    /// Set a value.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Set the default of a key.
    pub fn set_default(&mut self, key: &str, value: impl Into<Value>) {
        self.defaults.insert(key.to_string(), value.into());
    }

    /// Remove a value, falling back to its default.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Value of a key, or its default.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).or_else(|| self.defaults.get(key))
    }

    /// Returns true if the key has a value or a default.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Integer value. Floats with no fractional part are accepted.
    pub fn int(&self, key: &str) -> Result<Option<i64>, SettingsError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(Some)
                .ok_or_else(|| wrong_type(key, "an integer")),
            Some(_) => Err(wrong_type(key, "an integer")),
        }
    }

    /// Floating point value.
    pub fn float(&self, key: &str) -> Result<Option<f64>, SettingsError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(_) => Err(wrong_type(key, "a number")),
        }
    }

    /// Boolean value.
    pub fn bool(&self, key: &str) -> Result<Option<bool>, SettingsError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(wrong_type(key, "a boolean")),
        }
    }

    /// String value.
    pub fn str(&self, key: &str) -> Result<Option<&str>, SettingsError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(wrong_type(key, "a string")),
        }
    }
}

fn wrong_type(key: &str, expected: &'static str) -> SettingsError {
    SettingsError::WrongType {
        key: key.to_string(),
        expected,
    }
}

fn invalid_value(key: &str, value: impl ToString) -> SettingsError {
    SettingsError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Keyframe interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyframeInterval {
    Seconds(f64),
    Frames(u32),
}

impl KeyframeInterval {
    /// GOP length in frames at `framerate` (num, den). 0 lets the codec
    /// decide.
    #[must_use]
    pub fn gop_frames(&self, framerate: (u32, u32)) -> u32 {
        match *self {
            Self::Frames(frames) => frames,
            Self::Seconds(seconds) => {
                let (num, den) = framerate;
                if den == 0 {
                    return 0;
                }
                (seconds * num as f64 / den as f64).round().max(0.0) as u32
            }
        }
    }
}

/// Typed view of the settings common to all encoders.
#[derive(Debug, Clone, PartialEq)]
pub struct CommonSettings {
    /// Target bitrate in kbit/s, 0 for codec default.
    pub bitrate_kbps: u32,
    pub keyframe_interval: KeyframeInterval,
    pub threads: u32,
    /// Pixel format override.
    pub color_format: Option<PixelFormat>,
    pub compliance: Compliance,
    /// Adapter index, `None` for the host's device.
    pub gpu: Option<u32>,
    pub custom_settings: String,
    pub pool_idle: Duration,
}

impl CommonSettings {
    /// Seed the defaults of every common key.
    pub fn apply_defaults(settings: &mut Settings) {
        settings.set_default(keys::BITRATE, 2500);
        settings.set_default(keys::KEYFRAME_INTERVAL_TYPE, "seconds");
        settings.set_default(keys::KEYFRAME_SECONDS, 2.0);
        settings.set_default(keys::KEYFRAME_FRAMES, 300);
        settings.set_default(keys::THREADS, 0);
        settings.set_default(keys::COLOR_FORMAT, "");
        settings.set_default(keys::STANDARD_COMPLIANCE, "normal");
        settings.set_default(keys::GPU, -1);
        settings.set_default(keys::CUSTOM_SETTINGS, "");
        settings.set_default(keys::POOL_IDLE_MS, DEFAULT_IDLE_THRESHOLD.as_millis() as u64);
    }

    /// Read and validate the common keys. Missing keys take their defaults.
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        let bitrate = settings.int(keys::BITRATE)?.unwrap_or(0);
        let bitrate_kbps =
            u32::try_from(bitrate).map_err(|_| invalid_value(keys::BITRATE, bitrate))?;

        let keyframe_interval = match settings.str(keys::KEYFRAME_INTERVAL_TYPE)?.unwrap_or("seconds") {
            "seconds" => {
                let seconds = settings.float(keys::KEYFRAME_SECONDS)?.unwrap_or(2.0);
                if seconds.is_nan() || seconds < 0.0 {
                    return Err(invalid_value(keys::KEYFRAME_SECONDS, seconds));
                }
                KeyframeInterval::Seconds(seconds)
            }
            "frames" => {
                let frames = settings.int(keys::KEYFRAME_FRAMES)?.unwrap_or(300);
                KeyframeInterval::Frames(
                    u32::try_from(frames).map_err(|_| invalid_value(keys::KEYFRAME_FRAMES, frames))?,
                )
            }
            other => return Err(invalid_value(keys::KEYFRAME_INTERVAL_TYPE, other)),
        };

        let threads = settings.int(keys::THREADS)?.unwrap_or(0);
        let threads = u32::try_from(threads).map_err(|_| invalid_value(keys::THREADS, threads))?;

        let color_format = match settings.str(keys::COLOR_FORMAT)?.unwrap_or("") {
            "" => None,
            name => Some(
                PixelFormat::from_name(name).ok_or_else(|| invalid_value(keys::COLOR_FORMAT, name))?,
            ),
        };

        let compliance_name = settings.str(keys::STANDARD_COMPLIANCE)?.unwrap_or("normal");
        let compliance = Compliance::from_name(compliance_name)
            .ok_or_else(|| invalid_value(keys::STANDARD_COMPLIANCE, compliance_name))?;

        let gpu = match settings.int(keys::GPU)?.unwrap_or(-1) {
            -1 => None,
            index => Some(u32::try_from(index).map_err(|_| invalid_value(keys::GPU, index))?),
        };

        let custom_settings = settings
            .str(keys::CUSTOM_SETTINGS)?
            .unwrap_or("")
            .to_string();

        let idle_ms = settings
            .int(keys::POOL_IDLE_MS)?
            .unwrap_or(DEFAULT_IDLE_THRESHOLD.as_millis() as i64);
        let idle_ms = u64::try_from(idle_ms).map_err(|_| invalid_value(keys::POOL_IDLE_MS, idle_ms))?;

        Ok(Self {
            bitrate_kbps,
            keyframe_interval,
            threads,
            color_format,
            compliance,
            gpu,
            custom_settings,
            pool_idle: Duration::from_millis(idle_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_layer() {
        let mut settings = Settings::new();
        CommonSettings::apply_defaults(&mut settings);
        assert_eq!(settings.int(keys::BITRATE).unwrap(), Some(2500));

        settings.set(keys::BITRATE, 6000);
        assert_eq!(settings.int(keys::BITRATE).unwrap(), Some(6000));

        settings.remove(keys::BITRATE);
        assert_eq!(settings.int(keys::BITRATE).unwrap(), Some(2500));
    }

    #[test]
    fn test_from_json() {
        let settings = Settings::from_json(
            r#"{"bitrate": 4000, "keyframe.interval_type": "frames", "keyframe.frames": 60,
                "ffmpeg.color_format": "i420", "ffmpeg.gpu": 1, "pool.idle_ms": 250}"#,
        )
        .unwrap();
        let common = CommonSettings::from_settings(&settings).unwrap();
        assert_eq!(common.bitrate_kbps, 4000);
        assert_eq!(common.keyframe_interval, KeyframeInterval::Frames(60));
        assert_eq!(common.color_format, Some(PixelFormat::I420));
        assert_eq!(common.gpu, Some(1));
        assert_eq!(common.pool_idle, Duration::from_millis(250));
        assert_eq!(common.compliance, Compliance::Normal);

        assert!(matches!(
            Settings::from_json("[1, 2]"),
            Err(SettingsError::NotAnObject)
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut settings = Settings::new();
        settings.set(keys::BITRATE, "fast");
        assert!(matches!(
            CommonSettings::from_settings(&settings),
            Err(SettingsError::WrongType { .. })
        ));

        let mut settings = Settings::new();
        settings.set(keys::COLOR_FORMAT, "yuv410p");
        assert!(matches!(
            CommonSettings::from_settings(&settings),
            Err(SettingsError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_gop_frames() {
        assert_eq!(KeyframeInterval::Seconds(2.0).gop_frames((30000, 1001)), 60);
        assert_eq!(KeyframeInterval::Frames(48).gop_frames((60, 1)), 48);
        assert_eq!(KeyframeInterval::Seconds(1.0).gop_frames((30, 0)), 0);
    }
}
