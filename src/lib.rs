//! Adaptive encode pipeline for ffenc.
//!
//! This crate wraps codec backends (see `ffenc-codec`) into encode sessions
//! a host can push frames into and pull packets out of, regardless of how
//! much lookahead the codec keeps. It provides:
//!
//! - **Registry** ([`Registry`]): discovers encoders and hands out
//!   [`Factory`] instances keyed by uid
//! - **Sessions** ([`EncodeInstance`]): frame submission, packet retrieval,
//!   drain and close with every submitted frame accounted for
//! - **Frame pool** ([`FramePool`]): reuse of codec frames across submissions
//! - **Hardware ingestion** ([`HardwareIngest`]): keyed-lock texture import
//!   into device surfaces
//! - **Stream headers** ([`SideData`]): extra data and SEI extraction
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use ffenc::{DefaultHandler, Registry, RegistryConfig, Settings, VideoInput};
//! use ffenc_codec::{PixelFormat, RawLibrary, VideoFrameRef};
//!
//! let mut registry = Registry::new(RegistryConfig::default());
//! registry.register_library(Arc::new(RawLibrary::new()));
//! registry.register_handler("rawvideo", Arc::new(DefaultHandler));
//! registry.register_encoders();
//!
//! let factory = registry.factory("ffenc-rawvideo")?;
//! let mut settings = Settings::new();
//! factory.defaults(&mut settings, false);
//! let input = VideoInput::new(1280, 720, PixelFormat::Nv12);
//! let mut session = factory.create_video(&settings, &input)?;
//!
//! if let Some(packet) = session.video_encode(&frame)? {
//!     // ...
//! }
//! let report = session.drain()?;
//! ```

pub mod cmdline;
pub mod context;
pub mod error;
pub mod handler;
pub mod headers;
pub mod hw;
pub mod ingest;
pub mod instance;
pub mod pool;
pub mod registry;
pub mod settings;

#[cfg(test)]
mod testing;

pub use cmdline::CodecOptions;
pub use context::{CodecConfig, CodecContext, ConfigureReport, ContextState};
pub use error::{EncodeError, Result};
pub use handler::{DefaultHandler, Handler};
pub use headers::{PacketHeaders, SideData};
pub use hw::{
    AdapterInfo, HwApi, HwError, HwInstance, TextureFrame, TextureHandle, TextureLock,
    DEFAULT_LOCK_TIMEOUT,
};
pub use ingest::{HardwareIngest, IngestPath, SoftwareIngest};
pub use instance::{
    AudioInfo, DrainReport, EncodeInstance, InstanceStats, State, VideoInfo, RETRY_WINDOW,
};
pub use pool::{FrameHandle, FramePool, PoolError, PoolStats, SlotState};
pub use registry::{AudioInput, CodecDescriptor, Factory, Registry, RegistryConfig, VideoInput};
pub use settings::{CommonSettings, KeyframeInterval, Settings, SettingsError};
