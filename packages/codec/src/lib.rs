//! Codec capability surface for ffenc.
//!
//! This crate defines what the encode pipeline needs from a codec library,
//! independently of the library itself:
//!
//! - **Media types**: pixel/sample formats, codec parameters, color metadata
//! - **Frames**: borrowed host views and owned pooled frames, plus hardware
//!   surface references
//! - **Backends**: the [`EncoderBackend`] send/receive contract and the
//!   [`CodecLibrary`] that creates them
//! - **Options**: typed option tables backends validate settings against
//! - **Conversion**: the [`Converter`] seam and a reference CPU converter
//!
//! # Quick Start
//!
//! ```ignore
//! use ffenc_codec::{CodecLibrary, CodecParameters, Frame, PixelFormat, RawLibrary, VideoFrame};
//!
//! let mut encoder = RawLibrary::new().create("rawvideo")?;
//! encoder.set_option("g", "30")?;
//! encoder.open(&CodecParameters::video(640, 480).pixel_format(PixelFormat::Nv12))?;
//!
//! let frame = VideoFrame::alloc(PixelFormat::Nv12, 640, 480);
//! encoder.send_frame(&Frame::Video(frame))?;
//! let packet = encoder.receive_packet()?;
//! ```
//!
//! # Architecture
//!
//! Real codec libraries implement [`CodecLibrary`] and [`EncoderBackend`].
//! The built-in [`RawLibrary`] provides uncompressed encoders that follow
//! the same contract.

mod convert;
mod error;
mod frame;
mod options;
mod raw;
mod traits;
mod types;

pub use convert::{Converter, SoftwareConverter};
pub use error::CodecError;
pub use frame::{
    expected_frame_size, AudioFrame, AudioFrameRef, Frame, FrameLayout, HwFrame, VideoFrame,
    VideoFrameRef, MAX_AUDIO_PLANES, MAX_PLANES,
};
pub use options::{OptionKind, OptionTable};
pub use raw::RawLibrary;
pub use traits::{CodecInfo, CodecLibrary, EncodedPacket, EncoderBackend};
pub use types::{
    AudioParameters, CodecId, CodecParameters, ColorRange, ColorSpace, Compliance,
    HwDeviceHandle, HwDeviceType, MediaKind, MediaParameters, PixelFormat, SampleFormat,
    VideoParameters,
};
