//! Core traits for codec backends.

use crate::{
    CodecError, CodecId, CodecParameters, Frame, HwDeviceType, MediaKind, PixelFormat,
    SampleFormat,
};

/// Static description of an encoder a [`CodecLibrary`] provides.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecInfo {
    /// Short name used to create the encoder (`libx264`, `hevc_nvenc`, ...).
    pub name: String,
    /// Human readable name.
    pub long_name: String,
    /// Bitstream family of the output.
    pub id: CodecId,
    pub media: MediaKind,
    /// Accepted pixel formats, most preferred first. Empty for audio.
    pub pixel_formats: Vec<PixelFormat>,
    /// Accepted sample formats, most preferred first. Empty for video.
    pub sample_formats: Vec<SampleFormat>,
    /// Device types this encoder can take frames from directly. Empty for
    /// software-only encoders.
    pub hw_device_types: Vec<HwDeviceType>,
}

impl CodecInfo {
    /// Describe a software video encoder.
    #[must_use]
    pub fn video(name: impl Into<String>, long_name: impl Into<String>, formats: &[PixelFormat]) -> Self {
        let name = name.into();
        Self {
            id: CodecId::from_encoder_name(&name),
            name,
            long_name: long_name.into(),
            media: MediaKind::Video,
            pixel_formats: formats.to_vec(),
            sample_formats: Vec::new(),
            hw_device_types: Vec::new(),
        }
    }

    /// Describe an audio encoder.
    #[must_use]
    pub fn audio(name: impl Into<String>, long_name: impl Into<String>, formats: &[SampleFormat]) -> Self {
        let name = name.into();
        Self {
            id: CodecId::from_encoder_name(&name),
            name,
            long_name: long_name.into(),
            media: MediaKind::Audio,
            pixel_formats: Vec::new(),
            sample_formats: formats.to_vec(),
            hw_device_types: Vec::new(),
        }
    }

    /// Mark the encoder as able to consume surfaces of `device_type`.
    #[must_use]
    pub fn with_hw_device(mut self, device_type: HwDeviceType) -> Self {
        self.hw_device_types.push(device_type);
        self
    }

    /// Returns true if the encoder takes hardware surfaces.
    #[must_use]
    pub fn is_hardware(&self) -> bool {
        !self.hw_device_types.is_empty()
    }

    /// Returns true if `format` is accepted.
    #[must_use]
    pub fn supports_pixel_format(&self, format: PixelFormat) -> bool {
        self.pixel_formats.contains(&format)
    }

    /// Returns true if `format` is accepted.
    #[must_use]
    pub fn supports_sample_format(&self, format: SampleFormat) -> bool {
        self.sample_formats.contains(&format)
    }
}

/// One unit of encoded output.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPacket {
    /// Encoded bitstream data (e.g., H.264 NAL units).
    pub data: Vec<u8>,
    /// Presentation timestamp in codec time base units.
    pub pts: i64,
    /// Decode timestamp in codec time base units.
    pub dts: i64,
    /// Whether this packet contains a keyframe.
    pub is_keyframe: bool,
    /// Frame index (monotonically increasing).
    pub frame_index: u64,
}

impl EncodedPacket {
    /// Create a new encoded packet.
    #[must_use]
    pub fn new(data: Vec<u8>, pts: i64, dts: i64, is_keyframe: bool) -> Self {
        Self {
            data,
            pts,
            dts,
            is_keyframe,
            frame_index: 0,
        }
    }
}

/// An encoder instance created by a [`CodecLibrary`].
///
/// Backends follow a send/receive model: frames go in with
/// [`send_frame`](Self::send_frame), packets come out with
/// [`receive_packet`](Self::receive_packet), and the two are not paired.
/// A backend may hold several frames before emitting anything (see
/// [`delay`](Self::delay)).
///
/// Lifecycle: options are set on a fresh backend, then [`open`](Self::open)
/// is called once. [`close`](Self::close) may be called any number of times.
pub trait EncoderBackend: Send {
    /// Description of this encoder.
    fn info(&self) -> &CodecInfo;

    /// Set a named option. Must be called before `open`.
    ///
    /// Returns `UnknownOption` if the encoder has no such option and
    /// `InvalidOptionValue` if the value does not parse.
    fn set_option(&mut self, key: &str, value: &str) -> Result<(), CodecError>;

    /// Current value of a named option.
    fn option(&self, key: &str) -> Option<String>;

    /// Open the encoder with the given parameters.
    fn open(&mut self, params: &CodecParameters) -> Result<(), CodecError>;

    /// Submit a frame.
    ///
    /// Returns `Again` if output must be received before more input is
    /// accepted. The frame is only borrowed; the caller keeps it alive until
    /// the matching packet has been received.
    fn send_frame(&mut self, frame: &Frame) -> Result<(), CodecError>;

    /// Fetch the next packet.
    ///
    /// Returns `Again` when more input is needed and `Eof` once a flushed
    /// encoder has nothing left.
    fn receive_packet(&mut self) -> Result<EncodedPacket, CodecError>;

    /// Signal end of input. Buffered frames are encoded and can be received
    /// until `Eof`.
    fn flush(&mut self) -> Result<(), CodecError>;

    /// Release codec resources. Idempotent.
    fn close(&mut self);

    /// Out-of-band stream headers, available after `open`.
    fn extradata(&self) -> Option<&[u8]> {
        None
    }

    /// Samples per channel every audio frame must carry. 0 means any size.
    fn frame_size(&self) -> usize {
        0
    }

    /// Number of frames the encoder buffers before emitting a packet.
    fn delay(&self) -> u32 {
        0
    }
}

/// A collection of encoders, the equivalent of a linked codec library.
pub trait CodecLibrary: Send + Sync {
    /// Library name used in logs.
    fn name(&self) -> &str;

    /// Every encoder the library provides.
    fn encoders(&self) -> Vec<CodecInfo>;

    /// Create an unopened instance of the named encoder.
    fn create(&self, name: &str) -> Result<Box<dyn EncoderBackend>, CodecError>;

    /// Look up a single encoder description.
    fn find(&self, name: &str) -> Option<CodecInfo> {
        self.encoders().into_iter().find(|info| info.name == name)
    }
}
