//! Core types shared by codec backends and the encode pipeline.

/// Bitstream family produced by an encoder.
///
/// Only the families whose stream headers the pipeline knows how to pick
/// apart get their own variant; everything else is [`CodecId::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    /// H.264/AVC (Annex B output).
    H264,
    /// H.265/HEVC (Annex B output).
    Hevc,
    /// AV1 (low-overhead OBU output).
    Av1,
    /// Uncompressed video.
    RawVideo,
    /// Signed 16-bit little-endian PCM.
    PcmS16le,
    /// 32-bit float little-endian PCM.
    PcmF32le,
    /// Any other bitstream, passed through opaquely.
    Other,
}

impl CodecId {
    /// Guess the bitstream family from an encoder name such as `libx264`
    /// or `hevc_nvenc`.
    #[must_use]
    pub fn from_encoder_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name.contains("264") || name.contains("avc") {
            Self::H264
        } else if name.contains("265") || name.contains("hevc") {
            Self::Hevc
        } else if name.contains("av1") || name.contains("aom") || name.contains("svt") {
            Self::Av1
        } else if name == "rawvideo" {
            Self::RawVideo
        } else if name == "pcm_s16le" {
            Self::PcmS16le
        } else if name == "pcm_f32le" {
            Self::PcmF32le
        } else {
            Self::Other
        }
    }

    /// Returns true if the bitstream carries in-band parameter sets and SEI
    /// in Annex B NAL units.
    #[must_use]
    pub fn is_annex_b(&self) -> bool {
        matches!(self, Self::H264 | Self::Hevc)
    }
}

impl Default for CodecId {
    fn default() -> Self {
        Self::Other
    }
}

/// Whether an encoder consumes audio or video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Pixel format for video frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// RGB with 8 bits per channel (24 bits per pixel).
    Rgb,
    /// RGBA with 8 bits per channel (32 bits per pixel).
    Rgba,
    /// BGR with 8 bits per channel (24 bits per pixel).
    Bgr,
    /// BGRA with 8 bits per channel (32 bits per pixel).
    Bgra,
    /// ARGB with 8 bits per channel (32 bits per pixel).
    Argb,
    /// ABGR with 8 bits per channel (32 bits per pixel).
    Abgr,
    /// NV12 (YUV 4:2:0, planar Y + interleaved UV).
    Nv12,
    /// I420/YUV420P (YUV 4:2:0, planar Y + U + V).
    I420,
    /// I444/YUV444P (YUV 4:4:4, planar Y + U + V).
    I444,
}

impl PixelFormat {
    /// Every format the pipeline understands, in preference order for
    /// encoders that accept several.
    pub const ALL: [PixelFormat; 9] = [
        Self::Nv12,
        Self::I420,
        Self::I444,
        Self::Bgra,
        Self::Rgba,
        Self::Argb,
        Self::Abgr,
        Self::Bgr,
        Self::Rgb,
    ];

    /// Returns the number of bytes per pixel for packed formats,
    /// or an approximation for planar formats.
    #[must_use]
    pub fn bytes_per_pixel(&self) -> f32 {
        match self {
            Self::Rgb | Self::Bgr => 3.0,
            Self::Rgba | Self::Bgra | Self::Argb | Self::Abgr => 4.0,
            Self::Nv12 | Self::I420 => 1.5, // YUV 4:2:0
            Self::I444 => 3.0,
        }
    }

    /// Returns true if this is a planar format (Y, U, V in separate planes).
    #[must_use]
    pub fn is_planar(&self) -> bool {
        matches!(self, Self::Nv12 | Self::I420 | Self::I444)
    }

    /// Returns true if the format stores luma/chroma rather than RGB.
    #[must_use]
    pub fn is_yuv(&self) -> bool {
        self.is_planar()
    }

    /// Number of planes a frame of this format carries.
    #[must_use]
    pub fn plane_count(&self) -> usize {
        match self {
            Self::Nv12 => 2,
            Self::I420 | Self::I444 => 3,
            _ => 1,
        }
    }

    /// Bytes per row and row count of `plane` for a `width` x `height` image.
    ///
    /// Returns `None` if the plane does not exist for this format.
    #[must_use]
    pub fn plane_geometry(&self, plane: usize, width: u32, height: u32) -> Option<(usize, usize)> {
        let w = width as usize;
        let h = height as usize;
        let half_w = (w + 1) / 2;
        let half_h = (h + 1) / 2;
        match (self, plane) {
            (Self::Rgb | Self::Bgr, 0) => Some((w * 3, h)),
            (Self::Rgba | Self::Bgra | Self::Argb | Self::Abgr, 0) => Some((w * 4, h)),
            (Self::Nv12, 0) | (Self::I420, 0) | (Self::I444, 0..=2) => Some((w, h)),
            (Self::Nv12, 1) => Some((half_w * 2, half_h)),
            (Self::I420, 1 | 2) => Some((half_w, half_h)),
            _ => None,
        }
    }

    /// Parse a format name as used in settings (`"nv12"`, `"i420"`, ...).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rgb" | "rgb24" => Some(Self::Rgb),
            "rgba" => Some(Self::Rgba),
            "bgr" | "bgr24" => Some(Self::Bgr),
            "bgra" => Some(Self::Bgra),
            "argb" => Some(Self::Argb),
            "abgr" => Some(Self::Abgr),
            "nv12" => Some(Self::Nv12),
            "i420" | "yuv420p" => Some(Self::I420),
            "i444" | "yuv444p" => Some(Self::I444),
            _ => None,
        }
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::Nv12
    }
}

/// Audio sample format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Unsigned 8-bit, interleaved.
    U8,
    /// Signed 16-bit, interleaved.
    S16,
    /// Signed 32-bit, interleaved.
    S32,
    /// 32-bit float, interleaved.
    F32,
    /// Signed 16-bit, one plane per channel.
    S16Planar,
    /// 32-bit float, one plane per channel.
    F32Planar,
}

impl SampleFormat {
    /// Size of a single sample of a single channel.
    #[must_use]
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::S16 | Self::S16Planar => 2,
            Self::S32 | Self::F32 | Self::F32Planar => 4,
        }
    }

    /// Returns true if every channel lives in its own plane.
    #[must_use]
    pub fn is_planar(&self) -> bool {
        matches!(self, Self::S16Planar | Self::F32Planar)
    }
}

impl Default for SampleFormat {
    fn default() -> Self {
        Self::F32
    }
}

/// Color matrix of YUV content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorSpace {
    Bt601,
    #[default]
    Bt709,
    Bt2100Pq,
    Bt2100Hlg,
}

/// Quantization range of YUV content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorRange {
    /// Limited (studio) range, 16-235.
    #[default]
    Partial,
    /// Full range, 0-255.
    Full,
}

/// How strictly an encoder must follow its bitstream standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Compliance {
    VeryStrict,
    Strict,
    #[default]
    Normal,
    Unofficial,
    Experimental,
}

impl Compliance {
    /// Parse a compliance level name as used in settings.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "very_strict" | "very-strict" => Some(Self::VeryStrict),
            "strict" => Some(Self::Strict),
            "normal" => Some(Self::Normal),
            "unofficial" => Some(Self::Unofficial),
            "experimental" => Some(Self::Experimental),
            _ => None,
        }
    }
}

/// Kind of device a hardware encoder runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwDeviceType {
    D3d11,
    Cuda,
    Vaapi,
    VideoToolbox,
    Vulkan,
}

/// Opaque reference to a hardware device context created by a hardware
/// backend. Codecs only compare and forward it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HwDeviceHandle {
    /// Device kind the handle belongs to.
    pub device_type: HwDeviceType,
    /// Backend-defined identifier.
    pub id: u64,
}

/// Video-specific codec parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoParameters {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format frames are submitted in (software format for hardware
    /// encoders).
    pub pixel_format: PixelFormat,
    /// Framerate as (numerator, denominator).
    pub framerate: (u32, u32),
    pub color_space: ColorSpace,
    pub color_range: ColorRange,
}

/// Audio-specific codec parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioParameters {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

/// Media-specific half of [`CodecParameters`].
#[derive(Debug, Clone, PartialEq)]
pub enum MediaParameters {
    Video(VideoParameters),
    Audio(AudioParameters),
}

/// Parameters a codec is opened with.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecParameters {
    pub media: MediaParameters,
    /// Target bitrate in bits per second (0 lets the codec decide).
    pub bitrate: u64,
    /// Time base as (numerator, denominator); timestamps count in this unit.
    pub time_base: (u32, u32),
    /// GOP length in frames. 0 lets the codec decide.
    pub gop_size: u32,
    /// Worker threads the codec may use. 0 lets the codec decide.
    pub thread_count: u32,
    pub compliance: Compliance,
    /// Device context for hardware encoders.
    pub hw_device: Option<HwDeviceHandle>,
}

impl CodecParameters {
    /// Create video parameters with the given dimensions.
    #[must_use]
    pub fn video(width: u32, height: u32) -> Self {
        Self {
            media: MediaParameters::Video(VideoParameters {
                width,
                height,
                pixel_format: PixelFormat::default(),
                framerate: (30, 1),
                color_space: ColorSpace::default(),
                color_range: ColorRange::default(),
            }),
            bitrate: 0,
            time_base: (1, 30),
            gop_size: 0,
            thread_count: 0,
            compliance: Compliance::Normal,
            hw_device: None,
        }
    }

    /// Create audio parameters.
    #[must_use]
    pub fn audio(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Self {
        Self {
            media: MediaParameters::Audio(AudioParameters {
                sample_rate,
                channels,
                sample_format,
            }),
            bitrate: 0,
            time_base: (1, sample_rate.max(1)),
            gop_size: 0,
            thread_count: 0,
            compliance: Compliance::Normal,
            hw_device: None,
        }
    }

    /// Set the framerate; also moves the time base to one tick per frame.
    #[must_use]
    pub fn framerate(mut self, num: u32, den: u32) -> Self {
        if let MediaParameters::Video(video) = &mut self.media {
            video.framerate = (num, den);
            self.time_base = (den, num);
        }
        self
    }

    /// Set the submitted pixel format.
    #[must_use]
    pub fn pixel_format(mut self, format: PixelFormat) -> Self {
        if let MediaParameters::Video(video) = &mut self.media {
            video.pixel_format = format;
        }
        self
    }

    /// Set the color matrix and range.
    #[must_use]
    pub fn color(mut self, space: ColorSpace, range: ColorRange) -> Self {
        if let MediaParameters::Video(video) = &mut self.media {
            video.color_space = space;
            video.color_range = range;
        }
        self
    }

    /// Set the target bitrate in bits per second.
    #[must_use]
    pub fn bitrate(mut self, bitrate: u64) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Set the GOP length in frames.
    #[must_use]
    pub fn gop_size(mut self, gop_size: u32) -> Self {
        self.gop_size = gop_size;
        self
    }

    /// Set the codec worker thread count.
    #[must_use]
    pub fn threads(mut self, count: u32) -> Self {
        self.thread_count = count;
        self
    }

    /// Set the standard compliance level.
    #[must_use]
    pub fn compliance(mut self, compliance: Compliance) -> Self {
        self.compliance = compliance;
        self
    }

    /// Attach a hardware device context.
    #[must_use]
    pub fn hw_device(mut self, device: HwDeviceHandle) -> Self {
        self.hw_device = Some(device);
        self
    }

    /// Video half of the parameters, if this is a video codec.
    #[must_use]
    pub fn as_video(&self) -> Option<&VideoParameters> {
        match &self.media {
            MediaParameters::Video(video) => Some(video),
            MediaParameters::Audio(_) => None,
        }
    }

    /// Audio half of the parameters, if this is an audio codec.
    #[must_use]
    pub fn as_audio(&self) -> Option<&AudioParameters> {
        match &self.media {
            MediaParameters::Audio(audio) => Some(audio),
            MediaParameters::Video(_) => None,
        }
    }

    /// Media kind the parameters describe.
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        match self.media {
            MediaParameters::Video(_) => MediaKind::Video,
            MediaParameters::Audio(_) => MediaKind::Audio,
        }
    }
}
