//! Raw frame types handed to encoders.
//!
//! Host input arrives as borrowed views ([`VideoFrameRef`], [`AudioFrameRef`])
//! over memory the host owns. The pipeline copies or converts them into owned
//! frames ([`VideoFrame`], [`AudioFrame`]) that it pools and submits, or into
//! hardware surfaces ([`HwFrame`]) on the texture path.

use crate::{CodecError, HwDeviceHandle, PixelFormat, SampleFormat};

/// Maximum number of planes of a video frame.
pub const MAX_PLANES: usize = 4;

/// Maximum number of planes of an audio frame (one per channel when planar).
pub const MAX_AUDIO_PLANES: usize = 8;

/// Buffer shape of a frame. Two frames with equal layouts can hold each
/// other's content without reallocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameLayout {
    Video {
        format: PixelFormat,
        width: u32,
        height: u32,
    },
    Audio {
        format: SampleFormat,
        channels: u16,
        samples: usize,
    },
    Hardware {
        device: HwDeviceHandle,
        format: PixelFormat,
        width: u32,
        height: u32,
    },
}

// ============================================================================
// Video
// ============================================================================

/// Borrowed view of a host video frame: per-plane slices plus line sizes.
#[derive(Debug, Clone, Copy)]
pub struct VideoFrameRef<'a> {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub planes: [&'a [u8]; MAX_PLANES],
    /// Bytes between the starts of two consecutive rows, per plane.
    pub linesize: [usize; MAX_PLANES],
    /// Presentation timestamp in codec time base units.
    pub pts: i64,
}

impl<'a> VideoFrameRef<'a> {
    /// Create a view with no planes attached yet.
    #[must_use]
    pub fn new(format: PixelFormat, width: u32, height: u32, pts: i64) -> Self {
        Self {
            format,
            width,
            height,
            planes: [&[]; MAX_PLANES],
            linesize: [0; MAX_PLANES],
            pts,
        }
    }

    /// Attach plane `index`.
    #[must_use]
    pub fn plane(mut self, index: usize, data: &'a [u8], linesize: usize) -> Self {
        if index < MAX_PLANES {
            self.planes[index] = data;
            self.linesize[index] = linesize;
        }
        self
    }

    /// View over a tightly packed buffer (planes stored back to back, no
    /// row padding).
    pub fn packed(
        format: PixelFormat,
        width: u32,
        height: u32,
        data: &'a [u8],
        pts: i64,
    ) -> Result<Self, CodecError> {
        let expected = expected_frame_size(width, height, format);
        if data.len() < expected {
            return Err(CodecError::conversion(format!(
                "{:?} data size mismatch: expected {}, got {}",
                format,
                expected,
                data.len()
            )));
        }
        let mut view = Self::new(format, width, height, pts);
        let mut offset = 0;
        for plane in 0..format.plane_count() {
            if let Some((row_bytes, rows)) = format.plane_geometry(plane, width, height) {
                let len = row_bytes * rows;
                view = view.plane(plane, &data[offset..offset + len], row_bytes);
                offset += len;
            }
        }
        Ok(view)
    }

    /// Check that every plane the format needs is present and large enough.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.width == 0 || self.height == 0 {
            return Err(CodecError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        for plane in 0..self.format.plane_count() {
            let (row_bytes, rows) = self
                .format
                .plane_geometry(plane, self.width, self.height)
                .ok_or(CodecError::UnsupportedPixelFormat)?;
            let stride = self.linesize[plane];
            if stride < row_bytes {
                return Err(CodecError::conversion(format!(
                    "plane {} line size {} shorter than row ({} bytes)",
                    plane, stride, row_bytes
                )));
            }
            let needed = stride * (rows - 1) + row_bytes;
            if self.planes[plane].len() < needed {
                return Err(CodecError::conversion(format!(
                    "plane {} holds {} bytes, needs {}",
                    plane,
                    self.planes[plane].len(),
                    needed
                )));
            }
        }
        Ok(())
    }

    /// Row `y` of `plane`, without padding.
    #[must_use]
    pub fn row(&self, plane: usize, y: usize) -> &'a [u8] {
        let (row_bytes, _) = self
            .format
            .plane_geometry(plane, self.width, self.height)
            .unwrap_or((0, 0));
        let start = y * self.linesize[plane];
        &self.planes[plane][start..start + row_bytes]
    }
}

/// An owned video frame with per-plane buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub planes: Vec<Vec<u8>>,
    pub linesize: Vec<usize>,
    /// Presentation timestamp in codec time base units.
    pub pts: i64,
}

impl VideoFrame {
    /// Allocate a zeroed frame with tightly packed rows.
    #[must_use]
    pub fn alloc(format: PixelFormat, width: u32, height: u32) -> Self {
        let mut planes = Vec::with_capacity(format.plane_count());
        let mut linesize = Vec::with_capacity(format.plane_count());
        for plane in 0..format.plane_count() {
            let (row_bytes, rows) = format.plane_geometry(plane, width, height).unwrap_or((0, 0));
            planes.push(vec![0u8; row_bytes * rows]);
            linesize.push(row_bytes);
        }
        Self {
            format,
            width,
            height,
            planes,
            linesize,
            pts: 0,
        }
    }

    /// Copy a tightly packed buffer into a new frame.
    pub fn from_packed(
        format: PixelFormat,
        width: u32,
        height: u32,
        data: &[u8],
        pts: i64,
    ) -> Result<Self, CodecError> {
        let view = VideoFrameRef::packed(format, width, height, data, pts)?;
        let mut frame = Self::alloc(format, width, height);
        frame.copy_from(&view)?;
        Ok(frame)
    }

    /// Buffer layout of this frame.
    #[must_use]
    pub fn layout(&self) -> FrameLayout {
        FrameLayout::Video {
            format: self.format,
            width: self.width,
            height: self.height,
        }
    }

    /// Borrow the frame as a view.
    #[must_use]
    pub fn as_view(&self) -> VideoFrameRef<'_> {
        let mut view = VideoFrameRef::new(self.format, self.width, self.height, self.pts);
        for (index, (plane, &stride)) in self.planes.iter().zip(&self.linesize).enumerate() {
            view = view.plane(index, plane, stride);
        }
        view
    }

    /// Mutable row `y` of `plane`, without padding.
    pub fn row_mut(&mut self, plane: usize, y: usize) -> &mut [u8] {
        let (row_bytes, _) = self
            .format
            .plane_geometry(plane, self.width, self.height)
            .unwrap_or((0, 0));
        let start = y * self.linesize[plane];
        &mut self.planes[plane][start..start + row_bytes]
    }

    /// Copy a view of identical format and size into this frame row by row,
    /// honoring both line sizes.
    pub fn copy_from(&mut self, src: &VideoFrameRef<'_>) -> Result<(), CodecError> {
        if src.format != self.format {
            return Err(CodecError::conversion(format!(
                "cannot copy {:?} into {:?} frame",
                src.format, self.format
            )));
        }
        if src.width != self.width || src.height != self.height {
            return Err(CodecError::InvalidDimensions {
                width: src.width,
                height: src.height,
            });
        }
        src.validate()?;
        for plane in 0..self.format.plane_count() {
            let (_, rows) = self
                .format
                .plane_geometry(plane, self.width, self.height)
                .unwrap_or((0, 0));
            for y in 0..rows {
                self.row_mut(plane, y).copy_from_slice(src.row(plane, y));
            }
        }
        self.pts = src.pts;
        Ok(())
    }

    /// Append the frame content to `out` with rows tightly packed.
    pub fn write_packed(&self, out: &mut Vec<u8>) {
        let view = self.as_view();
        for plane in 0..self.format.plane_count() {
            let (_, rows) = self
                .format
                .plane_geometry(plane, self.width, self.height)
                .unwrap_or((0, 0));
            for y in 0..rows {
                out.extend_from_slice(view.row(plane, y));
            }
        }
    }
}

/// Calculate expected tightly packed frame size for given dimensions and format.
#[must_use]
pub fn expected_frame_size(width: u32, height: u32, format: PixelFormat) -> usize {
    (0..format.plane_count())
        .filter_map(|plane| format.plane_geometry(plane, width, height))
        .map(|(row_bytes, rows)| row_bytes * rows)
        .sum()
}

// ============================================================================
// Audio
// ============================================================================

/// Borrowed view of a host audio frame.
#[derive(Debug, Clone, Copy)]
pub struct AudioFrameRef<'a> {
    pub format: SampleFormat,
    pub channels: u16,
    /// Samples per channel.
    pub samples: usize,
    /// One plane per channel for planar formats, otherwise only plane 0.
    pub planes: [&'a [u8]; MAX_AUDIO_PLANES],
    pub pts: i64,
}

impl<'a> AudioFrameRef<'a> {
    /// View over interleaved samples.
    #[must_use]
    pub fn interleaved(
        format: SampleFormat,
        channels: u16,
        samples: usize,
        data: &'a [u8],
        pts: i64,
    ) -> Self {
        let mut planes: [&'a [u8]; MAX_AUDIO_PLANES] = [&[]; MAX_AUDIO_PLANES];
        planes[0] = data;
        Self {
            format,
            channels,
            samples,
            planes,
            pts,
        }
    }

    /// Number of planes the format uses for this channel count.
    #[must_use]
    pub fn plane_count(&self) -> usize {
        audio_plane_count(self.format, self.channels)
    }

    /// Check channel count and plane sizes.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.channels == 0 || self.plane_count() > MAX_AUDIO_PLANES {
            return Err(CodecError::unsupported(format!(
                "{} channels",
                self.channels
            )));
        }
        let needed = audio_plane_size(self.format, self.channels, self.samples);
        for plane in 0..self.plane_count() {
            if self.planes[plane].len() < needed {
                return Err(CodecError::conversion(format!(
                    "audio plane {} holds {} bytes, needs {}",
                    plane,
                    self.planes[plane].len(),
                    needed
                )));
            }
        }
        Ok(())
    }
}

/// An owned audio frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub format: SampleFormat,
    pub channels: u16,
    pub samples: usize,
    pub planes: Vec<Vec<u8>>,
    pub pts: i64,
}

impl AudioFrame {
    /// Allocate a silent frame.
    #[must_use]
    pub fn alloc(format: SampleFormat, channels: u16, samples: usize) -> Self {
        let plane_size = audio_plane_size(format, channels, samples);
        Self {
            format,
            channels,
            samples,
            planes: vec![vec![0u8; plane_size]; audio_plane_count(format, channels)],
            pts: 0,
        }
    }

    /// Buffer layout of this frame.
    #[must_use]
    pub fn layout(&self) -> FrameLayout {
        FrameLayout::Audio {
            format: self.format,
            channels: self.channels,
            samples: self.samples,
        }
    }

    /// Copy a view of identical shape into this frame.
    pub fn copy_from(&mut self, src: &AudioFrameRef<'_>) -> Result<(), CodecError> {
        if src.format != self.format {
            return Err(CodecError::UnsupportedSampleFormat);
        }
        if src.channels != self.channels || src.samples != self.samples {
            return Err(CodecError::InvalidFrameSize {
                expected: self.samples,
                actual: src.samples,
            });
        }
        src.validate()?;
        let size = audio_plane_size(self.format, self.channels, self.samples);
        for (plane, dst) in self.planes.iter_mut().enumerate() {
            dst.copy_from_slice(&src.planes[plane][..size]);
        }
        self.pts = src.pts;
        Ok(())
    }
}

fn audio_plane_count(format: SampleFormat, channels: u16) -> usize {
    if format.is_planar() {
        channels as usize
    } else {
        1
    }
}

fn audio_plane_size(format: SampleFormat, channels: u16, samples: usize) -> usize {
    if format.is_planar() {
        samples * format.bytes_per_sample()
    } else {
        samples * format.bytes_per_sample() * channels as usize
    }
}

// ============================================================================
// Hardware
// ============================================================================

/// A surface owned by a hardware device context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwFrame {
    pub device: HwDeviceHandle,
    /// Backend-defined surface identifier.
    pub surface: u64,
    /// Software format of the surface content.
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub pts: i64,
}

impl HwFrame {
    /// Buffer layout of this surface.
    #[must_use]
    pub fn layout(&self) -> FrameLayout {
        FrameLayout::Hardware {
            device: self.device,
            format: self.format,
            width: self.width,
            height: self.height,
        }
    }
}

// ============================================================================
// Frame
// ============================================================================

/// Any frame an encoder accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Video(VideoFrame),
    Audio(AudioFrame),
    Hardware(HwFrame),
}

impl Frame {
    /// Allocate a frame in system memory for `layout`.
    ///
    /// Returns `None` for hardware layouts; those surfaces come from the
    /// device that owns them.
    #[must_use]
    pub fn allocate(layout: &FrameLayout) -> Option<Self> {
        match *layout {
            FrameLayout::Video {
                format,
                width,
                height,
            } => Some(Self::Video(VideoFrame::alloc(format, width, height))),
            FrameLayout::Audio {
                format,
                channels,
                samples,
            } => Some(Self::Audio(AudioFrame::alloc(format, channels, samples))),
            FrameLayout::Hardware { .. } => None,
        }
    }

    /// Buffer layout of this frame.
    #[must_use]
    pub fn layout(&self) -> FrameLayout {
        match self {
            Self::Video(frame) => frame.layout(),
            Self::Audio(frame) => frame.layout(),
            Self::Hardware(frame) => frame.layout(),
        }
    }

    /// Presentation timestamp.
    #[must_use]
    pub fn pts(&self) -> i64 {
        match self {
            Self::Video(frame) => frame.pts,
            Self::Audio(frame) => frame.pts,
            Self::Hardware(frame) => frame.pts,
        }
    }

    /// Set the presentation timestamp.
    pub fn set_pts(&mut self, pts: i64) {
        match self {
            Self::Video(frame) => frame.pts = pts,
            Self::Audio(frame) => frame.pts = pts,
            Self::Hardware(frame) => frame.pts = pts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_frame_size() {
        assert_eq!(expected_frame_size(1920, 1080, PixelFormat::Rgb), 1920 * 1080 * 3);
        assert_eq!(expected_frame_size(1920, 1080, PixelFormat::Rgba), 1920 * 1080 * 4);
        assert_eq!(expected_frame_size(1920, 1080, PixelFormat::Nv12), 1920 * 1080 * 3 / 2);
        assert_eq!(expected_frame_size(1920, 1080, PixelFormat::I420), 1920 * 1080 * 3 / 2);
    }

    #[test]
    fn test_copy_from_padded_view() {
        // 2x2 BGRA with 4 bytes of padding per row
        let mut data = vec![0u8; 24];
        data[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        data[12..20].copy_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16]);
        let view = VideoFrameRef::new(PixelFormat::Bgra, 2, 2, 7).plane(0, &data, 12);

        let mut frame = VideoFrame::alloc(PixelFormat::Bgra, 2, 2);
        frame.copy_from(&view).unwrap();
        assert_eq!(frame.linesize[0], 8);
        assert_eq!(frame.planes[0], (1..=16).collect::<Vec<u8>>());
        assert_eq!(frame.pts, 7);
    }

    #[test]
    fn test_validate_rejects_short_plane() {
        let data = vec![0u8; 10];
        let view = VideoFrameRef::new(PixelFormat::Nv12, 4, 4, 0)
            .plane(0, &data, 4)
            .plane(1, &data, 4);
        assert!(view.validate().is_err());
    }

    #[test]
    fn test_packed_round_trip() {
        let data: Vec<u8> = (0..24).collect();
        let frame = VideoFrame::from_packed(PixelFormat::I420, 4, 4, &data, 3).unwrap();
        assert_eq!(frame.planes.len(), 3);
        assert_eq!(frame.planes[1], vec![16, 17, 18, 19]);
        let mut out = Vec::new();
        frame.write_packed(&mut out);
        assert_eq!(out, data);
    }

    #[test]
    fn test_audio_copy_planar() {
        let left = [1u8, 0, 2, 0];
        let right = [3u8, 0, 4, 0];
        let mut planes: [&[u8]; MAX_AUDIO_PLANES] = [&[]; MAX_AUDIO_PLANES];
        planes[0] = &left;
        planes[1] = &right;
        let view = AudioFrameRef {
            format: SampleFormat::S16Planar,
            channels: 2,
            samples: 2,
            planes,
            pts: 11,
        };
        let mut frame = AudioFrame::alloc(SampleFormat::S16Planar, 2, 2);
        frame.copy_from(&view).unwrap();
        assert_eq!(frame.planes, vec![left.to_vec(), right.to_vec()]);
        assert_eq!(frame.pts, 11);
    }

    #[test]
    fn test_hardware_layout_is_not_allocatable() {
        let layout = FrameLayout::Hardware {
            device: HwDeviceHandle {
                device_type: crate::HwDeviceType::Cuda,
                id: 1,
            },
            format: PixelFormat::Nv12,
            width: 16,
            height: 16,
        };
        assert!(Frame::allocate(&layout).is_none());
    }
}
