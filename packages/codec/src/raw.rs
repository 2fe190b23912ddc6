//! Built-in uncompressed encoders.
//!
//! [`RawLibrary`] provides `rawvideo`, `pcm_s16le` and `pcm_f32le`. They do
//! no compression, but follow the same send/receive contract as real codecs
//! (bounded output queue, `Again`, flush to `Eof`), which makes them useful
//! for probing a pipeline end to end without a codec library installed.

use std::collections::VecDeque;

use crate::{
    CodecError, CodecInfo, CodecLibrary, CodecParameters, EncodedPacket, EncoderBackend, Frame,
    MediaParameters, OptionTable, PixelFormat, SampleFormat,
};

/// Packets an encoder holds before `send_frame` returns `Again`.
const OUTPUT_QUEUE_DEPTH: usize = 4;

/// Library of the built-in uncompressed encoders.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawLibrary;

impl RawLibrary {
    /// Create the library.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CodecLibrary for RawLibrary {
    fn name(&self) -> &str {
        "raw"
    }

    fn encoders(&self) -> Vec<CodecInfo> {
        vec![
            CodecInfo::video("rawvideo", "raw video", &PixelFormat::ALL),
            CodecInfo::audio(
                "pcm_s16le",
                "PCM signed 16-bit little-endian",
                &[SampleFormat::S16],
            ),
            CodecInfo::audio(
                "pcm_f32le",
                "PCM 32-bit floating point little-endian",
                &[SampleFormat::F32],
            ),
        ]
    }

    fn create(&self, name: &str) -> Result<Box<dyn EncoderBackend>, CodecError> {
        let info = self
            .find(name)
            .ok_or_else(|| CodecError::EncoderNotFound(name.to_string()))?;
        Ok(Box::new(RawEncoder::new(info)))
    }
}

/// Options every built-in encoder declares.
fn common_options() -> OptionTable {
    OptionTable::new()
        .int("b", 0, i64::MAX, 0)
        .int("g", 0, i32::MAX as i64, 0)
        .int("threads", 0, 256, 0)
        .int("strict", -2, 2, 0)
}

/// Encoder that copies frame content into packets.
struct RawEncoder {
    info: CodecInfo,
    options: OptionTable,
    params: Option<CodecParameters>,
    output: VecDeque<EncodedPacket>,
    flushing: bool,
    closed: bool,
}

impl RawEncoder {
    fn new(info: CodecInfo) -> Self {
        let mut options = common_options();
        if !info.sample_formats.is_empty() {
            options = options.int("frame_size", 0, 1 << 20, 0);
        }
        Self {
            info,
            options,
            params: None,
            output: VecDeque::with_capacity(OUTPUT_QUEUE_DEPTH),
            flushing: false,
            closed: false,
        }
    }

    fn required_frame_size(&self) -> usize {
        self.options
            .get_int("frame_size")
            .map_or(0, |size| size.max(0) as usize)
    }

    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, CodecError> {
        let params = self.params.as_ref().ok_or(CodecError::NotOpen)?;
        match (frame, &params.media) {
            (Frame::Video(video), MediaParameters::Video(expected)) => {
                if video.format != expected.pixel_format {
                    return Err(CodecError::UnsupportedPixelFormat);
                }
                if video.width != expected.width || video.height != expected.height {
                    return Err(CodecError::InvalidDimensions {
                        width: video.width,
                        height: video.height,
                    });
                }
                let mut data = Vec::with_capacity(crate::expected_frame_size(
                    video.width,
                    video.height,
                    video.format,
                ));
                video.write_packed(&mut data);
                Ok(data)
            }
            (Frame::Audio(audio), MediaParameters::Audio(expected)) => {
                if audio.format != expected.sample_format || audio.channels != expected.channels {
                    return Err(CodecError::UnsupportedSampleFormat);
                }
                let required = self.required_frame_size();
                if required != 0 && audio.samples != required {
                    return Err(CodecError::InvalidFrameSize {
                        expected: required,
                        actual: audio.samples,
                    });
                }
                Ok(audio.planes.concat())
            }
            (Frame::Hardware(_), _) => Err(CodecError::unsupported(format!(
                "{} cannot read hardware surfaces",
                self.info.name
            ))),
            _ => Err(CodecError::unsupported("frame kind does not match codec")),
        }
    }
}

impl EncoderBackend for RawEncoder {
    fn info(&self) -> &CodecInfo {
        &self.info
    }

    fn set_option(&mut self, key: &str, value: &str) -> Result<(), CodecError> {
        if self.params.is_some() {
            return Err(CodecError::AlreadyOpen);
        }
        self.options.set(key, value)
    }

    fn option(&self, key: &str) -> Option<String> {
        self.options.get(key)
    }

    fn open(&mut self, params: &CodecParameters) -> Result<(), CodecError> {
        if self.params.is_some() {
            return Err(CodecError::AlreadyOpen);
        }
        match &params.media {
            MediaParameters::Video(video) => {
                if self.info.pixel_formats.is_empty() {
                    return Err(CodecError::unsupported("audio encoder given video parameters"));
                }
                if !self.info.supports_pixel_format(video.pixel_format) {
                    return Err(CodecError::UnsupportedPixelFormat);
                }
                if video.width == 0 || video.height == 0 {
                    return Err(CodecError::InvalidDimensions {
                        width: video.width,
                        height: video.height,
                    });
                }
            }
            MediaParameters::Audio(audio) => {
                if self.info.sample_formats.is_empty() {
                    return Err(CodecError::unsupported("video encoder given audio parameters"));
                }
                if !self.info.supports_sample_format(audio.sample_format) {
                    return Err(CodecError::UnsupportedSampleFormat);
                }
                if audio.channels == 0 || audio.sample_rate == 0 {
                    return Err(CodecError::unsupported(format!(
                        "{} channels at {} Hz",
                        audio.channels, audio.sample_rate
                    )));
                }
            }
        }
        self.params = Some(params.clone());
        Ok(())
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<(), CodecError> {
        if self.closed || self.params.is_none() {
            return Err(CodecError::NotOpen);
        }
        if self.flushing {
            return Err(CodecError::Eof);
        }
        if self.output.len() >= OUTPUT_QUEUE_DEPTH {
            return Err(CodecError::Again);
        }
        let data = self.encode(frame)?;
        let pts = frame.pts();
        self.output.push_back(EncodedPacket::new(data, pts, pts, true));
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<EncodedPacket, CodecError> {
        if self.closed || self.params.is_none() {
            return Err(CodecError::NotOpen);
        }
        match self.output.pop_front() {
            Some(packet) => Ok(packet),
            None if self.flushing => Err(CodecError::Eof),
            None => Err(CodecError::Again),
        }
    }

    fn flush(&mut self) -> Result<(), CodecError> {
        if self.closed || self.params.is_none() {
            return Err(CodecError::NotOpen);
        }
        self.flushing = true;
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        self.output.clear();
    }

    fn frame_size(&self) -> usize {
        self.required_frame_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AudioFrame, VideoFrame};

    fn open_video(format: PixelFormat) -> Box<dyn EncoderBackend> {
        let mut encoder = RawLibrary::new().create("rawvideo").unwrap();
        encoder
            .open(&CodecParameters::video(4, 2).pixel_format(format))
            .unwrap();
        encoder
    }

    #[test]
    fn test_encoders_listed() {
        let names: Vec<String> = RawLibrary::new()
            .encoders()
            .into_iter()
            .map(|info| info.name)
            .collect();
        assert_eq!(names, vec!["rawvideo", "pcm_s16le", "pcm_f32le"]);
        assert!(RawLibrary::new().create("libx264").is_err());
    }

    #[test]
    fn test_rawvideo_packets_carry_frame() {
        let mut encoder = open_video(PixelFormat::Nv12);
        let mut frame = VideoFrame::alloc(PixelFormat::Nv12, 4, 2);
        frame.planes[0].fill(7);
        frame.pts = 42;
        encoder.send_frame(&Frame::Video(frame)).unwrap();

        let packet = encoder.receive_packet().unwrap();
        assert_eq!(packet.data.len(), 12);
        assert_eq!(&packet.data[..8], &[7; 8]);
        assert_eq!(packet.pts, 42);
        assert!(packet.is_keyframe);
        assert!(encoder.receive_packet().unwrap_err().is_again());
    }

    #[test]
    fn test_full_queue_returns_again() {
        let mut encoder = open_video(PixelFormat::Bgra);
        let frame = Frame::Video(VideoFrame::alloc(PixelFormat::Bgra, 4, 2));
        for _ in 0..OUTPUT_QUEUE_DEPTH {
            encoder.send_frame(&frame).unwrap();
        }
        assert!(encoder.send_frame(&frame).unwrap_err().is_again());
        encoder.receive_packet().unwrap();
        encoder.send_frame(&frame).unwrap();
    }

    #[test]
    fn test_flush_drains_to_eof() {
        let mut encoder = open_video(PixelFormat::I420);
        let frame = Frame::Video(VideoFrame::alloc(PixelFormat::I420, 4, 2));
        encoder.send_frame(&frame).unwrap();
        encoder.flush().unwrap();
        assert!(encoder.receive_packet().is_ok());
        assert!(encoder.receive_packet().unwrap_err().is_eof());
    }

    #[test]
    fn test_pcm_frame_size_enforced() {
        let mut encoder = RawLibrary::new().create("pcm_s16le").unwrap();
        encoder.set_option("frame_size", "1024").unwrap();
        encoder
            .open(&CodecParameters::audio(48000, 2, SampleFormat::S16))
            .unwrap();
        assert_eq!(encoder.frame_size(), 1024);

        let short = Frame::Audio(AudioFrame::alloc(SampleFormat::S16, 2, 512));
        assert!(matches!(
            encoder.send_frame(&short),
            Err(CodecError::InvalidFrameSize {
                expected: 1024,
                actual: 512
            })
        ));
        let full = Frame::Audio(AudioFrame::alloc(SampleFormat::S16, 2, 1024));
        encoder.send_frame(&full).unwrap();
        assert_eq!(encoder.receive_packet().unwrap().data.len(), 4096);
    }

    #[test]
    fn test_open_rejects_mismatched_media() {
        let mut encoder = RawLibrary::new().create("pcm_f32le").unwrap();
        let err = encoder.open(&CodecParameters::video(16, 16)).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedConfig(_)));
    }

    #[test]
    fn test_options_locked_after_open() {
        let mut encoder = open_video(PixelFormat::Nv12);
        assert!(matches!(
            encoder.set_option("b", "1000"),
            Err(CodecError::AlreadyOpen)
        ));
    }
}
