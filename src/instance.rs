//! Encode instance: one encoding session.
//!
//! The host pushes frames on its own cadence and pulls packets; the codec
//! consumes frames and emits packets asynchronously, possibly holding
//! several frames of lookahead. The instance reconciles the two:
//!
//! ```text
//! Uninitialized --configure--> Configured --first frame--> Running
//!        |                          |                         |
//!        |                          +---------drain-----------+--> Draining
//!        +--------------------------+-------------------------+------+--close--> Closed
//! ```
//!
//! Submitted frames stay in the pool as in flight until a packet comes
//! out for them; drain turns whatever the codec never emitted into explicit
//! discards, so every submitted frame is accounted for.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use ffenc_codec::{
    AudioFrameRef, CodecError, CodecParameters, ColorRange, ColorSpace, EncodedPacket, Frame,
    FrameLayout, PixelFormat, SampleFormat, VideoFrameRef,
};

use crate::cmdline::CodecOptions;
use crate::context::{CodecContext, ConfigureReport};
use crate::error::{EncodeError, Result};
use crate::handler::Handler;
use crate::headers::SideData;
use crate::hw::{HwError, TextureFrame};
use crate::ingest::{HardwareIngest, IngestPath, SoftwareIngest};
use crate::pool::{FrameHandle, FramePool, PoolError, PoolStats, DEFAULT_IDLE_THRESHOLD};
use crate::registry::CodecDescriptor;
use crate::settings::{CommonSettings, Settings};

/// How long the send/receive loop keeps retrying without progress.
pub const RETRY_WINDOW: Duration = Duration::from_millis(50);

/// Pause between retries when neither side of the codec makes progress.
const RETRY_BACKOFF: Duration = Duration::from_millis(1);

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Codec allocated, not opened.
    Uninitialized,
    /// Codec open, no frame submitted yet.
    Configured,
    /// Frames are being encoded.
    Running,
    /// End of input signalled; no further frames accepted.
    Draining,
    /// Codec closed and buffers released.
    Closed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Format the host must deliver video frames in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInfo {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub color_space: ColorSpace,
    pub color_range: ColorRange,
}

/// Format the host must deliver audio frames in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioInfo {
    pub format: SampleFormat,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Outcome of draining a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    /// Packets still owed to the host, in codec output order.
    pub packets: Vec<EncodedPacket>,
    /// Submitted frames the codec never produced a packet for.
    pub discarded: u64,
    /// The codec did not reach end of stream within the retry window.
    pub flush_incomplete: bool,
}

/// Session counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstanceStats {
    pub frames_submitted: u64,
    pub packets_received: u64,
    pub frames_discarded: u64,
    /// Packets received from the codec but not yet handed to the host.
    pub pending_packets: usize,
    pub pool: PoolStats,
}

/// One encoding session over ingestion path `P`.
pub struct EncodeInstance<P: IngestPath> {
    // Declared first so the codec is closed before the pool drops frames it
    // may still reference.
    codec: CodecContext,
    pool: FramePool,
    path: P,
    descriptor: CodecDescriptor,
    handler: Option<Arc<dyn Handler>>,
    parameters: CodecParameters,
    state: State,
    lag_in_frames: u64,
    frames_submitted: u64,
    packets_received: u64,
    frames_discarded: u64,
    have_first_frame: bool,
    pending: VecDeque<EncodedPacket>,
    side_data: SideData,
    idle_threshold: Duration,
    retry_window: Duration,
}

impl<P: IngestPath> EncodeInstance<P> {
    /// Wrap an allocated, unopened codec.
    pub fn new(
        codec: CodecContext,
        descriptor: CodecDescriptor,
        parameters: CodecParameters,
        path: P,
        handler: Option<Arc<dyn Handler>>,
    ) -> Self {
        let side_data = SideData::new(descriptor.info.id);
        Self {
            codec,
            pool: FramePool::default(),
            path,
            descriptor,
            handler,
            parameters,
            state: State::Uninitialized,
            lag_in_frames: 0,
            frames_submitted: 0,
            packets_received: 0,
            frames_discarded: 0,
            have_first_frame: false,
            pending: VecDeque::new(),
            side_data,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            retry_window: RETRY_WINDOW,
        }
    }

    /// Replace the frame pool, e.g. to change its capacity.
    #[must_use]
    pub fn with_pool(mut self, pool: FramePool) -> Self {
        self.pool = pool;
        self
    }

    /// Set the idle time after which free pooled frames are dropped.
    #[must_use]
    pub fn with_idle_threshold(mut self, threshold: Duration) -> Self {
        self.idle_threshold = threshold;
        self
    }

    /// Set how long the send/receive loop retries without progress.
    #[must_use]
    pub fn with_retry_window(mut self, window: Duration) -> Self {
        self.retry_window = window;
        self
    }

    /// Apply options and open the codec.
    pub fn configure(&mut self, options: &CodecOptions) -> Result<ConfigureReport> {
        self.expect_state("configure", &[State::Uninitialized])?;
        let report = self.codec.configure(options)?;
        self.codec.open(&self.parameters)?;
        self.lag_in_frames = u64::from(self.codec.delay());
        self.state = State::Configured;
        tracing::debug!(
            "{}: configured, lag of {} frames",
            self.descriptor.uid,
            self.lag_in_frames
        );
        Ok(report)
    }

    /// Re-apply handler and custom options from updated settings.
    ///
    /// Options the codec cannot change while open are reported, not
    /// failed.
    pub fn update(&mut self, settings: &Settings) -> Result<ConfigureReport> {
        self.expect_state("update", &[State::Configured, State::Running])?;
        let common = CommonSettings::from_settings(settings)?;
        let mut options = CodecOptions::new();
        if let Some(handler) = &self.handler {
            handler.translate(&self.descriptor.info, settings, &mut options)?;
        }
        options.extend(CodecOptions::parse(&common.custom_settings));
        self.idle_threshold = common.pool_idle;
        self.codec.configure(&options)
    }

    /// Fetch the next packet without submitting a frame. `Ok(None)` means
    /// no packet is available yet.
    pub fn receive_packet(&mut self) -> Result<Option<EncodedPacket>> {
        self.expect_state(
            "receive_packet",
            &[State::Configured, State::Running, State::Draining],
        )?;
        if self.pending.is_empty() && self.state != State::Draining && self.frames_submitted > 0 {
            self.poll_codec("receive_packet")?;
        }
        Ok(self.pending.pop_front())
    }

    /// Signal end of input and collect every remaining packet.
    ///
    /// Frames the codec never produced a packet for are counted as
    /// discarded. A codec that does not finish within the retry window is
    /// reported through `flush_incomplete` instead of an error.
    pub fn drain(&mut self) -> Result<DrainReport> {
        self.expect_state("drain", &[State::Configured, State::Running])?;
        self.state = State::Draining;

        if self.frames_submitted == 0 {
            return Ok(DrainReport::default());
        }

        let flush_incomplete = match self.codec.flush() {
            Ok(()) => !self.receive_until_eof(),
            Err(e) => {
                tracing::error!("{}: flush failed: {}", self.descriptor.uid, e);
                true
            }
        };

        let discarded = self.pool.abandon_in_flight() as u64;
        if discarded > 0 {
            tracing::warn!(
                "{}: {} frames discarded without a packet",
                self.descriptor.uid,
                discarded
            );
        }
        self.frames_discarded += discarded;

        Ok(DrainReport {
            packets: self.pending.drain(..).collect(),
            discarded,
            flush_incomplete,
        })
    }

    /// Close the codec, then release pooled frames. Idempotent.
    pub fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }
        self.codec.close();

        let abandoned = self.pool.abandon_in_flight() as u64;
        if abandoned > 0 {
            tracing::warn!(
                "{}: closing with {} frames in flight",
                self.descriptor.uid,
                abandoned
            );
        }
        self.frames_discarded += abandoned;
        if !self.pending.is_empty() {
            tracing::warn!(
                "{}: dropping {} undelivered packets",
                self.descriptor.uid,
                self.pending.len()
            );
            self.pending.clear();
        }
        self.pool.clear();
        self.path.recycle(self.pool.take_evicted());

        tracing::info!(
            "{}: closed after {} frames, {} packets, {} discarded",
            self.descriptor.uid,
            self.frames_submitted,
            self.packets_received,
            self.frames_discarded
        );
        self.state = State::Closed;
    }

    /// Stream headers, available once the first packet carrying them (or
    /// the codec's out-of-band headers) has been seen.
    #[must_use]
    pub fn extra_data(&self) -> Option<Bytes> {
        self.side_data.extra_data()
    }

    /// SEI of the most recent packet that carried any.
    #[must_use]
    pub fn sei_data(&self) -> Option<Bytes> {
        self.side_data.sei_data()
    }

    /// Samples per channel every audio frame must carry, 0 for any.
    #[must_use]
    pub fn frame_size(&self) -> usize {
        self.codec.frame_size()
    }

    #[must_use]
    pub fn video_info(&self) -> Option<VideoInfo> {
        self.parameters.as_video().map(|video| VideoInfo {
            format: video.pixel_format,
            width: video.width,
            height: video.height,
            color_space: video.color_space,
            color_range: video.color_range,
        })
    }

    #[must_use]
    pub fn audio_info(&self) -> Option<AudioInfo> {
        self.parameters.as_audio().map(|audio| AudioInfo {
            format: audio.sample_format,
            sample_rate: audio.sample_rate,
            channels: audio.channels,
        })
    }

    #[must_use]
    pub fn is_hardware_encode(&self) -> bool {
        P::HARDWARE
    }

    /// Frames the codec holds before the first packet comes out.
    #[must_use]
    pub fn lag_in_frames(&self) -> u64 {
        self.lag_in_frames
    }

    #[must_use]
    pub fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    #[must_use]
    pub fn stats(&self) -> InstanceStats {
        InstanceStats {
            frames_submitted: self.frames_submitted,
            packets_received: self.packets_received,
            frames_discarded: self.frames_discarded,
            pending_packets: self.pending.len(),
            pool: self.pool.stats(),
        }
    }

    fn expect_state(&self, operation: &'static str, allowed: &[State]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(EncodeError::InvalidState {
                codec: self.descriptor.codec.clone(),
                operation,
                state: self.state,
            })
        }
    }

    /// Drop idle pooled frames and hand them back to the path.
    fn reap(&mut self) {
        self.pool.reap(self.idle_threshold);
        let evicted = self.pool.take_evicted();
        if !evicted.is_empty() {
            self.path.recycle(evicted);
        }
    }

    /// Submit the pooled frame `handle` and return the next packet, if any.
    fn encode_pooled(&mut self, handle: FrameHandle) -> Result<Option<EncodedPacket>> {
        if let Err(e) = self.send_pooled(handle) {
            // The frame never reached the codec; it goes back to the pool.
            if let Err(release) = self.pool.release(handle) {
                tracing::debug!("{}: release after failed send: {}", self.descriptor.uid, release);
            }
            return Err(e);
        }
        self.pool.submit(handle)?;
        self.frames_submitted += 1;
        self.state = State::Running;

        let in_flight = self.pool.in_flight() as u64;
        if in_flight > self.lag_in_frames {
            self.wait_for_packet()?;
        } else {
            tracing::debug!(
                "{}: lagging, {} of {} frames in flight",
                self.descriptor.uid,
                in_flight,
                self.lag_in_frames
            );
            if self.pending.is_empty() {
                self.poll_codec("receive_packet")?;
            }
        }
        Ok(self.pending.pop_front())
    }

    /// Send a pooled frame, receiving packets whenever the codec's input
    /// is full.
    fn send_pooled(&mut self, handle: FrameHandle) -> Result<()> {
        let mut deadline = Instant::now() + self.retry_window;
        loop {
            let frame = self.pool.frame(handle)?;
            match self.codec.send_frame(frame) {
                Ok(()) => return Ok(()),
                Err(CodecError::Again) => {
                    if self.poll_codec("send_frame")? {
                        deadline = Instant::now() + self.retry_window;
                        continue;
                    }
                    if Instant::now() >= deadline {
                        tracing::error!("{}: encoder stalled", self.descriptor.uid);
                        return Err(EncodeError::Stalled {
                            codec: self.descriptor.codec.clone(),
                            operation: "send_frame",
                        });
                    }
                    thread::sleep(RETRY_BACKOFF);
                }
                Err(e) => {
                    tracing::error!("{}: send_frame failed: {}", self.descriptor.uid, e);
                    return Err(EncodeError::codec(&self.descriptor.codec, "send_frame", e));
                }
            }
        }
    }

    /// Wait up to the retry window for a packet. A codec holding more
    /// frames than it declared yields no packet for this call.
    fn wait_for_packet(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.retry_window;
        while self.pending.is_empty() {
            if self.poll_codec("receive_packet")? {
                break;
            }
            if Instant::now() >= deadline {
                tracing::debug!(
                    "{}: no packet within {:?}, {} frames in flight",
                    self.descriptor.uid,
                    self.retry_window,
                    self.pool.in_flight()
                );
                break;
            }
            thread::sleep(RETRY_BACKOFF);
        }
        Ok(())
    }

    /// Try to receive one packet from the codec. Returns whether a packet
    /// was received.
    fn poll_codec(&mut self, operation: &'static str) -> Result<bool> {
        match self.codec.receive_packet() {
            Ok(packet) => {
                self.accept_packet(packet);
                Ok(true)
            }
            Err(CodecError::Again) => Ok(false),
            Err(e) => {
                tracing::error!("{}: {} failed: {}", self.descriptor.uid, operation, e);
                Err(EncodeError::codec(&self.descriptor.codec, operation, e))
            }
        }
    }

    /// Receive packets after a flush until end of stream. Returns false if
    /// the codec stopped making progress first.
    fn receive_until_eof(&mut self) -> bool {
        let mut deadline = Instant::now() + self.retry_window;
        loop {
            match self.codec.receive_packet() {
                Ok(packet) => {
                    self.accept_packet(packet);
                    deadline = Instant::now() + self.retry_window;
                }
                Err(CodecError::Eof) => return true,
                Err(CodecError::Again) => {
                    if Instant::now() >= deadline {
                        tracing::warn!(
                            "{}: flush did not complete within {:?}",
                            self.descriptor.uid,
                            self.retry_window
                        );
                        return false;
                    }
                    thread::sleep(RETRY_BACKOFF);
                }
                Err(e) => {
                    tracing::error!("{}: flush failed: {}", self.descriptor.uid, e);
                    return false;
                }
            }
        }
    }

    fn accept_packet(&mut self, mut packet: EncodedPacket) {
        if self.pool.retire_oldest().is_none() {
            tracing::warn!(
                "{}: packet without a frame in flight",
                self.descriptor.uid
            );
        }
        packet.frame_index = self.packets_received;
        self.packets_received += 1;
        self.side_data.observe(&packet.data, self.codec.extradata());
        if !self.have_first_frame {
            self.have_first_frame = true;
            tracing::debug!(
                "{}: first packet ({} bytes, keyframe: {})",
                self.descriptor.uid,
                packet.data.len(),
                packet.is_keyframe
            );
        }
        self.pending.push_back(packet);
    }

    fn media_mismatch(&self, operation: &'static str) -> EncodeError {
        EncodeError::configuration(
            &self.descriptor.codec,
            format!("{} is not supported by a {:?} encoder", operation, self.parameters.kind()),
        )
    }
}

impl EncodeInstance<SoftwareIngest> {
    /// Encode a raw video frame.
    ///
    /// The frame is converted into a pooled frame in the codec's pixel
    /// format. Returns the next packet in codec output order, if one is
    /// ready.
    pub fn video_encode(&mut self, src: &VideoFrameRef<'_>) -> Result<Option<EncodedPacket>> {
        self.expect_state("video_encode", &[State::Configured, State::Running])?;
        let video = self
            .parameters
            .as_video()
            .ok_or_else(|| self.media_mismatch("video_encode"))?;
        if src.width != video.width || src.height != video.height {
            return Err(EncodeError::configuration(
                &self.descriptor.codec,
                format!(
                    "frame is {}x{}, encoder expects {}x{}",
                    src.width, src.height, video.width, video.height
                ),
            ));
        }
        let layout = FrameLayout::Video {
            format: video.pixel_format,
            width: video.width,
            height: video.height,
        };

        self.reap();
        let handle = self.pool.acquire(layout)?;
        let converted = match self.pool.frame_mut(handle)? {
            Frame::Video(frame) => self.path.fill(src, frame),
            _ => Err(CodecError::UnsupportedPixelFormat),
        };
        if let Err(e) = converted {
            self.pool.release(handle)?;
            return Err(EncodeError::codec(&self.descriptor.codec, "convert", e));
        }
        self.encode_pooled(handle)
    }

    /// Encode a raw audio frame.
    pub fn audio_encode(&mut self, src: &AudioFrameRef<'_>) -> Result<Option<EncodedPacket>> {
        self.expect_state("audio_encode", &[State::Configured, State::Running])?;
        let audio = self
            .parameters
            .as_audio()
            .ok_or_else(|| self.media_mismatch("audio_encode"))?;
        let frame_size = self.codec.frame_size();
        if frame_size != 0 && src.samples != frame_size {
            return Err(EncodeError::configuration(
                &self.descriptor.codec,
                format!(
                    "audio frame has {} samples, encoder expects {}",
                    src.samples, frame_size
                ),
            ));
        }
        if src.format != audio.sample_format || src.channels != audio.channels {
            return Err(EncodeError::configuration(
                &self.descriptor.codec,
                format!(
                    "audio frame is {:?} x{}, encoder expects {:?} x{}",
                    src.format, src.channels, audio.sample_format, audio.channels
                ),
            ));
        }
        let layout = FrameLayout::Audio {
            format: audio.sample_format,
            channels: audio.channels,
            samples: src.samples,
        };

        self.reap();
        let handle = self.pool.acquire(layout)?;
        let copied = match self.pool.frame_mut(handle)? {
            Frame::Audio(frame) => frame.copy_from(src),
            _ => Err(CodecError::UnsupportedSampleFormat),
        };
        if let Err(e) = copied {
            self.pool.release(handle)?;
            return Err(EncodeError::codec(&self.descriptor.codec, "copy", e));
        }
        self.encode_pooled(handle)
    }
}

impl EncodeInstance<HardwareIngest> {
    /// Encode a shared host texture.
    ///
    /// The texture is locked with its lock key, copied into a pooled device
    /// surface and unlocked before this returns; `next_key` receives the key
    /// it was released with, also when the copy fails. A failed import closes
    /// the session.
    pub fn video_encode_texture(
        &mut self,
        texture: &TextureFrame,
        next_key: &mut u64,
    ) -> Result<Option<EncodedPacket>> {
        self.expect_state("video_encode_texture", &[State::Configured, State::Running])?;
        let video = self
            .parameters
            .as_video()
            .ok_or_else(|| self.media_mismatch("video_encode_texture"))?;
        let layout = FrameLayout::Hardware {
            device: self.path.device(),
            format: video.pixel_format,
            width: video.width,
            height: video.height,
        };

        self.reap();
        let path = &mut self.path;
        let acquired = self.pool.acquire_with(layout, |layout| {
            path.allocate(layout)
                .map_err(|e| ImportFailure::Hardware("allocate", e))
        });
        let handle = match acquired {
            Ok(handle) => handle,
            Err(ImportFailure::Pool(e)) => return Err(e.into()),
            Err(ImportFailure::Hardware(operation, e)) => return Err(self.import_failed(operation, e)),
        };

        let imported = match self.pool.frame_mut(handle)? {
            Frame::Hardware(surface) => {
                surface.pts = texture.pts;
                self.path.import(texture, surface, next_key)
            }
            _ => Err((
                "import",
                HwError::FormatMismatch("pooled frame is not a surface".to_string()),
            )),
        };
        if let Err((operation, e)) = imported {
            self.pool.release(handle)?;
            return Err(self.import_failed(operation, e));
        }
        self.encode_pooled(handle)
    }

    /// Tear the session down after a failed import.
    fn import_failed(&mut self, operation: &'static str, source: HwError) -> EncodeError {
        tracing::error!(
            "{}: hardware {} failed: {}, closing session",
            self.descriptor.uid,
            operation,
            source
        );
        self.close();
        EncodeError::HardwareImportFailed {
            codec: self.descriptor.codec.clone(),
            operation,
            source,
        }
    }
}

/// Error of a surface acquisition.
enum ImportFailure {
    Pool(PoolError),
    Hardware(&'static str, HwError),
}

impl From<PoolError> for ImportFailure {
    fn from(e: PoolError) -> Self {
        Self::Pool(e)
    }
}

impl<P: IngestPath> Drop for EncodeInstance<P> {
    fn drop(&mut self) {
        self.close();
    }
}
