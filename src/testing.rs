//! Scriptable codec and hardware doubles for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ffenc_codec::{
    CodecError, CodecInfo, CodecLibrary, CodecParameters, EncodedPacket, EncoderBackend, Frame,
    HwDeviceHandle, HwDeviceType, HwFrame, MediaKind, PixelFormat, RawLibrary, SampleFormat,
};

use crate::hw::{AdapterInfo, HwApi, HwError, HwInstance, TextureHandle};
use crate::registry::CodecDescriptor;

pub const MOCK_H264: &str = "mock264";
pub const MOCK_H264_HW: &str = "mock264_cuda";
pub const MOCK_AUDIO: &str = "mockaudio";

/// H.264 SPS and PPS the mock emits when asked for in-band headers.
pub const MOCK_SPS: [u8; 5] = [0x67, 0x42, 0xC0, 0x1E, 0x8C];
pub const MOCK_PPS: [u8; 3] = [0x68, 0xCE, 0x3C];

/// Behavior of mock codecs.
#[derive(Debug, Clone, Default)]
pub struct MockScript {
    /// Frames held before the first packet comes out.
    pub lookahead: u32,
    /// Delay reported to callers, when it differs from `lookahead`.
    pub declared_delay: Option<u32>,
    /// Frame indices whose first send attempt returns `Again`.
    pub again_at: Vec<u64>,
    pub fail_open: bool,
    /// Out-of-band headers.
    pub extradata: Option<Vec<u8>>,
    /// Put SPS/PPS in front of the first packet.
    pub emit_headers: bool,
    /// Attach an SEI NAL to every n-th packet, starting with the first.
    pub sei_every: u64,
    /// Never finish after a flush.
    pub stall_flush: bool,
    /// Never accept a frame.
    pub stall_send: bool,
    /// Options that may change while open.
    pub live_options: Vec<String>,
    /// Samples per audio frame.
    pub frame_size: usize,
}

/// What the mock codecs of one library observed.
#[derive(Debug, Clone, Default)]
pub struct MockLog {
    pub send_attempts: u64,
    pub accepted_pts: Vec<i64>,
    pub opens: u32,
    pub closes: u32,
    pub flushes: u32,
    pub options: Vec<(String, String)>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

/// Library of scripted encoders.
pub struct MockLibrary {
    script: MockScript,
    log: Arc<Mutex<MockLog>>,
}

impl MockLibrary {
    pub fn new(script: MockScript) -> Self {
        Self {
            script,
            log: Arc::default(),
        }
    }

    pub fn log(&self) -> MockLog {
        lock(&self.log).clone()
    }
}

impl CodecLibrary for MockLibrary {
    fn name(&self) -> &str {
        "mock"
    }

    fn encoders(&self) -> Vec<CodecInfo> {
        vec![
            CodecInfo::video(MOCK_H264, "Mock H.264", &[PixelFormat::Nv12, PixelFormat::I420]),
            CodecInfo::video(MOCK_H264_HW, "Mock H.264 (CUDA)", &[PixelFormat::Nv12])
                .with_hw_device(HwDeviceType::Cuda),
            CodecInfo::audio(MOCK_AUDIO, "Mock audio", &[SampleFormat::F32]),
        ]
    }

    fn create(&self, name: &str) -> Result<Box<dyn EncoderBackend>, CodecError> {
        let info = self
            .find(name)
            .ok_or_else(|| CodecError::EncoderNotFound(name.to_string()))?;
        Ok(Box::new(MockCodec {
            info,
            script: self.script.clone(),
            log: Arc::clone(&self.log),
            options: HashMap::new(),
            open: false,
            flushed: false,
            queue: VecDeque::new(),
            output: VecDeque::new(),
            again_fired: HashSet::new(),
            accepted: 0,
            emitted: 0,
        }))
    }
}

struct MockCodec {
    info: CodecInfo,
    script: MockScript,
    log: Arc<Mutex<MockLog>>,
    options: HashMap<String, String>,
    open: bool,
    flushed: bool,
    /// Accepted frames not yet encoded, as pts.
    queue: VecDeque<i64>,
    output: VecDeque<EncodedPacket>,
    again_fired: HashSet<u64>,
    accepted: u64,
    emitted: u64,
}

impl MockCodec {
    fn emit_oldest(&mut self) {
        let Some(pts) = self.queue.pop_front() else {
            return;
        };
        let index = self.emitted;
        self.emitted += 1;
        // High bit set so payloads never form a start code.
        let tag = 0x80 | (index as u8 & 0x7F);

        let mut data = Vec::new();
        if self.script.emit_headers && index == 0 {
            for nal in [&MOCK_SPS[..], &MOCK_PPS[..]] {
                data.extend_from_slice(&[0, 0, 0, 1]);
                data.extend_from_slice(nal);
            }
        }
        if self.script.sei_every > 0 && index % self.script.sei_every == 0 {
            data.extend_from_slice(&[0, 0, 1, 0x06, 0x05, tag]);
        }
        let keyframe = index == 0;
        data.extend_from_slice(&[0, 0, 1, if keyframe { 0x65 } else { 0x41 }, tag]);
        self.output.push_back(EncodedPacket::new(data, pts, pts, keyframe));
    }
}

impl EncoderBackend for MockCodec {
    fn info(&self) -> &CodecInfo {
        &self.info
    }

    fn set_option(&mut self, key: &str, value: &str) -> Result<(), CodecError> {
        if !matches!(key, "b" | "g" | "preset" | "profile" | "bf") {
            return Err(CodecError::UnknownOption(key.to_string()));
        }
        if self.open && !self.script.live_options.iter().any(|k| k == key) {
            return Err(CodecError::AlreadyOpen);
        }
        if matches!(key, "b" | "g" | "bf") && value.parse::<i64>().is_err() {
            return Err(CodecError::invalid_value(key, value, "expected an integer"));
        }
        lock(&self.log)
            .options
            .push((key.to_string(), value.to_string()));
        self.options.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn option(&self, key: &str) -> Option<String> {
        self.options.get(key).cloned()
    }

    fn open(&mut self, params: &CodecParameters) -> Result<(), CodecError> {
        if self.script.fail_open {
            return Err(CodecError::generic("scripted open failure"));
        }
        if params.kind() != self.info.media {
            return Err(CodecError::unsupported("media kind mismatch"));
        }
        if let Some(video) = params.as_video() {
            if !self.info.supports_pixel_format(video.pixel_format) {
                return Err(CodecError::UnsupportedPixelFormat);
            }
        }
        lock(&self.log).opens += 1;
        self.open = true;
        Ok(())
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<(), CodecError> {
        lock(&self.log).send_attempts += 1;
        if !self.open {
            return Err(CodecError::NotOpen);
        }
        if self.flushed {
            return Err(CodecError::Eof);
        }
        if self.script.stall_send {
            return Err(CodecError::Again);
        }
        let index = self.accepted;
        if self.script.again_at.contains(&index) && self.again_fired.insert(index) {
            self.emit_oldest();
            return Err(CodecError::Again);
        }

        self.accepted += 1;
        self.queue.push_back(frame.pts());
        lock(&self.log).accepted_pts.push(frame.pts());
        while self.queue.len() > self.script.lookahead as usize {
            self.emit_oldest();
        }
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<EncodedPacket, CodecError> {
        if !self.open {
            return Err(CodecError::NotOpen);
        }
        if let Some(packet) = self.output.pop_front() {
            return Ok(packet);
        }
        if !self.flushed || self.script.stall_flush {
            return Err(CodecError::Again);
        }
        if self.queue.is_empty() {
            return Err(CodecError::Eof);
        }
        self.emit_oldest();
        self.output.pop_front().ok_or(CodecError::Eof)
    }

    fn flush(&mut self) -> Result<(), CodecError> {
        if !self.open {
            return Err(CodecError::NotOpen);
        }
        lock(&self.log).flushes += 1;
        self.flushed = true;
        Ok(())
    }

    fn close(&mut self) {
        lock(&self.log).closes += 1;
        self.open = false;
    }

    fn extradata(&self) -> Option<&[u8]> {
        self.script.extradata.as_deref().filter(|_| self.open)
    }

    fn frame_size(&self) -> usize {
        match self.info.media {
            MediaKind::Audio => self.script.frame_size,
            MediaKind::Video => 0,
        }
    }

    fn delay(&self) -> u32 {
        self.script.declared_delay.unwrap_or(self.script.lookahead)
    }
}

/// Descriptor of a raw or mock encoder by codec name.
pub fn descriptor(name: &str) -> CodecDescriptor {
    let info = RawLibrary::new()
        .find(name)
        .or_else(|| MockLibrary::new(MockScript::default()).find(name))
        .unwrap_or_else(|| panic!("no test encoder named {}", name));
    if info.is_hardware() {
        CodecDescriptor::texture(info)
    } else {
        CodecDescriptor::software(info)
    }
}

// ============================================================================
// Hardware
// ============================================================================

/// Counters of the mock hardware API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HwStats {
    pub instances: u32,
    pub allocations: u32,
    pub releases: u32,
    pub locks: u32,
    pub unlocks: u32,
    pub copies: u32,
    pub last_unlock_key: Option<u64>,
}

#[derive(Debug, Default)]
struct HwState {
    stats: HwStats,
    fail_copies: bool,
    fail_locks: bool,
    /// Textures currently locked, with their key.
    locked: HashMap<TextureHandle, u64>,
}

/// CUDA-typed hardware API with two adapters.
#[derive(Clone, Default)]
pub struct MockHwApi {
    state: Arc<Mutex<HwState>>,
}

impl MockHwApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> HwStats {
        lock(&self.state).stats
    }

    /// Textures still locked.
    pub fn locked(&self) -> usize {
        lock(&self.state).locked.len()
    }

    pub fn fail_copies(&self, fail: bool) {
        lock(&self.state).fail_copies = fail;
    }

    pub fn fail_locks(&self, fail: bool) {
        lock(&self.state).fail_locks = fail;
    }

    fn instance(&self, id: u64) -> Box<dyn HwInstance> {
        lock(&self.state).stats.instances += 1;
        Box::new(MockHwInstance {
            state: Arc::clone(&self.state),
            device: HwDeviceHandle {
                device_type: HwDeviceType::Cuda,
                id,
            },
            next_surface: 1,
        })
    }
}

impl HwApi for MockHwApi {
    fn device_type(&self) -> HwDeviceType {
        HwDeviceType::Cuda
    }

    fn enumerate_adapters(&self) -> Vec<AdapterInfo> {
        (0..2)
            .map(|index| AdapterInfo {
                index,
                name: format!("Mock GPU {}", index),
                vendor_id: 0x10DE,
                device_id: 0x2000 + index,
            })
            .collect()
    }

    fn create(&self, adapter: &AdapterInfo) -> Result<Box<dyn HwInstance>, HwError> {
        Ok(self.instance(u64::from(adapter.index) + 1))
    }

    fn create_from_host(&self) -> Result<Box<dyn HwInstance>, HwError> {
        Ok(self.instance(0))
    }
}

struct MockHwInstance {
    state: Arc<Mutex<HwState>>,
    device: HwDeviceHandle,
    next_surface: u64,
}

impl HwInstance for MockHwInstance {
    fn device(&self) -> HwDeviceHandle {
        self.device
    }

    fn allocate_frame(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<HwFrame, HwError> {
        lock(&self.state).stats.allocations += 1;
        let surface = self.next_surface;
        self.next_surface += 1;
        Ok(HwFrame {
            device: self.device,
            surface,
            format,
            width,
            height,
            pts: 0,
        })
    }

    fn release_frame(&mut self, _frame: HwFrame) {
        lock(&self.state).stats.releases += 1;
    }

    fn lock(&mut self, texture: TextureHandle, key: u64, _timeout: Duration) -> Result<(), HwError> {
        let mut state = lock(&self.state);
        if state.fail_locks {
            return Err(HwError::LockTimeout { key });
        }
        state.stats.locks += 1;
        state.locked.insert(texture, key);
        Ok(())
    }

    fn unlock(&mut self, texture: TextureHandle, key: u64) -> Result<(), HwError> {
        let mut state = lock(&self.state);
        state.stats.unlocks += 1;
        state.stats.last_unlock_key = Some(key);
        state
            .locked
            .remove(&texture)
            .map(|_| ())
            .ok_or_else(|| HwError::Backend(format!("{} is not locked", texture)))
    }

    fn copy_from_host(&mut self, texture: TextureHandle, _frame: &mut HwFrame) -> Result<(), HwError> {
        let mut state = lock(&self.state);
        if state.fail_copies {
            return Err(HwError::Backend(format!("copy of {} failed", texture)));
        }
        if !state.locked.contains_key(&texture) {
            return Err(HwError::Backend(format!("{} copied while unlocked", texture)));
        }
        state.stats.copies += 1;
        Ok(())
    }
}
