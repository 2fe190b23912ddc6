//! Frame ingestion paths.
//!
//! A session commits to one way of getting host frames into pooled codec
//! frames when it is created: converting raw buffers on the CPU
//! ([`SoftwareIngest`]) or importing shared GPU textures into device
//! surfaces ([`HardwareIngest`]). The choice is the type parameter of
//! [`EncodeInstance`](crate::EncodeInstance), so each session only exposes
//! the encode calls its path supports.

use std::time::Duration;

use ffenc_codec::{
    CodecError, Converter, Frame, FrameLayout, HwDeviceHandle, HwFrame, VideoFrame,
    VideoFrameRef,
};

use crate::hw::{HwApi, HwError, HwInstance, TextureFrame, TextureLock, DEFAULT_LOCK_TIMEOUT};

/// Shared behavior of the ingestion paths.
pub trait IngestPath: Send {
    /// Whether frames reach the codec as device surfaces.
    const HARDWARE: bool;

    /// Take back frames the pool dropped.
    fn recycle(&mut self, frames: Vec<Frame>);
}

/// CPU path: host buffers are converted into pooled frames.
pub struct SoftwareIngest {
    converter: Box<dyn Converter>,
}

impl SoftwareIngest {
    pub fn new(converter: Box<dyn Converter>) -> Self {
        Self { converter }
    }

    /// Convert `src` into the pooled `frame`.
    pub(crate) fn fill(
        &mut self,
        src: &VideoFrameRef<'_>,
        frame: &mut VideoFrame,
    ) -> Result<(), CodecError> {
        self.converter.convert(src, frame)
    }
}

impl IngestPath for SoftwareIngest {
    const HARDWARE: bool = false;

    fn recycle(&mut self, _frames: Vec<Frame>) {}
}

/// GPU path: host textures are copied into device surfaces.
pub struct HardwareIngest {
    instance: Box<dyn HwInstance>,
    lock_timeout: Duration,
}

impl HardwareIngest {
    /// Open a device instance on adapter `gpu`, or on the host's device
    /// when `gpu` is `None`.
    pub fn new(api: &dyn HwApi, gpu: Option<u32>) -> Result<Self, HwError> {
        let instance = match gpu {
            None => api.create_from_host()?,
            Some(index) => {
                let adapter = api
                    .enumerate_adapters()
                    .into_iter()
                    .find(|adapter| adapter.index == index)
                    .ok_or_else(|| HwError::Backend(format!("no adapter with index {}", index)))?;
                tracing::info!("using adapter {} ({})", adapter.index, adapter.name);
                api.create(&adapter)?
            }
        };
        Ok(Self {
            instance,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    /// Set how long to wait for the host to release a texture.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Device context surfaces live on.
    #[must_use]
    pub fn device(&self) -> HwDeviceHandle {
        self.instance.device()
    }

    /// Allocate a surface for a hardware layout.
    pub(crate) fn allocate(&mut self, layout: &FrameLayout) -> Result<Frame, HwError> {
        match *layout {
            FrameLayout::Hardware {
                format,
                width,
                height,
                ..
            } => self
                .instance
                .allocate_frame(format, width, height)
                .map(Frame::Hardware),
            other => Err(HwError::FormatMismatch(format!(
                "cannot allocate {:?} on a device",
                other
            ))),
        }
    }

    /// Lock `texture`, copy it into `surface` and unlock it again. Once the
    /// lock is held, the key the texture is released with is written to
    /// `next_key`, whether or not the copy succeeds.
    pub(crate) fn import(
        &mut self,
        texture: &TextureFrame,
        surface: &mut HwFrame,
        next_key: &mut u64,
    ) -> Result<(), (&'static str, HwError)> {
        let mut lock = TextureLock::acquire(self.instance.as_mut(), texture, self.lock_timeout)
            .map_err(|e| ("lock", e))?;
        *next_key = lock.release_key();
        lock.copy_into(surface).map_err(|e| ("copy", e))
    }
}

impl IngestPath for HardwareIngest {
    const HARDWARE: bool = true;

    fn recycle(&mut self, frames: Vec<Frame>) {
        for frame in frames {
            if let Frame::Hardware(surface) = frame {
                self.instance.release_frame(surface);
            }
        }
    }
}
