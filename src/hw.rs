//! Hardware capability interface.
//!
//! A hardware API (D3D11, CUDA, VAAPI, ...) is reached through two traits:
//! [`HwApi`] enumerates adapters and creates device instances, and
//! [`HwInstance`] owns one device context, allocates encoder surfaces and
//! imports host textures into them. Host textures are shared through keyed
//! locks: the host releases a texture with some key, the encoder locks it
//! with that key, copies, and unlocks with the key the host waits for next.
//!
//! [`TextureLock`] scopes that lock so it is released on every exit path.

use std::fmt;
use std::time::Duration;

use ffenc_codec::{HwDeviceHandle, HwDeviceType, HwFrame, PixelFormat};
use thiserror::Error;

/// How long to wait for the host to release a shared texture.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(1000);

/// Hardware backend errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HwError {
    #[error("texture format mismatch: {0}")]
    FormatMismatch(String),

    #[error("timed out waiting for texture lock with key {key}")]
    LockTimeout { key: u64 },

    #[error("hardware backend error: {0}")]
    Backend(String),
}

/// Host texture identifier, as handed out by the host's graphics API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

impl fmt::Display for TextureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "texture {:#x}", self.0)
    }
}

/// A frame delivered as a shared GPU texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureFrame {
    pub handle: TextureHandle,
    /// Presentation timestamp in codec time base units.
    pub pts: i64,
    /// Key the host released the texture with.
    pub lock_key: u64,
}

/// Description of a graphics adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub index: u32,
    pub name: String,
    pub vendor_id: u32,
    pub device_id: u32,
}

/// Entry point of one hardware API.
pub trait HwApi: Send + Sync {
    /// Device type instances of this API produce.
    fn device_type(&self) -> HwDeviceType;

    /// Adapters usable for encoding.
    fn enumerate_adapters(&self) -> Vec<AdapterInfo>;

    /// Create a device instance on a specific adapter.
    fn create(&self, adapter: &AdapterInfo) -> Result<Box<dyn HwInstance>, HwError>;

    /// Create a device instance sharing the host's rendering device, so host
    /// textures can be opened without cross-adapter copies.
    fn create_from_host(&self) -> Result<Box<dyn HwInstance>, HwError>;
}

/// One hardware device context.
pub trait HwInstance: Send {
    /// Handle passed to the codec as its device context.
    fn device(&self) -> HwDeviceHandle;

    /// Allocate an encoder input surface.
    fn allocate_frame(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<HwFrame, HwError>;

    /// Give back a surface the pool no longer needs.
    fn release_frame(&mut self, _frame: HwFrame) {}

    /// Acquire the keyed lock of a host texture.
    fn lock(&mut self, texture: TextureHandle, key: u64, timeout: Duration) -> Result<(), HwError>;

    /// Release the keyed lock of a host texture with `key`.
    fn unlock(&mut self, texture: TextureHandle, key: u64) -> Result<(), HwError>;

    /// Copy a locked host texture into an encoder surface.
    fn copy_from_host(&mut self, texture: TextureHandle, frame: &mut HwFrame) -> Result<(), HwError>;
}

/// Keyed lock on a host texture, released on drop.
///
/// The texture is unlocked with the release key, which starts out as the
/// key it was locked with.
pub struct TextureLock<'a> {
    instance: &'a mut dyn HwInstance,
    texture: TextureHandle,
    release_key: u64,
}

impl<'a> TextureLock<'a> {
    /// Lock `texture` with its lock key.
    pub fn acquire(
        instance: &'a mut dyn HwInstance,
        texture: &TextureFrame,
        timeout: Duration,
    ) -> Result<Self, HwError> {
        instance.lock(texture.handle, texture.lock_key, timeout)?;
        Ok(Self {
            instance,
            texture: texture.handle,
            release_key: texture.lock_key,
        })
    }

    /// Copy the locked texture into `frame`.
    pub fn copy_into(&mut self, frame: &mut HwFrame) -> Result<(), HwError> {
        self.instance.copy_from_host(self.texture, frame)
    }

    /// Key the texture will be unlocked with.
    #[must_use]
    pub fn release_key(&self) -> u64 {
        self.release_key
    }
}

impl Drop for TextureLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.instance.unlock(self.texture, self.release_key) {
            tracing::warn!("failed to unlock {}: {}", self.texture, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHwApi;

    fn texture(key: u64) -> TextureFrame {
        TextureFrame {
            handle: TextureHandle(0x10),
            pts: 0,
            lock_key: key,
        }
    }

    #[test]
    fn test_lock_released_on_drop() {
        let api = MockHwApi::new();
        let mut instance = api.create_from_host().unwrap();
        {
            let lock = TextureLock::acquire(instance.as_mut(), &texture(3), DEFAULT_LOCK_TIMEOUT)
                .unwrap();
            assert_eq!(lock.release_key(), 3);
            assert_eq!(api.stats().locks, 1);
            assert_eq!(api.stats().unlocks, 0);
        }
        assert_eq!(api.stats().unlocks, 1);
        assert_eq!(api.stats().last_unlock_key, Some(3));
    }

    #[test]
    fn test_lock_released_with_lock_key_after_copy_failure() {
        let api = MockHwApi::new();
        api.fail_copies(true);
        let mut instance = api.create_from_host().unwrap();
        let mut surface = instance.allocate_frame(PixelFormat::Nv12, 16, 16).unwrap();

        let result = (|| {
            let mut lock =
                TextureLock::acquire(instance.as_mut(), &texture(5), DEFAULT_LOCK_TIMEOUT)?;
            lock.copy_into(&mut surface)
        })();

        assert!(result.is_err());
        assert_eq!(api.stats().unlocks, 1);
        assert_eq!(api.stats().last_unlock_key, Some(5));
    }

    #[test]
    fn test_failed_lock_does_not_unlock() {
        let api = MockHwApi::new();
        api.fail_locks(true);
        let mut instance = api.create_from_host().unwrap();
        let result = TextureLock::acquire(instance.as_mut(), &texture(1), DEFAULT_LOCK_TIMEOUT);
        assert!(matches!(result, Err(HwError::LockTimeout { key: 1 })));
        assert_eq!(api.stats().unlocks, 0);
    }
}
