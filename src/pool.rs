//! Frame pool for one encode session.
//!
//! Encoders hold on to submitted frames until the matching packet comes out,
//! so a session needs more than one frame buffer and allocating one per
//! submission is wasteful. The pool is an arena of slots plus three index
//! lists:
//!
//! - a free stack, most recently released on top, so the hottest buffer is
//!   reused first
//! - a vacant list of slots whose buffer was dropped
//! - an in-flight FIFO of submitted frames, retired oldest first as packets
//!   come out of the codec
//!
//! Free buffers that sit unused for longer than the idle threshold are
//! dropped by [`FramePool::reap`], which the owner calls on its own cadence.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use ffenc_codec::{Frame, FrameLayout};
use thiserror::Error;

/// Default number of slots per pool.
pub const DEFAULT_CAPACITY: usize = 64;

/// Default idle time after which free buffers are reaped.
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_millis(1000);

/// Frame pool errors.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every slot holds a frame that is acquired or in flight.
    #[error("frame pool exhausted ({capacity} frames in use)")]
    Exhausted { capacity: usize },

    /// The handle refers to a slot that has since been reused or dropped.
    #[error("stale frame handle {0}")]
    StaleHandle(FrameHandle),

    /// The slot is not in the state the operation needs.
    #[error("frame {handle} is {actual}, expected {expected}")]
    WrongState {
        handle: FrameHandle,
        expected: SlotState,
        actual: SlotState,
    },

    /// The layout cannot be allocated in system memory.
    #[error("cannot allocate a frame for {0:?}")]
    Unallocatable(FrameLayout),
}

/// Reference to a pooled frame.
///
/// Handles carry the slot generation, so a handle kept past a reap or
/// eviction is detected instead of aliasing the new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle {
    index: u32,
    generation: u32,
}

impl fmt::Display for FrameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}g{}", self.index, self.generation)
    }
}

/// Lifecycle of a pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No buffer.
    Vacant,
    /// Buffer available for reuse.
    Free,
    /// Handed out, being filled by the host side.
    Acquired,
    /// Submitted to the codec, waiting for its packet.
    Used,
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Vacant => "vacant",
            Self::Free => "free",
            Self::Acquired => "acquired",
            Self::Used => "used",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Slot {
    state: SlotState,
    generation: u32,
    frame: Option<Frame>,
    last_used: Instant,
}

impl Slot {
    fn vacant() -> Self {
        Self {
            state: SlotState::Vacant,
            generation: 0,
            frame: None,
            last_used: Instant::now(),
        }
    }

    fn layout(&self) -> Option<FrameLayout> {
        self.frame.as_ref().map(Frame::layout)
    }

    /// Drop the buffer and invalidate outstanding handles.
    fn vacate(&mut self) -> Option<Frame> {
        self.state = SlotState::Vacant;
        self.generation = self.generation.wrapping_add(1);
        self.frame.take()
    }
}

/// Statistics about the current state of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Hard maximum number of buffers.
    pub capacity: usize,
    /// Slots currently holding a buffer.
    pub allocated: usize,
    /// Buffers available for reuse.
    pub free: usize,
    /// Buffers handed out and not yet submitted.
    pub acquired: usize,
    /// Buffers submitted to the codec.
    pub in_flight: usize,
    /// Buffers allocated since creation.
    pub total_allocations: u64,
    /// Buffers dropped by reaping or eviction since creation.
    pub total_dropped: u64,
}

/// Arena of reusable frames.
#[derive(Debug)]
pub struct FramePool {
    slots: Vec<Slot>,
    free: Vec<usize>,
    vacant: Vec<usize>,
    in_flight: VecDeque<usize>,
    capacity: usize,
    evicted: Vec<Frame>,
    total_allocations: u64,
    total_dropped: u64,
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl FramePool {
    /// Create an empty pool holding at most `capacity` buffers.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            vacant: Vec::new(),
            in_flight: VecDeque::new(),
            capacity,
            evicted: Vec::new(),
            total_allocations: 0,
            total_dropped: 0,
        }
    }

    /// Acquire a system-memory frame of `layout`.
    pub fn acquire(&mut self, layout: FrameLayout) -> Result<FrameHandle, PoolError> {
        self.acquire_with(layout, |layout| {
            Frame::allocate(layout).ok_or(PoolError::Unallocatable(*layout))
        })
    }

    /// Acquire a frame of `layout`, calling `allocate` if no free buffer
    /// matches.
    ///
    /// Reuse order: the most recently released matching buffer, then a
    /// vacant or new slot, then the slot of the least recently used free
    /// buffer of another layout.
    pub fn acquire_with<E, F>(&mut self, layout: FrameLayout, allocate: F) -> Result<FrameHandle, E>
    where
        E: From<PoolError>,
        F: FnOnce(&FrameLayout) -> Result<Frame, E>,
    {
        if let Some(pos) = self
            .free
            .iter()
            .rposition(|&index| self.slots[index].layout() == Some(layout))
        {
            let index = self.free.remove(pos);
            self.slots[index].state = SlotState::Acquired;
            return Ok(self.handle(index));
        }

        let index = if let Some(index) = self.vacant.pop() {
            index
        } else if self.slots.len() < self.capacity {
            self.slots.push(Slot::vacant());
            self.slots.len() - 1
        } else if let Some(index) = self.evict_least_recent() {
            index
        } else {
            return Err(PoolError::Exhausted {
                capacity: self.capacity,
            }
            .into());
        };

        match allocate(&layout) {
            Ok(frame) => {
                let slot = &mut self.slots[index];
                slot.frame = Some(frame);
                slot.state = SlotState::Acquired;
                slot.last_used = Instant::now();
                self.total_allocations += 1;
                tracing::debug!(
                    "allocated pooled frame {} for {:?} ({} allocated)",
                    index,
                    layout,
                    self.allocated()
                );
                Ok(self.handle(index))
            }
            Err(e) => {
                self.vacant.push(index);
                Err(e)
            }
        }
    }

    /// Borrow a frame in any non-vacant state.
    pub fn frame(&self, handle: FrameHandle) -> Result<&Frame, PoolError> {
        let slot = self.slot(handle)?;
        slot.frame.as_ref().ok_or(PoolError::StaleHandle(handle))
    }

    /// Mutably borrow an acquired frame.
    pub fn frame_mut(&mut self, handle: FrameHandle) -> Result<&mut Frame, PoolError> {
        self.expect_state(handle, SlotState::Acquired)?;
        self.slots[handle.index as usize]
            .frame
            .as_mut()
            .ok_or(PoolError::StaleHandle(handle))
    }

    /// Mark an acquired frame as submitted to the codec.
    pub fn submit(&mut self, handle: FrameHandle) -> Result<(), PoolError> {
        self.expect_state(handle, SlotState::Acquired)?;
        let index = handle.index as usize;
        self.slots[index].state = SlotState::Used;
        self.in_flight.push_back(index);
        Ok(())
    }

    /// Return the oldest in-flight frame to the free stack.
    pub fn retire_oldest(&mut self) -> Option<FrameHandle> {
        let index = self.in_flight.pop_front()?;
        self.make_free(index);
        Some(self.handle(index))
    }

    /// Return an acquired or in-flight frame to the free stack.
    pub fn release(&mut self, handle: FrameHandle) -> Result<(), PoolError> {
        let state = self.slot(handle)?.state;
        let index = handle.index as usize;
        match state {
            SlotState::Acquired => {}
            SlotState::Used => self.in_flight.retain(|&i| i != index),
            actual => {
                return Err(PoolError::WrongState {
                    handle,
                    expected: SlotState::Acquired,
                    actual,
                })
            }
        }
        self.make_free(index);
        Ok(())
    }

    /// Drop free buffers unused for at least `idle_threshold`. Returns the
    /// number of buffers dropped.
    pub fn reap(&mut self, idle_threshold: Duration) -> usize {
        let now = Instant::now();
        let slots = &self.slots;
        let mut reaped = Vec::new();
        self.free.retain(|&index| {
            let idle = now.saturating_duration_since(slots[index].last_used);
            if idle >= idle_threshold {
                reaped.push(index);
                false
            } else {
                true
            }
        });

        for &index in &reaped {
            if let Some(frame) = self.slots[index].vacate() {
                self.evicted.push(frame);
            }
            self.vacant.push(index);
        }
        self.total_dropped += reaped.len() as u64;
        if !reaped.is_empty() {
            tracing::debug!(
                "reaped {} idle frames ({} still allocated)",
                reaped.len(),
                self.allocated()
            );
        }
        reaped.len()
    }

    /// Take the buffers dropped by reaping or eviction since the last call,
    /// for owners that must hand them back to a device.
    pub fn take_evicted(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.evicted)
    }

    /// Return every in-flight frame to the free stack. Returns how many
    /// frames were abandoned.
    pub fn abandon_in_flight(&mut self) -> usize {
        let abandoned: Vec<usize> = self.in_flight.drain(..).collect();
        for &index in &abandoned {
            self.make_free(index);
        }
        abandoned.len()
    }

    /// Drop every buffer. Outstanding handles become stale.
    pub fn clear(&mut self) {
        self.free.clear();
        self.vacant.clear();
        self.in_flight.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(frame) = slot.vacate() {
                self.evicted.push(frame);
                self.total_dropped += 1;
            }
            self.vacant.push(index);
        }
    }

    /// Number of submitted frames not yet retired.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// State of the slot `handle` refers to.
    pub fn state(&self, handle: FrameHandle) -> Result<SlotState, PoolError> {
        self.slot(handle).map(|slot| slot.state)
    }

    /// Return current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let acquired = self
            .slots
            .iter()
            .filter(|slot| slot.state == SlotState::Acquired)
            .count();
        PoolStats {
            capacity: self.capacity,
            allocated: self.allocated(),
            free: self.free.len(),
            acquired,
            in_flight: self.in_flight.len(),
            total_allocations: self.total_allocations,
            total_dropped: self.total_dropped,
        }
    }

    fn allocated(&self) -> usize {
        self.slots.iter().filter(|slot| slot.frame.is_some()).count()
    }

    fn handle(&self, index: usize) -> FrameHandle {
        FrameHandle {
            index: index as u32,
            generation: self.slots[index].generation,
        }
    }

    fn slot(&self, handle: FrameHandle) -> Result<&Slot, PoolError> {
        match self.slots.get(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation && slot.state != SlotState::Vacant => {
                Ok(slot)
            }
            _ => Err(PoolError::StaleHandle(handle)),
        }
    }

    fn expect_state(&self, handle: FrameHandle, expected: SlotState) -> Result<(), PoolError> {
        let actual = self.slot(handle)?.state;
        if actual == expected {
            Ok(())
        } else {
            Err(PoolError::WrongState {
                handle,
                expected,
                actual,
            })
        }
    }

    fn make_free(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        slot.state = SlotState::Free;
        slot.last_used = Instant::now();
        self.free.push(index);
    }

    /// Drop the least recently used free buffer and return its slot.
    fn evict_least_recent(&mut self) -> Option<usize> {
        let pos = self
            .free
            .iter()
            .enumerate()
            .min_by_key(|&(_, &index)| self.slots[index].last_used)
            .map(|(pos, _)| pos)?;
        let index = self.free.remove(pos);
        if let Some(frame) = self.slots[index].vacate() {
            tracing::debug!("evicting pooled frame {} ({:?})", index, frame.layout());
            self.evicted.push(frame);
        }
        self.total_dropped += 1;
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffenc_codec::{PixelFormat, SampleFormat};

    fn video(width: u32) -> FrameLayout {
        FrameLayout::Video {
            format: PixelFormat::Nv12,
            width,
            height: 16,
        }
    }

    #[test]
    fn test_acquire_submit_retire() {
        let mut pool = FramePool::new(4);
        let handle = pool.acquire(video(16)).unwrap();
        assert_eq!(pool.state(handle).unwrap(), SlotState::Acquired);

        pool.submit(handle).unwrap();
        assert_eq!(pool.state(handle).unwrap(), SlotState::Used);
        assert!(pool.frame_mut(handle).is_err());
        assert_eq!(pool.in_flight(), 1);

        assert_eq!(pool.retire_oldest(), Some(handle));
        assert_eq!(pool.state(handle).unwrap(), SlotState::Free);
        assert_eq!(pool.retire_oldest(), None);
    }

    #[test]
    fn test_most_recently_freed_reused_first() {
        let mut pool = FramePool::new(4);
        let a = pool.acquire(video(16)).unwrap();
        let b = pool.acquire(video(16)).unwrap();
        pool.release(a).unwrap();
        pool.release(b).unwrap();

        assert_eq!(pool.acquire(video(16)).unwrap(), b);
        assert_eq!(pool.acquire(video(16)).unwrap(), a);
        assert_eq!(pool.stats().total_allocations, 2);
    }

    #[test]
    fn test_retire_in_submission_order() {
        let mut pool = FramePool::new(4);
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let h = pool.acquire(video(16)).unwrap();
                pool.submit(h).unwrap();
                h
            })
            .collect();
        for h in handles {
            assert_eq!(pool.retire_oldest(), Some(h));
        }
    }

    #[test]
    fn test_release_in_flight_removes_from_fifo() {
        let mut pool = FramePool::new(4);
        let a = pool.acquire(video(16)).unwrap();
        let b = pool.acquire(video(16)).unwrap();
        pool.submit(a).unwrap();
        pool.submit(b).unwrap();
        pool.release(a).unwrap();
        assert_eq!(pool.in_flight(), 1);
        assert_eq!(pool.retire_oldest(), Some(b));
        assert!(matches!(
            pool.release(a),
            Err(PoolError::WrongState {
                actual: SlotState::Free,
                ..
            })
        ));
    }

    #[test]
    fn test_exhausted_when_all_in_use() {
        let mut pool = FramePool::new(2);
        let a = pool.acquire(video(16)).unwrap();
        pool.acquire(video(16)).unwrap();
        assert!(matches!(
            pool.acquire(video(16)),
            Err(PoolError::Exhausted { capacity: 2 })
        ));
        pool.release(a).unwrap();
        assert_eq!(pool.acquire(video(16)).unwrap(), a);
    }

    #[test]
    fn test_mismatched_free_buffer_evicted_at_capacity() {
        let mut pool = FramePool::new(1);
        let a = pool.acquire(video(16)).unwrap();
        pool.release(a).unwrap();

        let b = pool.acquire(video(32)).unwrap();
        assert_ne!(a, b);
        assert!(matches!(pool.frame(a), Err(PoolError::StaleHandle(_))));
        assert_eq!(pool.take_evicted().len(), 1);
        assert_eq!(pool.stats().total_dropped, 1);
    }

    #[test]
    fn test_reap_idle_buffers() {
        let mut pool = FramePool::new(4);
        let a = pool.acquire(video(16)).unwrap();
        let b = pool.acquire(video(16)).unwrap();
        pool.release(a).unwrap();

        assert_eq!(pool.reap(Duration::from_secs(3600)), 0);
        assert_eq!(pool.reap(Duration::ZERO), 1);
        // Acquired frames are never reaped
        assert_eq!(pool.state(b).unwrap(), SlotState::Acquired);
        assert_eq!(pool.stats().allocated, 1);

        // The vacant slot is reused
        let c = pool.acquire(video(16)).unwrap();
        assert_eq!(pool.stats().allocated, 2);
        assert_ne!(c, a);
    }

    #[test]
    fn test_failed_allocation_keeps_slot_vacant() {
        let mut pool = FramePool::new(1);
        let result: Result<FrameHandle, PoolError> =
            pool.acquire_with(video(16), |layout| Err(PoolError::Unallocatable(*layout)));
        assert!(result.is_err());
        assert!(pool.acquire(video(16)).is_ok());
    }

    #[test]
    fn test_abandon_and_clear() {
        let mut pool = FramePool::new(4);
        for _ in 0..3 {
            let h = pool
                .acquire(FrameLayout::Audio {
                    format: SampleFormat::F32,
                    channels: 2,
                    samples: 1024,
                })
                .unwrap();
            pool.submit(h).unwrap();
        }
        assert_eq!(pool.abandon_in_flight(), 3);
        assert_eq!(pool.stats().free, 3);

        pool.clear();
        let stats = pool.stats();
        assert_eq!(stats.allocated, 0);
        assert_eq!(stats.in_flight, 0);
    }
}
