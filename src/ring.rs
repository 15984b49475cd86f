//! Per-channel timestamp queues
//!
//! Producers (decode threads, audio callbacks) push [`AudioFrame`]s; consumers
//! on other threads pop or search them by timestamp. Nothing here ever blocks
//! on capacity: a full or inactive queue drops the push and says so.

use std::collections::VecDeque;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::frame::AudioFrame;

pub const DEFAULT_CAPACITY: usize = 8;

struct Inner {
    frames: VecDeque<AudioFrame>,
    active: bool,
}

/// Bounded FIFO of frames for one logical channel.
pub struct ChannelRingBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl ChannelRingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                active: true,
            }),
            capacity,
        }
    }

    /// Append a frame. Returns `false` if the queue is inactive or full.
    pub fn push_frame(&self, frame: AudioFrame) -> bool {
        let mut inner = self.inner.lock();
        if !inner.active || inner.frames.len() >= self.capacity {
            return false;
        }
        inner.frames.push_back(frame);
        true
    }

    pub fn pop(&self) -> Option<AudioFrame> {
        let mut inner = self.inner.lock();
        if !inner.active {
            return None;
        }
        inner.frames.pop_front()
    }

    /// Take every queued frame in FIFO order.
    pub fn drain(&self) -> Vec<AudioFrame> {
        let mut inner = self.inner.lock();
        if !inner.active {
            return Vec::new();
        }
        inner.frames.drain(..).collect()
    }

    /// Take the frame closest to `target`.
    ///
    /// Frames at or before the target within `tolerance` win; failing that, a
    /// future frame within `tolerance / 2`. The chosen frame and everything
    /// queued before it are consumed.
    pub fn frame_at(&self, target: i64, tolerance: i64) -> Option<AudioFrame> {
        let mut inner = self.inner.lock();
        if !inner.active {
            return None;
        }

        let mut past: Option<(usize, i64)> = None;
        let mut future: Option<(usize, i64)> = None;
        for (i, frame) in inner.frames.iter().enumerate() {
            let diff = frame.timestamp() - target;
            if diff <= 0 && -diff <= tolerance {
                if past.map_or(true, |(_, best)| -diff < best) {
                    past = Some((i, -diff));
                }
            } else if diff > 0 && diff <= tolerance / 2 && future.map_or(true, |(_, best)| diff < best) {
                future = Some((i, diff));
            }
        }

        let (index, _) = past.or(future)?;
        inner.frames.drain(..index);
        inner.frames.pop_front()
    }

    pub fn available(&self) -> usize {
        self.inner.lock().frames.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// No room for another frame; `push_frame` would refuse.
    pub fn is_full(&self) -> bool {
        self.available() >= self.capacity
    }

    /// Fill level in `0.0..=1.0`.
    pub fn used_ratio(&self) -> f32 {
        self.available() as f32 / self.capacity as f32
    }

    /// Toggle drop behaviour. Does not touch queued frames.
    pub fn set_active(&self, active: bool) {
        self.inner.lock().active = active;
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    pub fn clear(&self) {
        self.inner.lock().frames.clear();
    }
}

impl Default for ChannelRingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Lazily created queues, one per channel index.
pub struct ChannelBuffers {
    buffers: Mutex<HashMap<usize, Arc<ChannelRingBuffer>>>,
    capacity: usize,
}

impl ChannelBuffers {
    /// Empty map; every queue created later holds `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// The queue for `channel`, created on first reference.
    pub fn get(&self, channel: usize) -> Arc<ChannelRingBuffer> {
        self.buffers
            .lock()
            .entry(channel)
            .or_insert_with(|| Arc::new(ChannelRingBuffer::new(self.capacity)))
            .clone()
    }

    /// The queue for `channel` if something already created it.
    pub fn existing(&self, channel: usize) -> Option<Arc<ChannelRingBuffer>> {
        self.buffers.lock().get(&channel).cloned()
    }

    /// Number of queues created so far.
    pub fn len(&self) -> usize {
        self.buffers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every active queue has room for one more frame.
    pub fn has_capacity(&self) -> bool {
        self.buffers
            .lock()
            .values()
            .all(|b| !b.is_active() || !b.is_full())
    }

    /// Mean fill of the active queues.
    pub fn used_ratio(&self) -> f32 {
        let buffers = self.buffers.lock();
        let (sum, n) = buffers
            .values()
            .filter(|b| b.is_active())
            .fold((0.0, 0usize), |(sum, n), b| (sum + b.used_ratio(), n + 1));
        if n == 0 { 0.0 } else { sum / n as f32 }
    }

    /// [`ChannelRingBuffer::set_active`] on every queue.
    pub fn set_active_all(&self, active: bool) {
        for b in self.buffers.lock().values() {
            b.set_active(active);
        }
    }

    /// Drop queued frames everywhere. Activity flags are kept.
    pub fn clear_all(&self) {
        for b in self.buffers.lock().values() {
            b.clear();
        }
    }
}

impl Default for ChannelBuffers {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ts: i64) -> AudioFrame {
        AudioFrame::from_samples(&[0; 4], 48000, ts)
    }

    #[test]
    fn fifo_and_capacity() {
        let q = ChannelRingBuffer::new(2);
        assert!(q.push_frame(frame(1)));
        assert!(q.push_frame(frame(2)));
        assert!(!q.push_frame(frame(3)));
        assert!(q.is_full());
        assert_eq!(q.used_ratio(), 1.0);
        assert_eq!(q.pop().map(|f| f.timestamp()), Some(1));
        assert_eq!(q.pop().map(|f| f.timestamp()), Some(2));
        assert!(q.pop().is_none());
    }

    #[test]
    fn inactive_drops_and_hides() {
        let q = ChannelRingBuffer::default();
        q.push_frame(frame(1));
        q.set_active(false);
        assert!(!q.push_frame(frame(2)));
        assert!(q.pop().is_none());
        assert!(q.drain().is_empty());
        // contents survive deactivation
        q.set_active(true);
        assert_eq!(q.available(), 1);
        q.clear();
        assert_eq!(q.available(), 0);
        assert!(q.is_active());
    }

    #[test]
    fn frame_at_prefers_past() {
        let q = ChannelRingBuffer::default();
        for ts in [10, 11, 12, 14] {
            q.push_frame(frame(ts));
        }
        assert_eq!(q.frame_at(13, 2).map(|f| f.timestamp()), Some(12));
        // 10 and 11 were skipped over
        assert_eq!(q.available(), 1);
    }

    #[test]
    fn frame_at_future_uses_half_tolerance() {
        let q = ChannelRingBuffer::default();
        q.push_frame(frame(20));
        assert!(q.frame_at(17, 4).is_none());
        assert_eq!(q.frame_at(18, 4).map(|f| f.timestamp()), Some(20));
    }

    #[test]
    fn lazy_channels() {
        let buffers = ChannelBuffers::new(1);
        assert!(buffers.is_empty());
        let left = buffers.get(0);
        assert!(Arc::ptr_eq(&left, &buffers.get(0)));
        assert!(buffers.existing(1).is_none());
        left.push_frame(frame(0));
        assert!(!buffers.has_capacity());
        buffers.set_active_all(false);
        assert!(buffers.has_capacity());
        assert_eq!(buffers.used_ratio(), 0.0);
        buffers.set_active_all(true);
        buffers.clear_all();
        assert!(buffers.has_capacity());
    }
}
