//! Interchangeable clock sources and the handles they hold

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::clock::internal::InternalSource;
use crate::clock::ltc::LtcSource;
use crate::clock::mtc::MtcSource;
use crate::clock::ClockShared;
use crate::error::{ClockError, DeviceError};
use crate::timecode::TimecodeFrame;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Internal,
    Ltc,
    Mtc,
}

impl SourceKind {
    #[inline]
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            SourceKind::Internal => 0,
            SourceKind::Ltc => 1,
            SourceKind::Mtc => 2,
        }
    }

    #[inline]
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => SourceKind::Ltc,
            2 => SourceKind::Mtc,
            _ => SourceKind::Internal,
        }
    }
}

/// Events reported through [`ClockEngine::on_status`](crate::clock::ClockEngine::on_status).
#[derive(Clone, Debug, PartialEq)]
pub enum ClockStatus {
    SourceStarted(SourceKind),
    SourceStopped(SourceKind),
    Device { source: SourceKind, error: DeviceError },
}

/// Counts one live source in the engine's instrumentation while held.
pub(crate) struct SourceGuard {
    shared: Arc<ClockShared>,
}

impl SourceGuard {
    pub fn new(shared: &Arc<ClockShared>) -> Self {
        let live = shared.live_handles.fetch_add(1, Ordering::AcqRel) + 1;
        shared.peak_handles.fetch_max(live, Ordering::AcqRel);
        Self { shared: shared.clone() }
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.shared.live_handles.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Write handle an external timecode decoder pushes frames through.
///
/// Only the feed of the installed external source is alive; once that
/// source is torn down every clone of its feed silently rejects frames.
#[derive(Clone)]
pub struct TimecodeFeed {
    shared: Arc<ClockShared>,
    alive: Arc<Mutex<bool>>,
}

impl TimecodeFeed {
    pub(crate) fn new(shared: &Arc<ClockShared>) -> Self {
        Self {
            shared: shared.clone(),
            alive: Arc::new(Mutex::new(false)),
        }
    }

    pub(crate) fn set_alive(&self, alive: bool) {
        *self.alive.lock() = alive;
    }

    pub fn is_alive(&self) -> bool {
        *self.alive.lock()
    }

    /// Overwrite the frame counter with a decoded timecode.
    ///
    /// Returns `false` if this feed's source is no longer installed.
    pub fn push(&self, tc: TimecodeFrame) -> bool {
        let alive = self.alive.lock();
        if !*alive {
            return false;
        }
        self.shared.write_timecode(&tc);
        true
    }

    /// Overwrite the frame counter with a raw frame count at the active profile.
    pub fn push_frame(&self, frame: i64) -> bool {
        let alive = self.alive.lock();
        if !*alive {
            return false;
        }
        self.shared.publish(frame);
        true
    }
}

/// The installed clock source.
pub(crate) enum ActiveSource {
    Internal(InternalSource),
    Ltc(LtcSource),
    Mtc(MtcSource),
}

impl ActiveSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            ActiveSource::Internal(_) => SourceKind::Internal,
            ActiveSource::Ltc(_) => SourceKind::Ltc,
            ActiveSource::Mtc(_) => SourceKind::Mtc,
        }
    }

    /// Start the source. Device problems of external sources leave them
    /// installed and are queued as [`ClockStatus::Device`] in `events`.
    pub fn start(&mut self, events: &mut Vec<ClockStatus>) -> Result<(), ClockError> {
        let device = match self {
            ActiveSource::Internal(s) => return s.start(),
            ActiveSource::Ltc(s) => s.start(),
            ActiveSource::Mtc(s) => s.start(),
        };
        if let Err(error) = device {
            events.push(ClockStatus::Device { source: self.kind(), error });
        }
        Ok(())
    }

    /// Release every resource the source holds. Threads are joined.
    pub fn stop(&mut self) {
        match self {
            ActiveSource::Internal(s) => s.stop(),
            ActiveSource::Ltc(s) => s.stop(),
            ActiveSource::Mtc(s) => s.stop(),
        }
    }

    pub fn current_frame(&self, shared: &ClockShared) -> i64 {
        match self {
            ActiveSource::Internal(_) => shared.internal_frame(),
            ActiveSource::Ltc(_) | ActiveSource::Mtc(_) => shared.counter.load(Ordering::Acquire),
        }
    }

    pub fn feed(&self) -> Option<TimecodeFeed> {
        match self {
            ActiveSource::Internal(_) => None,
            ActiveSource::Ltc(s) => Some(s.feed()),
            ActiveSource::Mtc(s) => Some(s.feed()),
        }
    }
}
