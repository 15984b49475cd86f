//! Inter-chunk pacing against the clock
//!
//! After each chunk the decoder compares the chunk's timestamp with the
//! clock. Behind by more than the lookahead allows: sleep half a frame.
//! Far ahead: sleep one and a half. Otherwise one frame. Audio is never
//! skipped or repeated, only the cadence bends.

use std::time::Duration;

use crate::timecode::TimecodeProfile;

#[derive(Clone, Debug)]
pub struct DriftPacer {
    nominal: Duration,
    lookahead: i64,
    last_timestamp: Option<i64>,
    multiplier: f64,
}

impl DriftPacer {
    pub fn new(profile: TimecodeProfile, lookahead: i64) -> Self {
        let rate = profile.frame_rate();
        let nominal = Duration::from_nanos(1_000_000_000 * rate.den as u64 / rate.num as u64);
        Self {
            nominal,
            lookahead,
            last_timestamp: None,
            multiplier: 1.0,
        }
    }

    /// One frame period.
    #[inline]
    pub fn nominal(&self) -> Duration {
        self.nominal
    }

    #[inline]
    pub fn lookahead(&self) -> i64 {
        self.lookahead
    }

    #[inline]
    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_timestamp
    }

    /// Multiplier applied to the most recent interval.
    #[inline]
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Sleep before the next chunk, given the chunk just emitted and the
    /// clock's current frame.
    pub fn next_interval(&mut self, timestamp: i64, clock_frame: i64) -> Duration {
        self.last_timestamp = Some(timestamp);
        let diff = timestamp - clock_frame;
        if diff < self.lookahead {
            self.multiplier = 0.5;
            self.nominal / 2
        } else if diff > 2 * self.lookahead {
            self.multiplier = 1.5;
            self.nominal * 3 / 2
        } else {
            self.multiplier = 1.0;
            self.nominal
        }
    }

    pub fn reset(&mut self) {
        self.last_timestamp = None;
        self.multiplier = 1.0;
    }
}
