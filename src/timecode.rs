//! Timecode profiles and frame <-> timecode conversions
//!
//! Frame rates are kept as exact rationals so fractional rates (29.97,
//! 59.94, 23.976) never accumulate rounding error. Frame counts are the
//! canonical unit everywhere else in the crate.

use core::fmt;

use serde::{Deserialize, Serialize};

/// An exact frame rate `num / den` frames per second.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    #[inline]
    pub fn as_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Integer ceiling of the rate; the exclusive bound of the frames field.
    #[inline]
    pub fn ceil(self) -> u32 {
        self.num.div_ceil(self.den)
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{:.3}", self.as_f64())
        }
    }
}

/// Named frame rates understood by the clock and the timeline.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimecodeProfile {
    Film,
    FilmDropFrame,
    Ntsc,
    NtscDropFrame,
    #[default]
    Pal,
    Fps50,
    Fps60,
    Fps5994,
    Fps100,
    Fps120,
    Fps144,
    Fps240,
}

impl TimecodeProfile {
    pub const ALL: [TimecodeProfile; 12] = [
        TimecodeProfile::Film,
        TimecodeProfile::FilmDropFrame,
        TimecodeProfile::Ntsc,
        TimecodeProfile::NtscDropFrame,
        TimecodeProfile::Pal,
        TimecodeProfile::Fps50,
        TimecodeProfile::Fps60,
        TimecodeProfile::Fps5994,
        TimecodeProfile::Fps100,
        TimecodeProfile::Fps120,
        TimecodeProfile::Fps144,
        TimecodeProfile::Fps240,
    ];

    pub const fn frame_rate(self) -> FrameRate {
        match self {
            TimecodeProfile::Film => FrameRate::new(24, 1),
            TimecodeProfile::FilmDropFrame => FrameRate::new(24000, 1001),
            TimecodeProfile::Ntsc => FrameRate::new(30, 1),
            TimecodeProfile::NtscDropFrame => FrameRate::new(30000, 1001),
            TimecodeProfile::Pal => FrameRate::new(25, 1),
            TimecodeProfile::Fps50 => FrameRate::new(50, 1),
            TimecodeProfile::Fps60 => FrameRate::new(60, 1),
            TimecodeProfile::Fps5994 => FrameRate::new(60000, 1001),
            TimecodeProfile::Fps100 => FrameRate::new(100, 1),
            TimecodeProfile::Fps120 => FrameRate::new(120, 1),
            TimecodeProfile::Fps144 => FrameRate::new(144, 1),
            TimecodeProfile::Fps240 => FrameRate::new(240, 1),
        }
    }

    /// Frames per labelled second.
    #[inline]
    pub fn nominal_fps(self) -> u32 {
        self.frame_rate().ceil()
    }

    /// Number of frame labels skipped at the start of each minute not
    /// divisible by ten. 23.976 has no SMPTE drop scheme and drops none.
    #[inline]
    pub fn dropped_labels(self) -> u32 {
        match self {
            TimecodeProfile::NtscDropFrame => 2,
            TimecodeProfile::Fps5994 => 4,
            _ => 0,
        }
    }

    #[inline]
    pub fn is_drop_frame(self) -> bool {
        matches!(
            self,
            TimecodeProfile::FilmDropFrame | TimecodeProfile::NtscDropFrame | TimecodeProfile::Fps5994
        )
    }

    /// Numeric type code used by persisted clock settings.
    ///
    /// Only the five broadcast profiles have a code.
    pub fn code(self) -> Option<u8> {
        match self {
            TimecodeProfile::Film => Some(0),
            TimecodeProfile::FilmDropFrame => Some(1),
            TimecodeProfile::Ntsc => Some(2),
            TimecodeProfile::NtscDropFrame => Some(3),
            TimecodeProfile::Pal => Some(4),
            _ => None,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TimecodeProfile::Film),
            1 => Some(TimecodeProfile::FilmDropFrame),
            2 => Some(TimecodeProfile::Ntsc),
            3 => Some(TimecodeProfile::NtscDropFrame),
            4 => Some(TimecodeProfile::Pal),
            _ => None,
        }
    }

    /// Frame count of one 24 hour labelled day.
    pub fn frames_per_day(self) -> i64 {
        let nominal = self.nominal_fps() as i64;
        let drop = self.dropped_labels() as i64;
        let per_ten_minutes = 600 * nominal - 9 * drop;
        per_ten_minutes * 6 * 24
    }

    /// Sample index at which frame `k` starts, for a given sample rate.
    ///
    /// Boundaries are floored from the exact rational so fractional rates
    /// alternate chunk lengths instead of drifting.
    #[inline]
    pub fn frame_start_sample(self, k: u64, sample_rate: u32) -> u64 {
        let rate = self.frame_rate();
        ((k as u128 * sample_rate as u128 * rate.den as u128) / rate.num as u128) as u64
    }

    /// Samples per channel in frame `k`. PAL at 48 kHz is always 1920.
    #[inline]
    pub fn samples_in_frame(self, k: u64, sample_rate: u32) -> usize {
        (self.frame_start_sample(k + 1, sample_rate) - self.frame_start_sample(k, sample_rate)) as usize
    }
}

impl fmt::Display for TimecodeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rate = self.frame_rate();
        if self.is_drop_frame() {
            write!(f, "{} fps DF", rate)
        } else {
            write!(f, "{} fps", rate)
        }
    }
}

/// A labelled position `HH:MM:SS:FF` at a given profile.
///
/// Only built by the conversion functions (or validated through
/// [`TimecodeFrame::from_parts`]), so `frames < nominal_fps` always holds.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TimecodeFrame {
    hours: u32,
    minutes: u8,
    seconds: u8,
    frames: u8,
    profile: TimecodeProfile,
}

impl TimecodeFrame {
    /// Validate a labelled position, rejecting labels a drop-frame profile skips.
    pub fn from_parts(hours: u32, minutes: u8, seconds: u8, frames: u8, profile: TimecodeProfile) -> Option<Self> {
        if minutes >= 60 || seconds >= 60 || frames as u32 >= profile.nominal_fps() {
            return None;
        }
        let drop = profile.dropped_labels();
        if drop > 0 && seconds == 0 && minutes % 10 != 0 && (frames as u32) < drop {
            return None;
        }
        Some(Self { hours, minutes, seconds, frames, profile })
    }

    #[inline]
    pub fn hours(&self) -> u32 { self.hours }

    #[inline]
    pub fn minutes(&self) -> u8 { self.minutes }

    #[inline]
    pub fn seconds(&self) -> u8 { self.seconds }

    #[inline]
    pub fn frames(&self) -> u8 { self.frames }

    #[inline]
    pub fn profile(&self) -> TimecodeProfile { self.profile }

    /// Same labelled position reinterpreted under a different profile, if valid.
    pub fn with_profile(&self, profile: TimecodeProfile) -> Option<Self> {
        Self::from_parts(self.hours, self.minutes, self.seconds, self.frames, profile)
    }
}

impl fmt::Display for TimecodeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if self.profile.dropped_labels() > 0 { ';' } else { ':' };
        write!(
            f,
            "{:02}:{:02}:{:02}{}{:02}",
            self.hours, self.minutes, self.seconds, sep, self.frames
        )
    }
}

/// Label an elapsed frame count.
///
/// Negative counts wrap backwards from the end of a 24 hour day; positive
/// counts keep counting hours past 24 so the conversion stays invertible.
pub fn frame_to_timecode(frame_count: i64, profile: TimecodeProfile) -> TimecodeFrame {
    let frame_count = if frame_count < 0 {
        frame_count.rem_euclid(profile.frames_per_day())
    } else {
        frame_count
    };

    let nominal = profile.nominal_fps() as i64;
    let drop = profile.dropped_labels() as i64;

    let label = if drop == 0 {
        frame_count
    } else {
        let per_minute = 60 * nominal - drop;
        let per_ten_minutes = 600 * nominal - 9 * drop;
        let tens = frame_count / per_ten_minutes;
        let rem = frame_count % per_ten_minutes;
        let mut skipped = 9 * drop * tens;
        if rem >= drop {
            skipped += drop * ((rem - drop) / per_minute);
        }
        frame_count + skipped
    };

    TimecodeFrame {
        hours: (label / (3600 * nominal)) as u32,
        minutes: ((label / (60 * nominal)) % 60) as u8,
        seconds: ((label / nominal) % 60) as u8,
        frames: (label % nominal) as u8,
        profile,
    }
}

/// Elapsed frame count of a labelled position. Inverse of [`frame_to_timecode`].
pub fn timecode_to_frame(tc: &TimecodeFrame) -> i64 {
    let nominal = tc.profile.nominal_fps() as i64;
    let drop = tc.profile.dropped_labels() as i64;
    let total_minutes = 60 * tc.hours as i64 + tc.minutes as i64;
    let label = (total_minutes * 60 + tc.seconds as i64) * nominal + tc.frames as i64;
    label - drop * (total_minutes - total_minutes / 10)
}

/// Shift a labelled position by a signed number of frames, wrapping at 24 hours.
pub fn add_offset(tc: &TimecodeFrame, delta_frames: i64) -> TimecodeFrame {
    let day = tc.profile.frames_per_day();
    let shifted = (timecode_to_frame(tc) + delta_frames).rem_euclid(day);
    frame_to_timecode(shifted, tc.profile)
}

/// Real-time seconds elapsed at a frame count.
#[inline]
pub fn frames_to_seconds(frames: i64, profile: TimecodeProfile) -> f64 {
    let rate = profile.frame_rate();
    frames as f64 * rate.den as f64 / rate.num as f64
}

/// Frame count reached after `seconds` of real time.
#[inline]
pub fn seconds_to_frames(seconds: f64, profile: TimecodeProfile) -> i64 {
    let rate = profile.frame_rate();
    // epsilon absorbs representation error right on a frame boundary
    (seconds * rate.num as f64 / rate.den as f64 + 1e-9).floor() as i64
}
