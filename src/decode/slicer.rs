//! Cuts interleaved PCM into one-frame chunks and tags them

use crate::frame::AudioFrame;
use crate::timecode::TimecodeProfile;

/// All channels of one chunk. Every frame carries the same timestamp.
#[derive(Debug)]
pub struct SlicedChunk {
    pub timestamp: i64,
    pub frames: Vec<AudioFrame>,
}

pub struct FrameSlicer {
    channels: usize,
    sample_rate: u32,
    profile: TimecodeProfile,
    lookahead: i64,
    pending: Vec<i16>,
    sequence: u64,
}

impl FrameSlicer {
    pub fn new(channels: usize, sample_rate: u32, profile: TimecodeProfile, lookahead: i64) -> Self {
        Self {
            channels: channels.max(1),
            sample_rate,
            profile,
            lookahead,
            pending: Vec::new(),
            sequence: 0,
        }
    }

    /// Append interleaved samples.
    pub fn push(&mut self, samples: &[i16]) {
        self.pending.extend_from_slice(samples);
    }

    /// Samples per channel in the next chunk.
    #[inline]
    pub fn next_chunk_len(&self) -> usize {
        self.profile.samples_in_frame(self.sequence, self.sample_rate)
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Per-channel frames for the next chunk, once enough samples are pending.
    pub fn next_chunk(&mut self) -> Option<SlicedChunk> {
        let per_channel = self.next_chunk_len();
        let needed = per_channel * self.channels;
        if self.pending.len() < needed {
            return None;
        }

        let timestamp = self.sequence as i64 + self.lookahead;
        let mut planes = vec![Vec::with_capacity(per_channel); self.channels];
        for frame in self.pending[..needed].chunks_exact(self.channels) {
            for (plane, &s) in planes.iter_mut().zip(frame) {
                plane.push(s);
            }
        }
        self.pending.drain(..needed);
        self.sequence += 1;

        let frames = planes
            .iter()
            .map(|plane| AudioFrame::from_samples(plane, self.sample_rate, timestamp))
            .collect();
        Some(SlicedChunk { timestamp, frames })
    }

    /// Drop pending samples and restart the sequence at zero.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.sequence = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pal_chunks_are_1920_samples() {
        let mut s = FrameSlicer::new(2, 48000, TimecodeProfile::Pal, 5);
        s.push(&vec![0i16; 1920 * 2 * 3 + 10]);
        for expected_ts in 5..8 {
            let chunk = s.next_chunk().unwrap();
            assert_eq!(chunk.timestamp, expected_ts);
            assert_eq!(chunk.frames.len(), 2);
            assert!(chunk.frames.iter().all(|f| f.sample_count() == 1920 && f.timestamp() == expected_ts));
        }
        assert!(s.next_chunk().is_none());
    }

    #[test]
    fn deinterleaves() {
        let mut s = FrameSlicer::new(2, 50, TimecodeProfile::Pal, 0);
        s.push(&[1, -1, 2, -2]);
        let chunk = s.next_chunk().unwrap();
        assert_eq!(chunk.frames[0].samples().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(chunk.frames[1].samples().collect::<Vec<_>>(), vec![-1, -2]);
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut s = FrameSlicer::new(1, 48000, TimecodeProfile::Pal, 5);
        s.push(&vec![0i16; 1920 * 4 + 1]);
        while s.next_chunk().is_some() {}
        assert_eq!(s.sequence(), 4);
        s.reset();
        s.push(&vec![0i16; 1920]);
        assert_eq!(s.next_chunk().unwrap().timestamp, 5);
    }

    #[test]
    fn fractional_rate_alternates() {
        let s = FrameSlicer::new(1, 48000, TimecodeProfile::NtscDropFrame, 0);
        assert_eq!(s.next_chunk_len(), 1601);
    }
}
