//! Streaming linear-interpolation resampler
//!
//! Keeps the previous and current input frame per channel plus a fractional
//! read position, so consecutive packets join without clicks. `reset()` drops
//! that history; it must run on every seek or the first output of the next
//! run carries samples from the previous one.

use tracing::warn;

use crate::error::ResamplerError;

const MAX_CHANNELS: usize = 32;

/// Headroom, in frames, allowed over the rate-ratio estimate of one call.
const OUTPUT_SLACK_FRAMES: usize = 64;

pub struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    channels: usize,

    /// Input frames advanced per output frame
    step: f64,
    /// Position between `prev` and `curr`, in [0, 1)
    position: f64,

    prev: Vec<f32>,
    curr: Vec<f32>,
    primed: bool,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: usize) -> Result<Self, ResamplerError> {
        if from_rate == 0 || to_rate == 0 {
            return Err(ResamplerError::InvalidRate { from: from_rate, to: to_rate });
        }
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(ResamplerError::InvalidChannels(channels));
        }
        Ok(Self {
            from_rate,
            to_rate,
            channels,
            step: from_rate as f64 / to_rate as f64,
            position: 0.0,
            prev: vec![0.0; channels],
            curr: vec![0.0; channels],
            primed: false,
        })
    }

    #[inline]
    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    #[inline]
    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Upper bound on output frames for `input_frames` of input.
    #[inline]
    pub fn max_output_frames(&self, input_frames: usize) -> usize {
        (input_frames as u64 * self.to_rate as u64 / self.from_rate as u64) as usize + OUTPUT_SLACK_FRAMES
    }

    /// Resample interleaved `input`, appending interleaved output.
    pub fn process(&mut self, input: &[f32], output: &mut Vec<f32>) {
        let ch = self.channels;
        if self.from_rate == self.to_rate {
            output.extend_from_slice(input);
            return;
        }

        let input_frames = input.len() / ch;
        let limit = self.max_output_frames(input_frames);
        let start = output.len();
        output.reserve(limit * ch);

        for frame in input.chunks_exact(ch) {
            if !self.primed {
                self.prev.copy_from_slice(frame);
                self.curr.copy_from_slice(frame);
                self.primed = true;
                continue;
            }

            self.prev.copy_from_slice(&self.curr);
            self.curr.copy_from_slice(frame);

            let t_step = self.step;
            while self.position < 1.0 {
                let t = self.position as f32;
                for c in 0..ch {
                    let prev = self.prev[c];
                    output.push(prev + t * (self.curr[c] - prev));
                }
                self.position += t_step;
            }
            self.position -= 1.0;
        }

        let produced = (output.len() - start) / ch;
        if produced > limit {
            warn!(produced, limit, "resampler output over estimate, clamping");
            output.truncate(start + limit * ch);
        }
    }

    /// Forget all history; the next input starts a fresh stream.
    pub fn reset(&mut self) {
        self.position = 0.0;
        self.prev.iter_mut().for_each(|s| *s = 0.0);
        self.curr.iter_mut().for_each(|s| *s = 0.0);
        self.primed = false;
    }
}

/// Float sample to PCM16, using the symmetric ±32768 scale of the decoder.
#[inline]
pub fn to_pcm16(sample: f32) -> i16 {
    (sample * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
