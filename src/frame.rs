//! Timestamp-tagged PCM chunks and the decibel gain law

/// Bit depth of every frame this crate produces.
pub const BITS_PER_SAMPLE: u16 = 16;

/// One video frame's worth of PCM for a single channel.
///
/// The payload is signed 16 bit little endian. `timestamp` is in frames of
/// the clock's active profile.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AudioFrame {
    payload: Vec<u8>,
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
    timestamp: i64,
}

impl AudioFrame {
    /// Build a mono frame from samples.
    pub fn from_samples(samples: &[i16], sample_rate: u32, timestamp: i64) -> Self {
        let mut payload = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            payload.extend_from_slice(&s.to_le_bytes());
        }
        Self {
            payload,
            sample_rate,
            channels: 1,
            bits_per_sample: BITS_PER_SAMPLE,
            timestamp,
        }
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    #[inline]
    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    #[inline]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Samples per channel carried by this frame.
    #[inline]
    pub fn sample_count(&self) -> usize {
        self.payload.len() / (self.bits_per_sample as usize / 8) / self.channels.max(1) as usize
    }

    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.payload
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
    }
}

/// `10^(dB/20)`
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Scale samples in place, saturating at the i16 range.
pub fn apply_gain_i16(samples: &mut [i16], gain: f32) {
    if gain == 1.0 {
        return;
    }
    for s in samples.iter_mut() {
        let scaled = (*s as f32 * gain).round();
        *s = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}

/// Convert a float sample to i16 after clamping to [-1, 1].
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decibels() {
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_linear(-6.0) - 0.501_187).abs() < 1e-4);
        assert!((db_to_linear(20.0) - 10.0).abs() < 1e-4);
    }

    #[test]
    fn gain_saturates() {
        let mut samples = [20000i16, -20000, 100];
        apply_gain_i16(&mut samples, db_to_linear(12.0));
        assert_eq!(samples[0], i16::MAX);
        assert_eq!(samples[1], i16::MIN);
        assert_eq!(samples[2], 398);
    }

    #[test]
    fn payload_is_little_endian() {
        let frame = AudioFrame::from_samples(&[1, -2], 48000, 7);
        assert_eq!(frame.payload(), &[1, 0, 0xfe, 0xff]);
        assert_eq!(frame.sample_count(), 2);
        assert_eq!(frame.samples().collect::<Vec<_>>(), vec![1, -2]);
        assert_eq!(frame.bits_per_sample(), 16);
        assert_eq!(frame.timestamp(), 7);
    }

    #[test]
    fn float_conversion_clamps() {
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), -i16::MAX);
        assert_eq!(f32_to_i16(0.0), 0);
    }
}
