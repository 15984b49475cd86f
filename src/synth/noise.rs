//! White and pink noise generators

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseType {
    #[default]
    White,
    Pink,
}

/// Uniform white noise, optionally shaped to pink with Paul Kellett's
/// seven-pole filter.
pub struct NoiseGenerator {
    kind: NoiseType,
    rng: StdRng,
    b: [f32; 7],
}

impl NoiseGenerator {
    pub fn new(kind: NoiseType, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { kind, rng, b: [0.0; 7] }
    }

    #[inline]
    pub fn kind(&self) -> NoiseType {
        self.kind
    }

    /// Switch colour. Filter state starts from rest so no step is heard.
    pub fn set_kind(&mut self, kind: NoiseType) {
        self.kind = kind;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.b = [0.0; 7];
    }

    /// Next sample, nominally within [-1, 1].
    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        let white = self.rng.gen_range(-1.0f32..=1.0);
        match self.kind {
            NoiseType::White => white,
            NoiseType::Pink => self.pink(white),
        }
    }

    fn pink(&mut self, white: f32) -> f32 {
        let b = &mut self.b;
        b[0] = 0.99886 * b[0] + white * 0.0555179;
        b[1] = 0.99332 * b[1] + white * 0.0750759;
        b[2] = 0.96900 * b[2] + white * 0.1538520;
        b[3] = 0.86650 * b[3] + white * 0.3104856;
        b[4] = 0.55000 * b[4] + white * 0.5329522;
        b[5] = -0.7616 * b[5] - white * 0.0168980;
        let pink = b[0] + b[1] + b[2] + b[3] + b[4] + b[5] + b[6] + white * 0.5362;
        b[6] = white * 0.115926;
        pink * 0.11
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn white_stays_in_range() {
        let mut g = NoiseGenerator::new(NoiseType::White, Some(7));
        assert!((0..10_000).map(|_| g.next_sample()).all(|s| (-1.0..=1.0).contains(&s)));
    }

    #[test]
    fn seeded_output_repeats() {
        let mut a = NoiseGenerator::new(NoiseType::Pink, Some(42));
        let mut b = NoiseGenerator::new(NoiseType::Pink, Some(42));
        for _ in 0..256 {
            assert_eq!(a.next_sample(), b.next_sample());
        }
    }

    #[test]
    fn pink_is_quieter_than_white() {
        let rms = |kind| {
            let mut g = NoiseGenerator::new(kind, Some(1));
            let sum: f32 = (0..48_000).map(|_| g.next_sample().powi(2)).sum();
            (sum / 48_000.0).sqrt()
        };
        let white = rms(NoiseType::White);
        let pink = rms(NoiseType::Pink);
        assert!((0.5..0.65).contains(&white), "{white}");
        assert!(pink > 0.05 && pink < 0.4, "{pink}");
    }

    #[test]
    fn switching_kind_resets_filter() {
        let mut g = NoiseGenerator::new(NoiseType::Pink, Some(3));
        for _ in 0..100 {
            g.next_sample();
        }
        g.set_kind(NoiseType::Pink);
        assert_eq!(g.b, [0.0; 7]);
    }
}
