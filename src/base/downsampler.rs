use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DEFAULT_SEED: u64 = 0xa0761d6478bd642f;

/// Bernoulli read downsampler. The seed is fixed so that variant content is
/// reproducible regardless of worker thread count.
pub struct Downsampler {
    percent_to_keep: f64,
    rand_engine: StdRng,
}

impl Default for Downsampler {
    fn default() -> Self {
        Self::new(100.0)
    }
}

impl Downsampler {
    pub fn new(percent_needed: f64) -> Self {
        Self {
            percent_to_keep: percent_needed,
            rand_engine: StdRng::seed_from_u64(DEFAULT_SEED),
        }
    }

    pub fn set_percent_to_sample(&mut self, percent_needed: f64) {
        self.percent_to_keep = percent_needed;
        self.rand_engine = StdRng::seed_from_u64(DEFAULT_SEED);
    }

    pub fn should_sample(&mut self) -> bool {
        self.percent_to_keep >= 100.0
            || self.rand_engine.gen_range(0.0f64, 100.0f64) <= self.percent_to_keep
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_rate_keeps_everything() {
        let mut sampler = Downsampler::new(100.0);
        assert!((0..10_000).all(|_| sampler.should_sample()));
    }

    #[test]
    fn half_rate_keeps_roughly_half() {
        let mut sampler = Downsampler::new(50.0);
        let kept = (0..100_000).filter(|_| sampler.should_sample()).count();
        assert!(kept > 48_000 && kept < 52_000, "kept {kept} of 100000");
    }

    #[test]
    fn sampling_is_deterministic_across_instances() {
        let mut first = Downsampler::new(25.0);
        let mut second = Downsampler::new(25.0);
        for _ in 0..1000 {
            assert_eq!(first.should_sample(), second.should_sample());
        }
    }
}
