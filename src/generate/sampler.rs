//! Categorical sampling from log-probabilities

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Pick the index where a uniform draw `u` in (0, 1] is used up by the
/// cumulative probabilities. Falls back to the last index when rounding
/// leaves a remainder.
pub fn choose_index(log_probs: &[f32], u: f64) -> usize {
    let mut remaining = u;
    for (i, &logp) in log_probs.iter().enumerate() {
        remaining -= (logp as f64).exp();
        if remaining <= 0.0 {
            return i;
        }
    }
    log_probs.len().saturating_sub(1)
}

/// Seedable source of categorical draws
#[derive(Debug, Clone)]
pub struct CategoricalSampler {
    rng: StdRng,
}

impl CategoricalSampler {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Draw an index from a log-probability vector
    pub fn sample(&mut self, log_probs: &[f32]) -> usize {
        let u = 1.0 - self.rng.gen::<f64>();
        choose_index(log_probs, u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn logs(probs: &[f32]) -> Vec<f32> {
        probs.iter().map(|p| p.ln()).collect()
    }

    #[test_case(0.1, 0 ; "first bucket")]
    #[test_case(0.3, 1 ; "second bucket")]
    #[test_case(0.95, 2 ; "last bucket")]
    #[test_case(1.0, 2 ; "upper edge")]
    fn test_choose_index(u: f64, expected: usize) {
        assert_eq!(choose_index(&logs(&[0.25, 0.25, 0.5]), u), expected);
    }

    #[test]
    fn test_underflowing_distribution_falls_back_to_last() {
        assert_eq!(choose_index(&[-100.0, -100.0, -100.0], 1.0), 2);
    }

    #[test]
    fn test_seeded_samplers_repeat() {
        let probs = logs(&[0.1, 0.2, 0.3, 0.4]);
        let mut a = CategoricalSampler::new(Some(42));
        let mut b = CategoricalSampler::new(Some(42));
        let draws_a: Vec<usize> = (0..50).map(|_| a.sample(&probs)).collect();
        let draws_b: Vec<usize> = (0..50).map(|_| b.sample(&probs)).collect();
        assert_eq!(draws_a, draws_b);
        assert!(draws_a.iter().all(|&i| i < 4));
    }

    #[test]
    fn test_frequencies_follow_probabilities() {
        let probs = logs(&[0.8, 0.2]);
        let mut sampler = CategoricalSampler::new(Some(1));
        let zeros = (0..2000).filter(|_| sampler.sample(&probs) == 0).count();
        assert!((1450..1750).contains(&zeros), "got {} zeros", zeros);
    }
}
