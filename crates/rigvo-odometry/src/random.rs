use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Source of randomness for subset sampling and mutation.
pub trait RandomSource {
    /// `k` distinct indices drawn uniformly from `0..n`.
    ///
    /// PRECONDITION: `k <= n`.
    fn sample(&mut self, n: usize, k: usize) -> Vec<usize>;

    /// A draw from the normal distribution `N(mean, sigma^2)`.
    fn gaussian(&mut self, mean: f64, sigma: f64) -> f64;

    /// A uniform index in `0..n`.
    ///
    /// PRECONDITION: `n > 0`.
    fn uniform_index(&mut self, n: usize) -> usize;
}

/// [`RandomSource`] backed by [`StdRng`].
#[derive(Debug, Clone)]
pub struct SeededRandom {
    rng: StdRng,
}

impl SeededRandom {
    /// Deterministic source for a given seed.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Source seeded from the operating system.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Seeded source if a seed is given, entropy otherwise.
    pub fn new(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::from_entropy, Self::from_seed)
    }
}

impl Default for SeededRandom {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl RandomSource for SeededRandom {
    fn sample(&mut self, n: usize, k: usize) -> Vec<usize> {
        assert!(k <= n, "cannot sample {k} distinct indices from {n}");
        rand::seq::index::sample(&mut self.rng, n, k).into_vec()
    }

    fn gaussian(&mut self, mean: f64, sigma: f64) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        mean + sigma * z
    }

    fn uniform_index(&mut self, n: usize) -> usize {
        assert!(n > 0, "cannot draw an index from an empty range");
        self.rng.random_range(0..n)
    }
}
