//! Seeded Mersenne Twister random number generator
//!
//! MT19937 with the reference `init_genrand` seeding. Doubles use 53 random
//! bits and bounded integers use masked rejection sampling, the same draws
//! numpy's legacy `RandomState` makes, so every seeded routine in the crate
//! is reproducible across runs and thread counts.

/// Mersenne Twister RNG (MT19937)
#[derive(Clone)]
pub struct MersenneTwister {
    state: [u32; 624],
    index: usize,
    cached_gauss: Option<f64>,
}

impl std::fmt::Debug for MersenneTwister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MersenneTwister").field("index", &self.index).finish()
    }
}

impl MersenneTwister {
    const N: usize = 624;
    const M: usize = 397;
    const MATRIX_A: u32 = 0x9908B0DF;
    const UPPER_MASK: u32 = 0x80000000;
    const LOWER_MASK: u32 = 0x7FFFFFFF;

    /// Create a generator seeded with `init_genrand(seed)`
    pub fn new(seed: u32) -> Self {
        let mut mt = MersenneTwister {
            state: [0; Self::N],
            index: Self::N,
            cached_gauss: None,
        };
        mt.init_genrand(seed);
        mt
    }

    fn init_genrand(&mut self, seed: u32) {
        self.state[0] = seed;
        for i in 1..Self::N {
            let prev = self.state[i - 1];
            self.state[i] = (1812433253_u32)
                .wrapping_mul(prev ^ (prev >> 30))
                .wrapping_add(i as u32);
        }
        self.index = Self::N;
    }

    /// Generate the next 624 words of the state array
    fn generate_numbers(&mut self) {
        for i in 0..Self::N {
            let y = (self.state[i] & Self::UPPER_MASK)
                  | (self.state[(i + 1) % Self::N] & Self::LOWER_MASK);
            self.state[i] = self.state[(i + Self::M) % Self::N] ^ (y >> 1);
            if y & 1 != 0 {
                self.state[i] ^= Self::MATRIX_A;
            }
        }
        self.index = 0;
    }

    /// Generate a random 32-bit integer
    pub fn next_u32(&mut self) -> u32 {
        if self.index >= Self::N {
            self.generate_numbers();
        }

        let mut y = self.state[self.index];
        self.index += 1;

        // Tempering transformation
        y ^= y >> 11;
        y ^= (y << 7) & 0x9D2C5680;
        y ^= (y << 15) & 0xEFC60000;
        y ^= y >> 18;

        y
    }

    /// Uniform double in [0, 1) with 53 bits of randomness
    pub fn random(&mut self) -> f64 {
        let a = (self.next_u32() >> 5) as f64;
        let b = (self.next_u32() >> 6) as f64;
        (a * 67108864.0 + b) / 9007199254740992.0
    }

    /// Uniform integer in [0, max] by masked rejection
    fn interval(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        let mut mask = max;
        mask |= mask >> 1;
        mask |= mask >> 2;
        mask |= mask >> 4;
        mask |= mask >> 8;
        mask |= mask >> 16;
        loop {
            let value = self.next_u32() & mask;
            if value <= max {
                return value;
            }
        }
    }

    /// Uniform integer in [0, max] from 64-bit draws, high word first
    fn interval64(&mut self, max: u64) -> u64 {
        let mask = u64::MAX >> max.leading_zeros();
        loop {
            let value = ((u64::from(self.next_u32()) << 32) | u64::from(self.next_u32())) & mask;
            if value <= max {
                return value;
            }
        }
    }

    /// Uniform index in [0, n); `n` must be positive
    ///
    /// Ranges wider than `u32` are drawn from two words per candidate.
    pub fn below(&mut self, n: usize) -> usize {
        debug_assert!(n > 0);
        let max = n.saturating_sub(1);
        match u32::try_from(max) {
            Ok(max) => self.interval(max) as usize,
            Err(_) => self.interval64(max as u64) as usize,
        }
    }

    /// `size` uniform indices in [0, n), drawn with replacement
    pub fn randint(&mut self, n: usize, size: usize) -> Vec<usize> {
        (0..size).map(|_| self.below(n)).collect()
    }

    /// In-place Fisher-Yates shuffle
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.interval(i as u32) as usize;
            items.swap(i, j);
        }
    }

    /// Random permutation of 0..n
    pub fn permutation(&mut self, n: usize) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..n).collect();
        self.shuffle(&mut idx);
        idx
    }

    /// `size` distinct indices in [0, n), uniformly
    pub fn choice_without_replacement(&mut self, n: usize, size: usize) -> Vec<usize> {
        let mut perm = self.permutation(n);
        perm.truncate(size.min(n));
        perm
    }

    /// `size` distinct indices drawn with probability proportional to `weights`
    ///
    /// Each round draws from the renormalized remaining mass, like numpy's
    /// `choice(replace=False, p=...)`.
    pub fn weighted_choice_without_replacement(&mut self, weights: &[f64], size: usize) -> Vec<usize> {
        let n = weights.len();
        let mut remaining: Vec<f64> = weights.iter().map(|&w| if w.is_finite() { w.max(0.0) } else { 0.0 }).collect();
        let mut chosen = Vec::with_capacity(size.min(n));
        while chosen.len() < size.min(n) {
            let total: f64 = remaining.iter().sum();
            if total <= 0.0 {
                break;
            }
            let target = self.random() * total;
            let mut acc = 0.0;
            let mut pick = None;
            for (i, &w) in remaining.iter().enumerate() {
                if w <= 0.0 {
                    continue;
                }
                acc += w;
                pick = Some(i);
                if acc > target {
                    break;
                }
            }
            match pick {
                Some(i) => {
                    remaining[i] = 0.0;
                    chosen.push(i);
                }
                None => break,
            }
        }
        chosen
    }

    /// Standard normal deviate by the polar method
    pub fn standard_normal(&mut self) -> f64 {
        if let Some(g) = self.cached_gauss.take() {
            return g;
        }
        loop {
            let x1 = 2.0 * self.random() - 1.0;
            let x2 = 2.0 * self.random() - 1.0;
            let r2 = x1 * x1 + x2 * x2;
            if r2 < 1.0 && r2 != 0.0 {
                let f = (-2.0 * r2.ln() / r2).sqrt();
                self.cached_gauss = Some(f * x1);
                return f * x2;
            }
        }
    }

    /// Uniform double in [low, high)
    pub fn uniform(&mut self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.random()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_mt19937_output() {
        // first outputs of init_genrand(5489), the reference default seed
        let mut rng = MersenneTwister::new(5489);
        assert_eq!(rng.next_u32(), 3499211612);
        assert_eq!(rng.next_u32(), 581869302);
        assert_eq!(rng.next_u32(), 3890346734);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_below_wider_than_u32() {
        let n = 1usize << 40;
        let mut rng = MersenneTwister::new(8);
        let draws: Vec<usize> = (0..32).map(|_| rng.below(n)).collect();
        assert!(draws.iter().all(|&d| d < n));
        assert!(draws.iter().any(|&d| d > u32::MAX as usize));
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = MersenneTwister::new(19491001);
        let mut b = MersenneTwister::new(19491001);
        let xs: Vec<usize> = a.randint(1000, 50);
        let ys: Vec<usize> = b.randint(1000, 50);
        assert_eq!(xs, ys);
        assert!(xs.iter().all(|&x| x < 1000));
    }

    #[test]
    fn test_random_in_unit_interval() {
        let mut rng = MersenneTwister::new(1);
        for _ in 0..1000 {
            let u = rng.random();
            assert!((0.0..1.0).contains(&u));
        }
    }

    #[test]
    fn test_choice_without_replacement_is_distinct() {
        let mut rng = MersenneTwister::new(7);
        let mut picks = rng.choice_without_replacement(100, 30);
        assert_eq!(picks.len(), 30);
        picks.sort_unstable();
        picks.dedup();
        assert_eq!(picks.len(), 30);
    }

    #[test]
    fn test_weighted_choice_skips_zero_weights() {
        let mut rng = MersenneTwister::new(3);
        let weights = [0.0, 1.0, 0.0, 2.0, 3.0];
        let mut picks = rng.weighted_choice_without_replacement(&weights, 5);
        picks.sort_unstable();
        assert_eq!(picks, vec![1, 3, 4]);
    }

    #[test]
    fn test_standard_normal_moments() {
        let mut rng = MersenneTwister::new(11);
        let draws: Vec<f64> = (0..20000).map(|_| rng.standard_normal()).collect();
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        let var = draws.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / draws.len() as f64;
        assert!(mean.abs() < 0.05, "mean {}", mean);
        assert!((var - 1.0).abs() < 0.05, "var {}", var);
    }
}
