//! Sampler seed generation.

use rand::Rng;

/// Smallest seed ever drawn.
pub const SEED_MIN: u64 = 1;
/// Largest seed ever drawn.
pub const SEED_MAX: u64 = 1_000_000_000;

/// Draw a seed uniformly from `[SEED_MIN, SEED_MAX]` using the thread RNG.
pub fn random_seed() -> u64 {
    random_seed_with(&mut rand::rng())
}

/// Draw a seed uniformly from `[SEED_MIN, SEED_MAX]` using `rng`.
pub fn random_seed_with<R: Rng + ?Sized>(rng: &mut R) -> u64 {
    rng.random_range(SEED_MIN..=SEED_MAX)
}
