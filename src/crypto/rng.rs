// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Mutex;

use rand_chacha::rand_core::{SeedableRng, TryRngCore};
use thiserror::Error;

/// Cryptographically-secure random number generator based on the ChaCha algorithm.
///
/// Wrapped in a mutex so one generator can serve salt and preimage generation from multiple
/// threads.
#[derive(Debug)]
pub struct Rng {
    rng: Mutex<rand_chacha::ChaCha20Rng>,
}

impl Default for Rng {
    fn default() -> Self {
        Self {
            rng: Mutex::new(rand_chacha::ChaCha20Rng::from_os_rng()),
        }
    }
}

#[cfg(any(test, feature = "test_utils"))]
impl Rng {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            rng: Mutex::new(rand_chacha::ChaCha20Rng::from_seed(seed)),
        }
    }
}

impl Rng {
    /// Fills a fixed-width array (salt, preimage, secret key seed) with random bytes.
    pub fn random_array<const N: usize>(&self) -> Result<[u8; N], RngError> {
        let mut rng = self.rng.lock().map_err(|_| RngError::LockPoisoned)?;
        let mut out = [0u8; N];
        rng.try_fill_bytes(&mut out)
            .map_err(|_| RngError::NotEnoughRandomness)?;
        Ok(out)
    }
}

#[derive(Debug, Error)]
pub enum RngError {
    #[error("rng lock is poisoned")]
    LockPoisoned,

    #[error("unable to collect enough randomness")]
    NotEnoughRandomness,
}

#[cfg(test)]
mod tests {
    use super::Rng;

    #[test]
    fn seeded_generator_is_deterministic() {
        let sample_1: [u8; 64] = Rng::from_seed([7; 32]).random_array().unwrap();
        let sample_2: [u8; 64] = Rng::from_seed([7; 32]).random_array().unwrap();
        assert_eq!(sample_1, sample_2);

        let sample_3: [u8; 64] = Rng::from_seed([8; 32]).random_array().unwrap();
        assert_ne!(sample_1, sample_3);

        // Consecutive draws from one generator differ.
        let rng = Rng::from_seed([7; 32]);
        let first: [u8; 32] = rng.random_array().unwrap();
        let second: [u8; 32] = rng.random_array().unwrap();
        assert_ne!(first, second);
    }
}
