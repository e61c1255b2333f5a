// SPDX-License-Identifier: MIT OR Apache-2.0

//! X25519 Diffie-Hellman key agreement.
//!
//! Every member of a group publishes a public value; the pairwise shared secrets derived from it
//! are what bind a group message MAC to one specific recipient.
use std::fmt;

use thiserror::Error;

use crate::crypto::{Rng, RngError, Secret};

pub const PUBLIC_KEY_SIZE: usize = 32;

pub const SECRET_KEY_SIZE: usize = 32;

pub const SHARED_SECRET_SIZE: usize = 32;

/// Shared secret between exactly two parties.
pub type SharedSecret = Secret<SHARED_SECRET_SIZE>;

/// X25519 public value in the shared cyclic group.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub const fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = X25519Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let value_len = value.len();
        let checked: [u8; PUBLIC_KEY_SIZE] = value
            .try_into()
            .map_err(|_| X25519Error::InvalidKeyLength(value_len, PUBLIC_KEY_SIZE))?;
        Ok(Self(checked))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.to_hex()).finish()
    }
}

/// X25519 secret key.
#[derive(Clone)]
pub struct SecretKey(x25519_dalek::StaticSecret);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        Self(x25519_dalek::StaticSecret::from(bytes))
    }

    pub fn generate(rng: &Rng) -> Result<Self, RngError> {
        Ok(Self::from_bytes(rng.random_array()?))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0).to_bytes())
    }

    /// Computes the Diffie-Hellman shared secret with the other party's public value.
    pub fn calculate_agreement(&self, their_key: &PublicKey) -> SharedSecret {
        let shared = self
            .0
            .diffie_hellman(&x25519_dalek::PublicKey::from(their_key.0));
        Secret::from_bytes(shared.to_bytes())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey").field("value", &"***").finish()
    }
}

#[derive(Debug, Error)]
pub enum X25519Error {
    #[error("invalid key length {0}, expected {1} bytes")]
    InvalidKeyLength(usize, usize),
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;

    use super::SecretKey;

    #[test]
    fn agreement_is_symmetric() {
        let rng = Rng::from_seed([1; 32]);

        let alice = SecretKey::generate(&rng).unwrap();
        let bob = SecretKey::generate(&rng).unwrap();

        assert_eq!(
            alice.calculate_agreement(&bob.public_key()),
            bob.calculate_agreement(&alice.public_key()),
        );

        let eve = SecretKey::generate(&rng).unwrap();
        assert_ne!(
            alice.calculate_agreement(&bob.public_key()),
            alice.calculate_agreement(&eve.public_key()),
        );
    }
}
