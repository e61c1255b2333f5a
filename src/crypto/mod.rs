// SPDX-License-Identifier: MIT OR Apache-2.0

mod rng;
mod secret;
pub(crate) mod sha2;
pub mod x25519;

pub use rng::{Rng, RngError};
pub use secret::Secret;
