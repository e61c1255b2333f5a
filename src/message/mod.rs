// SPDX-License-Identifier: MIT OR Apache-2.0

//! Nested wire framing for group messages.
//!
//! The outer [`PublicMsg`] frame (`salt ‖ ciphertext`) fills the transport's maximum payload; the
//! ciphertext decrypts to an inner [`InternalMsg`] frame (`timestamp ‖ senderId ‖ payloadLen ‖
//! payload`) padded to a fixed size. Both frames are views over a single owned buffer: setters
//! overwrite fixed-width regions in place, and unmarshalling re-slices its input instead of
//! copying.
mod internal;
mod public;

use thiserror::Error;

pub use internal::{InternalMsg, INTERNAL_MIN_LEN, PAYLOAD_SIZE_LEN, SENDER_ID_LEN, TIMESTAMP_LEN};
pub use public::{PublicMsg, Salt, PUBLIC_MIN_LEN, SALT_LEN};

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("maximum data size {got} is below the {min} byte minimum for this frame")]
    TooSmall { got: usize, min: usize },

    #[error("serialized frame length {got} is below the {min} byte minimum")]
    TooShort { got: usize, min: usize },

    #[error("payload length {got} exceeds the {max} byte maximum for this frame")]
    PayloadTooLarge { got: usize, max: usize },

    #[error("ciphertext length {got} does not fill the {expected} byte frame")]
    PayloadSizeMismatch { got: usize, expected: usize },
}
