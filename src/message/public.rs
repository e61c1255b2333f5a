// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::message::MessageError;

pub const SALT_LEN: usize = 32;

/// Minimum size of the wire frame: the salt plus at least one ciphertext byte.
pub const PUBLIC_MIN_LEN: usize = SALT_LEN + 1;

/// Random salt mixed into per-message key derivation.
pub type Salt = [u8; SALT_LEN];

/// Outer wire frame of a group message, sized to the transport's maximum payload.
///
/// ```text
/// +----------+------------+
/// | salt     | ciphertext |
/// | 32 bytes | remaining  |
/// +----------+------------+
/// ```
///
/// Like [`super::InternalMsg`], both fields are index ranges into one owned buffer.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PublicMsg {
    data: Vec<u8>,
}

impl PublicMsg {
    /// Creates a zeroed frame filling `max_size` bytes.
    pub fn new(max_size: usize) -> Result<Self, MessageError> {
        if max_size < PUBLIC_MIN_LEN {
            return Err(MessageError::TooSmall {
                got: max_size,
                min: PUBLIC_MIN_LEN,
            });
        }
        Ok(Self {
            data: vec![0u8; max_size],
        })
    }

    /// Maps a received transport payload as a wire frame without copying.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, MessageError> {
        if data.len() < PUBLIC_MIN_LEN {
            return Err(MessageError::TooShort {
                got: data.len(),
                min: PUBLIC_MIN_LEN,
            });
        }
        Ok(Self { data })
    }

    pub fn salt(&self) -> Salt {
        self.data[..SALT_LEN]
            .try_into()
            .expect("fixed-width salt field")
    }

    pub fn set_salt(&mut self, salt: &Salt) {
        self.data[..SALT_LEN].copy_from_slice(salt);
    }

    /// The ciphertext region.
    pub fn payload(&self) -> &[u8] {
        &self.data[SALT_LEN..]
    }

    /// Writes the ciphertext. There is no length field, so it must fill the region exactly.
    pub fn set_payload(&mut self, ciphertext: &[u8]) -> Result<(), MessageError> {
        let expected = self.payload_size();
        if ciphertext.len() != expected {
            return Err(MessageError::PayloadSizeMismatch {
                got: ciphertext.len(),
                expected,
            });
        }
        self.data[SALT_LEN..].copy_from_slice(ciphertext);
        Ok(())
    }

    pub fn payload_size(&self) -> usize {
        self.data.len() - SALT_LEN
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn to_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use crate::message::MessageError;

    use super::{PublicMsg, PUBLIC_MIN_LEN, SALT_LEN};

    #[test]
    fn new_rejects_undersized_frame() {
        assert!(matches!(
            PublicMsg::new(PUBLIC_MIN_LEN - 1),
            Err(MessageError::TooSmall { .. })
        ));
        assert!(PublicMsg::new(PUBLIC_MIN_LEN).is_ok());
    }

    #[test]
    fn setters_and_round_trip() {
        let mut msg = PublicMsg::new(SALT_LEN + 8).unwrap();
        let salt = [7u8; SALT_LEN];
        let ciphertext = [9u8; 8];

        msg.set_salt(&salt);
        msg.set_payload(&ciphertext).unwrap();

        assert_eq!(msg.salt(), salt);
        assert_eq!(msg.payload(), ciphertext);

        let again = PublicMsg::from_bytes(msg.as_bytes().to_vec()).unwrap();
        assert_eq!(msg, again);
    }

    #[test]
    fn payload_must_fill_frame() {
        let mut msg = PublicMsg::new(SALT_LEN + 8).unwrap();
        assert!(matches!(
            msg.set_payload(&[1; 7]),
            Err(MessageError::PayloadSizeMismatch {
                got: 7,
                expected: 8
            })
        ));
    }

    #[test]
    fn from_bytes_rejects_short_input() {
        assert!(matches!(
            PublicMsg::from_bytes(vec![0; SALT_LEN]),
            Err(MessageError::TooShort { .. })
        ));
    }
}
