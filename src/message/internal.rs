// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::group::member::{MemberId, MEMBER_ID_SIZE};
use crate::message::MessageError;

pub const TIMESTAMP_LEN: usize = 8;

pub const SENDER_ID_LEN: usize = MEMBER_ID_SIZE;

/// Width of the field recording the payload's true length.
pub const PAYLOAD_SIZE_LEN: usize = 2;

/// Minimum size of the inner frame: all fixed-width fields, no payload.
pub const INTERNAL_MIN_LEN: usize = TIMESTAMP_LEN + SENDER_ID_LEN + PAYLOAD_SIZE_LEN;

const TIMESTAMP_START: usize = 0;
const SENDER_ID_START: usize = TIMESTAMP_START + TIMESTAMP_LEN;
const SIZE_START: usize = SENDER_ID_START + SENDER_ID_LEN;
const PAYLOAD_START: usize = SIZE_START + PAYLOAD_SIZE_LEN;

/// Authenticated inner plaintext frame of a group message.
///
/// ```text
/// +-----------+-----------+--------------+------------------+
/// | timestamp | sender id | payload size | payload (padded) |
/// | 8 bytes   | 32 bytes  | 2 bytes      | variable         |
/// +-----------+-----------+--------------+------------------+
/// ```
///
/// All fields are index ranges into one owned buffer; the marshalled form is the buffer itself,
/// so the frame is always padded to the size it was created with. The recorded payload size
/// removes the padding ambiguity on unwrap.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct InternalMsg {
    data: Vec<u8>,
}

impl InternalMsg {
    /// Creates a zeroed frame filling `max_size` bytes.
    pub fn new(max_size: usize) -> Result<Self, MessageError> {
        if max_size < INTERNAL_MIN_LEN {
            return Err(MessageError::TooSmall {
                got: max_size,
                min: INTERNAL_MIN_LEN,
            });
        }
        Ok(Self {
            data: vec![0u8; max_size],
        })
    }

    /// Maps a received buffer as an inner frame without copying.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, MessageError> {
        if data.len() < INTERNAL_MIN_LEN {
            return Err(MessageError::TooShort {
                got: data.len(),
                min: INTERNAL_MIN_LEN,
            });
        }
        Ok(Self { data })
    }

    /// Message timestamp in unix nanoseconds.
    pub fn timestamp(&self) -> i64 {
        i64::from_le_bytes(
            self.data[TIMESTAMP_START..SENDER_ID_START]
                .try_into()
                .expect("fixed-width timestamp field"),
        )
    }

    pub fn set_timestamp(&mut self, nanos: i64) {
        self.data[TIMESTAMP_START..SENDER_ID_START].copy_from_slice(&nanos.to_le_bytes());
    }

    pub fn sender_id(&self) -> MemberId {
        MemberId::try_from(&self.data[SENDER_ID_START..SIZE_START])
            .expect("fixed-width sender id field")
    }

    pub fn set_sender_id(&mut self, id: &MemberId) {
        self.data[SENDER_ID_START..SIZE_START].copy_from_slice(id.as_bytes());
    }

    /// The payload, stripped of padding.
    pub fn payload(&self) -> &[u8] {
        let size = u16::from_le_bytes(
            self.data[SIZE_START..PAYLOAD_START]
                .try_into()
                .expect("fixed-width size field"),
        ) as usize;
        let region = &self.data[PAYLOAD_START..];
        &region[..size.min(region.len())]
    }

    /// Writes the payload and records its true length so padding can be stripped on unwrap.
    pub fn set_payload(&mut self, payload: &[u8]) -> Result<(), MessageError> {
        let max = self.payload_max_size();
        if payload.len() > max {
            return Err(MessageError::PayloadTooLarge {
                got: payload.len(),
                max,
            });
        }
        self.data[SIZE_START..PAYLOAD_START]
            .copy_from_slice(&(payload.len() as u16).to_le_bytes());
        self.data[PAYLOAD_START..PAYLOAD_START + payload.len()].copy_from_slice(payload);
        Ok(())
    }

    pub fn payload_max_size(&self) -> usize {
        self.data.len() - INTERNAL_MIN_LEN
    }

    /// The whole padded frame.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn to_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use crate::group::member::MemberId;
    use crate::message::MessageError;

    use super::{InternalMsg, INTERNAL_MIN_LEN};

    #[test]
    fn new_rejects_undersized_frame() {
        assert!(matches!(
            InternalMsg::new(INTERNAL_MIN_LEN - 1),
            Err(MessageError::TooSmall { .. })
        ));
        assert!(InternalMsg::new(INTERNAL_MIN_LEN).is_ok());
    }

    #[test]
    fn setters_and_round_trip() {
        let mut msg = InternalMsg::new(INTERNAL_MIN_LEN * 2).unwrap();
        let sender = MemberId::from_bytes([3; 32]);
        let payload = b"sample payload contents.";

        msg.set_timestamp(1_700_000_000_000_000_000);
        msg.set_sender_id(&sender);
        msg.set_payload(payload).unwrap();

        assert_eq!(msg.timestamp(), 1_700_000_000_000_000_000);
        assert_eq!(msg.sender_id(), sender);
        assert_eq!(msg.payload(), payload);

        // Marshalled form is padded to the full frame size.
        let bytes = msg.as_bytes().to_vec();
        assert_eq!(bytes.len(), INTERNAL_MIN_LEN * 2);

        let unmarshalled = InternalMsg::from_bytes(bytes).unwrap();
        assert_eq!(msg, unmarshalled);
        assert_eq!(unmarshalled.payload(), payload);
    }

    #[test]
    fn payload_too_large() {
        let mut msg = InternalMsg::new(INTERNAL_MIN_LEN + 4).unwrap();
        assert_eq!(msg.payload_max_size(), 4);
        assert!(matches!(
            msg.set_payload(b"12345"),
            Err(MessageError::PayloadTooLarge { got: 5, max: 4 })
        ));
    }

    #[test]
    fn from_bytes_rejects_short_input() {
        assert!(matches!(
            InternalMsg::from_bytes(Vec::new()),
            Err(MessageError::TooShort { .. })
        ));
    }

    #[test]
    fn zeroed_frame_round_trip() {
        let msg = InternalMsg::new(INTERNAL_MIN_LEN).unwrap();
        assert_eq!(msg.timestamp(), 0);
        assert_eq!(msg.payload(), b"");
        let again = InternalMsg::from_bytes(msg.as_bytes().to_vec()).unwrap();
        assert_eq!(msg, again);
    }
}
