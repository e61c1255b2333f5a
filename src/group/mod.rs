// SPDX-License-Identifier: MIT OR Apache-2.0

//! Group membership, pairwise key lists and the persistable group record.
pub mod dh_key_list;
#[allow(clippy::module_inception)]
pub mod group;
pub mod member;

pub use dh_key_list::{DhKeyList, DhKeyListError};
pub use group::{
    Group, GroupError, GroupId, GroupKey, IdPreimage, KeyPreimage, GROUP_ID_SIZE, GROUP_KEY_SIZE,
    PREIMAGE_SIZE,
};
pub use member::{
    Member, MemberId, Membership, MembershipError, MAX_PARTICIPANTS, MEMBER_ID_SIZE,
    MIN_PARTICIPANTS, SERIALIZED_MEMBER_SIZE,
};

/// Appends a little-endian length or integer field to a wire buffer.
pub(crate) fn put_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Forward-only reader over a serialized byte string.
///
/// Returns `None` once the input is exhausted; callers map that to their own "unexpected end"
/// error condition.
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.bytes.len() < len {
            return None;
        }
        let (head, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Some(head)
    }

    pub fn take_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.take(N)?;
        Some(bytes.try_into().expect("split at fixed length"))
    }

    pub fn u64_le(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.take_array::<8>()?))
    }

    pub fn i64_le(&mut self) -> Option<i64> {
        Some(i64::from_le_bytes(self.take_array::<8>()?))
    }

    /// Reads a `u64` length prefix followed by that many bytes.
    pub fn length_prefixed(&mut self) -> Option<&'a [u8]> {
        let len = self.u64_le()?;
        let len = usize::try_from(len).ok()?;
        self.take(len)
    }

    pub fn remaining(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
