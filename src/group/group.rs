// SPDX-License-Identifier: MIT OR Apache-2.0

//! The group record: identity, key material, membership and creation metadata.
//!
//! `GroupId` and `GroupKey` are one-way functions of a random preimage and the canonical
//! membership bytes. Two honest parties who assemble the same membership and exchange the
//! preimages converge on identical id and key without either value crossing the wire.
use std::fmt;

use thiserror::Error;

use crate::crypto::sha2::sha2_256;
use crate::crypto::{Rng, RngError, Secret};
use crate::group::dh_key_list::{DhKeyList, DhKeyListError};
use crate::group::member::{Membership, MembershipError};
use crate::group::{put_u64, Reader};

pub const GROUP_ID_SIZE: usize = 32;

pub const GROUP_KEY_SIZE: usize = 32;

/// Size of the random id and key preimages.
pub const PREIMAGE_SIZE: usize = 32;

const GROUP_ID_CONTEXT: &[u8] = b"mixgroup/group-id/v1";
const GROUP_KEY_CONTEXT: &[u8] = b"mixgroup/group-key/v1";

/// Globally unique group identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId([u8; GROUP_ID_SIZE]);

impl GroupId {
    /// Derives the group id from the id preimage and the canonical membership bytes.
    pub fn derive(preimage: &IdPreimage, members: &Membership) -> Self {
        Self(sha2_256(&[
            GROUP_ID_CONTEXT,
            preimage.as_bytes(),
            &members.to_bytes(),
        ]))
    }

    pub const fn from_bytes(bytes: [u8; GROUP_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; GROUP_ID_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GroupId").field(&self.to_hex()).finish()
    }
}

/// Shared symmetric group key. Never transmitted; every member derives it locally.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GroupKey(Secret<GROUP_KEY_SIZE>);

impl GroupKey {
    /// Derives the group key from the key preimage and the canonical membership bytes.
    pub fn derive(preimage: &KeyPreimage, members: &Membership) -> Self {
        Self(Secret::from_bytes(sha2_256(&[
            GROUP_KEY_CONTEXT,
            preimage.as_bytes(),
            &members.to_bytes(),
        ])))
    }

    pub(crate) fn from_bytes(bytes: [u8; GROUP_KEY_SIZE]) -> Self {
        Self(Secret::from_bytes(bytes))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; GROUP_KEY_SIZE] {
        self.0.as_bytes()
    }
}

macro_rules! preimage_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq)]
        pub struct $name([u8; PREIMAGE_SIZE]);

        impl $name {
            pub fn from_rng(rng: &Rng) -> Result<Self, RngError> {
                Ok(Self(rng.random_array()?))
            }

            pub const fn from_bytes(bytes: [u8; PREIMAGE_SIZE]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; PREIMAGE_SIZE] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name))
                    .field(&hex::encode(self.0))
                    .finish()
            }
        }
    };
}

preimage_type!(
    /// 256-bit random value whose one-way image (together with the membership) is the group id.
    IdPreimage
);
preimage_type!(
    /// 256-bit random value whose one-way image (together with the membership) is the group key.
    KeyPreimage
);

/// Everything a member holds about one group: the unit of persistence.
///
/// Membership is immutable after creation; the record is only created, joined and removed as a
/// whole.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Group {
    /// Name of the group set by the user.
    pub name: Vec<u8>,

    pub id: GroupId,

    pub key: GroupKey,

    pub id_preimage: IdPreimage,

    pub key_preimage: KeyPreimage,

    /// The original invite message.
    pub init_message: Vec<u8>,

    /// Creation time in unix nanoseconds.
    pub created: i64,

    /// Ordered list of members, leader first.
    pub members: Membership,

    /// Pairwise DH secrets between the local user and every other member.
    pub dh_keys: DhKeyList,
}

impl Group {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: Vec<u8>,
        id: GroupId,
        key: GroupKey,
        id_preimage: IdPreimage,
        key_preimage: KeyPreimage,
        init_message: Vec<u8>,
        created: i64,
        members: Membership,
        dh_keys: DhKeyList,
    ) -> Self {
        Self {
            name,
            id,
            key,
            id_preimage,
            key_preimage,
            init_message,
            created,
            members,
            dh_keys,
        }
    }

    /// Serializes the record for persistence.
    ///
    /// Layout (integers little-endian):
    /// `nameLen:8 ‖ name ‖ id:32 ‖ key:32 ‖ idPreimage:32 ‖ keyPreimage:32 ‖ initMsgLen:8 ‖
    /// initMsg ‖ createdUnixNano:8 ‖ membersLen:8 ‖ members ‖ dhKeyList`
    pub fn to_bytes(&self) -> Vec<u8> {
        let members = self.members.to_bytes();
        let mut bytes = Vec::new();

        put_u64(&mut bytes, self.name.len() as u64);
        bytes.extend_from_slice(&self.name);
        bytes.extend_from_slice(self.id.as_bytes());
        bytes.extend_from_slice(self.key.as_bytes());
        bytes.extend_from_slice(self.id_preimage.as_bytes());
        bytes.extend_from_slice(self.key_preimage.as_bytes());
        put_u64(&mut bytes, self.init_message.len() as u64);
        bytes.extend_from_slice(&self.init_message);
        bytes.extend_from_slice(&self.created.to_le_bytes());
        put_u64(&mut bytes, members.len() as u64);
        bytes.extend_from_slice(&members);
        bytes.extend_from_slice(&self.dh_keys.to_bytes());

        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GroupError> {
        let mut reader = Reader::new(bytes);

        let name = reader
            .length_prefixed()
            .ok_or(GroupError::UnexpectedEnd)?
            .to_vec();
        let id = GroupId::from_bytes(
            reader
                .take_array::<GROUP_ID_SIZE>()
                .ok_or(GroupError::UnexpectedEnd)?,
        );
        let key = GroupKey::from_bytes(
            reader
                .take_array::<GROUP_KEY_SIZE>()
                .ok_or(GroupError::UnexpectedEnd)?,
        );
        let id_preimage = IdPreimage::from_bytes(
            reader
                .take_array::<PREIMAGE_SIZE>()
                .ok_or(GroupError::UnexpectedEnd)?,
        );
        let key_preimage = KeyPreimage::from_bytes(
            reader
                .take_array::<PREIMAGE_SIZE>()
                .ok_or(GroupError::UnexpectedEnd)?,
        );
        let init_message = reader
            .length_prefixed()
            .ok_or(GroupError::UnexpectedEnd)?
            .to_vec();
        let created = reader.i64_le().ok_or(GroupError::UnexpectedEnd)?;
        let members =
            Membership::from_bytes(reader.length_prefixed().ok_or(GroupError::UnexpectedEnd)?)?;
        let dh_keys = DhKeyList::from_bytes(reader.remaining())?;

        Ok(Self {
            name,
            id,
            key,
            id_preimage,
            key_preimage,
            init_message,
            created,
            members,
            dh_keys,
        })
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{name: {:?}, id: {}, members: {}}}",
            String::from_utf8_lossy(&self.name),
            self.id,
            self.members.len(),
        )
    }
}

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("serialized group record ended mid-field")]
    UnexpectedEnd,

    #[error("failed to deserialize member list: {0}")]
    Membership(#[from] MembershipError),

    #[error("failed to deserialize DH key list: {0}")]
    DhKeyList(#[from] DhKeyListError),
}
