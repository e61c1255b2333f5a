// SPDX-License-Identifier: MIT OR Apache-2.0

//! Group members and the ordered, leader-first membership list.
use std::fmt;

use thiserror::Error;

use crate::crypto::x25519::{PublicKey, PUBLIC_KEY_SIZE};
use crate::group::Reader;

/// Size of a member's network identity.
pub const MEMBER_ID_SIZE: usize = 32;

/// Canonical serialized size of one member: identity followed by DH public value.
pub const SERIALIZED_MEMBER_SIZE: usize = MEMBER_ID_SIZE + PUBLIC_KEY_SIZE;

/// Minimum number of invited members, excluding the group leader.
pub const MIN_PARTICIPANTS: usize = 2;

/// Maximum number of invited members, excluding the group leader.
pub const MAX_PARTICIPANTS: usize = 11;

/// Fixed-width network identity of a group member.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemberId([u8; MEMBER_ID_SIZE]);

impl MemberId {
    pub const fn from_bytes(bytes: [u8; MEMBER_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; MEMBER_ID_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl TryFrom<&[u8]> for MemberId {
    type Error = MembershipError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let value_len = value.len();
        let checked: [u8; MEMBER_ID_SIZE] = value
            .try_into()
            .map_err(|_| MembershipError::InvalidIdLength(value_len))?;
        Ok(Self(checked))
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MemberId").field(&self.to_hex()).finish()
    }
}

/// A network identity paired with its Diffie-Hellman public value.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Member {
    pub id: MemberId,
    pub dh_key: PublicKey,
}

impl Member {
    pub fn new(id: MemberId, dh_key: PublicKey) -> Self {
        Self { id, dh_key }
    }

    /// Canonical wire form: `id ‖ dh_key`.
    pub fn to_bytes(&self) -> [u8; SERIALIZED_MEMBER_SIZE] {
        let mut bytes = [0u8; SERIALIZED_MEMBER_SIZE];
        bytes[..MEMBER_ID_SIZE].copy_from_slice(self.id.as_bytes());
        bytes[MEMBER_ID_SIZE..].copy_from_slice(self.dh_key.as_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MembershipError> {
        if bytes.len() != SERIALIZED_MEMBER_SIZE {
            return Err(MembershipError::InvalidLength(bytes.len()));
        }
        let id = MemberId::try_from(&bytes[..MEMBER_ID_SIZE])?;
        let dh_key = PublicKey::try_from(&bytes[MEMBER_ID_SIZE..])
            .expect("fixed-width slice of public key size");
        Ok(Self { id, dh_key })
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}, {}}}", self.id, self.dh_key)
    }
}

/// Ordered list of all members of a group.
///
/// Element 0 is always the group leader; the remaining members are sorted by their id and no id
/// repeats. The canonical serialization of a membership is an input to group id and group key
/// derivation, so two independently-built lists compare equal only if identical in order and
/// content.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Membership(Vec<Member>);

impl Membership {
    /// Assembles a membership from the leader and the invited participants.
    ///
    /// Participants are sorted by id into the canonical order. Fails if the participant count is
    /// out of bounds or any id repeats (including a participant repeating the leader).
    pub fn new(leader: Member, participants: Vec<Member>) -> Result<Self, MembershipError> {
        if participants.len() < MIN_PARTICIPANTS {
            return Err(MembershipError::TooFewParticipants(participants.len()));
        }
        if participants.len() > MAX_PARTICIPANTS {
            return Err(MembershipError::TooManyParticipants(participants.len()));
        }

        let mut members = Vec::with_capacity(participants.len() + 1);
        members.push(leader);
        members.extend(participants);
        members[1..].sort_by(|a, b| a.id.cmp(&b.id));

        check_unique(&members)?;

        Ok(Self(members))
    }

    pub fn leader(&self) -> &Member {
        &self.0[0]
    }

    /// Overwrites the leader's DH public value.
    ///
    /// Used on the receive side of a group request to substitute the public value from the
    /// existing authenticated relationship for the one claimed on the wire.
    pub(crate) fn set_leader_dh_key(&mut self, dh_key: PublicKey) {
        self.0[0].dh_key = dh_key;
    }

    pub fn get(&self, id: &MemberId) -> Option<&Member> {
        self.0.iter().find(|member| &member.id == id)
    }

    pub fn contains(&self, id: &MemberId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Member> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Member] {
        &self.0
    }

    /// Canonical serialization: concatenation of each member's wire form, leader first.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.0.len() * SERIALIZED_MEMBER_SIZE);
        for member in &self.0 {
            bytes.extend_from_slice(&member.to_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MembershipError> {
        if bytes.is_empty() || bytes.len() % SERIALIZED_MEMBER_SIZE != 0 {
            return Err(MembershipError::InvalidLength(bytes.len()));
        }

        let mut reader = Reader::new(bytes);
        let mut members = Vec::with_capacity(bytes.len() / SERIALIZED_MEMBER_SIZE);
        while let Some(chunk) = reader.take(SERIALIZED_MEMBER_SIZE) {
            members.push(Member::from_bytes(chunk)?);
        }

        check_unique(&members)?;

        Ok(Self(members))
    }
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, member) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{member}")?;
        }
        write!(f, "]")
    }
}

fn check_unique(members: &[Member]) -> Result<(), MembershipError> {
    for (i, member) in members.iter().enumerate() {
        if members[i + 1..].iter().any(|other| other.id == member.id) {
            return Err(MembershipError::DuplicateMember(member.id));
        }
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("length of membership list {0} < {MIN_PARTICIPANTS} minimum allowed")]
    TooFewParticipants(usize),

    #[error("length of membership list {0} > {MAX_PARTICIPANTS} maximum allowed")]
    TooManyParticipants(usize),

    #[error("membership list contains member id {0} more than once")]
    DuplicateMember(MemberId),

    #[error("invalid member id length {0}")]
    InvalidIdLength(usize),

    #[error("serialized membership length {0} is not a multiple of a member record")]
    InvalidLength(usize),
}

#[cfg(test)]
mod tests {
    use crate::crypto::x25519::SecretKey;
    use crate::crypto::Rng;

    use super::{Member, MemberId, Membership, MembershipError};

    fn test_member(rng: &Rng, id_byte: u8) -> Member {
        let secret = SecretKey::generate(rng).unwrap();
        Member::new(MemberId::from_bytes([id_byte; 32]), secret.public_key())
    }

    #[test]
    fn leader_first_and_participants_sorted() {
        let rng = Rng::from_seed([1; 32]);
        let leader = test_member(&rng, 9);
        let participants = vec![
            test_member(&rng, 3),
            test_member(&rng, 1),
            test_member(&rng, 2),
        ];

        let membership = Membership::new(leader, participants).unwrap();

        assert_eq!(membership.leader(), &leader);
        let ids: Vec<u8> = membership
            .iter()
            .map(|member| member.id.as_bytes()[0])
            .collect();
        assert_eq!(ids, vec![9, 1, 2, 3]);
    }

    #[test]
    fn rejects_out_of_bounds_and_duplicates() {
        let rng = Rng::from_seed([2; 32]);
        let leader = test_member(&rng, 0);

        let result = Membership::new(leader, vec![test_member(&rng, 1)]);
        assert!(matches!(
            result,
            Err(MembershipError::TooFewParticipants(1))
        ));

        let too_many: Vec<Member> = (1..=12).map(|i| test_member(&rng, i)).collect();
        let result = Membership::new(leader, too_many);
        assert!(matches!(
            result,
            Err(MembershipError::TooManyParticipants(12))
        ));

        let result = Membership::new(
            leader,
            vec![test_member(&rng, 1), test_member(&rng, 1)],
        );
        assert!(matches!(result, Err(MembershipError::DuplicateMember(_))));

        // A participant repeating the leader id is also a duplicate.
        let result = Membership::new(
            leader,
            vec![test_member(&rng, 0), test_member(&rng, 1)],
        );
        assert!(matches!(result, Err(MembershipError::DuplicateMember(_))));
    }

    #[test]
    fn serialization_round_trip() {
        let rng = Rng::from_seed([3; 32]);
        let membership = Membership::new(
            test_member(&rng, 5),
            vec![test_member(&rng, 1), test_member(&rng, 2)],
        )
        .unwrap();

        let bytes = membership.to_bytes();
        assert_eq!(membership, Membership::from_bytes(&bytes).unwrap());

        assert!(matches!(
            Membership::from_bytes(&[]),
            Err(MembershipError::InvalidLength(0))
        ));
        assert!(matches!(
            Membership::from_bytes(&bytes[..63]),
            Err(MembershipError::InvalidLength(63))
        ));
    }

    #[test]
    fn canonical_bytes_depend_on_order_and_content() {
        let rng = Rng::from_seed([4; 32]);
        let a = test_member(&rng, 1);
        let b = test_member(&rng, 2);
        let leader = test_member(&rng, 0);

        // Input order of participants does not matter, content does.
        let m1 = Membership::new(leader, vec![a, b]).unwrap();
        let m2 = Membership::new(leader, vec![b, a]).unwrap();
        assert_eq!(m1.to_bytes(), m2.to_bytes());

        let c = test_member(&rng, 3);
        let m3 = Membership::new(leader, vec![a, c]).unwrap();
        assert_ne!(m1.to_bytes(), m3.to_bytes());
    }
}
