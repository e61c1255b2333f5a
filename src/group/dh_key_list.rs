// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pairwise Diffie-Hellman secrets between the local user and every other group member.
use std::collections::btree_map::Iter;
use std::collections::BTreeMap;

use thiserror::Error;

use crate::crypto::x25519::{SecretKey, SharedSecret, SHARED_SECRET_SIZE};
use crate::group::member::{MemberId, Membership, MEMBER_ID_SIZE};
use crate::group::{put_u64, Reader};

/// Mapping from member id to the pairwise DH shared secret computed between the local user and
/// that member.
///
/// Holds exactly one entry per non-local member. Entries are independently recomputable by each
/// side of the pair and are never transmitted; the serialized form below exists for local
/// persistence only.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct DhKeyList(BTreeMap<MemberId, SharedSecret>);

impl DhKeyList {
    /// Computes the DH shared secret for every member other than `local_id`.
    ///
    /// Pure and deterministic: the same membership and local secret always produce the same
    /// list.
    pub fn generate(
        local_id: &MemberId,
        local_secret: &SecretKey,
        members: &Membership,
    ) -> Self {
        let list = members
            .iter()
            .filter(|member| &member.id != local_id)
            .map(|member| (member.id, local_secret.calculate_agreement(&member.dh_key)))
            .collect();
        Self(list)
    }

    pub fn get(&self, id: &MemberId) -> Option<&SharedSecret> {
        self.0.get(id)
    }

    pub fn contains(&self, id: &MemberId) -> bool {
        self.0.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, MemberId, SharedSecret> {
        self.0.iter()
    }

    /// Serialized as repeated `(memberId ‖ keyByteLen:8 ‖ keyBytes)` tuples in id order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes =
            Vec::with_capacity(self.0.len() * (MEMBER_ID_SIZE + 8 + SHARED_SECRET_SIZE));
        for (id, secret) in &self.0 {
            bytes.extend_from_slice(id.as_bytes());
            put_u64(&mut bytes, SHARED_SECRET_SIZE as u64);
            bytes.extend_from_slice(secret.as_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DhKeyListError> {
        let mut reader = Reader::new(bytes);
        let mut list = BTreeMap::new();

        while !reader.is_empty() {
            let id = MemberId::from_bytes(
                reader
                    .take_array::<MEMBER_ID_SIZE>()
                    .ok_or(DhKeyListError::UnexpectedEnd)?,
            );
            let key_len = reader.u64_le().ok_or(DhKeyListError::UnexpectedEnd)?;
            if key_len != SHARED_SECRET_SIZE as u64 {
                return Err(DhKeyListError::InvalidKeyLength(key_len));
            }
            let secret = SharedSecret::from_bytes(
                reader
                    .take_array::<SHARED_SECRET_SIZE>()
                    .ok_or(DhKeyListError::UnexpectedEnd)?,
            );
            list.insert(id, secret);
        }

        Ok(Self(list))
    }
}

#[derive(Debug, Error)]
pub enum DhKeyListError {
    #[error("serialized DH key list ended mid-entry")]
    UnexpectedEnd,

    #[error("DH key length {0} != {SHARED_SECRET_SIZE} required")]
    InvalidKeyLength(u64),
}

#[cfg(test)]
mod tests {
    use crate::crypto::x25519::SecretKey;
    use crate::crypto::Rng;
    use crate::group::member::{Member, MemberId, Membership};

    use super::{DhKeyList, DhKeyListError};

    fn test_membership(rng: &Rng, n: u8) -> (Membership, Vec<SecretKey>) {
        let mut secrets = Vec::new();
        let mut members = Vec::new();
        for i in 0..n {
            let secret = SecretKey::generate(rng).unwrap();
            members.push(Member::new(
                MemberId::from_bytes([i; 32]),
                secret.public_key(),
            ));
            secrets.push(secret);
        }
        let leader = members.remove(0);
        (Membership::new(leader, members).unwrap(), secrets)
    }

    #[test]
    fn one_entry_per_other_member() {
        let rng = Rng::from_seed([5; 32]);
        let (membership, secrets) = test_membership(&rng, 4);

        let local = membership.leader().id;
        let list = DhKeyList::generate(&local, &secrets[0], &membership);

        assert_eq!(list.len(), membership.len() - 1);
        assert!(!list.contains(&local));
        for member in membership.iter().skip(1) {
            assert!(list.contains(&member.id));
        }
    }

    #[test]
    fn both_sides_agree() {
        let rng = Rng::from_seed([6; 32]);
        let (membership, secrets) = test_membership(&rng, 3);

        let leader_id = membership.as_slice()[0].id;
        let member_id = membership.as_slice()[1].id;

        let leader_list = DhKeyList::generate(&leader_id, &secrets[0], &membership);
        let member_list = DhKeyList::generate(&member_id, &secrets[1], &membership);

        assert_eq!(
            leader_list.get(&member_id).unwrap(),
            member_list.get(&leader_id).unwrap(),
        );
    }

    #[test]
    fn serialization_round_trip() {
        let rng = Rng::from_seed([7; 32]);
        let (membership, secrets) = test_membership(&rng, 5);

        let list = DhKeyList::generate(&membership.leader().id, &secrets[0], &membership);
        let bytes = list.to_bytes();
        assert_eq!(list, DhKeyList::from_bytes(&bytes).unwrap());

        // Empty list round-trips too.
        let empty = DhKeyList::default();
        assert_eq!(empty, DhKeyList::from_bytes(&empty.to_bytes()).unwrap());

        // Truncated input fails.
        assert!(matches!(
            DhKeyList::from_bytes(&bytes[..bytes.len() - 1]),
            Err(DhKeyListError::UnexpectedEnd)
        ));
    }
}
