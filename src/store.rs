// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory registry of joined groups, mirrored to versioned key-value storage.
//!
//! The store keeps every joined [`Group`] in a map for lock-cheap lookup and writes each record
//! through to the host's [`KeyValueStore`] so membership survives restarts. A separate index
//! entry lists the stored group ids; loading replays the index and fetches each record.
use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;
use tracing::debug;

use crate::crypt::{check_key_fingerprint, Fingerprint};
use crate::group::{Group, GroupError, GroupId, Member, GROUP_ID_SIZE};
use crate::message::Salt;
use crate::traits::{KeyValueStore, KvError};

/// Maximum number of groups a user can be a member of at once.
pub const MAX_GROUP_CHATS: usize = 64;

const STORAGE_VERSION: u64 = 0;
const INDEX_KEY: &str = "mixgroup/index";
const GROUP_KEY_PREFIX: &str = "mixgroup/groups/";

fn record_key(group_id: &GroupId) -> String {
    format!("{GROUP_KEY_PREFIX}{group_id}")
}

/// All groups the local user is a member of.
pub struct GroupStore<K> {
    list: RwLock<HashMap<GroupId, Group>>,
    user: Member,
    kv: K,
}

impl<K: KeyValueStore> GroupStore<K> {
    /// Creates an empty store and persists its (empty) index.
    pub fn new(kv: K, user: Member) -> Result<Self, StoreError> {
        let store = Self {
            list: RwLock::new(HashMap::new()),
            user,
            kv,
        };
        store.persist_index(&[])?;
        Ok(store)
    }

    /// Loads the store from persistence, or creates a fresh one if no index exists yet.
    pub fn new_or_load(kv: K, user: Member) -> Result<Self, StoreError> {
        let index = kv.get(INDEX_KEY, STORAGE_VERSION)?;
        match index {
            Some(bytes) => Self::load(kv, user, &bytes),
            None => Self::new(kv, user),
        }
    }

    fn load(kv: K, user: Member, index: &[u8]) -> Result<Self, StoreError> {
        if index.len() % GROUP_ID_SIZE != 0 {
            return Err(StoreError::MalformedIndex(index.len()));
        }

        let mut list = HashMap::with_capacity(index.len() / GROUP_ID_SIZE);
        for chunk in index.chunks_exact(GROUP_ID_SIZE) {
            let group_id =
                GroupId::from_bytes(chunk.try_into().expect("chunks of group id size"));
            let record = kv
                .get(&record_key(&group_id), STORAGE_VERSION)?
                .ok_or(StoreError::MissingRecord(group_id))?;
            list.insert(group_id, Group::from_bytes(&record)?);
        }

        debug!(groups = list.len(), "loaded group store");

        Ok(Self {
            list: RwLock::new(list),
            user,
            kv,
        })
    }

    /// Adds a group and persists it. Fails when the store is full or the group already exists.
    pub fn add(&self, group: Group) -> Result<(), StoreError> {
        let mut list = self.list.write().expect("group store lock poisoned");

        if list.len() >= MAX_GROUP_CHATS {
            return Err(StoreError::Full);
        }
        if list.contains_key(&group.id) {
            return Err(StoreError::GroupExists(group.id));
        }

        let group_id = group.id;
        let record = group.to_bytes();
        list.insert(group_id, group);

        let persisted = self
            .kv
            .set(&record_key(&group_id), STORAGE_VERSION, &record)
            .and_then(|()| {
                let ids: Vec<GroupId> = list.keys().copied().collect();
                self.persist_index(&ids)
            });
        if let Err(err) = persisted {
            list.remove(&group_id);
            return Err(err.into());
        }

        Ok(())
    }

    /// Removes a group from the store and from persistence.
    pub fn remove(&self, group_id: &GroupId) -> Result<(), StoreError> {
        let mut list = self.list.write().expect("group store lock poisoned");

        if list.remove(group_id).is_none() {
            return Err(StoreError::GroupNotFound(*group_id));
        }

        let ids: Vec<GroupId> = list.keys().copied().collect();
        self.persist_index(&ids)?;
        self.kv.delete(&record_key(group_id), STORAGE_VERSION)?;

        Ok(())
    }

    pub fn get(&self, group_id: &GroupId) -> Option<Group> {
        self.list
            .read()
            .expect("group store lock poisoned")
            .get(group_id)
            .cloned()
    }

    /// Finds the group a received ciphertext belongs to by recomputing the key fingerprint of
    /// every stored group against the wire salt.
    pub fn get_by_key_fingerprint(
        &self,
        fingerprint: &Fingerprint,
        salt: &Salt,
    ) -> Option<Group> {
        self.list
            .read()
            .expect("group store lock poisoned")
            .values()
            .find(|group| check_key_fingerprint(fingerprint, &group.key, salt, &self.user.id))
            .cloned()
    }

    pub fn group_ids(&self) -> Vec<GroupId> {
        self.list
            .read()
            .expect("group store lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    pub fn groups(&self) -> Vec<Group> {
        self.list
            .read()
            .expect("group store lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.list.read().expect("group store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The local user as a group member.
    pub fn user(&self) -> &Member {
        &self.user
    }

    fn persist_index(&self, ids: &[GroupId]) -> Result<(), KvError> {
        let mut index = Vec::with_capacity(ids.len() * GROUP_ID_SIZE);
        for id in ids {
            index.extend_from_slice(id.as_bytes());
        }
        self.kv.set(INDEX_KEY, STORAGE_VERSION, &index)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("group store is full ({MAX_GROUP_CHATS} groups maximum)")]
    Full,

    #[error("group {0} already exists in the store")]
    GroupExists(GroupId),

    #[error("group {0} not found in the store")]
    GroupNotFound(GroupId),

    #[error("stored group index has invalid length {0}")]
    MalformedIndex(usize),

    #[error("group index references record {0} which is missing from storage")]
    MissingRecord(GroupId),

    #[error("failed to deserialize stored group record: {0}")]
    Record(#[from] GroupError),

    #[error(transparent)]
    Kv(#[from] KvError),
}

#[cfg(test)]
mod tests {
    use crate::crypt::key_fingerprint;
    use crate::crypto::x25519::SecretKey;
    use crate::crypto::Rng;
    use crate::group::{
        DhKeyList, Group, GroupId, GroupKey, IdPreimage, KeyPreimage, Member, MemberId, Membership,
    };
    use crate::message::Salt;
    use crate::test_utils::MemoryKv;

    use super::{GroupStore, StoreError, MAX_GROUP_CHATS};

    fn test_user(rng: &Rng) -> Member {
        let secret = SecretKey::generate(rng).unwrap();
        Member::new(MemberId::from_bytes([200; 32]), secret.public_key())
    }

    fn test_group(rng: &Rng, user: &Member, tag: u8) -> Group {
        let mut members = Vec::new();
        let mut secrets = Vec::new();
        for i in 0..2u8 {
            let secret = SecretKey::generate(rng).unwrap();
            members.push(Member::new(
                MemberId::from_bytes([tag.wrapping_add(i + 1); 32]),
                secret.public_key(),
            ));
            secrets.push(secret);
        }
        let leader = members[0];
        members[0] = *user;
        let membership = Membership::new(leader, members).unwrap();

        let id_preimage = IdPreimage::from_rng(rng).unwrap();
        let key_preimage = KeyPreimage::from_rng(rng).unwrap();
        let user_secret = SecretKey::generate(rng).unwrap();

        Group::new(
            vec![b'g', tag],
            GroupId::derive(&id_preimage, &membership),
            GroupKey::derive(&key_preimage, &membership),
            id_preimage,
            key_preimage,
            Vec::new(),
            1_700_000_000_000_000_000,
            membership.clone(),
            DhKeyList::generate(&user.id, &user_secret, &membership),
        )
    }

    #[test]
    fn add_get_remove() {
        let rng = Rng::from_seed([30; 32]);
        let user = test_user(&rng);
        let store = GroupStore::new(MemoryKv::default(), user).unwrap();

        let group = test_group(&rng, &user, 0);
        store.add(group.clone()).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&group.id).unwrap(), group);

        // Duplicate adds are rejected.
        assert!(matches!(
            store.add(group.clone()),
            Err(StoreError::GroupExists(_))
        ));

        store.remove(&group.id).unwrap();
        assert!(store.is_empty());
        assert!(matches!(
            store.remove(&group.id),
            Err(StoreError::GroupNotFound(_))
        ));
    }

    #[test]
    fn capacity_limit() {
        let rng = Rng::from_seed([31; 32]);
        let user = test_user(&rng);
        let store = GroupStore::new(MemoryKv::default(), user).unwrap();

        for i in 0..MAX_GROUP_CHATS {
            // Distinct preimages give distinct group ids even with repeating memberships.
            store.add(test_group(&rng, &user, (i % 100) as u8)).unwrap();
        }

        assert!(matches!(
            store.add(test_group(&rng, &user, 101)),
            Err(StoreError::Full)
        ));
    }

    #[test]
    fn reload_from_persistence() {
        let rng = Rng::from_seed([32; 32]);
        let user = test_user(&rng);
        let kv = MemoryKv::default();

        let store = GroupStore::new(kv.clone(), user).unwrap();
        let group_1 = test_group(&rng, &user, 1);
        let group_2 = test_group(&rng, &user, 2);
        store.add(group_1.clone()).unwrap();
        store.add(group_2.clone()).unwrap();
        drop(store);

        let reloaded = GroupStore::new_or_load(kv, user).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(&group_1.id).unwrap(), group_1);
        assert_eq!(reloaded.get(&group_2.id).unwrap(), group_2);
    }

    #[test]
    fn lookup_by_key_fingerprint() {
        let rng = Rng::from_seed([33; 32]);
        let user = test_user(&rng);
        let store = GroupStore::new(MemoryKv::default(), user).unwrap();

        let group_1 = test_group(&rng, &user, 1);
        let group_2 = test_group(&rng, &user, 2);
        store.add(group_1.clone()).unwrap();
        store.add(group_2.clone()).unwrap();

        let salt: Salt = rng.random_array().unwrap();
        let fingerprint = key_fingerprint(&group_2.key, &salt, &user.id);

        let found = store.get_by_key_fingerprint(&fingerprint, &salt).unwrap();
        assert_eq!(found.id, group_2.id);

        // A fingerprint computed for a different recipient matches nothing.
        let other = key_fingerprint(&group_2.key, &salt, &group_1.members.leader().id);
        assert!(store.get_by_key_fingerprint(&other, &salt).is_none());
    }
}
