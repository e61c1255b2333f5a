// SPDX-License-Identifier: MIT OR Apache-2.0

//! The group message encryption scheme.
//!
//! One group message is sent as N independent ciphertexts, one per member, all carrying the same
//! inner plaintext frame. Per recipient the sender draws a fresh random salt, derives a message
//! key from the group key, the current epoch and that salt, and computes two values alongside the
//! ciphertext:
//!
//! - a **key fingerprint** bound to `(groupKey, salt, recipientId)`, which routes the ciphertext
//!   to the right listener without naming the recipient on the wire, and
//! - a **MAC** bound to the message key, the ciphertext and the *pairwise DH secret* of the
//!   intended recipient.
//!
//! The receiver knows the group key and the salt but neither which epoch bucket the sender used
//! (clock skew) nor which of its pairwise secrets the message was addressed with. Both ambiguities
//! are resolved by [`get_crypt_key`]: a bounded trial search over every `(dhSecret, epoch ± 1)`
//! candidate, accepting the first key whose MAC recomputation matches. This replaces a
//! recipient-identifying header with a small, bounded amount of receiver-side computation.
//!
//! Keys rotate with the **epoch**, a coarse five-minute bucket of the message timestamp, without
//! any renegotiation. When a round timestamp is unavailable (zero) the local clock is substituted;
//! this fallback is inherited behavior and can itself cause trial decryption to fail under heavy
//! clock skew, so failures here are expected background noise rather than hard errors.
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::warn;

use crate::crypto::sha2::sha2_256;
use crate::crypto::{Secret, x25519::SharedSecret};
use crate::group::dh_key_list::DhKeyList;
use crate::group::group::{GroupId, GroupKey};
use crate::group::member::MemberId;
use crate::message::Salt;

pub const CRYPT_KEY_SIZE: usize = 32;

pub const FINGERPRINT_SIZE: usize = 32;

pub const MAC_SIZE: usize = 32;

pub const MESSAGE_ID_SIZE: usize = 32;

/// Ciphertext overhead of the AEAD tag.
pub const AEAD_TAG_SIZE: usize = 16;

/// Width of one epoch bucket in nanoseconds (five minutes).
pub const EPOCH_PERIOD_NANOS: i64 = 5 * 60 * 1_000_000_000;

const CRYPT_KEY_CONTEXT: &[u8] = b"mixgroup/message-key/v1";
const FINGERPRINT_CONTEXT: &[u8] = b"mixgroup/key-fingerprint/v1";
const MAC_CONTEXT: &[u8] = b"mixgroup/message-mac/v1";
const MESSAGE_ID_CONTEXT: &[u8] = b"mixgroup/message-id/v1";

/// Symmetric key protecting one group message towards one recipient.
pub type CryptKey = Secret<CRYPT_KEY_SIZE>;

/// Routes an incoming ciphertext to the correct decryption context without revealing the
/// recipient identity on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_SIZE]);

impl Fingerprint {
    pub const fn from_bytes(bytes: [u8; FINGERPRINT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_SIZE] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Fingerprint")
            .field(&hex::encode(self.0))
            .finish()
    }
}

/// Message authentication code bound to one recipient's pairwise DH secret.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Mac([u8; MAC_SIZE]);

impl Mac {
    pub const fn from_bytes(bytes: [u8; MAC_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; MAC_SIZE] {
        &self.0
    }

    /// Constant-time comparison against another MAC.
    pub fn verify(&self, other: &Mac) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

/// Content-addressed group message identifier.
///
/// A deterministic digest of the group id and the inner plaintext frame, so the sender can
/// compute it locally before transmission and match it against receive-side confirmations.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId([u8; MESSAGE_ID_SIZE]);

impl MessageId {
    pub const fn from_bytes(bytes: [u8; MESSAGE_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; MESSAGE_ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageId")
            .field(&hex::encode(self.0))
            .finish()
    }
}

/// Current local time in unix nanoseconds.
pub(crate) fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Computes the epoch bucket for a unix-nanosecond timestamp.
pub fn compute_epoch(timestamp_nanos: i64) -> u64 {
    (timestamp_nanos.max(0) / EPOCH_PERIOD_NANOS) as u64
}

/// Derives the symmetric key for one message towards one recipient.
pub fn derive_crypt_key(group_key: &GroupKey, epoch: u64, salt: &Salt) -> CryptKey {
    let hkdf = Hkdf::<Sha256>::new(Some(salt.as_slice()), group_key.as_bytes());
    let mut info = Vec::with_capacity(CRYPT_KEY_CONTEXT.len() + 8);
    info.extend_from_slice(CRYPT_KEY_CONTEXT);
    info.extend_from_slice(&epoch.to_le_bytes());
    let mut okm = [0u8; CRYPT_KEY_SIZE];
    hkdf.expand(&info, &mut okm)
        .expect("hkdf output length is valid");
    Secret::from_bytes(okm)
}

/// Computes the key fingerprint routing a ciphertext to `recipient`.
pub fn key_fingerprint(group_key: &GroupKey, salt: &Salt, recipient: &MemberId) -> Fingerprint {
    Fingerprint(sha2_256(&[
        FINGERPRINT_CONTEXT,
        group_key.as_bytes(),
        salt,
        recipient.as_bytes(),
    ]))
}

/// Checks, in constant time, whether a fingerprint was computed for this group key, salt and
/// recipient.
pub fn check_key_fingerprint(
    fingerprint: &Fingerprint,
    group_key: &GroupKey,
    salt: &Salt,
    recipient: &MemberId,
) -> bool {
    let expected = key_fingerprint(group_key, salt, recipient);
    bool::from(fingerprint.0.ct_eq(&expected.0))
}

/// Computes the MAC binding a ciphertext to the intended recipient's pairwise DH secret.
///
/// Binding the pairwise secret rather than only the group key is what lets the receiver resolve
/// which of its DH key list entries a broadcast ciphertext was addressed with.
pub fn message_mac(key: &CryptKey, ciphertext: &[u8], dh_secret: &SharedSecret) -> Mac {
    Mac(sha2_256(&[
        MAC_CONTEXT,
        key.as_bytes(),
        ciphertext,
        dh_secret.as_bytes(),
    ]))
}

/// Encrypts an inner frame, binding nonce and additional data to the key fingerprint.
pub fn encrypt(
    key: &CryptKey,
    fingerprint: &Fingerprint,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = XNonce::from_slice(&fingerprint.as_bytes()[..24]);
    cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: fingerprint.as_bytes(),
            },
        )
        .map_err(|_| CryptError::Encrypt)
}

/// Decrypts a ciphertext produced by [`encrypt`].
pub fn decrypt(
    key: &CryptKey,
    fingerprint: &Fingerprint,
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = XNonce::from_slice(&fingerprint.as_bytes()[..24]);
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: fingerprint.as_bytes(),
            },
        )
        .map_err(|_| CryptError::Decrypt)
}

/// Recovers the key a received ciphertext was encrypted with.
///
/// Trials every pairwise DH secret in the key list against the epoch of the round timestamp and
/// its two neighbouring epochs, accepting the first candidate whose MAC recomputation matches the
/// wire MAC. The search is bounded by `members × 3` derivations.
pub fn get_crypt_key(
    group_key: &GroupKey,
    salt: &Salt,
    mac: &Mac,
    ciphertext: &[u8],
    dh_keys: &DhKeyList,
    timestamp_nanos: i64,
) -> Result<CryptKey, CryptError> {
    let timestamp = if timestamp_nanos == 0 {
        // Inherited fallback: without a round timestamp the local clock is the best guess, but
        // it widens the skew window and can make this search fail.
        let now = now_nanos();
        warn!(substitute = now, "round timestamp is zero, using local time");
        now
    } else {
        timestamp_nanos
    };

    let epoch = compute_epoch(timestamp);
    for (_, dh_secret) in dh_keys.iter() {
        for candidate in epoch.saturating_sub(1)..=epoch.saturating_add(1) {
            let key = derive_crypt_key(group_key, candidate, salt);
            if message_mac(&key, ciphertext, dh_secret).verify(mac) {
                return Ok(key);
            }
        }
    }

    Err(CryptError::MacVerificationExhausted)
}

/// Computes the content-addressed identifier of a group message.
pub fn message_id(group_id: &GroupId, internal_plaintext: &[u8]) -> MessageId {
    MessageId(sha2_256(&[
        MESSAGE_ID_CONTEXT,
        group_id.as_bytes(),
        internal_plaintext,
    ]))
}

#[derive(Debug, Error)]
pub enum CryptError {
    #[error("failed to encrypt group payload")]
    Encrypt,

    #[error("failed to decrypt group payload")]
    Decrypt,

    #[error("MAC verification exhausted all DH key and epoch candidates")]
    MacVerificationExhausted,
}

#[cfg(test)]
mod tests {
    use crate::crypto::Rng;
    use crate::crypto::x25519::SecretKey;
    use crate::group::dh_key_list::DhKeyList;
    use crate::group::group::{GroupId, GroupKey, IdPreimage, KeyPreimage};
    use crate::group::member::{Member, MemberId, Membership};
    use crate::message::Salt;

    use super::{
        CryptError, EPOCH_PERIOD_NANOS, check_key_fingerprint, compute_epoch, decrypt,
        derive_crypt_key, encrypt, get_crypt_key, key_fingerprint, message_id, message_mac,
    };

    struct Fixture {
        group_key: GroupKey,
        group_id: GroupId,
        // DH key list as seen by the first non-leader member.
        dh_keys: DhKeyList,
        // The leader's pairwise secret towards that member.
        leader_list: DhKeyList,
        member_id: MemberId,
        leader_id: MemberId,
    }

    fn fixture(rng: &Rng) -> Fixture {
        let mut members = Vec::new();
        let mut secrets = Vec::new();
        for i in 0..3u8 {
            let secret = SecretKey::generate(rng).unwrap();
            members.push(Member::new(
                MemberId::from_bytes([i; 32]),
                secret.public_key(),
            ));
            secrets.push(secret);
        }
        let leader = members.remove(0);
        let membership = Membership::new(leader, members).unwrap();

        let leader_id = membership.as_slice()[0].id;
        let member_id = membership.as_slice()[1].id;

        Fixture {
            group_key: GroupKey::derive(&KeyPreimage::from_rng(rng).unwrap(), &membership),
            group_id: GroupId::derive(&IdPreimage::from_rng(rng).unwrap(), &membership),
            dh_keys: DhKeyList::generate(&member_id, &secrets[1], &membership),
            leader_list: DhKeyList::generate(&leader_id, &secrets[0], &membership),
            member_id,
            leader_id,
        }
    }

    #[test]
    fn epoch_buckets() {
        assert_eq!(compute_epoch(0), 0);
        assert_eq!(compute_epoch(EPOCH_PERIOD_NANOS - 1), 0);
        assert_eq!(compute_epoch(EPOCH_PERIOD_NANOS), 1);
        assert_eq!(compute_epoch(-5), 0);
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let rng = Rng::from_seed([20; 32]);
        let fx = fixture(&rng);
        let salt: Salt = rng.random_array().unwrap();

        let key = derive_crypt_key(&fx.group_key, 42, &salt);
        let fingerprint = key_fingerprint(&fx.group_key, &salt, &fx.member_id);

        let plaintext = b"an inner frame".to_vec();
        let ciphertext = encrypt(&key, &fingerprint, &plaintext).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len() + super::AEAD_TAG_SIZE);

        let decrypted = decrypt(&key, &fingerprint, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);

        // Wrong key fails.
        let wrong_key = derive_crypt_key(&fx.group_key, 43, &salt);
        assert!(matches!(
            decrypt(&wrong_key, &fingerprint, &ciphertext),
            Err(CryptError::Decrypt)
        ));
    }

    #[test]
    fn fingerprint_identifies_recipient() {
        let rng = Rng::from_seed([21; 32]);
        let fx = fixture(&rng);
        let salt: Salt = rng.random_array().unwrap();

        let fingerprint = key_fingerprint(&fx.group_key, &salt, &fx.member_id);
        assert!(check_key_fingerprint(
            &fingerprint,
            &fx.group_key,
            &salt,
            &fx.member_id
        ));
        assert!(!check_key_fingerprint(
            &fingerprint,
            &fx.group_key,
            &salt,
            &fx.leader_id
        ));
    }

    #[test]
    fn trial_search_recovers_key() {
        let rng = Rng::from_seed([22; 32]);
        let fx = fixture(&rng);
        let salt: Salt = rng.random_array().unwrap();

        let send_ts = 400 * EPOCH_PERIOD_NANOS + 17;
        let key = derive_crypt_key(&fx.group_key, compute_epoch(send_ts), &salt);
        let ciphertext = encrypt(
            &key,
            &key_fingerprint(&fx.group_key, &salt, &fx.member_id),
            b"payload",
        )
        .unwrap();
        // MAC bound to the leader->member pairwise secret.
        let mac = message_mac(
            &key,
            &ciphertext,
            fx.leader_list.get(&fx.member_id).unwrap(),
        );

        // The receiving member recovers the exact key from its own key list.
        let recovered =
            get_crypt_key(&fx.group_key, &salt, &mac, &ciphertext, &fx.dh_keys, send_ts).unwrap();
        assert_eq!(recovered, key);
    }

    #[test]
    fn trial_search_tolerates_one_epoch_of_skew() {
        let rng = Rng::from_seed([23; 32]);
        let fx = fixture(&rng);
        let salt: Salt = rng.random_array().unwrap();

        let send_ts = 400 * EPOCH_PERIOD_NANOS + 17;
        let key = derive_crypt_key(&fx.group_key, compute_epoch(send_ts), &salt);
        let ciphertext = encrypt(
            &key,
            &key_fingerprint(&fx.group_key, &salt, &fx.member_id),
            b"payload",
        )
        .unwrap();
        let mac = message_mac(
            &key,
            &ciphertext,
            fx.leader_list.get(&fx.member_id).unwrap(),
        );

        // Receive-side clock five minutes ahead: still within the +/- one epoch window.
        let recovered = get_crypt_key(
            &fx.group_key,
            &salt,
            &mac,
            &ciphertext,
            &fx.dh_keys,
            send_ts + EPOCH_PERIOD_NANOS,
        )
        .unwrap();
        assert_eq!(recovered, key);
    }

    #[test]
    fn trial_search_fails_outside_epoch_window() {
        let rng = Rng::from_seed([24; 32]);
        let fx = fixture(&rng);
        let salt: Salt = rng.random_array().unwrap();

        let send_ts = 400 * EPOCH_PERIOD_NANOS + 17;
        let key = derive_crypt_key(&fx.group_key, compute_epoch(send_ts), &salt);
        let ciphertext = encrypt(
            &key,
            &key_fingerprint(&fx.group_key, &salt, &fx.member_id),
            b"payload",
        )
        .unwrap();
        let mac = message_mac(
            &key,
            &ciphertext,
            fx.leader_list.get(&fx.member_id).unwrap(),
        );

        // One hour of skew is twelve epochs: exhausted.
        let result = get_crypt_key(
            &fx.group_key,
            &salt,
            &mac,
            &ciphertext,
            &fx.dh_keys,
            send_ts + 12 * EPOCH_PERIOD_NANOS,
        );
        assert!(matches!(result, Err(CryptError::MacVerificationExhausted)));
    }

    #[test]
    fn message_id_is_content_addressed() {
        let rng = Rng::from_seed([25; 32]);
        let fx = fixture(&rng);

        let id_1 = message_id(&fx.group_id, b"frame bytes");
        let id_2 = message_id(&fx.group_id, b"frame bytes");
        assert_eq!(id_1, id_2);

        assert_ne!(id_1, message_id(&fx.group_id, b"other frame bytes"));
    }
}
