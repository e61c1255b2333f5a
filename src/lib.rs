// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sender-anonymous group messaging for mix-network clients.
//!
//! This crate implements small, fixed-membership group chats on top of a metadata-protecting
//! message transport. A group is created by one user (the leader) who invites up to eleven
//! established contacts; every member then holds the same symmetric group key without that key
//! ever crossing the wire.
//!
//! ## How groups form
//!
//! The leader assembles the membership from its authenticated relationships, draws two random
//! preimages and derives the group id and group key as one-way functions of preimage and
//! canonical membership bytes. The invitation, sent over the existing authenticated one-to-one
//! channels, carries the preimages and the membership; each invitee substitutes the leader's DH
//! public value with the one from its own relationship and re-derives id and key locally. Honest
//! parties converge on the same group; a forged invitation merely yields a group nobody else can
//! talk in.
//!
//! ## How messages travel
//!
//! A group message is sent as one independently keyed ciphertext per member, every copy padded to
//! the transport's maximum payload so length reveals nothing. No recipient, sender or group
//! identifier appears on the wire. Instead each copy carries a key fingerprint for routing and a
//! MAC bound to the recipient's pairwise DH secret; the receiver recovers the message key by a
//! bounded trial search over its pairwise secrets and the neighbouring key epochs
//! ([`crypt::get_crypt_key`]). Keys rotate every five minutes with the epoch, with no
//! renegotiation traffic.
//!
//! ## Integration
//!
//! The crate never touches the network or the disk itself. The host client provides a
//! [`traits::Transport`], an [`traits::AuthenticatedChannel`] and a [`traits::KeyValueStore`];
//! [`Manager`] wires them together and exposes group creation, invitation handling, sending and
//! receiving to the application. Mock implementations of all three live in [`test_utils`]
//! (enabled with the `test_utils` feature).
pub mod crypt;
pub mod crypto;
pub mod group;
pub mod manager;
pub mod message;
pub mod store;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
pub mod traits;

pub use crypt::{Fingerprint, Mac, MessageId};
pub use group::{Group, GroupId, GroupKey, Member, MemberId, Membership};
pub use manager::{Manager, RequestStatus, DEFAULT_SERVICE_TAG};
pub use store::MAX_GROUP_CHATS;
pub use traits::{MessageReceive, RoundId};
