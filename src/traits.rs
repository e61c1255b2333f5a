// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interfaces to the surrounding client: transport, authenticated channels and key-value
//! persistence.
//!
//! The group layer never talks to the network or the disk directly. Everything it needs from the
//! host client is expressed through the traits in this module, so the whole crate can be driven by
//! mock implementations in tests.
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::crypt::{Fingerprint, Mac, MessageId};
use crate::crypto::x25519::PublicKey;
use crate::group::{Group, GroupId, MemberId};

/// Identifier of the network round a batch of messages was sent in.
pub type RoundId = u64;

/// Versioned key-value persistence, provided by the host client's storage layer.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str, version: u64) -> Result<Option<Vec<u8>>, KvError>;

    fn set(&self, key: &str, version: u64, value: &[u8]) -> Result<(), KvError>;

    fn delete(&self, key: &str, version: u64) -> Result<(), KvError>;
}

#[derive(Debug, Error)]
pub enum KvError {
    #[error("object not found in key-value store")]
    NotFound,

    #[error("key-value store backend failure: {0}")]
    Backend(String),
}

/// One recipient's copy of a group message, addressed for mixnet delivery.
#[derive(Clone, Debug)]
pub struct TargetedMessage {
    pub recipient: MemberId,

    /// The serialized outer wire frame.
    pub payload: Vec<u8>,

    pub fingerprint: Fingerprint,

    pub mac: Mac,

    /// Routing tag selecting the service registered for this group.
    pub group_id: GroupId,
    pub tag: String,
}

/// A message as it arrives from the transport, with round metadata attached.
#[derive(Clone, Debug)]
pub struct TransportEnvelope {
    pub payload: Vec<u8>,

    pub fingerprint: Fingerprint,

    pub mac: Mac,

    pub round_id: RoundId,

    /// Timestamp of the delivering round in unix nanoseconds. Zero when the transport could not
    /// supply one.
    pub round_timestamp: i64,
}

/// Receives messages delivered to one registered service tag.
pub trait ServiceHandler: Send + Sync {
    fn process(&self, envelope: TransportEnvelope);
}

/// The host client's mixnet transport.
pub trait Transport: Send + Sync {
    /// Maximum outer frame size the transport can carry in one message.
    fn max_payload_size(&self) -> usize;

    /// Sends all messages of one group message in a single round.
    fn send_many(&self, messages: &[TargetedMessage]) -> Result<RoundId, TransportError>;

    /// Registers a listener for messages carrying `tag` addressed to `group_id`.
    fn add_service(&self, group_id: &GroupId, tag: &str, handler: Arc<dyn ServiceHandler>);

    fn delete_service(&self, group_id: &GroupId, tag: &str);
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport rejected the message batch: {0}")]
    SendFailed(String),

    #[error("transport is not connected to the network")]
    NotConnected,
}

/// An authenticated contact of the local user.
#[derive(Clone, Copy, Debug)]
pub struct Partner {
    pub id: MemberId,

    /// DH public value from the established relationship.
    pub dh_key: PublicKey,
}

/// Receives raw group requests from authenticated partners.
pub trait RequestListener: Send + Sync {
    fn hear(&self, sender: MemberId, payload: Vec<u8>);
}

/// The host client's end-to-end authenticated messaging channel.
///
/// Group requests ride on pre-existing one-to-one relationships: only partners the local user has
/// already authenticated can be invited or send invitations.
pub trait AuthenticatedChannel: Send + Sync {
    /// Looks up an established relationship by partner id.
    fn partner(&self, id: &MemberId) -> Result<Partner, ChannelError>;

    /// Sends a group request to one partner over the authenticated channel.
    fn send_request(&self, recipient: &MemberId, payload: &[u8]) -> Result<RoundId, ChannelError>;

    /// Registers the listener receiving all incoming group requests.
    fn register_listener(&self, listener: Arc<dyn RequestListener>);
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("no authenticated relationship with partner {0}")]
    PartnerNotFound(MemberId),

    #[error("failed to send request: {0}")]
    SendFailed(String),
}

/// A decrypted group message handed to the application.
#[derive(Clone, PartialEq, Eq)]
pub struct MessageReceive {
    pub group_id: GroupId,

    pub message_id: MessageId,

    pub payload: Vec<u8>,

    pub sender_id: MemberId,

    /// Message timestamp claimed by the sender, unix nanoseconds.
    pub timestamp: i64,

    pub round_id: RoundId,
}

impl fmt::Debug for MessageReceive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageReceive")
            .field("group_id", &self.group_id)
            .field("message_id", &self.message_id)
            .field("payload_len", &self.payload.len())
            .field("sender_id", &self.sender_id)
            .field("timestamp", &self.timestamp)
            .field("round_id", &self.round_id)
            .finish()
    }
}

/// Application callback for decrypted group messages.
pub trait GroupMessageHandler: Send + Sync {
    fn receive(&self, message: MessageReceive, envelope: &TransportEnvelope);
}

/// Application callback for incoming group requests.
///
/// The group has already been verified against the sender's authenticated relationship but has
/// NOT been joined; the application decides whether to accept the invitation.
pub trait GroupRequestHandler: Send + Sync {
    fn request(&self, group: Group);
}
