// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sending a message to a group.
use thiserror::Error;
use tracing::{debug, info};

use crate::crypt::{
    compute_epoch, derive_crypt_key, encrypt, key_fingerprint, message_id, message_mac,
    now_nanos, CryptError, MessageId, AEAD_TAG_SIZE,
};
use crate::crypto::RngError;
use crate::group::{GroupId, MemberId};
use crate::manager::{Manager, DEFAULT_SERVICE_TAG};
use crate::message::{InternalMsg, MessageError, PublicMsg, Salt};
use crate::traits::{
    AuthenticatedChannel, KeyValueStore, RoundId, TargetedMessage, Transport, TransportError,
};

impl<T, C, K> Manager<T, C, K>
where
    T: Transport + 'static,
    C: AuthenticatedChannel + 'static,
    K: KeyValueStore + 'static,
{
    /// Sends `payload` to the group under the default service tag.
    ///
    /// See [`Manager::send_with_tag`].
    pub fn send(
        &self,
        group_id: &GroupId,
        payload: &[u8],
    ) -> Result<(RoundId, i64, MessageId), SendError> {
        self.send_with_tag(group_id, DEFAULT_SERVICE_TAG, payload)
    }

    /// Encrypts `payload` once per member and sends the whole batch in a single round, routed to
    /// the receivers' service registered under `tag`.
    ///
    /// The tag must name a service registered with this manager (the default one, or one added
    /// with [`Manager::add_service`]), so a sender cannot address a tag it could not itself
    /// receive on.
    ///
    /// Each copy is individually keyed: fresh salt, its own fingerprint and a MAC bound to that
    /// member's pairwise DH secret. All copies fill the transport's maximum payload size exactly,
    /// so message length reveals nothing about the plaintext.
    ///
    /// Returns the round the batch was sent in, the timestamp embedded in the message and the
    /// message id the receivers will compute.
    pub fn send_with_tag(
        &self,
        group_id: &GroupId,
        tag: &str,
        payload: &[u8],
    ) -> Result<(RoundId, i64, MessageId), SendError> {
        if self.message_handler(tag).is_none() {
            return Err(SendError::UnknownTag(tag.to_owned()));
        }

        let group = self
            .store
            .get(group_id)
            .ok_or(SendError::GroupNotFound(*group_id))?;

        let max_size = self.transport.max_payload_size();
        let outer_template = PublicMsg::new(max_size)?;
        // Inner frame budget: the outer payload region minus the AEAD tag.
        let inner_size = outer_template
            .payload_size()
            .checked_sub(AEAD_TAG_SIZE)
            .ok_or(MessageError::TooSmall {
                got: max_size,
                min: AEAD_TAG_SIZE + 1,
            })?;

        let timestamp = now_nanos();
        let epoch = compute_epoch(timestamp);

        let mut internal = InternalMsg::new(inner_size)?;
        internal.set_timestamp(timestamp);
        internal.set_sender_id(&self.user().id);
        internal.set_payload(payload)?;
        let plaintext = internal.as_bytes();

        let id = message_id(&group.id, plaintext);

        let mut messages = Vec::with_capacity(group.members.len() - 1);
        for member in group.members.iter() {
            if member.id == self.user().id {
                continue;
            }

            let dh_secret = group
                .dh_keys
                .get(&member.id)
                .ok_or(SendError::MissingDhKey(member.id))?;

            let salt: Salt = self.rng.random_array()?;
            let fingerprint = key_fingerprint(&group.key, &salt, &member.id);
            let key = derive_crypt_key(&group.key, epoch, &salt);
            let ciphertext = encrypt(&key, &fingerprint, plaintext)?;
            let mac = message_mac(&key, &ciphertext, dh_secret);

            let mut outer = outer_template.clone();
            outer.set_salt(&salt);
            outer.set_payload(&ciphertext)?;

            messages.push(TargetedMessage {
                recipient: member.id,
                payload: outer.to_bytes(),
                fingerprint,
                mac,
                group_id: group.id,
                tag: tag.to_owned(),
            });
        }

        debug!(
            group = %group.id,
            tag,
            recipients = messages.len(),
            payload_len = payload.len(),
            "sending group message"
        );

        let round_id = self.transport.send_many(&messages)?;

        info!(group = %group.id, round = round_id, message = %id, "sent group message");

        Ok((round_id, timestamp, id))
    }
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("group {0} not found")]
    GroupNotFound(GroupId),

    #[error("no service registered under tag {0:?}")]
    UnknownTag(String),

    #[error("no pairwise DH secret stored for member {0}")]
    MissingDhKey(MemberId),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Crypt(#[from] CryptError),

    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
