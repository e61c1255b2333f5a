// SPDX-License-Identifier: MIT OR Apache-2.0

//! Receiving and decrypting group messages.
use thiserror::Error;
use tracing::{trace, warn};

use crate::crypt::{check_key_fingerprint, decrypt, get_crypt_key, message_id, CryptError};
use crate::group::{GroupId, MemberId};
use crate::manager::{Manager, WeakManager};
use crate::message::{InternalMsg, MessageError, PublicMsg};
use crate::traits::{
    AuthenticatedChannel, KeyValueStore, MessageReceive, ServiceHandler, Transport,
    TransportEnvelope,
};

/// Transport service registered per (group, tag) pair: decrypts incoming messages and forwards
/// them to the handler owning the tag.
///
/// Decryption failures are logged and dropped. A mixnet delivers plenty of traffic that merely
/// looks like it could belong to a group, so failing here is normal operation, not an error the
/// application can act on.
pub(crate) struct DecryptHandler<T, C, K> {
    pub manager: WeakManager<T, C, K>,
    pub group_id: GroupId,
    pub tag: String,
}

impl<T, C, K> ServiceHandler for DecryptHandler<T, C, K>
where
    T: Transport + 'static,
    C: AuthenticatedChannel + 'static,
    K: KeyValueStore + 'static,
{
    fn process(&self, envelope: TransportEnvelope) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };

        match manager.decrypt_message(&self.group_id, &envelope) {
            Ok(message) => {
                trace!(
                    group = %self.group_id,
                    message = %message.message_id,
                    sender = %message.sender_id,
                    "received group message"
                );
                if let Some(handler) = manager.message_handler(&self.tag) {
                    handler.receive(message, &envelope);
                }
            }
            Err(err) => {
                warn!(
                    group = %self.group_id,
                    round = envelope.round_id,
                    error = %err,
                    "dropping undecryptable group message"
                );
            }
        }
    }
}

impl<T, C, K> Manager<T, C, K>
where
    T: Transport + 'static,
    C: AuthenticatedChannel + 'static,
    K: KeyValueStore + 'static,
{
    /// Decrypts one received wire frame for the given group.
    pub(crate) fn decrypt_message(
        &self,
        group_id: &GroupId,
        envelope: &TransportEnvelope,
    ) -> Result<MessageReceive, ReceiveError> {
        let group = self
            .store
            .get(group_id)
            .ok_or(ReceiveError::GroupNotFound(*group_id))?;

        let outer = PublicMsg::from_bytes(envelope.payload.clone())?;
        let salt = outer.salt();

        if !check_key_fingerprint(&envelope.fingerprint, &group.key, &salt, &self.user().id) {
            return Err(ReceiveError::FingerprintMismatch);
        }

        let key = get_crypt_key(
            &group.key,
            &salt,
            &envelope.mac,
            outer.payload(),
            &group.dh_keys,
            envelope.round_timestamp,
        )?;
        let plaintext = decrypt(&key, &envelope.fingerprint, outer.payload())?;

        let internal = InternalMsg::from_bytes(plaintext)?;
        let sender_id = internal.sender_id();
        if !group.members.contains(&sender_id) {
            return Err(ReceiveError::SenderNotMember(sender_id));
        }

        Ok(MessageReceive {
            group_id: group.id,
            message_id: message_id(&group.id, internal.as_bytes()),
            payload: internal.payload().to_vec(),
            sender_id,
            timestamp: internal.timestamp(),
            round_id: envelope.round_id,
        })
    }
}

#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("group {0} not found")]
    GroupNotFound(GroupId),

    #[error("key fingerprint does not match this group and user")]
    FingerprintMismatch,

    #[error("message claims sender {0} who is not a group member")]
    SenderNotMember(MemberId),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Crypt(#[from] CryptError),
}
