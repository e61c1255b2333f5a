// SPDX-License-Identifier: MIT OR Apache-2.0

//! Group requests: the invitation payload and the receive side of the protocol.
//!
//! A request carries everything an invitee needs to derive the group id and key for itself: the
//! preimages, the full membership and the creation metadata. Nothing in it is taken at face
//! value. The invitee requires the sender of the authenticated message to be the claimed leader,
//! substitutes the leader's DH public value with the one from its own established relationship,
//! and re-derives id and key from the result. A forged membership or preimage simply yields a
//! group nobody else can talk in.
use thiserror::Error;
use tracing::{debug, warn};

use crate::crypt::now_nanos;
use crate::group::{
    put_u64, DhKeyList, Group, GroupId, GroupKey, IdPreimage, KeyPreimage, MemberId, Membership,
    MembershipError, Reader, PREIMAGE_SIZE,
};
use crate::manager::{Manager, WeakManager};
use crate::traits::{
    AuthenticatedChannel, ChannelError, KeyValueStore, RequestListener, Transport,
};

/// Wire form of a group invitation.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Request {
    pub name: Vec<u8>,

    pub id_preimage: IdPreimage,

    pub key_preimage: KeyPreimage,

    /// Canonical serialized membership, leader first.
    pub members: Vec<u8>,

    pub init_message: Vec<u8>,

    /// Group creation time in unix nanoseconds.
    pub created: i64,
}

impl Request {
    pub fn from_group(group: &Group) -> Self {
        Self {
            name: group.name.clone(),
            id_preimage: group.id_preimage,
            key_preimage: group.key_preimage,
            members: group.members.to_bytes(),
            init_message: group.init_message.clone(),
            created: group.created,
        }
    }

    /// Serializes the request for the authenticated channel.
    ///
    /// Layout (integers little-endian):
    /// `nameLen:8 ‖ name ‖ idPreimage:32 ‖ keyPreimage:32 ‖ membersLen:8 ‖ members ‖
    /// initMsgLen:8 ‖ initMsg ‖ createdUnixNano:8`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        put_u64(&mut bytes, self.name.len() as u64);
        bytes.extend_from_slice(&self.name);
        bytes.extend_from_slice(self.id_preimage.as_bytes());
        bytes.extend_from_slice(self.key_preimage.as_bytes());
        put_u64(&mut bytes, self.members.len() as u64);
        bytes.extend_from_slice(&self.members);
        put_u64(&mut bytes, self.init_message.len() as u64);
        bytes.extend_from_slice(&self.init_message);
        bytes.extend_from_slice(&self.created.to_le_bytes());

        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RequestError> {
        let mut reader = Reader::new(bytes);

        let name = reader
            .length_prefixed()
            .ok_or(RequestError::UnexpectedEnd)?
            .to_vec();
        let id_preimage = IdPreimage::from_bytes(
            reader
                .take_array::<PREIMAGE_SIZE>()
                .ok_or(RequestError::UnexpectedEnd)?,
        );
        let key_preimage = KeyPreimage::from_bytes(
            reader
                .take_array::<PREIMAGE_SIZE>()
                .ok_or(RequestError::UnexpectedEnd)?,
        );
        let members = reader
            .length_prefixed()
            .ok_or(RequestError::UnexpectedEnd)?
            .to_vec();
        let init_message = reader
            .length_prefixed()
            .ok_or(RequestError::UnexpectedEnd)?
            .to_vec();
        let created = reader.i64_le().ok_or(RequestError::UnexpectedEnd)?;

        if !reader.is_empty() {
            return Err(RequestError::TrailingBytes(reader.remaining().len()));
        }

        Ok(Self {
            name,
            id_preimage,
            key_preimage,
            members,
            init_message,
            created,
        })
    }
}

/// Listener handed to the authenticated channel: verifies incoming requests and surfaces new
/// groups to the application.
pub(crate) struct RequestHandler<T, C, K> {
    pub manager: WeakManager<T, C, K>,
}

impl<T, C, K> RequestListener for RequestHandler<T, C, K>
where
    T: Transport + 'static,
    C: AuthenticatedChannel + 'static,
    K: KeyValueStore + 'static,
{
    fn hear(&self, sender: MemberId, payload: Vec<u8>) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };

        match manager.read_request(&sender, &payload) {
            Ok(Some(group)) => manager.requests.request(group),
            Ok(None) => {
                debug!(sender = %sender, "ignoring request for an already joined group");
            }
            Err(err) => {
                warn!(sender = %sender, error = %err, "dropping invalid group request");
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
    /// Verifies a received group request and reconstructs the group it describes.
    ///
    /// Returns `Ok(None)` when the group is already joined. The returned group has NOT been
    /// stored; that is the application's decision via [`Manager::join_group`].
    pub(crate) fn read_request(
        &self,
        sender: &MemberId,
        payload: &[u8],
    ) -> Result<Option<Group>, RequestError> {
        let request = Request::from_bytes(payload)?;
        let mut members = Membership::from_bytes(&request.members)?;

        // Only the leader may extend the invitation.
        if &members.leader().id != sender {
            return Err(RequestError::SenderNotLeader {
                sender: *sender,
                leader: members.leader().id,
            });
        }
        if !members.contains(&self.user().id) {
            return Err(RequestError::NotInvited);
        }

        // Trust the DH public value of the established relationship over the one on the wire.
        let partner = self.channel.partner(sender)?;
        members.set_leader_dh_key(partner.dh_key);

        let group_id = GroupId::derive(&request.id_preimage, &members);
        if self.store.get(&group_id).is_some() {
            return Ok(None);
        }

        let group = Group::new(
            request.name,
            group_id,
            GroupKey::derive(&request.key_preimage, &members),
            request.id_preimage,
            request.key_preimage,
            request.init_message,
            if request.created == 0 {
                now_nanos()
            } else {
                request.created
            },
            members.clone(),
            DhKeyList::generate(&self.user().id, &self.user_dh_secret, &members),
        );

        Ok(Some(group))
    }
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("serialized group request ended mid-field")]
    UnexpectedEnd,

    #[error("serialized group request has {0} trailing bytes")]
    TrailingBytes(usize),

    #[error("request sender {sender} is not the group leader {leader}")]
    SenderNotLeader { sender: MemberId, leader: MemberId },

    #[error("local user is not part of the offered membership")]
    NotInvited,

    #[error(transparent)]
    Membership(#[from] MembershipError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}
