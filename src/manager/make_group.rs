// SPDX-License-Identifier: MIT OR Apache-2.0

//! Group creation and invitation fan-out.
use std::fmt;
use std::sync::{mpsc, Arc};
use std::thread;

use thiserror::Error;
use tracing::{info, warn};

use crate::crypt::now_nanos;
use crate::crypto::RngError;
use crate::group::{
    DhKeyList, Group, GroupId, GroupKey, IdPreimage, KeyPreimage, Member, MemberId, Membership,
    MembershipError,
};
use crate::manager::request::Request;
use crate::manager::Manager;
use crate::store::StoreError;
use crate::traits::{AuthenticatedChannel, ChannelError, KeyValueStore, RoundId, Transport};

/// Maximum allowable length of the initial message sent with a group request.
pub const MAX_INIT_MESSAGE_SIZE: usize = 256;

/// Outcome of the invitation fan-out on group creation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RequestStatus {
    /// An error occurred before any request was sent.
    ///
    /// [`Manager::make_group`] reports pre-send failures as [`MakeGroupError`] instead of
    /// returning; this variant exists for callers that map those errors back into a status, e.g.
    /// to show [`RequestStatus::message`] to the user.
    NotSent,

    /// Sending failed for every invited member.
    AllFail,

    /// Sending failed for some invited members.
    PartialSent,

    /// Every request was sent successfully.
    AllSent,
}

impl RequestStatus {
    /// A full description of the status.
    pub fn message(&self) -> &'static str {
        match self {
            RequestStatus::NotSent => "an error occurred before sending any group requests",
            RequestStatus::AllFail => "all group requests failed to send",
            RequestStatus::PartialSent => "some group requests failed to send",
            RequestStatus::AllSent => "all group requests successfully sent",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestStatus::NotSent => "NotSent",
            RequestStatus::AllFail => "AllFail",
            RequestStatus::PartialSent => "PartialSent",
            RequestStatus::AllSent => "AllSent",
        };
        write!(f, "{name}")
    }
}

impl<T, C, K> Manager<T, C, K>
where
    T: Transport + 'static,
    C: AuthenticatedChannel + 'static,
    K: KeyValueStore + 'static,
{
    /// Creates a new group with the local user as leader and invites `participants` over the
    /// authenticated channel.
    ///
    /// Every participant must be an established partner; their DH public values are taken from
    /// the existing relationships, never from caller input. Blocks until every request has been
    /// sent or failed. The group is joined locally whenever requests were attempted, even if all
    /// of them failed, so the leader can retry with [`Manager::resend_request`].
    pub fn make_group(
        self: &Arc<Self>,
        name: Vec<u8>,
        init_message: Vec<u8>,
        participants: &[MemberId],
    ) -> Result<(Group, Vec<RoundId>, RequestStatus), MakeGroupError> {
        if init_message.len() > MAX_INIT_MESSAGE_SIZE {
            return Err(MakeGroupError::InitMessageTooLarge {
                got: init_message.len(),
                max: MAX_INIT_MESSAGE_SIZE,
            });
        }

        let members = self.build_membership(participants)?;

        let id_preimage = IdPreimage::from_rng(&self.rng)?;
        let key_preimage = KeyPreimage::from_rng(&self.rng)?;
        let created = now_nanos();

        let group = Group::new(
            name,
            GroupId::derive(&id_preimage, &members),
            GroupKey::derive(&key_preimage, &members),
            id_preimage,
            key_preimage,
            init_message,
            created,
            members.clone(),
            DhKeyList::generate(&self.user().id, &self.user_dh_secret, &members),
        );

        let request = Request::from_group(&group).to_bytes();
        let (rounds, status) = self.send_requests(&group.members, &request);

        info!(group = %group, %status, "created group");

        // The group is joined regardless of fan-out failures.
        self.join_group(group.clone())?;

        Ok((group, rounds, status))
    }

    /// Resends the original group request to every invited member of an existing group.
    pub fn resend_request(
        &self,
        group_id: &GroupId,
    ) -> Result<(Vec<RoundId>, RequestStatus), MakeGroupError> {
        let group = self
            .store
            .get(group_id)
            .ok_or(MakeGroupError::GroupNotFound(*group_id))?;

        let request = Request::from_group(&group).to_bytes();
        let (rounds, status) = self.send_requests(&group.members, &request);

        info!(group = %group, %status, "resent group requests");

        Ok((rounds, status))
    }

    /// Assembles the membership from the leader (the local user) and the partner records of the
    /// invited participants.
    fn build_membership(&self, participants: &[MemberId]) -> Result<Membership, MakeGroupError> {
        let leader = *self.user();

        let mut members = Vec::with_capacity(participants.len());
        for id in participants {
            let partner = self.channel.partner(id)?;
            members.push(Member::new(partner.id, partner.dh_key));
        }

        Ok(Membership::new(leader, members)?)
    }

    /// Sends the serialized request to every non-leader member, one blocking send per thread.
    ///
    /// Returns the deduplicated, sorted list of rounds the requests went out in and the
    /// aggregated status.
    fn send_requests(
        &self,
        members: &Membership,
        request: &[u8],
    ) -> (Vec<RoundId>, RequestStatus) {
        let recipients: Vec<MemberId> = members.iter().skip(1).map(|member| member.id).collect();

        let (tx, rx) = mpsc::sync_channel(recipients.len());
        thread::scope(|scope| {
            for recipient in &recipients {
                let tx = tx.clone();
                scope.spawn(move || {
                    let result = self.channel.send_request(recipient, request);
                    let _ = tx.send((*recipient, result));
                });
            }
        });
        drop(tx);

        let mut rounds = Vec::new();
        let mut failed = 0usize;
        for (recipient, result) in rx {
            match result {
                Ok(round) => rounds.push(round),
                Err(err) => {
                    warn!(recipient = %recipient, error = %err, "group request failed to send");
                    failed += 1;
                }
            }
        }
        rounds.sort_unstable();
        rounds.dedup();

        let status = if failed == 0 {
            RequestStatus::AllSent
        } else if failed == recipients.len() {
            RequestStatus::AllFail
        } else {
            RequestStatus::PartialSent
        };

        (rounds, status)
    }
}

#[derive(Debug, Error)]
pub enum MakeGroupError {
    #[error("initial message length {got} exceeds the {max} byte maximum")]
    InitMessageTooLarge { got: usize, max: usize },

    #[error("group {0} not found")]
    GroupNotFound(GroupId),

    #[error(transparent)]
    Membership(#[from] MembershipError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Rng(#[from] RngError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MakeGroupError {
    /// The request status corresponding to this error: nothing was sent.
    pub fn status(&self) -> RequestStatus {
        RequestStatus::NotSent
    }
}

#[cfg(test)]
mod tests {
    use super::{MakeGroupError, RequestStatus, MAX_INIT_MESSAGE_SIZE};

    #[test]
    fn status_names_and_descriptions() {
        let statuses = [
            (RequestStatus::NotSent, "NotSent"),
            (RequestStatus::AllFail, "AllFail"),
            (RequestStatus::PartialSent, "PartialSent"),
            (RequestStatus::AllSent, "AllSent"),
        ];
        for (status, name) in statuses {
            assert_eq!(status.to_string(), name);
            assert!(!status.message().is_empty());
        }
    }

    #[test]
    fn errors_map_to_not_sent() {
        let err = MakeGroupError::InitMessageTooLarge {
            got: MAX_INIT_MESSAGE_SIZE + 1,
            max: MAX_INIT_MESSAGE_SIZE,
        };
        assert_eq!(err.status(), RequestStatus::NotSent);
    }
}
