// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock implementations of the host-client traits, driving the group layer without a network.
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::group::{Group, GroupId, MemberId};
use crate::traits::{
    AuthenticatedChannel, ChannelError, GroupMessageHandler, GroupRequestHandler, KeyValueStore,
    KvError, MessageReceive, Partner, RequestListener, RoundId, ServiceHandler, TargetedMessage,
    Transport, TransportEnvelope, TransportError,
};

/// In-memory [`KeyValueStore`]. Clones share the same backing map, standing in for one storage
/// backend opened by multiple components.
#[derive(Clone, Default)]
pub struct MemoryKv {
    data: Arc<Mutex<HashMap<(String, u64), Vec<u8>>>>,
}

impl KeyValueStore for MemoryKv {
    fn get(&self, key: &str, version: u64) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self
            .data
            .lock()
            .expect("kv mock lock poisoned")
            .get(&(key.to_owned(), version))
            .cloned())
    }

    fn set(&self, key: &str, version: u64, value: &[u8]) -> Result<(), KvError> {
        self.data
            .lock()
            .expect("kv mock lock poisoned")
            .insert((key.to_owned(), version), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str, version: u64) -> Result<(), KvError> {
        self.data
            .lock()
            .expect("kv mock lock poisoned")
            .remove(&(key.to_owned(), version))
            .map(|_| ())
            .ok_or(KvError::NotFound)
    }
}

/// Mock mixnet [`Transport`] recording sent batches and holding registered services so tests can
/// loop messages back through them.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    max_payload_size: usize,
    services: Mutex<HashMap<(GroupId, String), Arc<dyn ServiceHandler>>>,
    sent: Mutex<Vec<Vec<TargetedMessage>>>,
    next_round: AtomicU64,
    failing: AtomicBool,
}

impl MockTransport {
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                max_payload_size,
                services: Mutex::new(HashMap::new()),
                sent: Mutex::new(Vec::new()),
                next_round: AtomicU64::new(1),
                failing: AtomicBool::new(false),
            }),
        }
    }

    /// All batches passed to [`Transport::send_many`], in order.
    pub fn sent_batches(&self) -> Vec<Vec<TargetedMessage>> {
        self.inner
            .sent
            .lock()
            .expect("transport mock lock poisoned")
            .clone()
    }

    pub fn last_batch(&self) -> Option<Vec<TargetedMessage>> {
        self.inner
            .sent
            .lock()
            .expect("transport mock lock poisoned")
            .last()
            .cloned()
    }

    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    pub fn has_service(&self, group_id: &GroupId, tag: &str) -> bool {
        self.inner
            .services
            .lock()
            .expect("transport mock lock poisoned")
            .contains_key(&(*group_id, tag.to_owned()))
    }

    /// Feeds a sent message back into the service registered on THIS transport, as if the mixnet
    /// had delivered it. Returns whether a service was registered for it.
    pub fn deliver(
        &self,
        message: &TargetedMessage,
        round_id: RoundId,
        round_timestamp: i64,
    ) -> bool {
        let service = self
            .inner
            .services
            .lock()
            .expect("transport mock lock poisoned")
            .get(&(message.group_id, message.tag.clone()))
            .cloned();

        match service {
            Some(service) => {
                service.process(TransportEnvelope {
                    payload: message.payload.clone(),
                    fingerprint: message.fingerprint,
                    mac: message.mac,
                    round_id,
                    round_timestamp,
                });
                true
            }
            None => false,
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Transport for MockTransport {
    fn max_payload_size(&self) -> usize {
        self.inner.max_payload_size
    }

    fn send_many(&self, messages: &[TargetedMessage]) -> Result<RoundId, TransportError> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("injected failure".to_owned()));
        }
        self.inner
            .sent
            .lock()
            .expect("transport mock lock poisoned")
            .push(messages.to_vec());
        Ok(self.inner.next_round.fetch_add(1, Ordering::SeqCst))
    }

    fn add_service(&self, group_id: &GroupId, tag: &str, handler: Arc<dyn ServiceHandler>) {
        self.inner
            .services
            .lock()
            .expect("transport mock lock poisoned")
            .insert((*group_id, tag.to_owned()), handler);
    }

    fn delete_service(&self, group_id: &GroupId, tag: &str) {
        self.inner
            .services
            .lock()
            .expect("transport mock lock poisoned")
            .remove(&(*group_id, tag.to_owned()));
    }
}

/// Mock [`AuthenticatedChannel`] with a configurable partner set, per-recipient failure
/// injection and manual request delivery.
#[derive(Clone, Default)]
pub struct MockChannel {
    inner: Arc<ChannelInner>,
}

#[derive(Default)]
struct ChannelInner {
    partners: Mutex<HashMap<MemberId, Partner>>,
    listener: Mutex<Option<Arc<dyn RequestListener>>>,
    sent: Mutex<Vec<(MemberId, Vec<u8>)>>,
    failing: Mutex<HashSet<MemberId>>,
    next_round: AtomicU64,
}

impl MockChannel {
    pub fn add_partner(&self, partner: Partner) {
        self.inner
            .partners
            .lock()
            .expect("channel mock lock poisoned")
            .insert(partner.id, partner);
    }

    /// Makes every future [`AuthenticatedChannel::send_request`] towards `recipient` fail.
    pub fn fail_sends_to(&self, recipient: MemberId) {
        self.inner
            .failing
            .lock()
            .expect("channel mock lock poisoned")
            .insert(recipient);
    }

    /// All `(recipient, payload)` pairs passed to `send_request`, in order.
    pub fn sent_requests(&self) -> Vec<(MemberId, Vec<u8>)> {
        self.inner
            .sent
            .lock()
            .expect("channel mock lock poisoned")
            .clone()
    }

    /// Delivers a request payload to the registered listener, as if `sender` had sent it over
    /// the authenticated channel. Returns whether a listener was registered.
    pub fn deliver(&self, sender: MemberId, payload: Vec<u8>) -> bool {
        let listener = self
            .inner
            .listener
            .lock()
            .expect("channel mock lock poisoned")
            .clone();

        match listener {
            Some(listener) => {
                listener.hear(sender, payload);
                true
            }
            None => false,
        }
    }
}

impl AuthenticatedChannel for MockChannel {
    fn partner(&self, id: &MemberId) -> Result<Partner, ChannelError> {
        self.inner
            .partners
            .lock()
            .expect("channel mock lock poisoned")
            .get(id)
            .copied()
            .ok_or(ChannelError::PartnerNotFound(*id))
    }

    fn send_request(&self, recipient: &MemberId, payload: &[u8]) -> Result<RoundId, ChannelError> {
        if self
            .inner
            .failing
            .lock()
            .expect("channel mock lock poisoned")
            .contains(recipient)
        {
            return Err(ChannelError::SendFailed("injected failure".to_owned()));
        }

        self.inner
            .sent
            .lock()
            .expect("channel mock lock poisoned")
            .push((*recipient, payload.to_vec()));
        Ok(self.inner.next_round.fetch_add(1, Ordering::SeqCst))
    }

    fn register_listener(&self, listener: Arc<dyn RequestListener>) {
        *self
            .inner
            .listener
            .lock()
            .expect("channel mock lock poisoned") = Some(listener);
    }
}

/// [`GroupMessageHandler`] collecting every received message.
#[derive(Default)]
pub struct CollectingMessages {
    messages: Mutex<Vec<MessageReceive>>,
}

impl CollectingMessages {
    pub fn messages(&self) -> Vec<MessageReceive> {
        self.messages
            .lock()
            .expect("message collector lock poisoned")
            .clone()
    }
}

impl GroupMessageHandler for CollectingMessages {
    fn receive(&self, message: MessageReceive, _envelope: &TransportEnvelope) {
        self.messages
            .lock()
            .expect("message collector lock poisoned")
            .push(message);
    }
}

/// [`GroupRequestHandler`] collecting every verified incoming invitation.
#[derive(Default)]
pub struct CollectingRequests {
    groups: Mutex<Vec<Group>>,
}

impl CollectingRequests {
    pub fn groups(&self) -> Vec<Group> {
        self.groups
            .lock()
            .expect("request collector lock poisoned")
            .clone()
    }
}

impl GroupRequestHandler for CollectingRequests {
    fn request(&self, group: Group) {
        self.groups
            .lock()
            .expect("request collector lock poisoned")
            .push(group);
    }
}
