// SPDX-License-Identifier: MIT OR Apache-2.0

//! The group chat manager: creation, invitation, membership lifecycle, sending and receiving.
//!
//! [`Manager`] ties the pieces together. It owns the [`GroupStore`], listens for incoming group
//! requests on the host's authenticated channel, registers a decryption service with the
//! transport for every joined group, and exposes the group operations to the application.
//!
//! The manager is shared behind an [`Arc`]: the listeners it hands to the transport and the
//! channel hold [`Weak`] references back to it, so dropping the last application handle tears the
//! whole thing down instead of leaking a reference cycle.
mod make_group;
mod receive;
mod request;
mod send;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, Weak};

use thiserror::Error;
use tracing::info;

use crate::crypto::x25519::SecretKey;
use crate::crypto::Rng;
use crate::group::{Group, GroupId, Member};
use crate::store::{GroupStore, StoreError};
use crate::traits::{
    AuthenticatedChannel, GroupMessageHandler, GroupRequestHandler, KeyValueStore, Transport,
};

pub use make_group::{MakeGroupError, RequestStatus, MAX_INIT_MESSAGE_SIZE};
pub use receive::ReceiveError;
pub use request::{Request, RequestError};
pub use send::SendError;

use receive::DecryptHandler;
use request::RequestHandler;

/// Service tag group messages are sent and received under by default.
pub const DEFAULT_SERVICE_TAG: &str = "group-chat";

/// Group chat manager.
pub struct Manager<T, C, K> {
    transport: T,
    channel: C,
    store: GroupStore<K>,
    user_dh_secret: SecretKey,
    requests: Arc<dyn GroupRequestHandler>,
    services: RwLock<BTreeMap<String, Arc<dyn GroupMessageHandler>>>,
    rng: Rng,
}

impl<T, C, K> Manager<T, C, K>
where
    T: Transport + 'static,
    C: AuthenticatedChannel + 'static,
    K: KeyValueStore + 'static,
{
    /// Creates the manager, loading previously joined groups from storage.
    ///
    /// `message_handler` receives decrypted group messages under the default service tag and
    /// `request_handler` receives verified incoming invitations. Nothing is wired to the network
    /// until [`Manager::start`] is called.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: T,
        channel: C,
        kv: K,
        user: Member,
        user_dh_secret: SecretKey,
        message_handler: Arc<dyn GroupMessageHandler>,
        request_handler: Arc<dyn GroupRequestHandler>,
        rng: Rng,
    ) -> Result<Arc<Self>, StoreError> {
        let store = GroupStore::new_or_load(kv, user)?;

        let mut services: BTreeMap<String, Arc<dyn GroupMessageHandler>> = BTreeMap::new();
        services.insert(DEFAULT_SERVICE_TAG.to_owned(), message_handler);

        Ok(Arc::new(Self {
            transport,
            channel,
            store,
            user_dh_secret,
            requests: request_handler,
            services: RwLock::new(services),
            rng,
        }))
    }

    /// Wires the manager to the network: registers the request listener on the authenticated
    /// channel and a decryption service for every group loaded from storage.
    pub fn start(self: &Arc<Self>) {
        self.channel.register_listener(Arc::new(RequestHandler {
            manager: Arc::downgrade(self),
        }));

        let group_ids = self.store.group_ids();
        for group_id in &group_ids {
            self.register_group_services(group_id);
        }

        info!(groups = group_ids.len(), "group chat manager started");
    }

    /// Stores the group and starts listening for its messages.
    pub fn join_group(self: &Arc<Self>, group: Group) -> Result<(), StoreError> {
        let group_id = group.id;
        info!(group = %group, "joining group");

        self.store.add(group)?;
        self.register_group_services(&group_id);

        Ok(())
    }

    /// Deletes the group from storage and stops listening for its messages.
    pub fn leave_group(&self, group_id: &GroupId) -> Result<(), StoreError> {
        for tag in self.service_tags() {
            self.transport.delete_service(group_id, &tag);
        }
        self.store.remove(group_id)?;

        info!(group = %group_id, "left group");

        Ok(())
    }

    /// Registers an additional message handler under its own service tag, for every currently
    /// joined group and every group joined later.
    pub fn add_service(
        self: &Arc<Self>,
        tag: &str,
        handler: Arc<dyn GroupMessageHandler>,
    ) -> Result<(), ManagerError> {
        {
            let mut services = self.services.write().expect("service map lock poisoned");
            if services.contains_key(tag) {
                return Err(ManagerError::ServiceExists(tag.to_owned()));
            }
            services.insert(tag.to_owned(), handler);
        }

        for group_id in self.store.group_ids() {
            self.transport.add_service(
                &group_id,
                tag,
                Arc::new(DecryptHandler {
                    manager: Arc::downgrade(self),
                    group_id,
                    tag: tag.to_owned(),
                }),
            );
        }

        Ok(())
    }

    /// Unregisters a message handler and its transport services.
    pub fn remove_service(&self, tag: &str) -> Result<(), ManagerError> {
        let removed = self
            .services
            .write()
            .expect("service map lock poisoned")
            .remove(tag);
        if removed.is_none() {
            return Err(ManagerError::ServiceNotFound(tag.to_owned()));
        }

        for group_id in self.store.group_ids() {
            self.transport.delete_service(&group_id, tag);
        }

        Ok(())
    }

    pub fn get_group(&self, group_id: &GroupId) -> Option<Group> {
        self.store.get(group_id)
    }

    pub fn groups(&self) -> Vec<Group> {
        self.store.groups()
    }

    pub fn group_ids(&self) -> Vec<GroupId> {
        self.store.group_ids()
    }

    pub fn num_groups(&self) -> usize {
        self.store.len()
    }

    /// The local user as a group member.
    pub fn user(&self) -> &Member {
        self.store.user()
    }

    fn register_group_services(self: &Arc<Self>, group_id: &GroupId) {
        for tag in self.service_tags() {
            self.transport.add_service(
                group_id,
                &tag,
                Arc::new(DecryptHandler {
                    manager: Arc::downgrade(self),
                    group_id: *group_id,
                    tag: tag.clone(),
                }),
            );
        }
    }

    fn service_tags(&self) -> Vec<String> {
        self.services
            .read()
            .expect("service map lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    fn message_handler(&self, tag: &str) -> Option<Arc<dyn GroupMessageHandler>> {
        self.services
            .read()
            .expect("service map lock poisoned")
            .get(tag)
            .cloned()
    }
}

/// Convenience alias so listener types can name the manager they point back to.
pub(crate) type WeakManager<T, C, K> = Weak<Manager<T, C, K>>;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("a service is already registered under tag {0:?}")]
    ServiceExists(String),

    #[error("no service registered under tag {0:?}")]
    ServiceNotFound(String),
}
