//! Per-connection contact arena

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;
use std::rc::Rc;
use tracing::{debug, warn};

use tp_core::Features;
use tp_readiness::PendingOperation;

use crate::contact::{self, AvatarData, Contact, FEATURE_AVATAR_DATA, FEATURE_AVATAR_TOKEN};
use crate::interfaces;
use crate::transport::Transport;

/// Contacts are keyed by their connection handle
pub type ContactId = u32;

pub(crate) struct ManagerInner {
    pub(crate) transport: Rc<dyn Transport>,
    pub(crate) connection_path: String,
    pub(crate) supported: Features,
    pub(crate) interfaces: BTreeSet<String>,
    contacts: RefCell<BTreeMap<ContactId, Contact>>,
}

/// Owns every [`Contact`] of one connection and resolves handles
#[derive(Clone)]
pub struct ContactManager {
    inner: Rc<ManagerInner>,
}

impl ContactManager {
    /// `supported_features` lists the contact features the connection can
    /// provide; `interfaces` are the connection's interfaces.
    pub fn new<I, N>(
        transport: Rc<dyn Transport>,
        connection_path: impl Into<String>,
        supported_features: Features,
        interfaces: I,
    ) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        Self {
            inner: Rc::new(ManagerInner {
                transport,
                connection_path: connection_path.into(),
                supported: supported_features,
                interfaces: interfaces.into_iter().map(Into::into).collect(),
                contacts: RefCell::new(BTreeMap::new()),
            }),
        }
    }

    pub fn connection_path(&self) -> &str {
        &self.inner.connection_path
    }

    pub fn supported_features(&self) -> &Features {
        &self.inner.supported
    }

    pub fn connection_interfaces(&self) -> &BTreeSet<String> {
        &self.inner.interfaces
    }

    pub fn has_interface(&self, interface: &str) -> bool {
        self.inner.interfaces.contains(interface)
    }

    pub fn transport(&self) -> Rc<dyn Transport> {
        Rc::clone(&self.inner.transport)
    }

    /// Snapshot of a known contact
    pub fn contact(&self, id: ContactId) -> Option<Contact> {
        self.inner.contacts.borrow().get(&id).cloned()
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.inner.contacts.borrow().values().cloned().collect()
    }

    /// Apply a live update to a known contact
    pub fn update_contact<R>(&self, id: ContactId, update: impl FnOnce(&mut Contact) -> R) -> Option<R> {
        self.inner.contacts.borrow_mut().get_mut(&id).map(update)
    }

    /// `Avatars.AvatarUpdated`
    pub fn handle_avatar_updated(&self, id: ContactId, token: &str) -> bool {
        self.update_contact(id, |c| c.receive_avatar_token(token)).is_some()
    }

    /// `Avatars.AvatarRetrieved`
    pub fn handle_avatar_retrieved(&self, id: ContactId, token: &str, mime_type: &str, data: Vec<u8>) -> bool {
        let avatar = AvatarData {
            token: token.to_string(),
            mime_type: mime_type.to_string(),
            data,
        };
        self.update_contact(id, |c| c.receive_avatar_data(avatar)).is_some()
    }

    /// Resolve `handles` into contacts carrying at least `features`.
    ///
    /// Finishes immediately when every handle is already known with those
    /// features; otherwise fetches the attributes remotely. Handles the
    /// connection does not know end up in
    /// [`PendingContacts::invalid_handles`].
    ///
    /// Avatar data is keyed by token, so asking for it asks for the token too.
    pub fn contacts_for_handles(&self, handles: &[u32], features: &Features) -> PendingContacts {
        let mut features = features.clone();
        if features.contains(&FEATURE_AVATAR_DATA) {
            features.insert(FEATURE_AVATAR_TOKEN);
        }
        let handles = handles.to_vec();
        let pending = PendingContacts::new(self.clone(), handles.clone());

        let cached = {
            let contacts = self.inner.contacts.borrow();
            handles.iter().all(|handle| {
                contacts
                    .get(handle)
                    .is_some_and(|c| features.is_subset(c.requested_features()))
            })
        };
        if cached {
            debug!(handles = ?handles, "Contacts already available");
            pending.result.borrow_mut().resolved = handles;
            let _ = pending.op.set_finished();
            return pending;
        }

        let list_interface = self
            .has_interface(interfaces::CONNECTION_CONTACT_LIST)
            .then_some(interfaces::CONNECTION_CONTACT_LIST);
        let contact_interfaces: Vec<String> = features
            .iter()
            .filter(|feature| self.inner.supported.contains(*feature))
            .filter_map(contact::interface_for)
            .chain(list_interface)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();

        let inner = Rc::clone(&self.inner);
        let op = pending.op.clone();
        let result = Rc::clone(&pending.result);

        tokio::task::spawn_local(async move {
            let reply = inner
                .transport
                .get_contact_attributes(&inner.connection_path, &handles, &contact_interfaces)
                .await;

            match reply {
                Ok(attributes) => {
                    let mut outcome = ContactsResult::default();
                    {
                        let mut contacts = inner.contacts.borrow_mut();
                        for handle in handles {
                            let Some(attrs) = attributes.get(&handle) else {
                                outcome.invalid.push(handle);
                                continue;
                            };
                            contacts
                                .entry(handle)
                                .or_insert_with(|| Contact::new(handle, Rc::downgrade(&inner)))
                                .augment(&features, attrs, &inner.supported);
                            outcome.resolved.push(handle);
                        }
                    }
                    debug!(
                        resolved = outcome.resolved.len(),
                        invalid = outcome.invalid.len(),
                        "Contacts resolved"
                    );
                    *result.borrow_mut() = outcome;
                    let _ = op.set_finished();
                }
                Err(err) => {
                    warn!(error = %err, "Fetching contact attributes failed");
                    let _ = op.set_finished_with_error(err);
                }
            }
        });

        pending
    }
}

#[derive(Debug, Default)]
struct ContactsResult {
    resolved: Vec<ContactId>,
    invalid: Vec<u32>,
}

/// Pending result of [`ContactManager::contacts_for_handles`]
#[derive(Clone)]
pub struct PendingContacts {
    op: PendingOperation,
    manager: ContactManager,
    handles: Vec<u32>,
    result: Rc<RefCell<ContactsResult>>,
}

impl PendingContacts {
    fn new(manager: ContactManager, handles: Vec<u32>) -> Self {
        Self {
            op: PendingOperation::new(),
            manager,
            handles,
            result: Rc::default(),
        }
    }

    /// Handles that were asked for
    pub fn handles(&self) -> &[u32] {
        &self.handles
    }

    pub fn contact_ids(&self) -> Vec<ContactId> {
        self.result.borrow().resolved.clone()
    }

    /// Snapshots of the resolved contacts, in request order
    pub fn contacts(&self) -> Vec<Contact> {
        self.result
            .borrow()
            .resolved
            .iter()
            .filter_map(|id| self.manager.contact(*id))
            .collect()
    }

    pub fn invalid_handles(&self) -> Vec<u32> {
        self.result.borrow().invalid.clone()
    }

    pub fn operation(&self) -> &PendingOperation {
        &self.op
    }
}

impl Deref for PendingContacts {
    type Target = PendingOperation;

    fn deref(&self) -> &PendingOperation {
        &self.op
    }
}

impl From<PendingContacts> for PendingOperation {
    fn from(pending: PendingContacts) -> Self {
        pending.op
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::{PresenceState, FEATURE_ALIAS, FEATURE_INFO, FEATURE_SIMPLE_PRESENCE};
    use crate::interfaces::{self, attribute};
    use crate::memory::MemoryTransport;
    use crate::transport::PropertyMap;
    use serde_json::json;
    use tokio::task::LocalSet;
    use tp_core::{features, ErrorKind, OperationError};

    fn alice() -> PropertyMap {
        [
            (attribute::CONTACT_ID, json!("alice@example.com")),
            (attribute::ALIAS, json!("Alice")),
            (attribute::PRESENCE, json!([2, "available", ""])),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    fn manager(transport: &Rc<MemoryTransport>, interfaces: &[&str]) -> ContactManager {
        ContactManager::new(
            transport.clone(),
            "/org/example/Connection",
            features(&[FEATURE_ALIAS, FEATURE_SIMPLE_PRESENCE, FEATURE_INFO]),
            interfaces.iter().copied(),
        )
    }

    #[tokio::test]
    async fn test_resolves_contacts_and_reports_invalid_handles() {
        LocalSet::new()
            .run_until(async {
                let transport = Rc::new(MemoryTransport::new());
                transport.add_contact(5, alice());
                let manager = manager(&transport, &[]);

                let pending = manager.contacts_for_handles(&[5, 9], &features(&[FEATURE_ALIAS]));
                assert!(!pending.is_finished());
                assert_eq!(pending.wait().await, Ok(()));

                assert_eq!(pending.contact_ids(), vec![5]);
                assert_eq!(pending.invalid_handles(), vec![9]);
                let alice = &pending.contacts()[0];
                assert_eq!(alice.id(), "alice@example.com");
                assert_eq!(alice.alias(), "Alice");
            })
            .await;
    }

    #[tokio::test]
    async fn test_known_contacts_finish_without_remote_call() {
        LocalSet::new()
            .run_until(async {
                let transport = Rc::new(MemoryTransport::new());
                transport.add_contact(5, alice());
                let manager = manager(&transport, &[]);

                let wanted = features(&[FEATURE_ALIAS]);
                manager.contacts_for_handles(&[5], &wanted).wait().await.unwrap();
                let again = manager.contacts_for_handles(&[5], &wanted);
                assert!(again.is_valid());
                assert_eq!(
                    transport.call_count(interfaces::CONNECTION_CONTACTS, "GetContactAttributes"),
                    1
                );

                // a new feature augments the existing contact
                manager
                    .contacts_for_handles(&[5], &features(&[FEATURE_SIMPLE_PRESENCE]))
                    .wait()
                    .await
                    .unwrap();
                let contact = manager.contact(5).unwrap();
                assert_eq!(contact.presence().status, "available");
                assert_eq!(contact.alias(), "Alice");
                assert_eq!(manager.contacts().len(), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn test_remote_failure_fails_request() {
        LocalSet::new()
            .run_until(async {
                let transport = Rc::new(MemoryTransport::new());
                transport.fail_contacts(OperationError::not_available("disconnected"));
                let manager = manager(&transport, &[]);

                let pending = manager.contacts_for_handles(&[5], &Features::new());
                let err = pending.wait().await.unwrap_err();
                assert_eq!(err.kind, ErrorKind::NotAvailable);
                assert!(pending.contacts().is_empty());
            })
            .await;
    }

    #[tokio::test]
    async fn test_refresh_info_checks_interface_then_calls() {
        LocalSet::new()
            .run_until(async {
                let transport = Rc::new(MemoryTransport::new());
                transport.add_contact(5, alice());

                let without = manager(&transport, &[]);
                without
                    .contacts_for_handles(&[5], &features(&[FEATURE_INFO]))
                    .wait()
                    .await
                    .unwrap();
                let op = without.contact(5).unwrap().refresh_info();
                assert_eq!(op.error_kind(), Some(ErrorKind::NotImplemented));

                let with = manager(&transport, &[interfaces::CONNECTION_CONTACT_INFO]);
                with.contacts_for_handles(&[5], &features(&[FEATURE_INFO]))
                    .wait()
                    .await
                    .unwrap();
                let contact = with.contact(5).unwrap();
                assert!(contact.actual_features().contains(&FEATURE_INFO));
                assert!(!contact.is_contact_info_known());

                contact.refresh_info().wait().await.unwrap();
                assert_eq!(
                    transport.call_count(interfaces::CONNECTION_CONTACT_INFO, "RefreshContactInfo"),
                    1
                );
            })
            .await;
    }

    #[tokio::test]
    async fn test_avatar_data_follows_token() {
        LocalSet::new()
            .run_until(async {
                let transport = Rc::new(MemoryTransport::new());
                let mut attrs = alice();
                attrs.insert(attribute::AVATAR_TOKEN.to_string(), json!("abc"));
                transport.add_contact(5, attrs);
                let manager = ContactManager::new(
                    transport.clone(),
                    "/org/example/Connection",
                    features(&[FEATURE_AVATAR_DATA, FEATURE_AVATAR_TOKEN]),
                    [interfaces::CONNECTION_AVATARS],
                );

                manager
                    .contacts_for_handles(&[5], &features(&[FEATURE_AVATAR_DATA]))
                    .wait()
                    .await
                    .unwrap();
                let contact = manager.contact(5).unwrap();
                assert!(contact.requested_features().contains(&FEATURE_AVATAR_TOKEN));
                assert_eq!(contact.avatar_token().as_deref(), Some("abc"));
                assert!(contact.avatar_data().is_empty());

                // the explicit request lands after the one the token triggered
                contact.request_avatar_data().wait().await.unwrap();
                let requests = || transport.call_count(interfaces::CONNECTION_AVATARS, "RequestAvatars");
                assert_eq!(requests(), 2);

                assert!(manager.handle_avatar_retrieved(5, "abc", "image/png", vec![0x89, 0x50]));
                let avatar = manager.contact(5).unwrap().avatar_data();
                assert_eq!(avatar.token, "abc");
                assert_eq!(avatar.data, vec![0x89, 0x50]);

                // same token, image already there
                manager.handle_avatar_updated(5, "abc");
                manager.handle_avatar_updated(5, "");
                assert!(manager.contact(5).unwrap().avatar_data().is_empty());
                tokio::task::yield_now().await;
                assert_eq!(requests(), 2);
            })
            .await;
    }

    #[tokio::test]
    async fn test_contact_list_states_are_fetched_when_available() {
        LocalSet::new()
            .run_until(async {
                let transport = Rc::new(MemoryTransport::new());
                let mut attrs = alice();
                attrs.insert(attribute::SUBSCRIBE.to_string(), json!(3));
                attrs.insert(attribute::PUBLISH.to_string(), json!(4));
                transport.add_contact(5, attrs);
                let manager = manager(&transport, &[interfaces::CONNECTION_CONTACT_LIST]);

                manager
                    .contacts_for_handles(&[5], &features(&[FEATURE_ALIAS]))
                    .wait()
                    .await
                    .unwrap();
                let contact = manager.contact(5).unwrap();
                assert_eq!(contact.subscription_state(), PresenceState::Ask);
                assert_eq!(contact.publish_state(), PresenceState::Yes);
            })
            .await;
    }

    #[tokio::test]
    async fn test_live_update_through_manager() {
        LocalSet::new()
            .run_until(async {
                let transport = Rc::new(MemoryTransport::new());
                transport.add_contact(5, alice());
                let manager = manager(&transport, &[]);
                manager
                    .contacts_for_handles(&[5], &features(&[FEATURE_ALIAS]))
                    .wait()
                    .await
                    .unwrap();

                manager.update_contact(5, |c| c.receive_alias("Alice L."));
                assert_eq!(manager.contact(5).unwrap().alias(), "Alice L.");
                assert!(manager.update_contact(6, |c| c.receive_alias("nobody")).is_none());
            })
            .await;
    }
}
