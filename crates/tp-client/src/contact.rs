//! Contacts and their optional features

use std::collections::BTreeSet;
use std::rc::Weak;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use tp_core::{Feature, Features, OperationError};
use tp_readiness::{PendingOperation, PendingVoid};

use crate::contact_manager::ManagerInner;
use crate::interfaces::{self, attribute};
use crate::transport::{MethodArgs, PropertyMap};

const NAMESPACE: &str = "Tp::Contact";

pub const FEATURE_ALIAS: Feature = Feature::new(NAMESPACE, 0);
pub const FEATURE_AVATAR_DATA: Feature = Feature::new(NAMESPACE, 1);
pub const FEATURE_AVATAR_TOKEN: Feature = Feature::new(NAMESPACE, 2);
pub const FEATURE_CAPABILITIES: Feature = Feature::new(NAMESPACE, 3);
pub const FEATURE_INFO: Feature = Feature::new(NAMESPACE, 4);
pub const FEATURE_LOCATION: Feature = Feature::new(NAMESPACE, 5);
pub const FEATURE_SIMPLE_PRESENCE: Feature = Feature::new(NAMESPACE, 6);
pub const FEATURE_ROSTER_GROUPS: Feature = Feature::new(NAMESPACE, 7);

/// Connection interface carrying the attributes of a contact feature
pub fn interface_for(feature: &Feature) -> Option<&'static str> {
    let iface = if *feature == FEATURE_ALIAS {
        interfaces::CONNECTION_ALIASING
    } else if *feature == FEATURE_AVATAR_DATA || *feature == FEATURE_AVATAR_TOKEN {
        interfaces::CONNECTION_AVATARS
    } else if *feature == FEATURE_CAPABILITIES {
        interfaces::CONNECTION_CONTACT_CAPABILITIES
    } else if *feature == FEATURE_INFO {
        interfaces::CONNECTION_CONTACT_INFO
    } else if *feature == FEATURE_LOCATION {
        interfaces::CONNECTION_LOCATION
    } else if *feature == FEATURE_SIMPLE_PRESENCE {
        interfaces::CONNECTION_SIMPLE_PRESENCE
    } else if *feature == FEATURE_ROSTER_GROUPS {
        interfaces::CONNECTION_CONTACT_GROUPS
    } else {
        return None;
    };
    Some(iface)
}

/// Simple presence as (type, status, message)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Presence {
    pub kind: u32,
    pub status: String,
    pub message: String,
}

impl Presence {
    pub const TYPE_UNKNOWN: u32 = 7;

    pub fn unknown() -> Self {
        Self {
            kind: Self::TYPE_UNKNOWN,
            status: "unknown".to_string(),
            message: String::new(),
        }
    }

    /// Parse the `(uss)` struct of the SimplePresence attribute
    pub fn from_json(value: &Value) -> Option<Self> {
        let fields = value.as_array()?;
        let kind = fields.first()?.as_u64()?;
        let status = fields.get(1)?.as_str()?;
        let message = fields.get(2).and_then(Value::as_str).unwrap_or_default();
        Some(Self {
            kind: u32::try_from(kind).ok()?,
            status: status.to_string(),
            message: message.to_string(),
        })
    }
}

impl Default for Presence {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Avatar image of a contact. The default value means "no avatar".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AvatarData {
    /// Token the image belongs to
    pub token: String,
    pub mime_type: String,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl AvatarData {
    pub fn is_empty(&self) -> bool {
        self.token.is_empty()
    }
}

/// `ContactList` subscription state as sent on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum SubscriptionState {
    #[default]
    Unknown,
    No,
    RemovedRemotely,
    Ask,
    Yes,
}

impl From<u32> for SubscriptionState {
    fn from(value: u32) -> Self {
        match value {
            1 => Self::No,
            2 => Self::RemovedRemotely,
            3 => Self::Ask,
            4 => Self::Yes,
            _ => Self::Unknown,
        }
    }
}

/// Presence subscription or publication as seen by applications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PresenceState {
    No,
    Ask,
    Yes,
}

impl From<SubscriptionState> for PresenceState {
    fn from(state: SubscriptionState) -> Self {
        match state {
            SubscriptionState::Ask => Self::Ask,
            SubscriptionState::Yes => Self::Yes,
            _ => Self::No,
        }
    }
}

/// A remote contact as known by its connection.
///
/// Values are snapshots handed out by the
/// [`ContactManager`](crate::ContactManager), which keeps the canonical copy.
#[derive(Debug, Clone)]
pub struct Contact {
    handle: u32,
    id: String,
    manager: Weak<ManagerInner>,
    requested: Features,
    actual: Features,
    alias: String,
    avatar_token: String,
    avatar_token_known: bool,
    avatar_data: AvatarData,
    capabilities: Vec<Value>,
    info: Vec<Value>,
    info_known: bool,
    location: PropertyMap,
    presence: Presence,
    groups: BTreeSet<String>,
    subscription_state: SubscriptionState,
    publish_state: SubscriptionState,
    publish_state_message: String,
}

impl Contact {
    pub(crate) fn new(handle: u32, manager: Weak<ManagerInner>) -> Self {
        Self {
            handle,
            id: String::new(),
            manager,
            requested: Features::new(),
            actual: Features::new(),
            alias: String::new(),
            avatar_token: String::new(),
            avatar_token_known: false,
            avatar_data: AvatarData::default(),
            capabilities: Vec::new(),
            info: Vec::new(),
            info_known: false,
            location: PropertyMap::new(),
            presence: Presence::unknown(),
            groups: BTreeSet::new(),
            subscription_state: SubscriptionState::Unknown,
            publish_state: SubscriptionState::Unknown,
            publish_state_message: String::new(),
        }
    }

    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Protocol identifier, e.g. `alice@example.com`
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn requested_features(&self) -> &Features {
        &self.requested
    }

    /// Features whose information is actually available
    pub fn actual_features(&self) -> &Features {
        &self.actual
    }

    fn requested_or_warn(&self, feature: Feature, accessor: &str) -> bool {
        if self.requested.contains(&feature) {
            return true;
        }
        warn!(
            contact = %self.id,
            feature = %feature,
            "Contact::{}() used without requesting the feature",
            accessor
        );
        false
    }

    pub fn alias(&self) -> String {
        if !self.requested_or_warn(FEATURE_ALIAS, "alias") {
            return String::new();
        }
        self.alias.clone()
    }

    /// The avatar token, `None` when it is not known
    pub fn avatar_token(&self) -> Option<String> {
        if !self.requested_or_warn(FEATURE_AVATAR_TOKEN, "avatar_token") {
            return None;
        }
        self.avatar_token_known.then(|| self.avatar_token.clone())
    }

    pub fn is_avatar_token_known(&self) -> bool {
        if !self.requested_or_warn(FEATURE_AVATAR_TOKEN, "is_avatar_token_known") {
            return false;
        }
        self.avatar_token_known
    }

    pub fn avatar_data(&self) -> AvatarData {
        if !self.requested_or_warn(FEATURE_AVATAR_DATA, "avatar_data") {
            return AvatarData::default();
        }
        self.avatar_data.clone()
    }

    /// Fetch the avatar image even if the token is not known, e.g. for
    /// offline contacts whose server does not send tokens. The image
    /// arrives through [`receive_avatar_data`](Self::receive_avatar_data).
    pub fn request_avatar_data(&self) -> PendingOperation {
        if !self.requested_or_warn(FEATURE_AVATAR_DATA, "request_avatar_data") {
            return PendingOperation::failed(OperationError::not_available(
                "FEATURE_AVATAR_DATA needs to be requested in order to fetch the avatar",
            ));
        }
        self.call_connection(interfaces::CONNECTION_AVATARS, "RequestAvatars")
    }

    pub fn presence(&self) -> Presence {
        if !self.requested_or_warn(FEATURE_SIMPLE_PRESENCE, "presence") {
            return Presence::unknown();
        }
        self.presence.clone()
    }

    /// Requestable channel classes as reported by the connection
    pub fn capabilities(&self) -> Vec<Value> {
        if !self.requested_or_warn(FEATURE_CAPABILITIES, "capabilities") {
            return Vec::new();
        }
        self.capabilities.clone()
    }

    pub fn info_fields(&self) -> Vec<Value> {
        if !self.requested_or_warn(FEATURE_INFO, "info_fields") {
            return Vec::new();
        }
        self.info.clone()
    }

    pub fn is_contact_info_known(&self) -> bool {
        if !self.requested_or_warn(FEATURE_INFO, "is_contact_info_known") {
            return false;
        }
        self.info_known
    }

    pub fn location(&self) -> PropertyMap {
        if !self.requested_or_warn(FEATURE_LOCATION, "location") {
            return PropertyMap::new();
        }
        self.location.clone()
    }

    pub fn groups(&self) -> BTreeSet<String> {
        if !self.requested_or_warn(FEATURE_ROSTER_GROUPS, "groups") {
            return BTreeSet::new();
        }
        self.groups.clone()
    }

    pub fn is_subscription_state_known(&self) -> bool {
        self.subscription_state != SubscriptionState::Unknown
    }

    pub fn is_subscription_rejected(&self) -> bool {
        self.subscription_state == SubscriptionState::RemovedRemotely
    }

    /// Whether we receive this contact's presence
    pub fn subscription_state(&self) -> PresenceState {
        self.subscription_state.into()
    }

    pub fn is_publish_state_known(&self) -> bool {
        self.publish_state != SubscriptionState::Unknown
    }

    pub fn is_publish_cancelled(&self) -> bool {
        self.publish_state == SubscriptionState::RemovedRemotely
    }

    /// Whether this contact receives our presence
    pub fn publish_state(&self) -> PresenceState {
        self.publish_state.into()
    }

    /// Message attached to the contact's publication request
    pub fn publish_state_message(&self) -> &str {
        &self.publish_state_message
    }

    /// Merge freshly fetched attributes for the `requested` features.
    ///
    /// `supported` is the set of features the connection can provide;
    /// it decides whether a feature without attributes still counts as
    /// available.
    pub fn augment(&mut self, requested: &Features, attributes: &PropertyMap, supported: &Features) {
        self.requested.extend(requested.iter().copied());

        if let Some(id) = attributes.get(attribute::CONTACT_ID).and_then(Value::as_str) {
            self.id = id.to_string();
        }

        if let Some(state) = attributes.get(attribute::SUBSCRIBE).and_then(Value::as_u64) {
            self.set_subscription_state(state_from_wire(state));
        }
        if let Some(state) = attributes.get(attribute::PUBLISH).and_then(Value::as_u64) {
            let message = attributes
                .get(attribute::PUBLISH_REQUEST)
                .and_then(Value::as_str)
                .unwrap_or_default();
            self.set_publish_state(state_from_wire(state), message);
        }

        for feature in requested {
            if *feature == FEATURE_ALIAS {
                self.augment_alias(attributes);
            } else if *feature == FEATURE_AVATAR_DATA {
                if supported.contains(&FEATURE_AVATAR_DATA) {
                    self.actual.insert(FEATURE_AVATAR_DATA);
                    self.update_avatar_data();
                }
            } else if *feature == FEATURE_AVATAR_TOKEN {
                self.augment_avatar_token(attributes, supported);
            } else if *feature == FEATURE_CAPABILITIES {
                match attributes.get(attribute::CAPABILITIES).and_then(Value::as_array) {
                    Some(caps) if !caps.is_empty() => self.receive_capabilities(caps.clone()),
                    _ => self.mark_supported(FEATURE_CAPABILITIES, supported),
                }
            } else if *feature == FEATURE_INFO {
                match attributes.get(attribute::INFO).and_then(Value::as_array) {
                    Some(info) if !info.is_empty() => self.receive_info(info.clone()),
                    _ => self.mark_supported(FEATURE_INFO, supported),
                }
            } else if *feature == FEATURE_LOCATION {
                match attributes.get(attribute::LOCATION).and_then(Value::as_object) {
                    Some(location) if !location.is_empty() => self.receive_location(location.clone()),
                    _ => self.mark_supported(FEATURE_LOCATION, supported),
                }
            } else if *feature == FEATURE_SIMPLE_PRESENCE {
                match attributes.get(attribute::PRESENCE).and_then(Presence::from_json) {
                    Some(presence) if !presence.status.is_empty() => self.receive_presence(presence),
                    _ => self.presence = Presence::unknown(),
                }
            } else if *feature == FEATURE_ROSTER_GROUPS {
                self.groups = attributes
                    .get(attribute::GROUPS)
                    .and_then(Value::as_array)
                    .map(|groups| {
                        groups
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
            } else {
                warn!(contact = %self.id, feature = %feature, "Unknown feature while augmenting contact");
            }
        }
    }

    /// Supported but not sent: the feature works, there is just no data yet
    fn mark_supported(&mut self, feature: Feature, supported: &Features) {
        if supported.contains(&feature) {
            self.actual.insert(feature);
        }
    }

    fn augment_alias(&mut self, attributes: &PropertyMap) {
        let alias = attributes
            .get(attribute::ALIAS)
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !alias.is_empty() {
            self.receive_alias(alias);
        } else if self.alias.is_empty() {
            self.alias = self.id.clone();
        }
    }

    fn augment_avatar_token(&mut self, attributes: &PropertyMap, supported: &Features) {
        match attributes.get(attribute::AVATAR_TOKEN) {
            Some(token) => self.receive_avatar_token(token.as_str().unwrap_or_default()),
            None => {
                // Supported but absent: the token is unknown, the feature works
                if supported.contains(&FEATURE_AVATAR_TOKEN) {
                    self.actual.insert(FEATURE_AVATAR_TOKEN);
                }
                self.avatar_token_known = false;
                self.avatar_token.clear();
            }
        }
    }

    pub fn receive_alias(&mut self, alias: &str) {
        if !self.requested.contains(&FEATURE_ALIAS) {
            return;
        }
        self.actual.insert(FEATURE_ALIAS);
        if self.alias != alias {
            debug!(contact = %self.id, alias, "Alias changed");
            self.alias = alias.to_string();
        }
    }

    /// An empty token means the contact has no avatar; it is still known.
    ///
    /// With [`FEATURE_AVATAR_DATA`] available, a new non-empty token fetches
    /// the matching image, so this must run inside a `LocalSet`.
    pub fn receive_avatar_token(&mut self, token: &str) {
        if self.requested.contains(&FEATURE_AVATAR_TOKEN) {
            self.actual.insert(FEATURE_AVATAR_TOKEN);
            if !self.avatar_token_known || self.avatar_token != token {
                self.avatar_token_known = true;
                self.avatar_token = token.to_string();
            }
        }

        if self.actual.contains(&FEATURE_AVATAR_DATA) {
            self.update_avatar_data();
        }
    }

    pub fn receive_avatar_data(&mut self, avatar: AvatarData) {
        if !self.requested.contains(&FEATURE_AVATAR_DATA) {
            return;
        }
        if self.avatar_data != avatar {
            debug!(contact = %self.id, token = %avatar.token, "Avatar data changed");
            self.avatar_data = avatar;
        }
    }

    /// Bring the avatar image in line with the current token
    fn update_avatar_data(&mut self) {
        // Unknown token: only an explicit request_avatar_data() helps
        if !self.avatar_token_known {
            return;
        }

        if self.avatar_token.is_empty() {
            debug!(contact = %self.id, "Contact has no avatar");
            self.avatar_data = AvatarData::default();
            return;
        }

        if self.avatar_data.token == self.avatar_token {
            return;
        }

        let op = self.call_connection(interfaces::CONNECTION_AVATARS, "RequestAvatars");
        let contact = self.id.clone();
        op.on_finished(move |op| {
            if let Some(err) = op.error() {
                warn!(contact = %contact, error = %err, "Requesting avatar failed");
            }
        });
    }

    pub fn set_subscription_state(&mut self, state: SubscriptionState) {
        if self.subscription_state != state {
            debug!(contact = %self.id, state = ?state, "Subscription state changed");
            self.subscription_state = state;
        }
    }

    pub fn set_publish_state(&mut self, state: SubscriptionState, message: &str) {
        if self.publish_state != state || self.publish_state_message != message {
            debug!(contact = %self.id, state = ?state, "Publish state changed");
            self.publish_state = state;
            self.publish_state_message = message.to_string();
        }
    }

    pub fn receive_presence(&mut self, presence: Presence) {
        if !self.requested.contains(&FEATURE_SIMPLE_PRESENCE) {
            return;
        }
        self.actual.insert(FEATURE_SIMPLE_PRESENCE);
        self.presence = presence;
    }

    pub fn receive_capabilities(&mut self, capabilities: Vec<Value>) {
        if !self.requested.contains(&FEATURE_CAPABILITIES) {
            return;
        }
        self.actual.insert(FEATURE_CAPABILITIES);
        self.capabilities = capabilities;
    }

    pub fn receive_info(&mut self, info: Vec<Value>) {
        if !self.requested.contains(&FEATURE_INFO) {
            return;
        }
        self.actual.insert(FEATURE_INFO);
        self.info_known = true;
        self.info = info;
    }

    pub fn receive_location(&mut self, location: PropertyMap) {
        if !self.requested.contains(&FEATURE_LOCATION) {
            return;
        }
        self.actual.insert(FEATURE_LOCATION);
        self.location = location;
    }

    /// Ask the connection to re-fetch this contact's info.
    ///
    /// Requires [`FEATURE_INFO`] and the ContactInfo connection interface.
    pub fn refresh_info(&self) -> PendingOperation {
        if !self.requested.contains(&FEATURE_INFO) {
            warn!(contact = %self.id, "Contact::refresh_info() used without requesting FEATURE_INFO");
            return PendingOperation::failed(OperationError::not_available(
                "FEATURE_INFO needs to be requested in order to refresh contact info",
            ));
        }

        self.call_connection(interfaces::CONNECTION_CONTACT_INFO, "RefreshContactInfo")
    }

    /// `interface.method([handle])` on the owning connection
    fn call_connection(&self, interface: &'static str, method: &'static str) -> PendingOperation {
        let Some(manager) = self.manager.upgrade() else {
            return PendingOperation::failed(OperationError::not_available(
                "the contact's connection is gone",
            ));
        };

        if !manager.interfaces.contains(interface) {
            return PendingOperation::failed(OperationError::not_implemented(format!(
                "connection does not support {}",
                interface
            )));
        }

        let transport = manager.transport.clone();
        let path = manager.connection_path.clone();
        let handle = self.handle;
        PendingVoid::new(async move {
            transport
                .call_void(&path, interface, method, MethodArgs::Handles(vec![handle]))
                .await
        })
        .into()
    }
}

fn state_from_wire(state: u64) -> SubscriptionState {
    u32::try_from(state).map_or(SubscriptionState::Unknown, SubscriptionState::from)
}
