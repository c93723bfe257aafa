//! Media streams of a media channel

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use tp_core::{Feature, Features, OperationError, Status};
use tp_readiness::{
    Introspectable, Introspectables, PendingOperation, PendingVoid, ReadinessHelper, ReadyObject,
    WeakReadinessHelper,
};

use crate::contact::Contact;
use crate::contact_manager::{ContactId, ContactManager};
use crate::interfaces;
use crate::transport::{MethodArgs, PropertyMap, StreamInfo};

pub const FEATURE_CORE: Feature = Feature::core("Tp::MediaStream", 0);

/// Status of a live media object; closing invalidates it
pub(crate) const OPEN: Status = Status(0);

pub const DIRECTION_SEND: u32 = 1;
pub const DIRECTION_RECEIVE: u32 = 2;
pub const PENDING_LOCAL_SEND: u32 = 1;
pub const PENDING_REMOTE_SEND: u32 = 2;

const CALL_SENDING: u32 = 1;
const CALL_PENDING_SEND: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SendingState {
    None,
    PendingSend,
    Sending,
}

/// Remote representation behind a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamBackend {
    StreamedMedia {
        id: u32,
        contact_handle: u32,
        kind: u32,
        state: u32,
        direction: u32,
        pending_send: u32,
    },
    Call {
        path: String,
        /// Sending state per sender handle
        senders: BTreeMap<u32, u32>,
    },
}

impl From<&StreamInfo> for StreamBackend {
    fn from(info: &StreamInfo) -> Self {
        StreamBackend::StreamedMedia {
            id: info.id,
            contact_handle: info.contact,
            kind: info.kind,
            state: info.state,
            direction: info.direction,
            pending_send: info.pending_send,
        }
    }
}

/// Serializable view of a stream
#[derive(Debug, Clone, Serialize)]
pub struct StreamSummary {
    pub id: Option<u32>,
    pub call_path: Option<String>,
    pub kind: Option<u32>,
    pub state: u32,
    pub direction: u32,
    pub pending_send: u32,
    pub members: Vec<String>,
}

struct StreamInner {
    readiness: ReadinessHelper,
    channel_path: String,
    contacts: ContactManager,
    backend: RefCell<StreamBackend>,
    members: RefCell<Vec<ContactId>>,
}

/// One media stream, made ready through [`FEATURE_CORE`]
#[derive(Clone)]
pub struct MediaStream {
    inner: Rc<StreamInner>,
}

impl MediaStream {
    pub(crate) fn streamed_media(channel_path: &str, contacts: &ContactManager, info: &StreamInfo) -> Self {
        let object = format!("{}#stream{}", channel_path, info.id);
        Self::with_backend(object, channel_path, contacts, StreamBackend::from(info))
    }

    pub(crate) fn call(channel_path: &str, contacts: &ContactManager, stream_path: &str) -> Self {
        let backend = StreamBackend::Call {
            path: stream_path.to_string(),
            senders: BTreeMap::new(),
        };
        Self::with_backend(stream_path.to_string(), channel_path, contacts, backend)
    }

    fn with_backend(
        object: String,
        channel_path: &str,
        contacts: &ContactManager,
        backend: StreamBackend,
    ) -> Self {
        let inner = Rc::new(StreamInner {
            readiness: ReadinessHelper::new(object, OPEN),
            channel_path: channel_path.to_string(),
            contacts: contacts.clone(),
            backend: RefCell::new(backend),
            members: RefCell::new(Vec::new()),
        });

        let weak = Rc::downgrade(&inner);
        let mut table = Introspectables::new();
        table.insert(
            FEATURE_CORE,
            Introspectable::new([OPEN], Features::new(), Vec::<String>::new(), move |helper| {
                if let Some(inner) = weak.upgrade() {
                    introspect_core(&inner, helper);
                }
            }),
        );
        if let Err(err) = inner.readiness.add_introspectables(table) {
            warn!(error = %err, "Registering stream introspectables failed");
        }

        Self { inner }
    }

    /// StreamedMedia stream id
    pub fn id(&self) -> Option<u32> {
        match &*self.inner.backend.borrow() {
            StreamBackend::StreamedMedia { id, .. } => Some(*id),
            StreamBackend::Call { .. } => None,
        }
    }

    /// Object path of a Call stream
    pub fn call_object_path(&self) -> Option<String> {
        match &*self.inner.backend.borrow() {
            StreamBackend::Call { path, .. } => Some(path.clone()),
            StreamBackend::StreamedMedia { .. } => None,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(&*self.inner.backend.borrow(), StreamBackend::Call { .. })
    }

    pub fn backend(&self) -> StreamBackend {
        self.inner.backend.borrow().clone()
    }

    pub fn channel_path(&self) -> &str {
        &self.inner.channel_path
    }

    /// Audio (0) or video (1), known for StreamedMedia streams
    pub fn kind(&self) -> Option<u32> {
        match &*self.inner.backend.borrow() {
            StreamBackend::StreamedMedia { kind, .. } => Some(*kind),
            StreamBackend::Call { .. } => None,
        }
    }

    pub fn state(&self) -> u32 {
        match &*self.inner.backend.borrow() {
            StreamBackend::StreamedMedia { state, .. } => *state,
            StreamBackend::Call { .. } => 0,
        }
    }

    pub fn direction(&self) -> u32 {
        match &*self.inner.backend.borrow() {
            StreamBackend::StreamedMedia { direction, .. } => *direction,
            StreamBackend::Call { .. } => 0,
        }
    }

    pub fn pending_send(&self) -> u32 {
        match &*self.inner.backend.borrow() {
            StreamBackend::StreamedMedia { pending_send, .. } => *pending_send,
            StreamBackend::Call { .. } => 0,
        }
    }

    /// Remote contacts taking part in the stream
    pub fn members(&self) -> Vec<Contact> {
        if !self.is_ready(&Features::new()) {
            warn!(stream = %self.inner.readiness.object(), "MediaStream::members() used before FEATURE_CORE is ready");
        }
        self.inner
            .members
            .borrow()
            .iter()
            .filter_map(|id| self.inner.contacts.contact(*id))
            .collect()
    }

    /// The remote contact of a StreamedMedia stream
    pub fn contact(&self) -> Option<Contact> {
        self.members().into_iter().next()
    }

    pub fn local_sending_state(&self) -> SendingState {
        match &*self.inner.backend.borrow() {
            StreamBackend::StreamedMedia {
                direction,
                pending_send,
                ..
            } => {
                if pending_send & PENDING_LOCAL_SEND != 0 {
                    SendingState::PendingSend
                } else if direction & DIRECTION_SEND != 0 {
                    SendingState::Sending
                } else {
                    SendingState::None
                }
            }
            StreamBackend::Call { .. } => SendingState::None,
        }
    }

    pub fn remote_sending_state(&self) -> SendingState {
        match &*self.inner.backend.borrow() {
            StreamBackend::StreamedMedia {
                direction,
                pending_send,
                ..
            } => {
                if pending_send & PENDING_REMOTE_SEND != 0 {
                    SendingState::PendingSend
                } else if direction & DIRECTION_RECEIVE != 0 {
                    SendingState::Sending
                } else {
                    SendingState::None
                }
            }
            StreamBackend::Call { senders, .. } => {
                if senders.values().any(|s| *s == CALL_SENDING) {
                    SendingState::Sending
                } else if senders.values().any(|s| *s == CALL_PENDING_SEND) {
                    SendingState::PendingSend
                } else {
                    SendingState::None
                }
            }
        }
    }

    /// Ask the remote side to change which way media flows
    pub fn request_direction(&self, send: bool, receive: bool) -> PendingOperation {
        let mut direction = 0;
        if send {
            direction |= DIRECTION_SEND;
        }
        if receive {
            direction |= DIRECTION_RECEIVE;
        }
        self.request_stream_direction(direction)
    }

    /// Raw `RequestStreamDirection` with a direction bitmask
    pub fn request_stream_direction(&self, direction: u32) -> PendingOperation {
        let id = match &*self.inner.backend.borrow() {
            StreamBackend::StreamedMedia { id, .. } => *id,
            StreamBackend::Call { .. } => {
                return PendingOperation::failed(OperationError::not_implemented(
                    "Call streams do not support requesting a direction",
                ));
            }
        };

        let dispatch = if direction > (DIRECTION_SEND | DIRECTION_RECEIVE) {
            Err(OperationError::invalid_argument(format!(
                "invalid stream direction {}",
                direction
            )))
        } else {
            let transport = self.inner.contacts.transport();
            let channel_path = self.inner.channel_path.clone();
            Ok(async move {
                transport
                    .call_void(
                        &channel_path,
                        interfaces::CHANNEL_TYPE_STREAMED_MEDIA,
                        "RequestStreamDirection",
                        MethodArgs::Pair(id, direction),
                    )
                    .await
            })
        };

        PendingVoid::dispatch(dispatch).into()
    }

    /// `StreamDirectionChanged`
    pub fn handle_direction_changed(&self, new_direction: u32, new_pending_send: u32) {
        if let StreamBackend::StreamedMedia {
            direction,
            pending_send,
            ..
        } = &mut *self.inner.backend.borrow_mut()
        {
            debug!(direction = new_direction, pending_send = new_pending_send, "Stream direction changed");
            *direction = new_direction;
            *pending_send = new_pending_send;
        }
    }

    /// `StreamStateChanged`
    pub fn handle_state_changed(&self, new_state: u32) {
        if let StreamBackend::StreamedMedia { state, .. } = &mut *self.inner.backend.borrow_mut() {
            *state = new_state;
        }
    }

    /// `SendersChanged` of a Call stream
    pub fn handle_senders_changed(&self, updates: &BTreeMap<u32, u32>, removed: &[u32]) {
        if let StreamBackend::Call { senders, .. } = &mut *self.inner.backend.borrow_mut() {
            senders.extend(updates.iter().map(|(h, s)| (*h, *s)));
            for handle in removed {
                senders.remove(handle);
            }
        }
        self.inner
            .members
            .borrow_mut()
            .retain(|id| !removed.contains(id));
    }

    pub(crate) fn invalidate(&self, error: OperationError) {
        self.inner.readiness.invalidate(error);
    }

    pub fn summary(&self) -> StreamSummary {
        let members = self
            .inner
            .members
            .borrow()
            .iter()
            .filter_map(|id| self.inner.contacts.contact(*id))
            .map(|c| c.id().to_string())
            .collect();
        StreamSummary {
            id: self.id(),
            call_path: self.call_object_path(),
            kind: self.kind(),
            state: self.state(),
            direction: self.direction(),
            pending_send: self.pending_send(),
            members,
        }
    }

    pub(crate) fn ptr_eq(&self, other: &MediaStream) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl ReadyObject for MediaStream {
    fn readiness_helper(&self) -> &ReadinessHelper {
        &self.inner.readiness
    }
}

fn introspect_core(inner: &Rc<StreamInner>, helper: &ReadinessHelper) {
    let backend = inner.backend.borrow().clone();
    let path = match backend {
        StreamBackend::StreamedMedia { contact_handle: 0, .. } => {
            if let Err(err) = helper.set_introspect_succeeded(&FEATURE_CORE) {
                warn!(error = %err, "Reporting stream introspection result failed");
            }
            return;
        }
        StreamBackend::StreamedMedia { contact_handle, .. } => {
            resolve_members(inner, helper, vec![contact_handle], true);
            return;
        }
        StreamBackend::Call { path, .. } => path,
    };

    let transport = inner.contacts.transport();
    let weak = Rc::downgrade(inner);
    let helper = helper.downgrade();
    tokio::task::spawn_local(async move {
        let reply = transport.get_all(&path, interfaces::CALL_STREAM).await;
        let (Some(inner), Some(helper)) = (weak.upgrade(), helper.upgrade()) else {
            return;
        };
        match reply {
            Ok(props) => {
                let parsed = parse_senders(&props);
                if let StreamBackend::Call { senders, .. } = &mut *inner.backend.borrow_mut() {
                    *senders = parsed.clone();
                }
                let handles: Vec<u32> = parsed.keys().copied().collect();
                if handles.is_empty() {
                    if let Err(err) = helper.set_introspect_succeeded(&FEATURE_CORE) {
                        warn!(error = %err, "Reporting stream introspection result failed");
                    }
                } else {
                    resolve_members(&inner, &helper, handles, false);
                }
            }
            Err(err) => {
                warn!(stream = %path, error = %err, "Properties.GetAll(Call.Stream) failed");
                if let Err(err) = helper.set_introspect_failed(&FEATURE_CORE, err) {
                    warn!(error = %err, "Reporting stream introspection result failed");
                }
            }
        }
    });
}

/// Resolve member contacts, then complete the core feature. With
/// `strict`, an unknown handle fails the feature.
fn resolve_members(inner: &Rc<StreamInner>, helper: &ReadinessHelper, handles: Vec<u32>, strict: bool) {
    let pending = inner.contacts.contacts_for_handles(&handles, &Features::new());
    let results = pending.clone();
    let weak: Weak<StreamInner> = Rc::downgrade(inner);
    let helper: WeakReadinessHelper = helper.downgrade();

    pending.on_finished(move |op| {
        let (Some(inner), Some(helper)) = (weak.upgrade(), helper.upgrade()) else {
            return;
        };
        if let Some(err) = op.error() {
            warn!(error = %err, "Gathering media stream contacts failed");
            if let Err(err) = helper.set_introspect_failed(&FEATURE_CORE, err) {
                warn!(error = %err, "Reporting stream introspection result failed");
            }
            return;
        }
        if strict && !results.invalid_handles().is_empty() {
            warn!(handles = ?results.invalid_handles(), "Media stream contact handle is invalid");
            if let Err(err) = helper.set_introspect_failed(
                &FEATURE_CORE,
                OperationError::invalid_argument("Invalid contact handle"),
            ) {
                warn!(error = %err, "Reporting stream introspection result failed");
            }
            return;
        }
        *inner.members.borrow_mut() = results.contact_ids();
        if let Err(err) = helper.set_introspect_succeeded(&FEATURE_CORE) {
            warn!(error = %err, "Reporting stream introspection result failed");
        }
    });
}

fn parse_senders(props: &PropertyMap) -> BTreeMap<u32, u32> {
    props
        .get("Senders")
        .and_then(Value::as_object)
        .map(|senders| {
            senders
                .iter()
                .filter_map(|(handle, state)| {
                    let handle = handle.parse().ok()?;
                    let state = u32::try_from(state.as_u64()?).ok()?;
                    Some((handle, state))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::FEATURE_ALIAS;
    use crate::interfaces::attribute;
    use crate::memory::MemoryTransport;
    use serde_json::json;
    use tokio::task::LocalSet;
    use tp_core::{features, ErrorKind};

    const CHANNEL: &str = "/org/example/Channel1";

    fn setup() -> (Rc<MemoryTransport>, ContactManager) {
        let transport = Rc::new(MemoryTransport::new());
        let mut bob = PropertyMap::new();
        bob.insert(attribute::CONTACT_ID.to_string(), json!("bob@example.com"));
        transport.add_contact(7, bob);
        let manager = ContactManager::new(
            transport.clone(),
            "/org/example/Connection",
            features(&[FEATURE_ALIAS]),
            Vec::<String>::new(),
        );
        (transport, manager)
    }

    fn info(id: u32, contact: u32) -> StreamInfo {
        StreamInfo {
            id,
            contact,
            kind: 0,
            state: 0,
            direction: DIRECTION_SEND | DIRECTION_RECEIVE,
            pending_send: 0,
        }
    }

    #[test]
    fn test_stream_without_contact_is_ready_at_once() {
        let (_, manager) = setup();
        let stream = MediaStream::streamed_media(CHANNEL, &manager, &info(1, 0));
        let op = stream.become_ready(&Features::new());
        assert!(op.is_valid());
        assert!(stream.members().is_empty());
        assert_eq!(stream.local_sending_state(), SendingState::Sending);
    }

    #[tokio::test]
    async fn test_streamed_media_stream_resolves_contact() {
        LocalSet::new()
            .run_until(async {
                let (_, manager) = setup();
                let stream = MediaStream::streamed_media(CHANNEL, &manager, &info(1, 7));
                stream.become_ready(&Features::new()).await.unwrap();
                assert_eq!(stream.contact().unwrap().id(), "bob@example.com");
                assert_eq!(stream.id(), Some(1));
            })
            .await;
    }

    #[tokio::test]
    async fn test_invalid_stream_contact_fails_core() {
        LocalSet::new()
            .run_until(async {
                let (_, manager) = setup();
                let stream = MediaStream::streamed_media(CHANNEL, &manager, &info(1, 99));
                let err = stream.become_ready(&Features::new()).await.unwrap_err();
                assert_eq!(err.kind, ErrorKind::InvalidArgument);
                assert!(stream.missing_features().contains(&FEATURE_CORE));
            })
            .await;
    }

    #[tokio::test]
    async fn test_call_stream_fetches_senders() {
        LocalSet::new()
            .run_until(async {
                let (transport, manager) = setup();
                let path = "/org/example/Channel1/Content0/Stream0";
                let mut props = PropertyMap::new();
                props.insert("Senders".into(), json!({ "7": 1, "99": 2 }));
                transport.set_properties(path, interfaces::CALL_STREAM, props);

                let stream = MediaStream::call(CHANNEL, &manager, path);
                stream.become_ready(&Features::new()).await.unwrap();

                assert!(stream.is_call());
                assert_eq!(stream.members().len(), 1);
                assert_eq!(stream.remote_sending_state(), SendingState::Sending);

                let mut updates = BTreeMap::new();
                updates.insert(99, 2);
                stream.handle_senders_changed(&updates, &[7]);
                assert_eq!(stream.remote_sending_state(), SendingState::PendingSend);
                assert!(stream.members().is_empty());
            })
            .await;
    }

    #[tokio::test]
    async fn test_request_direction_per_backend() {
        LocalSet::new()
            .run_until(async {
                let (transport, manager) = setup();
                let stream = MediaStream::streamed_media(CHANNEL, &manager, &info(4, 0));
                stream.request_direction(true, false).await.unwrap();
                assert_eq!(
                    transport.call_count(interfaces::CHANNEL_TYPE_STREAMED_MEDIA, "RequestStreamDirection"),
                    1
                );

                let invalid = stream.request_stream_direction(8);
                assert_eq!(invalid.error_kind(), Some(ErrorKind::InvalidArgument));

                let call = MediaStream::call(CHANNEL, &manager, "/org/example/Stream");
                let op = call.request_direction(true, true);
                assert_eq!(op.error_kind(), Some(ErrorKind::NotImplemented));
            })
            .await;
    }

    #[test]
    fn test_live_direction_and_state_updates() {
        let (_, manager) = setup();
        let stream = MediaStream::streamed_media(CHANNEL, &manager, &info(2, 0));
        stream.handle_direction_changed(DIRECTION_RECEIVE, PENDING_LOCAL_SEND);
        stream.handle_state_changed(2);
        assert_eq!(stream.local_sending_state(), SendingState::PendingSend);
        assert_eq!(stream.remote_sending_state(), SendingState::Sending);
        assert_eq!(stream.state(), 2);
    }
}
