//! StreamedMedia and Call channel proxy
//!
//! A [`MediaChannel`] presents both channel types through one API. The
//! remote type is discovered by [`FEATURE_CORE`]; contents are synthesised
//! around each StreamedMedia stream, or mirror the Call channel's content
//! objects. Contents or streams that fail to become ready are dropped
//! instead of failing the channel.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use tp_core::{features, Feature, Features, OperationError, Status};
use tp_readiness::{
    Introspectable, Introspectables, PendingComposite, PendingOperation, PendingVoid,
    ReadinessHelper, ReadyObject,
};

use crate::contact_manager::ContactManager;
use crate::interfaces::{self, handle_type};
use crate::media_content::{settled, ContentSummary, MediaContent, TYPE_AUDIO};
use crate::media_stream::{MediaStream, OPEN};
use crate::transport::{MethodArgs, PropertyMap, StreamInfo};

pub const FEATURE_CORE: Feature = Feature::core("Tp::Channel", 0);
pub const FEATURE_CONTENTS: Feature = Feature::new("Tp::StreamedMediaChannel", 0);
pub const FEATURE_LOCAL_HOLD_STATE: Feature = Feature::new("Tp::StreamedMediaChannel", 1);

pub const STATUS_OPEN: Status = OPEN;

pub const HOLD_STATE_UNHELD: u32 = 0;
pub const HOLD_STATE_HELD: u32 = 1;
pub const HOLD_REASON_NONE: u32 = 0;

const STREAM_STATE_DISCONNECTED: u32 = 0;
const STREAM_DIRECTION_NONE: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelKind {
    StreamedMedia,
    Call,
}

/// Serializable view of a channel, as printed by `tp-inspect`
#[derive(Debug, Clone, Serialize)]
pub struct ChannelSummary {
    pub object_path: String,
    pub channel_type: String,
    pub kind: Option<ChannelKind>,
    pub interfaces: Vec<String>,
    pub target_handle: u32,
    pub target_handle_type: u32,
    pub requested: bool,
    pub contents: Vec<ContentSummary>,
    pub local_hold_state: Option<(u32, u32)>,
    pub actual_features: Vec<String>,
    pub missing_features: Vec<String>,
    pub invalidated: Option<String>,
}

struct ChannelInner {
    readiness: ReadinessHelper,
    path: String,
    contacts: ContactManager,
    kind: Cell<Option<ChannelKind>>,
    channel_type: RefCell<String>,
    target_handle: Cell<u32>,
    target_handle_type: Cell<u32>,
    requested: Cell<bool>,
    contents: RefCell<Vec<MediaContent>>,
    incomplete: RefCell<Vec<MediaContent>>,
    next_content: Cell<u32>,
    hold: Cell<(u32, u32)>,
}

#[derive(Clone)]
pub struct MediaChannel {
    inner: Rc<ChannelInner>,
}

impl MediaChannel {
    pub fn new(contacts: &ContactManager, object_path: impl Into<String>) -> Self {
        let path = object_path.into();
        let inner = Rc::new(ChannelInner {
            readiness: ReadinessHelper::new(path.clone(), STATUS_OPEN),
            path,
            contacts: contacts.clone(),
            kind: Cell::new(None),
            channel_type: RefCell::new(String::new()),
            target_handle: Cell::new(0),
            target_handle_type: Cell::new(handle_type::NONE),
            requested: Cell::new(false),
            contents: RefCell::new(Vec::new()),
            incomplete: RefCell::new(Vec::new()),
            next_content: Cell::new(0),
            hold: Cell::new((HOLD_STATE_UNHELD, HOLD_REASON_NONE)),
        });

        let mut table = Introspectables::new();

        let weak = Rc::downgrade(&inner);
        table.insert(
            FEATURE_CORE,
            Introspectable::new([STATUS_OPEN], Features::new(), Vec::<String>::new(), move |helper| {
                if let Some(inner) = weak.upgrade() {
                    introspect_core(&inner, helper);
                }
            }),
        );

        let weak = Rc::downgrade(&inner);
        table.insert(
            FEATURE_CONTENTS,
            Introspectable::new(
                [STATUS_OPEN],
                features(&[FEATURE_CORE]),
                Vec::<String>::new(),
                move |helper| {
                    if let Some(inner) = weak.upgrade() {
                        introspect_contents(&inner, helper);
                    }
                },
            ),
        );

        let weak = Rc::downgrade(&inner);
        table.insert(
            FEATURE_LOCAL_HOLD_STATE,
            Introspectable::new(
                [STATUS_OPEN],
                features(&[FEATURE_CORE]),
                [interfaces::CHANNEL_INTERFACE_HOLD],
                move |helper| {
                    if let Some(inner) = weak.upgrade() {
                        introspect_local_hold_state(&inner, helper);
                    }
                },
            ),
        );

        if let Err(err) = inner.readiness.add_introspectables(table) {
            warn!(error = %err, "Registering channel introspectables failed");
        }

        Self { inner }
    }

    pub fn object_path(&self) -> &str {
        &self.inner.path
    }

    pub fn contact_manager(&self) -> &ContactManager {
        &self.inner.contacts
    }

    pub fn channel_type(&self) -> String {
        self.inner.channel_type.borrow().clone()
    }

    /// Backend discovered by [`FEATURE_CORE`]
    pub fn kind(&self) -> Option<ChannelKind> {
        self.inner.kind.get()
    }

    pub fn target_handle(&self) -> u32 {
        self.inner.target_handle.get()
    }

    pub fn target_handle_type(&self) -> u32 {
        self.inner.target_handle_type.get()
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.get()
    }

    pub fn interfaces(&self) -> Vec<String> {
        self.inner.readiness.interfaces().into_iter().collect()
    }

    pub fn has_interface(&self, interface: &str) -> bool {
        self.inner.readiness.has_interface(interface)
    }

    pub fn contents(&self) -> Vec<MediaContent> {
        if !self.is_ready(&features(&[FEATURE_CONTENTS])) {
            warn!(channel = %self.inner.path, "MediaChannel::contents() used before FEATURE_CONTENTS is ready");
        }
        self.inner.contents.borrow().clone()
    }

    /// Contents of one media type
    pub fn contents_for_type(&self, kind: u32) -> Vec<MediaContent> {
        self.contents()
            .into_iter()
            .filter(|c| c.kind() == kind)
            .collect()
    }

    /// Every ready stream of every ready content
    pub fn streams(&self) -> Vec<MediaStream> {
        self.contents()
            .iter()
            .flat_map(MediaContent::streams)
            .collect()
    }

    pub fn content_by_stream_id(&self, stream_id: u32) -> Option<MediaContent> {
        lookup_content_by_stream_id(&self.inner, stream_id)
    }

    pub fn content_by_call_path(&self, content_path: &str) -> Option<MediaContent> {
        lookup_content_by_call_path(&self.inner, content_path)
    }

    pub fn local_hold_state(&self) -> u32 {
        if !self.is_ready(&features(&[FEATURE_LOCAL_HOLD_STATE])) {
            warn!(channel = %self.inner.path, "MediaChannel::local_hold_state() used before FEATURE_LOCAL_HOLD_STATE is ready");
        }
        self.inner.hold.get().0
    }

    pub fn local_hold_state_reason(&self) -> u32 {
        if !self.is_ready(&features(&[FEATURE_LOCAL_HOLD_STATE])) {
            warn!(channel = %self.inner.path, "MediaChannel::local_hold_state_reason() used before FEATURE_LOCAL_HOLD_STATE is ready");
        }
        self.inner.hold.get().1
    }

    /// Ask the service to close the channel
    pub fn request_close(&self) -> PendingOperation {
        let transport = self.inner.contacts.transport();
        let path = self.inner.path.clone();
        PendingVoid::new(async move {
            transport
                .call_void(&path, interfaces::CHANNEL, "Close", MethodArgs::None)
                .await
        })
        .into()
    }

    /// `StreamedMedia.StreamAdded`; the returned operation finishes once
    /// the new content settled.
    pub fn handle_stream_added(&self, stream_id: u32, contact_handle: u32, kind: u32) -> PendingOperation {
        if self.kind() != Some(ChannelKind::StreamedMedia) {
            return PendingOperation::failed(OperationError::not_available(
                "StreamAdded only applies to StreamedMedia channels",
            ));
        }
        if lookup_content_by_stream_id(&self.inner, stream_id).is_some() {
            debug!(stream_id, "StreamAdded for an existing stream, ignoring");
            return PendingOperation::finished();
        }
        let info = StreamInfo {
            id: stream_id,
            contact: contact_handle,
            kind,
            state: STREAM_STATE_DISCONNECTED,
            direction: STREAM_DIRECTION_NONE,
            pending_send: 0,
        };
        add_content_for_sm_stream(&self.inner, &info)
    }

    /// `StreamedMedia.StreamRemoved`
    pub fn handle_stream_removed(&self, stream_id: u32) -> Option<MediaContent> {
        let content = lookup_content_by_stream_id(&self.inner, stream_id)?;
        debug!(stream_id, "Stream removed");
        remove_content(&self.inner, &content, "Stream removed");
        Some(content)
    }

    pub fn handle_stream_direction_changed(&self, stream_id: u32, direction: u32, pending_send: u32) {
        if let Some(stream) = self.sm_stream(stream_id) {
            stream.handle_direction_changed(direction, pending_send);
        }
    }

    pub fn handle_stream_state_changed(&self, stream_id: u32, state: u32) {
        if let Some(stream) = self.sm_stream(stream_id) {
            stream.handle_state_changed(state);
        }
    }

    /// `Call.ContentAdded`
    pub fn handle_content_added(&self, content_path: &str) -> PendingOperation {
        if self.kind() != Some(ChannelKind::Call) {
            return PendingOperation::failed(OperationError::not_available(
                "ContentAdded only applies to Call channels",
            ));
        }
        if lookup_content_by_call_path(&self.inner, content_path).is_some() {
            debug!(content = content_path, "ContentAdded for an existing content, ignoring");
            return PendingOperation::finished();
        }
        add_content_for_call_path(&self.inner, content_path)
    }

    /// `Call.ContentRemoved`
    pub fn handle_content_removed(&self, content_path: &str) -> Option<MediaContent> {
        let content = lookup_content_by_call_path(&self.inner, content_path)?;
        remove_content(&self.inner, &content, "Content removed");
        Some(content)
    }

    /// `Hold.HoldStateChanged`; returns whether the state changed
    pub fn handle_hold_state_changed(&self, state: u32, reason: u32) -> bool {
        let changed = self.inner.hold.replace((state, reason)) != (state, reason);
        if changed {
            debug!(channel = %self.inner.path, state, reason, "Local hold state changed");
        }
        changed
    }

    /// `Channel.Closed`: the channel and its contents become invalidated
    pub fn handle_closed(&self) {
        info!(channel = %self.inner.path, "Channel closed");
        let error = OperationError::cancelled(format!("channel {} was closed", self.inner.path));
        let contents: Vec<MediaContent> = self
            .inner
            .contents
            .borrow_mut()
            .drain(..)
            .chain(self.inner.incomplete.borrow_mut().drain(..))
            .collect();
        for content in contents {
            content.invalidate(error.clone());
        }
        self.inner.readiness.invalidate(error);
    }

    pub fn summary(&self) -> ChannelSummary {
        let ready = self.inner.readiness.is_feature_ready(&FEATURE_LOCAL_HOLD_STATE);
        ChannelSummary {
            object_path: self.inner.path.clone(),
            channel_type: self.channel_type(),
            kind: self.kind(),
            interfaces: self.interfaces(),
            target_handle: self.target_handle(),
            target_handle_type: self.target_handle_type(),
            requested: self.is_requested(),
            contents: self
                .inner
                .contents
                .borrow()
                .iter()
                .map(MediaContent::summary)
                .collect(),
            local_hold_state: ready.then(|| self.inner.hold.get()),
            actual_features: self.actual_features().iter().map(ToString::to_string).collect(),
            missing_features: self.missing_features().iter().map(ToString::to_string).collect(),
            invalidated: self
                .inner
                .readiness
                .invalidation_reason()
                .map(|err| err.to_string()),
        }
    }

    fn sm_stream(&self, stream_id: u32) -> Option<MediaStream> {
        lookup_content_by_stream_id(&self.inner, stream_id)
            .and_then(|content| content.sm_stream().cloned())
    }
}

impl ReadyObject for MediaChannel {
    fn readiness_helper(&self) -> &ReadinessHelper {
        &self.inner.readiness
    }
}

fn lookup_content_by_stream_id(inner: &ChannelInner, stream_id: u32) -> Option<MediaContent> {
    let contents = inner.contents.borrow();
    let incomplete = inner.incomplete.borrow();
    contents
        .iter()
        .chain(incomplete.iter())
        .find(|c| c.sm_stream().and_then(MediaStream::id) == Some(stream_id))
        .cloned()
}

fn lookup_content_by_call_path(inner: &ChannelInner, content_path: &str) -> Option<MediaContent> {
    let contents = inner.contents.borrow();
    let incomplete = inner.incomplete.borrow();
    contents
        .iter()
        .chain(incomplete.iter())
        .find(|c| c.call_object_path() == Some(content_path))
        .cloned()
}

fn remove_content(inner: &ChannelInner, content: &MediaContent, reason: &str) {
    inner.contents.borrow_mut().retain(|c| !c.ptr_eq(content));
    inner.incomplete.borrow_mut().retain(|c| !c.ptr_eq(content));
    content.invalidate(OperationError::cancelled(reason));
}

/// Track `content` until ready; the returned operation always succeeds
fn track_content(inner: &Rc<ChannelInner>, content: MediaContent) -> PendingOperation {
    inner.incomplete.borrow_mut().push(content.clone());
    let weak = Rc::downgrade(inner);
    let ready = content.become_ready(&Features::new());
    settled(&ready, move |outcome| {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let was_incomplete = {
            let mut incomplete = inner.incomplete.borrow_mut();
            let before = incomplete.len();
            incomplete.retain(|c| !c.ptr_eq(&content));
            incomplete.len() != before
        };
        match outcome {
            Ok(()) if was_incomplete => inner.contents.borrow_mut().push(content),
            Ok(()) => debug!("Content removed before it became ready"),
            Err(err) => warn!(error = %err, "Content failed to become ready, dropping it"),
        }
    })
}

fn add_content_for_sm_stream(inner: &Rc<ChannelInner>, info: &StreamInfo) -> PendingOperation {
    let number = inner.next_content.get();
    inner.next_content.set(number + 1);
    let name = format!(
        "{} {} {}",
        if info.kind == TYPE_AUDIO { "audio" } else { "video" },
        inner.path,
        number
    );
    let content = MediaContent::streamed_media(&inner.path, &inner.contacts, name, info);
    track_content(inner, content)
}

fn add_content_for_call_path(inner: &Rc<ChannelInner>, content_path: &str) -> PendingOperation {
    let content = MediaContent::call(&inner.path, &inner.contacts, content_path);
    track_content(inner, content)
}

fn introspect_core(inner: &Rc<ChannelInner>, helper: &ReadinessHelper) {
    let transport = inner.contacts.transport();
    let path = inner.path.clone();
    let weak = Rc::downgrade(inner);
    let helper = helper.downgrade();

    tokio::task::spawn_local(async move {
        let reply = transport.get_all(&path, interfaces::CHANNEL).await;
        let (Some(inner), Some(helper)) = (weak.upgrade(), helper.upgrade()) else {
            return;
        };
        let props = match reply {
            Ok(props) => props,
            Err(err) => {
                warn!(channel = %path, error = %err, "Properties.GetAll(Channel) failed");
                if let Err(err) = helper.set_introspect_failed(&FEATURE_CORE, err) {
                    warn!(error = %err, "Reporting channel introspection result failed");
                }
                return;
            }
        };
        debug!(channel = %path, "Got Channel properties");

        let channel_type = props
            .get("ChannelType")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let kind = if channel_type == interfaces::CHANNEL_TYPE_STREAMED_MEDIA {
            ChannelKind::StreamedMedia
        } else if channel_type == interfaces::CHANNEL_TYPE_CALL {
            ChannelKind::Call
        } else {
            if let Err(err) = helper.set_introspect_failed(
                &FEATURE_CORE,
                OperationError::not_implemented(format!(
                    "channel type {:?} is not a media channel type",
                    channel_type
                )),
            ) {
                warn!(error = %err, "Reporting channel introspection result failed");
            }
            return;
        };

        inner.kind.set(Some(kind));
        *inner.channel_type.borrow_mut() = channel_type;
        inner.target_handle.set(u32_property(&props, "TargetHandle"));
        inner
            .target_handle_type
            .set(u32_property(&props, "TargetHandleType"));
        inner
            .requested
            .set(props.get("Requested").and_then(Value::as_bool).unwrap_or(false));

        helper.set_interfaces(string_list(&props, "Interfaces"));
        if let Err(err) = helper.set_introspect_succeeded(&FEATURE_CORE) {
            warn!(error = %err, "Reporting channel introspection result failed");
        }
    });
}

fn introspect_contents(inner: &Rc<ChannelInner>, helper: &ReadinessHelper) {
    let transport = inner.contacts.transport();
    let path = inner.path.clone();
    let kind = inner.kind.get();
    let weak = Rc::downgrade(inner);
    let helper = helper.downgrade();

    tokio::task::spawn_local(async move {
        let pending = match kind {
            Some(ChannelKind::StreamedMedia) => {
                let reply = transport.list_streams(&path).await;
                let (Some(inner), Some(helper)) = (weak.upgrade(), helper.upgrade()) else {
                    return;
                };
                match reply {
                    Ok(streams) => {
                        debug!(channel = %path, streams = streams.len(), "Got StreamedMedia streams");
                        let mut pending = Vec::new();
                        for info in &streams {
                            match lookup_content_by_stream_id(&inner, info.id)
                                .and_then(|content| content.sm_stream().cloned())
                            {
                                Some(stream) => {
                                    stream.handle_direction_changed(info.direction, info.pending_send);
                                    stream.handle_state_changed(info.state);
                                }
                                None => pending.push(add_content_for_sm_stream(&inner, info)),
                            }
                        }
                        (pending, helper)
                    }
                    Err(err) => {
                        warn!(channel = %path, error = %err, "StreamedMedia.ListStreams failed");
                        if let Err(err) = helper.set_introspect_failed(&FEATURE_CONTENTS, err) {
                            warn!(error = %err, "Reporting channel introspection result failed");
                        }
                        return;
                    }
                }
            }
            Some(ChannelKind::Call) => {
                let reply = transport.get_all(&path, interfaces::CHANNEL_TYPE_CALL).await;
                let (Some(inner), Some(helper)) = (weak.upgrade(), helper.upgrade()) else {
                    return;
                };
                match reply {
                    Ok(props) => {
                        let pending: Vec<PendingOperation> = string_list(&props, "Contents")
                            .iter()
                            .filter(|content_path| {
                                lookup_content_by_call_path(&inner, content_path).is_none()
                            })
                            .map(|content_path| add_content_for_call_path(&inner, content_path))
                            .collect();
                        (pending, helper)
                    }
                    Err(err) => {
                        warn!(channel = %path, error = %err, "Properties.GetAll(Call) failed");
                        if let Err(err) = helper.set_introspect_failed(&FEATURE_CONTENTS, err) {
                            warn!(error = %err, "Reporting channel introspection result failed");
                        }
                        return;
                    }
                }
            }
            None => {
                if let Some(helper) = helper.upgrade() {
                    if let Err(err) = helper.set_introspect_failed(
                        &FEATURE_CONTENTS,
                        OperationError::not_available("channel type is not known yet"),
                    ) {
                        warn!(error = %err, "Reporting channel introspection result failed");
                    }
                }
                return;
            }
        };

        let (pending, helper) = pending;
        let helper = helper.downgrade();
        PendingComposite::new(pending).on_finished(move |_| {
            if let Some(helper) = helper.upgrade() {
                if let Err(err) = helper.set_introspect_succeeded(&FEATURE_CONTENTS) {
                    warn!(error = %err, "Reporting channel introspection result failed");
                }
            }
        });
    });
}

fn introspect_local_hold_state(inner: &Rc<ChannelInner>, helper: &ReadinessHelper) {
    let transport = inner.contacts.transport();
    let path = inner.path.clone();
    let weak = Rc::downgrade(inner);
    let helper = helper.downgrade();

    tokio::task::spawn_local(async move {
        let reply = transport.get_hold_state(&path).await;
        let (Some(inner), Some(helper)) = (weak.upgrade(), helper.upgrade()) else {
            return;
        };
        match reply {
            Ok((state, reason)) => {
                inner.hold.set((state, reason));
            }
            Err(err) => {
                warn!(channel = %path, error = %err, "Hold.GetHoldState failed, assuming unheld");
            }
        }
        if let Err(err) = helper.set_introspect_succeeded(&FEATURE_LOCAL_HOLD_STATE) {
            warn!(error = %err, "Reporting channel introspection result failed");
        }
    });
}

fn u32_property(props: &PropertyMap, name: &str) -> u32 {
    props
        .get(name)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0)
}

fn string_list(props: &PropertyMap, name: &str) -> Vec<String> {
    props
        .get(name)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::attribute;
    use crate::memory::MemoryTransport;
    use serde_json::json;
    use tokio::task::LocalSet;
    use tp_core::ErrorKind;

    const CHANNEL: &str = "/org/example/Connection/Channel1";

    fn setup(channel_type: &str, channel_interfaces: &[&str]) -> (Rc<MemoryTransport>, MediaChannel) {
        let transport = Rc::new(MemoryTransport::new());
        let mut props = PropertyMap::new();
        props.insert("ChannelType".into(), json!(channel_type));
        props.insert("Interfaces".into(), json!(channel_interfaces));
        props.insert("TargetHandle".into(), json!(7));
        props.insert("TargetHandleType".into(), json!(handle_type::CONTACT));
        props.insert("Requested".into(), json!(true));
        transport.set_properties(CHANNEL, interfaces::CHANNEL, props);

        let mut bob = PropertyMap::new();
        bob.insert(attribute::CONTACT_ID.to_string(), json!("bob@example.com"));
        transport.add_contact(7, bob);

        let manager = ContactManager::new(
            transport.clone(),
            "/org/example/Connection",
            Features::new(),
            Vec::<String>::new(),
        );
        let channel = MediaChannel::new(&manager, CHANNEL);
        (transport, channel)
    }

    fn stream(id: u32, contact: u32) -> StreamInfo {
        StreamInfo {
            id,
            contact,
            kind: TYPE_AUDIO,
            state: 1,
            direction: 3,
            pending_send: 0,
        }
    }

    #[tokio::test]
    async fn test_core_reads_channel_properties() {
        LocalSet::new()
            .run_until(async {
                let (_, channel) = setup(
                    interfaces::CHANNEL_TYPE_STREAMED_MEDIA,
                    &[interfaces::CHANNEL_INTERFACE_HOLD],
                );
                channel.become_ready(&Features::new()).await.unwrap();

                assert_eq!(channel.kind(), Some(ChannelKind::StreamedMedia));
                assert_eq!(channel.target_handle(), 7);
                assert!(channel.is_requested());
                assert!(channel.has_interface(interfaces::CHANNEL_INTERFACE_HOLD));
            })
            .await;
    }

    #[tokio::test]
    async fn test_non_media_channel_fails_core() {
        LocalSet::new()
            .run_until(async {
                let (_, channel) = setup(interfaces::CHANNEL_TYPE_TEXT, &[]);
                let err = channel
                    .become_ready(&features(&[FEATURE_CONTENTS]))
                    .await
                    .unwrap_err();
                assert_eq!(err.kind, ErrorKind::NotImplemented);
                assert!(channel.missing_features().contains(&FEATURE_CONTENTS));
            })
            .await;
    }

    #[tokio::test]
    async fn test_contents_tolerate_failing_streams() {
        LocalSet::new()
            .run_until(async {
                let (transport, channel) = setup(interfaces::CHANNEL_TYPE_STREAMED_MEDIA, &[]);
                // handle 99 is unknown, so stream 2 cannot become ready
                transport.set_streams(CHANNEL, vec![stream(1, 7), stream(2, 99)]);

                channel
                    .become_ready(&features(&[FEATURE_CONTENTS]))
                    .await
                    .unwrap();

                assert_eq!(channel.contents().len(), 2);
                let streams = channel.streams();
                assert_eq!(streams.len(), 1);
                assert_eq!(streams[0].contact().unwrap().id(), "bob@example.com");
            })
            .await;
    }

    #[tokio::test]
    async fn test_list_streams_failure_fails_contents() {
        LocalSet::new()
            .run_until(async {
                let (transport, channel) = setup(interfaces::CHANNEL_TYPE_STREAMED_MEDIA, &[]);
                transport.fail_streams(CHANNEL, OperationError::not_available("busy"));
                let err = channel
                    .become_ready(&features(&[FEATURE_CONTENTS]))
                    .await
                    .unwrap_err();
                assert_eq!(err.kind, ErrorKind::NotAvailable);
                assert!(channel.is_ready(&Features::new()));
            })
            .await;
    }

    #[tokio::test]
    async fn test_hold_state_needs_interface_and_tolerates_errors() {
        LocalSet::new()
            .run_until(async {
                let (_, plain) = setup(interfaces::CHANNEL_TYPE_STREAMED_MEDIA, &[]);
                plain.become_ready(&Features::new()).await.unwrap();
                let op = plain.become_ready(&features(&[FEATURE_LOCAL_HOLD_STATE]));
                assert_eq!(op.error_kind(), Some(ErrorKind::NotImplemented));

                let (transport, held) = setup(
                    interfaces::CHANNEL_TYPE_STREAMED_MEDIA,
                    &[interfaces::CHANNEL_INTERFACE_HOLD],
                );
                transport.fail_hold_state(CHANNEL, OperationError::not_available("no hold"));
                held.become_ready(&Features::new()).await.unwrap();
                held.become_ready(&features(&[FEATURE_LOCAL_HOLD_STATE]))
                    .await
                    .unwrap();
                assert_eq!(held.local_hold_state(), HOLD_STATE_UNHELD);

                assert!(held.handle_hold_state_changed(HOLD_STATE_HELD, 1));
                assert!(!held.handle_hold_state_changed(HOLD_STATE_HELD, 1));
                assert_eq!(held.local_hold_state_reason(), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn test_call_channel_contents() {
        LocalSet::new()
            .run_until(async {
                let (transport, channel) = setup(interfaces::CHANNEL_TYPE_CALL, &[]);
                let content_path = format!("{}/Content0", CHANNEL);
                let mut call = PropertyMap::new();
                call.insert("Contents".into(), json!([content_path.clone()]));
                transport.set_properties(CHANNEL, interfaces::CHANNEL_TYPE_CALL, call);
                let mut content = PropertyMap::new();
                content.insert("Name".into(), json!("audio"));
                content.insert("Type".into(), json!(TYPE_AUDIO));
                transport.set_properties(&content_path, interfaces::CALL_CONTENT, content);

                channel
                    .become_ready(&features(&[FEATURE_CONTENTS]))
                    .await
                    .unwrap();
                assert_eq!(channel.kind(), Some(ChannelKind::Call));
                assert_eq!(channel.contents().len(), 1);
                assert!(channel.content_by_call_path(&content_path).is_some());

                assert!(channel.handle_content_added(&content_path).is_finished());
                let removed = channel.handle_content_removed(&content_path).unwrap();
                assert!(removed.readiness_helper().is_invalidated());
                assert!(channel.contents().is_empty());
            })
            .await;
    }

    #[tokio::test]
    async fn test_closed_channel_cancels_outstanding_requests() {
        LocalSet::new()
            .run_until(async {
                let (_, channel) = setup(interfaces::CHANNEL_TYPE_STREAMED_MEDIA, &[]);
                let op = channel.become_ready(&features(&[FEATURE_CONTENTS]));
                channel.handle_closed();

                let err = op.await.unwrap_err();
                assert_eq!(err.kind, ErrorKind::Cancelled);
                assert!(channel.readiness_helper().is_invalidated());
                let again = channel.become_ready(&Features::new());
                assert_eq!(again.error_kind(), Some(ErrorKind::Cancelled));
                assert!(channel.summary().invalidated.is_some());
            })
            .await;
    }
}
