//! Media contents grouping the streams of a media channel

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use tp_core::{Feature, Features, OperationError};
use tp_readiness::{
    Introspectable, Introspectables, Outcome, PendingComposite, PendingOperation, ReadinessHelper,
    ReadyObject,
};

use crate::contact::Contact;
use crate::contact_manager::{ContactId, ContactManager};
use crate::interfaces;
use crate::media_stream::{MediaStream, StreamSummary, OPEN};
use crate::transport::{PropertyMap, StreamInfo};

pub const FEATURE_CORE: Feature = Feature::core("Tp::MediaContent", 0);

pub const TYPE_AUDIO: u32 = 0;
pub const TYPE_VIDEO: u32 = 1;

/// Remote representation behind a content
#[derive(Clone)]
pub enum ContentBackend {
    /// Synthesised around the single stream of a StreamedMedia channel
    StreamedMedia { stream: MediaStream },
    Call { path: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentSummary {
    pub name: String,
    pub kind: u32,
    pub call_path: Option<String>,
    pub creator: Option<String>,
    pub streams: Vec<StreamSummary>,
}

struct ContentInner {
    readiness: ReadinessHelper,
    channel_path: String,
    contacts: ContactManager,
    backend: ContentBackend,
    name: RefCell<String>,
    kind: Cell<u32>,
    creator: Cell<Option<ContactId>>,
    streams: RefCell<Vec<MediaStream>>,
    incomplete: RefCell<Vec<MediaStream>>,
}

/// One content of a media channel, made ready through [`FEATURE_CORE`]
#[derive(Clone)]
pub struct MediaContent {
    inner: Rc<ContentInner>,
}

/// Wrap `op` into an operation that always succeeds once `op` finished,
/// after handing `op`'s outcome to `on_outcome`.
pub(crate) fn settled(op: &PendingOperation, on_outcome: impl FnOnce(Outcome) + 'static) -> PendingOperation {
    let settled = PendingOperation::new();
    let handle = settled.clone();
    op.on_finished(move |op| {
        on_outcome(match op.error() {
            Some(err) => Err(err),
            None => Ok(()),
        });
        let _ = handle.set_finished();
    });
    settled
}

impl MediaContent {
    pub(crate) fn streamed_media(
        channel_path: &str,
        contacts: &ContactManager,
        name: String,
        info: &StreamInfo,
    ) -> Self {
        let stream = MediaStream::streamed_media(channel_path, contacts, info);
        let object = format!("{} ({})", channel_path, name);
        let content = Self::with_backend(
            object,
            channel_path,
            contacts,
            ContentBackend::StreamedMedia { stream },
        );
        *content.inner.name.borrow_mut() = name;
        content.inner.kind.set(info.kind);
        content
    }

    pub(crate) fn call(channel_path: &str, contacts: &ContactManager, content_path: &str) -> Self {
        Self::with_backend(
            content_path.to_string(),
            channel_path,
            contacts,
            ContentBackend::Call {
                path: content_path.to_string(),
            },
        )
    }

    fn with_backend(
        object: String,
        channel_path: &str,
        contacts: &ContactManager,
        backend: ContentBackend,
    ) -> Self {
        let inner = Rc::new(ContentInner {
            readiness: ReadinessHelper::new(object, OPEN),
            channel_path: channel_path.to_string(),
            contacts: contacts.clone(),
            backend,
            name: RefCell::new(String::new()),
            kind: Cell::new(TYPE_AUDIO),
            creator: Cell::new(None),
            streams: RefCell::new(Vec::new()),
            incomplete: RefCell::new(Vec::new()),
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
            warn!(error = %err, "Registering content introspectables failed");
        }

        Self { inner }
    }

    pub fn name(&self) -> String {
        self.inner.name.borrow().clone()
    }

    /// [`TYPE_AUDIO`] or [`TYPE_VIDEO`]
    pub fn kind(&self) -> u32 {
        self.inner.kind.get()
    }

    pub fn backend(&self) -> &ContentBackend {
        &self.inner.backend
    }

    pub fn call_object_path(&self) -> Option<&str> {
        match &self.inner.backend {
            ContentBackend::Call { path } => Some(path),
            ContentBackend::StreamedMedia { .. } => None,
        }
    }

    /// The wrapped stream of a StreamedMedia content, ready or not
    pub fn sm_stream(&self) -> Option<&MediaStream> {
        match &self.inner.backend {
            ContentBackend::StreamedMedia { stream } => Some(stream),
            ContentBackend::Call { .. } => None,
        }
    }

    pub fn channel_path(&self) -> &str {
        &self.inner.channel_path
    }

    pub fn creator(&self) -> Option<Contact> {
        self.inner
            .creator
            .get()
            .and_then(|id| self.inner.contacts.contact(id))
    }

    /// Streams that became ready
    pub fn streams(&self) -> Vec<MediaStream> {
        if !self.is_ready(&Features::new()) {
            warn!(content = %self.inner.readiness.object(), "MediaContent::streams() used before FEATURE_CORE is ready");
        }
        self.inner.streams.borrow().clone()
    }

    /// `Call.Content.StreamAdded`
    pub fn handle_stream_added(&self, stream_path: &str) -> PendingOperation {
        if self.lookup_stream(stream_path).is_some() {
            debug!(stream = stream_path, "Stream already known, ignoring");
            return PendingOperation::finished();
        }
        add_stream(&self.inner, stream_path)
    }

    /// `Call.Content.StreamRemoved`
    pub fn handle_stream_removed(&self, stream_path: &str) -> Option<MediaStream> {
        let stream = self.lookup_stream(stream_path)?;
        self.inner.streams.borrow_mut().retain(|s| !s.ptr_eq(&stream));
        self.inner.incomplete.borrow_mut().retain(|s| !s.ptr_eq(&stream));
        stream.invalidate(OperationError::cancelled("Stream removed"));
        Some(stream)
    }

    fn lookup_stream(&self, stream_path: &str) -> Option<MediaStream> {
        let streams = self.inner.streams.borrow();
        let incomplete = self.inner.incomplete.borrow();
        streams
            .iter()
            .chain(incomplete.iter())
            .find(|s| s.call_object_path().as_deref() == Some(stream_path))
            .cloned()
    }

    pub(crate) fn invalidate(&self, error: OperationError) {
        let streams: Vec<MediaStream> = self
            .inner
            .streams
            .borrow()
            .iter()
            .chain(self.inner.incomplete.borrow().iter())
            .cloned()
            .collect();
        for stream in streams {
            stream.invalidate(error.clone());
        }
        if let ContentBackend::StreamedMedia { stream } = &self.inner.backend {
            stream.invalidate(error.clone());
        }
        self.inner.readiness.invalidate(error);
    }

    pub fn summary(&self) -> ContentSummary {
        ContentSummary {
            name: self.name(),
            kind: self.kind(),
            call_path: self.call_object_path().map(str::to_string),
            creator: self.creator().map(|c| c.id().to_string()),
            streams: self
                .inner
                .streams
                .borrow()
                .iter()
                .map(MediaStream::summary)
                .collect(),
        }
    }

    pub(crate) fn ptr_eq(&self, other: &MediaContent) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl ReadyObject for MediaContent {
    fn readiness_helper(&self) -> &ReadinessHelper {
        &self.inner.readiness
    }
}

/// Track `stream` until ready. A stream that fails or is removed while
/// incomplete is dropped without failing the content.
fn track_stream(inner: &Rc<ContentInner>, stream: MediaStream) -> PendingOperation {
    inner.incomplete.borrow_mut().push(stream.clone());
    let weak = Rc::downgrade(inner);
    let ready = stream.become_ready(&Features::new());
    settled(&ready, move |outcome| {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let was_incomplete = {
            let mut incomplete = inner.incomplete.borrow_mut();
            let before = incomplete.len();
            incomplete.retain(|s| !s.ptr_eq(&stream));
            incomplete.len() != before
        };
        match outcome {
            Ok(()) if was_incomplete => inner.streams.borrow_mut().push(stream),
            Ok(()) => debug!("Stream removed before it became ready"),
            Err(err) => warn!(error = %err, "Stream failed to become ready, dropping it"),
        }
    })
}

fn add_stream(inner: &Rc<ContentInner>, stream_path: &str) -> PendingOperation {
    let stream = MediaStream::call(&inner.channel_path, &inner.contacts, stream_path);
    track_stream(inner, stream)
}

fn introspect_core(inner: &Rc<ContentInner>, helper: &ReadinessHelper) {
    let path = match &inner.backend {
        ContentBackend::StreamedMedia { stream } => {
            let tracked = track_stream(inner, stream.clone());
            let helper = helper.downgrade();
            tracked.on_finished(move |_| {
                if let Some(helper) = helper.upgrade() {
                    if let Err(err) = helper.set_introspect_succeeded(&FEATURE_CORE) {
                        warn!(error = %err, "Reporting content introspection result failed");
                    }
                }
            });
            return;
        }
        ContentBackend::Call { path } => path.clone(),
    };

    let transport = inner.contacts.transport();
    let weak = Rc::downgrade(inner);
    let helper = helper.downgrade();
    tokio::task::spawn_local(async move {
        let reply = transport.get_all(&path, interfaces::CALL_CONTENT).await;
        let (Some(inner), Some(helper)) = (weak.upgrade(), helper.upgrade()) else {
            return;
        };
        let props = match reply {
            Ok(props) => props,
            Err(err) => {
                warn!(content = %path, error = %err, "Properties.GetAll(Call.Content) failed");
                if let Err(err) = helper.set_introspect_failed(&FEATURE_CORE, err) {
                    warn!(error = %err, "Reporting content introspection result failed");
                }
                return;
            }
        };
        debug!(content = %path, "Got Call.Content properties");

        apply_main_properties(&inner, &props);

        let mut pending: Vec<PendingOperation> = stream_paths(&props)
            .iter()
            .map(|stream_path| add_stream(&inner, stream_path))
            .collect();

        let creator = props
            .get("Creator")
            .and_then(Value::as_u64)
            .and_then(|h| u32::try_from(h).ok())
            .unwrap_or(0);
        if creator != 0 {
            let resolved = inner.contacts.contacts_for_handles(&[creator], &Features::new());
            let results = resolved.clone();
            let weak = Rc::downgrade(&inner);
            pending.push(settled(&resolved, move |outcome| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match outcome {
                    Ok(()) => inner.creator.set(results.contact_ids().first().copied()),
                    Err(err) => warn!(error = %err, "Getting content creator failed, ignoring"),
                }
            }));
        }

        let helper = helper.downgrade();
        PendingComposite::new(pending).on_finished(move |_| {
            if let Some(helper) = helper.upgrade() {
                if let Err(err) = helper.set_introspect_succeeded(&FEATURE_CORE) {
                    warn!(error = %err, "Reporting content introspection result failed");
                }
            }
        });
    });
}

fn apply_main_properties(inner: &ContentInner, props: &PropertyMap) {
    if let Some(name) = props.get("Name").and_then(Value::as_str) {
        *inner.name.borrow_mut() = name.to_string();
    }
    if let Some(kind) = props
        .get("Type")
        .and_then(Value::as_u64)
        .and_then(|k| u32::try_from(k).ok())
    {
        inner.kind.set(kind);
    }
}

fn stream_paths(props: &PropertyMap) -> Vec<String> {
    props
        .get("Streams")
        .and_then(Value::as_array)
        .map(|paths| {
            paths
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
