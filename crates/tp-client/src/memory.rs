//! In-memory transport serving canned replies
//!
//! Every call yields to the executor once before answering, so proxies
//! observe replies asynchronously exactly as they would over the bus.

use std::cell::RefCell;
use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use tp_core::{ErrorKind, OperationError};

use crate::interfaces;
use crate::transport::{MethodArgs, PropertyMap, StreamInfo, Transport};

type Reply<T> = Result<T, OperationError>;

#[derive(Default)]
struct MemoryState {
    properties: BTreeMap<(String, String), Reply<PropertyMap>>,
    streams: BTreeMap<String, Reply<Vec<StreamInfo>>>,
    hold_states: BTreeMap<String, Reply<(u32, u32)>>,
    contacts: BTreeMap<u32, PropertyMap>,
    contacts_failure: Option<OperationError>,
    void_failures: BTreeMap<(String, String), OperationError>,
    calls: Vec<String>,
}

/// Scriptable [`Transport`] keeping every reply in memory
#[derive(Default)]
pub struct MemoryTransport {
    state: RefCell<MemoryState>,
}

fn unknown_method(interface: &str, method: &str, path: &str) -> OperationError {
    OperationError::new(
        ErrorKind::Remote("org.freedesktop.DBus.Error.UnknownMethod".into()),
        format!("no reply scripted for {}.{} on {}", interface, method, path),
    )
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `GetAll(interface)` on `path`
    pub fn set_properties(&self, path: &str, interface: &str, props: PropertyMap) {
        self.state
            .borrow_mut()
            .properties
            .insert((path.to_string(), interface.to_string()), Ok(props));
    }

    pub fn fail_properties(&self, path: &str, interface: &str, error: OperationError) {
        self.state
            .borrow_mut()
            .properties
            .insert((path.to_string(), interface.to_string()), Err(error));
    }

    pub fn set_streams(&self, channel_path: &str, streams: Vec<StreamInfo>) {
        self.state
            .borrow_mut()
            .streams
            .insert(channel_path.to_string(), Ok(streams));
    }

    pub fn fail_streams(&self, channel_path: &str, error: OperationError) {
        self.state
            .borrow_mut()
            .streams
            .insert(channel_path.to_string(), Err(error));
    }

    pub fn set_hold_state(&self, channel_path: &str, state: u32, reason: u32) {
        self.state
            .borrow_mut()
            .hold_states
            .insert(channel_path.to_string(), Ok((state, reason)));
    }

    pub fn fail_hold_state(&self, channel_path: &str, error: OperationError) {
        self.state
            .borrow_mut()
            .hold_states
            .insert(channel_path.to_string(), Err(error));
    }

    /// Register a contact's full attribute set. Replies only carry the
    /// attributes of the interfaces asked for.
    pub fn add_contact(&self, handle: u32, attributes: PropertyMap) {
        self.state.borrow_mut().contacts.insert(handle, attributes);
    }

    pub fn fail_contacts(&self, error: OperationError) {
        self.state.borrow_mut().contacts_failure = Some(error);
    }

    /// Make `interface.method` fail on any object
    pub fn fail_method(&self, interface: &str, method: &str, error: OperationError) {
        self.state
            .borrow_mut()
            .void_failures
            .insert((interface.to_string(), method.to_string()), error);
    }

    /// Calls issued so far, as `Interface.Method path`
    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    /// How many times `interface.method` was called
    pub fn call_count(&self, interface: &str, method: &str) -> usize {
        let prefix = format!("{}.{} ", interface, method);
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| call.starts_with(&prefix))
            .count()
    }

    fn record(&self, interface: &str, method: &str, path: &str) {
        debug!(path, interface, method, "Scripted call");
        self.state
            .borrow_mut()
            .calls
            .push(format!("{}.{} {}", interface, method, path));
    }
}

#[async_trait(?Send)]
impl Transport for MemoryTransport {
    async fn get_all(&self, path: &str, interface: &str) -> Result<PropertyMap, OperationError> {
        self.record(interface, "GetAll", path);
        tokio::task::yield_now().await;
        self.state
            .borrow()
            .properties
            .get(&(path.to_string(), interface.to_string()))
            .cloned()
            .unwrap_or_else(|| Err(unknown_method(interface, "GetAll", path)))
    }

    async fn call_void(
        &self,
        path: &str,
        interface: &str,
        method: &str,
        args: MethodArgs,
    ) -> Result<(), OperationError> {
        self.record(interface, method, path);
        debug!(?args, "Scripted void call arguments");
        tokio::task::yield_now().await;
        match self
            .state
            .borrow()
            .void_failures
            .get(&(interface.to_string(), method.to_string()))
        {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn list_streams(&self, channel_path: &str) -> Result<Vec<StreamInfo>, OperationError> {
        self.record(interfaces::CHANNEL_TYPE_STREAMED_MEDIA, "ListStreams", channel_path);
        tokio::task::yield_now().await;
        self.state
            .borrow()
            .streams
            .get(channel_path)
            .cloned()
            .unwrap_or_else(|| {
                Err(unknown_method(
                    interfaces::CHANNEL_TYPE_STREAMED_MEDIA,
                    "ListStreams",
                    channel_path,
                ))
            })
    }

    async fn get_hold_state(&self, channel_path: &str) -> Result<(u32, u32), OperationError> {
        self.record(interfaces::CHANNEL_INTERFACE_HOLD, "GetHoldState", channel_path);
        tokio::task::yield_now().await;
        self.state
            .borrow()
            .hold_states
            .get(channel_path)
            .cloned()
            .unwrap_or_else(|| {
                Err(unknown_method(
                    interfaces::CHANNEL_INTERFACE_HOLD,
                    "GetHoldState",
                    channel_path,
                ))
            })
    }

    async fn get_contact_attributes(
        &self,
        connection_path: &str,
        handles: &[u32],
        contact_interfaces: &[String],
    ) -> Result<BTreeMap<u32, PropertyMap>, OperationError> {
        self.record(
            interfaces::CONNECTION_CONTACTS,
            "GetContactAttributes",
            connection_path,
        );
        tokio::task::yield_now().await;

        let state = self.state.borrow();
        if let Some(err) = &state.contacts_failure {
            return Err(err.clone());
        }

        let wanted = |key: &str| {
            let iface = key.split('/').next().unwrap_or_default();
            iface == interfaces::CONNECTION || contact_interfaces.iter().any(|i| i == iface)
        };

        Ok(handles
            .iter()
            .filter_map(|handle| {
                state.contacts.get(handle).map(|attrs| {
                    let filtered = attrs
                        .iter()
                        .filter(|(key, _)| wanted(key))
                        .map(|(key, value)| (key.clone(), value.clone()))
                        .collect();
                    (*handle, filtered)
                })
            })
            .collect())
    }
}
