//! Remote call boundary
//!
//! Proxies never talk to the bus directly. They go through a [`Transport`],
//! which answers the handful of calls the readiness routines need. The
//! [`DbusTransport`] implementation issues them with zbus; tests and
//! offline tools use [`crate::memory::MemoryTransport`].

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use zbus::zvariant::{DynamicType, OwnedValue, Value as ZValue};
use zbus::Connection;

use tp_core::{BusType, ClientConfig, Error, ErrorKind, OperationError};

use crate::interfaces;

/// Property or attribute map with D-Bus values converted to JSON
pub type PropertyMap = serde_json::Map<String, Value>;

/// Argument shapes of the no-reply calls proxies issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodArgs {
    None,
    /// `au`
    Handles(Vec<u32>),
    /// `(uu)`
    Pair(u32, u32),
}

/// One entry of `StreamedMedia.ListStreams`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    pub id: u32,
    pub contact: u32,
    pub kind: u32,
    pub state: u32,
    pub direction: u32,
    pub pending_send: u32,
}

impl From<(u32, u32, u32, u32, u32, u32)> for StreamInfo {
    fn from((id, contact, kind, state, direction, pending_send): (u32, u32, u32, u32, u32, u32)) -> Self {
        Self {
            id,
            contact,
            kind,
            state,
            direction,
            pending_send,
        }
    }
}

/// Calls the proxies make against the remote service
#[async_trait(?Send)]
pub trait Transport {
    /// `org.freedesktop.DBus.Properties.GetAll`
    async fn get_all(&self, path: &str, interface: &str) -> Result<PropertyMap, OperationError>;

    /// A method call whose reply carries nothing
    async fn call_void(
        &self,
        path: &str,
        interface: &str,
        method: &str,
        args: MethodArgs,
    ) -> Result<(), OperationError>;

    /// `Channel.Type.StreamedMedia.ListStreams`
    async fn list_streams(&self, channel_path: &str) -> Result<Vec<StreamInfo>, OperationError>;

    /// `Channel.Interface.Hold.GetHoldState`, as (state, reason)
    async fn get_hold_state(&self, channel_path: &str) -> Result<(u32, u32), OperationError>;

    /// `Connection.Interface.Contacts.GetContactAttributes`.
    ///
    /// Handles missing from the reply are invalid.
    async fn get_contact_attributes(
        &self,
        connection_path: &str,
        handles: &[u32],
        interfaces: &[String],
    ) -> Result<BTreeMap<u32, PropertyMap>, OperationError>;
}

/// [`Transport`] over a zbus connection to a single service
#[derive(Debug, Clone)]
pub struct DbusTransport {
    connection: Connection,
    service: String,
    timeout: Duration,
}

impl DbusTransport {
    pub fn new(connection: Connection, service: impl Into<String>, timeout: Duration) -> Self {
        Self {
            connection,
            service: service.into(),
            timeout,
        }
    }

    /// Connect to the configured bus and target the configured service
    pub async fn connect(config: &ClientConfig) -> tp_core::Result<Self> {
        let service = config
            .service
            .clone()
            .ok_or_else(|| Error::invalid_argument("no service configured (set TP_SERVICE)"))?;

        let connection = match config.bus_type {
            BusType::System => Connection::system().await?,
            BusType::Session => Connection::session().await?,
        };
        info!(bus = %config.bus_type, service = %service, "Connected to bus");

        Ok(Self::new(connection, service, config.call_timeout()))
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    async fn call<B>(
        &self,
        path: &str,
        interface: &str,
        method: &str,
        body: &B,
    ) -> Result<zbus::message::Message, OperationError>
    where
        B: Serialize + DynamicType,
    {
        debug!(service = %self.service, path, interface, method, "D-Bus call");

        let call = self.connection.call_method(
            Some(self.service.as_str()),
            path,
            Some(interface),
            method,
            body,
        );

        match tokio::time::timeout(self.timeout, call).await {
            Ok(reply) => reply.map_err(OperationError::from),
            Err(_) => Err(OperationError::new(
                ErrorKind::Remote(ErrorKind::DBUS_NO_REPLY.into()),
                format!(
                    "{}.{} on {} timed out after {:?}",
                    interface, method, path, self.timeout
                ),
            )),
        }
    }
}

#[async_trait(?Send)]
impl Transport for DbusTransport {
    async fn get_all(&self, path: &str, interface: &str) -> Result<PropertyMap, OperationError> {
        let reply = self
            .call(path, interfaces::PROPERTIES, "GetAll", &(interface,))
            .await?;
        let props: HashMap<String, OwnedValue> = reply.body().deserialize()?;
        Ok(props_to_json(props))
    }

    async fn call_void(
        &self,
        path: &str,
        interface: &str,
        method: &str,
        args: MethodArgs,
    ) -> Result<(), OperationError> {
        match args {
            MethodArgs::None => self.call(path, interface, method, &()).await?,
            MethodArgs::Handles(handles) => self.call(path, interface, method, &(handles,)).await?,
            MethodArgs::Pair(a, b) => self.call(path, interface, method, &(a, b)).await?,
        };
        Ok(())
    }

    async fn list_streams(&self, channel_path: &str) -> Result<Vec<StreamInfo>, OperationError> {
        let reply = self
            .call(
                channel_path,
                interfaces::CHANNEL_TYPE_STREAMED_MEDIA,
                "ListStreams",
                &(),
            )
            .await?;
        let streams: Vec<(u32, u32, u32, u32, u32, u32)> = reply.body().deserialize()?;
        Ok(streams.into_iter().map(StreamInfo::from).collect())
    }

    async fn get_hold_state(&self, channel_path: &str) -> Result<(u32, u32), OperationError> {
        let reply = self
            .call(
                channel_path,
                interfaces::CHANNEL_INTERFACE_HOLD,
                "GetHoldState",
                &(),
            )
            .await?;
        Ok(reply.body().deserialize()?)
    }

    async fn get_contact_attributes(
        &self,
        connection_path: &str,
        handles: &[u32],
        contact_interfaces: &[String],
    ) -> Result<BTreeMap<u32, PropertyMap>, OperationError> {
        let reply = self
            .call(
                connection_path,
                interfaces::CONNECTION_CONTACTS,
                "GetContactAttributes",
                &(handles.to_vec(), contact_interfaces.to_vec(), false),
            )
            .await?;
        let attributes: HashMap<u32, HashMap<String, OwnedValue>> = reply.body().deserialize()?;
        Ok(attributes
            .into_iter()
            .map(|(handle, attrs)| (handle, props_to_json(attrs)))
            .collect())
    }
}

fn props_to_json(props: HashMap<String, OwnedValue>) -> PropertyMap {
    props
        .into_iter()
        .map(|(name, value)| {
            let value = value_to_json(&value);
            (name, value)
        })
        .collect()
}

/// Convert a D-Bus value to JSON. Variants are unwrapped, structs become
/// arrays and dict keys are stringified.
pub fn value_to_json(value: &ZValue<'_>) -> Value {
    match value {
        ZValue::U8(n) => json!(*n),
        ZValue::Bool(b) => json!(*b),
        ZValue::I16(n) => json!(*n),
        ZValue::U16(n) => json!(*n),
        ZValue::I32(n) => json!(*n),
        ZValue::U32(n) => json!(*n),
        ZValue::I64(n) => json!(*n),
        ZValue::U64(n) => json!(*n),
        ZValue::F64(n) => json!(*n),
        ZValue::Str(s) => json!(s.as_str()),
        ZValue::Signature(s) => json!(s.to_string()),
        ZValue::ObjectPath(p) => json!(p.as_str()),
        ZValue::Value(inner) => value_to_json(inner),
        ZValue::Array(arr) => Value::Array(arr.iter().map(value_to_json).collect()),
        ZValue::Dict(dict) => {
            let mut map = serde_json::Map::new();
            for (k, v) in dict.iter() {
                let key = match value_to_json(k) {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                map.insert(key, value_to_json(v));
            }
            Value::Object(map)
        }
        ZValue::Structure(s) => Value::Array(s.fields().iter().map(value_to_json).collect()),
        ZValue::Fd(_) => json!("<file descriptor>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zbus::zvariant::{ObjectPath, Structure};

    #[test]
    fn test_value_to_json_scalars_and_variants() {
        assert_eq!(value_to_json(&ZValue::U32(7)), json!(7));
        assert_eq!(value_to_json(&ZValue::from("audio")), json!("audio"));
        assert_eq!(
            value_to_json(&ZValue::Value(Box::new(ZValue::Bool(true)))),
            json!(true)
        );
        let path = ObjectPath::try_from("/org/example/Channel1").unwrap();
        assert_eq!(
            value_to_json(&ZValue::ObjectPath(path)),
            json!("/org/example/Channel1")
        );
    }

    #[test]
    fn test_value_to_json_structures_and_dicts() {
        let presence = ZValue::Structure(Structure::from((2u32, "available", "at work")));
        assert_eq!(value_to_json(&presence), json!([2, "available", "at work"]));

        let mut senders = HashMap::new();
        senders.insert(5u32, 1u32);
        let dict = ZValue::from(senders);
        assert_eq!(value_to_json(&dict), json!({"5": 1}));
    }

    #[test]
    fn test_stream_info_from_tuple() {
        let info = StreamInfo::from((3, 12, 1, 2, 3, 0));
        assert_eq!(info.id, 3);
        assert_eq!(info.contact, 12);
        assert_eq!(info.kind, 1);
        assert_eq!(info.direction, 3);
    }
}
