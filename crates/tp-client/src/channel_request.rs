//! Proxy for a pending channel request

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use tp_core::{ErrorKind, Feature, Features, OperationError, Status};
use tp_readiness::{
    Introspectable, Introspectables, PendingOperation, PendingVoid, ReadinessHelper, ReadyObject,
};

use crate::interfaces;
use crate::transport::{MethodArgs, PropertyMap, Transport};

pub const FEATURE_CORE: Feature = Feature::core("Tp::ChannelRequest", 0);

const PENDING: Status = Status(0);

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelRequestDetails {
    pub account: String,
    pub user_action_time: i64,
    pub preferred_handler: String,
    pub requests: Vec<PropertyMap>,
    pub interfaces: Vec<String>,
}

struct RequestInner {
    readiness: ReadinessHelper,
    path: String,
    transport: Rc<dyn Transport>,
    details: RefCell<ChannelRequestDetails>,
}

/// A channel request handed out by the channel dispatcher
#[derive(Clone)]
pub struct ChannelRequest {
    inner: Rc<RequestInner>,
}

impl ChannelRequest {
    pub fn new(transport: Rc<dyn Transport>, object_path: impl Into<String>) -> Self {
        let path = object_path.into();
        let inner = Rc::new(RequestInner {
            readiness: ReadinessHelper::new(path.clone(), PENDING),
            path,
            transport,
            details: RefCell::new(ChannelRequestDetails::default()),
        });

        let weak = Rc::downgrade(&inner);
        let mut table = Introspectables::new();
        table.insert(
            FEATURE_CORE,
            Introspectable::new([PENDING], Features::new(), Vec::<String>::new(), move |helper| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let transport = Rc::clone(&inner.transport);
                let path = inner.path.clone();
                let weak = Rc::downgrade(&inner);
                let helper = helper.downgrade();
                tokio::task::spawn_local(async move {
                    let reply = transport.get_all(&path, interfaces::CHANNEL_REQUEST).await;
                    let (Some(inner), Some(helper)) = (weak.upgrade(), helper.upgrade()) else {
                        return;
                    };
                    match reply {
                        Ok(props) => {
                            debug!(request = %path, "Got ChannelRequest properties");
                            *inner.details.borrow_mut() = details_from(&props);
                            if let Err(err) = helper.set_introspect_succeeded(&FEATURE_CORE) {
                                warn!(error = %err, "Reporting channel request introspection result failed");
                            }
                        }
                        Err(err) => {
                            warn!(request = %path, error = %err, "Properties.GetAll(ChannelRequest) failed");
                            if let Err(err) = helper.set_introspect_failed(&FEATURE_CORE, err) {
                                warn!(error = %err, "Reporting channel request introspection result failed");
                            }
                        }
                    }
                });
            }),
        );
        if let Err(err) = inner.readiness.add_introspectables(table) {
            warn!(error = %err, "Registering channel request introspectables failed");
        }

        Self { inner }
    }

    pub fn object_path(&self) -> &str {
        &self.inner.path
    }

    pub fn details(&self) -> ChannelRequestDetails {
        if !self.is_ready(&Features::new()) {
            warn!(request = %self.inner.path, "ChannelRequest::details() used before FEATURE_CORE is ready");
        }
        self.inner.details.borrow().clone()
    }

    /// Cancel the request. The returned operation mirrors the outcome of
    /// the remote `Cancel` call.
    pub fn cancel(&self) -> PendingOperation {
        PendingOperation::chained(&self.call(interfaces::CHANNEL_REQUEST, "Cancel"))
    }

    /// Let the channel dispatcher proceed with the request
    pub fn proceed(&self) -> PendingOperation {
        self.call(interfaces::CHANNEL_REQUEST, "Proceed").into()
    }

    /// `ChannelRequest.Failed`; the request is over
    pub fn handle_failed(&self, error_name: &str, message: &str) {
        info!(request = %self.inner.path, error = error_name, "Channel request failed");
        self.inner.readiness.invalidate(OperationError::new(
            ErrorKind::from_name(error_name),
            message,
        ));
    }

    /// `ChannelRequest.Succeeded`; the request is over
    pub fn handle_succeeded(&self) {
        info!(request = %self.inner.path, "Channel request succeeded");
        self.inner
            .readiness
            .invalidate(OperationError::cancelled("channel request succeeded"));
    }

    fn call(&self, interface: &'static str, method: &'static str) -> PendingVoid {
        let transport = Rc::clone(&self.inner.transport);
        let path = self.inner.path.clone();
        PendingVoid::new(async move {
            transport
                .call_void(&path, interface, method, MethodArgs::None)
                .await
        })
    }
}

impl ReadyObject for ChannelRequest {
    fn readiness_helper(&self) -> &ReadinessHelper {
        &self.inner.readiness
    }
}

fn details_from(props: &PropertyMap) -> ChannelRequestDetails {
    let string = |name: &str| {
        props
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    ChannelRequestDetails {
        account: string("Account"),
        user_action_time: props
            .get("UserActionTime")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        preferred_handler: string("PreferredHandler"),
        requests: props
            .get("Requests")
            .and_then(Value::as_array)
            .map(|requests| {
                requests
                    .iter()
                    .filter_map(Value::as_object)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default(),
        interfaces: props
            .get("Interfaces")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    }
}
