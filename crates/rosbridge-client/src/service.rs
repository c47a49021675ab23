//! Service call facade.
//!
//! Calls are fire-and-forget: [`BridgeConnection::call_service`] sends a
//! `call_service` frame and returns immediately with a [`CallId`].  The next
//! `service_response` frame from the server lands in the single-slot
//! [`ServiceResponseCell`], overwriting whatever was there; the consumer polls
//! the cell with [`BridgeConnection::take_service_response`], which reads and
//! clears it atomically.
//!
//! With more than one call in flight the last response wins.  Each call's id
//! is sent on the wire, so if the server echoes it back the caller can use
//! [`ServiceResponse::answers`] to tell which call a response belongs to.
//!
//! [`BridgeConnection::call_service`]: crate::connection::BridgeConnection::call_service
//! [`BridgeConnection::take_service_response`]: crate::connection::BridgeConnection::take_service_response

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::codec::Frame;
use crate::dispatch::LatestValue;

/// Identifier threaded through a `call_service` frame's `id` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId(String);

impl CallId {
    pub fn new(service: &str) -> Self {
        Self(format!("call_service:{service}:{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the frame for one service call.
pub fn call_frame(service: &str, args: Value) -> (CallId, Frame) {
    let id = CallId::new(service);
    let frame = Frame::call_service(service, args, Some(id.as_str().to_string()));
    (id, frame)
}

/// A `service_response` received from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResponse {
    pub service: String,
    /// Raw response payload; `Null` when the server sent no `values`.
    pub values: Value,
    pub id: Option<String>,
    pub result: Option<bool>,
    pub received_at: DateTime<Utc>,
}

impl ServiceResponse {
    pub fn new(
        service: String,
        values: Option<Value>,
        id: Option<String>,
        result: Option<bool>,
    ) -> Self {
        Self {
            service,
            values: values.unwrap_or(Value::Null),
            id,
            result,
            received_at: Utc::now(),
        }
    }

    /// `true` if the server echoed `call`'s id on this response.
    pub fn answers(&self, call: &CallId) -> bool {
        self.id.as_deref() == Some(call.as_str())
    }
}

/// Single-slot holder for the most recent service response.
#[derive(Debug, Default)]
pub struct ServiceResponseCell {
    latest: LatestValue<ServiceResponse>,
}

impl ServiceResponseCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `response`, replacing any unread one.
    pub fn store(&self, response: ServiceResponse) {
        let service = response.service.clone();
        if self.latest.set(response) {
            warn!(service = %service, "unread service response overwritten");
        }
    }

    /// Read and clear the cell.
    pub fn take(&self) -> Option<ServiceResponse> {
        self.latest.take()
    }

    pub fn is_pending(&self) -> bool {
        self.latest.is_set()
    }
}
