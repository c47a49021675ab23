//! rosbridge wire codec.
//!
//! Pure conversions between JSON text frames and [`Frame`] values.  No I/O,
//! no state.  Frame shapes on the wire:
//!
//! ```text
//! {"op":"subscribe","topic":"<topic>","type":"<type>"}
//! {"op":"advertise","topic":"<topic>","type":"<type>"}
//! {"op":"unsubscribe","topic":"<topic>"}
//! {"op":"unadvertise","topic":"<topic>"}
//! {"op":"publish","topic":"<topic>","msg":<payload>}
//! {"op":"call_service","service":"<service>","args":<args>}
//! {"op":"service_response","service":"<service>","values":<payload-or-absent>}
//! ```
//!
//! `call_service` and `service_response` may additionally carry an `id`, and
//! `service_response` a `result` flag; both are omitted when absent.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use rosbridge_types::BridgeError;

/// Every `op` this codec understands.
const KNOWN_OPS: [&str; 7] = [
    "subscribe",
    "advertise",
    "unsubscribe",
    "unadvertise",
    "publish",
    "call_service",
    "service_response",
];

/// Reasons a text frame could not be turned into a [`Frame`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("empty frame")]
    Empty,

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unrecognised op {0:?}")]
    UnknownOp(String),

    #[error("frame encoding failed: {0}")]
    Encode(String),
}

impl From<CodecError> for BridgeError {
    fn from(err: CodecError) -> Self {
        BridgeError::MalformedFrame(err.to_string())
    }
}

/// One rosbridge protocol operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Frame {
    Subscribe {
        topic: String,
        #[serde(rename = "type")]
        msg_type: String,
    },
    Advertise {
        topic: String,
        #[serde(rename = "type")]
        msg_type: String,
    },
    Unsubscribe {
        topic: String,
    },
    Unadvertise {
        topic: String,
    },
    Publish {
        topic: String,
        msg: Value,
    },
    CallService {
        service: String,
        #[serde(default)]
        args: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    ServiceResponse {
        service: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        values: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<bool>,
    },
}

impl Frame {
    pub fn subscribe(topic: impl Into<String>, msg_type: impl Into<String>) -> Self {
        Frame::Subscribe {
            topic: topic.into(),
            msg_type: msg_type.into(),
        }
    }

    pub fn advertise(topic: impl Into<String>, msg_type: impl Into<String>) -> Self {
        Frame::Advertise {
            topic: topic.into(),
            msg_type: msg_type.into(),
        }
    }

    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        Frame::Unsubscribe {
            topic: topic.into(),
        }
    }

    pub fn unadvertise(topic: impl Into<String>) -> Self {
        Frame::Unadvertise {
            topic: topic.into(),
        }
    }

    pub fn publish(topic: impl Into<String>, msg: Value) -> Self {
        Frame::Publish {
            topic: topic.into(),
            msg,
        }
    }

    pub fn call_service(service: impl Into<String>, args: Value, id: Option<String>) -> Self {
        Frame::CallService {
            service: service.into(),
            args,
            id,
        }
    }

    /// The wire name of this frame's operation.
    pub fn op(&self) -> &'static str {
        match self {
            Frame::Subscribe { .. } => "subscribe",
            Frame::Advertise { .. } => "advertise",
            Frame::Unsubscribe { .. } => "unsubscribe",
            Frame::Unadvertise { .. } => "unadvertise",
            Frame::Publish { .. } => "publish",
            Frame::CallService { .. } => "call_service",
            Frame::ServiceResponse { .. } => "service_response",
        }
    }

    /// Serialise to the JSON text sent on the socket.
    pub fn encode(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(|e| CodecError::Encode(e.to_string()))
    }
}

/// Parse one inbound text frame.
///
/// Empty input, invalid JSON, and objects without a string `op` are
/// [`CodecError::Empty`] / [`CodecError::Malformed`]; a well-formed frame
/// whose `op` this codec does not model is [`CodecError::UnknownOp`] so the
/// caller can log it at a different level.
pub fn decode_frame(text: &str) -> Result<Frame, CodecError> {
    if text.trim().is_empty() {
        return Err(CodecError::Empty);
    }
    let value: Value =
        serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;
    let op = match value.get("op").and_then(Value::as_str) {
        Some(op) => op.to_string(),
        None => return Err(CodecError::Malformed("missing string field `op`".to_string())),
    };
    if !KNOWN_OPS.contains(&op.as_str()) {
        return Err(CodecError::UnknownOp(op));
    }
    serde_json::from_value(value).map_err(|e| CodecError::Malformed(format!("{op}: {e}")))
}
