//! `rosbridge-types` – shared vocabulary for the rosbridge client.
//!
//! # Modules
//!
//! - [`message`] – the [`RosMessage`] capability every payload type
//!   implements, and the typed [`Topic`] handle that binds a topic name to a
//!   message type.
//! - [`std_msgs`], [`geometry_msgs`], [`nav_msgs`] – the standard payloads
//!   exchanged with the robot.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod geometry_msgs;
pub mod message;
pub mod nav_msgs;
pub mod std_msgs;

pub use message::{RosMessage, Topic};

/// Error type spanning connection lifecycle, registration, and payload
/// conversion failures.
///
/// None of these are fatal to the process: the bridge reports them to the
/// caller (or logs them on the network thread) and keeps running.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("not connected to the rosbridge server")]
    NotConnected,

    #[error("connection already started")]
    AlreadyConnected,

    #[error("subscribers and publishers must be registered before connecting")]
    RegistrationAfterConnect,

    #[error("topic {0} is already registered")]
    DuplicateTopic(String),

    #[error("no advertisement registered for topic {0}")]
    UnknownTopic(String),

    #[error("topic {topic} carries {expected}, not {actual}")]
    TypeMismatch {
        topic: String,
        expected: String,
        actual: String,
    },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("payload conversion failed: {0}")]
    Payload(String),

    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    #[error("failed to start network thread: {0}")]
    Spawn(String),
}
