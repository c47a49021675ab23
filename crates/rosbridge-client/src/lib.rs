//! `rosbridge-client` – WebSocket client for a rosbridge server.
//!
//! Lets a non-ROS application exchange typed messages with a ROS robot over a
//! rosbridge JSON socket: subscribe to robot topics, advertise and publish
//! its own, and issue service calls.  Inbound traffic is decoded on a
//! dedicated network thread and handed to the application's own loop, which
//! runs callbacks one at a time on its own thread.
//!
//! # Modules
//!
//! - [`codec`] – JSON frame encoding and decoding for the seven protocol ops.
//! - [`registry`] – the subscriptions and advertisements replayed on connect.
//! - [`dispatch`] – the coalescing handoff between the network thread and the
//!   consumer thread.
//! - [`service`] – fire-and-forget service calls and the single-slot response
//!   cell.
//! - [`connection`] – the connection manager tying the above together.

pub mod codec;
pub mod connection;
pub mod dispatch;
pub mod registry;
pub mod service;

pub use codec::{CodecError, Frame, decode_frame};
pub use connection::{
    BridgeConfig, BridgeConnection, ConnectionState, DEFAULT_HOST, DEFAULT_PORT, DisconnectOutcome,
};
pub use dispatch::{CoalescingQueue, DispatchQueue, LatestValue, PendingTask};
pub use registry::{Advertisement, Subscription, TopicRegistry};
pub use service::{CallId, ServiceResponse, ServiceResponseCell};

pub use rosbridge_types::{BridgeError, RosMessage, Topic};
