//! The message-type capability.
//!
//! Every payload that crosses the bridge implements [`RosMessage`]: it names
//! its canonical ROS type string and converts itself to and from the JSON
//! object carried in a frame's `msg` field.  The bridge itself is generic over
//! this trait and never inspects payload internals.

use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::BridgeError;

/// A typed ROS message payload.
///
/// The default `decode` / `encode` go through `serde`, so most message types
/// only need to derive `Serialize` + `Deserialize` and name their type tag.
///
/// ```
/// use rosbridge_types::RosMessage;
/// use rosbridge_types::std_msgs::StringMsg;
///
/// let msg = StringMsg::decode(&serde_json::json!({"data": "hello"})).unwrap();
/// assert_eq!(msg.data, "hello");
/// assert_eq!(StringMsg::type_tag(), "std_msgs/String");
/// ```
pub trait RosMessage: Serialize + DeserializeOwned + Send + 'static {
    /// Canonical ROS type string, e.g. `"geometry_msgs/Twist"`.
    const TYPE_TAG: &'static str;

    fn type_tag() -> &'static str {
        Self::TYPE_TAG
    }

    /// Convert a raw `msg` payload into the typed message.
    fn decode(raw: &Value) -> Result<Self, BridgeError> {
        serde_json::from_value(raw.clone()).map_err(|e| {
            BridgeError::Payload(format!("{}: {e}", Self::TYPE_TAG))
        })
    }

    /// Convert the typed message into a raw `msg` payload.
    fn encode(&self) -> Result<Value, BridgeError> {
        serde_json::to_value(self).map_err(|e| {
            BridgeError::Payload(format!("{}: {e}", Self::TYPE_TAG))
        })
    }
}

/// A topic name bound to the message type it carries.
///
/// ```
/// use rosbridge_types::Topic;
/// use rosbridge_types::geometry_msgs::Twist;
///
/// let cmd_vel = Topic::<Twist>::new("/cmd_vel");
/// assert_eq!(cmd_vel.name(), "/cmd_vel");
/// assert_eq!(cmd_vel.type_tag(), "geometry_msgs/Twist");
/// ```
pub struct Topic<M> {
    name: String,
    _message: PhantomData<fn() -> M>,
}

impl<M: RosMessage> Topic<M> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _message: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_tag(&self) -> &'static str {
        M::TYPE_TAG
    }
}

// Manual impls: `M` itself need not be `Clone` / `Debug`.
impl<M> Clone for Topic<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _message: PhantomData,
        }
    }
}

impl<M: RosMessage> fmt::Debug for Topic<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("type", &M::TYPE_TAG)
            .finish()
    }
}
