//! Topic registry.
//!
//! Holds the closed set of [`Subscription`]s and [`Advertisement`]s that drive
//! the handshake when a connection opens and the teardown when it closes.
//! Each topic name appears at most once per side.  The registry itself does
//! not know about connection state; [`BridgeConnection`] refuses to mutate it
//! once `connect` has been called.
//!
//! [`BridgeConnection`]: crate::connection::BridgeConnection

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, TryLockError};

use rosbridge_types::{BridgeError, RosMessage, Topic};
use serde_json::Value;
use tracing::warn;

use crate::codec::Frame;

/// A decoded message whose concrete type is known only to its subscription.
pub type ErasedMessage = Box<dyn Any + Send>;

/// Type-erased decode + callback pair for one subscription.
trait InboundHandler: Send + Sync {
    fn decode(&self, raw: &Value) -> Result<ErasedMessage, BridgeError>;
    fn deliver(&self, topic: &str, message: ErasedMessage);
}

struct TypedHandler<M, F> {
    callback: Mutex<F>,
    _message: PhantomData<fn() -> M>,
}

impl<M, F> InboundHandler for TypedHandler<M, F>
where
    M: RosMessage,
    F: FnMut(M) + Send + 'static,
{
    fn decode(&self, raw: &Value) -> Result<ErasedMessage, BridgeError> {
        M::decode(raw).map(|msg| Box::new(msg) as ErasedMessage)
    }

    fn deliver(&self, topic: &str, message: ErasedMessage) {
        match message.downcast::<M>() {
            Ok(msg) => {
                // A callback that drains the queue itself may reach its own
                // topic again; that delivery is dropped rather than deadlocking.
                let mut callback = match self.callback.try_lock() {
                    Ok(guard) => guard,
                    Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                    Err(TryLockError::WouldBlock) => {
                        warn!(
                            topic = %topic,
                            "callback already running; dropping reentrant delivery"
                        );
                        return;
                    }
                };
                callback(*msg);
            }
            Err(_) => {
                warn!(topic = %topic, expected = M::TYPE_TAG, "pending message has the wrong type");
            }
        }
    }
}

/// Local interest in a topic: how to decode its payload and what to call with
/// the result.
pub struct Subscription {
    topic: String,
    type_tag: &'static str,
    handler: Box<dyn InboundHandler>,
}

impl Subscription {
    /// Subscribe to `topic`, invoking `callback` on the consumer thread for
    /// every delivered message.
    pub fn new<M, F>(topic: &Topic<M>, callback: F) -> Self
    where
        M: RosMessage,
        F: FnMut(M) + Send + 'static,
    {
        Self {
            topic: topic.name().to_string(),
            type_tag: M::TYPE_TAG,
            handler: Box::new(TypedHandler {
                callback: Mutex::new(callback),
                _message: PhantomData,
            }),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn type_tag(&self) -> &'static str {
        self.type_tag
    }

    /// Decode a raw `msg` payload into this subscription's message type.
    pub fn decode(&self, raw: &Value) -> Result<ErasedMessage, BridgeError> {
        self.handler.decode(raw)
    }

    pub(crate) fn deliver(&self, message: ErasedMessage) {
        self.handler.deliver(&self.topic, message);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("type", &self.type_tag)
            .finish_non_exhaustive()
    }
}

/// Declared intent to publish a message type on a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    topic: String,
    type_tag: &'static str,
}

impl Advertisement {
    pub fn new<M: RosMessage>(topic: &Topic<M>) -> Self {
        Self {
            topic: topic.name().to_string(),
            type_tag: M::TYPE_TAG,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn type_tag(&self) -> &'static str {
        self.type_tag
    }

    /// Encode `message` for this topic.
    ///
    /// # Errors
    ///
    /// [`BridgeError::TypeMismatch`] if `M` is not the advertised type, or
    /// [`BridgeError::Payload`] if serialisation fails.
    pub fn encode<M: RosMessage>(&self, message: &M) -> Result<Value, BridgeError> {
        if M::TYPE_TAG != self.type_tag {
            return Err(BridgeError::TypeMismatch {
                topic: self.topic.clone(),
                expected: self.type_tag.to_string(),
                actual: M::TYPE_TAG.to_string(),
            });
        }
        message.encode()
    }
}

/// The set of subscriptions and advertisements for one connection.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    subscriptions: Vec<Arc<Subscription>>,
    advertisements: Vec<Advertisement>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription.
    ///
    /// # Errors
    ///
    /// [`BridgeError::DuplicateTopic`] if the topic is already subscribed.
    pub fn add_subscription(&mut self, subscription: Subscription) -> Result<(), BridgeError> {
        if self.subscription(subscription.topic()).is_some() {
            return Err(BridgeError::DuplicateTopic(subscription.topic));
        }
        self.subscriptions.push(Arc::new(subscription));
        Ok(())
    }

    /// Register an advertisement.
    ///
    /// # Errors
    ///
    /// [`BridgeError::DuplicateTopic`] if the topic is already advertised.
    pub fn add_advertisement(&mut self, advertisement: Advertisement) -> Result<(), BridgeError> {
        if self.advertisement(advertisement.topic()).is_some() {
            return Err(BridgeError::DuplicateTopic(advertisement.topic));
        }
        self.advertisements.push(advertisement);
        Ok(())
    }

    pub fn subscription(&self, topic: &str) -> Option<&Arc<Subscription>> {
        self.subscriptions.iter().find(|s| s.topic() == topic)
    }

    pub fn advertisement(&self, topic: &str) -> Option<&Advertisement> {
        self.advertisements.iter().find(|a| a.topic() == topic)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &Arc<Subscription>> {
        self.subscriptions.iter()
    }

    pub fn advertisements(&self) -> impl Iterator<Item = &Advertisement> {
        self.advertisements.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty() && self.advertisements.is_empty()
    }

    /// Frames sent right after the socket opens: one `subscribe` per
    /// subscription, then one `advertise` per advertisement, in registration
    /// order.
    pub fn handshake_frames(&self) -> Vec<Frame> {
        self.subscriptions
            .iter()
            .map(|s| Frame::subscribe(s.topic(), s.type_tag()))
            .chain(
                self.advertisements
                    .iter()
                    .map(|a| Frame::advertise(a.topic(), a.type_tag())),
            )
            .collect()
    }

    /// Frames sent before the socket closes: the inverse of the handshake.
    pub fn teardown_frames(&self) -> Vec<Frame> {
        self.subscriptions
            .iter()
            .map(|s| Frame::unsubscribe(s.topic()))
            .chain(self.advertisements.iter().map(|a| Frame::unadvertise(a.topic())))
            .collect()
    }
}
