//! Inbound dispatch: the handoff from the network thread to the consumer.
//!
//! [`CoalescingQueue`] is an ordered, keyed staging area holding **at most one
//! entry per key**.  Enqueuing a key that is already present replaces the
//! value in place, so the queue keeps first-arrival order across keys while
//! always carrying the newest value for each key.  Memory is bounded by the
//! number of distinct keys no matter how far the consumer lags.
//!
//! The bridge instantiates it twice:
//!
//! * [`DispatchQueue`] – one [`PendingTask`] per topic, drained once per
//!   consumer tick with [`CoalescingQueue::run_one`].
//! * [`LatestValue`] – a single-key queue used for "latest value wins" slots
//!   such as the service response cell or a camera frame handoff.
//!
//! Both operations hold the lock only for the list mutation.  Callbacks run
//! after the lock is released, on the caller's thread.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rosbridge_types::{BridgeError, RosMessage};
use serde_json::Value;
use tracing::trace;

use crate::registry::{ErasedMessage, Subscription};

/// Keyed FIFO with at most one entry per key.
pub struct CoalescingQueue<K, V> {
    entries: Mutex<VecDeque<(K, V)>>,
}

impl<K: PartialEq, V> CoalescingQueue<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    // Every mutation leaves the deque consistent, so a panic elsewhere while
    // the lock was held cannot corrupt it.
    fn lock(&self) -> MutexGuard<'_, VecDeque<(K, V)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `value` under `key`.
    ///
    /// Returns `true` when an older value for `key` was replaced (keeping its
    /// position), `false` when the entry was appended at the tail.
    pub fn enqueue(&self, key: K, value: V) -> bool {
        let mut entries = self.lock();
        if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
            return true;
        }
        entries.push_back((key, value));
        false
    }

    /// Pop the oldest-remaining key and its latest value.
    pub fn drain_one(&self) -> Option<(K, V)> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of the pending keys in drain order.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.lock().iter().map(|(k, _)| k.clone()).collect()
    }
}

impl<K: PartialEq, V> Default for CoalescingQueue<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for CoalescingQueue<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("CoalescingQueue").field("len", &len).finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Single-slot handoff
// ─────────────────────────────────────────────────────────────────────────────

/// A one-slot "latest value wins" cell.
///
/// `set` overwrites any unread value; `take` is an atomic read-and-clear.
pub struct LatestValue<T> {
    slot: CoalescingQueue<(), T>,
}

impl<T> LatestValue<T> {
    pub fn new() -> Self {
        Self {
            slot: CoalescingQueue::new(),
        }
    }

    /// Store `value`; returns `true` if an unread value was overwritten.
    pub fn set(&self, value: T) -> bool {
        self.slot.enqueue((), value)
    }

    pub fn take(&self) -> Option<T> {
        self.slot.drain_one().map(|((), value)| value)
    }

    pub fn is_set(&self) -> bool {
        !self.slot.is_empty()
    }
}

impl<T> Default for LatestValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for LatestValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatestValue")
            .field("is_set", &self.is_set())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pending tasks
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded inbound message waiting for its subscription's callback.
pub struct PendingTask {
    subscription: Arc<Subscription>,
    message: ErasedMessage,
    received_at: DateTime<Utc>,
}

impl PendingTask {
    /// Decode `raw` with `subscription`'s message type.
    pub fn decode(subscription: Arc<Subscription>, raw: &Value) -> Result<Self, BridgeError> {
        let message = subscription.decode(raw)?;
        Ok(Self {
            subscription,
            message,
            received_at: Utc::now(),
        })
    }

    pub fn topic(&self) -> &str {
        self.subscription.topic()
    }

    /// Borrow the decoded message if it is an `M`.
    pub fn message<M: RosMessage>(&self) -> Option<&M> {
        self.message.downcast_ref::<M>()
    }

    /// Hand the message to the subscription's callback.
    pub fn run(self) {
        let waited = Utc::now() - self.received_at;
        trace!(
            topic = %self.subscription.topic(),
            waited_ms = waited.num_milliseconds(),
            "running pending callback"
        );
        self.subscription.deliver(self.message);
    }
}

impl fmt::Debug for PendingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTask")
            .field("topic", &self.topic())
            .field("received_at", &self.received_at)
            .finish_non_exhaustive()
    }
}

/// Topic-keyed queue of pending callbacks.
pub type DispatchQueue = CoalescingQueue<String, PendingTask>;

impl CoalescingQueue<String, PendingTask> {
    /// Stage `task`, replacing any older task for the same topic.
    pub fn enqueue_task(&self, task: PendingTask) -> bool {
        self.enqueue(task.topic().to_string(), task)
    }

    /// Pop one task and run its callback outside the lock.
    ///
    /// Returns `true` if a callback ran.
    pub fn run_one(&self) -> bool {
        match self.drain_one() {
            Some((_, task)) => {
                task.run();
                true
            }
            None => false,
        }
    }
}
