//! Topic-scoped, in-process broadcast bus.
//!
//! Delivery is ordered per topic and reaches every live subscriber of that
//! topic, including one held by the publisher itself. Consumers that must
//! ignore their own traffic filter on a sender tag carried in the payload.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;

const TOPIC_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("bus channel closed")]
    Closed,
    #[error("subscriber lagged behind by {0} messages")]
    Lagged(u64),
    #[error("bus transport error: {0}")]
    Transport(String),
}

pub type BusResult<T> = Result<T, BusError>;

pub trait Bus: Send + Sync {
    fn subscribe(&self, topic: &str) -> Subscription;
    /// Returns the number of subscribers the payload was handed to.
    fn publish(&self, topic: &str, payload: Bytes) -> BusResult<usize>;
}

/// Receiving half of a topic subscription.
#[derive(Debug)]
pub struct Subscription {
    rx: Option<broadcast::Receiver<BusMessage>>,
}

impl Subscription {
    fn open(rx: broadcast::Receiver<BusMessage>) -> Self {
        Self { rx: Some(rx) }
    }

    fn closed() -> Self {
        Self { rx: None }
    }

    pub fn is_closed(&self) -> bool {
        self.rx.is_none()
    }

    /// Waits for the next message. Returns `Closed` once the subscription or
    /// the bus behind it is gone.
    pub async fn recv(&mut self) -> BusResult<BusMessage> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(BusError::Closed);
        };
        match rx.recv().await {
            Ok(message) => Ok(message),
            Err(broadcast::error::RecvError::Lagged(skipped)) => Err(BusError::Lagged(skipped)),
            Err(broadcast::error::RecvError::Closed) => {
                self.rx = None;
                Err(BusError::Closed)
            }
        }
    }

    /// Unsubscribes. Safe to call any number of times.
    pub fn close(&mut self) {
        self.rx = None;
    }
}

/// In-memory bus shared by every participant of one process.
#[derive(Debug, Default)]
pub struct LocalBus {
    topics: RwLock<HashMap<String, broadcast::Sender<BusMessage>>>,
    shut_down: RwLock<bool>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every topic. Live subscriptions observe `Closed` and later
    /// publishes fail.
    pub fn shutdown(&self) {
        *self.shut_down.write() = true;
        self.topics.write().clear();
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Bus for LocalBus {
    /// Topics live while they have subscribers; dead ones are pruned here
    /// and on publish.
    fn subscribe(&self, topic: &str) -> Subscription {
        if *self.shut_down.read() {
            return Subscription::closed();
        }
        let mut topics = self.topics.write();
        topics.retain(|_, sender| sender.receiver_count() > 0);
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0);
        Subscription::open(sender.subscribe())
    }

    fn publish(&self, topic: &str, payload: Bytes) -> BusResult<usize> {
        if *self.shut_down.read() {
            return Err(BusError::Closed);
        }
        let Some(sender) = self.topics.read().get(topic).cloned() else {
            return Ok(0);
        };
        let message = BusMessage {
            topic: topic.to_string(),
            payload,
        };
        match sender.send(message) {
            Ok(delivered) => Ok(delivered),
            Err(_) => {
                // No live subscriber: the message reaches nobody.
                let mut topics = self.topics.write();
                if topics.get(topic).is_some_and(|s| s.receiver_count() == 0) {
                    topics.remove(topic);
                }
                Ok(0)
            }
        }
    }
}
