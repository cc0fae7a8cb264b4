//! In-memory message bus for tests/dev.

use std::sync::{Mutex, mpsc};

use async_trait::async_trait;

use crate::bus::{BusError, MessageBus, Subscription};

/// A message accepted by the in-memory bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct Inner {
    published: Vec<PublishedMessage>,
    subscribers: Vec<mpsc::Sender<PublishedMessage>>,
    fail_next: usize,
    unavailable: bool,
}

/// In-memory bus.
///
/// - Records every accepted message (inspect with `published()`)
/// - Best-effort fan-out to subscribers
/// - Failure injection: `fail_next(n)` rejects the next `n` publishes,
///   `set_unavailable(true)` rejects every publish until cleared
#[derive(Debug, Default)]
pub struct InMemoryMessageBus {
    inner: Mutex<Inner>,
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription<PublishedMessage> {
        let (tx, rx) = mpsc::channel();

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages.
        if let Ok(mut inner) = self.inner.lock() {
            inner.subscribers.push(tx);
        }

        Subscription::new(rx)
    }

    /// Snapshot of every message accepted so far, in publish order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.inner
            .lock()
            .map(|inner| inner.published.clone())
            .unwrap_or_default()
    }

    pub fn fail_next(&self, count: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_next = count;
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.unavailable = unavailable;
        }
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), BusError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| BusError::Unavailable("lock poisoned".to_string()))?;

        if inner.unavailable {
            return Err(BusError::Unavailable("bus marked unavailable".to_string()));
        }
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(BusError::Rejected("injected publish failure".to_string()));
        }

        let message = PublishedMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_vec(),
        };

        // Drop any dead subscribers while publishing.
        inner.subscribers.retain(|tx| tx.send(message.clone()).is_ok());
        inner.published.push(message);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_fans_out() {
        let bus = InMemoryMessageBus::new();
        let sub = bus.subscribe();

        bus.publish("t", "1", b"hello").await.unwrap();

        assert_eq!(bus.published().len(), 1);
        let got = sub.try_recv().unwrap();
        assert_eq!(got.topic, "t");
        assert_eq!(got.key, "1");
        assert_eq!(got.payload, b"hello");
    }

    #[tokio::test]
    async fn injected_failures_are_not_recorded() {
        let bus = InMemoryMessageBus::new();
        bus.fail_next(1);

        assert!(matches!(bus.publish("t", "1", b"a").await, Err(BusError::Rejected(_))));
        bus.publish("t", "1", b"b").await.unwrap();

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload, b"b");

        bus.set_unavailable(true);
        assert!(matches!(bus.publish("t", "1", b"c").await, Err(BusError::Unavailable(_))));
    }
}
