//! Message bus abstraction.
//!
//! The provisioner talks to nodes through a subject-based publish/subscribe
//! bus with reply inboxes. [`LocalBus`] is an in-process implementation
//! used by tests and single-process deployments.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

/// Errors from bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus connection closed")]
    Closed,

    #[error("Invalid subject: {0}")]
    InvalidSubject(String),
}

/// One delivered message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub subject: String,
    pub payload: Vec<u8>,
    /// Where the sender expects a reply, if anywhere.
    pub reply_to: Option<String>,
}

/// Identifies a subscription for [`MessageBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A live subscription: its id and the stream of matching messages.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub messages: mpsc::UnboundedReceiver<Envelope>,
}

/// Subject-based publish/subscribe with reply inboxes.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish to every subscriber of `subject`.
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        reply_to: Option<String>,
    ) -> Result<(), BusError>;

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError>;

    /// A fresh subject no one else uses, for request replies.
    fn new_inbox(&self) -> String;
}

type Subscribers = Vec<(SubscriptionId, mpsc::UnboundedSender<Envelope>)>;

/// In-process bus. Subjects match exactly; no wildcards.
#[derive(Default)]
pub struct LocalBus {
    subjects: Mutex<HashMap<String, Subscribers>>,
    next_id: AtomicU64,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `subject`.
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.subjects
            .lock()
            .get(subject)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        reply_to: Option<String>,
    ) -> Result<(), BusError> {
        if subject.is_empty() {
            return Err(BusError::InvalidSubject(subject.to_string()));
        }
        let mut subjects = self.subjects.lock();
        let Some(subscribers) = subjects.get_mut(subject) else {
            trace!(subject, "No subscribers");
            return Ok(());
        };
        let envelope = Envelope {
            subject: subject.to_string(),
            payload,
            reply_to,
        };
        // Receivers that were dropped are pruned on the way
        subscribers.retain(|(_, tx)| tx.send(envelope.clone()).is_ok());
        if subscribers.is_empty() {
            subjects.remove(subject);
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        if subject.is_empty() {
            return Err(BusError::InvalidSubject(subject.to_string()));
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subjects
            .lock()
            .entry(subject.to_string())
            .or_default()
            .push((id, tx));
        Ok(Subscription { id, messages: rx })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        let mut subjects = self.subjects.lock();
        subjects.retain(|_, subscribers| {
            subscribers.retain(|(sub, _)| *sub != id);
            !subscribers.is_empty()
        });
        Ok(())
    }

    fn new_inbox(&self) -> String {
        format!("_INBOX.{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = LocalBus::new();
        let mut a = bus.subscribe("svc.discover").await.unwrap();
        let mut b = bus.subscribe("svc.discover").await.unwrap();
        let mut other = bus.subscribe("svc.announce").await.unwrap();

        bus.publish("svc.discover", b"hi".to_vec(), Some("_INBOX.9".into()))
            .await
            .unwrap();

        for sub in [&mut a, &mut b] {
            let env = sub.messages.recv().await.unwrap();
            assert_eq!(env.payload, b"hi");
            assert_eq!(env.reply_to.as_deref(), Some("_INBOX.9"));
        }
        assert!(other.messages.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_and_dropped_receivers() {
        let bus = LocalBus::new();
        let a = bus.subscribe("s").await.unwrap();
        let b = bus.subscribe("s").await.unwrap();
        assert_eq!(bus.subscriber_count("s"), 2);

        bus.unsubscribe(a.id).await.unwrap();
        assert_eq!(bus.subscriber_count("s"), 1);

        drop(b);
        bus.publish("s", vec![], None).await.unwrap();
        assert_eq!(bus.subscriber_count("s"), 0);
    }

    #[tokio::test]
    async fn test_inboxes_are_unique() {
        let bus = LocalBus::new();
        assert_ne!(bus.new_inbox(), bus.new_inbox());
    }
}
