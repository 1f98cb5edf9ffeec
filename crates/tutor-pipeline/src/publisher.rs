//! Event publisher (component C). Per-session fanout over server-push
//! streams. Delivery is at-most-once per subscriber and drops are
//! tolerable — clients reconcile via database reads after reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Reasoning {
        action: String,
        message: String,
        tts_id: String,
    },
}

type SubscriberId = u64;

pub struct EventPublisher {
    subscribers: Mutex<HashMap<String, Vec<(SubscriberId, mpsc::UnboundedSender<PipelineEvent>)>>>,
    next_id: AtomicU64,
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new subscriber for a session. Returns the id (needed for
    /// `detach`) and the receiving end of its queue.
    pub fn attach(&self, session_id: &str) -> (SubscriberId, mpsc::UnboundedReceiver<PipelineEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .push((id, tx));
        (id, rx)
    }

    /// Remove a subscriber, garbage-collecting the session entry when empty.
    pub fn detach(&self, session_id: &str, id: SubscriberId) {
        let mut subs = self.subscribers.lock();
        if let Some(list) = subs.get_mut(session_id) {
            list.retain(|(sub_id, _)| *sub_id != id);
            if list.is_empty() {
                subs.remove(session_id);
            }
        }
    }

    /// Enqueue onto every queue registered for `session_id`. No-op if none.
    /// Closed subscriber channels are pruned lazily.
    pub fn publish(&self, session_id: &str, event: PipelineEvent) {
        let mut subs = self.subscribers.lock();
        if let Some(list) = subs.get_mut(session_id) {
            list.retain(|(_, tx)| tx.send(event.clone()).is_ok());
            if list.is_empty() {
                subs.remove(session_id);
            }
        }
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.subscribers
            .lock()
            .get(session_id)
            .map(|list| list.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> PipelineEvent {
        PipelineEvent::Reasoning {
            action: "speak".into(),
            message: "check your sign".into(),
            tts_id: "t1".into(),
        }
    }

    #[test]
    fn publish_is_a_no_op_with_no_subscribers() {
        let pub_ = EventPublisher::new();
        pub_.publish("s1", event());
    }

    #[tokio::test]
    async fn attached_subscriber_receives_published_event() {
        let publisher = EventPublisher::new();
        let (_id, mut rx) = publisher.attach("s1");
        publisher.publish("s1", event());
        let received = rx.recv().await.unwrap();
        matches!(received, PipelineEvent::Reasoning { .. });
    }

    #[tokio::test]
    async fn publish_does_not_cross_sessions() {
        let publisher = EventPublisher::new();
        let (_id_a, mut rx_a) = publisher.attach("a");
        let (_id_b, mut rx_b) = publisher.attach("b");
        publisher.publish("a", event());
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn detach_garbage_collects_empty_session_entry() {
        let publisher = EventPublisher::new();
        let (id, _rx) = publisher.attach("s1");
        assert_eq!(publisher.subscriber_count("s1"), 1);
        publisher.detach("s1", id);
        assert_eq!(publisher.subscriber_count("s1"), 0);
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned_on_next_publish() {
        let publisher = EventPublisher::new();
        let (_id, rx) = publisher.attach("s1");
        drop(rx);
        publisher.publish("s1", event());
        assert_eq!(publisher.subscriber_count("s1"), 0);
    }

    #[tokio::test]
    async fn each_subscriber_preserves_publish_order() {
        let publisher = EventPublisher::new();
        let (_id, mut rx) = publisher.attach("s1");
        for i in 0..3 {
            publisher.publish(
                "s1",
                PipelineEvent::Reasoning {
                    action: "speak".into(),
                    message: format!("m{i}"),
                    tts_id: format!("t{i}"),
                },
            );
        }
        for i in 0..3 {
            let PipelineEvent::Reasoning { message, .. } = rx.recv().await.unwrap();
            assert_eq!(message, format!("m{i}"));
        }
    }
}
