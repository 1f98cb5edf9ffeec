//! TTS stream registry (component D). Opaque 128-bit handles map to either a
//! fixed string (a coaching message) or a sentence-stream producer. Handles
//! are consumed destructively on first fetch; a background sweeper evicts
//! anything older than `ttl`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One sentence produced by the voice-question pipeline, or the terminal
/// sentinel marking the end of the stream.
#[derive(Debug, Clone)]
pub enum SentenceEvent {
    Sentence(String),
    Done,
}

pub enum TtsPayload {
    Fixed(String),
    Stream(mpsc::UnboundedReceiver<SentenceEvent>),
}

struct Entry {
    payload: Option<TtsPayload>,
    created_at: Instant,
}

pub struct TtsRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
}

impl TtsRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Register a fixed coaching message. Returns its handle id.
    pub fn register_text(&self, text: impl Into<String>) -> String {
        let id = Uuid::new_v4().to_string();
        self.entries.lock().insert(
            id.clone(),
            Entry {
                payload: Some(TtsPayload::Fixed(text.into())),
                created_at: Instant::now(),
            },
        );
        id
    }

    /// Register a stream-backed handle. Returns the handle id and the sender
    /// half the voice-question pipeline writes sentences into.
    pub fn register_stream(&self) -> (String, mpsc::UnboundedSender<SentenceEvent>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.entries.lock().insert(
            id.clone(),
            Entry {
                payload: Some(TtsPayload::Stream(rx)),
                created_at: Instant::now(),
            },
        );
        (id, tx)
    }

    /// Remove and return the payload. `None` if the handle is unknown or
    /// already consumed.
    pub fn take(&self, id: &str) -> Option<TtsPayload> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(id)?;
        entry.payload.take()
    }

    /// Drop entries (consumed or not) older than the configured TTL.
    pub fn sweep_once(&self) {
        let ttl = self.ttl;
        self.entries
            .lock()
            .retain(|_, entry| entry.created_at.elapsed() < ttl);
    }

    pub async fn spawn_sweeper(self: std::sync::Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.sweep_once();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_text_then_take_returns_fixed_payload() {
        let registry = TtsRegistry::new(Duration::from_secs(300));
        let id = registry.register_text("hello");
        match registry.take(&id) {
            Some(TtsPayload::Fixed(text)) => assert_eq!(text, "hello"),
            _ => panic!("expected fixed payload"),
        }
    }

    #[test]
    fn take_is_destructive() {
        let registry = TtsRegistry::new(Duration::from_secs(300));
        let id = registry.register_text("hello");
        assert!(registry.take(&id).is_some());
        assert!(registry.take(&id).is_none());
    }

    #[test]
    fn take_unknown_handle_returns_none() {
        let registry = TtsRegistry::new(Duration::from_secs(300));
        assert!(registry.take("does-not-exist").is_none());
    }

    #[tokio::test]
    async fn register_stream_sender_feeds_the_taken_receiver() {
        let registry = TtsRegistry::new(Duration::from_secs(300));
        let (id, tx) = registry.register_stream();
        tx.send(SentenceEvent::Sentence("first.".into())).unwrap();
        tx.send(SentenceEvent::Done).unwrap();

        match registry.take(&id) {
            Some(TtsPayload::Stream(mut rx)) => {
                match rx.recv().await.unwrap() {
                    SentenceEvent::Sentence(s) => assert_eq!(s, "first."),
                    SentenceEvent::Done => panic!("expected sentence first"),
                }
                matches!(rx.recv().await.unwrap(), SentenceEvent::Done);
            }
            _ => panic!("expected stream payload"),
        }
    }

    #[test]
    fn sweep_evicts_expired_entries() {
        let registry = TtsRegistry::new(Duration::from_millis(0));
        registry.register_text("stale");
        std::thread::sleep(Duration::from_millis(5));
        registry.sweep_once();
        assert!(registry.is_empty());
    }

    #[test]
    fn sweep_keeps_fresh_entries() {
        let registry = TtsRegistry::new(Duration::from_secs(300));
        registry.register_text("fresh");
        registry.sweep_once();
        assert_eq!(registry.len(), 1);
    }
}
