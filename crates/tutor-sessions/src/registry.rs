//! Session registry (component B): `Connect`, `Disconnect`, `Touch`, `Get`,
//! `SetActivePart`, `SetContentMode`.
//!
//! `Connect` evicts every other record — this is a single-active-session
//! design appropriate to one student per process (see DESIGN.md for why this
//! rule is kept rather than dropped for multi-tenant serving).

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tutor_domain::trace::TraceEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentMode {
    Math,
    Diagram,
}

impl Default for ContentMode {
    fn default() -> Self {
        ContentMode::Math
    }
}

#[derive(Debug, Clone)]
struct SessionRecord {
    document_ref: Option<String>,
    question_number: Option<i32>,
    active_part: Option<String>,
    content_mode: ContentMode,
    last_seen: DateTime<Utc>,
}

/// An immutable point-in-time copy of a session record. `Get` always returns
/// one of these rather than a live reference, so callers never race with a
/// concurrent mutation.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub document_ref: Option<String>,
    pub question_number: Option<i32>,
    pub active_part: Option<String>,
    pub content_mode: ContentMode,
    pub last_seen: DateTime<Utc>,
}

/// Metadata supplied on connect.
#[derive(Debug, Clone, Default)]
pub struct ConnectMeta {
    pub document_ref: Option<String>,
    pub question_number: Option<i32>,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Connect a session id, evicting every other active record.
    /// Returns the ids that were evicted.
    pub fn connect(&self, session_id: &str, meta: ConnectMeta) -> Vec<String> {
        let mut sessions = self.sessions.write();
        let evicted: Vec<String> = sessions
            .keys()
            .filter(|id| id.as_str() != session_id)
            .cloned()
            .collect();
        for id in &evicted {
            sessions.remove(id);
        }

        sessions.insert(
            session_id.to_string(),
            SessionRecord {
                document_ref: meta.document_ref,
                question_number: meta.question_number,
                active_part: None,
                content_mode: ContentMode::Math,
                last_seen: Utc::now(),
            },
        );

        TraceEvent::SessionConnected {
            session_id: session_id.to_string(),
            evicted: evicted.clone(),
        }
        .emit();

        evicted
    }

    pub fn disconnect(&self, session_id: &str) {
        self.sessions.write().remove(session_id);
        TraceEvent::SessionDisconnected {
            session_id: session_id.to_string(),
        }
        .emit();
    }

    pub fn touch(&self, session_id: &str) {
        if let Some(record) = self.sessions.write().get_mut(session_id) {
            record.last_seen = Utc::now();
        }
    }

    pub fn get(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.sessions.read().get(session_id).map(|r| SessionSnapshot {
            session_id: session_id.to_string(),
            document_ref: r.document_ref.clone(),
            question_number: r.question_number,
            active_part: r.active_part.clone(),
            content_mode: r.content_mode,
            last_seen: r.last_seen,
        })
    }

    /// `None` preserves the existing value.
    pub fn set_active_part(&self, session_id: &str, label: Option<String>) {
        if label.is_none() {
            return;
        }
        if let Some(record) = self.sessions.write().get_mut(session_id) {
            record.active_part = label;
        }
    }

    /// `None` preserves the existing value.
    pub fn set_content_mode(&self, session_id: &str, mode: Option<ContentMode>) {
        let Some(mode) = mode else { return };
        if let Some(record) = self.sessions.write().get_mut(session_id) {
            record.content_mode = mode;
        }
    }

    pub fn is_connected(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }
}
