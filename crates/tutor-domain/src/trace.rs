use serde::Serialize;

/// Structured trace events emitted across the tutoring pipeline as single
/// JSON log lines, one per scheduler transition or external call.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    TranscriptionScheduled {
        session_id: String,
        page: i32,
    },
    TranscriptionSkippedUnchanged {
        session_id: String,
        page: i32,
    },
    TranscriptionCompleted {
        session_id: String,
        page: i32,
        confidence: Option<f32>,
        classified_diagram: bool,
    },
    TranscriptionFailed {
        session_id: String,
        page: i32,
        reason: String,
    },
    ReasoningDebounced {
        session_id: String,
        page: i32,
    },
    ReasoningDecided {
        session_id: String,
        page: i32,
        action: String,
        delay_ms: u32,
        source: Option<String>,
    },
    ReasoningSuperseded {
        session_id: String,
        page: i32,
        stage: String,
    },
    ReasoningPublished {
        session_id: String,
        page: i32,
        tts_id: String,
    },
    TtsHandleRegistered {
        tts_id: String,
        kind: &'static str,
    },
    TtsHandleTaken {
        tts_id: String,
    },
    TtsHandleEvicted {
        tts_id: String,
    },
    AdapterCall {
        service: String,
        op: String,
        duration_ms: u64,
        ok: bool,
    },
    SessionConnected {
        session_id: String,
        evicted: Vec<String>,
    },
    SessionDisconnected {
        session_id: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "tutor_event");
    }
}
