//! Persistence boundary for the real-time pipeline. Concrete implementations
//! live in the gateway crate (backed by Postgres); schedulers here only ever
//! see this trait, which keeps them testable against an in-memory fake.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tutor_adapters::Stroke;
use tutor_domain::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrokeEventType {
    Draw,
    Erase,
    Voice,
}

#[derive(Debug, Clone)]
pub struct StrokeLogEntry {
    pub event_type: StrokeEventType,
    pub strokes: Vec<Stroke>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct TranscriptionUpdate {
    pub latex: String,
    pub text: String,
    pub confidence: Option<f32>,
    pub line_data: serde_json::Value,
    pub classified_diagram: bool,
}

#[derive(Debug, Clone)]
pub struct ReasoningLogEntry {
    pub session_id: String,
    pub page: i32,
    pub action: String,
    pub message: String,
    pub internal_reasoning: String,
    pub level: Option<u8>,
    pub error_type: Option<String>,
    pub delay_ms: u32,
    pub source: Option<String>,
    pub is_error_flag: bool,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Read/write access the pipeline needs from the persisted stroke log,
/// page transcription, and reasoning log tables. The core does not own this
/// schema; it only issues these typed queries.
#[async_trait]
pub trait PipelineRepository: Send + Sync {
    async fn append_stroke_log(
        &self,
        session_id: &str,
        page: i32,
        entry: StrokeLogEntry,
    ) -> Result<()>;

    /// Ordered oldest-first.
    async fn list_stroke_log(&self, session_id: &str, page: i32) -> Result<Vec<StrokeLogEntry>>;

    async fn get_transcription_text(&self, session_id: &str, page: i32) -> Result<Option<String>>;

    async fn upsert_transcription(
        &self,
        session_id: &str,
        page: i32,
        update: TranscriptionUpdate,
    ) -> Result<()>;

    async fn append_reasoning_log(&self, entry: ReasoningLogEntry) -> Result<()>;

    async fn delete_stroke_log(&self, session_id: &str, page: i32) -> Result<()>;
}
