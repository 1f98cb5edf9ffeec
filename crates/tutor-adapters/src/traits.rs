use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tutor_domain::error::AdapterResult;
use tutor_domain::stream::BoxStream;
use tutor_domain::StreamEvent;

/// One ink point as drawn by the student.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StrokePoint {
    pub x: f32,
    pub y: f32,
}

/// One continuous pen-down-to-pen-up stroke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stroke {
    pub points: Vec<StrokePoint>,
}

/// A reusable handwriting-recognition session handle.
#[derive(Debug, Clone)]
pub struct HrrSession {
    pub handle: String,
    pub expires_at: DateTime<Utc>,
}

impl HrrSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// The handwriting recognition service's classification of one page of ink.
#[derive(Debug, Clone, Default)]
pub struct HrrRecognition {
    pub latex: String,
    pub text: String,
    pub confidence: f32,
    pub line_data: serde_json::Value,
    pub is_handwritten: bool,
    pub error: Option<String>,
}

/// Handwriting recognition: strokes → LaTeX + confidence.
#[async_trait]
pub trait HrrAdapter: Send + Sync {
    async fn open_session(&self) -> AdapterResult<HrrSession>;
    async fn recognize(&self, handle: &str, strokes: &[Stroke]) -> AdapterResult<HrrRecognition>;
}

/// Speech-to-text. Blocking on the remote side; callers offload to a worker.
#[async_trait]
pub trait SttAdapter: Send + Sync {
    async fn transcribe(&self, audio_bytes: &[u8]) -> AdapterResult<String>;
}

/// Reasoning/voice LLM: unary JSON generation plus a token-delta stream.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Generate a single response, honoring `schema` strictly when provided
    /// (the caller is responsible for building a schema with
    /// `additionalProperties: false` and every property required).
    async fn generate(&self, req: GenerateRequest) -> AdapterResult<String>;

    /// Stream text deltas until the model finishes or errors. Implementers
    /// must tolerate the returned stream being dropped mid-flight.
    async fn generate_stream(
        &self,
        req: GenerateRequest,
    ) -> AdapterResult<BoxStream<'static, AdapterResult<StreamEvent>>>;
}

#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub system: String,
    pub user: String,
    pub images: Vec<Vec<u8>>,
    pub schema: Option<serde_json::Value>,
    pub temperature: f32,
    pub model: String,
}

/// Text-to-speech: one sentence in, mono 24kHz signed 16-bit PCM out.
#[async_trait]
pub trait TtsAdapter: Send + Sync {
    async fn synthesize(&self, sentence: &str) -> AdapterResult<Vec<u8>>;
}
