use async_trait::async_trait;
use tutor_domain::error::Result;

#[derive(Debug, Clone, Default)]
pub struct ProblemPart {
    pub label: String,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProblemRow {
    pub stem: String,
    pub parts: Vec<ProblemPart>,
}

#[derive(Debug, Clone, Default)]
pub struct AnswerKeyRow {
    /// Empty label means "unscoped" (applies when the problem has no parts).
    pub part_label: String,
    pub answer: String,
}

#[derive(Debug, Clone, Default)]
pub struct PageTranscriptionRow {
    pub text: String,
    pub line_data: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ReasoningLogRow {
    pub action: String,
    pub message: String,
    pub internal_reasoning: String,
    /// `Some("voice_question")` for voice answers, `None` for ink-triggered decisions.
    pub source: Option<String>,
    pub is_error_flag: bool,
}

/// Read access the context assembler needs. Backed by Postgres in
/// production, faked in-memory in tests — the assembler never sees a
/// connection pool directly.
#[async_trait]
pub trait ContextRepository: Send + Sync {
    async fn get_page_transcription(
        &self,
        session_id: &str,
        page: i32,
    ) -> Result<Option<PageTranscriptionRow>>;

    async fn get_problem(
        &self,
        document_ref: &str,
        question_number: i32,
    ) -> Result<Option<ProblemRow>>;

    /// Fallback source used when the live session registry no longer holds
    /// `document_ref`/`question_number` (e.g. after a reconnect).
    async fn get_cached_question(&self, session_id: &str) -> Result<Option<(String, i32)>>;

    async fn get_answer_key(
        &self,
        document_ref: &str,
        question_number: i32,
    ) -> Result<Vec<AnswerKeyRow>>;

    async fn get_question_figures(
        &self,
        document_ref: &str,
        question_number: i32,
    ) -> Result<Vec<Vec<u8>>>;

    async fn get_recent_reasoning_logs(
        &self,
        session_id: &str,
        page: i32,
        limit: i64,
    ) -> Result<Vec<ReasoningLogRow>>;

    /// Render the page's visible strokes to an image, used when the
    /// transcription row exists but has no text (diagram mode or a
    /// low-confidence classification).
    async fn render_page_image(&self, session_id: &str, page: i32) -> Result<Option<Vec<u8>>>;
}
