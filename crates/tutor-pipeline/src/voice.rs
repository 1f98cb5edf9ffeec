//! Voice-question pipeline (component G). Registers a stream-backed TTS
//! handle and publishes it immediately, then streams the LLM's answer,
//! cutting sentences off the token stream as they complete so the client's
//! audio starts well before generation finishes.

use std::sync::Arc;

use futures_util::StreamExt;
use tutor_adapters::{GenerateRequest, LlmAdapter};
use tutor_context::{build_context, ContextRepository};
use tutor_domain::stream::StreamEvent;
use tutor_domain::trace::TraceEvent;
use tutor_sessions::SessionRegistry;

use crate::message_extract::{cut_sentence, strip_trailing_json_punctuation, MessageFieldExtractor};
use crate::prompts::{REASONING_SYSTEM_PROMPT, VOICE_QUESTION_ADDENDUM};
use crate::publisher::{EventPublisher, PipelineEvent};
use crate::repository::{PipelineRepository, ReasoningLogEntry};
use crate::transcription::TranscriptionScheduler;
use crate::tts_registry::{SentenceEvent, TtsRegistry};

use crate::decision::reasoning_schema;

pub struct VoiceQuestionPipeline {
    transcription: Arc<TranscriptionScheduler>,
    context_repo: Arc<dyn ContextRepository>,
    pipeline_repo: Arc<dyn PipelineRepository>,
    llm: Arc<dyn LlmAdapter>,
    tts: Arc<TtsRegistry>,
    publisher: Arc<EventPublisher>,
    sessions: Arc<SessionRegistry>,
}

impl VoiceQuestionPipeline {
    pub fn new(
        transcription: Arc<TranscriptionScheduler>,
        context_repo: Arc<dyn ContextRepository>,
        pipeline_repo: Arc<dyn PipelineRepository>,
        llm: Arc<dyn LlmAdapter>,
        tts: Arc<TtsRegistry>,
        publisher: Arc<EventPublisher>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            transcription,
            context_repo,
            pipeline_repo,
            llm,
            tts,
            publisher,
            sessions,
        }
    }

    /// Entry point: `AskQuestion`. Returns the tts_id immediately; the
    /// answer is produced by a spawned background task.
    pub fn ask_question(self: &Arc<Self>, session_id: String, page: i32, question_text: String) -> String {
        let (tts_id, tx) = self.tts.register_stream();
        TraceEvent::TtsHandleRegistered {
            tts_id: tts_id.clone(),
            kind: "stream",
        }
        .emit();

        self.publisher.publish(
            &session_id,
            PipelineEvent::Reasoning {
                action: "speak".into(),
                message: String::new(),
                tts_id: tts_id.clone(),
            },
        );

        let this = self.clone();
        tokio::spawn(async move {
            this.produce(session_id, page, question_text, tx).await;
        });

        tts_id
    }

    async fn produce(
        &self,
        session_id: String,
        page: i32,
        question_text: String,
        tx: tokio::sync::mpsc::UnboundedSender<SentenceEvent>,
    ) {
        let result = self.produce_inner(&session_id, page, &question_text, &tx).await;
        if result.is_err() {
            let _ = tx.send(SentenceEvent::Done);
        }
    }

    async fn produce_inner(
        &self,
        session_id: &str,
        page: i32,
        question_text: &str,
        tx: &tokio::sync::mpsc::UnboundedSender<SentenceEvent>,
    ) -> tutor_domain::error::Result<()> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| tutor_domain::error::Error::NotFound(session_id.to_string()))?;
        let erase_snapshots = self.transcription.erase_snapshots(session_id, page);
        let context = build_context(self.context_repo.as_ref(), &session, page, &erase_snapshots).await?;

        let system = format!("{REASONING_SYSTEM_PROMPT}{VOICE_QUESTION_ADDENDUM}");
        let user = format!("{}\n\n## Student's Question\n{question_text}", context.prose);

        let req = GenerateRequest {
            system,
            user,
            images: context.images,
            schema: Some(reasoning_schema()),
            temperature: 0.2,
            model: String::new(),
        };

        let mut stream = self.llm.generate_stream(req).await?;
        let mut extractor = MessageFieldExtractor::new();
        let mut pending = String::new();
        let mut internal_reasoning_hint = String::new();

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Token { text } => {
                    let new_message = extractor.push(&text);
                    internal_reasoning_hint.push_str(&text);
                    pending.push_str(&new_message);
                    while let Some(sentence) = cut_sentence(&mut pending) {
                        let _ = tx.send(SentenceEvent::Sentence(sentence));
                    }
                }
                StreamEvent::Done { .. } => break,
                StreamEvent::Error { message } => {
                    return Err(tutor_domain::error::Error::Other(message));
                }
            }
        }

        let remainder = strip_trailing_json_punctuation(&pending);
        if !remainder.trim().is_empty() {
            let _ = tx.send(SentenceEvent::Sentence(remainder.clone()));
        }
        let _ = tx.send(SentenceEvent::Done);

        let message = strip_trailing_json_punctuation(extractor.message());
        let _ = self
            .pipeline_repo
            .append_reasoning_log(ReasoningLogEntry {
                session_id: session_id.to_string(),
                page,
                action: "speak".into(),
                message,
                internal_reasoning: internal_reasoning_hint,
                level: None,
                error_type: None,
                delay_ms: 0,
                source: Some("voice_question".into()),
                is_error_flag: false,
                prompt_tokens: 0,
                completion_tokens: 0,
            })
            .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tutor_adapters::{HrrAdapter, HrrRecognition, HrrSession, Stroke};
    use tutor_context::{AnswerKeyRow, PageTranscriptionRow, ProblemRow, ReasoningLogRow};
    use tutor_domain::error::{AdapterResult, Result};
    use tutor_domain::stream::BoxStream;
    use tutor_sessions::ConnectMeta;

    struct NoopHrr;
    #[async_trait]
    impl HrrAdapter for NoopHrr {
        async fn open_session(&self) -> AdapterResult<HrrSession> {
            unimplemented!()
        }
        async fn recognize(&self, _h: &str, _s: &[Stroke]) -> AdapterResult<HrrRecognition> {
            unimplemented!()
        }
    }

    struct StreamingLlm {
        chunks: Vec<String>,
    }

    #[async_trait]
    impl LlmAdapter for StreamingLlm {
        async fn generate(&self, _req: GenerateRequest) -> AdapterResult<String> {
            unimplemented!()
        }
        async fn generate_stream(
            &self,
            _req: GenerateRequest,
        ) -> AdapterResult<BoxStream<'static, AdapterResult<StreamEvent>>> {
            let events: Vec<AdapterResult<StreamEvent>> = self
                .chunks
                .iter()
                .cloned()
                .map(|text| Ok(StreamEvent::Token { text }))
                .chain(std::iter::once(Ok(StreamEvent::Done {
                    usage: None,
                    finish_reason: Some("stop".into()),
                })))
                .collect();
            Ok(Box::pin(futures_util::stream::iter(events)))
        }
    }

    #[derive(Default)]
    struct EmptyContextRepo;

    #[async_trait]
    impl ContextRepository for EmptyContextRepo {
        async fn get_page_transcription(&self, _s: &str, _p: i32) -> Result<Option<PageTranscriptionRow>> {
            Ok(None)
        }
        async fn get_problem(&self, _d: &str, _q: i32) -> Result<Option<ProblemRow>> {
            Ok(None)
        }
        async fn get_cached_question(&self, _s: &str) -> Result<Option<(String, i32)>> {
            Ok(None)
        }
        async fn get_answer_key(&self, _d: &str, _q: i32) -> Result<Vec<AnswerKeyRow>> {
            Ok(vec![])
        }
        async fn get_question_figures(&self, _d: &str, _q: i32) -> Result<Vec<Vec<u8>>> {
            Ok(vec![])
        }
        async fn get_recent_reasoning_logs(&self, _s: &str, _p: i32, _l: i64) -> Result<Vec<ReasoningLogRow>> {
            Ok(vec![])
        }
        async fn render_page_image(&self, _s: &str, _p: i32) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct FakePipelineRepo {
        logs: Mutex<Vec<ReasoningLogEntry>>,
    }

    #[async_trait]
    impl PipelineRepository for FakePipelineRepo {
        async fn append_stroke_log(&self, _s: &str, _p: i32, _e: crate::repository::StrokeLogEntry) -> Result<()> {
            Ok(())
        }
        async fn list_stroke_log(&self, _s: &str, _p: i32) -> Result<Vec<crate::repository::StrokeLogEntry>> {
            Ok(vec![])
        }
        async fn get_transcription_text(&self, _s: &str, _p: i32) -> Result<Option<String>> {
            Ok(None)
        }
        async fn upsert_transcription(&self, _s: &str, _p: i32, _u: crate::repository::TranscriptionUpdate) -> Result<()> {
            Ok(())
        }
        async fn append_reasoning_log(&self, entry: ReasoningLogEntry) -> Result<()> {
            self.logs.lock().push(entry);
            Ok(())
        }
        async fn delete_stroke_log(&self, _s: &str, _p: i32) -> Result<()> {
            Ok(())
        }
    }

    fn setup(chunks: Vec<&str>) -> (Arc<VoiceQuestionPipeline>, Arc<TtsRegistry>, Arc<FakePipelineRepo>) {
        let sessions = Arc::new(SessionRegistry::new());
        sessions.connect("s1", ConnectMeta::default());
        let transcription = Arc::new(TranscriptionScheduler::new(
            Arc::new(FakePipelineRepo::default()),
            Arc::new(NoopHrr),
            sessions.clone(),
            std::time::Duration::from_secs(5),
        ));
        let llm = Arc::new(StreamingLlm {
            chunks: chunks.into_iter().map(String::from).collect(),
        });
        let tts = Arc::new(TtsRegistry::new(std::time::Duration::from_secs(300)));
        let publisher = Arc::new(EventPublisher::new());
        let pipeline_repo = Arc::new(FakePipelineRepo::default());

        let pipeline = Arc::new(VoiceQuestionPipeline::new(
            transcription,
            Arc::new(EmptyContextRepo::default()),
            pipeline_repo.clone(),
            llm,
            tts.clone(),
            publisher,
            sessions,
        ));
        (pipeline, tts, pipeline_repo)
    }

    #[tokio::test]
    async fn returns_a_handle_immediately_before_generation_completes() {
        let (pipeline, tts, _repo) = setup(vec![
            r#"{"action":"speak","message": "Take the derivative. "#,
            r#"Then set it to zero."}"#,
        ]);
        let tts_id = pipeline.clone().ask_question("s1".into(), 1, "what next?".into());
        assert_eq!(tts.len(), 1);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(tts.take(&tts_id).is_some());
    }

    #[tokio::test]
    async fn streams_sentences_in_order_and_terminates_with_sentinel() {
        let (pipeline, tts, _repo) = setup(vec![
            r#"{"action":"speak","message": "First one. "#,
            r#"Second one."}"#,
        ]);
        let tts_id = pipeline.clone().ask_question("s1".into(), 1, "q".into());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let payload = tts.take(&tts_id).unwrap();
        let mut rx = match payload {
            crate::tts_registry::TtsPayload::Stream(rx) => rx,
            _ => panic!("expected stream payload"),
        };

        let first = rx.recv().await.unwrap();
        match first {
            SentenceEvent::Sentence(s) => assert_eq!(s, "First one."),
            SentenceEvent::Done => panic!("expected a sentence first"),
        }

        let mut saw_done = false;
        while let Some(event) = rx.recv().await {
            if let SentenceEvent::Done = event {
                saw_done = true;
                break;
            }
        }
        assert!(saw_done);
    }

    #[tokio::test]
    async fn logs_the_answer_with_voice_question_source() {
        let (pipeline, _tts, repo) = setup(vec![r#"{"action":"speak","message": "Answer."}"#]);
        pipeline.clone().ask_question("s1".into(), 1, "q".into());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let logs = repo.logs.lock();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].source.as_deref(), Some("voice_question"));
    }
}
