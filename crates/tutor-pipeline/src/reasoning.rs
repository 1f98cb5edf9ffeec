//! Reasoning scheduler (component F). Debounces strokes, runs at-most-one
//! reasoning call per `(session, page)`, applies delayed delivery, and
//! discards results superseded while the call was in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tutor_adapters::{GenerateRequest, LlmAdapter};
use tutor_context::{build_context, ContextRepository};
use tutor_domain::config::TimingConfig;
use tutor_domain::trace::TraceEvent;
use tutor_sessions::SessionRegistry;

use crate::decision::{parse_decision, reasoning_schema, Action};
use crate::keymap::{page_key, TaskMap};
use crate::prompts::REASONING_SYSTEM_PROMPT;
use crate::publisher::{EventPublisher, PipelineEvent};
use crate::repository::{PipelineRepository, ReasoningLogEntry};
use crate::transcription::TranscriptionScheduler;
use crate::tts_registry::TtsRegistry;

/// Per-key generation counter. A task snapshots the value when it starts;
/// before publishing, it re-checks the slot still holds that value. This is
/// the explicit "in-flight slot identity" re-check the scheduler must do
/// independently of task cancellation, since a result can finish computing
/// in the same tick a newer schedule swaps the slot.
#[derive(Default)]
struct Generations {
    inner: Mutex<HashMap<String, Arc<AtomicU64>>>,
}

impl Generations {
    fn slot(&self, key: &str) -> Arc<AtomicU64> {
        self.inner
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone()
    }

    /// Bump the generation, returning the new value.
    fn advance(&self, key: &str) -> u64 {
        self.slot(key).fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current(&self, key: &str) -> u64 {
        self.slot(key).load(Ordering::SeqCst)
    }
}

pub struct ReasoningScheduler {
    tasks: TaskMap,
    generations: Generations,
    transcription: Arc<TranscriptionScheduler>,
    context_repo: Arc<dyn ContextRepository>,
    pipeline_repo: Arc<dyn PipelineRepository>,
    llm: Arc<dyn LlmAdapter>,
    tts: Arc<TtsRegistry>,
    publisher: Arc<EventPublisher>,
    sessions: Arc<SessionRegistry>,
    timing: TimingConfig,
    unary_timeout: Duration,
}

impl ReasoningScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transcription: Arc<TranscriptionScheduler>,
        context_repo: Arc<dyn ContextRepository>,
        pipeline_repo: Arc<dyn PipelineRepository>,
        llm: Arc<dyn LlmAdapter>,
        tts: Arc<TtsRegistry>,
        publisher: Arc<EventPublisher>,
        sessions: Arc<SessionRegistry>,
        timing: TimingConfig,
        unary_timeout: Duration,
    ) -> Self {
        Self {
            tasks: TaskMap::new(),
            generations: Generations::default(),
            transcription,
            context_repo,
            pipeline_repo,
            llm,
            tts,
            publisher,
            sessions,
            timing,
            unary_timeout,
        }
    }

    pub fn purge_session(&self, session_id: &str, pages: &[i32]) {
        for page in pages {
            let key = page_key(session_id, *page);
            self.tasks.cancel(&key);
            self.generations.advance(&key);
        }
    }

    /// Entry point: schedule a reasoning decision for `(session_id, page)`.
    /// Cancels any debouncing/running/delaying task for the same key.
    pub fn schedule_reasoning(self: &Arc<Self>, session_id: String, page: i32) {
        let key = page_key(&session_id, page);
        let generation = self.generations.advance(&key);
        TraceEvent::ReasoningDebounced {
            session_id: session_id.clone(),
            page,
        }
        .emit();

        let this = self.clone();
        let debounce = Duration::from_millis(this.timing.debounce_ms);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if this.generations.current(&page_key(&session_id, page)) != generation {
                return;
            }
            this.run(session_id, page, generation).await;
        });
        self.tasks.replace(&key, handle);
    }

    async fn run(self: &Arc<Self>, session_id: String, page: i32, generation: u64) {
        let key = page_key(&session_id, page);
        let ceiling = Duration::from_millis(self.timing.reasoning_wait_ceiling_ms);
        self.transcription.ready.wait(&key, ceiling).await;

        if self.generations.current(&key) != generation {
            TraceEvent::ReasoningSuperseded {
                session_id,
                page,
                stage: "awaiting_transcription".into(),
            }
            .emit();
            return;
        }

        let Some(session) = self.sessions.get(&session_id) else {
            return;
        };
        let erase_snapshots = self.transcription.erase_snapshots(&session_id, page);

        let context = match build_context(self.context_repo.as_ref(), &session, page, &erase_snapshots).await {
            Ok(c) => c,
            Err(_) => return,
        };

        let req = GenerateRequest {
            system: REASONING_SYSTEM_PROMPT.to_string(),
            user: context.prose,
            images: context.images,
            schema: Some(reasoning_schema()),
            temperature: 0.2,
            model: String::new(),
        };

        let result = tokio::time::timeout(self.unary_timeout, self.llm.generate(req)).await;

        if self.generations.current(&key) != generation {
            TraceEvent::ReasoningSuperseded {
                session_id,
                page,
                stage: "running".into(),
            }
            .emit();
            return;
        }

        let json_text = match result {
            Ok(Ok(text)) => text,
            _ => return,
        };

        let decision = match parse_decision(&json_text) {
            Ok(d) => d,
            Err(_) => return,
        };

        let _ = self
            .pipeline_repo
            .append_reasoning_log(ReasoningLogEntry {
                session_id: session_id.clone(),
                page,
                action: match decision.action {
                    Action::Silent => "silent".into(),
                    Action::Speak => "speak".into(),
                },
                message: decision.message.clone(),
                internal_reasoning: decision.internal_reasoning.clone(),
                level: decision.level,
                error_type: decision.error_type.clone(),
                delay_ms: decision.delay_ms,
                source: None,
                is_error_flag: decision.is_error_flag(),
                prompt_tokens: 0,
                completion_tokens: 0,
            })
            .await;

        TraceEvent::ReasoningDecided {
            session_id: session_id.clone(),
            page,
            action: match decision.action {
                Action::Silent => "silent".into(),
                Action::Speak => "speak".into(),
            },
            delay_ms: decision.delay_ms,
            source: None,
        }
        .emit();

        if decision.action == Action::Silent {
            return;
        }

        if decision.delay_ms == 0 {
            self.publish(&session_id, page, &key, generation, decision.message)
                .await;
            return;
        }

        let this = self.clone();
        let delay = Duration::from_millis(decision.delay_ms as u64);
        let delay_session = session_id.clone();
        let delay_key = key.clone();
        let message = decision.message.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if this.generations.current(&delay_key) != generation {
                TraceEvent::ReasoningSuperseded {
                    session_id: delay_session.clone(),
                    page,
                    stage: "delaying".into(),
                }
                .emit();
                return;
            }
            this.publish(&delay_session, page, &delay_key, generation, message)
                .await;
        });
        self.tasks.replace(&key, handle);
    }

    async fn publish(&self, session_id: &str, page: i32, key: &str, generation: u64, message: String) {
        if self.generations.current(key) != generation {
            return;
        }
        let tts_id = self.tts.register_text(message.clone());
        TraceEvent::TtsHandleRegistered {
            tts_id: tts_id.clone(),
            kind: "fixed",
        }
        .emit();
        self.publisher.publish(
            session_id,
            PipelineEvent::Reasoning {
                action: "speak".into(),
                message,
                tts_id: tts_id.clone(),
            },
        );
        TraceEvent::ReasoningPublished {
            session_id: session_id.to_string(),
            page,
            tts_id,
        }
        .emit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tutor_adapters::{HrrAdapter, HrrRecognition, HrrSession, Stroke};
    use tutor_context::{AnswerKeyRow, PageTranscriptionRow, ProblemRow, ReasoningLogRow};
    use tutor_domain::error::{AdapterResult, Result};
    use tutor_domain::stream::{BoxStream, StreamEvent};
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

    struct FakeLlm {
        response: String,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LlmAdapter for FakeLlm {
        async fn generate(&self, _req: GenerateRequest) -> AdapterResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
        async fn generate_stream(
            &self,
            _req: GenerateRequest,
        ) -> AdapterResult<BoxStream<'static, AdapterResult<StreamEvent>>> {
            unimplemented!()
        }
    }

    struct SlowLlm {
        response: String,
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LlmAdapter for SlowLlm {
        async fn generate(&self, _req: GenerateRequest) -> AdapterResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.response.clone())
        }
        async fn generate_stream(
            &self,
            _req: GenerateRequest,
        ) -> AdapterResult<BoxStream<'static, AdapterResult<StreamEvent>>> {
            unimplemented!()
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
        async fn append_stroke_log(
            &self,
            _s: &str,
            _p: i32,
            _e: crate::repository::StrokeLogEntry,
        ) -> Result<()> {
            Ok(())
        }
        async fn list_stroke_log(&self, _s: &str, _p: i32) -> Result<Vec<crate::repository::StrokeLogEntry>> {
            Ok(vec![])
        }
        async fn get_transcription_text(&self, _s: &str, _p: i32) -> Result<Option<String>> {
            Ok(None)
        }
        async fn upsert_transcription(
            &self,
            _s: &str,
            _p: i32,
            _u: crate::repository::TranscriptionUpdate,
        ) -> Result<()> {
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

    fn timing() -> TimingConfig {
        TimingConfig {
            debounce_ms: 10,
            reasoning_wait_ceiling_ms: 200,
            max_delay_ms: 15_000,
            tts_handle_ttl_secs: 300,
            event_keepalive_secs: 25,
        }
    }

    fn setup(
        response: &str,
    ) -> (
        Arc<ReasoningScheduler>,
        Arc<FakePipelineRepo>,
        Arc<EventPublisher>,
        Arc<TtsRegistry>,
        Arc<AtomicUsize>,
    ) {
        let sessions = Arc::new(SessionRegistry::new());
        sessions.connect("s1", ConnectMeta::default());
        let transcription = Arc::new(TranscriptionScheduler::new(
            Arc::new(FakePipelineRepo::default()),
            Arc::new(NoopHrr),
            sessions.clone(),
            Duration::from_secs(5),
        ));
        transcription.ready.reset(&page_key("s1", 1));
        transcription.ready.signal(&page_key("s1", 1));

        let calls = Arc::new(AtomicUsize::new(0));
        let llm = Arc::new(FakeLlm {
            response: response.to_string(),
            calls: calls.clone(),
        });
        let pipeline_repo = Arc::new(FakePipelineRepo::default());
        let publisher = Arc::new(EventPublisher::new());
        let tts = Arc::new(TtsRegistry::new(Duration::from_secs(300)));

        let scheduler = Arc::new(ReasoningScheduler::new(
            transcription,
            Arc::new(EmptyContextRepo::default()),
            pipeline_repo.clone(),
            llm,
            tts.clone(),
            publisher.clone(),
            sessions,
            timing(),
            Duration::from_secs(5),
        ));
        (scheduler, pipeline_repo, publisher, tts, calls)
    }

    #[tokio::test]
    async fn silent_decision_publishes_nothing() {
        let (scheduler, repo, publisher, _tts, _calls) = setup(
            r#"{"internal_reasoning":"fine. VERDICT: CONTINUE","action":"silent","level":null,"error_type":null,"delay_ms":0,"message":""}"#,
        );
        let (_id, mut rx) = publisher.attach("s1");
        scheduler.clone().schedule_reasoning("s1".into(), 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(repo.logs.lock().len(), 1);
    }

    #[tokio::test]
    async fn immediate_speak_publishes_and_registers_tts_handle() {
        let (scheduler, _repo, publisher, tts, _calls) = setup(
            r#"{"internal_reasoning":"x","action":"speak","level":2,"error_type":"procedural","delay_ms":0,"message":"Check your sign."}"#,
        );
        let (_id, mut rx) = publisher.attach("s1");
        scheduler.clone().schedule_reasoning("s1".into(), 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let event = rx.try_recv().expect("expected a published event");
        let PipelineEvent::Reasoning { tts_id, .. } = event;
        assert!(matches!(tts.take(&tts_id), Some(_)));
    }

    #[tokio::test]
    async fn rescheduling_during_debounce_cancels_the_earlier_run() {
        let (scheduler, repo, _publisher, _tts, calls) = setup(
            r#"{"internal_reasoning":"x","action":"silent","level":null,"error_type":null,"delay_ms":0,"message":""}"#,
        );
        scheduler.clone().schedule_reasoning("s1".into(), 1);
        scheduler.clone().schedule_reasoning("s1".into(), 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(repo.logs.lock().len(), 1);
    }

    #[tokio::test]
    async fn reschedule_during_in_flight_llm_call_discards_the_result() {
        let sessions = Arc::new(SessionRegistry::new());
        sessions.connect("s1", ConnectMeta::default());
        let transcription = Arc::new(TranscriptionScheduler::new(
            Arc::new(FakePipelineRepo::default()),
            Arc::new(NoopHrr),
            sessions.clone(),
            Duration::from_secs(5),
        ));
        transcription.ready.reset(&page_key("s1", 1));
        transcription.ready.signal(&page_key("s1", 1));

        let calls = Arc::new(AtomicUsize::new(0));
        let llm = Arc::new(SlowLlm {
            response: r#"{"internal_reasoning":"x","action":"speak","level":1,"error_type":"procedural","delay_ms":0,"message":"late"}"#.to_string(),
            delay: Duration::from_millis(150),
            calls: calls.clone(),
        });
        let pipeline_repo = Arc::new(FakePipelineRepo::default());
        let publisher = Arc::new(EventPublisher::new());
        let tts = Arc::new(TtsRegistry::new(Duration::from_secs(300)));

        let scheduler = Arc::new(ReasoningScheduler::new(
            transcription,
            Arc::new(EmptyContextRepo::default()),
            pipeline_repo.clone(),
            llm,
            tts,
            publisher.clone(),
            sessions,
            timing(),
            Duration::from_secs(5),
        ));

        let (_id, mut rx) = publisher.attach("s1");
        scheduler.clone().schedule_reasoning("s1".into(), 1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        // Supersede while the LLM call is in flight.
        scheduler.clone().schedule_reasoning("s1".into(), 1);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(rx.try_recv().is_err());
        assert!(pipeline_repo.logs.lock().is_empty());
    }

    #[tokio::test]
    async fn delayed_speak_is_cancelled_by_a_new_schedule() {
        let (scheduler, _repo, publisher, _tts, _calls) = setup(
            r#"{"internal_reasoning":"x","action":"speak","level":2,"error_type":"procedural","delay_ms":150,"message":"Check that arithmetic."}"#,
        );
        let (_id, mut rx) = publisher.attach("s1");
        scheduler.clone().schedule_reasoning("s1".into(), 1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        // New strokes arrive before the delay elapses.
        scheduler.clone().schedule_reasoning("s1".into(), 1);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(rx.try_recv().is_err());
    }
}
