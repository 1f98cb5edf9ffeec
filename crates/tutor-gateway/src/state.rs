use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tutor_adapters::{HrrAdapter, SttAdapter, TtsAdapter};
use tutor_context::ContextRepository;
use tutor_domain::config::Config;
use tutor_pipeline::{EventPublisher, PipelineRepository, ReasoningScheduler, TranscriptionScheduler, TtsRegistry, VoiceQuestionPipeline};
use tutor_sessions::SessionRegistry;

use crate::db::PgRepository;

/// Shared application state passed to every API handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    pub sessions: Arc<SessionRegistry>,
    pub context_repo: Arc<dyn ContextRepository>,
    pub pipeline_repo: Arc<dyn PipelineRepository>,
    /// Concrete handle to the same database, used only by the simulation
    /// harness for writes the two repository traits don't model (seeding a
    /// problem and its answer key directly).
    pub db: Arc<PgRepository>,

    pub hrr: Arc<dyn HrrAdapter>,
    pub stt: Arc<dyn SttAdapter>,
    pub tts_adapter: Arc<dyn TtsAdapter>,

    pub publisher: Arc<EventPublisher>,
    pub tts: Arc<TtsRegistry>,
    pub transcription: Arc<TranscriptionScheduler>,
    pub reasoning: Arc<ReasoningScheduler>,
    pub voice: Arc<VoiceQuestionPipeline>,

    /// SHA-256 hash of the admin bearer token, read once at startup.
    /// `None` means admin endpoints are disabled entirely.
    pub admin_token_hash: Option<Vec<u8>>,

    /// Pages a session has touched, tracked so `Disconnect` knows which
    /// `(session, page)` keys to purge from the scheduler maps.
    pub active_pages: Arc<Mutex<HashMap<String, HashSet<i32>>>>,
}

impl AppState {
    pub fn record_active_page(&self, session_id: &str, page: i32) {
        self.active_pages
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .insert(page);
    }

    pub fn take_active_pages(&self, session_id: &str) -> Vec<i32> {
        self.active_pages
            .lock()
            .remove(session_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default()
    }
}
