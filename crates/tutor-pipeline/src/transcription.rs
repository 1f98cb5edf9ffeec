//! Transcription scheduler (component E). On every stroke event, runs
//! at-most-one transcription per `(session, page)` and signals a readiness
//! event the reasoning scheduler waits on.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tutor_adapters::{HrrAdapter, HrrSession, Stroke};
use tutor_domain::trace::TraceEvent;
use tutor_sessions::{ContentMode, SessionRegistry};

use crate::keymap::{page_key, ReadyMap, TaskMap};
use crate::repository::{PipelineRepository, StrokeEventType, TranscriptionUpdate};

const ERASE_RING_CAPACITY: usize = 3;
const CONFIDENCE_THRESHOLD: f32 = 0.8;

pub struct TranscriptionScheduler {
    tasks: TaskMap,
    pub ready: Arc<ReadyMap>,
    hash_cache: Mutex<HashMap<String, u64>>,
    hrr_sessions: Mutex<HashMap<String, HrrSession>>,
    erase_snapshots: Mutex<HashMap<String, VecDeque<String>>>,
    repo: Arc<dyn PipelineRepository>,
    hrr: Arc<dyn HrrAdapter>,
    sessions: Arc<SessionRegistry>,
    hrr_timeout: Duration,
}

impl TranscriptionScheduler {
    pub fn new(
        repo: Arc<dyn PipelineRepository>,
        hrr: Arc<dyn HrrAdapter>,
        sessions: Arc<SessionRegistry>,
        hrr_timeout: Duration,
    ) -> Self {
        Self {
            tasks: TaskMap::new(),
            ready: Arc::new(ReadyMap::new()),
            hash_cache: Mutex::new(HashMap::new()),
            hrr_sessions: Mutex::new(HashMap::new()),
            erase_snapshots: Mutex::new(HashMap::new()),
            repo,
            hrr,
            sessions,
            hrr_timeout,
        }
    }

    /// Snapshot of the erase-snapshot ring for a key, newest-last (as
    /// stored); the context assembler reverses it for display.
    pub fn erase_snapshots(&self, session_id: &str, page: i32) -> Vec<String> {
        let key = page_key(session_id, page);
        self.erase_snapshots
            .lock()
            .get(&key)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn purge_session(&self, session_id: &str, pages: &[i32]) {
        for page in pages {
            let key = page_key(session_id, *page);
            self.tasks.cancel(&key);
            self.ready.remove(&key);
            self.hash_cache.lock().remove(&key);
            self.hrr_sessions.lock().remove(&key);
            self.erase_snapshots.lock().remove(&key);
        }
    }

    /// Entry point: schedule a transcription run for `(session_id, page)`.
    pub fn on_stroke_event(self: &Arc<Self>, session_id: String, page: i32) {
        let key = page_key(&session_id, page);
        self.ready.reset(&key);
        TraceEvent::TranscriptionScheduled {
            session_id: session_id.clone(),
            page,
        }
        .emit();

        let this = self.clone();
        let handle = tokio::spawn(async move {
            this.run(session_id, page).await;
        });
        self.tasks.replace(&key, handle);
    }

    async fn run(&self, session_id: String, page: i32) {
        let key = page_key(&session_id, page);

        let content_mode = self
            .sessions
            .get(&session_id)
            .map(|s| s.content_mode)
            .unwrap_or(ContentMode::Math);

        if content_mode == ContentMode::Diagram {
            let _ = self
                .repo
                .upsert_transcription(
                    &session_id,
                    page,
                    TranscriptionUpdate {
                        classified_diagram: true,
                        ..Default::default()
                    },
                )
                .await;
            self.ready.signal(&key);
            return;
        }

        let log = match self.repo.list_stroke_log(&session_id, page).await {
            Ok(log) => log,
            Err(e) => {
                TraceEvent::TranscriptionFailed {
                    session_id: session_id.clone(),
                    page,
                    reason: e.to_string(),
                }
                .emit();
                self.ready.signal(&key);
                return;
            }
        };

        if let Some(last) = log.last() {
            if last.event_type == StrokeEventType::Erase {
                if let Ok(Some(text)) = self.repo.get_transcription_text(&session_id, page).await {
                    if !text.trim().is_empty() {
                        self.push_erase_snapshot(&key, text);
                    }
                }
            }
        }

        let visible = replay_visible_strokes(&log);
        let hash = hash_strokes(&visible);

        let unchanged = self.hash_cache.lock().get(&key).copied() == Some(hash);
        if unchanged {
            TraceEvent::TranscriptionSkippedUnchanged {
                session_id: session_id.clone(),
                page,
            }
            .emit();
            self.ready.signal(&key);
            return;
        }

        let handle = match self.acquire_hrr_session(&key).await {
            Ok(h) => h,
            Err(e) => {
                TraceEvent::TranscriptionFailed {
                    session_id: session_id.clone(),
                    page,
                    reason: e.to_string(),
                }
                .emit();
                self.ready.signal(&key);
                return;
            }
        };

        let recognition = match tokio::time::timeout(
            self.hrr_timeout,
            self.hrr.recognize(&handle, &visible),
        )
        .await
        {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                TraceEvent::TranscriptionFailed {
                    session_id: session_id.clone(),
                    page,
                    reason: e.to_string(),
                }
                .emit();
                self.ready.signal(&key);
                return;
            }
            Err(_) => {
                TraceEvent::TranscriptionFailed {
                    session_id: session_id.clone(),
                    page,
                    reason: "hrr recognize timed out".into(),
                }
                .emit();
                self.ready.signal(&key);
                return;
            }
        };

        let classified_diagram = recognition.error.is_some()
            || !recognition.is_handwritten
            || recognition.confidence < CONFIDENCE_THRESHOLD;

        let update = TranscriptionUpdate {
            latex: if classified_diagram {
                String::new()
            } else {
                recognition.latex.clone()
            },
            text: recognition.text.clone(),
            confidence: Some(recognition.confidence),
            line_data: recognition.line_data.clone(),
            classified_diagram,
        };

        if self
            .repo
            .upsert_transcription(&session_id, page, update)
            .await
            .is_ok()
        {
            self.hash_cache.lock().insert(key.clone(), hash);
            TraceEvent::TranscriptionCompleted {
                session_id: session_id.clone(),
                page,
                confidence: Some(recognition.confidence),
                classified_diagram,
            }
            .emit();
        }

        self.ready.signal(&key);
    }

    fn push_erase_snapshot(&self, key: &str, text: String) {
        let mut snapshots = self.erase_snapshots.lock();
        let ring = snapshots.entry(key.to_string()).or_default();
        if ring.len() == ERASE_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(text);
    }

    async fn acquire_hrr_session(&self, key: &str) -> tutor_domain::error::AdapterResult<String> {
        let cached = self.hrr_sessions.lock().get(key).cloned();
        if let Some(session) = cached {
            if !session.is_expired(chrono::Utc::now()) {
                return Ok(session.handle);
            }
        }
        let session = self.hrr.open_session().await?;
        let handle = session.handle.clone();
        self.hrr_sessions.lock().insert(key.to_string(), session);
        Ok(handle)
    }
}

/// Replay the ordered `(draw|erase)` log: every erase resets the visible
/// set to empty, every draw appends.
fn replay_visible_strokes(
    log: &[crate::repository::StrokeLogEntry],
) -> Vec<Stroke> {
    let mut visible = Vec::new();
    for entry in log {
        match entry.event_type {
            StrokeEventType::Erase => visible.clear(),
            StrokeEventType::Draw => visible.extend(entry.strokes.iter().cloned()),
            StrokeEventType::Voice => {}
        }
    }
    visible
}

fn hash_strokes(strokes: &[Stroke]) -> u64 {
    let mut hasher = Sha256::new();
    for stroke in strokes {
        for point in &stroke.points {
            hasher.update(point.x.to_le_bytes());
            hasher.update(point.y.to_le_bytes());
        }
        hasher.update(b"|");
    }
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[0..8].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tutor_adapters::{HrrRecognition, StrokePoint};
    use tutor_domain::error::{AdapterResult, Result};
    use tutor_sessions::ConnectMeta;

    #[derive(Default)]
    struct FakeRepo {
        log: Mutex<HashMap<String, Vec<crate::repository::StrokeLogEntry>>>,
        transcriptions: Mutex<HashMap<String, String>>,
        upserts: AtomicUsize,
    }

    #[async_trait]
    impl PipelineRepository for FakeRepo {
        async fn append_stroke_log(
            &self,
            session_id: &str,
            page: i32,
            entry: crate::repository::StrokeLogEntry,
        ) -> Result<()> {
            self.log
                .lock()
                .entry(page_key(session_id, page))
                .or_default()
                .push(entry);
            Ok(())
        }
        async fn list_stroke_log(
            &self,
            session_id: &str,
            page: i32,
        ) -> Result<Vec<crate::repository::StrokeLogEntry>> {
            Ok(self
                .log
                .lock()
                .get(&page_key(session_id, page))
                .cloned()
                .unwrap_or_default())
        }
        async fn get_transcription_text(&self, session_id: &str, page: i32) -> Result<Option<String>> {
            Ok(self
                .transcriptions
                .lock()
                .get(&page_key(session_id, page))
                .cloned())
        }
        async fn upsert_transcription(
            &self,
            session_id: &str,
            page: i32,
            update: TranscriptionUpdate,
        ) -> Result<()> {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            self.transcriptions
                .lock()
                .insert(page_key(session_id, page), update.text);
            Ok(())
        }
        async fn append_reasoning_log(&self, _entry: crate::repository::ReasoningLogEntry) -> Result<()> {
            Ok(())
        }
        async fn delete_stroke_log(&self, session_id: &str, page: i32) -> Result<()> {
            self.log.lock().remove(&page_key(session_id, page));
            Ok(())
        }
    }

    struct FakeHrr {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HrrAdapter for FakeHrr {
        async fn open_session(&self) -> AdapterResult<HrrSession> {
            Ok(HrrSession {
                handle: "h1".into(),
                expires_at: Utc::now() + chrono::Duration::seconds(270),
            })
        }
        async fn recognize(&self, _handle: &str, _strokes: &[Stroke]) -> AdapterResult<HrrRecognition> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HrrRecognition {
                latex: "x=2".into(),
                text: "x = 2".into(),
                confidence: 0.95,
                line_data: serde_json::Value::Null,
                is_handwritten: true,
                error: None,
            })
        }
    }

    fn draw_entry() -> crate::repository::StrokeLogEntry {
        crate::repository::StrokeLogEntry {
            event_type: StrokeEventType::Draw,
            strokes: vec![Stroke {
                points: vec![StrokePoint { x: 1.0, y: 1.0 }],
            }],
            received_at: Utc::now(),
        }
    }

    fn setup() -> (Arc<TranscriptionScheduler>, Arc<FakeRepo>, Arc<FakeHrr>) {
        let repo = Arc::new(FakeRepo::default());
        let hrr = Arc::new(FakeHrr {
            calls: AtomicUsize::new(0),
        });
        let sessions = Arc::new(SessionRegistry::new());
        sessions.connect("s1", ConnectMeta::default());
        let scheduler = Arc::new(TranscriptionScheduler::new(
            repo.clone(),
            hrr.clone(),
            sessions,
            Duration::from_secs(5),
        ));
        (scheduler, repo, hrr)
    }

    #[tokio::test]
    async fn unchanged_stroke_set_issues_at_most_one_hrr_call() {
        let (scheduler, repo, hrr) = setup();
        repo.append_stroke_log("s1", 1, draw_entry()).await.unwrap();

        scheduler.clone().on_stroke_event("s1".into(), 1);
        scheduler.ready.wait(&page_key("s1", 1), Duration::from_secs(2)).await;

        scheduler.clone().on_stroke_event("s1".into(), 1);
        scheduler.ready.wait(&page_key("s1", 1), Duration::from_secs(2)).await;

        assert_eq!(hrr.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn changed_stroke_set_reissues_hrr_call() {
        let (scheduler, repo, hrr) = setup();
        repo.append_stroke_log("s1", 1, draw_entry()).await.unwrap();
        scheduler.clone().on_stroke_event("s1".into(), 1);
        scheduler.ready.wait(&page_key("s1", 1), Duration::from_secs(2)).await;

        repo.append_stroke_log(
            "s1",
            1,
            crate::repository::StrokeLogEntry {
                event_type: StrokeEventType::Draw,
                strokes: vec![Stroke {
                    points: vec![StrokePoint { x: 9.0, y: 9.0 }],
                }],
                received_at: Utc::now(),
            },
        )
        .await
        .unwrap();
        scheduler.clone().on_stroke_event("s1".into(), 1);
        scheduler.ready.wait(&page_key("s1", 1), Duration::from_secs(2)).await;

        assert_eq!(hrr.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn erase_pushes_prior_text_onto_snapshot_ring() {
        let (scheduler, repo, _hrr) = setup();
        repo.append_stroke_log("s1", 1, draw_entry()).await.unwrap();
        scheduler.clone().on_stroke_event("s1".into(), 1);
        scheduler.ready.wait(&page_key("s1", 1), Duration::from_secs(2)).await;

        repo.append_stroke_log(
            "s1",
            1,
            crate::repository::StrokeLogEntry {
                event_type: StrokeEventType::Erase,
                strokes: vec![],
                received_at: Utc::now(),
            },
        )
        .await
        .unwrap();
        scheduler.clone().on_stroke_event("s1".into(), 1);
        scheduler.ready.wait(&page_key("s1", 1), Duration::from_secs(2)).await;

        let ring = scheduler.erase_snapshots("s1", 1);
        assert_eq!(ring, vec!["x = 2".to_string()]);
    }

    #[tokio::test]
    async fn diagram_mode_writes_empty_row_without_calling_hrr() {
        let (scheduler, repo, hrr) = setup();
        let sessions = Arc::new(SessionRegistry::new());
        sessions.connect("s1", ConnectMeta::default());
        sessions.set_content_mode("s1", Some(ContentMode::Diagram));
        let scheduler = Arc::new(TranscriptionScheduler::new(
            repo.clone(),
            hrr.clone(),
            sessions,
            Duration::from_secs(5),
        ));
        scheduler.clone().on_stroke_event("s1".into(), 1);
        scheduler.ready.wait(&page_key("s1", 1), Duration::from_secs(2)).await;

        assert_eq!(hrr.calls.load(Ordering::SeqCst), 0);
        assert_eq!(repo.upserts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn purge_session_clears_all_per_key_state() {
        let (scheduler, repo, _hrr) = setup();
        repo.append_stroke_log("s1", 1, draw_entry()).await.unwrap();
        scheduler.clone().on_stroke_event("s1".into(), 1);
        scheduler.ready.wait(&page_key("s1", 1), Duration::from_secs(2)).await;

        scheduler.purge_session("s1", &[1]);
        assert!(scheduler.erase_snapshots("s1", 1).is_empty());
        assert!(!scheduler.tasks.contains(&page_key("s1", 1)));
    }

    #[test]
    fn replay_resets_on_erase() {
        let log = vec![
            draw_entry(),
            crate::repository::StrokeLogEntry {
                event_type: StrokeEventType::Erase,
                strokes: vec![],
                received_at: Utc::now(),
            },
            draw_entry(),
        ];
        let visible = replay_visible_strokes(&log);
        assert_eq!(visible.len(), 1);
    }

    #[test]
    fn hash_is_deterministic_for_identical_input() {
        let strokes = vec![Stroke {
            points: vec![StrokePoint { x: 1.0, y: 2.0 }],
        }];
        assert_eq!(hash_strokes(&strokes), hash_strokes(&strokes));
    }
}
