//! The real-time tutoring pipeline: stroke-triggered transcription,
//! debounced reasoning, event fanout, and the voice-question shortcut.
//! Schedulers here depend only on adapter traits and repository traits, so
//! they run against in-memory fakes in tests and real services in the
//! gateway.

pub mod decision;
pub mod keymap;
pub mod message_extract;
pub mod prompts;
pub mod publisher;
pub mod reasoning;
pub mod repository;
pub mod transcription;
pub mod tts_registry;
pub mod voice;

pub use decision::{parse_decision, reasoning_schema, Action, Decision, RawDecision};
pub use keymap::{page_key, ReadyMap, TaskMap};
pub use message_extract::{cut_sentence, strip_trailing_json_punctuation, MessageFieldExtractor};
pub use prompts::{REASONING_SYSTEM_PROMPT, VERDICT_PASS_MARKER, VOICE_QUESTION_ADDENDUM};
pub use publisher::{EventPublisher, PipelineEvent};
pub use reasoning::ReasoningScheduler;
pub use repository::{
    PipelineRepository, ReasoningLogEntry, StrokeEventType, StrokeLogEntry, TranscriptionUpdate,
};
pub use transcription::TranscriptionScheduler;
pub use tts_registry::{SentenceEvent, TtsPayload, TtsRegistry};
pub use voice::VoiceQuestionPipeline;
