//! Assembles the prompt context handed to the reasoning and voice-question
//! adapters: the student's current work, anything they erased, the original
//! problem and answer key (scoped to the active part), question figures, and
//! recent tutor history. The repository trait keeps this crate free of any
//! direct database dependency.

pub mod builder;
pub mod model;

pub use builder::{build_context, build_context_structured, ContextOutput, ContextSection};
pub use model::{
    AnswerKeyRow, ContextRepository, PageTranscriptionRow, ProblemPart, ProblemRow,
    ReasoningLogRow,
};
