//! Transcription pipeline: per-locale fallback, script scoring, merge and the
//! caller-facing orchestrator.

pub mod fallback;
pub mod merge;
pub mod orchestrator;
pub mod script;

pub use fallback::{FallbackOrchestrator, LocaleRequest, LocaleRun, Stage, StageReport};
pub use merge::MergeEngine;
pub use orchestrator::{
    LocaleFailure, MediaKey, TranscriptionHandle, TranscriptionPipeline, TranscriptionReport,
};
pub use script::{CandidateScorer, HeuristicDetector, LanguageDetector, ScoreWeights};
