//! polycaption - multilingual captions from local media
//!
//! Transcribes one media file in several locales with an on-device
//! recognizer, retries each locale through a fallback ladder (normalized
//! container, trimmed silence, fixed-length chunks) and merges the results
//! into one ordered, non-overlapping caption track.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod caption;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod segmentation;
pub mod stt;

// Core seams (media → recognizer → captions)
pub use audio::normalizer::{ContainerNormalizer, PcmNormalizer};
pub use stt::command::CommandRecognizer;
pub use stt::recognizer::SpeechRecognizer;

// Pipeline
pub use pipeline::orchestrator::{TranscriptionHandle, TranscriptionPipeline, TranscriptionReport};

// Data model
pub use audio::analyzer::AudioAnalysis;
pub use caption::{CaptionSegment, LocaleTranscript};
pub use segmentation::{AudioChunk, ChunkExport, TimeRange};

// Error handling
pub use error::{PipelineError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
