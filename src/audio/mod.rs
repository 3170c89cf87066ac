//! Audio handling: analysis, decoding, normalization and temp-file ownership.

pub mod analyzer;
pub mod decode;
pub mod normalizer;
pub mod temp;
pub mod wav;

pub use analyzer::{AudioAnalysis, AudioAnalyzer, AudioStats, LevelStats};
pub use normalizer::{ContainerNormalizer, MockNormalizer, NormalizerCall, PcmNormalizer};
pub use temp::{CleanupStats, TempArena};
