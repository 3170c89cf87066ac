//! Chunked segmentation of long media.
//!
//! Plans consecutive time ranges of `chunk_seconds`, each non-final range
//! extended by `overlap_seconds` so adjacent chunks share audio that merge
//! can deduplicate, then has the normalizer export them.

use crate::audio::analyzer::AudioAnalysis;
use crate::audio::normalizer::ContainerNormalizer;
use crate::audio::temp::TempArena;
use crate::config::SegmentationConfig;
use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};

/// Ranges shorter than this at the end of the media are not worth a chunk.
const MIN_TAIL_SECS: f64 = 1e-3;

/// A time range of the source, `end = None` meaning "to the end".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: Option<f64>,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn from(start: f64) -> Self {
        Self { start, end: None }
    }
}

/// An exported sub-file and where it sits in the source timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub path: PathBuf,
    /// Seconds from the start of the source
    pub offset: f64,
}

/// One planned chunk and the outcome of exporting it.
///
/// Each chunk succeeds or fails on its own; a failed export does not stop the
/// others.
#[derive(Debug)]
pub struct ChunkExport {
    pub range: TimeRange,
    pub chunk: Result<AudioChunk>,
}

impl ChunkExport {
    pub fn new(range: TimeRange, path: Result<PathBuf>) -> Self {
        Self {
            range,
            chunk: path.map(|path| AudioChunk {
                path,
                offset: range.start,
            }),
        }
    }
}

/// Plan chunk ranges covering `[0, duration)`.
///
/// Chunk `i` starts at `i * chunk_seconds`; every chunk except the last ends
/// `overlap_seconds` past the next chunk's start (clamped to the duration).
pub fn plan_chunks(duration: f64, chunk_seconds: f64, overlap_seconds: f64) -> Vec<TimeRange> {
    if !(duration > 0.0) || !(chunk_seconds > 0.0) {
        return Vec::new();
    }

    let mut ranges = Vec::new();
    let mut index = 0u64;
    loop {
        let start = index as f64 * chunk_seconds;
        if duration - start < MIN_TAIL_SECS && index > 0 {
            break;
        }
        let nominal_end = start + chunk_seconds;
        let is_last = duration - nominal_end < MIN_TAIL_SECS;
        let end = if is_last {
            duration
        } else {
            (nominal_end + overlap_seconds).min(duration)
        };
        ranges.push(TimeRange::new(start, end));
        if is_last {
            break;
        }
        index += 1;
    }
    ranges
}

/// Chooses chunk parameters and turns a prepared source into chunk files.
#[derive(Debug, Clone)]
pub struct SegmentationEngine {
    config: SegmentationConfig,
}

impl SegmentationEngine {
    /// Creates an engine, rejecting unusable chunk parameters.
    pub fn new(config: SegmentationConfig) -> Result<Self> {
        if !(config.chunk_seconds > 0.0) {
            return Err(PipelineError::ConfigInvalidValue {
                key: "segmentation.chunk_seconds".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if !(config.overlap_seconds >= 0.0) || config.overlap_seconds >= config.chunk_seconds {
            return Err(PipelineError::ConfigInvalidValue {
                key: "segmentation.overlap_seconds".to_string(),
                message: "must be at least 0 and shorter than chunk_seconds".to_string(),
            });
        }
        Ok(Self { config })
    }

    pub fn chunk_seconds(&self) -> f64 {
        self.config.chunk_seconds
    }

    pub fn overlap_seconds(&self) -> f64 {
        self.config.overlap_seconds
    }

    /// Ranges this engine would export for media of `duration` seconds.
    pub fn plan(&self, duration: f64) -> Vec<TimeRange> {
        plan_chunks(
            duration,
            self.config.chunk_seconds,
            self.config.overlap_seconds,
        )
    }

    /// Export the analysed media as ordered chunks.
    pub async fn segment(
        &self,
        analysis: &AudioAnalysis,
        normalizer: &dyn ContainerNormalizer,
        arena: &TempArena,
    ) -> Vec<ChunkExport> {
        self.segment_source(
            &analysis.normalized_audio_path,
            analysis.duration,
            normalizer,
            arena,
        )
        .await
    }

    /// Export `source` of known `duration` as ordered chunks.
    pub async fn segment_source(
        &self,
        source: &Path,
        duration: f64,
        normalizer: &dyn ContainerNormalizer,
        arena: &TempArena,
    ) -> Vec<ChunkExport> {
        let ranges = self.plan(duration);
        tracing::debug!(
            source = %source.display(),
            duration,
            chunks = ranges.len(),
            chunk_seconds = self.config.chunk_seconds,
            overlap_seconds = self.config.overlap_seconds,
            "segmenting media"
        );
        let exports = normalizer.export_ranges(source, &ranges, arena).await;
        let failed = exports.iter().filter(|e| e.chunk.is_err()).count();
        if failed > 0 {
            tracing::warn!(source = %source.display(), failed, total = exports.len(), "some chunks failed to export");
        }
        exports
    }
}

impl Default for SegmentationEngine {
    fn default() -> Self {
        Self {
            config: SegmentationConfig::default(),
        }
    }
}
