//! Container normalization and time-range exports.
//!
//! Every export is a new file allocated from a [`TempArena`]; inputs are never
//! modified. Failures surface as [`PipelineError::ExportFailed`] so callers can
//! skip the fallback path that needed the export. Chunk sets report one result
//! per range.

use crate::audio::decode::MonoStream;
use crate::audio::temp::TempArena;
use crate::audio::wav::StreamingWavWriter;
use crate::defaults;
use crate::error::{PipelineError, Result};
use crate::segmentation::{ChunkExport, TimeRange, plan_chunks};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Whether `path` already has a container extension recognizers accept.
pub fn is_recognizer_friendly(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            defaults::RECOGNIZER_FRIENDLY_EXTENSIONS
                .iter()
                .any(|friendly| friendly.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Produces recognizer-friendly audio files from arbitrary media.
#[async_trait]
pub trait ContainerNormalizer: Send + Sync {
    /// Re-encode `input` as a small mono container.
    async fn to_normalized_container(&self, input: &Path, arena: &TempArena) -> Result<PathBuf>;

    /// Export one time range of `input` as a mono container.
    async fn export_range(
        &self,
        input: &Path,
        range: TimeRange,
        arena: &TempArena,
    ) -> Result<PathBuf>;

    /// Export from `start_secs` to the end of `input`.
    async fn trim(&self, input: &Path, start_secs: f64, arena: &TempArena) -> Result<PathBuf> {
        self.export_range(input, TimeRange::from(start_secs), arena)
            .await
    }

    /// Export several ranges, keeping their order.
    ///
    /// Returns one entry per range; a failed range does not stop the rest.
    async fn export_ranges(
        &self,
        input: &Path,
        ranges: &[TimeRange],
        arena: &TempArena,
    ) -> Vec<ChunkExport> {
        let mut exports = Vec::with_capacity(ranges.len());
        for range in ranges {
            let path = self.export_range(input, *range, arena).await;
            exports.push(ChunkExport::new(*range, path));
        }
        exports
    }

    /// Slice `input` of known `duration` into overlapping chunks.
    async fn slice_segments(
        &self,
        input: &Path,
        duration: f64,
        chunk_seconds: f64,
        overlap_seconds: f64,
        arena: &TempArena,
    ) -> Vec<ChunkExport> {
        let ranges = plan_chunks(duration, chunk_seconds, overlap_seconds);
        self.export_ranges(input, &ranges, arena).await
    }
}

/// Normalizer that decodes with symphonia and writes 16 kHz mono PCM WAV.
///
/// Audio is streamed packet by packet into the output files, so memory stays
/// bounded by the decoder's packet size whatever the source length. Range
/// exports seek to the earliest requested start.
#[derive(Debug, Clone)]
pub struct PcmNormalizer {
    sample_rate: u32,
}

impl PcmNormalizer {
    pub fn new() -> Self {
        Self {
            sample_rate: defaults::EXPORT_SAMPLE_RATE,
        }
    }

    /// Export at a different output rate.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate.max(1);
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn export_jobs(&self, input: &Path, jobs: Vec<(TimeRange, PathBuf)>) -> Vec<Result<()>> {
        let count = jobs.len();
        let source = input.to_path_buf();
        let output_rate = self.sample_rate;

        match tokio::task::spawn_blocking(move || stream_ranges(&source, &jobs, output_rate)).await
        {
            Ok(results) => results,
            Err(e) => {
                let message = format!("export task failed: {}", e);
                (0..count)
                    .map(|_| {
                        Err(PipelineError::ExportFailed {
                            message: message.clone(),
                        })
                    })
                    .collect()
            }
        }
    }

    async fn export_one(&self, input: &Path, range: TimeRange, dest: &Path) -> Result<()> {
        self.export_jobs(input, vec![(range, dest.to_path_buf())])
            .await
            .into_iter()
            .next()
            .unwrap_or_else(|| {
                Err(PipelineError::ExportFailed {
                    message: "export produced no result".to_string(),
                })
            })
    }
}

impl Default for PcmNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Where one range stands during a streaming pass.
enum RangeState {
    Pending,
    Open(StreamingWavWriter),
    Done(Result<()>),
}

impl RangeState {
    fn is_done(&self) -> bool {
        matches!(self, RangeState::Done(_))
    }

    /// Append `samples`, opening the file on first use and closing it when
    /// `complete`.
    fn feed(
        self,
        dest: &Path,
        rates: (u32, u32),
        samples: &[f32],
        complete: bool,
    ) -> RangeState {
        let mut writer = match self {
            RangeState::Open(writer) => writer,
            RangeState::Pending => match StreamingWavWriter::create(dest, rates.0, rates.1) {
                Ok(writer) => writer,
                Err(e) => return RangeState::Done(Err(e)),
            },
            done => return done,
        };
        if let Err(e) = writer.write(samples) {
            return RangeState::Done(Err(e));
        }
        if complete {
            RangeState::Done(writer.finish().map(|_| ()))
        } else {
            RangeState::Open(writer)
        }
    }

    fn close(self) -> RangeState {
        match self {
            RangeState::Open(writer) => RangeState::Done(writer.finish().map(|_| ())),
            other => other,
        }
    }
}

fn describe_range(range: TimeRange) -> String {
    match range.end {
        Some(end) => format!("{:.3}s..{:.3}s", range.start, end),
        None => format!("{:.3}s..end", range.start),
    }
}

/// Decode `source` once, writing every `(range, dest)` job as its frames
/// pass by. Returns one result per job, in order.
///
/// Ranges cut short by the end of the decoded audio are written as far as
/// the audio goes; ranges that received no audio at all fail.
fn stream_ranges(source: &Path, jobs: &[(TimeRange, PathBuf)], output_rate: u32) -> Vec<Result<()>> {
    let mut stream = match MonoStream::open(source) {
        Ok(stream) => stream,
        Err(e) => {
            let message = format!("cannot decode {}: {}", source.display(), e);
            return jobs
                .iter()
                .map(|_| {
                    Err(PipelineError::ExportFailed {
                        message: message.clone(),
                    })
                })
                .collect();
        }
    };

    let rates = (stream.sample_rate(), output_rate);
    let bounds: Vec<(u64, u64)> = jobs
        .iter()
        .map(|(range, _)| {
            let end = range.end.map_or(u64::MAX, |end| stream.frame_at(end));
            (stream.frame_at(range.start), end)
        })
        .collect();
    let mut states: Vec<RangeState> = jobs.iter().map(|_| RangeState::Pending).collect();

    if let Some(first) = jobs.iter().map(|(range, _)| range.start).reduce(f64::min)
        && first > 0.0
    {
        stream.seek(first);
    }

    let mut decoded_end = 0u64;
    let mut failure: Option<String> = None;
    loop {
        let block = match stream.next_block() {
            Ok(Some(block)) => block,
            Ok(None) => break,
            Err(e) => {
                failure = Some(e.to_string());
                break;
            }
        };
        let block_start = block.first_frame;
        let block_end = block_start + block.samples.len() as u64;
        decoded_end = decoded_end.max(block_end);

        for (index, &(start, end)) in bounds.iter().enumerate() {
            if states[index].is_done() || block_end <= start {
                continue;
            }
            let state = std::mem::replace(&mut states[index], RangeState::Pending);
            states[index] = if block_start >= end {
                state.close()
            } else {
                let from = start.saturating_sub(block_start) as usize;
                let to = (end.min(block_end) - block_start) as usize;
                state.feed(&jobs[index].1, rates, &block.samples[from..to], end <= block_end)
            };
        }

        if states.iter().all(RangeState::is_done) {
            break;
        }
    }

    let decoded_secs = decoded_end as f64 / rates.0 as f64;
    states
        .into_iter()
        .zip(jobs)
        .map(|(state, (range, _))| match (state, &failure) {
            (RangeState::Done(result), _) => result,
            (RangeState::Open(writer), None) => {
                tracing::debug!(range = %describe_range(*range), decoded_secs, "range cut short by end of audio");
                writer.finish().map(|_| ())
            }
            (RangeState::Open(_), Some(message)) => Err(PipelineError::ExportFailed {
                message: format!(
                    "decoding stopped inside {}: {}",
                    describe_range(*range),
                    message
                ),
            }),
            (RangeState::Pending, Some(message)) => Err(PipelineError::ExportFailed {
                message: format!("cannot decode {}: {}", source.display(), message),
            }),
            (RangeState::Pending, None) => Err(PipelineError::ExportFailed {
                message: format!(
                    "range {} is outside the {:.3}s of decoded audio",
                    describe_range(*range),
                    decoded_secs
                ),
            }),
        })
        .collect()
}

#[async_trait]
impl ContainerNormalizer for PcmNormalizer {
    async fn to_normalized_container(&self, input: &Path, arena: &TempArena) -> Result<PathBuf> {
        let dest = arena.allocate("normalized", "wav");
        self.export_one(input, TimeRange::from(0.0), &dest).await?;

        tracing::debug!(input = %input.display(), output = %dest.display(), "normalized container written");
        Ok(dest)
    }

    async fn export_range(
        &self,
        input: &Path,
        range: TimeRange,
        arena: &TempArena,
    ) -> Result<PathBuf> {
        let kind = if range.end.is_some() { "chunk" } else { "trim" };
        let dest = arena.allocate(kind, "wav");
        self.export_one(input, range, &dest).await?;

        tracing::debug!(
            input = %input.display(),
            output = %dest.display(),
            start = range.start,
            end = ?range.end,
            "range exported"
        );
        Ok(dest)
    }

    // One decoding pass for all ranges.
    async fn export_ranges(
        &self,
        input: &Path,
        ranges: &[TimeRange],
        arena: &TempArena,
    ) -> Vec<ChunkExport> {
        if ranges.is_empty() {
            return Vec::new();
        }

        let jobs: Vec<(TimeRange, PathBuf)> = ranges
            .iter()
            .map(|range| (*range, arena.allocate("chunk", "wav")))
            .collect();
        let paths: Vec<PathBuf> = jobs.iter().map(|(_, path)| path.clone()).collect();
        let results = self.export_jobs(input, jobs).await;

        let exports: Vec<ChunkExport> = ranges
            .iter()
            .zip(paths)
            .zip(results)
            .map(|((range, path), result)| ChunkExport::new(*range, result.map(|()| path)))
            .collect();
        tracing::debug!(
            input = %input.display(),
            chunks = exports.len(),
            failed = exports.iter().filter(|e| e.chunk.is_err()).count(),
            "chunks exported"
        );
        exports
    }
}

/// A call observed by [`MockNormalizer`].
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizerCall {
    Normalize { input: PathBuf },
    Export { input: PathBuf, range: TimeRange },
}

/// Mock normalizer for testing.
///
/// Writes placeholder files of a fixed size instead of real audio and records
/// every request.
#[derive(Debug)]
pub struct MockNormalizer {
    file_bytes: usize,
    fail_normalize: bool,
    fail_exports: bool,
    failing_starts: Vec<f64>,
    calls: Mutex<Vec<NormalizerCall>>,
}

impl MockNormalizer {
    /// Create a mock whose exports pass the recognizer size gate.
    pub fn new() -> Self {
        Self {
            file_bytes: 2 * defaults::MIN_RECOGNIZABLE_BYTES as usize,
            fail_normalize: false,
            fail_exports: false,
            failing_starts: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Configure the size of every written placeholder.
    pub fn with_file_bytes(mut self, bytes: usize) -> Self {
        self.file_bytes = bytes;
        self
    }

    /// Configure normalization to fail with `ExportFailed`.
    pub fn with_normalize_failure(mut self) -> Self {
        self.fail_normalize = true;
        self
    }

    /// Configure range exports (trim and chunks) to fail with `ExportFailed`.
    pub fn with_export_failure(mut self) -> Self {
        self.fail_exports = true;
        self
    }

    /// Configure only the range starting at `start_secs` to fail.
    pub fn with_export_failure_at(mut self, start_secs: f64) -> Self {
        self.failing_starts.push(start_secs);
        self
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<NormalizerCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of range exports, trims included.
    pub fn export_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, NormalizerCall::Export { .. }))
            .count()
    }

    fn record(&self, call: NormalizerCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    async fn write_placeholder(&self, dest: &Path) -> Result<()> {
        tokio::fs::write(dest, vec![0u8; self.file_bytes])
            .await
            .map_err(|e| PipelineError::ExportFailed {
                message: format!("mock write {}: {}", dest.display(), e),
            })
    }
}

impl Default for MockNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerNormalizer for MockNormalizer {
    async fn to_normalized_container(&self, input: &Path, arena: &TempArena) -> Result<PathBuf> {
        self.record(NormalizerCall::Normalize {
            input: input.to_path_buf(),
        });
        if self.fail_normalize {
            return Err(PipelineError::ExportFailed {
                message: "mock normalization failure".to_string(),
            });
        }
        let dest = arena.allocate("normalized", "wav");
        self.write_placeholder(&dest).await?;
        Ok(dest)
    }

    async fn export_range(
        &self,
        input: &Path,
        range: TimeRange,
        arena: &TempArena,
    ) -> Result<PathBuf> {
        self.record(NormalizerCall::Export {
            input: input.to_path_buf(),
            range,
        });
        if self.fail_exports
            || self
                .failing_starts
                .iter()
                .any(|start| (start - range.start).abs() < 1e-9)
        {
            return Err(PipelineError::ExportFailed {
                message: "mock export failure".to_string(),
            });
        }
        let kind = if range.end.is_some() { "chunk" } else { "trim" };
        let dest = arena.allocate(kind, "wav");
        self.write_placeholder(&dest).await?;
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::write_wav;

    fn fixture(dir: &Path, name: &str, rate: u32, seconds: usize) -> PathBuf {
        let path = dir.join(name);
        let samples: Vec<i16> = (0..rate as usize * seconds)
            .map(|i| ((i % 100) as i16 - 50) * 100)
            .collect();
        write_wav(&path, &samples, rate).unwrap();
        path
    }

    fn wav_len_secs(path: &Path) -> f64 {
        let reader = hound::WavReader::open(path).unwrap();
        reader.duration() as f64 / reader.spec().sample_rate as f64
    }

    #[test]
    fn friendly_extensions_are_case_insensitive() {
        assert!(is_recognizer_friendly(Path::new("talk.WAV")));
        assert!(is_recognizer_friendly(Path::new("/a/b/clip.m4a")));
        assert!(is_recognizer_friendly(Path::new("song.flac")));
        assert!(!is_recognizer_friendly(Path::new("movie.mkv")));
        assert!(!is_recognizer_friendly(Path::new("no_extension")));
    }

    #[tokio::test]
    async fn pcm_normalizer_resamples_to_export_rate() {
        let dir = tempfile::tempdir().unwrap();
        let input = fixture(dir.path(), "in.wav", 8000, 3);
        let arena = TempArena::new("test").unwrap();

        let out = PcmNormalizer::new()
            .to_normalized_container(&input, &arena)
            .await
            .unwrap();

        assert!(out.starts_with(arena.path()));
        let reader = hound::WavReader::open(&out).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
        assert!((wav_len_secs(&out) - 3.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn pcm_trim_exports_from_offset_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let input = fixture(dir.path(), "in.wav", 16000, 5);
        let arena = TempArena::new("test").unwrap();

        let out = PcmNormalizer::new().trim(&input, 1.8, &arena).await.unwrap();

        assert!(out.file_name().unwrap().to_str().unwrap().starts_with("trim-"));
        assert!((wav_len_secs(&out) - 3.2).abs() < 0.01);
    }

    #[tokio::test]
    async fn pcm_slice_segments_exports_overlapping_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let input = fixture(dir.path(), "in.wav", 16000, 5);
        let arena = TempArena::new("test").unwrap();

        let chunks: Vec<_> = PcmNormalizer::new()
            .slice_segments(&input, 5.0, 2.0, 0.5, &arena)
            .await
            .into_iter()
            .map(|export| export.chunk.unwrap())
            .collect();

        let offsets: Vec<f64> = chunks.iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![0.0, 2.0, 4.0]);
        assert!((wav_len_secs(&chunks[0].path) - 2.5).abs() < 0.01);
        assert!((wav_len_secs(&chunks[1].path) - 2.5).abs() < 0.01);
        assert!((wav_len_secs(&chunks[2].path) - 1.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn pcm_trim_past_end_is_export_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = fixture(dir.path(), "in.wav", 16000, 1);
        let arena = TempArena::new("test").unwrap();

        let result = PcmNormalizer::new().trim(&input, 5.0, &arena).await;
        assert!(matches!(result, Err(PipelineError::ExportFailed { .. })));
    }

    #[tokio::test]
    async fn pcm_unreadable_input_is_export_failure() {
        let arena = TempArena::new("test").unwrap();
        let result = PcmNormalizer::new()
            .to_normalized_container(Path::new("/nonexistent/in.mkv"), &arena)
            .await;
        assert!(matches!(result, Err(PipelineError::ExportFailed { .. })));
    }

    #[tokio::test]
    async fn pcm_input_is_never_modified() {
        let dir = tempfile::tempdir().unwrap();
        let input = fixture(dir.path(), "in.wav", 16000, 2);
        let before = std::fs::read(&input).unwrap();
        let arena = TempArena::new("test").unwrap();

        let normalizer = PcmNormalizer::new();
        normalizer.to_normalized_container(&input, &arena).await.unwrap();
        normalizer.trim(&input, 0.5, &arena).await.unwrap();

        assert_eq!(std::fs::read(&input).unwrap(), before);
    }

    #[tokio::test]
    async fn mock_records_calls_and_writes_placeholders() {
        let arena = TempArena::new("test").unwrap();
        let mock = MockNormalizer::new();
        let input = Path::new("/media/talk.mkv");

        let normalized = mock.to_normalized_container(input, &arena).await.unwrap();
        let trimmed = mock.trim(input, 1.8, &arena).await.unwrap();

        assert_eq!(std::fs::metadata(&normalized).unwrap().len(), 8192);
        assert!(trimmed.exists());
        assert_eq!(
            mock.calls(),
            vec![
                NormalizerCall::Normalize {
                    input: input.to_path_buf()
                },
                NormalizerCall::Export {
                    input: input.to_path_buf(),
                    range: TimeRange::from(1.8)
                },
            ]
        );
        assert_eq!(mock.export_count(), 1);
    }

    #[tokio::test]
    async fn mock_failures_are_export_errors() {
        let arena = TempArena::new("test").unwrap();
        let mock = MockNormalizer::new()
            .with_normalize_failure()
            .with_export_failure();
        let input = Path::new("/media/talk.mkv");

        assert!(matches!(
            mock.to_normalized_container(input, &arena).await,
            Err(PipelineError::ExportFailed { .. })
        ));
        let exports = mock.slice_segments(input, 700.0, 300.0, 0.5, &arena).await;
        assert_eq!(exports.len(), 3);
        assert!(
            exports
                .iter()
                .all(|e| matches!(e.chunk, Err(PipelineError::ExportFailed { .. })))
        );
    }

    #[tokio::test]
    async fn mock_fails_only_the_configured_range() {
        let arena = TempArena::new("test").unwrap();
        let mock = MockNormalizer::new().with_export_failure_at(300.0);

        let exports = mock
            .slice_segments(Path::new("/media/talk.mkv"), 700.0, 300.0, 0.5, &arena)
            .await;

        let ok: Vec<bool> = exports.iter().map(|e| e.chunk.is_ok()).collect();
        assert_eq!(ok, vec![true, false, true]);
        assert_eq!(exports[1].range, TimeRange::new(300.0, 600.5));
    }

    #[tokio::test]
    async fn pcm_chunks_past_decoded_audio_fail_individually() {
        let dir = tempfile::tempdir().unwrap();
        let input = fixture(dir.path(), "short.wav", 16000, 5);
        let arena = TempArena::new("test").unwrap();

        // Planned for 9s of media, only 5s decode
        let exports = PcmNormalizer::new()
            .slice_segments(&input, 9.0, 2.0, 0.5, &arena)
            .await;

        assert_eq!(exports.len(), 5);
        let ok: Vec<bool> = exports.iter().map(|e| e.chunk.is_ok()).collect();
        assert_eq!(ok, vec![true, true, true, false, false]);
        // The chunk straddling the end keeps the audio that exists
        let straddling = exports[2].chunk.as_ref().unwrap();
        assert_eq!(straddling.offset, 4.0);
        assert!((wav_len_secs(&straddling.path) - 1.0).abs() < 0.01);
        assert!(matches!(
            exports[3].chunk,
            Err(PipelineError::ExportFailed { .. })
        ));
    }

    #[tokio::test]
    async fn pcm_range_export_seeks_into_long_source() {
        let dir = tempfile::tempdir().unwrap();
        let input = fixture(dir.path(), "long.wav", 8000, 60);
        let arena = TempArena::new("test").unwrap();

        let out = PcmNormalizer::new()
            .export_range(&input, TimeRange::new(42.0, 45.5), &arena)
            .await
            .unwrap();

        assert!(out.file_name().unwrap().to_str().unwrap().starts_with("chunk-"));
        assert!((wav_len_secs(&out) - 3.5).abs() < 0.01);
    }
}
