//! Per-locale fallback chain.
//!
//! Whole-file stages run strictly in order (original, normalized, trimmed,
//! container export), each only when the earlier ones failed in a way it can
//! fix. Long or truncated results escalate to chunked segmentation, whose
//! result replaces the whole-file one only when it carries more segments.

use crate::audio::analyzer::AudioAnalysis;
use crate::audio::normalizer::ContainerNormalizer;
use crate::audio::temp::TempArena;
use crate::caption::{CaptionSegment, LocaleTranscript, coalesce, sort_by_start};
use crate::config::FallbackConfig;
use crate::error::{PipelineError, Result};
use crate::segmentation::SegmentationEngine;
use crate::stt::attempt::{RecognitionAttempt, RecognitionOutcome};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One step of the fallback chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// The media file as given
    Original,
    /// The cached normalized container
    Normalized,
    /// Export starting after the leading silence
    Trimmed { start: f64 },
    /// Fresh container export after file-open failures
    ContainerExport,
    /// One chunk of the segmentation tier
    Chunk { index: usize, offset: f64 },
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Original => write!(f, "original"),
            Stage::Normalized => write!(f, "normalized"),
            Stage::Trimmed { start } => write!(f, "trimmed@{:.2}s", start),
            Stage::ContainerExport => write!(f, "container-export"),
            Stage::Chunk { index, offset } => write!(f, "chunk#{}@{:.1}s", index, offset),
        }
    }
}

/// What happened at one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub stage: Stage,
    /// Outcome label, e.g. `success`, `empty`, `timeout`, `export-failed`
    pub outcome: String,
    pub segments: usize,
}

impl StageReport {
    pub fn is_chunk(&self) -> bool {
        matches!(self.stage, Stage::Chunk { .. })
    }

    pub fn is_whole_file(&self) -> bool {
        !self.is_chunk()
    }
}

/// Result of running the fallback chain for one locale.
#[derive(Debug, Clone, PartialEq)]
pub struct LocaleRun {
    pub transcript: LocaleTranscript,
    pub stages: Vec<StageReport>,
    /// Whether the segmentation result replaced the whole-file one
    pub segmented: bool,
}

/// Inputs for one locale's chain.
#[derive(Debug, Clone, Copy)]
pub struct LocaleRequest<'a> {
    pub media: &'a Path,
    pub analysis: Option<&'a AudioAnalysis>,
    pub locale: &'a str,
    pub allow_cloud: bool,
    pub arena: &'a TempArena,
    pub cancel: &'a CancellationToken,
}

/// Accumulated state while one locale's chain runs.
#[derive(Default)]
struct Trace {
    stages: Vec<StageReport>,
    errors: Vec<PipelineError>,
}

impl Trace {
    fn record(&mut self, stage: Stage, outcome: &RecognitionOutcome, locale: &str) {
        let segments = outcome.segments().map(<[_]>::len).unwrap_or(0);
        match outcome {
            RecognitionOutcome::Success(_) if segments > 0 => {
                tracing::debug!(locale, %stage, segments, "stage succeeded");
            }
            RecognitionOutcome::EmptyResult | RecognitionOutcome::Success(_) => {
                tracing::debug!(locale, %stage, "stage recognized nothing");
            }
            other => {
                tracing::warn!(locale, %stage, outcome = %other, "stage failed");
            }
        }
        if let Some(error) = outcome.to_error(locale)
            && error.is_hard()
        {
            self.errors.push(error);
        }
        self.stages.push(StageReport {
            stage,
            outcome: outcome.kind_label().to_string(),
            segments,
        });
    }

    fn record_export_failure(&mut self, stage: Stage, error: PipelineError, locale: &str) {
        tracing::warn!(locale, %stage, error = %error, "export for stage failed");
        self.stages.push(StageReport {
            stage,
            outcome: "export-failed".to_string(),
            segments: 0,
        });
        self.errors.push(error);
    }

    fn saw_outcome(&self, label: &str) -> bool {
        self.stages.iter().any(|s| s.outcome == label)
    }

    /// The error reported when the locale produced nothing.
    ///
    /// Recognizer-side errors are preferred over export failures.
    fn take_summary_error(&mut self) -> Option<PipelineError> {
        if self.errors.is_empty() {
            return None;
        }
        let position = self
            .errors
            .iter()
            .position(|e| !matches!(e, PipelineError::ExportFailed { .. }))
            .unwrap_or(0);
        Some(self.errors.swap_remove(position))
    }
}

/// Drives recognition attempts for one locale.
pub struct FallbackOrchestrator {
    attempt: RecognitionAttempt,
    normalizer: Arc<dyn ContainerNormalizer>,
    segmentation: SegmentationEngine,
    config: FallbackConfig,
    coalesce_gap: f64,
}

impl FallbackOrchestrator {
    pub fn new(
        attempt: RecognitionAttempt,
        normalizer: Arc<dyn ContainerNormalizer>,
        segmentation: SegmentationEngine,
        config: FallbackConfig,
        coalesce_gap: f64,
    ) -> Self {
        Self {
            attempt,
            normalizer,
            segmentation,
            config,
            coalesce_gap,
        }
    }

    pub fn attempt(&self) -> &RecognitionAttempt {
        &self.attempt
    }

    /// Whether media of this length skips whole-file recognition.
    pub fn skips_whole_file(&self, duration: f64) -> bool {
        duration >= self.config.hard_ceiling_secs
    }

    /// Whether the whole-file result must be checked against segmentation.
    pub fn needs_segmentation(&self, duration: f64, whole_file_segments: usize) -> bool {
        self.skips_whole_file(duration)
            || (whole_file_segments == 0 && duration > self.config.forced_segmentation_secs)
            || (duration >= self.config.long_audio_secs
                && whole_file_segments < self.config.min_segments_for_long_audio)
    }

    /// Start of the trimmed export, when a trimmed retry applies.
    pub fn trim_start(&self, analysis: &AudioAnalysis) -> Option<f64> {
        if analysis.leading_silence > self.config.trim_min_leading_silence
            && analysis.duration > self.config.trim_min_duration
        {
            Some((analysis.leading_silence - self.config.trim_backoff).max(0.0))
        } else {
            None
        }
    }

    /// Run the whole chain for one locale.
    ///
    /// Returns `Cancelled` as soon as the token fires; no partial result is
    /// kept. Fails otherwise only when nothing was recognized and some stage
    /// hit a hard error.
    pub async fn run(&self, request: LocaleRequest<'_>) -> Result<LocaleRun> {
        let locale = request.locale;
        let mut trace = Trace::default();

        let duration = request.analysis.map(|a| a.duration);
        let mut segments = match duration {
            Some(d) if self.skips_whole_file(d) => {
                tracing::info!(locale, duration = d, "media above hard ceiling, skipping whole-file recognition");
                Vec::new()
            }
            _ => self.whole_file(&request, &mut trace).await?,
        };

        let mut segmented = false;
        if let Some(analysis) = request.analysis
            && self.needs_segmentation(analysis.duration, segments.len())
        {
            tracing::info!(
                locale,
                duration = analysis.duration,
                whole_file_segments = segments.len(),
                "escalating to segmentation"
            );
            let chunked = self.segmented(analysis, &request, &mut trace).await?;
            if chunked.len() > segments.len() {
                segments = chunked;
                segmented = true;
            } else {
                tracing::debug!(locale, chunked = chunked.len(), "keeping whole-file result");
            }
        }

        if segments.is_empty()
            && let Some(error) = trace.take_summary_error()
        {
            tracing::warn!(locale, error = %error, "locale failed");
            return Err(error);
        }

        tracing::info!(locale, segments = segments.len(), segmented, "locale finished");
        Ok(LocaleRun {
            transcript: LocaleTranscript::new(locale, segments),
            stages: trace.stages,
            segmented,
        })
    }

    async fn try_stage(
        &self,
        stage: Stage,
        audio: &Path,
        request: &LocaleRequest<'_>,
        trace: &mut Trace,
    ) -> Result<RecognitionOutcome> {
        let outcome = self
            .attempt
            .run(audio, request.locale, request.allow_cloud, request.cancel)
            .await;
        if outcome == RecognitionOutcome::Cancelled {
            return Err(PipelineError::Cancelled);
        }
        trace.record(stage, &outcome, request.locale);
        Ok(outcome)
    }

    async fn whole_file(
        &self,
        request: &LocaleRequest<'_>,
        trace: &mut Trace,
    ) -> Result<Vec<CaptionSegment>> {
        let outcome = self
            .try_stage(Stage::Original, request.media, request, trace)
            .await?;
        if let Some(found) = outcome.segments() {
            return Ok(found.to_vec());
        }

        let mut used_export = false;
        if let Some(analysis) = request.analysis
            && analysis.normalized_audio_path != request.media
        {
            used_export = true;
            let outcome = self
                .try_stage(Stage::Normalized, &analysis.normalized_audio_path, request, trace)
                .await?;
            if let Some(found) = outcome.segments() {
                return Ok(found.to_vec());
            }
        }

        if let Some(analysis) = request.analysis
            && trace.saw_outcome("empty")
            && let Some(start) = self.trim_start(analysis)
        {
            check_cancelled(request.cancel)?;
            let stage = Stage::Trimmed { start };
            match self
                .normalizer
                .trim(&analysis.normalized_audio_path, start, request.arena)
                .await
            {
                Ok(trimmed) => {
                    let outcome = self.try_stage(stage, &trimmed, request, trace).await?;
                    if let Some(found) = outcome.segments() {
                        return Ok(found.iter().map(|s| s.shifted(start)).collect());
                    }
                }
                Err(error) => trace.record_export_failure(stage, error, request.locale),
            }
        }

        if trace.saw_outcome("file-open") && !used_export {
            check_cancelled(request.cancel)?;
            match self
                .normalizer
                .to_normalized_container(request.media, request.arena)
                .await
            {
                Ok(exported) => {
                    let outcome = self
                        .try_stage(Stage::ContainerExport, &exported, request, trace)
                        .await?;
                    if let Some(found) = outcome.segments() {
                        return Ok(found.to_vec());
                    }
                }
                Err(error) => {
                    trace.record_export_failure(Stage::ContainerExport, error, request.locale)
                }
            }
        }

        Ok(Vec::new())
    }

    async fn segmented(
        &self,
        analysis: &AudioAnalysis,
        request: &LocaleRequest<'_>,
        trace: &mut Trace,
    ) -> Result<Vec<CaptionSegment>> {
        check_cancelled(request.cancel)?;
        let exports = self
            .segmentation
            .segment(analysis, self.normalizer.as_ref(), request.arena)
            .await;

        let mut collected = Vec::new();
        for (index, export) in exports.into_iter().enumerate() {
            check_cancelled(request.cancel)?;
            let stage = Stage::Chunk {
                index,
                offset: export.range.start,
            };
            let chunk = match export.chunk {
                Ok(chunk) => chunk,
                Err(error) => {
                    trace.record_export_failure(stage, error, request.locale);
                    continue;
                }
            };
            let outcome = self.try_stage(stage, &chunk.path, request, trace).await?;
            if let Some(found) = outcome.segments() {
                collected.extend(found.iter().map(|s| s.shifted(chunk.offset)));
            }
        }

        sort_by_start(&mut collected);
        Ok(coalesce(collected, self.coalesce_gap))
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::normalizer::{MockNormalizer, NormalizerCall};
    use crate::config::RecognitionConfig;
    use crate::error::RecognizerFailure;
    use crate::segmentation::TimeRange;
    use crate::stt::recognizer::{MockRecognizer, MockResponse, RecognizedSegment, RecognizerError};
    use std::path::PathBuf;

    struct Fixture {
        _dir: tempfile::TempDir,
        media: PathBuf,
        arena: TempArena,
        normalizer: Arc<MockNormalizer>,
    }

    impl Fixture {
        fn new(name: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let media = dir.path().join(name);
            std::fs::write(&media, vec![0u8; 16 * 1024]).unwrap();
            Self {
                _dir: dir,
                media,
                arena: TempArena::new("test").unwrap(),
                normalizer: Arc::new(MockNormalizer::new()),
            }
        }

        fn analysis(&self, duration: f64, leading_silence: f64) -> AudioAnalysis {
            AudioAnalysis {
                duration,
                file_size_bytes: 16 * 1024,
                average_rms_dbfs: -20.0,
                leading_silence,
                normalized_audio_path: self.media.clone(),
            }
        }

        fn orchestrator(&self, recognizer: MockRecognizer) -> FallbackOrchestrator {
            FallbackOrchestrator::new(
                RecognitionAttempt::new(Arc::new(recognizer), &RecognitionConfig::default()),
                self.normalizer.clone(),
                SegmentationEngine::default(),
                FallbackConfig::default(),
                0.15,
            )
        }

        fn request<'a>(
            &'a self,
            analysis: Option<&'a AudioAnalysis>,
            cancel: &'a CancellationToken,
        ) -> LocaleRequest<'a> {
            LocaleRequest {
                media: &self.media,
                analysis,
                locale: "en-US",
                allow_cloud: true,
                arena: &self.arena,
                cancel,
            }
        }
    }

    fn file_name(path: &Path) -> String {
        path.file_name().unwrap().to_string_lossy().into_owned()
    }

    fn labels(run: &LocaleRun) -> Vec<String> {
        run.stages
            .iter()
            .map(|s| format!("{}:{}", s.stage, s.outcome))
            .collect()
    }

    #[test]
    fn segmentation_rules_follow_thresholds() {
        let fixture = Fixture::new("a.wav");
        let orchestrator = fixture.orchestrator(MockRecognizer::new("m"));

        assert!(orchestrator.needs_segmentation(900.0, 500));
        assert!(orchestrator.needs_segmentation(121.0, 0));
        assert!(!orchestrator.needs_segmentation(120.0, 0));
        assert!(orchestrator.needs_segmentation(600.0, 39));
        assert!(!orchestrator.needs_segmentation(600.0, 40));
        assert!(!orchestrator.needs_segmentation(300.0, 5));
    }

    #[test]
    fn trim_start_backs_off_from_silence_end() {
        let fixture = Fixture::new("a.wav");
        let orchestrator = fixture.orchestrator(MockRecognizer::new("m"));

        let start = orchestrator.trim_start(&fixture.analysis(30.0, 2.0)).unwrap();
        assert!((start - 1.8).abs() < 1e-9);
        assert_eq!(orchestrator.trim_start(&fixture.analysis(30.0, 0.5)), None);
        assert_eq!(orchestrator.trim_start(&fixture.analysis(15.0, 2.0)), None);
        assert_eq!(
            orchestrator.trim_start(&fixture.analysis(30.0, 0.6)),
            Some(0.6 - 0.2)
        );
    }

    #[tokio::test]
    async fn original_success_short_circuits() {
        let fixture = Fixture::new("talk.wav");
        let recognizer = MockRecognizer::new("m")
            .with_locale("en-US", true)
            .with_segments(vec![RecognizedSegment::new("hello", 0.0, 1.0)]);
        let analysis = fixture.analysis(300.0, 0.0);
        let cancel = CancellationToken::new();

        let run = fixture
            .orchestrator(recognizer.clone())
            .run(fixture.request(Some(&analysis), &cancel))
            .await
            .unwrap();

        assert_eq!(run.transcript.segments, vec![CaptionSegment::new("hello", 0.0, 1.0)]);
        assert_eq!(labels(&run), vec!["original:success"]);
        assert!(!run.segmented);
        assert_eq!(recognizer.calls().len(), 1);
    }

    #[tokio::test]
    async fn empty_result_with_leading_silence_retries_trimmed_and_shifts() {
        let fixture = Fixture::new("talk.wav");
        let recognizer = MockRecognizer::new("m")
            .with_locale("en-US", true)
            .with_handler(|path, _| {
                if file_name(path).starts_with("trim-") {
                    MockResponse::Segments(vec![RecognizedSegment::new("finally", 0.5, 1.0)])
                } else {
                    MockResponse::no_speech()
                }
            });
        let analysis = fixture.analysis(30.0, 2.0);
        let cancel = CancellationToken::new();

        let run = fixture
            .orchestrator(recognizer)
            .run(fixture.request(Some(&analysis), &cancel))
            .await
            .unwrap();

        assert_eq!(labels(&run), vec!["original:empty", "trimmed@1.80s:success"]);
        assert_eq!(run.transcript.segments.len(), 1);
        assert!((run.transcript.segments[0].start - 2.3).abs() < 1e-9);
        assert_eq!(
            fixture.normalizer.calls(),
            vec![NormalizerCall::Export {
                input: fixture.media.clone(),
                range: TimeRange::from(1.8)
            }]
        );
    }

    #[tokio::test]
    async fn distinct_normalized_path_is_tried_second() {
        let fixture = Fixture::new("movie.mkv");
        let normalized = fixture.arena.allocate("normalized", "wav");
        std::fs::write(&normalized, vec![0u8; 8192]).unwrap();
        let mut analysis = fixture.analysis(60.0, 0.0);
        analysis.normalized_audio_path = normalized.clone();

        let target = normalized.clone();
        let recognizer = MockRecognizer::new("m")
            .with_locale("en-US", true)
            .with_handler(move |path, _| {
                if path == target {
                    MockResponse::Segments(vec![RecognizedSegment::new("ok", 0.0, 1.0)])
                } else {
                    MockResponse::file_open_failure()
                }
            });
        let cancel = CancellationToken::new();

        let run = fixture
            .orchestrator(recognizer)
            .run(fixture.request(Some(&analysis), &cancel))
            .await
            .unwrap();

        assert_eq!(labels(&run), vec!["original:file-open", "normalized:success"]);
        assert!(fixture.normalizer.calls().is_empty());
    }

    #[tokio::test]
    async fn file_open_failure_triggers_container_export() {
        let fixture = Fixture::new("talk.wav");
        let recognizer = MockRecognizer::new("m")
            .with_locale("en-US", true)
            .with_handler(|path, _| {
                if file_name(path).starts_with("normalized-") {
                    MockResponse::Segments(vec![RecognizedSegment::new("rescued", 0.0, 1.0)])
                } else {
                    MockResponse::file_open_failure()
                }
            });
        let cancel = CancellationToken::new();

        let run = fixture
            .orchestrator(recognizer)
            .run(fixture.request(None, &cancel))
            .await
            .unwrap();

        assert_eq!(labels(&run), vec!["original:file-open", "container-export:success"]);
        assert_eq!(run.transcript.segments[0].text, "rescued");
    }

    #[tokio::test]
    async fn hard_ceiling_skips_whole_file_and_segments() {
        let fixture = Fixture::new("lecture.wav");
        let recognizer = MockRecognizer::new("m")
            .with_locale("en-US", true)
            .with_handler(|path, _| {
                if file_name(path).starts_with("chunk-") {
                    MockResponse::Segments(vec![RecognizedSegment::new("part", 1.0, 2.0)])
                } else {
                    MockResponse::Segments(vec![RecognizedSegment::new("whole", 0.0, 1.0)])
                }
            });
        let analysis = fixture.analysis(1000.0, 0.0);
        let cancel = CancellationToken::new();

        let run = fixture
            .orchestrator(recognizer.clone())
            .run(fixture.request(Some(&analysis), &cancel))
            .await
            .unwrap();

        assert!(run.stages.iter().all(StageReport::is_chunk));
        assert_eq!(recognizer.calls_with_prefix("chunk-"), 4);
        assert_eq!(recognizer.calls().len(), 4);
        let starts: Vec<f64> = run.transcript.segments.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![1.0, 301.0, 601.0, 901.0]);
        assert!(run.segmented);
    }

    #[tokio::test]
    async fn failing_chunk_is_skipped() {
        let fixture = Fixture::new("lecture.wav");
        let recognizer = MockRecognizer::new("m")
            .with_locale("en-US", true)
            .with_handler(|path, _| {
                if file_name(path) == "chunk-0001.wav" {
                    MockResponse::Fail(RecognizerError::new("test", 7, "decoder exploded"))
                } else {
                    MockResponse::Segments(vec![RecognizedSegment::new("part", 1.0, 2.0)])
                }
            });
        let analysis = fixture.analysis(1000.0, 0.0);
        let cancel = CancellationToken::new();

        let run = fixture
            .orchestrator(recognizer)
            .run(fixture.request(Some(&analysis), &cancel))
            .await
            .unwrap();

        assert_eq!(run.transcript.segments.len(), 3);
        assert_eq!(run.stages.len(), 4);
        assert_eq!(run.stages[1].outcome, "recognizer-error");
    }

    #[tokio::test]
    async fn failed_chunk_export_skips_only_that_chunk() {
        let mut fixture = Fixture::new("lecture.wav");
        fixture.normalizer = Arc::new(MockNormalizer::new().with_export_failure_at(600.0));
        let recognizer = MockRecognizer::new("m")
            .with_locale("en-US", true)
            .with_segments(vec![RecognizedSegment::new("part", 1.0, 2.0)]);
        let analysis = fixture.analysis(1000.0, 0.0);
        let cancel = CancellationToken::new();

        let run = fixture
            .orchestrator(recognizer.clone())
            .run(fixture.request(Some(&analysis), &cancel))
            .await
            .unwrap();

        assert_eq!(recognizer.calls_with_prefix("chunk-"), 3);
        assert_eq!(
            labels(&run),
            vec![
                "chunk#0@0.0s:success",
                "chunk#1@300.0s:success",
                "chunk#2@600.0s:export-failed",
                "chunk#3@900.0s:success",
            ]
        );
        let starts: Vec<f64> = run.transcript.segments.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![1.0, 301.0, 901.0]);
        assert!(run.segmented);
    }

    #[tokio::test]
    async fn every_chunk_export_failing_fails_the_locale() {
        let mut fixture = Fixture::new("lecture.wav");
        fixture.normalizer = Arc::new(MockNormalizer::new().with_export_failure());
        let recognizer = MockRecognizer::new("m")
            .with_locale("en-US", true)
            .with_segments(vec![RecognizedSegment::new("part", 1.0, 2.0)]);
        let analysis = fixture.analysis(1000.0, 0.0);
        let cancel = CancellationToken::new();

        let result = fixture
            .orchestrator(recognizer.clone())
            .run(fixture.request(Some(&analysis), &cancel))
            .await;

        assert!(matches!(result, Err(PipelineError::ExportFailed { .. })));
        assert!(recognizer.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_whole_file_on_medium_media_forces_segmentation() {
        let fixture = Fixture::new("talk.wav");
        let recognizer = MockRecognizer::new("m")
            .with_locale("en-US", true)
            .with_handler(|path, _| {
                if file_name(path).starts_with("chunk-") {
                    MockResponse::Segments(vec![RecognizedSegment::new("found", 2.0, 1.0)])
                } else {
                    MockResponse::no_speech()
                }
            });
        let analysis = fixture.analysis(300.0, 0.0);
        let cancel = CancellationToken::new();

        let run = fixture
            .orchestrator(recognizer)
            .run(fixture.request(Some(&analysis), &cancel))
            .await
            .unwrap();

        assert_eq!(
            labels(&run),
            vec!["original:empty", "chunk#0@0.0s:success"]
        );
        assert!(run.segmented);
        assert_eq!(run.transcript.segments, vec![CaptionSegment::new("found", 2.0, 1.0)]);
        assert_eq!(
            fixture.normalizer.calls(),
            vec![NormalizerCall::Export {
                input: fixture.media.clone(),
                range: TimeRange::new(0.0, 300.0)
            }]
        );
    }

    #[tokio::test]
    async fn long_audio_with_few_segments_prefers_richer_segmentation() {
        let fixture = Fixture::new("talk.wav");
        let recognizer = MockRecognizer::new("m")
            .with_locale("en-US", true)
            .with_handler(|path, _| {
                if file_name(path).starts_with("chunk-") {
                    MockResponse::Segments(vec![
                        RecognizedSegment::new("a", 0.0, 1.0),
                        RecognizedSegment::new("b", 2.0, 1.0),
                    ])
                } else {
                    MockResponse::Segments(vec![RecognizedSegment::new("only", 0.0, 1.0)])
                }
            });
        let analysis = fixture.analysis(650.0, 0.0);
        let cancel = CancellationToken::new();

        let run = fixture
            .orchestrator(recognizer)
            .run(fixture.request(Some(&analysis), &cancel))
            .await
            .unwrap();

        assert!(run.segmented);
        assert_eq!(run.transcript.segments.len(), 6);
        assert_eq!(run.stages[0].stage, Stage::Original);
    }

    #[tokio::test]
    async fn poorer_segmentation_keeps_whole_file_result() {
        let fixture = Fixture::new("talk.wav");
        let recognizer = MockRecognizer::new("m")
            .with_locale("en-US", true)
            .with_handler(|path, _| {
                if file_name(path).starts_with("chunk-") {
                    MockResponse::no_speech()
                } else {
                    MockResponse::Segments(vec![RecognizedSegment::new("only", 0.0, 1.0)])
                }
            });
        let analysis = fixture.analysis(650.0, 0.0);
        let cancel = CancellationToken::new();

        let run = fixture
            .orchestrator(recognizer)
            .run(fixture.request(Some(&analysis), &cancel))
            .await
            .unwrap();

        assert!(!run.segmented);
        assert_eq!(run.transcript.segments, vec![CaptionSegment::new("only", 0.0, 1.0)]);
    }

    #[tokio::test]
    async fn missing_analysis_is_whole_file_only() {
        let fixture = Fixture::new("talk.wav");
        let recognizer = MockRecognizer::new("m")
            .with_locale("en-US", true)
            .with_handler(|_, _| MockResponse::no_speech());
        let cancel = CancellationToken::new();

        let run = fixture
            .orchestrator(recognizer.clone())
            .run(fixture.request(None, &cancel))
            .await
            .unwrap();

        assert!(run.transcript.is_empty());
        assert_eq!(labels(&run), vec!["original:empty"]);
        assert_eq!(recognizer.calls().len(), 1);
    }

    #[tokio::test]
    async fn empty_without_hard_error_is_not_a_failure() {
        let fixture = Fixture::new("talk.wav");
        let recognizer = MockRecognizer::new("m")
            .with_locale("en-US", true)
            .with_handler(|_, _| MockResponse::no_speech());
        let analysis = fixture.analysis(200.0, 0.0);
        let cancel = CancellationToken::new();

        let run = fixture
            .orchestrator(recognizer)
            .run(fixture.request(Some(&analysis), &cancel))
            .await
            .unwrap();

        assert!(run.transcript.is_empty());
        assert!(run.stages.iter().any(StageReport::is_chunk));
    }

    #[tokio::test]
    async fn hard_error_with_no_segments_fails_locale() {
        let fixture = Fixture::new("talk.wav");
        let recognizer = MockRecognizer::new("m")
            .with_locale("en-US", true)
            .with_handler(|_, _| {
                MockResponse::Fail(RecognizerError::new("test", 9, "service unavailable"))
            });
        let cancel = CancellationToken::new();

        let result = fixture
            .orchestrator(recognizer)
            .run(fixture.request(None, &cancel))
            .await;

        assert!(matches!(
            result,
            Err(PipelineError::RecognizerFailed(RecognizerFailure::Unknown(_)))
        ));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_any_attempt() {
        let fixture = Fixture::new("talk.wav");
        let recognizer = MockRecognizer::new("m").with_locale("en-US", true);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = fixture
            .orchestrator(recognizer.clone())
            .run(fixture.request(None, &cancel))
            .await;

        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert!(recognizer.calls().is_empty());
    }
}
