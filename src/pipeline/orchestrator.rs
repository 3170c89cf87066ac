//! The caller-facing transcription pipeline.
//!
//! Exactly one invocation is current at a time: starting a new one cancels the
//! previous one before any work begins. Media preparation (analysis plus the
//! normalized container) is cached for the most recent media file; trim and
//! chunk exports live in a per-invocation arena removed when the invocation
//! ends, however it ends.

use crate::audio::analyzer::{AudioAnalysis, AudioAnalyzer};
use crate::audio::normalizer::{ContainerNormalizer, is_recognizer_friendly};
use crate::audio::temp::{CleanupStats, TempArena};
use crate::caption::CaptionSegment;
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::pipeline::fallback::{FallbackOrchestrator, LocaleRequest, LocaleRun};
use crate::pipeline::merge::MergeEngine;
use crate::segmentation::SegmentationEngine;
use crate::stt::attempt::RecognitionAttempt;
use crate::stt::recognizer::SpeechRecognizer;
use futures_util::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Identity of a media file for preparation caching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaKey {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl MediaKey {
    pub async fn of(path: &Path) -> Result<Self> {
        let unreadable = |e: std::io::Error| PipelineError::FileUnreadable {
            path: path.display().to_string(),
            message: e.to_string(),
        };
        let canonical = tokio::fs::canonicalize(path).await.map_err(unreadable)?;
        let metadata = tokio::fs::metadata(&canonical).await.map_err(unreadable)?;
        Ok(Self {
            path: canonical,
            size: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

/// Analysis and normalized container for one media file.
#[derive(Debug)]
struct PreparedMedia {
    key: MediaKey,
    analysis: Option<AudioAnalysis>,
    // Owns the normalized container; dropped with the cache entry
    _arena: TempArena,
}

/// A locale that failed outright.
#[derive(Debug)]
pub struct LocaleFailure {
    pub locale: String,
    pub error: PipelineError,
}

/// Everything one invocation produced.
#[derive(Debug)]
pub struct TranscriptionReport {
    pub captions: Vec<CaptionSegment>,
    pub runs: Vec<LocaleRun>,
    pub failures: Vec<LocaleFailure>,
    /// Requested locales dropped by the capability filter
    pub skipped_locales: Vec<String>,
    pub analysis: Option<AudioAnalysis>,
    pub cleanup: CleanupStats,
}

#[derive(Debug)]
struct Invocation {
    id: u64,
    token: CancellationToken,
}

/// Multilingual transcription over one recognizer and one normalizer.
pub struct TranscriptionPipeline {
    recognizer: Arc<dyn SpeechRecognizer>,
    normalizer: Arc<dyn ContainerNormalizer>,
    analyzer: AudioAnalyzer,
    fallback: FallbackOrchestrator,
    merge: MergeEngine,
    concurrent_locales: bool,
    allow_cloud: AtomicBool,
    next_id: AtomicU64,
    current: Mutex<Option<Invocation>>,
    prepared: Mutex<Option<Arc<PreparedMedia>>>,
}

/// Clears the current-invocation slot when an invocation ends or is dropped.
struct SlotGuard<'a> {
    pipeline: &'a TranscriptionPipeline,
    id: u64,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut current = lock(&self.pipeline.current);
        if current.as_ref().is_some_and(|inv| inv.id == self.id) {
            *current = None;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TranscriptionPipeline {
    /// Build a pipeline from configuration.
    pub fn new(
        config: &Config,
        recognizer: Arc<dyn SpeechRecognizer>,
        normalizer: Arc<dyn ContainerNormalizer>,
    ) -> Result<Self> {
        config.validate()?;
        let attempt = RecognitionAttempt::new(recognizer.clone(), &config.recognition);
        let segmentation = SegmentationEngine::new(config.segmentation.clone())?;
        let fallback = FallbackOrchestrator::new(
            attempt,
            normalizer.clone(),
            segmentation,
            config.fallback.clone(),
            config.merge.coalesce_gap,
        );

        Ok(Self {
            recognizer,
            normalizer,
            analyzer: AudioAnalyzer::new(config.analysis.clone()),
            fallback,
            merge: MergeEngine::new(config.merge.clone()),
            concurrent_locales: config.recognition.concurrent_locales,
            allow_cloud: AtomicBool::new(config.recognition.allow_cloud),
            next_id: AtomicU64::new(1),
            current: Mutex::new(None),
            prepared: Mutex::new(None),
        })
    }

    /// Permit or forbid recognition that needs the network.
    pub fn set_allow_cloud(&self, allow: bool) {
        self.allow_cloud.store(allow, Ordering::SeqCst);
    }

    pub fn allows_cloud(&self) -> bool {
        self.allow_cloud.load(Ordering::SeqCst)
    }

    /// Cancel the current invocation, if any.
    pub fn cancel(&self) {
        if let Some(invocation) = lock(&self.current).as_ref() {
            tracing::info!(invocation = invocation.id, "cancelling transcription");
            invocation.token.cancel();
        }
    }

    /// Whether an invocation is currently running.
    pub fn is_busy(&self) -> bool {
        lock(&self.current).is_some()
    }

    /// Drop the cached media preparation and its normalized container.
    pub fn invalidate_cache(&self) {
        if lock(&self.prepared).take().is_some() {
            tracing::debug!("media preparation cache cleared");
        }
    }

    /// Install an analysis computed elsewhere for `media`.
    ///
    /// Later invocations on the unchanged file use it instead of analyzing.
    pub async fn seed_analysis(&self, media: &Path, analysis: AudioAnalysis) -> Result<()> {
        let key = MediaKey::of(media).await?;
        let arena = TempArena::new("media")?;
        *lock(&self.prepared) = Some(Arc::new(PreparedMedia {
            key,
            analysis: Some(analysis),
            _arena: arena,
        }));
        Ok(())
    }

    /// Transcribe `media` in the requested locales.
    ///
    /// Cancels whatever invocation was running. A cancelled invocation
    /// returns `Cancelled`, never partial captions.
    pub async fn transcribe(&self, media: &Path, locales: &[String]) -> Result<Vec<CaptionSegment>> {
        self.transcribe_detailed(media, locales)
            .await
            .map(|report| report.captions)
    }

    /// Like [`transcribe`](Self::transcribe), returning per-locale detail.
    pub async fn transcribe_detailed(
        &self,
        media: &Path,
        locales: &[String],
    ) -> Result<TranscriptionReport> {
        let invocation = self.begin();
        self.execute(invocation, media, locales).await
    }

    /// Spawn an invocation and return its handle.
    ///
    /// The previous invocation is cancelled before this returns.
    pub fn start(self: &Arc<Self>, media: PathBuf, locales: Vec<String>) -> TranscriptionHandle {
        let invocation = self.begin();
        let token = invocation.token.clone();
        let pipeline = Arc::clone(self);
        let task = tokio::spawn(async move {
            pipeline
                .execute(invocation, &media, &locales)
                .await
                .map(|report| report.captions)
        });
        TranscriptionHandle { token, task }
    }

    /// Replace the current invocation, cancelling the old one first.
    fn begin(&self) -> Invocation {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();

        let mut current = lock(&self.current);
        if let Some(previous) = current.take() {
            tracing::info!(previous = previous.id, next = id, "superseding running transcription");
            previous.token.cancel();
        }
        *current = Some(Invocation {
            id,
            token: token.clone(),
        });
        Invocation { id, token }
    }

    async fn execute(
        &self,
        invocation: Invocation,
        media: &Path,
        locales: &[String],
    ) -> Result<TranscriptionReport> {
        let _slot = SlotGuard {
            pipeline: self,
            id: invocation.id,
        };
        let token = invocation.token;

        tracing::info!(
            invocation = invocation.id,
            media = %media.display(),
            ?locales,
            "transcription started"
        );

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(PipelineError::Cancelled),
            result = self.run(media, locales, &token) => result,
        };

        match &result {
            Ok(report) => tracing::info!(
                invocation = invocation.id,
                captions = report.captions.len(),
                failed_locales = report.failures.len(),
                "transcription finished"
            ),
            Err(PipelineError::Cancelled) => {
                tracing::info!(invocation = invocation.id, "transcription cancelled")
            }
            Err(e) => tracing::warn!(invocation = invocation.id, error = %e, "transcription failed"),
        }
        result
    }

    /// Requested locales usable under the current cloud policy, deduplicated.
    fn capable_locales(&self, locales: &[String], allow_cloud: bool) -> (Vec<String>, Vec<String>) {
        let mut usable: Vec<String> = Vec::new();
        let mut skipped = Vec::new();
        for locale in locales {
            let locale = locale.trim();
            if locale.is_empty() || usable.iter().any(|l| l == locale) {
                continue;
            }
            if self.recognizer.capability(locale).usable(allow_cloud) {
                usable.push(locale.to_string());
            } else {
                tracing::info!(locale, allow_cloud, "locale not usable, skipping");
                skipped.push(locale.to_string());
            }
        }
        (usable, skipped)
    }

    async fn run(
        &self,
        media: &Path,
        locales: &[String],
        token: &CancellationToken,
    ) -> Result<TranscriptionReport> {
        let allow_cloud = self.allows_cloud();
        let (usable, skipped_locales) = self.capable_locales(locales, allow_cloud);
        if usable.is_empty() {
            return Err(PipelineError::NoCapableLocales {
                requested: locales.to_vec(),
            });
        }

        let prepared = self.prepare(media).await?;
        if token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let arena = TempArena::new("run")?;
        let base = LocaleRequest {
            media,
            analysis: prepared.analysis.as_ref(),
            locale: "",
            allow_cloud,
            arena: &arena,
            cancel: token,
        };

        let results: Vec<(String, Result<LocaleRun>)> = if self.concurrent_locales {
            let futures = usable.iter().map(|locale| async move {
                let result = self.fallback.run(LocaleRequest { locale, ..base }).await;
                (locale.clone(), result)
            });
            join_all(futures).await
        } else {
            let mut results = Vec::with_capacity(usable.len());
            for locale in &usable {
                let result = self.fallback.run(LocaleRequest { locale, ..base }).await;
                let cancelled = matches!(result, Err(PipelineError::Cancelled));
                results.push((locale.clone(), result));
                if cancelled {
                    break;
                }
            }
            results
        };

        if token.is_cancelled()
            || results
                .iter()
                .any(|(_, r)| matches!(r, Err(PipelineError::Cancelled)))
        {
            return Err(PipelineError::Cancelled);
        }

        let mut runs = Vec::new();
        let mut failures = Vec::new();
        for (locale, result) in results {
            match result {
                Ok(run) => runs.push(run),
                Err(error) => failures.push(LocaleFailure { locale, error }),
            }
        }

        if runs.is_empty() {
            return Err(failures
                .into_iter()
                .next()
                .map(|f| f.error)
                .unwrap_or(PipelineError::NoCapableLocales {
                    requested: locales.to_vec(),
                }));
        }
        for failure in &failures {
            tracing::warn!(locale = %failure.locale, error = %failure.error, "locale dropped from merge");
        }

        let transcripts: Vec<_> = runs.iter().map(|run| run.transcript.clone()).collect();
        let captions = self.merge.merge(&transcripts);

        let cleanup = match arena.close() {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(error = %e, "failed to remove invocation temp files");
                CleanupStats::default()
            }
        };

        Ok(TranscriptionReport {
            captions,
            runs,
            failures,
            skipped_locales,
            analysis: prepared.analysis.clone(),
            cleanup,
        })
    }

    /// Analysis and normalized container for `media`, from cache when the
    /// file is unchanged.
    async fn prepare(&self, media: &Path) -> Result<Arc<PreparedMedia>> {
        let key = MediaKey::of(media).await?;
        let cached = lock(&self.prepared)
            .as_ref()
            .filter(|cached| cached.key == key)
            .cloned();
        if let Some(cached) = cached {
            tracing::debug!(media = %media.display(), "using cached media preparation");
            return Ok(cached);
        }

        let arena = TempArena::new("media")?;
        let analysis = match self.analyzer.analyze(media).await {
            Ok(stats) => {
                let normalized = self.normalized_path(media, &arena).await;
                Some(stats.with_normalized_path(normalized))
            }
            Err(e) => {
                tracing::warn!(media = %media.display(), error = %e, "audio analysis failed, whole-file recognition only");
                None
            }
        };

        let prepared = Arc::new(PreparedMedia {
            key,
            analysis,
            _arena: arena,
        });
        *lock(&self.prepared) = Some(Arc::clone(&prepared));
        Ok(prepared)
    }

    async fn normalized_path(&self, media: &Path, arena: &TempArena) -> PathBuf {
        if is_recognizer_friendly(media) {
            return media.to_path_buf();
        }
        match self.normalizer.to_normalized_container(media, arena).await {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(media = %media.display(), error = %e, "normalization failed, using original container");
                media.to_path_buf()
            }
        }
    }
}

impl std::fmt::Debug for TranscriptionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptionPipeline")
            .field("recognizer", &self.recognizer.name())
            .field("concurrent_locales", &self.concurrent_locales)
            .field("allow_cloud", &self.allows_cloud())
            .finish_non_exhaustive()
    }
}

/// Handle to a spawned invocation.
#[derive(Debug)]
pub struct TranscriptionHandle {
    token: CancellationToken,
    task: JoinHandle<Result<Vec<CaptionSegment>>>,
}

impl TranscriptionHandle {
    /// Cancel this invocation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the invocation's captions.
    pub async fn wait(self) -> Result<Vec<CaptionSegment>> {
        self.task
            .await
            .map_err(|e| PipelineError::Other(format!("transcription task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::normalizer::MockNormalizer;
    use crate::stt::recognizer::{MockRecognizer, MockResponse, RecognizedSegment};

    fn media_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, vec![0u8; 16 * 1024]).unwrap();
        path
    }

    fn pipeline(recognizer: MockRecognizer) -> TranscriptionPipeline {
        TranscriptionPipeline::new(
            &Config::default(),
            Arc::new(recognizer),
            Arc::new(MockNormalizer::new()),
        )
        .unwrap()
    }

    fn locales(list: &[&str]) -> Vec<String> {
        list.iter().map(|l| l.to_string()).collect()
    }

    #[tokio::test]
    async fn no_capable_locales_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let media = media_file(dir.path(), "a.wav");
        let recognizer = MockRecognizer::new("m").with_locale("en-US", false);
        let pipeline = pipeline(recognizer);
        pipeline.set_allow_cloud(false);

        let result = pipeline.transcribe(&media, &locales(&["en-US", "fr-FR"])).await;

        assert!(matches!(
            result,
            Err(PipelineError::NoCapableLocales { ref requested }) if requested.len() == 2
        ));
    }

    #[tokio::test]
    async fn cloud_toggle_filters_locales_before_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let media = media_file(dir.path(), "a.wav");
        let recognizer = MockRecognizer::new("m")
            .with_locale("en-US", true)
            .with_locale("zh-Hant", false)
            .with_segments(vec![RecognizedSegment::new("hello", 0.0, 1.0)]);
        let pipeline = pipeline(recognizer.clone());
        pipeline.set_allow_cloud(false);
        assert!(!pipeline.allows_cloud());

        let report = pipeline
            .transcribe_detailed(&media, &locales(&["zh-Hant", "en-US", "en-US"]))
            .await
            .unwrap();

        assert_eq!(report.skipped_locales, vec!["zh-Hant".to_string()]);
        assert!(recognizer.calls().iter().all(|c| c.locale == "en-US"));
        assert_eq!(recognizer.calls().len(), 1);
    }

    #[tokio::test]
    async fn one_failed_locale_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let media = media_file(dir.path(), "a.wav");
        let recognizer = MockRecognizer::new("m")
            .with_locale("en-US", true)
            .with_locale("ja-JP", true)
            .with_handler(|_, locale| {
                if locale == "en-US" {
                    MockResponse::Segments(vec![RecognizedSegment::new("hello", 0.0, 1.0)])
                } else {
                    MockResponse::Fail(crate::stt::recognizer::RecognizerError::new(
                        "m",
                        5,
                        "service unavailable",
                    ))
                }
            });

        let report = pipeline(recognizer)
            .transcribe_detailed(&media, &locales(&["ja-JP", "en-US"]))
            .await
            .unwrap();

        assert_eq!(report.captions.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].locale, "ja-JP");
    }

    #[tokio::test]
    async fn all_locales_failing_surfaces_first_error() {
        let dir = tempfile::tempdir().unwrap();
        let media = media_file(dir.path(), "a.wav");
        let recognizer = MockRecognizer::new("m")
            .with_locale("en-US", true)
            .with_handler(|_, _| {
                MockResponse::Fail(crate::stt::recognizer::RecognizerError::new(
                    "m",
                    5,
                    "not authorized",
                ))
            });

        let result = pipeline(recognizer).transcribe(&media, &locales(&["en-US"])).await;
        assert!(matches!(
            result,
            Err(PipelineError::RecognizerFailed(
                crate::error::RecognizerFailure::AuthorizationDenied
            ))
        ));
    }

    #[tokio::test]
    async fn missing_media_is_unreadable() {
        let recognizer = MockRecognizer::new("m").with_locale("en-US", true);
        let result = pipeline(recognizer)
            .transcribe(Path::new("/nonexistent/media.mov"), &locales(&["en-US"]))
            .await;
        assert!(matches!(result, Err(PipelineError::FileUnreadable { .. })));
    }

    #[tokio::test]
    async fn slot_is_cleared_after_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let media = media_file(dir.path(), "a.wav");
        let recognizer = MockRecognizer::new("m").with_locale("en-US", true);
        let pipeline = pipeline(recognizer);

        pipeline.transcribe(&media, &locales(&["en-US"])).await.unwrap();
        assert!(!pipeline.is_busy());
    }

    #[tokio::test]
    async fn seeded_analysis_is_reused_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let media = media_file(dir.path(), "a.wav");
        let recognizer = MockRecognizer::new("m")
            .with_locale("en-US", true)
            .with_segments(vec![RecognizedSegment::new("hi", 0.0, 1.0)]);
        let pipeline = pipeline(recognizer);
        let analysis = AudioAnalysis {
            duration: 42.0,
            file_size_bytes: 16 * 1024,
            average_rms_dbfs: -20.0,
            leading_silence: 0.0,
            normalized_audio_path: media.clone(),
        };

        pipeline.seed_analysis(&media, analysis.clone()).await.unwrap();
        let report = pipeline
            .transcribe_detailed(&media, &locales(&["en-US"]))
            .await
            .unwrap();
        assert_eq!(report.analysis, Some(analysis));

        pipeline.invalidate_cache();
        let report = pipeline
            .transcribe_detailed(&media, &locales(&["en-US"]))
            .await
            .unwrap();
        // Placeholder bytes are not decodable audio
        assert_eq!(report.analysis, None);
    }

    #[tokio::test]
    async fn invocation_arena_is_removed_after_run() {
        let dir = tempfile::tempdir().unwrap();
        let media = media_file(dir.path(), "a.wav");
        let recognizer = MockRecognizer::new("m")
            .with_locale("en-US", true)
            .with_handler(|path, _| {
                if path.file_name().unwrap().to_string_lossy().starts_with("trim-") {
                    MockResponse::Segments(vec![RecognizedSegment::new("late", 0.0, 1.0)])
                } else {
                    MockResponse::no_speech()
                }
            });
        let pipeline = pipeline(recognizer.clone());
        pipeline
            .seed_analysis(
                &media,
                AudioAnalysis {
                    duration: 30.0,
                    file_size_bytes: 16 * 1024,
                    average_rms_dbfs: -30.0,
                    leading_silence: 2.0,
                    normalized_audio_path: media.clone(),
                },
            )
            .await
            .unwrap();

        let report = pipeline
            .transcribe_detailed(&media, &locales(&["en-US"]))
            .await
            .unwrap();

        assert_eq!(report.cleanup.files_allocated, 1);
        let trimmed = recognizer
            .calls()
            .into_iter()
            .find(|c| c.path.file_name().unwrap().to_string_lossy().starts_with("trim-"))
            .unwrap();
        assert!(!trimmed.path.exists());
    }
}
