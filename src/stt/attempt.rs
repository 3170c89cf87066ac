//! One locale-bound recognition call against one audio file.
//!
//! The recognizer future races a timer and the invocation's cancellation
//! token; whichever finishes first decides the outcome and the others are
//! dropped.

use crate::caption::CaptionSegment;
use crate::config::RecognitionConfig;
use crate::error::{PipelineError, RecognizerFailure};
use crate::stt::recognizer::{FailureClass, RecognizedSegment, RecognizerError, SpeechRecognizer};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Typed recognizer failure kinds an attempt can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerErrorKind {
    TooShort { bytes: u64, minimum: u64 },
    UnsupportedLocale,
    FileOpen,
    AuthorizationDenied,
    Unknown,
}

/// Result of a single recognition attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionOutcome {
    Success(Vec<CaptionSegment>),
    EmptyResult,
    Timeout,
    RecognizerError {
        kind: RecognizerErrorKind,
        message: String,
    },
    Cancelled,
}

impl RecognitionOutcome {
    fn error(kind: RecognizerErrorKind, message: impl Into<String>) -> Self {
        RecognitionOutcome::RecognizerError {
            kind,
            message: message.into(),
        }
    }

    /// Non-empty segments, if the attempt succeeded.
    pub fn segments(&self) -> Option<&[CaptionSegment]> {
        match self {
            RecognitionOutcome::Success(segments) if !segments.is_empty() => Some(segments),
            _ => None,
        }
    }

    pub fn is_file_open_failure(&self) -> bool {
        matches!(
            self,
            RecognitionOutcome::RecognizerError {
                kind: RecognizerErrorKind::FileOpen,
                ..
            }
        )
    }

    /// Short label for logs and stage reports.
    pub fn kind_label(&self) -> &'static str {
        match self {
            RecognitionOutcome::Success(_) => "success",
            RecognitionOutcome::EmptyResult => "empty",
            RecognitionOutcome::Timeout => "timeout",
            RecognitionOutcome::RecognizerError { kind, .. } => match kind {
                RecognizerErrorKind::TooShort { .. } => "too-short",
                RecognizerErrorKind::UnsupportedLocale => "unsupported-locale",
                RecognizerErrorKind::FileOpen => "file-open",
                RecognizerErrorKind::AuthorizationDenied => "authorization-denied",
                RecognizerErrorKind::Unknown => "recognizer-error",
            },
            RecognitionOutcome::Cancelled => "cancelled",
        }
    }

    /// Map an unsuccessful outcome to the pipeline error it stands for.
    ///
    /// `Success` with segments has no error and yields `None`.
    pub fn to_error(&self, locale: &str) -> Option<PipelineError> {
        let error = match self {
            RecognitionOutcome::Success(segments) if !segments.is_empty() => return None,
            RecognitionOutcome::Success(_) | RecognitionOutcome::EmptyResult => {
                PipelineError::RecognizerFailed(RecognizerFailure::EmptyResult)
            }
            RecognitionOutcome::Timeout => PipelineError::RecognizerFailed(RecognizerFailure::Timeout),
            RecognitionOutcome::Cancelled => PipelineError::Cancelled,
            RecognitionOutcome::RecognizerError { kind, message } => match kind {
                RecognizerErrorKind::TooShort { bytes, minimum } => PipelineError::TooShortAudio {
                    bytes: *bytes,
                    minimum: *minimum,
                },
                RecognizerErrorKind::UnsupportedLocale => PipelineError::UnsupportedLocale {
                    locale: locale.to_string(),
                },
                RecognizerErrorKind::AuthorizationDenied => {
                    PipelineError::RecognizerFailed(RecognizerFailure::AuthorizationDenied)
                }
                RecognizerErrorKind::FileOpen | RecognizerErrorKind::Unknown => {
                    PipelineError::RecognizerFailed(RecognizerFailure::Unknown(message.clone()))
                }
            },
        };
        Some(error)
    }
}

impl fmt::Display for RecognitionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionOutcome::Success(segments) => write!(f, "success ({} segments)", segments.len()),
            RecognitionOutcome::RecognizerError { message, .. } => {
                write!(f, "{}: {}", self.kind_label(), message)
            }
            other => write!(f, "{}", other.kind_label()),
        }
    }
}

/// Runs single recognizer calls under the size gate, capability gate and
/// timeout.
#[derive(Clone)]
pub struct RecognitionAttempt {
    recognizer: Arc<dyn SpeechRecognizer>,
    timeout: Duration,
    min_file_bytes: u64,
}

impl RecognitionAttempt {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, config: &RecognitionConfig) -> Self {
        Self {
            recognizer,
            timeout: config.timeout(),
            min_file_bytes: config.min_file_bytes,
        }
    }

    /// Override the per-call ceiling.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn min_file_bytes(&self) -> u64 {
        self.min_file_bytes
    }

    pub fn recognizer_name(&self) -> &str {
        self.recognizer.name()
    }

    /// Recognize `audio` in `locale`.
    ///
    /// Segments come back in recognizer order with blank text dropped.
    pub async fn run(
        &self,
        audio: &Path,
        locale: &str,
        allow_cloud: bool,
        cancel: &CancellationToken,
    ) -> RecognitionOutcome {
        if cancel.is_cancelled() {
            return RecognitionOutcome::Cancelled;
        }

        let capability = self.recognizer.capability(locale);
        if !capability.usable(allow_cloud) {
            let reason = if capability.supported {
                "locale requires cloud recognition, which is disabled"
            } else {
                "locale not supported by recognizer"
            };
            return RecognitionOutcome::error(RecognizerErrorKind::UnsupportedLocale, reason);
        }

        let size = match tokio::fs::metadata(audio).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                return RecognitionOutcome::error(
                    RecognizerErrorKind::FileOpen,
                    format!("cannot stat {}: {}", audio.display(), e),
                );
            }
        };
        if size < self.min_file_bytes {
            return RecognitionOutcome::error(
                RecognizerErrorKind::TooShort {
                    bytes: size,
                    minimum: self.min_file_bytes,
                },
                format!("{} bytes, minimum {}", size, self.min_file_bytes),
            );
        }

        tracing::trace!(path = %audio.display(), locale, bytes = size, "recognizer call");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => RecognitionOutcome::Cancelled,
            _ = tokio::time::sleep(self.timeout) => RecognitionOutcome::Timeout,
            result = self.recognizer.recognize(audio, locale) => classify(result),
        };

        tracing::debug!(
            path = %audio.display(),
            locale,
            outcome = outcome.kind_label(),
            "recognition attempt finished"
        );
        outcome
    }
}

impl fmt::Debug for RecognitionAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognitionAttempt")
            .field("recognizer", &self.recognizer.name())
            .field("timeout", &self.timeout)
            .field("min_file_bytes", &self.min_file_bytes)
            .finish()
    }
}

fn classify(
    result: std::result::Result<Vec<RecognizedSegment>, RecognizerError>,
) -> RecognitionOutcome {
    match result {
        Ok(segments) => {
            let segments: Vec<CaptionSegment> = segments
                .into_iter()
                .filter(|s| !s.text.trim().is_empty())
                .map(|s| CaptionSegment::new(s.text.trim(), s.start, s.duration))
                .collect();
            if segments.is_empty() {
                RecognitionOutcome::EmptyResult
            } else {
                RecognitionOutcome::Success(segments)
            }
        }
        Err(error) => {
            let kind = match error.classify() {
                FailureClass::NoSpeech => return RecognitionOutcome::EmptyResult,
                FailureClass::FileOpen => RecognizerErrorKind::FileOpen,
                FailureClass::AuthorizationDenied => RecognizerErrorKind::AuthorizationDenied,
                FailureClass::UnsupportedLocale => RecognizerErrorKind::UnsupportedLocale,
                FailureClass::Other => RecognizerErrorKind::Unknown,
            };
            RecognitionOutcome::error(kind, error.to_string())
        }
    }
}
