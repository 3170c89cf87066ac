//! The speech recognizer seam.
//!
//! A recognizer turns one audio file plus one locale into timed text. Platform
//! failures arrive as [`RecognizerError`] and are classified here, at the
//! boundary, so no raw domain/code pair travels further.

use crate::stt::command::{
    COMMAND_DOMAIN, EXIT_FILE_OPEN, EXIT_NO_SPEECH, EXIT_NOT_AUTHORIZED, EXIT_UNSUPPORTED_LOCALE,
    OUTPUT_PARSE_CODE, SIGNAL_EXIT_CODE,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// One timed piece of text as emitted by a recognizer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecognizedSegment {
    pub text: String,
    pub start: f64,
    pub duration: f64,
}

impl RecognizedSegment {
    pub fn new(text: impl Into<String>, start: f64, duration: f64) -> Self {
        Self {
            text: text.into(),
            start,
            duration,
        }
    }
}

/// What a recognizer can do for a locale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocaleCapability {
    pub supported: bool,
    /// Recognition runs without a network round-trip
    pub on_device: bool,
}

impl LocaleCapability {
    pub const UNSUPPORTED: Self = Self {
        supported: false,
        on_device: false,
    };

    /// Whether an attempt may run under the given cloud policy.
    pub fn usable(&self, allow_cloud: bool) -> bool {
        self.supported && (allow_cloud || self.on_device)
    }
}

/// Error domain of platform speech services.
pub const SPEECH_DOMAIN: &str = "speech";
/// Platform code: the audio held no recognizable speech.
pub const SPEECH_NO_SPEECH: i64 = 1110;
/// Platform code: the service could not open or parse the audio file.
pub const SPEECH_FILE_OPEN: i64 = 1101;
/// Platform code: speech recognition is not authorized.
pub const SPEECH_NOT_AUTHORIZED: i64 = 1700;
/// Platform code: no recognizer exists for the requested locale.
pub const SPEECH_UNSUPPORTED_LOCALE: i64 = 1107;

/// Raw failure reported by a recognizer backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizerError {
    /// Backend-specific error namespace
    pub domain: String,
    pub code: i64,
    pub message: String,
}

impl RecognizerError {
    pub fn new(domain: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            code,
            message: message.into(),
        }
    }

    /// Fold the backend error into a closed class.
    ///
    /// Known `(domain, code)` pairs win; anything else is classified from
    /// whole words of the message.
    pub fn classify(&self) -> FailureClass {
        class_for_code(&self.domain, self.code).unwrap_or_else(|| class_for_message(&self.message))
    }
}

fn class_for_code(domain: &str, code: i64) -> Option<FailureClass> {
    let class = match (domain, code) {
        (SPEECH_DOMAIN, SPEECH_NO_SPEECH) => FailureClass::NoSpeech,
        (SPEECH_DOMAIN, SPEECH_FILE_OPEN) => FailureClass::FileOpen,
        (SPEECH_DOMAIN, SPEECH_NOT_AUTHORIZED) => FailureClass::AuthorizationDenied,
        (SPEECH_DOMAIN, SPEECH_UNSUPPORTED_LOCALE) => FailureClass::UnsupportedLocale,
        (COMMAND_DOMAIN, EXIT_NO_SPEECH) => FailureClass::NoSpeech,
        (COMMAND_DOMAIN, EXIT_FILE_OPEN) => FailureClass::FileOpen,
        (COMMAND_DOMAIN, EXIT_NOT_AUTHORIZED) => FailureClass::AuthorizationDenied,
        (COMMAND_DOMAIN, EXIT_UNSUPPORTED_LOCALE) => FailureClass::UnsupportedLocale,
        (COMMAND_DOMAIN, SIGNAL_EXIT_CODE | OUTPUT_PARSE_CODE) => FailureClass::Other,
        _ => return None,
    };
    Some(class)
}

const NO_SPEECH_PHRASES: &[&str] = &["no speech", "nothing recognized"];
const DENIED_PHRASES: &[&str] = &["denied", "not authorized", "unauthorized", "not permitted"];
const LOCALE_PHRASES: &[&str] = &["locale", "language not supported"];
const FILE_OPEN_PHRASES: &[&str] = &[
    "open",
    "unreadable",
    "format",
    "file not found",
    "no such file",
    "cannot read",
    "could not read",
];

fn class_for_message(message: &str) -> FailureClass {
    let words: Vec<String> = message
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    let mentions = |phrases: &[&str]| phrases.iter().any(|p| contains_phrase(&words, p));

    if mentions(NO_SPEECH_PHRASES) {
        FailureClass::NoSpeech
    } else if mentions(DENIED_PHRASES) {
        FailureClass::AuthorizationDenied
    } else if mentions(LOCALE_PHRASES) {
        FailureClass::UnsupportedLocale
    } else if mentions(FILE_OPEN_PHRASES) {
        FailureClass::FileOpen
    } else {
        FailureClass::Other
    }
}

/// Whether `phrase` occurs in `words` as consecutive whole words.
fn contains_phrase(words: &[String], phrase: &str) -> bool {
    let needle: Vec<&str> = phrase.split_whitespace().collect();
    if needle.is_empty() {
        return false;
    }
    words
        .windows(needle.len())
        .any(|window| window.iter().zip(&needle).all(|(word, want)| word == want))
}

impl fmt::Display for RecognizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error {}: {}", self.domain, self.code, self.message)
    }
}

impl std::error::Error for RecognizerError {}

/// Classes of recognizer failure the fallback chain reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The audio contained no recognizable speech
    NoSpeech,
    /// The recognizer could not open or parse the file
    FileOpen,
    AuthorizationDenied,
    UnsupportedLocale,
    Other,
}

/// Locale-bound speech recognition over audio files.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Recognize speech in `audio` for `locale`.
    async fn recognize(
        &self,
        audio: &Path,
        locale: &str,
    ) -> std::result::Result<Vec<RecognizedSegment>, RecognizerError>;

    /// Capability of this recognizer for `locale`.
    fn capability(&self, locale: &str) -> LocaleCapability;

    fn name(&self) -> &str;
}

/// How [`MockRecognizer`] answers one call.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Segments(Vec<RecognizedSegment>),
    Fail(RecognizerError),
    /// Never completes
    Hang,
}

impl MockResponse {
    /// A no-speech failure as a platform recognizer would report it.
    pub fn no_speech() -> Self {
        MockResponse::Fail(RecognizerError::new(
            SPEECH_DOMAIN,
            SPEECH_NO_SPEECH,
            "No speech detected",
        ))
    }

    /// A file-open failure as a platform recognizer would report it.
    pub fn file_open_failure() -> Self {
        MockResponse::Fail(RecognizerError::new(
            SPEECH_DOMAIN,
            SPEECH_FILE_OPEN,
            "Failed to open audio file",
        ))
    }
}

/// A call observed by [`MockRecognizer`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizerCall {
    pub path: PathBuf,
    pub locale: String,
}

type Handler = dyn Fn(&Path, &str) -> MockResponse + Send + Sync;

/// Mock recognizer for testing.
///
/// Answers through a scripted handler, reports configured per-locale
/// capabilities and records every call.
#[derive(Clone)]
pub struct MockRecognizer {
    name: String,
    locales: HashMap<String, LocaleCapability>,
    handler: Arc<Handler>,
    calls: Arc<Mutex<Vec<RecognizerCall>>>,
}

impl MockRecognizer {
    /// Create a mock that supports no locales and recognizes nothing.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            locales: HashMap::new(),
            handler: Arc::new(|_, _| MockResponse::no_speech()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Declare `locale` supported, optionally on-device.
    pub fn with_locale(mut self, locale: &str, on_device: bool) -> Self {
        self.locales.insert(
            locale.to_string(),
            LocaleCapability {
                supported: true,
                on_device,
            },
        );
        self
    }

    /// Answer every call with `handler(path, locale)`.
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Path, &str) -> MockResponse + Send + Sync + 'static,
    {
        self.handler = Arc::new(handler);
        self
    }

    /// Answer every call with the same segments.
    pub fn with_segments(self, segments: Vec<RecognizedSegment>) -> Self {
        self.with_handler(move |_, _| MockResponse::Segments(segments.clone()))
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<RecognizerCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Calls whose audio file name starts with `prefix`.
    pub fn calls_with_prefix(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| {
                call.path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(prefix))
            })
            .count()
    }
}

impl fmt::Debug for MockRecognizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockRecognizer")
            .field("name", &self.name)
            .field("locales", &self.locales)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SpeechRecognizer for MockRecognizer {
    async fn recognize(
        &self,
        audio: &Path,
        locale: &str,
    ) -> std::result::Result<Vec<RecognizedSegment>, RecognizerError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecognizerCall {
                path: audio.to_path_buf(),
                locale: locale.to_string(),
            });
        }

        match (self.handler)(audio, locale) {
            MockResponse::Segments(segments) => Ok(segments),
            MockResponse::Fail(error) => Err(error),
            MockResponse::Hang => std::future::pending().await,
        }
    }

    fn capability(&self, locale: &str) -> LocaleCapability {
        self.locales
            .get(locale)
            .copied()
            .unwrap_or(LocaleCapability::UNSUPPORTED)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
