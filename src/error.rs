//! Error types for polycaption.

use std::fmt;
use thiserror::Error;

/// Why a recognizer call produced nothing usable.
///
/// Platform error codes are folded into this closed set at the recognizer
/// boundary; nothing past `stt::recognizer` sees a raw code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerFailure {
    Timeout,
    EmptyResult,
    AuthorizationDenied,
    Unknown(String),
}

impl fmt::Display for RecognizerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognizerFailure::Timeout => write!(f, "timed out"),
            RecognizerFailure::EmptyResult => write!(f, "no speech recognized"),
            RecognizerFailure::AuthorizationDenied => write!(f, "authorization denied"),
            RecognizerFailure::Unknown(message) => write!(f, "{}", message),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Media errors
    #[error("Cannot read media file {path}: {message}")]
    FileUnreadable { path: String, message: String },

    #[error("No audio track in {path}")]
    NoAudioTrack { path: String },

    #[error("Audio export failed: {message}")]
    ExportFailed { message: String },

    // Locale errors
    #[error("Locale not supported: {locale}")]
    UnsupportedLocale { locale: String },

    #[error("None of the requested locales are usable: {}", requested.join(", "))]
    NoCapableLocales { requested: Vec<String> },

    // Recognition errors
    #[error("Audio too short to recognize: {bytes} bytes (minimum {minimum})")]
    TooShortAudio { bytes: u64, minimum: u64 },

    #[error("Recognition failed: {0}")]
    RecognizerFailed(RecognizerFailure),

    #[error("Transcription cancelled")]
    Cancelled,

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// True for errors that end a locale outright rather than meaning "no speech".
    pub fn is_hard(&self) -> bool {
        !matches!(
            self,
            PipelineError::Cancelled | PipelineError::RecognizerFailed(RecognizerFailure::EmptyResult)
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, PipelineError>;
