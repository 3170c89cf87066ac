//! Speech recognition: the recognizer seam, its adapters and single attempts.

pub mod attempt;
pub mod command;
pub mod recognizer;

pub use attempt::{RecognitionAttempt, RecognitionOutcome, RecognizerErrorKind};
pub use command::CommandRecognizer;
pub use recognizer::{
    FailureClass, LocaleCapability, MockRecognizer, MockResponse, RecognizedSegment,
    RecognizerCall, RecognizerError, SpeechRecognizer,
};
