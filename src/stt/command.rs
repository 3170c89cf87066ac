//! Recognizer backed by an external program.
//!
//! The configured program runs once per attempt with `{input}` and `{locale}`
//! substituted into its arguments. It must print JSON on stdout: either an
//! array of `{text, start, duration}` objects or an object with a `segments`
//! array of them. Exit codes 10 to 13 report no speech, an unopenable file,
//! missing authorization and an unsupported locale; any other non-zero exit
//! is classified from stderr.

use crate::config::RecognizerCommandConfig;
use crate::error::{PipelineError, Result};
use crate::stt::recognizer::{LocaleCapability, RecognizedSegment, RecognizerError, SpeechRecognizer};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;

/// Error domain for failures reported by the external program.
pub const COMMAND_DOMAIN: &str = "command";

/// Code reported when the program could not launch or was killed by a signal.
pub const SIGNAL_EXIT_CODE: i64 = -1;
/// Code reported when the program succeeded but its output was not JSON.
pub const OUTPUT_PARSE_CODE: i64 = 0;

// Exit codes a program may use to report a classified failure.
pub const EXIT_NO_SPEECH: i64 = 10;
pub const EXIT_FILE_OPEN: i64 = 11;
pub const EXIT_NOT_AUTHORIZED: i64 = 12;
pub const EXIT_UNSUPPORTED_LOCALE: i64 = 13;

#[derive(Deserialize)]
#[serde(untagged)]
enum CommandOutput {
    Segments(Vec<RecognizedSegment>),
    Wrapped { segments: Vec<RecognizedSegment> },
}

/// Runs an external recognizer program per attempt.
#[derive(Debug, Clone)]
pub struct CommandRecognizer {
    program: String,
    args: Vec<String>,
    supported: Vec<String>,
    on_device: Option<Vec<String>>,
}

impl CommandRecognizer {
    /// Build from the `[recognizer]` config section.
    ///
    /// Fails when no program is configured.
    pub fn from_config(config: &RecognizerCommandConfig) -> Result<Self> {
        let program = config
            .program
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| PipelineError::ConfigInvalidValue {
                key: "recognizer.program".to_string(),
                message: "no recognizer program configured (set it in the config file or POLYCAPTION_RECOGNIZER)".to_string(),
            })?;

        let args = if config.args.is_empty() {
            vec!["{input}".to_string(), "{locale}".to_string()]
        } else {
            config.args.clone()
        };

        Ok(Self {
            program: program.to_string(),
            args,
            supported: config.supported_locales.iter().map(|l| canonical_locale(l)).collect(),
            on_device: if config.on_device_locales.is_empty() {
                None
            } else {
                Some(config.on_device_locales.iter().map(|l| canonical_locale(l)).collect())
            },
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments for one attempt with placeholders filled in.
    pub fn render_args(&self, input: &Path, locale: &str) -> Vec<String> {
        let input = input.display().to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{input}", &input).replace("{locale}", locale))
            .collect()
    }
}

/// Lowercase with `_` normalized to `-`, so `zh_Hant` matches `zh-hant`.
pub fn canonical_locale(locale: &str) -> String {
    locale.trim().replace('_', "-").to_ascii_lowercase()
}

/// Parse recognizer stdout.
pub fn parse_output(stdout: &[u8]) -> std::result::Result<Vec<RecognizedSegment>, RecognizerError> {
    let text = String::from_utf8_lossy(stdout);
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<CommandOutput>(&text) {
        Ok(CommandOutput::Segments(segments)) | Ok(CommandOutput::Wrapped { segments }) => Ok(segments),
        Err(e) => Err(RecognizerError::new(
            COMMAND_DOMAIN,
            OUTPUT_PARSE_CODE,
            format!("unparseable recognizer output: {}", e),
        )),
    }
}

#[async_trait]
impl SpeechRecognizer for CommandRecognizer {
    async fn recognize(
        &self,
        audio: &Path,
        locale: &str,
    ) -> std::result::Result<Vec<RecognizedSegment>, RecognizerError> {
        let args = self.render_args(audio, locale);
        tracing::debug!(program = %self.program, ?args, "running recognizer");

        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                RecognizerError::new(
                    COMMAND_DOMAIN,
                    SIGNAL_EXIT_CODE,
                    format!("cannot launch {}: {}", self.program, e),
                )
            })?;

        if !output.status.success() {
            let code = output.status.code().map(i64::from).unwrap_or(SIGNAL_EXIT_CODE);
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{} exited with status {}", self.program, code)
            } else {
                stderr
            };
            return Err(RecognizerError::new(COMMAND_DOMAIN, code, message));
        }

        parse_output(&output.stdout)
    }

    fn capability(&self, locale: &str) -> LocaleCapability {
        let locale = canonical_locale(locale);
        let supported = self.supported.is_empty() || self.supported.contains(&locale);
        let on_device = supported
            && self
                .on_device
                .as_ref()
                .is_none_or(|list| list.contains(&locale));
        LocaleCapability {
            supported,
            on_device,
        }
    }

    fn name(&self) -> &str {
        &self.program
    }
}
