use crate::defaults;
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub recognition: RecognitionConfig,
    pub segmentation: SegmentationConfig,
    pub fallback: FallbackConfig,
    pub analysis: AnalysisConfig,
    pub merge: MergeConfig,
    pub recognizer: RecognizerCommandConfig,
}

/// Per-attempt recognition limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognitionConfig {
    pub timeout_secs: f64,
    pub min_file_bytes: u64,
    /// Permit recognition that needs a network round-trip
    pub allow_cloud: bool,
    /// Orchestrate locales concurrently instead of one after another
    pub concurrent_locales: bool,
}

/// Chunking of long media
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SegmentationConfig {
    pub chunk_seconds: f64,
    pub overlap_seconds: f64,
}

/// Thresholds that steer the per-locale fallback chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FallbackConfig {
    pub forced_segmentation_secs: f64,
    pub long_audio_secs: f64,
    pub min_segments_for_long_audio: usize,
    pub hard_ceiling_secs: f64,
    pub trim_min_leading_silence: f64,
    pub trim_min_duration: f64,
    pub trim_backoff: f64,
}

/// Audio analysis parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub max_analysis_secs: f64,
    pub window_ms: u32,
    pub silence_threshold_dbfs: f64,
}

/// Multilingual merge tolerances
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MergeConfig {
    pub cluster_tolerance: f64,
    pub coalesce_gap: f64,
}

/// External recognizer program used by the command-line front end
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RecognizerCommandConfig {
    pub program: Option<String>,
    /// Arguments; `{input}` and `{locale}` are substituted per attempt
    pub args: Vec<String>,
    /// Empty accepts every locale
    pub supported_locales: Vec<String>,
    /// Empty treats every supported locale as on-device
    pub on_device_locales: Vec<String>,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::RECOGNITION_TIMEOUT_SECS,
            min_file_bytes: defaults::MIN_RECOGNIZABLE_BYTES,
            allow_cloud: true,
            concurrent_locales: false,
        }
    }
}

impl RecognitionConfig {
    /// Per-attempt timeout, capped at one day; NaN or negative values give the default.
    pub fn timeout(&self) -> Duration {
        let fallback = Duration::from_secs_f64(defaults::RECOGNITION_TIMEOUT_SECS);
        if self.timeout_secs.is_nan() {
            return fallback;
        }
        let secs = self.timeout_secs.min(defaults::MAX_RECOGNITION_TIMEOUT_SECS);
        Duration::try_from_secs_f64(secs).unwrap_or(fallback)
    }
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            chunk_seconds: defaults::CHUNK_SECONDS,
            overlap_seconds: defaults::CHUNK_OVERLAP_SECONDS,
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            forced_segmentation_secs: defaults::FORCED_SEGMENTATION_SECS,
            long_audio_secs: defaults::LONG_AUDIO_SECS,
            min_segments_for_long_audio: defaults::MIN_SEGMENTS_FOR_LONG_AUDIO,
            hard_ceiling_secs: defaults::HARD_CEILING_SECS,
            trim_min_leading_silence: defaults::TRIM_MIN_LEADING_SILENCE,
            trim_min_duration: defaults::TRIM_MIN_DURATION,
            trim_backoff: defaults::TRIM_BACKOFF,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_analysis_secs: defaults::MAX_ANALYSIS_SECS,
            window_ms: defaults::ANALYSIS_WINDOW_MS,
            silence_threshold_dbfs: defaults::SILENCE_THRESHOLD_DBFS,
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            cluster_tolerance: defaults::CLUSTER_TOLERANCE,
            coalesce_gap: defaults::COALESCE_GAP,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                PipelineError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only a missing file yields defaults; invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(PipelineError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - POLYCAPTION_ALLOW_CLOUD → recognition.allow_cloud ("1"/"true"/"yes")
    /// - POLYCAPTION_TIMEOUT_SECS → recognition.timeout_secs
    /// - POLYCAPTION_RECOGNIZER → recognizer.program
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var("POLYCAPTION_ALLOW_CLOUD")
            && !value.is_empty()
        {
            self.recognition.allow_cloud =
                matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Ok(value) = std::env::var("POLYCAPTION_TIMEOUT_SECS")
            && let Ok(secs) = value.trim().parse::<f64>()
        {
            self.recognition.timeout_secs = secs;
        }

        if let Ok(program) = std::env::var("POLYCAPTION_RECOGNIZER")
            && !program.is_empty()
        {
            self.recognizer.program = Some(program);
        }

        self
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> PipelineError {
            PipelineError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            }
        }

        let timeout = self.recognition.timeout_secs;
        if !(timeout > 0.0 && timeout <= defaults::MAX_RECOGNITION_TIMEOUT_SECS) {
            return Err(invalid(
                "recognition.timeout_secs",
                "must be positive and at most 86400 seconds",
            ));
        }
        if !(self.segmentation.chunk_seconds > 0.0) {
            return Err(invalid("segmentation.chunk_seconds", "must be positive"));
        }
        if !(self.segmentation.overlap_seconds >= 0.0)
            || self.segmentation.overlap_seconds >= self.segmentation.chunk_seconds
        {
            return Err(invalid(
                "segmentation.overlap_seconds",
                "must be at least 0 and shorter than chunk_seconds",
            ));
        }
        let fb = &self.fallback;
        if fb.forced_segmentation_secs > fb.long_audio_secs
            || fb.long_audio_secs > fb.hard_ceiling_secs
        {
            return Err(invalid(
                "fallback",
                "thresholds must satisfy forced_segmentation_secs <= long_audio_secs <= hard_ceiling_secs",
            ));
        }
        if fb.trim_backoff < 0.0 {
            return Err(invalid("fallback.trim_backoff", "must not be negative"));
        }
        if self.analysis.window_ms == 0 {
            return Err(invalid("analysis.window_ms", "must be positive"));
        }
        if !(self.analysis.max_analysis_secs > 0.0) {
            return Err(invalid("analysis.max_analysis_secs", "must be positive"));
        }
        if self.merge.cluster_tolerance < 0.0 || self.merge.coalesce_gap < 0.0 {
            return Err(invalid("merge", "tolerances must not be negative"));
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/polycaption/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("polycaption")
            .join("config.toml")
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PipelineError::ConfigParse {
            message: e.to_string(),
        })
    }
}
