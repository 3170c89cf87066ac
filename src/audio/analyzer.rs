//! Loudness and leading-silence analysis of a media file's audio prefix.

use crate::audio::decode::decode_mono;
use crate::audio::wav::to_pcm16_vec;
use crate::config::AnalysisConfig;
use crate::defaults;
use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};

/// Statistics for one media file plus where its recognizer-friendly copy lives.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioAnalysis {
    /// Track length in seconds
    pub duration: f64,
    pub file_size_bytes: i64,
    pub average_rms_dbfs: f64,
    /// Seconds of initial audio below the silence threshold
    pub leading_silence: f64,
    /// Normalized container, or the original file when no export was needed
    pub normalized_audio_path: PathBuf,
}

/// Level statistics over analyzed PCM.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelStats {
    pub average_rms_dbfs: f64,
    pub leading_silence: f64,
}

/// Measured properties of a file before normalization is attached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioStats {
    pub duration: f64,
    pub file_size_bytes: i64,
    pub levels: LevelStats,
}

impl AudioStats {
    pub fn with_normalized_path(self, normalized_audio_path: PathBuf) -> AudioAnalysis {
        AudioAnalysis {
            duration: self.duration,
            file_size_bytes: self.file_size_bytes,
            average_rms_dbfs: self.levels.average_rms_dbfs,
            leading_silence: self.levels.leading_silence,
            normalized_audio_path,
        }
    }
}

/// Decodes a bounded audio prefix and measures it.
#[derive(Debug, Clone)]
pub struct AudioAnalyzer {
    config: AnalysisConfig,
}

impl AudioAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Analyze the audio of `path`.
    ///
    /// Decodes at most `max_analysis_secs` of audio; the duration still
    /// covers the whole track.
    pub async fn analyze(&self, path: &Path) -> Result<AudioStats> {
        let metadata =
            tokio::fs::metadata(path)
                .await
                .map_err(|e| PipelineError::FileUnreadable {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
        let file_size_bytes = i64::try_from(metadata.len()).unwrap_or(i64::MAX);

        let owned = path.to_path_buf();
        let max_secs = self.config.max_analysis_secs;
        let decoded = tokio::task::spawn_blocking(move || decode_mono(&owned, Some(max_secs)))
            .await
            .map_err(|e| PipelineError::Other(format!("Audio analysis task failed: {}", e)))??;

        let pcm = to_pcm16_vec(&decoded.samples);
        let levels = measure_levels(
            &pcm,
            decoded.sample_rate,
            self.config.window_ms,
            self.config.silence_threshold_dbfs,
        );

        tracing::debug!(
            path = %path.display(),
            duration = decoded.duration_secs,
            rms_dbfs = levels.average_rms_dbfs,
            leading_silence = levels.leading_silence,
            "audio analyzed"
        );

        Ok(AudioStats {
            duration: decoded.duration_secs,
            file_size_bytes,
            levels,
        })
    }
}

impl Default for AudioAnalyzer {
    fn default() -> Self {
        Self::new(AnalysisConfig::default())
    }
}

/// Measure average RMS and leading silence over non-overlapping windows.
///
/// RMS accumulates squares across every complete window and converts the
/// result to dBFS, reporting the floor for digital silence. Leading silence
/// counts initial windows whose peak stays under the threshold; the first
/// louder window ends the run. A trailing partial window is ignored.
pub fn measure_levels(
    samples: &[i16],
    sample_rate: u32,
    window_ms: u32,
    silence_threshold_dbfs: f64,
) -> LevelStats {
    let window_len = (sample_rate as usize * window_ms as usize / 1000).max(1);
    let window_secs = window_len as f64 / sample_rate.max(1) as f64;
    let threshold = defaults::dbfs_to_amplitude(silence_threshold_dbfs);

    let mut sum_squares = 0.0f64;
    let mut counted = 0usize;
    let mut silent_windows = 0usize;
    let mut still_leading = true;

    for window in samples.chunks_exact(window_len) {
        let mut peak = 0.0f64;
        for &sample in window {
            let value = sample as f64 / 32768.0;
            sum_squares += value * value;
            peak = peak.max(value.abs());
        }
        counted += window.len();

        if still_leading {
            if peak < threshold {
                silent_windows += 1;
            } else {
                still_leading = false;
            }
        }
    }

    let rms = if counted > 0 {
        (sum_squares / counted as f64).sqrt()
    } else {
        0.0
    };
    let average_rms_dbfs = if rms > 0.0 {
        20.0 * rms.log10()
    } else {
        defaults::SILENCE_FLOOR_DBFS
    };

    LevelStats {
        average_rms_dbfs,
        leading_silence: silent_windows as f64 * window_secs,
    }
}
