//! Default configuration constants for polycaption.
//!
//! Shared by the config sections and the components that fall back to them
//! when constructed without a config.

/// Sample rate of exported recognizer-friendly audio, in Hz.
pub const EXPORT_SAMPLE_RATE: u32 = 16000;

/// Ceiling for a single recognizer call, in seconds.
///
/// Applies regardless of media length, which is what makes segmentation
/// necessary for long media.
pub const RECOGNITION_TIMEOUT_SECS: f64 = 180.0;

/// Largest accepted per-attempt timeout, in seconds (one day).
pub const MAX_RECOGNITION_TIMEOUT_SECS: f64 = 86_400.0;

/// Files smaller than this are rejected without calling the recognizer.
pub const MIN_RECOGNIZABLE_BYTES: u64 = 4096;

/// Segmentation chunk length in seconds.
pub const CHUNK_SECONDS: f64 = 300.0;

/// Audio shared between adjacent chunks, in seconds.
pub const CHUNK_OVERLAP_SECONDS: f64 = 0.5;

/// Whole-file failure on media longer than this forces segmentation.
pub const FORCED_SEGMENTATION_SECS: f64 = 120.0;

/// Media at least this long is suspected of silent truncation when the
/// whole-file pass returns fewer than [`MIN_SEGMENTS_FOR_LONG_AUDIO`] segments.
pub const LONG_AUDIO_SECS: f64 = 600.0;

/// Minimum whole-file segment count expected from long media.
pub const MIN_SEGMENTS_FOR_LONG_AUDIO: usize = 40;

/// Media at or above this length skips whole-file attempts entirely.
pub const HARD_CEILING_SECS: f64 = 900.0;

/// Leading silence must exceed this before a trimmed retry is worth it.
pub const TRIM_MIN_LEADING_SILENCE: f64 = 0.5;

/// Media must be longer than this for a trimmed retry.
pub const TRIM_MIN_DURATION: f64 = 15.0;

/// The trimmed export starts this far before the end of the leading silence,
/// so a soft onset is not clipped.
pub const TRIM_BACKOFF: f64 = 0.2;

/// Longest audio prefix decoded for analysis, in seconds.
pub const MAX_ANALYSIS_SECS: f64 = 120.0;

/// RMS/peak window length in milliseconds.
pub const ANALYSIS_WINDOW_MS: u32 = 20;

/// Peak level below which a window counts as silence, in dBFS.
pub const SILENCE_THRESHOLD_DBFS: f64 = -45.0;

/// Reported level for digital silence, in dBFS.
pub const SILENCE_FLOOR_DBFS: f64 = -160.0;

/// Near-adjacent boundaries within this gap count as overlapping when
/// clustering multilingual candidates, in seconds.
pub const CLUSTER_TOLERANCE: f64 = 0.15;

/// Identical-text segments separated by at most this gap are coalesced.
pub const COALESCE_GAP: f64 = 0.15;

/// Container extensions the recognizer accepts without re-export.
pub const RECOGNIZER_FRIENDLY_EXTENSIONS: &[&str] =
    &["wav", "m4a", "caf", "aiff", "aif", "mp3", "flac"];

/// Convert a dBFS level to linear amplitude (full scale = 1.0).
pub fn dbfs_to_amplitude(dbfs: f64) -> f64 {
    10f64.powf(dbfs / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_threshold_amplitude_matches_minus_45_dbfs() {
        let amplitude = dbfs_to_amplitude(SILENCE_THRESHOLD_DBFS);
        assert!((amplitude - 0.005_623).abs() < 1e-6, "got {}", amplitude);
    }

    #[test]
    fn fallback_thresholds_are_ordered() {
        assert!(FORCED_SEGMENTATION_SECS < LONG_AUDIO_SECS);
        assert!(LONG_AUDIO_SECS < HARD_CEILING_SECS);
        assert!(CHUNK_OVERLAP_SECONDS < CHUNK_SECONDS);
    }
}
