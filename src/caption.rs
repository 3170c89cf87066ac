//! Caption value types shared by recognition, fallback and merge.

use serde::{Deserialize, Serialize};

/// One time-aligned caption line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionSegment {
    pub text: String,
    /// Start time in seconds.
    pub start: f64,
    /// Duration in seconds.
    pub duration: f64,
}

impl CaptionSegment {
    /// Creates a segment, clamping negative or non-finite times to zero.
    pub fn new(text: impl Into<String>, start: f64, duration: f64) -> Self {
        Self {
            text: text.into(),
            start: non_negative(start),
            duration: non_negative(duration),
        }
    }

    /// End time in seconds.
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Returns a copy moved later by `offset` seconds.
    pub fn shifted(&self, offset: f64) -> Self {
        Self::new(self.text.clone(), self.start + offset, self.duration)
    }

    /// Returns a copy that ends at `end` (never before its own start).
    pub fn with_end(&self, end: f64) -> Self {
        Self::new(self.text.clone(), self.start, end - self.start)
    }

    /// True when both segments carry the same caption text.
    pub fn same_text(&self, other: &CaptionSegment) -> bool {
        self.text.trim() == other.text.trim()
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Ordered captions recognized for one locale.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocaleTranscript {
    pub locale: String,
    pub segments: Vec<CaptionSegment>,
}

impl LocaleTranscript {
    pub fn new(locale: impl Into<String>, segments: Vec<CaptionSegment>) -> Self {
        Self {
            locale: locale.into(),
            segments,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Sort segments ascending by start time (stable, so equal starts keep order).
pub fn sort_by_start(segments: &mut [CaptionSegment]) {
    segments.sort_by(|a, b| a.start.total_cmp(&b.start));
}

/// Merge neighbouring segments that repeat the same text.
///
/// Expects segments sorted by start. A segment whose text matches the
/// previous accepted one and starts no later than `max_gap` after its end is
/// folded into it; the merged segment runs to the later of the two ends.
pub fn coalesce(segments: Vec<CaptionSegment>, max_gap: f64) -> Vec<CaptionSegment> {
    let mut out: Vec<CaptionSegment> = Vec::with_capacity(segments.len());
    for segment in segments {
        if let Some(prev) = out.last_mut()
            && prev.same_text(&segment)
            && segment.start - prev.end() <= max_gap
        {
            let end = prev.end().max(segment.end());
            *prev = prev.with_end(end);
            continue;
        }
        out.push(segment);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_clamps_negative_and_nan_times() {
        let seg = CaptionSegment::new("hi", -1.0, f64::NAN);
        assert_eq!(seg.start, 0.0);
        assert_eq!(seg.duration, 0.0);
    }

    #[test]
    fn shifted_moves_start_only() {
        let seg = CaptionSegment::new("hi", 1.5, 2.0).shifted(300.0);
        assert_eq!(seg.start, 301.5);
        assert_eq!(seg.duration, 2.0);
        assert_eq!(seg.end(), 303.5);
    }

    #[test]
    fn coalesce_merges_identical_text_within_gap() {
        let merged = coalesce(
            vec![
                CaptionSegment::new("hello", 1.0, 2.0),
                CaptionSegment::new("hello", 3.1, 1.0),
            ],
            0.15,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].start, 1.0);
        assert!((merged[0].duration - 3.1).abs() < 1e-9);
    }

    #[test]
    fn coalesce_keeps_identical_text_beyond_gap() {
        let merged = coalesce(
            vec![
                CaptionSegment::new("hello", 1.0, 2.0),
                CaptionSegment::new("hello", 3.5, 1.0),
            ],
            0.15,
        );
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn coalesce_keeps_different_text() {
        let merged = coalesce(
            vec![
                CaptionSegment::new("hello", 1.0, 2.0),
                CaptionSegment::new("world", 3.0, 1.0),
            ],
            0.15,
        );
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn coalesce_overlapping_duplicate_keeps_later_end() {
        // Chunk-boundary repeat fully inside the previous segment
        let merged = coalesce(
            vec![
                CaptionSegment::new("same", 10.0, 5.0),
                CaptionSegment::new("same", 14.8, 0.1),
            ],
            0.15,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].end(), 15.0);
    }

    #[test]
    fn coalesce_ignores_surrounding_whitespace() {
        let merged = coalesce(
            vec![
                CaptionSegment::new(" hi ", 0.0, 1.0),
                CaptionSegment::new("hi", 1.0, 1.0),
            ],
            0.15,
        );
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn sort_by_start_orders_ascending() {
        let mut segs = vec![
            CaptionSegment::new("b", 5.0, 1.0),
            CaptionSegment::new("a", 1.0, 1.0),
        ];
        sort_by_start(&mut segs);
        assert_eq!(segs[0].text, "a");
    }
}
