//! Multilingual merge of per-locale transcripts.
//!
//! Two passes: overlapping candidates from different locales are clustered and
//! one winner per cluster is chosen by script score, then identical neighbours
//! left over from chunk overlap are coalesced. A final pass clips any residual
//! overlap so the output intervals are disjoint.

use crate::caption::{CaptionSegment, LocaleTranscript, coalesce};
use crate::config::MergeConfig;
use crate::pipeline::script::CandidateScorer;
use std::cmp::Ordering;

#[derive(Debug, Clone)]
struct Candidate<'a> {
    locale: &'a str,
    segment: &'a CaptionSegment,
    score: f64,
}

impl Candidate<'_> {
    /// Deterministic pool order: start, end, locale, text.
    fn pool_order(&self, other: &Self) -> Ordering {
        self.segment
            .start
            .total_cmp(&other.segment.start)
            .then_with(|| self.segment.end().total_cmp(&other.segment.end()))
            .then_with(|| self.locale.cmp(other.locale))
            .then_with(|| self.segment.text.cmp(&other.segment.text))
    }

    /// Higher score wins; ties resolve to the earlier pool position.
    fn beats(&self, other: &Self) -> bool {
        match self.score.total_cmp(&other.score) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.pool_order(other) == Ordering::Less,
        }
    }
}

/// Picks one caption per overlapping time window across locales.
#[derive(Debug)]
pub struct MergeEngine {
    config: MergeConfig,
    scorer: CandidateScorer,
}

impl MergeEngine {
    pub fn new(config: MergeConfig) -> Self {
        Self::with_scorer(config, CandidateScorer::default())
    }

    pub fn with_scorer(config: MergeConfig, scorer: CandidateScorer) -> Self {
        Self { config, scorer }
    }

    /// Score of `text` as recognized under `locale`.
    pub fn score(&self, locale: &str, text: &str) -> f64 {
        self.scorer.score(locale, text)
    }

    /// Merge per-locale transcripts into one ordered, non-overlapping list.
    pub fn merge(&self, transcripts: &[LocaleTranscript]) -> Vec<CaptionSegment> {
        let mut pool: Vec<Candidate<'_>> = transcripts
            .iter()
            .flat_map(|t| {
                t.segments.iter().map(move |segment| Candidate {
                    locale: t.locale.as_str(),
                    segment,
                    score: 0.0,
                })
            })
            .collect();
        if pool.is_empty() {
            return Vec::new();
        }
        for candidate in &mut pool {
            candidate.score = self.scorer.score(candidate.locale, &candidate.segment.text);
        }
        pool.sort_by(Candidate::pool_order);

        let winners = self.resolve_clusters(&pool);
        let coalesced = coalesce(winners, self.config.coalesce_gap);
        let merged = clip_overlaps(coalesced);

        tracing::debug!(
            locales = transcripts.len(),
            candidates = pool.len(),
            merged = merged.len(),
            "transcripts merged"
        );
        merged
    }

    fn joins_cluster(&self, cluster: &[&Candidate<'_>], candidate: &Candidate<'_>) -> bool {
        cluster.iter().any(|member| {
            // Tolerance only bridges locales; same-locale neighbours must truly overlap
            let tolerance = if member.locale == candidate.locale {
                0.0
            } else {
                self.config.cluster_tolerance
            };
            candidate.segment.start < member.segment.end() + tolerance
        })
    }

    fn resolve_clusters(&self, pool: &[Candidate<'_>]) -> Vec<CaptionSegment> {
        let mut winners = Vec::new();
        let mut cluster: Vec<&Candidate<'_>> = Vec::new();

        for candidate in pool {
            if !cluster.is_empty() && !self.joins_cluster(&cluster, candidate) {
                winners.push(pick_winner(&cluster));
                cluster.clear();
            }
            cluster.push(candidate);
        }
        if !cluster.is_empty() {
            winners.push(pick_winner(&cluster));
        }
        winners
    }
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self::new(MergeConfig::default())
    }
}

fn pick_winner(cluster: &[&Candidate<'_>]) -> CaptionSegment {
    let mut best = cluster[0];
    for candidate in &cluster[1..] {
        if candidate.beats(best) {
            best = candidate;
        }
    }
    if cluster.len() > 1 {
        tracing::trace!(
            candidates = cluster.len(),
            locale = best.locale,
            score = best.score,
            "cluster resolved"
        );
    }
    best.segment.clone()
}

/// Shorten each segment that runs into its successor.
fn clip_overlaps(mut segments: Vec<CaptionSegment>) -> Vec<CaptionSegment> {
    for i in 1..segments.len() {
        let next_start = segments[i].start;
        if segments[i - 1].end() > next_start {
            segments[i - 1] = segments[i - 1].with_end(next_start);
        }
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(text: &str, start: f64, duration: f64) -> CaptionSegment {
        CaptionSegment::new(text, start, duration)
    }

    fn assert_disjoint(segments: &[CaptionSegment]) {
        for pair in segments.windows(2) {
            assert!(
                pair[0].end() <= pair[1].start + 1e-9,
                "{:?} overlaps {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn single_sorted_locale_is_unchanged() {
        let segments = vec![
            seg("one", 0.0, 1.0),
            seg("two", 1.0, 1.0),
            seg("three", 2.05, 0.5),
            seg("four", 10.0, 2.0),
        ];
        let merged = MergeEngine::default().merge(&[LocaleTranscript::new("en-US", segments.clone())]);
        assert_eq!(merged, segments);
    }

    #[test]
    fn empty_input_merges_to_empty() {
        assert!(MergeEngine::default().merge(&[]).is_empty());
        assert!(
            MergeEngine::default()
                .merge(&[LocaleTranscript::new("en-US", Vec::new())])
                .is_empty()
        );
    }

    #[test]
    fn overlap_picks_higher_score_regardless_of_input_order() {
        let engine = MergeEngine::default();
        let zh = LocaleTranscript::new("zh-Hant", vec![seg("我們今天來談談", 0.0, 2.0)]);
        let en = LocaleTranscript::new("en-US", vec![seg("我們 today 談", 0.1, 2.0)]);

        let forward = engine.merge(&[zh.clone(), en.clone()]);
        let backward = engine.merge(&[en, zh]);

        assert_eq!(forward, vec![seg("我們今天來談談", 0.0, 2.0)]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn near_adjacent_cross_locale_segments_cluster_within_tolerance() {
        let engine = MergeEngine::default();
        let merged = engine.merge(&[
            LocaleTranscript::new("en-US", vec![seg("good evening", 0.0, 2.0)]),
            LocaleTranscript::new("zh-Hant", vec![seg("good 晚", 2.1, 1.0)]),
        ]);
        assert_eq!(merged, vec![seg("good evening", 0.0, 2.0)]);
    }

    #[test]
    fn identical_adjacent_winners_are_coalesced() {
        let engine = MergeEngine::default();
        let merged = engine.merge(&[LocaleTranscript::new(
            "en-US",
            vec![seg("hello", 0.0, 1.0), seg("hello", 1.1, 1.0)],
        )]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].start, 0.0);
        assert!((merged[0].duration - 2.1).abs() < 1e-9);
    }

    #[test]
    fn output_never_overlaps() {
        let engine = MergeEngine::default();
        let merged = engine.merge(&[
            LocaleTranscript::new(
                "en-US",
                vec![seg("alpha", 0.0, 3.0), seg("beta", 5.0, 3.0), seg("gamma", 9.0, 1.0)],
            ),
            LocaleTranscript::new(
                "zh-Hant",
                vec![seg("阿爾法", 0.5, 3.0), seg("貝塔", 4.0, 5.5), seg("伽馬", 9.3, 2.0)],
            ),
        ]);
        assert!(!merged.is_empty());
        assert_disjoint(&merged);
        let starts: Vec<f64> = merged.iter().map(|s| s.start).collect();
        let mut sorted = starts.clone();
        sorted.sort_by(f64::total_cmp);
        assert_eq!(starts, sorted);
    }

    #[test]
    fn equal_scores_resolve_deterministically() {
        let engine = MergeEngine::default();
        let a = LocaleTranscript::new("en-GB", vec![seg("same words", 0.0, 1.0)]);
        let b = LocaleTranscript::new("en-US", vec![seg("same words", 0.0, 1.0)]);
        assert_eq!(
            engine.merge(&[a.clone(), b.clone()]),
            engine.merge(&[b, a])
        );
    }
}
