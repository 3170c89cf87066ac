//! Script analysis and candidate scoring for multilingual merge.
//!
//! A recognizer forced into the wrong locale tends to emit text in the wrong
//! script (or a mix), so candidates are rewarded for text whose dominant
//! script matches their own locale.

/// Writing-system family a locale is expected to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFamily {
    Cjk,
    Latin,
    Other,
}

const CJK_LANGUAGES: &[&str] = &["zh", "ja", "ko", "yue", "cmn", "wuu"];

const LATIN_LANGUAGES: &[&str] = &[
    "en", "fr", "de", "es", "it", "pt", "nl", "sv", "da", "no", "nb", "nn", "fi", "is", "pl",
    "cs", "sk", "sl", "hr", "ro", "hu", "tr", "id", "ms", "vi", "ca", "eu", "gl", "et", "lv",
    "lt", "sq", "af", "sw", "tl",
];

/// Language part of a locale code, lowercased (`zh-Hant` → `zh`).
pub fn language_prefix(locale: &str) -> String {
    locale
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Script family expected for `locale`.
pub fn family_for_locale(locale: &str) -> ScriptFamily {
    let language = language_prefix(locale);
    if CJK_LANGUAGES.contains(&language.as_str()) {
        ScriptFamily::Cjk
    } else if LATIN_LANGUAGES.contains(&language.as_str()) {
        ScriptFamily::Latin
    } else {
        ScriptFamily::Other
    }
}

pub fn is_cjk(ch: char) -> bool {
    matches!(
        ch as u32,
        0x3040..=0x30ff // Hiragana + Katakana
            | 0x3400..=0x4dbf // CJK Extension A
            | 0x4e00..=0x9fff // CJK Unified Ideographs
            | 0xf900..=0xfaff // CJK Compatibility Ideographs
            | 0xac00..=0xd7af // Hangul Syllables
            | 0x20000..=0x2a6df // CJK Extension B
    )
}

pub fn is_latin(ch: char) -> bool {
    ch.is_ascii_alphabetic()
        || (matches!(ch as u32, 0x00c0..=0x024f | 0x1e00..=0x1eff) && ch.is_alphabetic())
}

fn is_kana(ch: char) -> bool {
    matches!(ch as u32, 0x3040..=0x30ff)
}

fn is_hangul(ch: char) -> bool {
    matches!(ch as u32, 0xac00..=0xd7af)
}

/// Script composition of a piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScriptProfile {
    /// Share of alphabetic characters that are CJK
    pub cjk_ratio: f64,
    /// Share of alphabetic characters that are Latin
    pub latin_ratio: f64,
    /// Non-whitespace characters
    pub char_count: usize,
}

impl ScriptProfile {
    pub fn of(text: &str) -> Self {
        let mut alphabetic = 0usize;
        let mut cjk = 0usize;
        let mut latin = 0usize;
        let mut char_count = 0usize;

        for ch in text.chars() {
            if ch.is_whitespace() {
                continue;
            }
            char_count += 1;
            if !ch.is_alphabetic() {
                continue;
            }
            alphabetic += 1;
            if is_cjk(ch) {
                cjk += 1;
            } else if is_latin(ch) {
                latin += 1;
            }
        }

        if alphabetic == 0 {
            return Self {
                char_count,
                ..Self::default()
            };
        }
        Self {
            cjk_ratio: cjk as f64 / alphabetic as f64,
            latin_ratio: latin as f64 / alphabetic as f64,
            char_count,
        }
    }

    /// Ratio of the script `family` expects.
    pub fn matching_ratio(&self, family: ScriptFamily) -> f64 {
        match family {
            ScriptFamily::Cjk => self.cjk_ratio,
            ScriptFamily::Latin => self.latin_ratio,
            ScriptFamily::Other => 0.0,
        }
    }
}

/// Languages the detector can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedLanguage {
    Chinese,
    Japanese,
    Korean,
    English,
}

impl DetectedLanguage {
    /// Whether this detection agrees with `locale`.
    pub fn agrees_with(&self, locale: &str) -> bool {
        let language = language_prefix(locale);
        match self {
            DetectedLanguage::Chinese => matches!(language.as_str(), "zh" | "yue" | "cmn" | "wuu"),
            DetectedLanguage::Japanese => language == "ja",
            DetectedLanguage::Korean => language == "ko",
            DetectedLanguage::English => language == "en",
        }
    }
}

/// Guesses the language of a caption line.
pub trait LanguageDetector: Send + Sync {
    fn detect(&self, text: &str) -> Option<DetectedLanguage>;
}

/// Detector working from character classes alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicDetector;

impl LanguageDetector for HeuristicDetector {
    fn detect(&self, text: &str) -> Option<DetectedLanguage> {
        let profile = ScriptProfile::of(text);
        if profile.cjk_ratio >= 0.5 {
            if text.chars().any(is_kana) {
                return Some(DetectedLanguage::Japanese);
            }
            if text.chars().any(is_hangul) {
                return Some(DetectedLanguage::Korean);
            }
            return Some(DetectedLanguage::Chinese);
        }
        // Accented Latin letters point away from English
        let ascii_only = text
            .chars()
            .filter(|c| c.is_alphabetic())
            .all(|c| c.is_ascii_alphabetic());
        if profile.latin_ratio >= 0.9 && ascii_only {
            return Some(DetectedLanguage::English);
        }
        None
    }
}

/// Weights of the candidate score.
///
/// Tunable: only the ordering they produce matters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub script_match: f64,
    pub script_presence: f64,
    pub per_char: f64,
    pub detector_bonus: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            script_match: 2.0,
            script_presence: 1.0,
            per_char: 0.01,
            detector_bonus: 0.3,
        }
    }
}

/// Scores caption candidates against the locale that produced them.
pub struct CandidateScorer {
    weights: ScoreWeights,
    detector: Box<dyn LanguageDetector>,
}

impl CandidateScorer {
    pub fn new(weights: ScoreWeights, detector: Box<dyn LanguageDetector>) -> Self {
        Self { weights, detector }
    }

    pub fn weights(&self) -> ScoreWeights {
        self.weights
    }

    /// Score `text` recognized under `locale`; higher is better.
    pub fn score(&self, locale: &str, text: &str) -> f64 {
        let profile = ScriptProfile::of(text);
        let family = family_for_locale(locale);
        let bonus = match self.detector.detect(text) {
            Some(language) if language.agrees_with(locale) => self.weights.detector_bonus,
            _ => 0.0,
        };

        self.weights.script_match * profile.matching_ratio(family)
            + self.weights.script_presence * (profile.cjk_ratio + profile.latin_ratio)
            + self.weights.per_char * profile.char_count as f64
            + bonus
    }
}

impl Default for CandidateScorer {
    fn default() -> Self {
        Self::new(ScoreWeights::default(), Box::new(HeuristicDetector))
    }
}

impl std::fmt::Debug for CandidateScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateScorer")
            .field("weights", &self.weights)
            .finish_non_exhaustive()
    }
}
