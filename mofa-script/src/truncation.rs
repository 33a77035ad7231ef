//! Heuristic detection of cut-off completions.
//!
//! A completion that hit the output-token ceiling usually stops mid-turn.
//! The checks below are cheap string scans: deterministic, no I/O, and
//! intentionally approximate.

use serde::{Deserialize, Serialize};

use crate::transcript::SpeakerLine;

/// Tokens that cannot end a finished sentence.
pub const DEFAULT_CONNECTIVES: &[&str] = &[
    "，", "、", "：", "；", ",", ":", ";", "和", "與", "及", "或", "或者", "但", "但是", "而",
    "而且", "因為", "所以", "如果", "然後", "以及", "並且", "的", " and", " or", " but",
    " because", " so", " the",
];

/// Why a completion was judged truncated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TruncationReason {
    /// Shorter than the minimum length.
    TooShort { chars: usize, min: usize },
    /// Nothing but whitespace.
    NoContent,
    /// Ends on a speaker label with (almost) nothing after it.
    DanglingSpeaker { label: String, utterance_chars: usize },
    /// Ends with a connective that cannot close a sentence.
    DanglingConnective { token: String },
}

impl std::fmt::Display for TruncationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort { chars, min } => {
                write!(f, "too short ({} chars, minimum {})", chars, min)
            }
            Self::NoContent => write!(f, "no content"),
            Self::DanglingSpeaker {
                label,
                utterance_chars,
            } => write!(
                f,
                "last turn by '{}' has only {} chars",
                label, utterance_chars
            ),
            Self::DanglingConnective { token } => {
                write!(f, "ends with connective '{}'", token.trim())
            }
        }
    }
}

/// Detector thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TruncationConfig {
    /// Completions shorter than this many characters are truncated.
    pub min_length: usize,
    /// A final speaker turn shorter than this is a half-finished utterance.
    pub min_utterance_chars: usize,
    /// Trailing tokens that mark a sentence cut mid-way.
    pub connectives: Vec<String>,
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self {
            min_length: 2000,
            min_utterance_chars: 10,
            connectives: DEFAULT_CONNECTIVES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Decides whether a completion was cut off before its logical end.
#[derive(Debug, Clone, Default)]
pub struct TruncationDetector {
    config: TruncationConfig,
}

impl TruncationDetector {
    pub fn new(config: TruncationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TruncationConfig {
        &self.config
    }

    pub fn is_truncated(&self, text: &str) -> bool {
        self.check(text).is_some()
    }

    /// Run the rules in order; the first match wins.
    pub fn check(&self, text: &str) -> Option<TruncationReason> {
        let chars = text.chars().count();
        if chars < self.config.min_length {
            return Some(TruncationReason::TooShort {
                chars,
                min: self.config.min_length,
            });
        }

        let Some(last_line) = text.lines().rev().find(|l| !l.trim().is_empty()) else {
            return Some(TruncationReason::NoContent);
        };

        if let Some(line) = SpeakerLine::parse(last_line) {
            let utterance_chars = line.utterance_chars();
            if utterance_chars < self.config.min_utterance_chars {
                return Some(TruncationReason::DanglingSpeaker {
                    label: line.label.to_string(),
                    utterance_chars,
                });
            }
        }

        let trimmed = text.trim_end();
        // Case-insensitive for ASCII words; the longest matching token wins
        // so that "以及" is reported rather than "及".
        let lowered = trimmed.to_ascii_lowercase();
        self.config
            .connectives
            .iter()
            .filter(|token| !token.is_empty())
            .filter(|token| lowered.ends_with(&token.to_ascii_lowercase()))
            .max_by_key(|token| token.len())
            .map(|token| TruncationReason::DanglingConnective {
                token: token.clone(),
            })
    }
}
