//! Dialogue quality scoring
//!
//! Advisory heuristics over a finished transcript. The scores are logged and
//! returned alongside the transcript; they never decide whether a
//! generation succeeded.

use std::collections::BTreeSet;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::ScoringError;
use crate::script_templates::ScriptTemplate;
use crate::transcript::SpeakerLine;

/// Sub-scores below this produce an issue and a suggestion.
pub const FEEDBACK_THRESHOLD: f64 = 70.0;
/// Scores below this produce additional advice in [`suggest_improvements`].
pub const ADVICE_THRESHOLD: f64 = 60.0;

const TRANSITION_KEYWORDS: &[&str] = &[
    "另外", "接下來", "說到", "談到", "回到", "轉個話題", "順便提一下", "相關地", "類似地",
    "相比之下", "speaking of", "moving on", "by the way", "on another note", "back to",
    "similarly", "in contrast", "next up", "let's talk about",
];

static BRACKET_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]\n]*\]").expect("bracket pattern is valid"));

/// Structured quality score, 0-100 everywhere.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub overall: f64,
    pub coherence: f64,
    pub role_consistency: f64,
    pub content_richness: f64,
    pub format_compliance: f64,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
}

impl fmt::Display for QualityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "overall {:.1} (coherence {:.1}, roles {:.1}, richness {:.1}, format {:.1})",
            self.overall,
            self.coherence,
            self.role_consistency,
            self.content_richness,
            self.format_compliance
        )
    }
}

/// Scores a finished transcript.
pub trait QualityScorer: Send + Sync {
    fn score(&self, transcript: &str, expected_roles: &[String]) -> Result<QualityReport, ScoringError>;

    /// Score against a template's roles (and opening line, where supported).
    fn score_for_template(
        &self,
        transcript: &str,
        template: &ScriptTemplate,
    ) -> Result<QualityReport, ScoringError> {
        self.score(transcript, &template.role_labels)
    }
}

/// Heuristic checker for "label: utterance" dialogue scripts.
#[derive(Debug, Clone, Default)]
pub struct DialogueQualityChecker {
    opening_line: Option<String>,
}

impl DialogueQualityChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opening line checked by [`QualityScorer::score`].
    pub fn with_opening_line(mut self, line: impl Into<String>) -> Self {
        self.opening_line = Some(line.into());
        self
    }

    /// Run every check. `opening_line` overrides the configured one.
    pub fn check(
        &self,
        transcript: &str,
        expected_roles: &[String],
        opening_line: Option<&str>,
    ) -> Result<QualityReport, ScoringError> {
        if transcript.trim().is_empty() {
            return Err(ScoringError::EmptyTranscript);
        }

        let coherence = coherence_score(transcript);
        let role_consistency = role_consistency_score(transcript, expected_roles);
        let content_richness = content_richness_score(transcript, expected_roles);
        let format_compliance = format_compliance_score(transcript, expected_roles, opening_line);
        let overall = (coherence + role_consistency + content_richness + format_compliance) / 4.0;

        let mut issues = Vec::new();
        let mut suggestions = Vec::new();
        let checks = [
            (
                coherence,
                "Low dialogue coherence",
                "Use more natural topic transitions between turns",
            ),
            (
                role_consistency,
                "Speaker roles are inconsistent",
                "Label every line with one of the expected speakers only",
            ),
            (
                content_richness,
                "Content is thin",
                "Add more turns or more substance per turn",
            ),
            (
                format_compliance,
                "Format does not follow the template",
                "Check the opening line and remove bracket placeholders",
            ),
        ];
        for (score, issue, suggestion) in checks {
            if score < FEEDBACK_THRESHOLD {
                issues.push(issue.to_string());
                suggestions.push(suggestion.to_string());
            }
        }

        Ok(QualityReport {
            overall,
            coherence,
            role_consistency,
            content_richness,
            format_compliance,
            issues,
            suggestions,
        })
    }
}

impl QualityScorer for DialogueQualityChecker {
    fn score(&self, transcript: &str, expected_roles: &[String]) -> Result<QualityReport, ScoringError> {
        self.check(transcript, expected_roles, self.opening_line.as_deref())
    }

    fn score_for_template(
        &self,
        transcript: &str,
        template: &ScriptTemplate,
    ) -> Result<QualityReport, ScoringError> {
        let opening = template
            .opening_line
            .as_deref()
            .or(self.opening_line.as_deref());
        self.check(transcript, &template.role_labels, opening)
    }
}

/// Suggestions from the report plus general advice for low scores,
/// without duplicates.
pub fn suggest_improvements(report: &QualityReport) -> Vec<String> {
    let mut suggestions = report.suggestions.clone();
    let advice = [
        (
            report.overall,
            "Overall quality is low; regenerate with an adjusted prompt",
        ),
        (
            report.coherence,
            "Plan the content before generating so the discussion flows",
        ),
        (
            report.role_consistency,
            "Review the speaker definitions so each voice stays consistent",
        ),
        (
            report.content_richness,
            "Deepen the content and make the exchange more interactive",
        ),
    ];
    for (score, text) in advice {
        if score < ADVICE_THRESHOLD && !suggestions.iter().any(|s| s == text) {
            suggestions.push(text.to_string());
        }
    }
    suggestions
}

// ============================================================================
// CHECKS
// ============================================================================

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn coherence_score(text: &str) -> f64 {
    let lines = non_empty_lines(text);
    if lines.len() < 5 {
        return 30.0;
    }

    let mut transitions = 0usize;
    let mut abrupt = 0usize;
    for pair in lines.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        if TRANSITION_KEYWORDS.iter().any(|k| curr.contains(k)) {
            transitions += 1;
            if is_abrupt_change(prev, curr) {
                abrupt += 1;
            }
        }
    }

    if transitions == 0 {
        return 60.0;
    }
    let ratio = 1.0 - abrupt as f64 / transitions as f64;
    (ratio * 100.0).max(50.0)
}

fn is_abrupt_change(prev: &str, curr: &str) -> bool {
    if prev.chars().count() < 10 || curr.chars().count() < 10 {
        return false;
    }
    let prev_words: BTreeSet<&str> = prev.split_whitespace().collect();
    let curr_words: BTreeSet<&str> = curr.split_whitespace().collect();
    prev_words.intersection(&curr_words).count() < 2
}

fn is_expected(label: &str, expected: &[String]) -> bool {
    expected.iter().any(|e| e.eq_ignore_ascii_case(label))
}

fn role_consistency_score(text: &str, expected: &[String]) -> f64 {
    if expected.is_empty() {
        return 100.0;
    }
    let mut score = 100.0;

    let seen: BTreeSet<String> = text
        .lines()
        .filter_map(SpeakerLine::parse)
        .map(|l| l.label.to_lowercase())
        .collect();

    for role in expected {
        if !seen.contains(&role.to_lowercase()) {
            score -= 30.0;
        }
    }
    let unexpected = seen.iter().filter(|label| !is_expected(label, expected)).count();
    score -= unexpected as f64 * 10.0;

    f64::max(score, 0.0)
}

fn turns<'a>(text: &'a str, expected: &'a [String]) -> impl Iterator<Item = &'a str> {
    text.lines().filter(move |line| {
        SpeakerLine::parse(line)
            .map(|l| expected.is_empty() || is_expected(l.label, expected))
            .unwrap_or(false)
    })
}

fn content_richness_score(text: &str, expected: &[String]) -> f64 {
    let lengths: Vec<usize> = turns(text, expected)
        .map(|line| line.trim().chars().count())
        .collect();
    if lengths.is_empty() {
        return 0.0;
    }

    let avg_len = lengths.iter().sum::<usize>() as f64 / lengths.len() as f64;
    let turn_score = (lengths.len() as f64 / 50.0 * 100.0).min(100.0);
    let length_score = (avg_len / 200.0 * 100.0).min(100.0);
    (turn_score + length_score) / 2.0
}

/// Greeting part of an opening line: its utterance up to the first comma,
/// without trailing ellipsis.
fn greeting(opening: &SpeakerLine<'_>) -> String {
    let utterance = opening.utterance.trim_end_matches(['.', '…']);
    utterance
        .split([',', '，'])
        .next()
        .unwrap_or(utterance)
        .trim()
        .to_lowercase()
}

fn format_compliance_score(text: &str, expected: &[String], opening_line: Option<&str>) -> f64 {
    let mut score = 100.0;

    if let Some(opening) = opening_line.and_then(SpeakerLine::parse) {
        let greeting = greeting(&opening);
        let first = text
            .lines()
            .filter_map(SpeakerLine::parse)
            .find(|l| l.label.eq_ignore_ascii_case(opening.label));
        if let Some(first) = first {
            if !greeting.is_empty() && !first.utterance.to_lowercase().contains(&greeting) {
                score -= 20.0;
            }
        }
    }

    if BRACKET_PLACEHOLDER.is_match(text) {
        score -= 30.0;
    }

    let malformed = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| line.contains(':') || line.contains('：'))
        .filter(|line| match SpeakerLine::parse(line) {
            Some(l) => !expected.is_empty() && !is_expected(l.label, expected),
            None => true,
        })
        .count();
    if malformed > 0 {
        score -= (malformed as f64 * 5.0).min(40.0);
    }

    f64::max(score, 0.0)
}
