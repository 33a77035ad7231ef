//! Content analysis
//!
//! Cheap frequency-based analysis of the source text: size, paragraph count,
//! dominant keywords and a rough estimate of how many dialogue rounds the
//! material supports. The batch planner uses the per-part keywords to give
//! each part a focus.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Source characters assumed per dialogue round.
pub const CHARS_PER_ROUND: usize = 400;
pub const MIN_ESTIMATED_ROUNDS: usize = 10;
pub const MAX_ESTIMATED_ROUNDS: usize = 200;

static CJK_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[一-鿿]{2,}").expect("CJK pattern is valid"));
static ASCII_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z][A-Za-z'\-]{3,}").expect("word pattern is valid"));

const STOPWORDS: &[&str] = &[
    // CJK function words
    "我們", "你們", "他們", "可以", "能夠", "應該", "需要", "必須", "覺得", "認為", "以為",
    "知道", "這個", "那個", "因為", "所以", "但是", "如果",
    // English
    "about", "after", "also", "been", "before", "being", "both", "could", "does", "each",
    "even", "from", "have", "into", "just", "like", "made", "make", "many", "more", "most",
    "much", "must", "only", "other", "over", "same", "should", "some", "such", "than",
    "that", "their", "them", "then", "there", "these", "they", "this", "those", "through",
    "very", "were", "what", "when", "where", "which", "while", "will", "with", "would",
    "your",
];

/// Result of [`ContentAnalyzer::analyze`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentAnalysis {
    pub char_count: usize,
    pub paragraph_count: usize,
    /// Most frequent keywords, best first.
    pub keywords: Vec<String>,
    /// Rough number of dialogue rounds the material supports.
    pub estimated_rounds: usize,
}

/// Frequency-based keyword extraction.
#[derive(Debug, Clone)]
pub struct ContentAnalyzer {
    max_keywords: usize,
}

impl Default for ContentAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentAnalyzer {
    pub fn new() -> Self {
        Self { max_keywords: 20 }
    }

    pub fn analyze(&self, text: &str) -> ContentAnalysis {
        let char_count = text.chars().count();
        let analysis = ContentAnalysis {
            char_count,
            paragraph_count: paragraphs(text).len(),
            keywords: self.keywords(text, self.max_keywords),
            estimated_rounds: estimate_rounds(char_count),
        };
        log::debug!(
            "Content analysis: {} chars, {} paragraphs, {} keywords, ~{} rounds",
            analysis.char_count,
            analysis.paragraph_count,
            analysis.keywords.len(),
            analysis.estimated_rounds
        );
        analysis
    }

    /// Up to `top_k` keywords ranked by frequency; ties keep first-seen order.
    pub fn keywords(&self, text: &str, top_k: usize) -> Vec<String> {
        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
        let mut order = 0;
        let mut bump = |word: String| {
            if STOPWORDS.contains(&word.as_str()) {
                return;
            }
            let entry = counts.entry(word).or_insert((0, order));
            entry.0 += 1;
            order += 1;
        };

        for m in CJK_RUN.find_iter(text) {
            bump(m.as_str().to_string());
        }
        for m in ASCII_WORD.find_iter(text) {
            bump(m.as_str().to_lowercase());
        }

        let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
        ranked.into_iter().take(top_k).map(|(word, _)| word).collect()
    }

    /// Split the paragraphs of `text` over `num_parts` parts and return the
    /// top keywords of each. Always returns `num_parts` entries; a part with
    /// no paragraphs gets an empty list.
    pub fn focus_per_part(&self, text: &str, num_parts: usize) -> Vec<Vec<String>> {
        let paragraphs = paragraphs(text);
        let mut focus = vec![Vec::new(); num_parts];
        if num_parts == 0 || paragraphs.is_empty() {
            return focus;
        }

        let per_part = (paragraphs.len() / num_parts).max(1);
        for (i, slot) in focus.iter_mut().enumerate() {
            let start = i * per_part;
            if start >= paragraphs.len() {
                break;
            }
            // The last part takes whatever is left.
            let end = if i == num_parts - 1 {
                paragraphs.len()
            } else {
                (start + per_part).min(paragraphs.len())
            };
            let chunk = paragraphs[start..end].join("\n\n");
            *slot = self.keywords(&chunk, 3);
        }
        focus
    }
}

/// `chars / 400`, bounded to 10..=200.
pub fn estimate_rounds(char_count: usize) -> usize {
    (char_count / CHARS_PER_ROUND).clamp(MIN_ESTIMATED_ROUNDS, MAX_ESTIMATED_ROUNDS)
}

fn paragraphs(text: &str) -> Vec<&str> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}
