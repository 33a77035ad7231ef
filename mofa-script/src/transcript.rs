//! Transcript accumulation and speaker-line parsing.
//!
//! Generated scripts use the plain "speaker: utterance" layout, one turn per
//! line. [`SpeakerLine`] recognises that layout (including full-width colons
//! and bracketed labels); [`Transcript`] is the append-only buffer the
//! orchestrator builds part by part.

use once_cell::sync::Lazy;
use regex::Regex;

/// Default separator placed between two generated parts.
pub const DEFAULT_SEPARATOR: &str = "\n\n";

// Label may be wrapped as `[host]` or prefixed with `@`; ASCII and CJK names.
static SPEAKER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[@\[]?([A-Za-z0-9_\-一-鿿]{1,24})\]?\s*[:：](.*)$")
        .expect("speaker pattern is valid")
});

// ============================================================================
// SPEAKER LINES
// ============================================================================

/// One "label: utterance" line of a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerLine<'a> {
    pub label: &'a str,
    pub utterance: &'a str,
}

impl<'a> SpeakerLine<'a> {
    /// Parse a single line. Leading/trailing whitespace is ignored.
    pub fn parse(line: &'a str) -> Option<Self> {
        let caps = SPEAKER_PATTERN.captures(line.trim())?;
        let label = caps.get(1)?.as_str();
        let utterance = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
        Some(Self { label, utterance })
    }

    /// Utterance length in characters.
    pub fn utterance_chars(&self) -> usize {
        self.utterance.chars().count()
    }
}

/// Iterate over the speaker lines of a script, skipping everything else.
pub fn speaker_lines(text: &str) -> impl Iterator<Item = SpeakerLine<'_>> {
    text.lines().filter_map(SpeakerLine::parse)
}

/// `text` with whitespace runs (newlines included) collapsed to single
/// spaces, cut to `max_chars` characters with a trailing `...` when longer.
pub fn single_line(text: &str, max_chars: usize) -> String {
    let joined = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let clamped = clamp_chars(&joined, max_chars);
    if clamped.len() < joined.len() {
        format!("{}...", clamped.trim_end())
    } else {
        joined
    }
}

// ============================================================================
// CHARACTER WINDOWS
// ============================================================================

/// The first `max_chars` characters of `text`.
///
/// Clamping is by Unicode scalar value, never splitting a character, and is
/// idempotent: `clamp_chars(clamp_chars(t, n), n) == clamp_chars(t, n)`.
pub fn clamp_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// The last `max_chars` characters of `text`.
pub fn tail_chars(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    match text.char_indices().rev().nth(max_chars - 1) {
        Some((byte_idx, _)) => &text[byte_idx..],
        None => text,
    }
}

// ============================================================================
// TRANSCRIPT
// ============================================================================

/// Append-only transcript built from generated parts.
///
/// Parts are joined with the separator; nothing already appended is ever
/// rewritten or reordered.
#[derive(Debug, Clone)]
pub struct Transcript {
    text: String,
    parts: usize,
    separator: String,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR)
    }
}

impl Transcript {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            parts: 0,
            separator: separator.into(),
        }
    }

    /// Append one generated part.
    pub fn append(&mut self, part: &str) {
        if self.parts > 0 {
            self.text.push_str(&self.separator);
        }
        self.text.push_str(part);
        self.parts += 1;
    }

    /// Append a trailing marker line explaining why generation stopped.
    ///
    /// The marker is not counted as a part.
    pub fn push_marker(&mut self, marker: &str) {
        if !self.text.is_empty() {
            self.text.push_str(&self.separator);
        }
        self.text.push_str(marker);
    }

    /// Number of parts appended so far.
    pub fn part_count(&self) -> usize {
        self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts == 0
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The trailing context window handed to the next part's prompt.
    pub fn tail(&self, max_chars: usize) -> &str {
        tail_chars(&self.text, max_chars)
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_speaker_line() {
        let line = SpeakerLine::parse("speaker-1: Welcome back to the show.").unwrap();
        assert_eq!(line.label, "speaker-1");
        assert_eq!(line.utterance, "Welcome back to the show.");

        let line = SpeakerLine::parse("  [Host]: Hello there").unwrap();
        assert_eq!(line.label, "Host");

        let line = SpeakerLine::parse("主持人：大家好，歡迎收聽").unwrap();
        assert_eq!(line.label, "主持人");
        assert_eq!(line.utterance, "大家好，歡迎收聽");
        assert_eq!(line.utterance_chars(), 8);

        assert!(SpeakerLine::parse("Just narration without a label.").is_none());
        assert!(SpeakerLine::parse("").is_none());
    }

    #[test]
    fn test_speaker_line_empty_utterance() {
        let line = SpeakerLine::parse("speaker-2:").unwrap();
        assert_eq!(line.label, "speaker-2");
        assert_eq!(line.utterance, "");
    }

    #[test]
    fn test_single_line_collapses_and_caps() {
        let page = "<html>\n<body>Bad Gateway</body>\n</html>";
        assert_eq!(single_line(page, 200), "<html> <body>Bad Gateway</body> </html>");
        assert_eq!(single_line("  short  ", 200), "short");

        let long = "x".repeat(500);
        let capped = single_line(&long, 200);
        assert_eq!(capped.chars().count(), 203);
        assert!(capped.ends_with("..."));
        assert!(!capped.contains('\n'));
    }

    #[test]
    fn test_clamp_chars() {
        assert_eq!(clamp_chars("hello", 3), "hel");
        assert_eq!(clamp_chars("hello", 10), "hello");
        assert_eq!(clamp_chars("你好世界", 2), "你好");
        assert_eq!(clamp_chars("", 4), "");

        let once = clamp_chars("歡迎收聽本節目", 4);
        assert_eq!(once.chars().count(), 4);
        assert_eq!(clamp_chars(once, 4), once);
    }

    #[test]
    fn test_tail_chars() {
        assert_eq!(tail_chars("hello", 3), "llo");
        assert_eq!(tail_chars("hello", 10), "hello");
        assert_eq!(tail_chars("你好世界", 2), "世界");
        assert_eq!(tail_chars("hello", 0), "");
    }

    #[test]
    fn test_transcript_append_only() {
        let mut transcript = Transcript::default();
        assert!(transcript.is_empty());

        let parts = ["speaker-1: part one", "speaker-2: part two", "speaker-1: three"];
        for part in parts {
            transcript.append(part);
        }

        let expected_len: usize =
            parts.iter().map(|p| p.len()).sum::<usize>() + (parts.len() - 1) * DEFAULT_SEPARATOR.len();
        assert_eq!(transcript.as_str().len(), expected_len);
        assert_eq!(transcript.part_count(), 3);
        assert!(transcript.as_str().starts_with(parts[0]));
        assert!(transcript.as_str().ends_with(parts[2]));
    }

    #[test]
    fn test_transcript_marker_is_last_line() {
        let mut transcript = Transcript::new("\n\n");
        transcript.append("speaker-1: done so far.");
        transcript.push_marker("[stopped]");
        assert_eq!(transcript.part_count(), 1);
        assert_eq!(transcript.as_str().lines().last(), Some("[stopped]"));
    }
}
