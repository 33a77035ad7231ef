//! Generation request and its tunable parameters.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::Endpoint;
use crate::transcript::DEFAULT_SEPARATOR;

/// Tunable generation parameters.
///
/// Also the `[generation]` section of the config file; per-request values
/// start from the configured defaults and are overridden by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Dialogue rounds requested from each batch part.
    pub rounds_per_part: u32,
    /// Total rounds wanted; sizes the batch when `num_parts` is unset.
    pub target_rounds: Option<u32>,
    /// Explicit part count chosen by the caller.
    pub num_parts: Option<usize>,
    pub min_parts: usize,
    pub max_parts: usize,
    /// Part count used when neither `num_parts` nor `target_rounds` is set.
    pub default_parts: usize,
    /// Skip the single-shot attempt and go straight to batch mode.
    pub force_batch: bool,
    /// Source text is clamped to this many characters.
    pub max_input_length: usize,
    /// Output-token ceiling for each batch part.
    pub max_output_tokens: u32,
    /// Output-token ceiling for the single-shot attempt.
    pub single_shot_max_tokens: u32,
    pub temperature: f32,
    /// Trailing transcript characters carried into each continuation prompt.
    pub context_window_chars: usize,
    /// Separator placed between parts.
    pub separator: String,
    /// Run the quality scorer on complete transcripts.
    pub score: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            rounds_per_part: 67,
            target_rounds: None,
            num_parts: None,
            min_parts: 1,
            max_parts: 9,
            default_parts: 3,
            force_batch: false,
            max_input_length: 100_000,
            max_output_tokens: 8192,
            single_shot_max_tokens: 32768,
            temperature: 0.7,
            context_window_chars: 8000,
            separator: DEFAULT_SEPARATOR.to_string(),
            score: true,
        }
    }
}

impl GenerationParams {
    /// Number of batch parts for these parameters, bounded to
    /// `[min_parts, max_parts]`.
    pub fn part_count(&self) -> usize {
        let min = self.min_parts.max(1);
        let max = self.max_parts.max(min);
        let wanted = match (self.num_parts, self.target_rounds) {
            (Some(n), _) => n,
            (None, Some(rounds)) => {
                let per_part = self.rounds_per_part.max(1);
                rounds.div_ceil(per_part) as usize
            }
            (None, None) => self.default_parts,
        };
        wanted.clamp(min, max)
    }
}

/// Everything needed for one generation run.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Short id used in log lines.
    pub id: String,
    /// Text extracted from the source documents.
    pub source_text: String,
    pub template: String,
    pub model: String,
    pub endpoint: Endpoint,
    pub params: GenerationParams,
    /// A previous transcript the model should revise or build on.
    pub edited_transcript: Option<String>,
    /// Free-text steering from the user.
    pub user_feedback: Option<String>,
}

impl GenerationRequest {
    pub fn new(
        source_text: impl Into<String>,
        template: impl Into<String>,
        model: impl Into<String>,
        endpoint: Endpoint,
    ) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            id: id[..8].to_string(),
            source_text: source_text.into(),
            template: template.into(),
            model: model.into(),
            endpoint,
            params: GenerationParams::default(),
            edited_transcript: None,
            user_feedback: None,
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_edited_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.edited_transcript = Some(transcript.into()).filter(|t: &String| !t.trim().is_empty());
        self
    }

    pub fn with_user_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.user_feedback = Some(feedback.into()).filter(|f: &String| !f.trim().is_empty());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_count_defaults() {
        let params = GenerationParams::default();
        assert_eq!(params.part_count(), 3);
    }

    #[test]
    fn test_part_count_from_target_rounds() {
        let params = GenerationParams {
            target_rounds: Some(200),
            ..Default::default()
        };
        // ceil(200 / 67) = 3
        assert_eq!(params.part_count(), 3);

        let params = GenerationParams {
            target_rounds: Some(67),
            ..Default::default()
        };
        assert_eq!(params.part_count(), 1);
    }

    #[test]
    fn test_part_count_is_bounded() {
        let params = GenerationParams {
            num_parts: Some(40),
            ..Default::default()
        };
        assert_eq!(params.part_count(), 9);

        let params = GenerationParams {
            num_parts: Some(0),
            ..Default::default()
        };
        assert_eq!(params.part_count(), 1);

        // Explicit part count wins over target rounds.
        let params = GenerationParams {
            num_parts: Some(2),
            target_rounds: Some(600),
            ..Default::default()
        };
        assert_eq!(params.part_count(), 2);
    }

    #[test]
    fn test_request_builders() {
        let request = GenerationRequest::new("text", "podcast", "gpt", Endpoint::new("u", "k"))
            .with_user_feedback("   ")
            .with_edited_transcript("speaker-1: earlier draft");
        assert_eq!(request.id.len(), 8);
        assert!(request.user_feedback.is_none());
        assert_eq!(
            request.edited_transcript.as_deref(),
            Some("speaker-1: earlier draft")
        );
    }
}
