//! Batch planning
//!
//! Decides how many sequential parts a generation needs and builds each
//! part's prompt. Prompts for continuation parts depend on the transcript
//! produced so far, so a [`BatchPlan`] renders them lazily through
//! [`BatchPlan::prompt_for`].

use std::fmt;

use crate::content_planner::ContentAnalyzer;
use crate::request::GenerationRequest;
use crate::script_templates::ScriptTemplate;
use crate::transcript::{clamp_chars, Transcript};

/// Position of a part within a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartRole {
    /// The whole script in one call, no continuation framing.
    SingleShot,
    First,
    Middle,
    Last,
}

impl PartRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartRole::SingleShot => "single-shot",
            PartRole::First => "first",
            PartRole::Middle => "middle",
            PartRole::Last => "last",
        }
    }

    /// Role of part `index` in a plan of `total` parts.
    pub fn for_index(index: usize, total: usize) -> Self {
        if total <= 1 {
            PartRole::SingleShot
        } else if index == 0 {
            PartRole::First
        } else if index + 1 >= total {
            PartRole::Last
        } else {
            PartRole::Middle
        }
    }
}

impl fmt::Display for PartRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rendered prompt, consumed once by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptPart {
    pub role: PartRole,
    pub prompt: String,
    pub index: usize,
    pub total: usize,
}

/// Builds prompts from a request and its template.
#[derive(Debug, Clone, Default)]
pub struct BatchPlanner {
    analyzer: ContentAnalyzer,
}

impl BatchPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Template rendered with the (clamped) source, followed by the edited
    /// transcript and user feedback blocks when present.
    pub fn base_prompt(request: &GenerationRequest, template: &ScriptTemplate) -> String {
        let source = clamp_chars(&request.source_text, request.params.max_input_length);
        let mut prompt = template.render(source);

        if let Some(edited) = &request.edited_transcript {
            prompt.push_str(
                "\n\nA previous version of this script follows. Keep what works and improve the rest:\n\
                 <edited_transcript>\n",
            );
            prompt.push_str(edited.trim());
            prompt.push_str("\n</edited_transcript>");
        }
        if let Some(feedback) = &request.user_feedback {
            prompt.push_str("\n\nFeedback from the user that the script must address:\n<user_feedback>\n");
            prompt.push_str(feedback.trim());
            prompt.push_str("\n</user_feedback>");
        }
        prompt
    }

    /// The full-size prompt used for the single-shot attempt.
    pub fn single_shot(&self, request: &GenerationRequest, template: &ScriptTemplate) -> PromptPart {
        PromptPart {
            role: PartRole::SingleShot,
            prompt: Self::base_prompt(request, template),
            index: 0,
            total: 1,
        }
    }

    /// Plan the batch for `request`. The part count comes from
    /// [`GenerationParams::part_count`](crate::request::GenerationParams::part_count).
    pub fn plan(&self, request: &GenerationRequest, template: &ScriptTemplate) -> BatchPlan {
        self.plan_parts(request, template, request.params.part_count())
    }

    /// Plan exactly `total` parts (at least one), ignoring the configured
    /// part bounds.
    pub fn plan_parts(
        &self,
        request: &GenerationRequest,
        template: &ScriptTemplate,
        total: usize,
    ) -> BatchPlan {
        let params = &request.params;
        let total = total.max(1);
        let source = clamp_chars(&request.source_text, params.max_input_length);
        let analysis = self.analyzer.analyze(source);
        let focus = if total > 1 {
            self.analyzer.focus_per_part(source, total)
        } else {
            Vec::new()
        };

        log::debug!(
            "[{}] Planned {} part(s) of ~{} rounds; source supports ~{} rounds",
            request.id,
            total,
            params.rounds_per_part,
            analysis.estimated_rounds
        );

        BatchPlan {
            base_prompt: Self::base_prompt(request, template),
            opening_line: template.opening_line.clone(),
            focus,
            total,
            rounds_per_part: params.rounds_per_part,
            context_window_chars: params.context_window_chars,
        }
    }
}

/// A planned sequence of parts.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    base_prompt: String,
    opening_line: Option<String>,
    focus: Vec<Vec<String>>,
    total: usize,
    rounds_per_part: u32,
    context_window_chars: usize,
}

impl BatchPlan {
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn role(&self, index: usize) -> PartRole {
        PartRole::for_index(index, self.total)
    }

    /// Render part `index` given the transcript accumulated so far.
    pub fn prompt_for(&self, index: usize, transcript: &Transcript) -> PromptPart {
        let role = self.role(index);
        let prompt = match role {
            PartRole::SingleShot => self.base_prompt.clone(),
            _ => self.continuation_prompt(role, index, transcript),
        };
        PromptPart {
            role,
            prompt,
            index,
            total: self.total,
        }
    }

    /// Every part rendered against an empty transcript.
    #[cfg(test)]
    pub fn parts(&self) -> Vec<PromptPart> {
        let empty = Transcript::default();
        (0..self.total).map(|i| self.prompt_for(i, &empty)).collect()
    }

    fn continuation_prompt(&self, role: PartRole, index: usize, transcript: &Transcript) -> String {
        let mut prompt = self.base_prompt.clone();

        let context = transcript.tail(self.context_window_chars);
        if role != PartRole::First && !context.is_empty() {
            prompt.push_str("\n\nThe script so far ends like this:\n<previous_transcript>\n");
            prompt.push_str(context);
            prompt.push_str("\n</previous_transcript>");
        }

        prompt.push_str(&format!(
            "\n\nThis is part {} of {} of a long script. Write about {} rounds of dialogue for this part.",
            index + 1,
            self.total,
            self.rounds_per_part
        ));

        match role {
            PartRole::First => {
                match &self.opening_line {
                    Some(line) => {
                        prompt.push_str(&format!("\nOpen the script with exactly: {}", line))
                    }
                    None => prompt.push_str("\nOpen the script with a short introduction."),
                }
                prompt.push_str(
                    "\nDo not wrap up or summarize; the conversation continues in the next part.",
                );
            }
            PartRole::Middle => {
                prompt.push_str(
                    "\nContinue directly from where the previous transcript ends. \
                     Do not repeat the opening or greet the audience again.\
                     \nDo not wrap up or summarize; the conversation continues in the next part.",
                );
            }
            PartRole::Last => {
                prompt.push_str(
                    "\nContinue directly from where the previous transcript ends. \
                     Do not repeat the opening or greet the audience again.\
                     \nThis is the final part: near its end, summarize the key points and close the conversation naturally.",
                );
            }
            PartRole::SingleShot => {}
        }

        if let Some(keywords) = self.focus.get(index).filter(|k| !k.is_empty()) {
            prompt.push_str(&format!("\nFocus of this part: {}.", keywords.join(", ")));
        }
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Endpoint;
    use crate::request::GenerationParams;
    use crate::script_templates::TemplateRegistry;

    fn request(source: &str, num_parts: usize) -> GenerationRequest {
        GenerationRequest::new(source, "podcast", "m", Endpoint::new("http://x", "k")).with_params(
            GenerationParams {
                num_parts: Some(num_parts),
                ..Default::default()
            },
        )
    }

    fn podcast() -> ScriptTemplate {
        TemplateRegistry::builtin().get("podcast").unwrap().clone()
    }

    #[test]
    fn test_role_tags() {
        let plan = BatchPlanner::new().plan(&request("Some source text.", 4), &podcast());
        let roles: Vec<PartRole> = plan.parts().iter().map(|p| p.role).collect();
        assert_eq!(
            roles,
            vec![PartRole::First, PartRole::Middle, PartRole::Middle, PartRole::Last]
        );
        assert!(plan.parts().iter().all(|p| p.total == 4));
    }

    #[test]
    fn test_single_part_has_no_framing() {
        let template = podcast();
        let req = request("Source.", 1);
        let parts = BatchPlanner::new().plan(&req, &template).parts();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].role, PartRole::SingleShot);
        assert_eq!(parts[0].prompt, template.render("Source."));
    }

    #[test]
    fn test_plan_parts_overrides_configured_count() {
        let mut req = request("Some source text.", 1);
        req.params.max_parts = 1;
        let plan = BatchPlanner::new().plan_parts(&req, &podcast(), 2);
        assert_eq!(plan.total(), 2);
        assert_eq!(plan.role(0), PartRole::First);

        let plan = BatchPlanner::new().plan_parts(&req, &podcast(), 0);
        assert_eq!(plan.total(), 1);
    }

    #[test]
    fn test_two_parts_are_first_and_last() {
        let plan = BatchPlanner::new().plan(&request("x", 2), &podcast());
        assert_eq!(plan.role(0), PartRole::First);
        assert_eq!(plan.role(1), PartRole::Last);
    }

    #[test]
    fn test_framing_per_role() {
        let plan = BatchPlanner::new().plan(&request("Material.", 3), &podcast());
        let mut transcript = Transcript::default();

        let first = plan.prompt_for(0, &transcript);
        assert!(first.prompt.contains("Open the script with exactly: speaker-1:"));
        assert!(!first.prompt.contains("<previous_transcript>"));

        transcript.append("speaker-1: earlier turn");
        let middle = plan.prompt_for(1, &transcript);
        assert!(middle.prompt.contains("<previous_transcript>\nspeaker-1: earlier turn"));
        assert!(middle.prompt.contains("Do not repeat the opening"));
        assert!(middle.prompt.contains("Do not wrap up"));

        let last = plan.prompt_for(2, &transcript);
        assert!(last.prompt.contains("summarize the key points"));
        assert!(!last.prompt.contains("Do not wrap up"));
    }

    #[test]
    fn test_context_window_is_bounded() {
        let mut req = request("Material.", 2);
        req.params.context_window_chars = 10;
        let plan = BatchPlanner::new().plan(&req, &podcast());

        let mut transcript = Transcript::default();
        transcript.append("speaker-1: 0123456789ABCDEFGHIJ");
        let last = plan.prompt_for(1, &transcript);
        assert!(last.prompt.contains("<previous_transcript>\nABCDEFGHIJ\n</previous_transcript>"));
    }

    #[test]
    fn test_source_is_clamped_in_prompt() {
        let mut req = request("abcdefghij", 1);
        req.params.max_input_length = 4;
        let template = ScriptTemplate::new("t", "", "<{content}>").unwrap();
        let part = BatchPlanner::new().single_shot(&req, &template);
        assert_eq!(part.prompt, "<abcd>");
    }

    #[test]
    fn test_empty_source_still_plans() {
        let template = ScriptTemplate::new("t", "", "[{content}]").unwrap();
        let parts = BatchPlanner::new().plan(&request("", 1), &template).parts();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].prompt, "[]");
    }

    #[test]
    fn test_feedback_and_edited_blocks_in_order() {
        let req = request("Material.", 1)
            .with_edited_transcript("speaker-1: old draft")
            .with_user_feedback("More jokes please");
        let prompt = BatchPlanner::base_prompt(&req, &podcast());
        let edited = prompt.find("<edited_transcript>").unwrap();
        let feedback = prompt.find("<user_feedback>").unwrap();
        assert!(edited < feedback);
        assert!(prompt.contains("More jokes please"));
    }

    #[test]
    fn test_focus_line_added() {
        let source = "Compilers compilers parse.\n\nNetworks networks route.";
        let plan = BatchPlanner::new().plan(&request(source, 2), &podcast());
        let parts = plan.parts();
        assert!(parts[0].prompt.contains("Focus of this part: compilers"));
        assert!(parts[1].prompt.contains("Focus of this part: networks"));
    }
}
