//! Script templates
//!
//! Instruction text merged into every generation prompt. The registry is
//! built once at startup from the built-in templates plus any declared in
//! the config file, and is read-only afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::TemplateConfig;
use crate::error::{ConfigError, GenerationError};

/// Placeholder replaced by the source text.
pub const CONTENT_PLACEHOLDER: &str = "{content}";

/// Opening line mandated by the two-speaker podcast templates.
pub const PODCAST_OPENING: &str = "speaker-1: Welcome to the MoFA Podcast, I'm your host...";

/// A named instruction template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptTemplate {
    pub name: String,
    pub description: String,
    /// Instruction text containing [`CONTENT_PLACEHOLDER`].
    pub body: String,
    /// Line the generated script must open with, if any.
    pub opening_line: Option<String>,
    /// Speaker labels expected in the output.
    pub role_labels: Vec<String>,
}

impl ScriptTemplate {
    /// Create a template, rejecting bodies without a `{content}` placeholder.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let body = body.into();
        if !body.contains(CONTENT_PLACEHOLDER) {
            return Err(ConfigError::InvalidTemplate {
                name,
                reason: "body must contain a {content} placeholder".to_string(),
            });
        }
        Ok(Self {
            name,
            description: description.into(),
            body,
            opening_line: None,
            role_labels: Vec::new(),
        })
    }

    pub fn with_opening_line(mut self, line: impl Into<String>) -> Self {
        self.opening_line = Some(line.into());
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.role_labels = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Substitute the source text into the body.
    pub fn render(&self, content: &str) -> String {
        self.body.replace(CONTENT_PLACEHOLDER, content)
    }

    /// All built-in templates.
    pub fn all_templates() -> Vec<ScriptTemplate> {
        vec![
            Self::builtin("podcast", "Two-host podcast dialogue", PODCAST_BODY)
                .with_opening_line(PODCAST_OPENING)
                .with_roles(["speaker-1", "speaker-2"]),
            Self::builtin("podcast-single", "Single-host podcast monologue", PODCAST_SINGLE_BODY)
                .with_opening_line(PODCAST_OPENING)
                .with_roles(["speaker-1"]),
            Self::builtin("lecture", "University-style lecture script", LECTURE_BODY),
            Self::builtin("summary", "Spoken summary of about 1000 words", SUMMARY_BODY),
            Self::builtin(
                "short-summary",
                "Short summary for show notes",
                SHORT_SUMMARY_BODY,
            ),
        ]
    }

    fn builtin(name: &str, description: &str, body: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            body: body.to_string(),
            opening_line: None,
            role_labels: Vec::new(),
        }
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Immutable name -> template map.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, ScriptTemplate>,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateRegistry {
    /// Registry holding only the built-in templates.
    pub fn builtin() -> Self {
        Self::from_templates(ScriptTemplate::all_templates())
    }

    /// Build from an explicit template list. Later entries replace earlier
    /// ones with the same name.
    pub fn from_templates(templates: impl IntoIterator<Item = ScriptTemplate>) -> Self {
        let templates = templates
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();
        Self { templates }
    }

    /// Built-ins plus config-declared templates; config entries override
    /// built-ins of the same name.
    pub fn from_config(entries: &BTreeMap<String, TemplateConfig>) -> Result<Self, ConfigError> {
        let mut templates = ScriptTemplate::all_templates();
        for (name, entry) in entries {
            let description = entry
                .description
                .clone()
                .unwrap_or_else(|| format!("Custom template '{}'", name));
            let mut template = ScriptTemplate::new(name.clone(), description, entry.body.clone())?
                .with_roles(entry.role_labels.iter().cloned());
            template.opening_line = entry.opening_line.clone();
            log::debug!("Registered template '{}'", name);
            templates.push(template);
        }
        Ok(Self::from_templates(templates))
    }

    pub fn get(&self, name: &str) -> Result<&ScriptTemplate, GenerationError> {
        self.templates
            .get(name)
            .ok_or_else(|| GenerationError::UnknownTemplate {
                name: name.to_string(),
                available: self.names(),
            })
    }

    /// Template names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.templates.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScriptTemplate> {
        self.templates.values()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Render `name` with `content`.
    pub fn render(&self, name: &str, content: &str) -> Result<String, GenerationError> {
        Ok(self.get(name)?.render(content))
    }
}

// ============================================================================
// BUILT-IN BODIES
// ============================================================================

const PODCAST_BODY: &str = r#"You are the script editor of the MoFA Podcast and turn written material into a lively two-host conversation.

Hosts:
- speaker-1: the host, witty, asks questions and steers the topic
- speaker-2: the co-host, analytical, goes deep on the details

Goals:
- Convert ALL of the material below into a natural, flowing dialogue
- The script must open with "speaker-1: Welcome to the MoFA Podcast, I'm your host..."
- speaker-2 introduces themselves on their first turn
- Keep the tone relaxed but informed, suitable for listening
- Do not end early; every important point must be discussed

Format:
- Start every line with "speaker-1:" or "speaker-2:"
- No other labels, no bracket placeholders such as [Host]
- Plain conversational sentences meant to be read aloud

Turn the following material into a complete podcast dialogue:

{content}"#;

const PODCAST_SINGLE_BODY: &str = r#"You are the script editor of the MoFA Podcast and write single-host episodes.

Goals:
- Convert ALL of the material below into a monologue by one warm, knowledgeable host
- The script must open with "speaker-1: Welcome to the MoFA Podcast, I'm your host..."
- Keep a natural rhythm suitable for listening
- Do not end early; cover everything

Format:
- Start every paragraph with "speaker-1:"
- Plain conversational sentences meant to be read aloud

Turn the following material into a complete single-host episode:

{content}"#;

const LECTURE_BODY: &str = r#"You are a university professor who explains complex material clearly.

Goals:
- Organize the material below into a well-structured lecture
- Explain from first principles, with examples and analogies
- Suitable for reading aloud

Turn the following material into a lecture script:

{content}"#;

const SUMMARY_BODY: &str = r#"You are a professional summarizer.

Goals:
- Extract the core points and key facts of the material
- Neutral, objective tone
- About 1000 words, suitable for listening

Summarize the following material:

{content}"#;

const SHORT_SUMMARY_BODY: &str = r#"You write show notes for the MoFA Podcast.

Goals:
- A concise summary of about 250 words
- Core ideas only, suitable for an episode description
- Plain text, no Markdown

Write a short summary of the following material:

{content}"#;
