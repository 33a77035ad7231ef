//! MoFA Script - long-form script generation
//!
//! Turns extracted document text into long dialogue scripts (podcasts,
//! lectures, summaries) through an OpenAI-compatible chat-completion
//! endpoint. A single completion has a bounded output budget, so the
//! [`ContinuationOrchestrator`] falls back from one full-size call to a
//! sequence of context-carrying parts when the reply comes back truncated.
//!
//! This crate provides:
//! - [`ModelGateway`]: HTTP client plus retry/backoff and `Retry-After` handling
//! - [`TruncationDetector`]: heuristics for cut-off completions
//! - [`BatchPlanner`]: part count and opening/continuation/closing prompts
//! - [`DialogueQualityChecker`]: advisory quality scores
//! - [`ScriptConfig`]: layered configuration (defaults, file, environment)

pub mod client;
pub mod config;
pub mod content_planner;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod progress;
pub mod quality;
pub mod request;
pub mod retry;
pub mod script_templates;
pub mod transcript;
pub mod truncation;

pub use client::{
    ChatClient, ChatCompletion, ChatCompletionRequest, CompletionCall, CompletionResult, Endpoint,
    ModelGateway, OpenaiClient,
};
pub use config::{get_env_or_value, ProviderConfig, ScriptConfig, TemplateConfig};
pub use content_planner::{ContentAnalysis, ContentAnalyzer};
pub use error::{ClientError, ConfigError, GenerationError, ProgressError, ScoringError};
pub use orchestrator::{
    ContinuationOrchestrator, GenerationMode, GenerationOutcome, PartialReason,
};
pub use planner::{BatchPlan, BatchPlanner, PartRole, PromptPart};
pub use progress::{
    ChannelReporter, CollectingReporter, LogReporter, NullReporter, Phase, ProgressEvent,
    ProgressReporter,
};
pub use quality::{suggest_improvements, DialogueQualityChecker, QualityReport, QualityScorer};
pub use request::{GenerationParams, GenerationRequest};
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
pub use script_templates::{ScriptTemplate, TemplateRegistry};
pub use transcript::Transcript;
pub use truncation::{TruncationConfig, TruncationDetector, TruncationReason};

// Callers wire cancellation with the same token type.
pub use tokio_util::sync::CancellationToken;
