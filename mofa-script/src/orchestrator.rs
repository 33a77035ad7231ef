//! Long-form generation orchestrator.
//!
//! One call turns a [`GenerationRequest`] into a transcript:
//!
//! ```text
//! Init -> SingleShotAttempt -> Done
//!                           -> NeedsBatch -> BatchPart(0) -> ... -> BatchPart(n-1) -> Done
//! ```
//!
//! A single-shot reply that looks truncated is discarded and the request is
//! re-run as a batch of at least two context-carrying parts. If a batch part exhausts its
//! retries after earlier parts succeeded, the caller gets the partial
//! transcript with a trailing marker line; with no prior output it is a hard
//! failure.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::client::{CompletionCall, CompletionResult, ModelGateway};
use crate::error::GenerationError;
use crate::planner::{BatchPlan, BatchPlanner, PartRole, PromptPart};
use crate::progress::{notify, Phase, ProgressEvent, ProgressReporter};
use crate::quality::{DialogueQualityChecker, QualityReport, QualityScorer};
use crate::request::GenerationRequest;
use crate::script_templates::{ScriptTemplate, TemplateRegistry};
use crate::transcript::{clamp_chars, single_line, Transcript};
use crate::truncation::TruncationDetector;

/// How a complete transcript was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    SingleShot,
    Batch,
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationMode::SingleShot => f.write_str("single-shot"),
            GenerationMode::Batch => f.write_str("batch"),
        }
    }
}

/// Why a transcript is incomplete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartialReason {
    /// Part `part` (zero-based) exhausted its retries.
    GatewayFailure { part: usize, message: String },
    /// Cancelled after at least one part completed.
    Cancelled,
}

impl fmt::Display for PartialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartialReason::GatewayFailure { part, message } => {
                write!(f, "part {} failed: {}", part + 1, message)
            }
            PartialReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Result of a generation that produced output.
#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    Complete {
        transcript: String,
        /// `None` when scoring is disabled or failed.
        report: Option<QualityReport>,
        parts: usize,
        mode: GenerationMode,
    },
    Partial {
        /// Valid up to the last completed part, plus a marker line when a
        /// part failed.
        transcript: String,
        completed_parts: usize,
        total_parts: usize,
        reason: PartialReason,
    },
}

impl GenerationOutcome {
    pub fn transcript(&self) -> &str {
        match self {
            GenerationOutcome::Complete { transcript, .. } => transcript,
            GenerationOutcome::Partial { transcript, .. } => transcript,
        }
    }

    pub fn into_transcript(self) -> String {
        match self {
            GenerationOutcome::Complete { transcript, .. } => transcript,
            GenerationOutcome::Partial { transcript, .. } => transcript,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, GenerationOutcome::Complete { .. })
    }

    pub fn report(&self) -> Option<&QualityReport> {
        match self {
            GenerationOutcome::Complete { report, .. } => report.as_ref(),
            GenerationOutcome::Partial { .. } => None,
        }
    }
}

/// Parts used when a truncated single shot falls back to batch mode.
const MIN_FALLBACK_PARTS: usize = 2;
/// Longest error text carried into the partial-result marker.
const MARKER_MESSAGE_CHARS: usize = 200;

/// Internal generation state.
enum GenerationState {
    Init,
    SingleShotAttempt,
    /// `fallback` is set when the single-shot reply was truncated.
    NeedsBatch { fallback: bool },
    BatchPart(usize),
    Done(GenerationMode),
    Stopped(PartialReason),
    Failed(GenerationError),
}

/// Drives the gateway across single-shot and batch generation.
pub struct ContinuationOrchestrator {
    gateway: ModelGateway,
    templates: Arc<TemplateRegistry>,
    reporter: Arc<dyn ProgressReporter>,
    planner: BatchPlanner,
    detector: TruncationDetector,
    scorer: Option<Arc<dyn QualityScorer>>,
}

impl ContinuationOrchestrator {
    pub fn new(
        gateway: ModelGateway,
        templates: Arc<TemplateRegistry>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            gateway,
            templates,
            reporter,
            planner: BatchPlanner::new(),
            detector: TruncationDetector::default(),
            scorer: Some(Arc::new(DialogueQualityChecker::new())),
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn QualityScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn without_scorer(mut self) -> Self {
        self.scorer = None;
        self
    }

    pub fn with_detector(mut self, detector: TruncationDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    /// Generate a transcript for `request`.
    ///
    /// Returns `Err` only for invalid input, for a failure before any output
    /// was produced, or for cancellation before the first part completed.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, GenerationError> {
        let template = self.templates.get(&request.template)?;
        let params = &request.params;
        let mut transcript = Transcript::new(params.separator.clone());
        let mut plan: Option<BatchPlan> = None;
        let mut state = GenerationState::Init;

        loop {
            state = match state {
                GenerationState::Init => match self.prepare(request) {
                    Ok(()) if cancel.is_cancelled() => {
                        GenerationState::Failed(GenerationError::Cancelled)
                    }
                    Ok(()) if params.force_batch => {
                        GenerationState::NeedsBatch { fallback: false }
                    }
                    Ok(()) => GenerationState::SingleShotAttempt,
                    Err(e) => return Err(e),
                },

                GenerationState::SingleShotAttempt => {
                    let part = self.planner.single_shot(request, template);
                    match self
                        .call(request, &part, params.single_shot_max_tokens, cancel)
                        .await
                    {
                        Ok(None) => GenerationState::Failed(GenerationError::Cancelled),
                        Ok(Some(result)) => {
                            if self.is_truncated(request, &result) {
                                log::debug!(
                                    "[{}] Discarded single-shot text ({} chars): {}",
                                    request.id,
                                    result.content.chars().count(),
                                    clamp_chars(&result.content, 200)
                                );
                                notify(
                                    self.reporter.as_ref(),
                                    ProgressEvent::new(
                                        Phase::Fallback,
                                        "single-shot output truncated, switching to batch mode",
                                    ),
                                );
                                GenerationState::NeedsBatch { fallback: true }
                            } else {
                                transcript.append(&result.content);
                                GenerationState::Done(GenerationMode::SingleShot)
                            }
                        }
                        Err(e) => GenerationState::Failed(e),
                    }
                }

                GenerationState::NeedsBatch { fallback } => {
                    let mut total = params.part_count();
                    if fallback && total < MIN_FALLBACK_PARTS {
                        log::info!(
                            "[{}] Raising part count from {} to {} after truncation",
                            request.id,
                            total,
                            MIN_FALLBACK_PARTS
                        );
                        total = MIN_FALLBACK_PARTS;
                    }
                    let batch = self.planner.plan_parts(request, template, total);
                    log::info!("[{}] Generating in {} part(s)", request.id, batch.total());
                    plan = Some(batch);
                    GenerationState::BatchPart(0)
                }

                GenerationState::BatchPart(index) => {
                    let Some(batch) = plan.as_ref() else {
                        // Only reachable through NeedsBatch.
                        return Err(GenerationError::invalid_input("batch part without a plan"));
                    };
                    let total = batch.total();

                    if index >= total {
                        GenerationState::Done(GenerationMode::Batch)
                    } else if cancel.is_cancelled() {
                        self.stop_on_cancel(&transcript)
                    } else {
                        let part = batch.prompt_for(index, &transcript);
                        match self
                            .call(request, &part, params.max_output_tokens, cancel)
                            .await
                        {
                            Ok(None) => self.stop_on_cancel(&transcript),
                            Ok(Some(result)) => {
                                if self.is_truncated(request, &result) {
                                    log::warn!(
                                        "[{}] Part {}/{} looks truncated, keeping it",
                                        request.id,
                                        index + 1,
                                        total
                                    );
                                }
                                transcript.append(&result.content);
                                notify(
                                    self.reporter.as_ref(),
                                    ProgressEvent::new(
                                        Phase::PartCompleted,
                                        format!(
                                            "{} chars ({} role)",
                                            result.content.chars().count(),
                                            part.role
                                        ),
                                    )
                                    .with_part(index, total),
                                );
                                GenerationState::BatchPart(index + 1)
                            }
                            Err(e) if transcript.is_empty() => GenerationState::Failed(e),
                            Err(e) => {
                                log::error!("[{}] Part {} failed: {}", request.id, index + 1, e);
                                GenerationState::Stopped(PartialReason::GatewayFailure {
                                    part: index,
                                    message: single_line(&e.to_string(), MARKER_MESSAGE_CHARS),
                                })
                            }
                        }
                    }
                }

                GenerationState::Done(mode) => {
                    let parts = transcript.part_count();
                    let text = transcript.into_string();
                    let report = if params.score {
                        self.score(request, &text, template)
                    } else {
                        None
                    };
                    log::info!(
                        "[{}] Generation complete: {} chars, {} part(s), {} mode",
                        request.id,
                        text.chars().count(),
                        parts,
                        mode
                    );
                    notify(
                        self.reporter.as_ref(),
                        ProgressEvent::new(
                            Phase::Completed,
                            format!("{} chars in {} part(s)", text.chars().count(), parts),
                        ),
                    );
                    return Ok(GenerationOutcome::Complete {
                        transcript: text,
                        report,
                        parts,
                        mode,
                    });
                }

                GenerationState::Stopped(reason) => {
                    let total_parts = plan.as_ref().map(BatchPlan::total).unwrap_or(1);
                    let completed_parts = transcript.part_count();
                    if let PartialReason::GatewayFailure { .. } = reason {
                        transcript.push_marker(&format!(
                            "[Generation stopped after {}/{} parts: {}]",
                            completed_parts, total_parts, reason
                        ));
                    }
                    log::warn!(
                        "[{}] Returning partial transcript ({}/{} parts): {}",
                        request.id,
                        completed_parts,
                        total_parts,
                        reason
                    );
                    notify(
                        self.reporter.as_ref(),
                        ProgressEvent::new(
                            match reason {
                                PartialReason::Cancelled => Phase::Cancelled,
                                PartialReason::GatewayFailure { .. } => Phase::Completed,
                            },
                            format!("partial: {}", reason),
                        )
                        .with_part(completed_parts.saturating_sub(1), total_parts),
                    );
                    return Ok(GenerationOutcome::Partial {
                        transcript: transcript.into_string(),
                        completed_parts,
                        total_parts,
                        reason,
                    });
                }

                GenerationState::Failed(e) => {
                    log::error!("[{}] Generation failed: {}", request.id, e);
                    let phase = match e {
                        GenerationError::Cancelled => Phase::Cancelled,
                        _ => Phase::Failed,
                    };
                    notify(
                        self.reporter.as_ref(),
                        ProgressEvent::new(phase, e.to_string()),
                    );
                    return Err(e);
                }
            };
        }
    }

    /// Validate the request and log input clamping.
    fn prepare(&self, request: &GenerationRequest) -> Result<(), GenerationError> {
        if request.source_text.trim().is_empty() {
            return Err(GenerationError::invalid_input("source text is empty"));
        }

        let max = request.params.max_input_length;
        let chars = request.source_text.chars().count();
        if chars > max {
            log::info!(
                "[{}] Source text clamped from {} to {} chars",
                request.id,
                chars,
                max
            );
        }
        notify(
            self.reporter.as_ref(),
            ProgressEvent::new(
                Phase::Prepare,
                format!(
                    "{} source chars, template '{}', model {}",
                    chars.min(max),
                    request.template,
                    request.model
                ),
            ),
        );
        Ok(())
    }

    /// One gateway call, abandoned if `cancel` fires first.
    async fn call(
        &self,
        request: &GenerationRequest,
        part: &PromptPart,
        max_tokens: u32,
        cancel: &CancellationToken,
    ) -> Result<Option<CompletionResult>, GenerationError> {
        let call = CompletionCall {
            endpoint: &request.endpoint,
            prompt: &part.prompt,
            model: &request.model,
            max_tokens,
            temperature: request.params.temperature,
            part: (part.role != PartRole::SingleShot).then_some((part.index, part.total)),
            tag: &request.id,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            result = self.gateway.complete(call, self.reporter.as_ref()) => result.map(Some),
        }
    }

    fn is_truncated(&self, request: &GenerationRequest, result: &CompletionResult) -> bool {
        if result.truncated {
            log::info!("[{}] Provider reported finish_reason=length", request.id);
            return true;
        }
        match self.detector.check(&result.content) {
            Some(reason) => {
                log::info!("[{}] Output looks truncated: {}", request.id, reason);
                true
            }
            None => false,
        }
    }

    fn stop_on_cancel(&self, transcript: &Transcript) -> GenerationState {
        if transcript.is_empty() {
            GenerationState::Failed(GenerationError::Cancelled)
        } else {
            GenerationState::Stopped(PartialReason::Cancelled)
        }
    }

    /// Best-effort scoring; failures are logged and dropped.
    fn score(
        &self,
        request: &GenerationRequest,
        text: &str,
        template: &ScriptTemplate,
    ) -> Option<QualityReport> {
        let scorer = self.scorer.as_ref()?;
        match scorer.score_for_template(text, template) {
            Ok(report) => {
                log::info!("[{}] Quality: {}", request.id, report);
                for issue in &report.issues {
                    log::info!("[{}] Quality issue: {}", request.id, issue);
                }
                notify(
                    self.reporter.as_ref(),
                    ProgressEvent::new(Phase::Scored, format!("{:.1}/100", report.overall)),
                );
                Some(report)
            }
            Err(e) => {
                log::warn!("[{}] Quality scoring failed: {}", request.id, e);
                None
            }
        }
    }
}
