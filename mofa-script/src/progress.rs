//! Progress reporting.
//!
//! The orchestrator and gateway emit a [`ProgressEvent`] at every attempt
//! boundary, retry wait, part completion and at the end of a run. Events go
//! to an injected [`ProgressReporter`]; a reporter that fails is logged and
//! otherwise ignored, it can never abort generation.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::ProgressError;

/// Stage of the generation a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Input validated and clamped.
    Prepare,
    /// A gateway attempt is starting.
    AttemptStart,
    /// A gateway attempt returned content.
    AttemptSucceeded,
    /// Waiting before the next attempt.
    RetryWait,
    /// Single-shot output was truncated; switching to batch mode.
    Fallback,
    /// A batch part was appended to the transcript.
    PartCompleted,
    /// Quality scoring finished.
    Scored,
    /// Generation finished (fully or partially).
    Completed,
    /// Generation stopped on cancellation.
    Cancelled,
    /// Generation failed.
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::AttemptStart => "attempt",
            Phase::AttemptSucceeded => "attempt-ok",
            Phase::RetryWait => "retry-wait",
            Phase::Fallback => "fallback",
            Phase::PartCompleted => "part",
            Phase::Scored => "scored",
            Phase::Completed => "completed",
            Phase::Cancelled => "cancelled",
            Phase::Failed => "failed",
        }
    }
}

/// A single progress notification.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub detail: String,
    /// Zero-based part index when the event concerns a batch part.
    pub part: Option<usize>,
    /// Total part count when known.
    pub total: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(phase: Phase, detail: impl Into<String>) -> Self {
        Self {
            phase,
            detail: detail.into(),
            part: None,
            total: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_part(mut self, part: usize, total: usize) -> Self {
        self.part = Some(part);
        self.total = Some(total);
        self
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.part, self.total) {
            (Some(part), Some(total)) => write!(
                f,
                "[{}] part {}/{}: {}",
                self.phase.as_str(),
                part + 1,
                total,
                self.detail
            ),
            _ => write!(f, "[{}] {}", self.phase.as_str(), self.detail),
        }
    }
}

/// Sink for progress notifications.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent) -> Result<(), ProgressError>;
}

/// Deliver an event, logging (never propagating) reporter failures.
pub fn notify(reporter: &dyn ProgressReporter, event: ProgressEvent) {
    if let Err(e) = reporter.report(&event) {
        log::debug!("Progress reporter failed for '{}': {}", event, e);
    }
}

// ============================================================================
// REPORTERS
// ============================================================================

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn report(&self, _event: &ProgressEvent) -> Result<(), ProgressError> {
        Ok(())
    }
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn report(&self, event: &ProgressEvent) -> Result<(), ProgressError> {
        match event.phase {
            Phase::Failed => log::error!("{}", event),
            Phase::RetryWait | Phase::Fallback | Phase::Cancelled => log::warn!("{}", event),
            _ => log::info!("{}", event),
        }
        Ok(())
    }
}

/// Sends events over a channel, e.g. to a UI thread polling for updates.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: Sender<ProgressEvent>,
}

impl ChannelReporter {
    pub fn new(sender: Sender<ProgressEvent>) -> Self {
        Self { sender }
    }
}

impl ProgressReporter for ChannelReporter {
    fn report(&self, event: &ProgressEvent) -> Result<(), ProgressError> {
        self.sender
            .send(event.clone())
            .map_err(|_| ProgressError::Disconnected)
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct CollectingReporter {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// Number of events recorded for a phase.
    pub fn count(&self, phase: Phase) -> usize {
        self.events.lock().iter().filter(|e| e.phase == phase).count()
    }

    /// Rendered messages, in arrival order.
    pub fn messages(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.to_string()).collect()
    }
}

impl ProgressReporter for CollectingReporter {
    fn report(&self, event: &ProgressEvent) -> Result<(), ProgressError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
