//! Per-probe evaluation pipeline.
//!
//! Every completed probe runs through the confirmation state machine, which
//! owns the target's UP/DOWN belief. Successful probes then go through content
//! capture, which fingerprints the body and classifies how much it changed.
//! The state update is required; the capture is best-effort.

mod capture;
mod confirmation;
mod diff;
mod fingerprint;
mod locks;

pub use capture::*;
pub use confirmation::*;
pub use diff::*;
pub use fingerprint::*;
pub use locks::*;

use crate::db::{
    Availability, AvailabilityState, DbError, EvaluationStore, ProbeOutcome, ProbeResult,
    TargetLookup, TransitionEvent,
};

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Evaluation error types.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("malformed probe result: {0}")]
    MalformedProbe(String),
    #[error("storage error: {0}")]
    Store(#[from] DbError),
}

/// Why an evaluation was not carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    TargetNotFound,
    MonitoringDisabled,
    InvalidThreshold,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::TargetNotFound => "target not found",
            SkipReason::MonitoringDisabled => "monitoring disabled",
            SkipReason::InvalidThreshold => "confirmation threshold must be a positive 32-bit integer",
        };
        f.write_str(s)
    }
}

/// Result of the content capture step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ContentCheck {
    /// The probe did not succeed, so there was no content to capture.
    NotAttempted,
    Captured(SnapshotSummary),
    /// Capture failed; the change level is unknown for this probe.
    Failed { reason: String },
}

/// What one evaluation produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EvaluationOutcome {
    Skipped {
        target_id: i64,
        reason: SkipReason,
    },
    Evaluated {
        availability: AvailabilityState,
        transition: Option<TransitionEvent>,
        content: ContentCheck,
    },
}

impl EvaluationOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, EvaluationOutcome::Skipped { .. })
    }

    pub fn availability(&self) -> Option<&AvailabilityState> {
        match self {
            EvaluationOutcome::Evaluated { availability, .. } => Some(availability),
            EvaluationOutcome::Skipped { .. } => None,
        }
    }

    pub fn transition(&self) -> Option<&TransitionEvent> {
        match self {
            EvaluationOutcome::Evaluated { transition, .. } => transition.as_ref(),
            EvaluationOutcome::Skipped { .. } => None,
        }
    }

    pub fn content(&self) -> Option<&ContentCheck> {
        match self {
            EvaluationOutcome::Evaluated { content, .. } => Some(content),
            EvaluationOutcome::Skipped { .. } => None,
        }
    }
}

/// Runs probes through the evaluation pipeline.
///
/// Safe to share across threads. Evaluations of one target are serialized;
/// evaluations of distinct targets proceed in parallel.
pub struct Evaluator {
    targets: Arc<dyn TargetLookup>,
    store: Arc<dyn EvaluationStore>,
    locks: TargetLocks,
}

impl Evaluator {
    pub fn new(targets: Arc<dyn TargetLookup>, store: Arc<dyn EvaluationStore>) -> Self {
        Self {
            targets,
            store,
            locks: TargetLocks::new(),
        }
    }

    /// Evaluate a probe, resolving the target's settings first.
    ///
    /// Missing and disabled targets, and targets whose stored threshold is
    /// below 1, are skipped without touching the store.
    pub fn evaluate(
        &self,
        target_id: i64,
        probe: &ProbeResult,
    ) -> Result<EvaluationOutcome, EvalError> {
        validate_probe(probe)?;

        let Some(settings) = self.targets.lookup_target(target_id)? else {
            return Ok(skip(target_id, SkipReason::TargetNotFound));
        };
        if !settings.enabled {
            return Ok(skip(target_id, SkipReason::MonitoringDisabled));
        }
        let Ok(threshold) = u32::try_from(settings.confirmation_threshold) else {
            return Ok(skip(target_id, SkipReason::InvalidThreshold));
        };

        self.run(target_id, threshold, probe)
    }

    /// Evaluate a probe against an already known confirmation threshold.
    pub fn evaluate_with_threshold(
        &self,
        target_id: i64,
        confirmation_threshold: u32,
        probe: &ProbeResult,
    ) -> Result<EvaluationOutcome, EvalError> {
        validate_probe(probe)?;
        self.run(target_id, confirmation_threshold, probe)
    }

    /// Release bookkeeping for a target that will not be evaluated again.
    pub fn forget_target(&self, target_id: i64) {
        self.locks.forget(target_id);
    }

    fn run(
        &self,
        target_id: i64,
        threshold: u32,
        probe: &ProbeResult,
    ) -> Result<EvaluationOutcome, EvalError> {
        if threshold == 0 {
            return Ok(skip(target_id, SkipReason::InvalidThreshold));
        }

        let slot = self.locks.slot(target_id);
        let _guard = hold(&slot);

        let previous = self.store.get_availability(target_id)?;
        let Confirmation {
            state,
            mut transition,
        } = confirm(previous.as_ref(), target_id, threshold, probe);

        let event_id = self.store.save_availability(&state, transition.as_ref())?;
        if let Some(event) = transition.as_mut() {
            event.id = event_id.unwrap_or_default();
            match event.to_state {
                Availability::Down => tracing::warn!(
                    target_id,
                    outcome = %event.outcome,
                    status = ?event.status_code,
                    "Target confirmed DOWN"
                ),
                Availability::Up => tracing::info!(
                    target_id,
                    outcome = %event.outcome,
                    "Target confirmed UP"
                ),
            }
        } else {
            tracing::debug!(
                target_id,
                state = %state.state,
                failures = state.consecutive_failures,
                successes = state.consecutive_successes,
                "Availability updated"
            );
        }

        let content = if probe.outcome == ProbeOutcome::Success {
            match capture_content(self.store.as_ref(), target_id, probe) {
                Ok(snapshot) => {
                    tracing::debug!(
                        target_id,
                        snapshot_id = snapshot.id,
                        change = %snapshot.change_level,
                        "Content captured"
                    );
                    ContentCheck::Captured(SnapshotSummary::from(&snapshot))
                }
                Err(e) => {
                    tracing::error!(target_id, error = %e, "Content capture failed");
                    ContentCheck::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        } else {
            ContentCheck::NotAttempted
        };

        Ok(EvaluationOutcome::Evaluated {
            availability: state,
            transition,
            content,
        })
    }
}

fn skip(target_id: i64, reason: SkipReason) -> EvaluationOutcome {
    tracing::warn!(target_id, %reason, "Skipping evaluation");
    EvaluationOutcome::Skipped { target_id, reason }
}

/// Reject probe results whose fields contradict their outcome.
pub fn validate_probe(probe: &ProbeResult) -> Result<(), EvalError> {
    if !probe.latency_ms.is_finite() || probe.latency_ms < 0.0 {
        return Err(EvalError::MalformedProbe(format!(
            "latency must be a non-negative number, got {}",
            probe.latency_ms
        )));
    }

    let success = probe.outcome == ProbeOutcome::Success;
    if success && probe.body.is_none() {
        return Err(EvalError::MalformedProbe(
            "SUCCESS probe is missing its body".to_string(),
        ));
    }
    if success && probe.headers.is_none() {
        return Err(EvalError::MalformedProbe(
            "SUCCESS probe is missing its headers".to_string(),
        ));
    }
    if !success && (probe.body.is_some() || probe.headers.is_some()) {
        return Err(EvalError::MalformedProbe(format!(
            "{} probe must not carry a body or headers",
            probe.outcome
        )));
    }
    Ok(())
}
