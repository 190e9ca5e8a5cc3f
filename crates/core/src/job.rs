//! Generation job model and state machine.
//!
//! Jobs live in the orchestrator's arena and are addressed by [`JobId`].
//! Every state change goes through [`GenerationJob::transition`], which
//! enforces [`state_machine`] and stamps timestamps.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::analysis::FrameStrategy;
use crate::capability::OutputSpec;
use crate::error::CoreError;
use crate::types::{ProviderId, ShotId, Timestamp, VariationId};

/// Reason recorded on chain jobs that can no longer run because an earlier
/// link failed.
pub const BLOCKED_BY_UPSTREAM_REASON: &str = "blocked by upstream failure";

/// Reason recorded when the anchor for a job could not be produced.
pub const ANCHOR_DERIVATION_FAILED_REASON: &str = "anchor derivation failed";

/// Reason recorded on jobs cancelled with their batch.
pub const CANCELLED_REASON: &str = "batch cancelled";

// ---------------------------------------------------------------------------
// Identifiers and states
// ---------------------------------------------------------------------------

/// Stable handle into the orchestrator's job arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allowed job state transitions.
///
/// `Failed -> Queued` is only taken by a job with retry budget left, after
/// its backoff delay. Whether a failed job is final is tracked on the job
/// (`retry_pending`), not in the state itself.
pub mod state_machine {
    use super::JobState::{self, *};
    use crate::error::CoreError;

    /// Returns the states reachable from `from`.
    pub fn valid_transitions(from: JobState) -> &'static [JobState] {
        match from {
            // Queued -> Running, Failed (blocked / anchor failure), Cancelled
            Queued => &[Running, Failed, Cancelled],
            // Running -> Succeeded, Failed, Cancelled (result discarded)
            Running => &[Succeeded, Failed, Cancelled],
            // Failed -> Queued (retry), Cancelled (cancelled during backoff)
            Failed => &[Queued, Cancelled],
            Succeeded | Cancelled => &[],
        }
    }

    pub fn can_transition(from: JobState, to: JobState) -> bool {
        valid_transitions(from).contains(&to)
    }

    pub fn validate_transition(from: JobState, to: JobState) -> Result<(), CoreError> {
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(CoreError::Conflict(format!(
                "Invalid job transition: {from} -> {to}"
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Failure taxonomy
// ---------------------------------------------------------------------------

/// Classified cause of a failed or cancelled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No provider satisfies the shot's requirements.
    UnschedulableShot,
    /// Timeout, rate limit, or transient provider failure.
    ProviderTransient,
    /// The provider refused the input; never retried.
    ProviderRejectedInput,
    /// The continuity anchor this job needed could not be produced.
    AnchorDerivationFailed,
    /// Malformed batch input.
    ChainIntegrity,
    /// An earlier job in the same chain failed.
    BlockedByUpstream,
    /// The batch was cancelled.
    Cancelled,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnschedulableShot => "unschedulable_shot",
            Self::ProviderTransient => "provider_transient",
            Self::ProviderRejectedInput => "provider_rejected_input",
            Self::AnchorDerivationFailed => "anchor_derivation_failed",
            Self::ChainIntegrity => "chain_integrity",
            Self::BlockedByUpstream => "blocked_by_upstream",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Inputs and anchors
// ---------------------------------------------------------------------------

/// Resolved request parameters for one provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationInput {
    pub prompt: String,
    pub duration_secs: f64,
    pub output: OutputSpec,
    pub frame_strategy: FrameStrategy,
    /// Seed image for chain heads; filled from the anchor for dependents.
    pub start_image_url: Option<String>,
    /// Continuity anchor inherited from the previous chain link.
    pub continuity_anchor_url: Option<String>,
    /// Described final pose, sent when interpolating.
    pub end_state_hint: Option<String>,
}

impl GenerationInput {
    /// Attach the continuity anchor; it becomes the start frame.
    pub fn with_anchor(mut self, anchor_url: &str) -> Self {
        self.continuity_anchor_url = Some(anchor_url.to_string());
        self.start_image_url = Some(anchor_url.to_string());
        self
    }
}

/// Final-frame still derived from a completed clip, handed to the next job
/// in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuityAnchor {
    pub image_url: String,
    pub source_clip_url: String,
    pub producer: JobId,
    pub consumer: JobId,
    pub derived_at: Timestamp,
}

// ---------------------------------------------------------------------------
// GenerationJob
// ---------------------------------------------------------------------------

/// A unit of scheduled work: one variation of one shot on one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: JobId,
    pub shot_id: ShotId,
    pub variation_id: VariationId,
    pub provider_id: ProviderId,
    /// Index of the owning chain in the batch plan.
    pub chain_index: usize,
    /// Episode order, the first scheduling tie-break.
    pub episode_position: u32,
    /// Analyzer complexity, the second scheduling tie-break.
    pub complexity_score: f64,
    pub input: GenerationInput,
    pub state: JobState,
    /// Retries taken so far (first attempt not counted).
    pub retry_count: u32,
    /// Set while a failed job waits out its backoff before re-queueing.
    pub retry_pending: bool,
    pub predecessor: Option<JobId>,
    pub successor: Option<JobId>,
    /// Anchor this job consumed, once attached.
    pub anchor_in: Option<ContinuityAnchor>,
    /// Anchor derived from this job's clip for its successor.
    pub anchor_out: Option<ContinuityAnchor>,
    pub clip_url: Option<String>,
    pub estimated_cost_usd: f64,
    /// Cost of the delivered clip; zero unless succeeded.
    pub cost_usd: f64,
    /// Cost reported by attempts that produced no usable clip.
    pub cost_without_deliverable_usd: f64,
    pub failure: Option<FailureKind>,
    pub reason: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl GenerationJob {
    /// Create a queued job.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: JobId,
        shot_id: ShotId,
        variation_id: VariationId,
        provider_id: ProviderId,
        chain_index: usize,
        episode_position: u32,
        complexity_score: f64,
        input: GenerationInput,
        estimated_cost_usd: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            shot_id,
            variation_id,
            provider_id,
            chain_index,
            episode_position,
            complexity_score,
            input,
            state: JobState::Queued,
            retry_count: 0,
            retry_pending: false,
            predecessor: None,
            successor: None,
            anchor_in: None,
            anchor_out: None,
            clip_url: None,
            estimated_cost_usd,
            cost_usd: 0.0,
            cost_without_deliverable_usd: 0.0,
            failure: None,
            reason: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        }
    }

    /// Move to `to`, validating the transition and stamping timestamps.
    /// Returns the previous state.
    pub fn transition(&mut self, to: JobState) -> Result<JobState, CoreError> {
        state_machine::validate_transition(self.state, to)?;
        let from = self.state;
        let now = Utc::now();
        match to {
            JobState::Running => {
                self.started_at = Some(now);
                self.finished_at = None;
            }
            JobState::Queued => {
                self.retry_pending = false;
                self.finished_at = None;
            }
            JobState::Succeeded | JobState::Failed | JobState::Cancelled => {
                self.finished_at = Some(now);
            }
        }
        self.state = to;
        self.updated_at = now;
        Ok(from)
    }

    /// Record a failure cause alongside the state change.
    pub fn set_failure(&mut self, kind: FailureKind, reason: impl Into<String>) {
        self.failure = Some(kind);
        self.reason = Some(reason.into());
    }

    /// Whether the job will never change state again.
    pub fn is_terminal(&self) -> bool {
        match self.state {
            JobState::Succeeded | JobState::Cancelled => true,
            JobState::Failed => !self.retry_pending,
            JobState::Queued | JobState::Running => false,
        }
    }
}

/// One observed state change, as delivered to progress callbacks and the
/// durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTransition {
    pub from: JobState,
    /// Snapshot of the job after the transition.
    pub job: GenerationJob,
    pub at: Timestamp,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
