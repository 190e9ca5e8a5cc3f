//! Batch configuration and status reporting.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffConfig;
use crate::capability::OutputSpec;
use crate::error::CoreError;
use crate::job::{GenerationJob, JobState};
use crate::types::{ShotId, Timestamp};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_ANCHOR_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 2_000;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 60_000;
pub const DEFAULT_ANCHOR_RETRY_DELAY_MS: u64 = 1_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

// ---------------------------------------------------------------------------
// BatchConfig
// ---------------------------------------------------------------------------

/// Per-batch execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Global ceiling on running jobs across all providers.
    pub max_concurrent_jobs: usize,
    /// Retries allowed after the first attempt for transient failures.
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Total attempts for deriving one continuity anchor.
    pub anchor_max_attempts: u32,
    pub anchor_retry_delay_ms: u64,
    /// Interval between provider status polls.
    pub poll_interval_ms: u64,
    /// Resolution and frame rate for every clip in the batch.
    pub output: OutputSpec,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            anchor_max_attempts: DEFAULT_ANCHOR_MAX_ATTEMPTS,
            anchor_retry_delay_ms: DEFAULT_ANCHOR_RETRY_DELAY_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            output: OutputSpec::default(),
        }
    }
}

impl BatchConfig {
    /// Reject configurations that would stall or spin the scheduler.
    ///
    /// This is the only batch-fatal check; it runs before any job is
    /// admitted.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_concurrent_jobs == 0 {
            return Err(CoreError::Validation(
                "max_concurrent_jobs must be > 0".to_string(),
            ));
        }
        if self.anchor_max_attempts == 0 {
            return Err(CoreError::Validation(
                "anchor_max_attempts must be > 0".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(CoreError::Validation(
                "poll_interval_ms must be > 0".to_string(),
            ));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(CoreError::Validation(format!(
                "retry_base_delay_ms ({}) must not exceed retry_max_delay_ms ({})",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            )));
        }
        Ok(())
    }

    /// Backoff used between job retries.
    pub fn retry_backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            multiplier: 2.0,
        }
    }

    /// Backoff used between anchor derivation attempts.
    pub fn anchor_backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(self.anchor_retry_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms.max(self.anchor_retry_delay_ms)),
            multiplier: 2.0,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Per-state job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounters {
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BatchCounters {
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a GenerationJob>) -> Self {
        let mut counters = Self::default();
        for job in jobs {
            match job.state {
                JobState::Queued => counters.queued += 1,
                JobState::Running => counters.running += 1,
                JobState::Succeeded => counters.succeeded += 1,
                JobState::Failed => counters.failed += 1,
                JobState::Cancelled => counters.cancelled += 1,
            }
        }
        counters
    }

    pub fn total(&self) -> usize {
        self.queued + self.running + self.succeeded + self.failed + self.cancelled
    }
}

/// Overall lifecycle of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Jobs are still being scheduled or awaited.
    Running,
    /// Every job reached a terminal state.
    Completed,
    /// Cancellation was requested; remaining in-flight calls are drained.
    Cancelling,
    /// Cancelled and drained.
    Cancelled,
    /// Rejected before admission (invalid configuration).
    Rejected,
}

/// A shot the analyzer could not place on any provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnschedulableShot {
    pub shot_id: ShotId,
    pub reason: String,
}

/// Point-in-time view of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub status: BatchStatus,
    pub counters: BatchCounters,
    pub jobs: Vec<GenerationJob>,
    /// Cost of delivered clips only.
    pub total_cost_usd: f64,
    /// Cost reported by attempts that delivered nothing.
    pub cost_without_deliverable_usd: f64,
    /// Sum of per-job estimates, for comparison with actual cost.
    pub estimated_cost_usd: f64,
    pub estimated_remaining_secs: f64,
    pub unschedulable: Vec<UnschedulableShot>,
    /// Shots whose continuity request was dropped for this run.
    pub demoted: Vec<ShotId>,
    /// Why the batch was rejected, when it was.
    pub error: Option<String>,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
}

impl BatchResult {
    /// An empty running batch.
    pub fn new(started_at: Timestamp) -> Self {
        Self {
            status: BatchStatus::Running,
            counters: BatchCounters::default(),
            jobs: Vec::new(),
            total_cost_usd: 0.0,
            cost_without_deliverable_usd: 0.0,
            estimated_cost_usd: 0.0,
            estimated_remaining_secs: 0.0,
            unschedulable: Vec::new(),
            demoted: Vec::new(),
            error: None,
            started_at,
            finished_at: None,
        }
    }

    /// Recompute counters and cost aggregates from `jobs`.
    pub fn refresh_aggregates(&mut self) {
        self.counters = BatchCounters::from_jobs(&self.jobs);
        self.total_cost_usd = self
            .jobs
            .iter()
            .filter(|j| j.state == JobState::Succeeded)
            .map(|j| j.cost_usd)
            .sum();
        self.cost_without_deliverable_usd =
            self.jobs.iter().map(|j| j.cost_without_deliverable_usd).sum();
        self.estimated_cost_usd = self.jobs.iter().map(|j| j.estimated_cost_usd).sum();
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            BatchStatus::Completed | BatchStatus::Cancelled | BatchStatus::Rejected
        )
    }

    pub fn job_for_shot(&self, shot_id: ShotId) -> Option<&GenerationJob> {
        self.jobs.iter().find(|j| j.shot_id == shot_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
