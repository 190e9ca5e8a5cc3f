//! Batch orchestration: admission, retries, continuity anchors and
//! cancellation.
//!
//! One control loop owns the job arena and the per-provider running counts.
//! Provider attempts, retry timers and anchor derivations run as tasks in a
//! [`JoinSet`] and report back to the loop as [`TaskEvent`]s, so every state
//! change happens in one place and in a well-defined order.
//!
//! Transitions are forwarded to a separate notifier task (progress callback,
//! store write-through, event bus) so the scheduler never waits on them.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use shotline_core::batch::{BatchConfig, BatchResult, BatchStatus};
use shotline_core::estimation::remaining_wall_clock_secs;
use shotline_core::job::{
    ContinuityAnchor, FailureKind, GenerationJob, JobId, JobState, JobTransition,
    ANCHOR_DERIVATION_FAILED_REASON, BLOCKED_BY_UPSTREAM_REASON, CANCELLED_REASON,
};
use shotline_core::types::ProviderId;
use shotline_db::models::variation::VariationUpdate;
use shotline_events::{EventBus, PlatformEvent};
use shotline_providers::{run_to_completion, AttemptError, GeneratedClip, ProviderSet};
use tokio::sync::{mpsc, RwLock};
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::anchor::{AnchorDeriver, AnchorError, DerivedAnchor};
use crate::plan::{generation_input, BatchPlan};
use crate::store::ShotStore;

/// Reason recorded on jobs left without any task able to advance them.
pub const STALLED_REASON: &str = "job stalled with no pending work";

/// Called once per job transition, in order, off the scheduling path.
pub type ProgressCallback = Arc<dyn Fn(&JobTransition) + Send + Sync>;

/// Optional wiring for one run.
#[derive(Clone, Default)]
pub struct RunHooks {
    pub progress: Option<ProgressCallback>,
    /// Cooperative cancellation. Queued work is dropped at once; running
    /// provider calls finish and their results are discarded.
    pub cancel: CancellationToken,
    /// Refreshed after every event the loop handles.
    pub status: Option<Arc<RwLock<BatchResult>>>,
}

/// Executes batch plans against a set of providers.
pub struct Orchestrator {
    providers: ProviderSet,
    deriver: AnchorDeriver,
    store: Arc<dyn ShotStore>,
    events: Option<Arc<EventBus>>,
}

impl Orchestrator {
    pub fn new(providers: ProviderSet, deriver: AnchorDeriver, store: Arc<dyn ShotStore>) -> Self {
        Self {
            providers,
            deriver,
            store,
            events: None,
        }
    }

    /// Publish every job transition on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    /// Run `plan` to completion.
    pub async fn run(&self, plan: BatchPlan, config: BatchConfig) -> BatchResult {
        self.run_with(plan, config, RunHooks::default()).await
    }

    /// Run `plan` with progress reporting, cancellation and a shared status
    /// snapshot.
    pub async fn run_with(&self, plan: BatchPlan, config: BatchConfig, hooks: RunHooks) -> BatchResult {
        let mut result = BatchResult::new(Utc::now());
        result.unschedulable = plan.unschedulable.clone();
        result.demoted = plan.demoted.clone();

        if let Err(e) = config.validate() {
            tracing::error!(error = %e, "Rejecting batch before admission");
            result.status = BatchStatus::Rejected;
            result.error = Some(e.to_string());
            result.finished_at = Some(Utc::now());
            publish(hooks.status.as_ref(), &result).await;
            return result;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = tokio::spawn(forward_transitions(
            rx,
            hooks.progress.clone(),
            Arc::clone(&self.store),
            self.events.clone(),
        ));

        let mut run = BatchRun::new(self, &plan, config, tx, result);
        run.execute(&hooks).await;
        let result = run.finish();

        // The sender is gone with `run`; wait for the write-through to drain.
        if let Err(e) = notifier.await {
            tracing::error!(error = %e, "Transition notifier failed");
        }
        publish(hooks.status.as_ref(), &result).await;

        tracing::info!(
            status = ?result.status,
            succeeded = result.counters.succeeded,
            failed = result.counters.failed,
            cancelled = result.counters.cancelled,
            total_cost_usd = result.total_cost_usd,
            "Batch finished",
        );
        result
    }
}

async fn publish(status: Option<&Arc<RwLock<BatchResult>>>, result: &BatchResult) {
    if let Some(status) = status {
        *status.write().await = result.clone();
    }
}

/// Deliver transitions in order: progress callback, store write-through,
/// event bus.
async fn forward_transitions(
    mut rx: mpsc::UnboundedReceiver<JobTransition>,
    progress: Option<ProgressCallback>,
    store: Arc<dyn ShotStore>,
    events: Option<Arc<EventBus>>,
) {
    while let Some(transition) = rx.recv().await {
        if let Some(callback) = &progress {
            callback(&transition);
        }

        let job = &transition.job;
        let update = VariationUpdate::from_job(job);
        if let Err(e) = store
            .update_variation(job.shot_id, job.variation_id, &update)
            .await
        {
            tracing::warn!(
                job_id = %job.id,
                shot_id = job.shot_id,
                variation_id = job.variation_id,
                error = %e,
                "Variation write-through failed",
            );
        }

        if let Some(bus) = &events {
            bus.publish(PlatformEvent::job_transition(&transition));
        }
    }
}

// ---------------------------------------------------------------------------
// Control loop
// ---------------------------------------------------------------------------

/// Completion reports from spawned work.
enum TaskEvent {
    Attempt {
        job: JobId,
        result: Result<GeneratedClip, AttemptError>,
    },
    RetryDue {
        job: JobId,
    },
    Anchor {
        producer: JobId,
        clip_url: String,
        result: Result<DerivedAnchor, AnchorError>,
    },
}

enum Wake {
    Cancel,
    Joined(Option<Result<TaskEvent, JoinError>>),
}

struct BatchRun<'a> {
    orchestrator: &'a Orchestrator,
    config: BatchConfig,
    jobs: Vec<GenerationJob>,
    running: HashMap<ProviderId, usize>,
    running_total: usize,
    tasks: JoinSet<TaskEvent>,
    /// Retry timers and anchor derivations, keyed by the job they gate.
    gates: HashMap<JobId, AbortHandle>,
    transitions: mpsc::UnboundedSender<JobTransition>,
    /// Batch-level fields; `jobs` lives in the arena above.
    result: BatchResult,
    cancelling: bool,
}

impl<'a> BatchRun<'a> {
    fn new(
        orchestrator: &'a Orchestrator,
        plan: &BatchPlan,
        config: BatchConfig,
        transitions: mpsc::UnboundedSender<JobTransition>,
        result: BatchResult,
    ) -> Self {
        let mut jobs: Vec<GenerationJob> = Vec::with_capacity(plan.job_count());

        for (chain_index, chain) in plan.chains.iter().enumerate() {
            let mut previous: Option<JobId> = None;
            for &shot_id in chain.shot_ids() {
                let planned = plan.shots.get(&shot_id).zip(plan.analyses.get(&shot_id));
                let Some((shot, analysis)) = planned else {
                    tracing::warn!(shot_id, "Chained shot missing from plan, skipping");
                    previous = None;
                    continue;
                };
                let (Some(variation_id), Some(provider_id)) = (
                    shot.target_variation(),
                    analysis.recommended_provider_id.clone(),
                ) else {
                    tracing::warn!(shot_id, "Chained shot has no variation or provider, skipping");
                    previous = None;
                    continue;
                };

                let id = JobId(jobs.len());
                let mut job = GenerationJob::new(
                    id,
                    shot_id,
                    variation_id,
                    provider_id,
                    chain_index,
                    shot.position,
                    analysis.complexity_score,
                    generation_input(shot, analysis, plan.output),
                    analysis.estimated_cost_usd.unwrap_or(0.0),
                );
                job.predecessor = previous;
                if let Some(prev) = previous {
                    jobs[prev.0].successor = Some(id);
                }
                jobs.push(job);
                previous = Some(id);
            }
        }

        Self {
            orchestrator,
            config,
            jobs,
            running: HashMap::new(),
            running_total: 0,
            tasks: JoinSet::new(),
            gates: HashMap::new(),
            transitions,
            result,
            cancelling: false,
        }
    }

    async fn execute(&mut self, hooks: &RunHooks) {
        tracing::info!(
            jobs = self.jobs.len(),
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            unschedulable = self.result.unschedulable.len(),
            demoted = self.result.demoted.len(),
            "Batch started",
        );

        if hooks.cancel.is_cancelled() {
            self.cancel_all();
        }
        self.schedule();
        publish(hooks.status.as_ref(), &self.snapshot()).await;

        while !self.tasks.is_empty() {
            let wake = tokio::select! {
                _ = hooks.cancel.cancelled(), if !self.cancelling => Wake::Cancel,
                joined = self.tasks.join_next() => Wake::Joined(joined),
            };

            match wake {
                Wake::Cancel => self.cancel_all(),
                Wake::Joined(Some(Ok(event))) => self.handle(event),
                Wake::Joined(Some(Err(e))) if e.is_cancelled() => {}
                Wake::Joined(Some(Err(e))) => {
                    tracing::error!(error = %e, "Batch task panicked");
                }
                Wake::Joined(None) => break,
            }

            self.schedule();
            publish(hooks.status.as_ref(), &self.snapshot()).await;
        }

        self.finalize_stalled();
    }

    fn handle(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::Attempt { job, result } => self.on_attempt(job, result),
            TaskEvent::RetryDue { job } => self.on_retry_due(job),
            TaskEvent::Anchor {
                producer,
                clip_url,
                result,
            } => self.on_anchor(producer, clip_url, result),
        }
    }

    // ---- admission ----

    /// Queued, and either a chain head or holding its predecessor's anchor.
    fn is_ready(&self, job: &GenerationJob) -> bool {
        if job.state != JobState::Queued {
            return false;
        }
        match job.predecessor {
            None => true,
            Some(prev) => {
                self.jobs[prev.0].state == JobState::Succeeded && job.anchor_in.is_some()
            }
        }
    }

    /// Admit ready jobs while the global and per-provider ceilings allow.
    fn schedule(&mut self) {
        if self.cancelling {
            return;
        }

        let mut ready: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|j| self.is_ready(j))
            .map(|j| j.id)
            .collect();
        ready.sort_by(|a, b| admission_order(&self.jobs[a.0], &self.jobs[b.0]));

        let orchestrator = self.orchestrator;
        let providers = &orchestrator.providers;
        for id in ready {
            if self.running_total >= self.config.max_concurrent_jobs {
                break;
            }

            let provider_id = self.jobs[id.0].provider_id.clone();
            let (Some(capability), Some(adapter)) =
                (providers.capability(&provider_id), providers.get(&provider_id))
            else {
                self.jobs[id.0].set_failure(
                    FailureKind::UnschedulableShot,
                    format!("provider '{provider_id}' is not available"),
                );
                if self.set_state(id, JobState::Failed) {
                    self.block_downstream(id);
                }
                continue;
            };

            let in_flight = self.running.get(&provider_id).copied().unwrap_or(0);
            if in_flight >= capability.max_concurrent_jobs {
                continue;
            }
            let timeout = capability.timeout();

            if !self.set_state(id, JobState::Running) {
                continue;
            }
            *self.running.entry(provider_id.clone()).or_default() += 1;
            self.running_total += 1;

            let job = &self.jobs[id.0];
            tracing::debug!(
                job_id = %id,
                shot_id = job.shot_id,
                provider_id = %provider_id,
                retry_count = job.retry_count,
                "Job admitted",
            );

            let input = job.input.clone();
            let poll_interval = self.config.poll_interval();
            self.tasks.spawn(async move {
                let result =
                    run_to_completion(adapter.as_ref(), &input, timeout, poll_interval).await;
                TaskEvent::Attempt { job: id, result }
            });
        }
    }

    fn release_slot(&mut self, id: JobId) {
        let provider_id = &self.jobs[id.0].provider_id;
        if let Some(count) = self.running.get_mut(provider_id) {
            *count = count.saturating_sub(1);
        }
        self.running_total = self.running_total.saturating_sub(1);
    }

    // ---- events ----

    fn on_attempt(&mut self, id: JobId, result: Result<GeneratedClip, AttemptError>) {
        self.release_slot(id);

        if self.cancelling {
            let job = &mut self.jobs[id.0];
            job.cost_without_deliverable_usd += match &result {
                Ok(clip) => clip.cost_usd,
                Err(e) => e.reported_cost_usd,
            };
            job.set_failure(FailureKind::Cancelled, CANCELLED_REASON);
            self.set_state(id, JobState::Cancelled);
            return;
        }

        match result {
            Ok(clip) => {
                let job = &mut self.jobs[id.0];
                job.clip_url = Some(clip.clip_url.clone());
                job.cost_usd = clip.cost_usd;
                job.failure = None;
                job.reason = None;
                let successor = job.successor;
                tracing::info!(
                    job_id = %id,
                    shot_id = job.shot_id,
                    provider_id = %job.provider_id,
                    cost_usd = clip.cost_usd,
                    "Job succeeded",
                );

                if self.set_state(id, JobState::Succeeded) {
                    if let Some(next) = successor {
                        self.spawn_anchor(id, next, clip.clip_url);
                    }
                }
            }
            Err(e) => {
                let max_retries = self.config.max_retries;
                let job = &mut self.jobs[id.0];
                job.cost_without_deliverable_usd += e.reported_cost_usd;
                let retry_count = job.retry_count;

                if e.is_retryable() && retry_count < max_retries {
                    let delay = self.config.retry_backoff().delay_for_retry(retry_count + 1);
                    job.retry_pending = true;
                    job.set_failure(FailureKind::ProviderTransient, e.to_string());
                    tracing::warn!(
                        job_id = %id,
                        shot_id = job.shot_id,
                        provider_id = %job.provider_id,
                        retry = retry_count + 1,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Job attempt failed, retrying",
                    );
                    if self.set_state(id, JobState::Failed) {
                        self.spawn_retry_timer(id, delay);
                    }
                } else {
                    let reason = if e.is_retryable() {
                        format!("{e} (gave up after {retry_count} retries)")
                    } else {
                        e.to_string()
                    };
                    job.set_failure(e.error.failure_kind(), reason);
                    tracing::error!(
                        job_id = %id,
                        shot_id = job.shot_id,
                        provider_id = %job.provider_id,
                        error = %e,
                        "Job failed",
                    );
                    if self.set_state(id, JobState::Failed) {
                        self.block_downstream(id);
                    }
                }
            }
        }
    }

    fn on_retry_due(&mut self, id: JobId) {
        self.gates.remove(&id);
        let job = &mut self.jobs[id.0];
        if job.state != JobState::Failed || !job.retry_pending {
            return;
        }
        job.retry_count += 1;
        self.set_state(id, JobState::Queued);
    }

    fn on_anchor(&mut self, producer: JobId, clip_url: String, result: Result<DerivedAnchor, AnchorError>) {
        let Some(consumer) = self.jobs[producer.0].successor else {
            return;
        };
        self.gates.remove(&consumer);

        match result {
            Ok(derived) => {
                let anchor = ContinuityAnchor {
                    image_url: derived.image_url,
                    source_clip_url: clip_url,
                    producer,
                    consumer,
                    derived_at: Utc::now(),
                };
                self.jobs[producer.0].anchor_out = Some(anchor.clone());

                let job = &mut self.jobs[consumer.0];
                if job.state != JobState::Queued {
                    return;
                }
                tracing::info!(
                    producer = %producer,
                    consumer = %consumer,
                    shot_id = job.shot_id,
                    anchor_url = %anchor.image_url,
                    "Continuity anchor attached",
                );
                job.input = job.input.clone().with_anchor(&anchor.image_url);
                job.anchor_in = Some(anchor);
            }
            Err(e) => {
                let job = &mut self.jobs[consumer.0];
                if job.state != JobState::Queued {
                    return;
                }
                tracing::error!(
                    producer = %producer,
                    consumer = %consumer,
                    shot_id = job.shot_id,
                    clip_url = %clip_url,
                    error = %e,
                    "Anchor derivation failed",
                );
                job.set_failure(
                    FailureKind::AnchorDerivationFailed,
                    format!("{ANCHOR_DERIVATION_FAILED_REASON}: {e}"),
                );
                if self.set_state(consumer, JobState::Failed) {
                    self.block_downstream(consumer);
                }
            }
        }
    }

    // ---- spawned work ----

    fn spawn_retry_timer(&mut self, id: JobId, delay: Duration) {
        let handle = self.tasks.spawn(async move {
            tokio::time::sleep(delay).await;
            TaskEvent::RetryDue { job: id }
        });
        self.gates.insert(id, handle);
    }

    fn spawn_anchor(&mut self, producer: JobId, consumer: JobId, clip_url: String) {
        let deriver = self.orchestrator.deriver.clone();
        let attempts = self.config.anchor_max_attempts;
        let backoff = self.config.anchor_backoff();
        tracing::debug!(producer = %producer, consumer = %consumer, "Deriving continuity anchor");

        let handle = self.tasks.spawn(async move {
            let result = deriver.derive_with_retry(&clip_url, attempts, &backoff).await;
            TaskEvent::Anchor {
                producer,
                clip_url,
                result,
            }
        });
        self.gates.insert(consumer, handle);
    }

    // ---- failure propagation ----

    /// Fail every queued job after `id` in its chain.
    fn block_downstream(&mut self, id: JobId) {
        let mut next = self.jobs[id.0].successor;
        while let Some(n) = next {
            next = self.jobs[n.0].successor;
            if self.jobs[n.0].state != JobState::Queued {
                continue;
            }
            self.jobs[n.0].set_failure(FailureKind::BlockedByUpstream, BLOCKED_BY_UPSTREAM_REASON);
            tracing::info!(job_id = %n, upstream = %id, "Job blocked by upstream failure");
            self.set_state(n, JobState::Failed);
        }
    }

    fn cancel_all(&mut self) {
        tracing::info!(running = self.running_total, "Cancelling batch");
        self.cancelling = true;
        self.result.status = BatchStatus::Cancelling;

        for (_, gate) in self.gates.drain() {
            gate.abort();
        }

        for index in 0..self.jobs.len() {
            let job = &mut self.jobs[index];
            match job.state {
                JobState::Queued => {}
                JobState::Failed if job.retry_pending => job.retry_pending = false,
                _ => continue,
            }
            job.set_failure(FailureKind::Cancelled, CANCELLED_REASON);
            self.set_state(JobId(index), JobState::Cancelled);
        }
    }

    /// Settle jobs nothing can advance anymore (a panicked task).
    fn finalize_stalled(&mut self) {
        for index in 0..self.jobs.len() {
            if self.jobs[index].is_terminal() {
                continue;
            }
            let id = JobId(index);
            if self.jobs[index].state == JobState::Running {
                self.release_slot(id);
            }
            let job = &mut self.jobs[index];
            job.retry_pending = false;
            let to = if self.cancelling {
                job.set_failure(FailureKind::Cancelled, CANCELLED_REASON);
                JobState::Cancelled
            } else {
                job.set_failure(FailureKind::ChainIntegrity, STALLED_REASON);
                JobState::Failed
            };
            tracing::error!(job_id = %id, shot_id = job.shot_id, state = %job.state, "Job stalled");
            self.set_state(id, to);
        }
    }

    // ---- bookkeeping ----

    /// Apply a transition and queue it for the notifier.
    fn set_state(&mut self, id: JobId, to: JobState) -> bool {
        let job = &mut self.jobs[id.0];
        match job.transition(to) {
            Ok(from) => {
                let transition = JobTransition {
                    from,
                    job: job.clone(),
                    at: job.updated_at,
                };
                if self.transitions.send(transition).is_err() {
                    tracing::warn!(job_id = %id, "Transition notifier is gone");
                }
                true
            }
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Rejected job transition");
                false
            }
        }
    }

    fn remaining_secs(&self) -> f64 {
        let providers = &self.orchestrator.providers;
        let pending = self
            .jobs
            .iter()
            .filter(|j| !j.is_terminal())
            .map(|j| {
                providers
                    .capability(&j.provider_id)
                    .map_or(0.0, |c| c.avg_generation_secs)
            });
        remaining_wall_clock_secs(pending, self.config.max_concurrent_jobs)
    }

    fn snapshot(&self) -> BatchResult {
        let mut result = self.result.clone();
        result.jobs = self.jobs.clone();
        result.refresh_aggregates();
        result.estimated_remaining_secs = self.remaining_secs();
        result
    }

    fn finish(mut self) -> BatchResult {
        self.result.status = if self.cancelling {
            BatchStatus::Cancelled
        } else {
            BatchStatus::Completed
        };
        let mut result = self.snapshot();
        result.estimated_remaining_secs = 0.0;
        result.finished_at = Some(Utc::now());
        result
    }
}

/// Earlier episode position first, then lower complexity, then arena order.
///
/// Positions are compared across episodes without regard to the episode, so
/// a batch spanning several episodes advances them side by side: a ready
/// shot at position 0 of any episode goes ahead of one at position 1.
fn admission_order(a: &GenerationJob, b: &GenerationJob) -> Ordering {
    a.episode_position
        .cmp(&b.episode_position)
        .then_with(|| a.complexity_score.total_cmp(&b.complexity_score))
        .then_with(|| a.id.cmp(&b.id))
}
