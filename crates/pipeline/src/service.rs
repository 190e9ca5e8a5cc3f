//! Batch registry: start orchestrations in the background, report their
//! status, cancel them.
//!
//! [`BatchService`] is created once and shared behind an `Arc`. Every batch
//! gets a [`BatchHandle`]; status snapshots are kept until the caller
//! forgets a finished batch.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use shotline_core::batch::{BatchConfig, BatchResult};
use shotline_core::capability::OutputSpec;
use shotline_core::error::CoreError;
use shotline_core::shot::EpisodeContext;
use shotline_core::types::{DbId, ShotId};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::orchestrator::{Orchestrator, RunHooks};
use crate::plan::BatchPlan;
use crate::store::{ShotStore, StoreError};

/// Reason recorded for requested shots the store does not know.
pub const SHOT_NOT_FOUND_REASON: &str = "shot not found";

/// Opaque identifier of a submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchHandle(pub Uuid);

impl BatchHandle {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for BatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid batch configuration: {0}")]
    InvalidConfig(#[from] CoreError),

    #[error("batch {0} not found")]
    NotFound(BatchHandle),

    #[error("batch {0} is still running")]
    StillRunning(BatchHandle),
}

/// Bookkeeping for one submitted batch.
struct ManagedBatch {
    status: Arc<RwLock<BatchResult>>,
    /// Child of the service's master token.
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

pub struct BatchService {
    store: Arc<dyn ShotStore>,
    orchestrator: Arc<Orchestrator>,
    batches: RwLock<HashMap<BatchHandle, ManagedBatch>>,
    /// Master cancellation token, cancelled on shutdown.
    cancel: CancellationToken,
}

impl BatchService {
    pub fn new(store: Arc<dyn ShotStore>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            store,
            orchestrator,
            batches: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Plan every shot of the episode that has no clip yet.
    ///
    /// Nothing is generated; the plan can be inspected or handed to
    /// [`start_plan`](Self::start_plan).
    pub async fn analyze_episode(
        &self,
        episode_id: DbId,
        output: OutputSpec,
    ) -> Result<BatchPlan, BatchError> {
        let shots = self.store.list_episode_shots(episode_id).await?;
        let ctx = EpisodeContext::for_pending_shots(&shots, output);
        let pending: Vec<_> = shots.iter().filter(|s| !s.completed).cloned().collect();
        let registry = self.orchestrator.providers().schedulable_registry();
        let plan = BatchPlan::build(&pending, &ctx, &registry);

        tracing::info!(
            episode_id,
            shots = shots.len(),
            pending = pending.len(),
            chains = plan.chains.len(),
            unschedulable = plan.unschedulable.len(),
            estimated_cost_usd = plan.estimated_cost_usd(),
            "Episode analyzed",
        );
        Ok(plan)
    }

    /// Plan and start generation for `shot_ids`.
    ///
    /// Unknown ids are reported as unschedulable in the batch status. Only
    /// an invalid `config` fails the call.
    pub async fn run_batch(
        &self,
        shot_ids: &[ShotId],
        config: BatchConfig,
    ) -> Result<BatchHandle, BatchError> {
        config.validate()?;

        let mut requested: Vec<ShotId> = Vec::with_capacity(shot_ids.len());
        for &id in shot_ids {
            if requested.contains(&id) {
                tracing::warn!(shot_id = id, "Duplicate shot id in batch request, keeping first");
                continue;
            }
            requested.push(id);
        }

        let found = self.store.find_shots(&requested).await?;

        let mut episode_ids: Vec<DbId> = found.iter().map(|s| s.episode_id).collect();
        episode_ids.sort_unstable();
        episode_ids.dedup();
        let mut episode_shots = Vec::new();
        for episode_id in episode_ids {
            episode_shots.extend(self.store.list_episode_shots(episode_id).await?);
        }

        let ctx = EpisodeContext::new(&episode_shots, found.iter().map(|s| s.id), config.output);
        let registry = self.orchestrator.providers().schedulable_registry();
        let mut plan = BatchPlan::build(&found, &ctx, &registry);
        for id in requested {
            if !found.iter().any(|s| s.id == id) {
                tracing::warn!(shot_id = id, "Requested shot not found");
                plan.push_unschedulable(id, SHOT_NOT_FOUND_REASON.to_string());
            }
        }

        Ok(self.start_plan(plan, config).await)
    }

    /// Start an already built plan in the background.
    pub async fn start_plan(&self, plan: BatchPlan, config: BatchConfig) -> BatchHandle {
        let handle = BatchHandle::new();

        let mut initial = BatchResult::new(Utc::now());
        initial.unschedulable = plan.unschedulable.clone();
        initial.demoted = plan.demoted.clone();
        let status = Arc::new(RwLock::new(initial));

        let cancel = self.cancel.child_token();
        let (done_tx, done_rx) = watch::channel(false);

        self.batches.write().await.insert(
            handle,
            ManagedBatch {
                status: Arc::clone(&status),
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        let hooks = RunHooks {
            progress: None,
            cancel,
            status: Some(status),
        };
        let orchestrator = Arc::clone(&self.orchestrator);
        let jobs = plan.job_count();
        tokio::spawn(async move {
            orchestrator.run_with(plan, config, hooks).await;
            let _ = done_tx.send(true);
        });

        tracing::info!(batch = %handle, jobs, "Batch submitted");
        handle
    }

    /// Latest snapshot. Repeated calls without intervening progress return
    /// equal results.
    pub async fn get_batch_status(&self, handle: BatchHandle) -> Result<BatchResult, BatchError> {
        let status = self.status_cell(handle).await?;
        let snapshot = status.read().await.clone();
        Ok(snapshot)
    }

    /// Request cooperative cancellation. Cancelling a finished batch is a
    /// no-op.
    pub async fn cancel_batch(&self, handle: BatchHandle) -> Result<(), BatchError> {
        let batches = self.batches.read().await;
        let batch = batches.get(&handle).ok_or(BatchError::NotFound(handle))?;
        if !batch.cancel.is_cancelled() {
            tracing::info!(batch = %handle, "Batch cancellation requested");
            batch.cancel.cancel();
        }
        Ok(())
    }

    /// Wait until the batch finishes and return its final status.
    pub async fn wait_batch(&self, handle: BatchHandle) -> Result<BatchResult, BatchError> {
        let mut done = {
            let batches = self.batches.read().await;
            batches
                .get(&handle)
                .ok_or(BatchError::NotFound(handle))?
                .done
                .clone()
        };
        // A dropped sender means the run task is gone; the snapshot is final.
        let _ = done.wait_for(|finished| *finished).await;
        self.get_batch_status(handle).await
    }

    /// Drop a finished batch from the registry, returning its final status.
    pub async fn forget_batch(&self, handle: BatchHandle) -> Result<BatchResult, BatchError> {
        let mut batches = self.batches.write().await;
        let batch = batches.get(&handle).ok_or(BatchError::NotFound(handle))?;
        let snapshot = batch.status.read().await.clone();
        if !snapshot.is_finished() {
            return Err(BatchError::StillRunning(handle));
        }
        batches.remove(&handle);
        Ok(snapshot)
    }

    /// Handles of every batch still in the registry.
    pub async fn batches(&self) -> Vec<BatchHandle> {
        self.batches.read().await.keys().copied().collect()
    }

    /// Cancel every batch.
    pub fn shutdown(&self) {
        tracing::info!("Cancelling all batches");
        self.cancel.cancel();
    }

    async fn status_cell(&self, handle: BatchHandle) -> Result<Arc<RwLock<BatchResult>>, BatchError> {
        self.batches
            .read()
            .await
            .get(&handle)
            .map(|b| Arc::clone(&b.status))
            .ok_or(BatchError::NotFound(handle))
    }
}
