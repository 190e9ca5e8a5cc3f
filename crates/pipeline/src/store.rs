//! Durable episode store seam.
//!
//! The orchestrator writes every job transition through [`ShotStore`] and
//! never reads it back mid-run.

use std::collections::HashMap;

use async_trait::async_trait;
use shotline_core::shot::{Shot, Variation};
use shotline_core::types::{DbId, ShotId, VariationId};
use shotline_db::models::variation::VariationUpdate;
use shotline_db::repositories::{ShotRepo, VariationRepo};
use shotline_db::DbPool;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: DbId },
}

/// Read shots, write variation generation state.
#[async_trait]
pub trait ShotStore: Send + Sync {
    /// Every shot of an episode, in episode order, with variations.
    async fn list_episode_shots(&self, episode_id: DbId) -> Result<Vec<Shot>, StoreError>;

    /// The given shots ordered by episode and position. Unknown ids are
    /// skipped.
    async fn find_shots(&self, shot_ids: &[ShotId]) -> Result<Vec<Shot>, StoreError>;

    /// Write-through for one job transition.
    async fn update_variation(
        &self,
        shot_id: ShotId,
        variation_id: VariationId,
        update: &VariationUpdate,
    ) -> Result<(), StoreError>;
}

/// [`ShotStore`] over the Postgres repositories.
#[derive(Clone)]
pub struct PgShotStore {
    pool: DbPool,
}

impl PgShotStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn attach_variations(
        &self,
        rows: Vec<shotline_db::models::shot::ShotRow>,
    ) -> Result<Vec<Shot>, StoreError> {
        let ids: Vec<DbId> = rows.iter().map(|r| r.id).collect();
        let mut by_shot: HashMap<DbId, Vec<Variation>> = HashMap::new();
        for row in VariationRepo::list_by_shots(&self.pool, &ids).await? {
            by_shot
                .entry(row.shot_id)
                .or_default()
                .push(row.into_variation());
        }
        Ok(rows
            .into_iter()
            .map(|row| {
                let variations = by_shot.remove(&row.id).unwrap_or_default();
                row.into_shot(variations)
            })
            .collect())
    }
}

#[async_trait]
impl ShotStore for PgShotStore {
    async fn list_episode_shots(&self, episode_id: DbId) -> Result<Vec<Shot>, StoreError> {
        let rows = ShotRepo::list_by_episode(&self.pool, episode_id).await?;
        self.attach_variations(rows).await
    }

    async fn find_shots(&self, shot_ids: &[ShotId]) -> Result<Vec<Shot>, StoreError> {
        let rows = ShotRepo::find_by_ids(&self.pool, shot_ids).await?;
        self.attach_variations(rows).await
    }

    async fn update_variation(
        &self,
        shot_id: ShotId,
        variation_id: VariationId,
        update: &VariationUpdate,
    ) -> Result<(), StoreError> {
        let updated =
            VariationRepo::update_generation(&self.pool, shot_id, variation_id, update).await?;
        if !updated {
            return Err(StoreError::NotFound {
                entity: "shot_variation",
                id: variation_id,
            });
        }
        if update.is_success() {
            ShotRepo::mark_completed(&self.pool, shot_id).await?;
        }
        Ok(())
    }
}
