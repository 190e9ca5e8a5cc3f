//! Repository for the `shot_variations` table.

use sqlx::PgPool;
use shotline_core::types::DbId;

use crate::models::variation::{VariationRow, VariationUpdate};

/// Column list for `shot_variations` queries.
const COLUMNS: &str = "\
    id, shot_id, label, generation_status_id, provider_id, retry_count, \
    clip_url, anchor_image_url, cost_usd, cost_without_deliverable_usd, \
    error_kind, error_message, created_at, updated_at";

/// Provides variation lookups and the generation write-through.
pub struct VariationRepo;

impl VariationRepo {
    /// Variations of the given shots, ordered by shot then id.
    pub async fn list_by_shots(
        pool: &PgPool,
        shot_ids: &[DbId],
    ) -> Result<Vec<VariationRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM shot_variations \
             WHERE shot_id = ANY($1) \
             ORDER BY shot_id ASC, id ASC"
        );
        sqlx::query_as::<_, VariationRow>(&query)
            .bind(shot_ids)
            .fetch_all(pool)
            .await
    }

    /// Write the generation columns of one variation.
    ///
    /// Returns `false` when no variation with that id belongs to the shot.
    pub async fn update_generation(
        pool: &PgPool,
        shot_id: DbId,
        variation_id: DbId,
        update: &VariationUpdate,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE shot_variations \
             SET generation_status_id = $3, provider_id = $4, retry_count = $5, \
                 clip_url = COALESCE($6, clip_url), \
                 anchor_image_url = COALESCE($7, anchor_image_url), \
                 cost_usd = $8, cost_without_deliverable_usd = $9, \
                 error_kind = $10, error_message = $11, updated_at = NOW() \
             WHERE id = $1 AND shot_id = $2",
        )
        .bind(variation_id)
        .bind(shot_id)
        .bind(update.status_id)
        .bind(&update.provider_id)
        .bind(update.retry_count)
        .bind(&update.clip_url)
        .bind(&update.anchor_image_url)
        .bind(update.cost_usd)
        .bind(update.cost_without_deliverable_usd)
        .bind(&update.error_kind)
        .bind(&update.error_message)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
