//! Repository for the `shots` table.

use sqlx::PgPool;
use shotline_core::types::DbId;

use crate::models::shot::ShotRow;

/// Column list for `shots` queries.
const COLUMNS: &str = "\
    id, episode_id, position, scene_type, description, continues_previous, \
    end_state_hint, target_duration_secs, seed_image_url, completed, \
    created_at, updated_at";

/// Read access to episode shots plus the completion flag.
pub struct ShotRepo;

impl ShotRepo {
    /// All shots of an episode in episode order.
    pub async fn list_by_episode(
        pool: &PgPool,
        episode_id: DbId,
    ) -> Result<Vec<ShotRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM shots \
             WHERE episode_id = $1 \
             ORDER BY position ASC"
        );
        sqlx::query_as::<_, ShotRow>(&query)
            .bind(episode_id)
            .fetch_all(pool)
            .await
    }

    /// Shots with the given ids, ordered by episode then position.
    ///
    /// Unknown ids are silently skipped.
    pub async fn find_by_ids(pool: &PgPool, ids: &[DbId]) -> Result<Vec<ShotRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM shots \
             WHERE id = ANY($1) \
             ORDER BY episode_id ASC, position ASC"
        );
        sqlx::query_as::<_, ShotRow>(&query)
            .bind(ids)
            .fetch_all(pool)
            .await
    }

    /// Flag a shot as having a finished clip.
    pub async fn mark_completed(pool: &PgPool, shot_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE shots SET completed = true, updated_at = NOW() WHERE id = $1",
        )
        .bind(shot_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
