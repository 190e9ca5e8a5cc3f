//! Shot entity model.

use serde::Serialize;
use shotline_core::shot::{Shot, Variation};
use shotline_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A row from the `shots` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ShotRow {
    pub id: DbId,
    pub episode_id: DbId,
    pub position: i32,
    pub scene_type: String,
    pub description: String,
    pub continues_previous: Option<bool>,
    pub end_state_hint: Option<String>,
    pub target_duration_secs: Option<f64>,
    pub seed_image_url: Option<String>,
    pub completed: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ShotRow {
    /// Build the domain shot with its variations attached.
    ///
    /// Negative positions cannot come out of the schema (`CHECK`), but are
    /// clamped to zero rather than wrapped.
    pub fn into_shot(self, variations: Vec<Variation>) -> Shot {
        Shot {
            id: self.id,
            episode_id: self.episode_id,
            position: u32::try_from(self.position).unwrap_or(0),
            scene_type: self.scene_type,
            description: self.description,
            continues_previous: self.continues_previous,
            end_state_hint: self.end_state_hint,
            target_duration_secs: self.target_duration_secs,
            seed_image_url: self.seed_image_url,
            completed: self.completed,
            variations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_shot_keeps_fields() {
        let now = chrono::Utc::now();
        let row = ShotRow {
            id: 4,
            episode_id: 2,
            position: 3,
            scene_type: "chase".to_string(),
            description: "runs".to_string(),
            continues_previous: Some(true),
            end_state_hint: None,
            target_duration_secs: Some(5.0),
            seed_image_url: None,
            completed: false,
            created_at: now,
            updated_at: now,
        };
        let shot = row.into_shot(vec![]);
        assert_eq!(shot.id, 4);
        assert_eq!(shot.position, 3);
        assert_eq!(shot.continues_previous, Some(true));
        assert_eq!(shot.target_duration_secs, Some(5.0));
    }
}
