//! Shot variation entity model and the generation write-through DTO.

use serde::{Deserialize, Serialize};
use shotline_core::job::GenerationJob;
use shotline_core::shot::Variation;
use shotline_core::types::{DbId, Timestamp};
use sqlx::FromRow;

use super::status::{GenerationStatus, StatusId};

/// A row from the `shot_variations` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct VariationRow {
    pub id: DbId,
    pub shot_id: DbId,
    pub label: String,
    pub generation_status_id: Option<StatusId>,
    pub provider_id: Option<String>,
    pub retry_count: i32,
    pub clip_url: Option<String>,
    pub anchor_image_url: Option<String>,
    pub cost_usd: f64,
    pub cost_without_deliverable_usd: f64,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl VariationRow {
    pub fn into_variation(self) -> Variation {
        Variation {
            id: self.id,
            label: self.label,
            has_clip: self.clip_url.is_some(),
        }
    }
}

/// Generation fields written on every job transition.
///
/// `anchor_image_url` is the continuity anchor the job started from.
///
/// `clip_url` and `anchor_image_url` are only overwritten when `Some`, so a
/// later failed attempt never erases an earlier clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationUpdate {
    pub status_id: StatusId,
    pub provider_id: String,
    pub retry_count: i32,
    pub clip_url: Option<String>,
    pub anchor_image_url: Option<String>,
    pub cost_usd: f64,
    pub cost_without_deliverable_usd: f64,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
}

impl VariationUpdate {
    /// Project a job snapshot onto the variation columns.
    pub fn from_job(job: &GenerationJob) -> Self {
        Self {
            status_id: GenerationStatus::from(job.state).id(),
            provider_id: job.provider_id.clone(),
            retry_count: i32::try_from(job.retry_count).unwrap_or(i32::MAX),
            clip_url: job.clip_url.clone(),
            anchor_image_url: job.anchor_in.as_ref().map(|a| a.image_url.clone()),
            cost_usd: job.cost_usd,
            cost_without_deliverable_usd: job.cost_without_deliverable_usd,
            error_kind: job.failure.map(|k| k.as_str().to_string()),
            error_message: job.reason.clone(),
        }
    }

    /// Whether this update delivers a finished clip.
    pub fn is_success(&self) -> bool {
        self.status_id == GenerationStatus::Succeeded.id() && self.clip_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use shotline_core::analysis::FrameStrategy;
    use shotline_core::capability::OutputSpec;
    use shotline_core::job::{FailureKind, GenerationInput, JobId, JobState};

    use super::*;

    fn job() -> GenerationJob {
        GenerationJob::new(
            JobId(0),
            1,
            11,
            "runway".to_string(),
            0,
            0,
            0.4,
            GenerationInput {
                prompt: "walk".to_string(),
                duration_secs: 4.0,
                output: OutputSpec::default(),
                frame_strategy: FrameStrategy::SingleAnchor,
                start_image_url: None,
                continuity_anchor_url: None,
                end_state_hint: None,
            },
            0.2,
        )
    }

    #[test]
    fn failed_job_projects_error_columns() {
        let mut j = job();
        j.transition(JobState::Failed).unwrap();
        j.set_failure(FailureKind::BlockedByUpstream, "blocked by upstream failure");
        let update = VariationUpdate::from_job(&j);
        assert_eq!(update.status_id, GenerationStatus::Failed.id());
        assert_eq!(update.error_kind.as_deref(), Some("blocked_by_upstream"));
        assert!(!update.is_success());
    }

    #[test]
    fn succeeded_job_is_success() {
        let mut j = job();
        j.transition(JobState::Running).unwrap();
        j.transition(JobState::Succeeded).unwrap();
        j.clip_url = Some("https://clips/1.mp4".to_string());
        j.cost_usd = 0.5;
        let update = VariationUpdate::from_job(&j);
        assert!(update.is_success());
        assert_eq!(update.provider_id, "runway");
        assert_eq!(update.cost_usd, 0.5);
    }
}
