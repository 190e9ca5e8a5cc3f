//! Shot metadata consumed by the analyzer and chain builder.
//!
//! Shots are owned by the durable episode store; this crate only sees the
//! read-side projection needed to plan generation.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::capability::OutputSpec;
use crate::types::{DbId, ShotId, VariationId};

/// One concrete rendering slot of a shot (e.g. a camera angle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    pub id: VariationId,
    pub label: String,
    /// Whether a finished clip is already attached to this variation.
    pub has_clip: bool,
}

/// Read-side projection of an episode shot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    pub id: ShotId,
    pub episode_id: DbId,
    /// Zero-based order of the shot within its episode.
    pub position: u32,
    /// Scene-type tag, e.g. `"dialogue"` or `"action"`.
    pub scene_type: String,
    /// Free-text description including motion hints.
    pub description: String,
    /// Explicit continuity flag. `None` means "infer from scene type".
    pub continues_previous: Option<bool>,
    /// Explicit end-state hint (final pose, resting position).
    pub end_state_hint: Option<String>,
    /// Duration the editor asked for. Treated as a hard requirement.
    pub target_duration_secs: Option<f64>,
    /// Reference image used when the shot does not inherit an anchor.
    pub seed_image_url: Option<String>,
    /// Whether the shot already has a finished clip from an earlier run.
    pub completed: bool,
    pub variations: Vec<Variation>,
}

impl Shot {
    /// The variation a batch generates for this shot: the first one without
    /// a clip, falling back to the first variation.
    pub fn target_variation(&self) -> Option<VariationId> {
        self.variations
            .iter()
            .find(|v| !v.has_clip)
            .or_else(|| self.variations.first())
            .map(|v| v.id)
    }

    /// Whether `self` sits directly before `next` in the same episode.
    pub fn immediately_precedes(&self, next: &Shot) -> bool {
        self.episode_id == next.episode_id && self.position.checked_add(1) == Some(next.position)
    }
}

/// What the analyzer needs to know about the shot right before another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predecessor {
    pub shot_id: ShotId,
    pub scene_type: String,
    pub completed: bool,
}

/// Episode-level inputs to shot analysis.
#[derive(Debug, Clone, Default)]
pub struct EpisodeContext {
    pub output: OutputSpec,
    predecessors: HashMap<ShotId, Predecessor>,
    batch: HashSet<ShotId>,
}

impl EpisodeContext {
    /// Build a context from the episode's full shot list and the ids the
    /// current batch will generate.
    pub fn new(
        episode_shots: &[Shot],
        batch: impl IntoIterator<Item = ShotId>,
        output: OutputSpec,
    ) -> Self {
        let mut ordered: Vec<&Shot> = episode_shots.iter().collect();
        ordered.sort_by_key(|s| (s.episode_id, s.position));

        let predecessors = ordered
            .windows(2)
            .filter(|pair| pair[0].immediately_precedes(pair[1]))
            .map(|pair| {
                (
                    pair[1].id,
                    Predecessor {
                        shot_id: pair[0].id,
                        scene_type: pair[0].scene_type.clone(),
                        completed: pair[0].completed,
                    },
                )
            })
            .collect();

        Self {
            output,
            predecessors,
            batch: batch.into_iter().collect(),
        }
    }

    /// Context for generating every shot of the episode that has no clip yet.
    pub fn for_pending_shots(episode_shots: &[Shot], output: OutputSpec) -> Self {
        let pending = episode_shots.iter().filter(|s| !s.completed).map(|s| s.id);
        Self::new(episode_shots, pending, output)
    }

    pub fn predecessor(&self, shot_id: ShotId) -> Option<&Predecessor> {
        self.predecessors.get(&shot_id)
    }

    pub fn in_batch(&self, shot_id: ShotId) -> bool {
        self.batch.contains(&shot_id)
    }
}
