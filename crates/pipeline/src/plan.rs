//! Turn batch shots into analyses, chains and provider inputs.

use std::collections::{HashMap, HashSet};

use shotline_core::analysis::{analyze, misses_pending_predecessor, FrameStrategy, ShotAnalysis};
use shotline_core::batch::UnschedulableShot;
use shotline_core::capability::{CapabilityRegistry, OutputSpec};
use shotline_core::chain::{build_chains, ChainDiagnostic, ReferenceChain};
use shotline_core::job::GenerationInput;
use shotline_core::shot::{EpisodeContext, Shot};
use shotline_core::types::ShotId;

/// Reason recorded for a shot that has nowhere to store its clip.
pub const NO_VARIATION_REASON: &str = "shot has no variation to generate";

/// Everything the orchestrator needs to run one batch.
#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    pub chains: Vec<ReferenceChain>,
    pub shots: HashMap<ShotId, Shot>,
    pub analyses: HashMap<ShotId, ShotAnalysis>,
    pub unschedulable: Vec<UnschedulableShot>,
    /// Shots whose continuity request was dropped for this run.
    pub demoted: Vec<ShotId>,
    pub diagnostics: Vec<ChainDiagnostic>,
    /// Resolution and frame rate the shots were analyzed for.
    pub output: OutputSpec,
}

impl BatchPlan {
    /// Analyze `shots` (episode order) against `registry` and group them
    /// into chains.
    pub fn build(shots: &[Shot], ctx: &EpisodeContext, registry: &CapabilityRegistry) -> Self {
        let mut plan = Self {
            output: ctx.output,
            ..Self::default()
        };

        let mut candidates = Vec::with_capacity(shots.len());
        for shot in shots {
            if shot.target_variation().is_none() {
                tracing::warn!(shot_id = shot.id, "Shot has no variation, skipping");
                plan.push_unschedulable(shot.id, NO_VARIATION_REASON.to_string());
                continue;
            }
            candidates.push(shot.clone());
        }

        for shot in &candidates {
            plan.analyses
                .entry(shot.id)
                .or_insert_with(|| analyze(shot, ctx, registry));
        }

        // Shots whose pending predecessor was left out of the batch never
        // asked for an anchor; they still count as demoted.
        let mut demoted: HashSet<ShotId> = HashSet::new();
        for shot in &candidates {
            let schedulable = plan.analyses.get(&shot.id).is_some_and(ShotAnalysis::is_schedulable);
            if schedulable && misses_pending_predecessor(shot, ctx) && demoted.insert(shot.id) {
                tracing::debug!(
                    shot_id = shot.id,
                    "Predecessor not in batch, starting an independent chain",
                );
                plan.diagnostics
                    .push(ChainDiagnostic::DemotedMissingPredecessor { shot_id: shot.id });
            }
        }

        let build = build_chains(&candidates, &plan.analyses);
        for diagnostic in &build.diagnostics {
            if let ChainDiagnostic::Unschedulable { shot_id, reason } = diagnostic {
                plan.push_unschedulable(*shot_id, reason.clone());
            }
        }
        demoted.extend(build.demoted);
        plan.chains = build.chains;
        plan.diagnostics.extend(build.diagnostics);

        // Report in episode order; a demoted shot's analysis runs standalone.
        for shot in &candidates {
            if demoted.remove(&shot.id) {
                plan.demoted.push(shot.id);
                if let Some(analysis) = plan.analyses.get(&shot.id) {
                    let standalone = ShotAnalysis {
                        needs_predecessor_anchor: false,
                        ..analysis.clone()
                    };
                    plan.analyses.insert(shot.id, standalone);
                }
            }
        }
        plan.shots = candidates.into_iter().map(|s| (s.id, s)).collect();
        plan
    }

    /// Record a shot that will not be generated.
    pub fn push_unschedulable(&mut self, shot_id: ShotId, reason: String) {
        if !self.unschedulable.iter().any(|u| u.shot_id == shot_id) {
            self.unschedulable.push(UnschedulableShot { shot_id, reason });
        }
    }

    /// Number of jobs the plan will create.
    pub fn job_count(&self) -> usize {
        self.chains.iter().map(ReferenceChain::len).sum()
    }

    /// Sum of per-shot cost estimates over the chained shots.
    pub fn estimated_cost_usd(&self) -> f64 {
        self.chains
            .iter()
            .flat_map(|c| c.shot_ids())
            .filter_map(|id| self.analyses.get(id))
            .filter_map(|a| a.estimated_cost_usd)
            .sum()
    }
}

/// Provider request for a planned shot.
pub fn generation_input(shot: &Shot, analysis: &ShotAnalysis, output: OutputSpec) -> GenerationInput {
    let description = shot.description.trim();
    let prompt = if description.is_empty() {
        shot.scene_type.clone()
    } else {
        description.to_string()
    };
    let end_state_hint = match analysis.frame_strategy {
        FrameStrategy::FirstLastInterpolated => shot
            .end_state_hint
            .clone()
            .filter(|h| !h.trim().is_empty())
            .or_else(|| Some(prompt.clone())),
        FrameStrategy::SingleAnchor => None,
    };
    GenerationInput {
        prompt,
        duration_secs: analysis.recommended_duration_secs,
        output,
        frame_strategy: analysis.frame_strategy,
        start_image_url: shot.seed_image_url.clone(),
        continuity_anchor_url: None,
        end_state_hint,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
