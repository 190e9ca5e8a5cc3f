//! Continuity-chain construction.
//!
//! A [`ReferenceChain`] is a maximal run of shots that must be generated in
//! order because each one starts from the previous clip's final frame. The
//! builder re-validates every link against the filtered shot list it is
//! given: "predecessor" means the entry immediately before in that list
//! *and* the shot immediately before in the episode. Anything else starts a
//! new chain.
//!
//! Malformed input (duplicate ids, dangling continuity requests, missing
//! analyses) is repaired and reported as a [`ChainDiagnostic`]; it never
//! fails the batch.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::analysis::ShotAnalysis;
use crate::shot::Shot;
use crate::types::ShotId;

/// Why a chain exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainType {
    /// Two or more shots linked by continuity anchors.
    VisualContinuity,
    /// A single shot with no continuity dependency.
    Independent,
}

/// Ordered, non-empty list of shots generated strictly in sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceChain {
    shot_ids: Vec<ShotId>,
    pub chain_type: ChainType,
}

impl ReferenceChain {
    /// Start a chain at `head`.
    pub fn new(head: ShotId) -> Self {
        Self {
            shot_ids: vec![head],
            chain_type: ChainType::Independent,
        }
    }

    fn push(&mut self, shot_id: ShotId) {
        self.shot_ids.push(shot_id);
        self.chain_type = ChainType::VisualContinuity;
    }

    pub fn shot_ids(&self) -> &[ShotId] {
        &self.shot_ids
    }

    pub fn len(&self) -> usize {
        self.shot_ids.len()
    }

    /// Always `false`; a chain holds at least its head.
    pub fn is_empty(&self) -> bool {
        self.shot_ids.is_empty()
    }

    pub fn contains(&self, shot_id: ShotId) -> bool {
        self.shot_ids.contains(&shot_id)
    }
}

/// Repairs the builder applied to malformed input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainDiagnostic {
    /// A shot id appeared more than once; the first occurrence was kept.
    DuplicateShot { shot_id: ShotId },
    /// No analysis was supplied for the shot; it was left out.
    MissingAnalysis { shot_id: ShotId },
    /// The analysis found no provider; the shot was left out.
    Unschedulable { shot_id: ShotId, reason: String },
    /// The shot asked for an anchor but its predecessor is not in the batch;
    /// it starts its own chain.
    DemotedMissingPredecessor { shot_id: ShotId },
}

/// Output of [`build_chains`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainBuild {
    pub chains: Vec<ReferenceChain>,
    /// Shots whose continuity request was dropped for this run.
    pub demoted: Vec<ShotId>,
    /// Shots left out of every chain.
    pub excluded: Vec<ShotId>,
    pub diagnostics: Vec<ChainDiagnostic>,
}

impl ChainBuild {
    /// Number of shots across all chains.
    pub fn shot_count(&self) -> usize {
        self.chains.iter().map(ReferenceChain::len).sum()
    }

    /// Index of the chain holding `shot_id`.
    pub fn chain_of(&self, shot_id: ShotId) -> Option<usize> {
        self.chains.iter().position(|c| c.contains(shot_id))
    }
}

/// Group `shots` (in episode order) into reference chains.
pub fn build_chains(shots: &[Shot], analyses: &HashMap<ShotId, ShotAnalysis>) -> ChainBuild {
    let mut build = ChainBuild::default();
    // Deduplication is what keeps every chain acyclic: a shot can be linked
    // at most once.
    let mut seen: HashSet<ShotId> = HashSet::with_capacity(shots.len());
    let mut current: Option<ReferenceChain> = None;
    let mut previous: Option<&Shot> = None;

    for shot in shots {
        if !seen.insert(shot.id) {
            tracing::warn!(shot_id = shot.id, "Duplicate shot in batch, keeping first occurrence");
            build
                .diagnostics
                .push(ChainDiagnostic::DuplicateShot { shot_id: shot.id });
            continue;
        }

        let Some(analysis) = analyses.get(&shot.id) else {
            tracing::warn!(shot_id = shot.id, "No analysis for shot, excluding from batch");
            build
                .diagnostics
                .push(ChainDiagnostic::MissingAnalysis { shot_id: shot.id });
            build.excluded.push(shot.id);
            continue;
        };

        if !analysis.is_schedulable() {
            let reason = analysis
                .unschedulable_reason
                .clone()
                .unwrap_or_else(|| "no capable provider".to_string());
            tracing::info!(shot_id = shot.id, reason = %reason, "Shot is unschedulable");
            build.diagnostics.push(ChainDiagnostic::Unschedulable {
                shot_id: shot.id,
                reason,
            });
            build.excluded.push(shot.id);
            continue;
        }

        let links = analysis.needs_predecessor_anchor
            && previous.is_some_and(|prev| prev.immediately_precedes(shot));

        if analysis.needs_predecessor_anchor && !links {
            tracing::debug!(
                shot_id = shot.id,
                "Predecessor not in batch, starting an independent chain",
            );
            build.demoted.push(shot.id);
            build
                .diagnostics
                .push(ChainDiagnostic::DemotedMissingPredecessor { shot_id: shot.id });
        }

        if links {
            if let Some(chain) = current.as_mut() {
                chain.push(shot.id);
            }
        } else if let Some(done) = current.replace(ReferenceChain::new(shot.id)) {
            build.chains.push(done);
        }
        previous = Some(shot);
    }

    if let Some(done) = current {
        build.chains.push(done);
    }
    build
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
