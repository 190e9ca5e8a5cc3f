//! Per-shot generation strategy analysis.
//!
//! [`analyze`] is a pure function of the shot, its episode context, and the
//! capability registry. It classifies motion complexity, picks a clip
//! duration every chosen provider can render, decides whether the shot must
//! wait for its predecessor's continuity anchor, chooses a frame strategy,
//! and recommends the cheapest capable provider.
//!
//! A shot no provider can serve still yields a [`ShotAnalysis`], with
//! `recommended_provider_id = None` and a reason. Callers must treat that
//! case as "unschedulable" and leave the shot out of the batch.

use std::cmp::Ordering;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityRegistry, OutputSpec, ProviderCapability};
use crate::shot::{EpisodeContext, Shot};
use crate::types::{ProviderId, ShotId};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Clip length for low-motion shots.
pub const DURATION_LOW_SECS: f64 = 4.0;
/// Clip length for medium-motion shots.
pub const DURATION_MEDIUM_SECS: f64 = 6.0;
/// Clip length for high-motion shots.
pub const DURATION_HIGH_SECS: f64 = 8.0;

/// Scores below this are low complexity.
pub const COMPLEXITY_MEDIUM_THRESHOLD: f64 = 0.35;
/// Scores at or above this are high complexity.
pub const COMPLEXITY_HIGH_THRESHOLD: f64 = 0.65;

const BASE_SCORE_HIGH_MOTION_SCENE: f64 = 0.7;
const BASE_SCORE_LOW_MOTION_SCENE: f64 = 0.15;
const BASE_SCORE_DEFAULT: f64 = 0.4;

const HIGH_KEYWORD_WEIGHT: f64 = 0.15;
const HIGH_KEYWORD_CAP: f64 = 0.3;
const MEDIUM_KEYWORD_WEIGHT: f64 = 0.08;
const MEDIUM_KEYWORD_CAP: f64 = 0.16;
const LOW_KEYWORD_WEIGHT: f64 = 0.1;
const LOW_KEYWORD_CAP: f64 = 0.2;

/// Scene types that imply sustained fast motion.
const HIGH_MOTION_SCENES: &[&str] = &[
    "action", "chase", "fight", "battle", "dance", "sport", "stunt", "montage",
];

/// Scene types that imply a mostly static frame.
const LOW_MOTION_SCENES: &[&str] = &[
    "dialogue",
    "establishing",
    "portrait",
    "closeup",
    "close_up",
    "interview",
    "static",
    "title",
    "insert",
];

static HIGH_MOTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"(?i)\b(run|runs|running|sprint\w*|chase\w*|fight\w*|explo\w*|crash\w*|jump\w*|spin\w*|leap\w*|danc\w*|tumbl\w*|fast|rapid\w*|whip[- ]pan\w*|crowd\w*|flee\w*)\b",
    )
    .expect("valid regex")
});

static MEDIUM_MOTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"(?i)\b(walk\w*|turn\w*|pan|pans|panning|tilt\w*|dolly|track\w*|gestur\w*|reach\w*|stands? up|sits? down|rotat\w*|push(es)? in|pull(s)? out)\b",
    )
    .expect("valid regex")
});

static LOW_MOTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"(?i)\b(still|static|motionless|silent\w*|frozen|locked[- ]off|stares?|staring|sleep\w*|pause[sd]?)\b",
    )
    .expect("valid regex")
});

/// Phrases that describe a deliberate final pose.
static END_STATE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"(?i)\b(ends? (with|on|in)|ending (with|on|in)|final pose|end pose|comes? to rest|lands? (on|in)|settles? (on|into))\b",
    )
    .expect("valid regex")
});

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Motion complexity bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionComplexity {
    Low,
    Medium,
    High,
}

impl MotionComplexity {
    pub fn from_score(score: f64) -> Self {
        if score < COMPLEXITY_MEDIUM_THRESHOLD {
            Self::Low
        } else if score < COMPLEXITY_HIGH_THRESHOLD {
            Self::Medium
        } else {
            Self::High
        }
    }

    /// Default clip length for this complexity.
    pub fn duration_bucket_secs(self) -> f64 {
        match self {
            Self::Low => DURATION_LOW_SECS,
            Self::Medium => DURATION_MEDIUM_SECS,
            Self::High => DURATION_HIGH_SECS,
        }
    }
}

/// How the provider is seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameStrategy {
    /// One start image (seed or continuity anchor).
    SingleAnchor,
    /// Start image plus a described end state the provider interpolates to.
    FirstLastInterpolated,
}

impl FrameStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleAnchor => "single_anchor",
            Self::FirstLastInterpolated => "first_last_interpolated",
        }
    }
}

/// Derived generation plan for one shot. Recomputed whenever the shot
/// changes; never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotAnalysis {
    pub shot_id: ShotId,
    pub frame_strategy: FrameStrategy,
    pub recommended_duration_secs: f64,
    pub needs_predecessor_anchor: bool,
    pub complexity: MotionComplexity,
    pub complexity_score: f64,
    pub recommended_provider_id: Option<ProviderId>,
    pub estimated_cost_usd: Option<f64>,
    /// Why no provider was recommended.
    pub unschedulable_reason: Option<String>,
}

impl ShotAnalysis {
    pub fn is_schedulable(&self) -> bool {
        self.recommended_provider_id.is_some()
    }
}

// ---------------------------------------------------------------------------
// Complexity classification
// ---------------------------------------------------------------------------

fn keyword_contribution(re: &regex::Regex, text: &str, weight: f64, cap: f64) -> f64 {
    (re.find_iter(text).count() as f64 * weight).min(cap)
}

/// Score a shot's motion complexity in `0.0..=1.0` from its scene type and
/// description keywords.
pub fn complexity_score(scene_type: &str, description: &str) -> f64 {
    let scene = scene_type.trim().to_ascii_lowercase();
    let base = if HIGH_MOTION_SCENES.contains(&scene.as_str()) {
        BASE_SCORE_HIGH_MOTION_SCENE
    } else if LOW_MOTION_SCENES.contains(&scene.as_str()) {
        BASE_SCORE_LOW_MOTION_SCENE
    } else {
        BASE_SCORE_DEFAULT
    };

    let score = base
        + keyword_contribution(&HIGH_MOTION_RE, description, HIGH_KEYWORD_WEIGHT, HIGH_KEYWORD_CAP)
        + keyword_contribution(
            &MEDIUM_MOTION_RE,
            description,
            MEDIUM_KEYWORD_WEIGHT,
            MEDIUM_KEYWORD_CAP,
        )
        - keyword_contribution(&LOW_MOTION_RE, description, LOW_KEYWORD_WEIGHT, LOW_KEYWORD_CAP);

    score.clamp(0.0, 1.0)
}

/// Whether the shot describes a deliberate end state.
pub fn has_end_state(shot: &Shot) -> bool {
    shot.end_state_hint
        .as_deref()
        .is_some_and(|h| !h.trim().is_empty())
        || END_STATE_RE.is_match(&shot.description)
}

/// Whether the shot continues its predecessor visually: the explicit flag
/// wins, otherwise matching scene types imply continuity.
pub fn continues_predecessor(shot: &Shot, ctx: &EpisodeContext) -> bool {
    let Some(prev) = ctx.predecessor(shot.id) else {
        return false;
    };
    match shot.continues_previous {
        Some(flag) => flag,
        None => prev.scene_type.trim().eq_ignore_ascii_case(shot.scene_type.trim()),
    }
}

/// Whether the shot continues a predecessor that still has no clip but was
/// left out of the batch. Such a shot runs standalone and counts as demoted.
pub fn misses_pending_predecessor(shot: &Shot, ctx: &EpisodeContext) -> bool {
    continues_predecessor(shot, ctx)
        && ctx
            .predecessor(shot.id)
            .is_some_and(|prev| !prev.completed && !ctx.in_batch(prev.shot_id))
}

// ---------------------------------------------------------------------------
// Provider selection
// ---------------------------------------------------------------------------

/// Pick the cheapest provider that can render `duration_secs` at `output`
/// with `strategy`.
///
/// Ties on price prefer the shorter timeout for low and medium complexity
/// and the longer timeout for high complexity, then the provider id.
pub fn select_provider<'a>(
    registry: &'a CapabilityRegistry,
    duration_secs: f64,
    output: &OutputSpec,
    strategy: FrameStrategy,
    complexity: MotionComplexity,
) -> Option<&'a ProviderCapability> {
    registry
        .iter()
        .filter(|c| c.supports_duration(duration_secs))
        .filter(|c| c.supports_output(output))
        .filter(|c| strategy == FrameStrategy::SingleAnchor || c.supports_first_last_frame)
        .min_by(|a, b| compare_candidates(a, b, duration_secs, complexity))
}

fn compare_candidates(
    a: &ProviderCapability,
    b: &ProviderCapability,
    duration_secs: f64,
    complexity: MotionComplexity,
) -> Ordering {
    let by_cost = a
        .estimate_cost(duration_secs)
        .total_cmp(&b.estimate_cost(duration_secs));
    let by_timeout = match complexity {
        MotionComplexity::High => b.timeout_secs.cmp(&a.timeout_secs),
        MotionComplexity::Low | MotionComplexity::Medium => a.timeout_secs.cmp(&b.timeout_secs),
    };
    by_cost.then(by_timeout).then_with(|| a.id.cmp(&b.id))
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Analyze one shot.
pub fn analyze(shot: &Shot, ctx: &EpisodeContext, registry: &CapabilityRegistry) -> ShotAnalysis {
    let score = complexity_score(&shot.scene_type, &shot.description);
    let complexity = MotionComplexity::from_score(score);
    let output = ctx.output;

    // Only a predecessor generated in this batch hands over an anchor.
    let needs_predecessor_anchor = continues_predecessor(shot, ctx)
        && ctx.predecessor(shot.id).is_some_and(|prev| ctx.in_batch(prev.shot_id));

    let mut analysis = ShotAnalysis {
        shot_id: shot.id,
        frame_strategy: FrameStrategy::SingleAnchor,
        recommended_duration_secs: complexity.duration_bucket_secs(),
        needs_predecessor_anchor,
        complexity,
        complexity_score: score,
        recommended_provider_id: None,
        estimated_cost_usd: None,
        unschedulable_reason: None,
    };

    let duration = match shot.target_duration_secs {
        Some(d) if d <= 0.0 || !d.is_finite() => {
            analysis.unschedulable_reason =
                Some(format!("Requested duration {d}s must be positive"));
            return analysis;
        }
        Some(d) => d,
        None => match registry.max_duration_for(&output) {
            Some(max) => complexity.duration_bucket_secs().min(max),
            None => {
                analysis.unschedulable_reason =
                    Some(format!("No provider renders {output}"));
                return analysis;
            }
        },
    };
    analysis.recommended_duration_secs = duration;

    let wants_first_last = has_end_state(shot);
    let first_last = wants_first_last
        .then(|| {
            select_provider(
                registry,
                duration,
                &output,
                FrameStrategy::FirstLastInterpolated,
                complexity,
            )
        })
        .flatten();

    let (strategy, provider) = match first_last {
        Some(p) => (FrameStrategy::FirstLastInterpolated, Some(p)),
        None => (
            FrameStrategy::SingleAnchor,
            select_provider(registry, duration, &output, FrameStrategy::SingleAnchor, complexity),
        ),
    };
    analysis.frame_strategy = strategy;

    match provider {
        Some(p) => {
            analysis.recommended_provider_id = Some(p.id.clone());
            analysis.estimated_cost_usd = Some(p.estimate_cost(duration));
        }
        None => {
            analysis.unschedulable_reason = Some(format!(
                "No provider supports a {duration:.1}s clip at {output}"
            ));
        }
    }
    analysis
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Resolution;

    fn provider(id: &str, max: f64, first_last: bool, price: f64, timeout: u64) -> ProviderCapability {
        ProviderCapability {
            id: id.to_string(),
            max_duration_secs: max,
            resolutions: vec![Resolution::HD_720],
            frame_rates: vec![24],
            supports_first_last_frame: first_last,
            max_concurrent_jobs: 2,
            timeout_secs: timeout,
            price_per_second_usd: price,
            min_price_usd: 0.0,
            avg_generation_secs: 60.0,
        }
    }

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::from_providers(vec![
            provider("cheap", 6.0, false, 0.05, 120),
            provider("interp", 10.0, true, 0.08, 300),
        ])
        .unwrap()
    }

    fn shot(id: ShotId, position: u32, scene_type: &str, description: &str) -> Shot {
        Shot {
            id,
            episode_id: 1,
            position,
            scene_type: scene_type.to_string(),
            description: description.to_string(),
            continues_previous: None,
            end_state_hint: None,
            target_duration_secs: None,
            seed_image_url: None,
            completed: false,
            variations: vec![],
        }
    }

    fn ctx(shots: &[Shot]) -> EpisodeContext {
        EpisodeContext::for_pending_shots(shots, OutputSpec::default())
    }

    // -- complexity -----------------------------------------------------------

    #[test]
    fn dialogue_is_low_complexity() {
        let score = complexity_score("dialogue", "Two people talk quietly at a table");
        assert_eq!(MotionComplexity::from_score(score), MotionComplexity::Low);
    }

    #[test]
    fn chase_with_running_is_high_complexity() {
        let score = complexity_score("chase", "She runs through the crowd, jumping a fence");
        assert_eq!(MotionComplexity::from_score(score), MotionComplexity::High);
    }

    #[test]
    fn unknown_scene_with_walking_is_medium() {
        let score = complexity_score("interior", "He walks to the window and turns");
        assert_eq!(MotionComplexity::from_score(score), MotionComplexity::Medium);
    }

    #[test]
    fn static_keywords_lower_the_score() {
        let calm = complexity_score("interior", "A motionless, silent room");
        let plain = complexity_score("interior", "A room");
        assert!(calm < plain);
    }

    #[test]
    fn score_is_clamped() {
        let score = complexity_score(
            "fight",
            "running chase explodes crash jump spin leap fast rapid crowd walks turns pans",
        );
        assert!(score <= 1.0);
    }

    // -- duration -------------------------------------------------------------

    #[test]
    fn bucket_duration_is_clamped_to_supported_maximum() {
        let registry = CapabilityRegistry::from_providers(vec![provider("short", 5.0, false, 0.05, 60)])
            .unwrap();
        let s = shot(1, 0, "chase", "running and jumping through a crowd");
        let a = analyze(&s, &ctx(std::slice::from_ref(&s)), &registry);
        assert_eq!(a.complexity, MotionComplexity::High);
        assert_eq!(a.recommended_duration_secs, 5.0);
        assert_eq!(a.recommended_provider_id.as_deref(), Some("short"));
    }

    #[test]
    fn explicit_duration_beyond_every_provider_is_unschedulable() {
        let mut s = shot(1, 0, "dialogue", "talking");
        s.target_duration_secs = Some(30.0);
        let a = analyze(&s, &ctx(std::slice::from_ref(&s)), &registry());
        assert!(!a.is_schedulable());
        assert!(a.unschedulable_reason.unwrap().contains("30.0s"));
    }

    #[test]
    fn non_positive_duration_is_unschedulable() {
        let mut s = shot(1, 0, "dialogue", "talking");
        s.target_duration_secs = Some(0.0);
        let a = analyze(&s, &ctx(std::slice::from_ref(&s)), &registry());
        assert!(!a.is_schedulable());
    }

    #[test]
    fn unsupported_output_is_unschedulable() {
        let s = shot(1, 0, "dialogue", "talking");
        let mut c = ctx(std::slice::from_ref(&s));
        c.output = OutputSpec {
            resolution: Resolution::FHD_1080,
            fps: 60,
        };
        let a = analyze(&s, &c, &registry());
        assert!(!a.is_schedulable());
    }

    // -- provider choice -----------------------------------------------------

    #[test]
    fn cheapest_capable_provider_wins() {
        let s = shot(1, 0, "dialogue", "talking");
        let a = analyze(&s, &ctx(std::slice::from_ref(&s)), &registry());
        assert_eq!(a.recommended_provider_id.as_deref(), Some("cheap"));
        assert_eq!(a.frame_strategy, FrameStrategy::SingleAnchor);
        assert!(a.estimated_cost_usd.is_some());
    }

    #[test]
    fn long_explicit_duration_routes_to_capable_provider() {
        let mut s = shot(1, 0, "dialogue", "talking");
        s.target_duration_secs = Some(9.0);
        let a = analyze(&s, &ctx(std::slice::from_ref(&s)), &registry());
        assert_eq!(a.recommended_provider_id.as_deref(), Some("interp"));
    }

    #[test]
    fn price_tie_prefers_short_timeout_for_simple_shots() {
        let registry = CapabilityRegistry::from_providers(vec![
            provider("slow", 10.0, false, 0.05, 600),
            provider("quick", 10.0, false, 0.05, 120),
        ])
        .unwrap();
        let p = select_provider(
            &registry,
            4.0,
            &OutputSpec::default(),
            FrameStrategy::SingleAnchor,
            MotionComplexity::Low,
        );
        assert_eq!(p.map(|c| c.id.as_str()), Some("quick"));
    }

    #[test]
    fn price_tie_tolerates_long_timeout_for_complex_shots() {
        let registry = CapabilityRegistry::from_providers(vec![
            provider("slow", 10.0, false, 0.05, 600),
            provider("quick", 10.0, false, 0.05, 120),
        ])
        .unwrap();
        let p = select_provider(
            &registry,
            8.0,
            &OutputSpec::default(),
            FrameStrategy::SingleAnchor,
            MotionComplexity::High,
        );
        assert_eq!(p.map(|c| c.id.as_str()), Some("slow"));
    }

    // -- frame strategy ------------------------------------------------------

    #[test]
    fn end_state_hint_selects_interpolation() {
        let mut s = shot(1, 0, "dialogue", "talking");
        s.end_state_hint = Some("hand resting on the door".into());
        let a = analyze(&s, &ctx(std::slice::from_ref(&s)), &registry());
        assert_eq!(a.frame_strategy, FrameStrategy::FirstLastInterpolated);
        assert_eq!(a.recommended_provider_id.as_deref(), Some("interp"));
    }

    #[test]
    fn end_state_phrase_in_description_is_detected() {
        let s = shot(1, 0, "dialogue", "She turns and ends with her back to camera");
        assert!(has_end_state(&s));
    }

    #[test]
    fn end_state_without_capable_provider_falls_back() {
        let registry = CapabilityRegistry::from_providers(vec![provider("plain", 10.0, false, 0.05, 60)])
            .unwrap();
        let mut s = shot(1, 0, "dialogue", "talking");
        s.end_state_hint = Some("sitting".into());
        let a = analyze(&s, &ctx(std::slice::from_ref(&s)), &registry);
        assert_eq!(a.frame_strategy, FrameStrategy::SingleAnchor);
        assert!(a.is_schedulable());
    }

    // -- continuity ----------------------------------------------------------

    #[test]
    fn explicit_continuity_with_batched_predecessor_needs_anchor() {
        let first = shot(1, 0, "dialogue", "a");
        let mut second = shot(2, 1, "action", "b");
        second.continues_previous = Some(true);
        let shots = vec![first, second];
        let a = analyze(&shots[1], &ctx(&shots), &registry());
        assert!(a.needs_predecessor_anchor);
    }

    #[test]
    fn matching_scene_type_implies_continuity() {
        let shots = vec![shot(1, 0, "dialogue", "a"), shot(2, 1, "Dialogue", "b")];
        let a = analyze(&shots[1], &ctx(&shots), &registry());
        assert!(a.needs_predecessor_anchor);
    }

    #[test]
    fn explicit_false_overrides_scene_match() {
        let mut second = shot(2, 1, "dialogue", "b");
        second.continues_previous = Some(false);
        let shots = vec![shot(1, 0, "dialogue", "a"), second];
        let a = analyze(&shots[1], &ctx(&shots), &registry());
        assert!(!a.needs_predecessor_anchor);
    }

    #[test]
    fn completed_predecessor_outside_batch_drops_anchor_need() {
        let mut first = shot(1, 0, "dialogue", "a");
        first.completed = true;
        let mut second = shot(2, 1, "dialogue", "b");
        second.continues_previous = Some(true);
        let shots = vec![first, second];
        let a = analyze(&shots[1], &ctx(&shots), &registry());
        assert!(!a.needs_predecessor_anchor);
    }

    #[test]
    fn pending_predecessor_outside_batch_drops_anchor_need() {
        let first = shot(1, 0, "dialogue", "a");
        let second = shot(2, 1, "dialogue", "b");
        let shots = vec![first, second.clone()];
        let only_second = EpisodeContext::new(&shots, [2], OutputSpec::default());
        let a = analyze(&second, &only_second, &registry());
        assert!(!a.needs_predecessor_anchor);
        assert!(misses_pending_predecessor(&second, &only_second));
    }

    #[test]
    fn completed_predecessor_is_not_a_missed_dependency() {
        let mut first = shot(1, 0, "dialogue", "a");
        first.completed = true;
        let second = shot(2, 1, "dialogue", "b");
        let shots = vec![first, second.clone()];
        assert!(!misses_pending_predecessor(&second, &ctx(&shots)));
    }

    #[test]
    fn first_shot_never_needs_anchor() {
        let mut s = shot(1, 0, "dialogue", "a");
        s.continues_previous = Some(true);
        let a = analyze(&s, &ctx(std::slice::from_ref(&s)), &registry());
        assert!(!a.needs_predecessor_anchor);
    }
}
