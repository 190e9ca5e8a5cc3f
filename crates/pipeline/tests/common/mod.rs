//! In-memory fakes shared by the pipeline integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use shotline_core::batch::{BatchConfig, BatchResult};
use shotline_core::capability::{CapabilityRegistry, ProviderCapability, Resolution};
use shotline_core::job::{GenerationInput, JobState, JobTransition};
use shotline_core::shot::{EpisodeContext, Shot, Variation};
use shotline_core::types::{DbId, ShotId, VariationId};
use shotline_db::models::variation::VariationUpdate;
use shotline_events::EventBus;
use shotline_pipeline::ffmpeg::{FfmpegError, FrameExtractor};
use shotline_pipeline::orchestrator::{Orchestrator, ProgressCallback, RunHooks};
use shotline_pipeline::plan::BatchPlan;
use shotline_pipeline::service::BatchService;
use shotline_pipeline::storage::{ObjectStore, StorageError};
use shotline_pipeline::store::{ShotStore, StoreError};
use shotline_pipeline::AnchorDeriver;
use shotline_providers::{JobHandle, PollStatus, ProviderError, ProviderSet, VideoProvider};
use tokio::time::Instant;

/// 1x1 RGBA PNG.
pub const TINY_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0xDA, 0x63, 0x64, 0x60, 0xF8, 0x5F,
    0x0F, 0x00, 0x02, 0x87, 0x01, 0x80, 0xEB, 0x47, 0xBA, 0x92, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45,
    0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

// ---------------------------------------------------------------------------
// Shots and capabilities
// ---------------------------------------------------------------------------

/// A pending shot in episode 1 with one variation (`id * 10`) and the
/// prompt `shot {id}`. Continuity is explicit: `continues` decides it.
pub fn shot(id: ShotId, position: u32, continues: bool) -> Shot {
    Shot {
        id,
        episode_id: 1,
        position,
        scene_type: "dialogue".into(),
        description: format!("shot {id}"),
        continues_previous: Some(continues),
        end_state_hint: None,
        target_duration_secs: None,
        seed_image_url: Some(format!("mem://seeds/{id}.png")),
        completed: false,
        variations: vec![Variation {
            id: id * 10,
            label: "main".into(),
            has_clip: false,
        }],
    }
}

/// Shots 1..=n at positions 0..n, each continuing the one before.
pub fn chain_of(n: i64) -> Vec<Shot> {
    (1..=n).map(|id| shot(id, (id - 1) as u32, id > 1)).collect()
}

/// Shots 1..=n at positions 0..n with no continuity.
pub fn independent(n: i64) -> Vec<Shot> {
    (1..=n).map(|id| shot(id, (id - 1) as u32, false)).collect()
}

pub fn capability(id: &str, max_concurrent_jobs: usize, price_per_second_usd: f64) -> ProviderCapability {
    ProviderCapability {
        id: id.into(),
        max_duration_secs: 10.0,
        resolutions: vec![Resolution::HD_720],
        frame_rates: vec![24],
        supports_first_last_frame: false,
        max_concurrent_jobs,
        timeout_secs: 600,
        price_per_second_usd,
        min_price_usd: 0.0,
        avg_generation_secs: 60.0,
    }
}

/// Fast timings so paused-clock tests stay short.
pub fn config(max_concurrent_jobs: usize) -> BatchConfig {
    BatchConfig {
        max_concurrent_jobs,
        max_retries: 3,
        retry_base_delay_ms: 1_000,
        retry_max_delay_ms: 8_000,
        anchor_max_attempts: 2,
        anchor_retry_delay_ms: 500,
        poll_interval_ms: 1_000,
        ..BatchConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// What a scripted attempt does.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Deliver a clip charging `cost`.
    Succeed { cost: f64 },
    /// Fail with a retryable error after rendering, charging `cost`.
    Transient { cost: f64 },
    /// Refuse the input at submission.
    Reject,
    /// Never finish.
    Hang,
}

struct Submission {
    outcome: Outcome,
    prompt: String,
    ready_at: Instant,
}

/// Provider whose attempts follow a per-prompt script. Unscripted attempts
/// succeed at `default_cost`.
pub struct ScriptedProvider {
    id: String,
    render_time: Duration,
    default_cost: f64,
    scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
    submissions: Mutex<HashMap<String, Submission>>,
    /// Every input submitted, in order.
    pub inputs: Mutex<Vec<GenerationInput>>,
    pub cancelled: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(id: &str, render_time: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            render_time,
            default_cost: 0.5,
            scripts: Mutex::new(HashMap::new()),
            submissions: Mutex::new(HashMap::new()),
            inputs: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        })
    }

    /// Queue outcomes for attempts on `shot {shot_id}`.
    pub fn script(&self, shot_id: ShotId, outcomes: impl IntoIterator<Item = Outcome>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(format!("shot {shot_id}"))
            .or_default()
            .extend(outcomes);
    }

    pub fn attempts_for(&self, shot_id: ShotId) -> Vec<GenerationInput> {
        let prompt = format!("shot {shot_id}");
        self.inputs
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.prompt == prompt)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl VideoProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn submit(&self, input: &GenerationInput) -> Result<JobHandle, ProviderError> {
        let outcome = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&input.prompt)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Outcome::Succeed {
                cost: self.default_cost,
            });

        let mut inputs = self.inputs.lock().unwrap();
        inputs.push(input.clone());
        if outcome == Outcome::Reject {
            return Err(ProviderError::RejectedInput("content policy".into()));
        }

        let external_id = format!("{}-{}", self.id, inputs.len());
        self.submissions.lock().unwrap().insert(
            external_id.clone(),
            Submission {
                outcome,
                prompt: input.prompt.clone(),
                ready_at: Instant::now() + self.render_time,
            },
        );
        Ok(JobHandle {
            provider_id: self.id.clone(),
            external_id,
        })
    }

    async fn poll(&self, handle: &JobHandle) -> Result<PollStatus, ProviderError> {
        let submissions = self.submissions.lock().unwrap();
        let Some(submission) = submissions.get(&handle.external_id) else {
            return Err(ProviderError::Transient("unknown generation".into()));
        };
        if Instant::now() < submission.ready_at {
            return Ok(PollStatus::Pending);
        }
        Ok(match &submission.outcome {
            Outcome::Succeed { cost } => PollStatus::Succeeded {
                clip_url: format!(
                    "mem://clips/{}/{}.mp4",
                    submission.prompt.replace(' ', "-"),
                    handle.external_id
                ),
                cost_usd: *cost,
            },
            Outcome::Transient { cost } => PollStatus::Failed {
                error: ProviderError::Transient("render node lost".into()),
                cost_usd: Some(*cost),
            },
            Outcome::Reject => PollStatus::Failed {
                error: ProviderError::RejectedInput("content policy".into()),
                cost_usd: None,
            },
            Outcome::Hang => PollStatus::Pending,
        })
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<(), ProviderError> {
        self.cancelled
            .lock()
            .unwrap()
            .push(handle.external_id.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Object store and frame extraction
// ---------------------------------------------------------------------------

/// Serves every `mem://clips/` URL except those containing a broken
/// marker, and keeps stored images in memory.
#[derive(Default)]
pub struct MemObjectStore {
    broken: Mutex<Vec<String>>,
    pub images: Mutex<Vec<Vec<u8>>>,
    pub fetched: Mutex<Vec<String>>,
}

impl MemObjectStore {
    /// Make clips of `shot {shot_id}` undownloadable.
    pub fn break_clips_of(&self, shot_id: ShotId) {
        self.broken.lock().unwrap().push(format!("/shot-{shot_id}/"));
    }
}

#[async_trait]
impl ObjectStore for MemObjectStore {
    async fn store_image(&self, bytes: &[u8]) -> Result<String, StorageError> {
        let mut images = self.images.lock().unwrap();
        images.push(bytes.to_vec());
        Ok(format!("mem://anchors/{}.png", images.len()))
    }

    async fn fetch_clip(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        self.fetched.lock().unwrap().push(url.to_string());
        let broken = self.broken.lock().unwrap().iter().any(|m| url.contains(m.as_str()));
        if broken || !url.starts_with("mem://clips/") {
            return Err(StorageError::NotFound(url.to_string()));
        }
        Ok(vec![0u8; 32])
    }
}

/// Writes a tiny PNG as the last frame of any clip.
pub struct StubExtractor;

#[async_trait]
impl FrameExtractor for StubExtractor {
    async fn extract_last_frame(&self, _clip_path: &Path, output_path: &Path) -> Result<(), FfmpegError> {
        tokio::fs::write(output_path, TINY_PNG).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Shot store
// ---------------------------------------------------------------------------

/// Serves a fixed shot list and records every variation write.
pub struct RecordingStore {
    shots: Vec<Shot>,
    pub updates: Mutex<Vec<(ShotId, VariationId, VariationUpdate)>>,
}

impl RecordingStore {
    pub fn new(shots: Vec<Shot>) -> Arc<Self> {
        Arc::new(Self {
            shots,
            updates: Mutex::new(Vec::new()),
        })
    }

    /// The latest write for a variation.
    pub fn last_update(&self, variation_id: VariationId) -> Option<VariationUpdate> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(_, v, _)| *v == variation_id)
            .map(|(_, _, u)| u.clone())
    }
}

#[async_trait]
impl ShotStore for RecordingStore {
    async fn list_episode_shots(&self, episode_id: DbId) -> Result<Vec<Shot>, StoreError> {
        let mut shots: Vec<Shot> = self
            .shots
            .iter()
            .filter(|s| s.episode_id == episode_id)
            .cloned()
            .collect();
        shots.sort_by_key(|s| s.position);
        Ok(shots)
    }

    async fn find_shots(&self, shot_ids: &[ShotId]) -> Result<Vec<Shot>, StoreError> {
        let mut shots: Vec<Shot> = self
            .shots
            .iter()
            .filter(|s| shot_ids.contains(&s.id))
            .cloned()
            .collect();
        shots.sort_by_key(|s| (s.episode_id, s.position));
        Ok(shots)
    }

    async fn update_variation(
        &self,
        shot_id: ShotId,
        variation_id: VariationId,
        update: &VariationUpdate,
    ) -> Result<(), StoreError> {
        self.updates
            .lock()
            .unwrap()
            .push((shot_id, variation_id, update.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Orchestrator wired to in-memory fakes.
pub struct Harness {
    pub shots: Vec<Shot>,
    pub registry: CapabilityRegistry,
    pub providers: HashMap<String, Arc<ScriptedProvider>>,
    pub objects: Arc<MemObjectStore>,
    pub store: Arc<RecordingStore>,
    pub events: Arc<EventBus>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    /// One provider per capability, each rendering for `render_time`.
    pub fn new(shots: Vec<Shot>, capabilities: Vec<ProviderCapability>, render_time: Duration) -> Self {
        let registry = CapabilityRegistry::from_providers(capabilities.clone()).unwrap();
        let mut set = ProviderSet::new(registry.clone());
        let mut providers = HashMap::new();
        for cap in &capabilities {
            let provider = ScriptedProvider::new(&cap.id, render_time);
            set.register(provider.clone()).unwrap();
            providers.insert(cap.id.clone(), provider);
        }

        let objects = Arc::new(MemObjectStore::default());
        let store = RecordingStore::new(shots.clone());
        let deriver = AnchorDeriver::new(objects.clone(), Arc::new(StubExtractor));
        let events = Arc::new(EventBus::default());
        let orchestrator = Arc::new(
            Orchestrator::new(set, deriver, store.clone()).with_event_bus(Arc::clone(&events)),
        );

        Self {
            shots,
            registry,
            providers,
            objects,
            store,
            events,
            orchestrator,
        }
    }

    pub fn provider(&self, id: &str) -> &Arc<ScriptedProvider> {
        &self.providers[id]
    }

    /// Plan every pending shot.
    pub fn plan(&self) -> BatchPlan {
        let ctx = EpisodeContext::for_pending_shots(&self.shots, Default::default());
        let pending: Vec<Shot> = self.shots.iter().filter(|s| !s.completed).cloned().collect();
        BatchPlan::build(&pending, &ctx, &self.registry)
    }

    /// Run the full plan, collecting every transition in order.
    pub async fn run(&self, config: BatchConfig) -> (BatchResult, Vec<JobTransition>) {
        let plan = self.plan();
        self.run_plan(plan, config).await
    }

    pub async fn run_plan(&self, plan: BatchPlan, config: BatchConfig) -> (BatchResult, Vec<JobTransition>) {
        let (progress, log) = recorder();
        let hooks = RunHooks {
            progress: Some(progress),
            ..RunHooks::default()
        };
        let result = self.orchestrator.run_with(plan, config, hooks).await;
        let transitions = log.lock().unwrap().clone();
        (result, transitions)
    }

    pub fn service(&self) -> BatchService {
        BatchService::new(self.store.clone(), Arc::clone(&self.orchestrator))
    }
}

/// A progress callback that appends to a shared log.
pub fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<JobTransition>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let callback: ProgressCallback = Arc::new(move |t: &JobTransition| {
        sink.lock().unwrap().push(t.clone());
    });
    (callback, log)
}

// ---------------------------------------------------------------------------
// Assertions over transition logs
// ---------------------------------------------------------------------------

/// Replay transitions and return the peak number of running jobs, overall
/// and per provider.
pub fn peak_running(transitions: &[JobTransition]) -> (usize, HashMap<String, usize>) {
    let mut total = 0usize;
    let mut peak = 0usize;
    let mut per: HashMap<String, usize> = HashMap::new();
    let mut per_peak: HashMap<String, usize> = HashMap::new();

    for t in transitions {
        let provider = t.job.provider_id.clone();
        if t.job.state == JobState::Running {
            total += 1;
            let n = per.entry(provider.clone()).or_default();
            *n += 1;
            let p = per_peak.entry(provider).or_default();
            *p = (*p).max(*n);
            peak = peak.max(total);
        } else if t.from == JobState::Running {
            total -= 1;
            *per.entry(provider).or_default() -= 1;
        }
    }
    (peak, per_peak)
}

/// Index of the first transition of `shot_id` into `state`.
pub fn first_index(transitions: &[JobTransition], shot_id: ShotId, state: JobState) -> Option<usize> {
    transitions
        .iter()
        .position(|t| t.job.shot_id == shot_id && t.job.state == state)
}

pub fn states_of(transitions: &[JobTransition], shot_id: ShotId) -> Vec<JobState> {
    transitions
        .iter()
        .filter(|t| t.job.shot_id == shot_id)
        .map(|t| t.job.state)
        .collect()
}
