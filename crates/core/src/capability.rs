//! Video-synthesis provider capability registry.
//!
//! Every provider the platform can dispatch to is described by an
//! immutable [`ProviderCapability`]. The registry is loaded once at process
//! start (built-in table or a JSON file) and shared read-only by the shot
//! analyzer, the orchestrator, and the provider layer.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::estimation::job_cost_estimate;
use crate::types::ProviderId;

// ---------------------------------------------------------------------------
// Output format
// ---------------------------------------------------------------------------

/// Pixel dimensions of a generated clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const HD_720: Resolution = Resolution::new(1280, 720);
    pub const FHD_1080: Resolution = Resolution::new(1920, 1080);
    pub const VERTICAL_720: Resolution = Resolution::new(720, 1280);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Resolution and frame rate requested for every clip of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub resolution: Resolution,
    pub fps: u32,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            resolution: Resolution::HD_720,
            fps: 24,
        }
    }
}

impl fmt::Display for OutputSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}fps", self.resolution, self.fps)
    }
}

// ---------------------------------------------------------------------------
// ProviderCapability
// ---------------------------------------------------------------------------

/// Typical wall-clock time of one generation when a registry file omits it.
const DEFAULT_AVG_GENERATION_SECS: f64 = 120.0;

fn default_avg_generation_secs() -> f64 {
    DEFAULT_AVG_GENERATION_SECS
}

/// Static description of what one synthesis provider can do and what it
/// costs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCapability {
    pub id: ProviderId,
    /// Longest clip the provider will render in one request.
    pub max_duration_secs: f64,
    pub resolutions: Vec<Resolution>,
    pub frame_rates: Vec<u32>,
    /// Whether the provider accepts both a start and an end frame.
    pub supports_first_last_frame: bool,
    /// Ceiling on in-flight jobs against this provider.
    pub max_concurrent_jobs: usize,
    /// Request timeout enforced by the provider layer.
    pub timeout_secs: u64,
    pub price_per_second_usd: f64,
    pub min_price_usd: f64,
    /// Typical wall-clock seconds per job, used for remaining-time estimates.
    #[serde(default = "default_avg_generation_secs")]
    pub avg_generation_secs: f64,
}

impl ProviderCapability {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn supports_duration(&self, duration_secs: f64) -> bool {
        duration_secs > 0.0 && duration_secs <= self.max_duration_secs
    }

    pub fn supports_output(&self, output: &OutputSpec) -> bool {
        self.resolutions.contains(&output.resolution) && self.frame_rates.contains(&output.fps)
    }

    /// Estimated price of a clip of `duration_secs`, honoring the minimum
    /// charge.
    pub fn estimate_cost(&self, duration_secs: f64) -> f64 {
        job_cost_estimate(self.price_per_second_usd, self.min_price_usd, duration_secs)
    }

    /// Validate a capability entry loaded from configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::Validation(
                "Provider id must not be empty".to_string(),
            ));
        }
        if self.max_duration_secs <= 0.0 {
            return Err(CoreError::Validation(format!(
                "Provider '{}': max_duration_secs must be > 0",
                self.id
            )));
        }
        if self.resolutions.is_empty() || self.frame_rates.is_empty() {
            return Err(CoreError::Validation(format!(
                "Provider '{}': at least one resolution and frame rate is required",
                self.id
            )));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(CoreError::Validation(format!(
                "Provider '{}': max_concurrent_jobs must be > 0",
                self.id
            )));
        }
        if self.timeout_secs == 0 {
            return Err(CoreError::Validation(format!(
                "Provider '{}': timeout_secs must be > 0",
                self.id
            )));
        }
        if self.price_per_second_usd < 0.0 || self.min_price_usd < 0.0 {
            return Err(CoreError::Validation(format!(
                "Provider '{}': prices must not be negative",
                self.id
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CapabilityRegistry
// ---------------------------------------------------------------------------

/// Immutable table of provider capabilities keyed by provider id.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    providers: BTreeMap<ProviderId, ProviderCapability>,
}

impl CapabilityRegistry {
    /// Build a registry, rejecting invalid entries and duplicate ids.
    pub fn from_providers(
        providers: impl IntoIterator<Item = ProviderCapability>,
    ) -> Result<Self, CoreError> {
        let mut map = BTreeMap::new();
        for capability in providers {
            capability.validate()?;
            if map.contains_key(&capability.id) {
                return Err(CoreError::Conflict(format!(
                    "Duplicate provider id '{}'",
                    capability.id
                )));
            }
            map.insert(capability.id.clone(), capability);
        }
        Ok(Self { providers: map })
    }

    /// Parse a JSON array of capability entries.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let entries: Vec<ProviderCapability> = serde_json::from_str(json)
            .map_err(|e| CoreError::Validation(format!("Invalid provider registry JSON: {e}")))?;
        Self::from_providers(entries)
    }

    /// The providers the platform ships with.
    pub fn builtin() -> Self {
        let standard = vec![Resolution::HD_720, Resolution::FHD_1080, Resolution::VERTICAL_720];
        let entries = vec![
            ProviderCapability {
                id: "kling".to_string(),
                max_duration_secs: 10.0,
                resolutions: standard.clone(),
                frame_rates: vec![24, 30],
                supports_first_last_frame: true,
                max_concurrent_jobs: 4,
                timeout_secs: 600,
                price_per_second_usd: 0.07,
                min_price_usd: 0.35,
                avg_generation_secs: 240.0,
            },
            ProviderCapability {
                id: "runway".to_string(),
                max_duration_secs: 10.0,
                resolutions: vec![Resolution::HD_720, Resolution::VERTICAL_720],
                frame_rates: vec![24],
                supports_first_last_frame: false,
                max_concurrent_jobs: 3,
                timeout_secs: 300,
                price_per_second_usd: 0.05,
                min_price_usd: 0.25,
                avg_generation_secs: 90.0,
            },
            ProviderCapability {
                id: "luma".to_string(),
                max_duration_secs: 9.0,
                resolutions: standard.clone(),
                frame_rates: vec![24],
                supports_first_last_frame: true,
                max_concurrent_jobs: 2,
                timeout_secs: 420,
                price_per_second_usd: 0.08,
                min_price_usd: 0.40,
                avg_generation_secs: 150.0,
            },
            ProviderCapability {
                id: "minimax".to_string(),
                max_duration_secs: 6.0,
                resolutions: standard,
                frame_rates: vec![24, 25],
                supports_first_last_frame: false,
                max_concurrent_jobs: 5,
                timeout_secs: 240,
                price_per_second_usd: 0.045,
                min_price_usd: 0.27,
                avg_generation_secs: 100.0,
            },
        ];
        // The built-in table is covered by `builtin_registry_is_valid`.
        Self {
            providers: entries.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ProviderCapability> {
        self.providers.get(id)
    }

    /// Iterate capabilities in provider-id order.
    pub fn iter(&self) -> impl Iterator<Item = &ProviderCapability> {
        self.providers.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Longest duration any provider able to render `output` supports.
    pub fn max_duration_for(&self, output: &OutputSpec) -> Option<f64> {
        self.iter()
            .filter(|c| c.supports_output(output))
            .map(|c| c.max_duration_secs)
            .max_by(f64::total_cmp)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
