//! The provider seam and its error taxonomy.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shotline_core::job::{FailureKind, GenerationInput};
use shotline_core::types::ProviderId;

/// Opaque reference to a submitted generation on a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub provider_id: ProviderId,
    /// Provider-assigned generation id.
    pub external_id: String,
}

/// Result of one status poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    /// Still queued or rendering on the provider side.
    Pending,
    Succeeded { clip_url: String, cost_usd: f64 },
    /// The generation ended without a clip. Providers that bill failed
    /// renders report the charge in `cost_usd`.
    Failed { error: ProviderError, cost_usd: Option<f64> },
}

/// Errors from a provider call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    /// No result within the provider's timeout.
    #[error("provider timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("provider rate limited the request: {0}")]
    RateLimited(String),

    /// Network failure, 5xx, or a provider-side render crash.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// The provider refused the request (content policy, bad image).
    #[error("provider rejected input: {0}")]
    RejectedInput(String),

    /// The provider refused our credentials. Retrying cannot help.
    #[error("provider refused credentials: {0}")]
    Unauthorized(String),

    /// The request could not be built for this provider.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ProviderError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::RateLimited(_) | Self::Transient(_)
        )
    }

    /// Failure kind recorded on the job.
    pub fn failure_kind(&self) -> FailureKind {
        if self.is_retryable() {
            FailureKind::ProviderTransient
        } else {
            FailureKind::ProviderRejectedInput
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transient(e.to_string())
    }
}

/// A video generation backend.
///
/// One implementation per provider id. Implementations are shared across
/// concurrent jobs and must not hold per-job state.
#[async_trait]
pub trait VideoProvider: Send + Sync {
    /// Registry id this adapter serves.
    fn id(&self) -> &str;

    /// Queue a generation.
    async fn submit(&self, input: &GenerationInput) -> Result<JobHandle, ProviderError>;

    /// Check a queued generation.
    async fn poll(&self, handle: &JobHandle) -> Result<PollStatus, ProviderError>;

    /// Best-effort abort of a generation that is no longer wanted.
    async fn cancel(&self, _handle: &JobHandle) -> Result<(), ProviderError> {
        Ok(())
    }
}
