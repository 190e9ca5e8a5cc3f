//! Drive one generation attempt from submission to a clip or an error.

use std::time::Duration;

use shotline_core::job::GenerationInput;

use crate::provider::{JobHandle, PollStatus, ProviderError, VideoProvider};

/// Retryable poll errors tolerated in a row before the attempt is abandoned.
pub const MAX_CONSECUTIVE_POLL_ERRORS: u32 = 3;

/// A finished clip and what the provider charged for it.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedClip {
    pub clip_url: String,
    pub cost_usd: f64,
}

/// A failed attempt, with any charge the provider reported for it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct AttemptError {
    #[source]
    pub error: ProviderError,
    pub reported_cost_usd: f64,
}

impl AttemptError {
    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }
}

impl From<ProviderError> for AttemptError {
    fn from(error: ProviderError) -> Self {
        Self {
            error,
            reported_cost_usd: 0.0,
        }
    }
}

/// Submit `input` and poll every `poll_interval` until the provider
/// finishes or `timeout` elapses.
///
/// A timeout is reported as [`ProviderError::Timeout`] (retryable) and the
/// provider is asked to abort the generation.
pub async fn run_to_completion(
    provider: &dyn VideoProvider,
    input: &GenerationInput,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<GeneratedClip, AttemptError> {
    let mut submitted: Option<JobHandle> = None;
    let attempt = drive(provider, input, poll_interval, &mut submitted);

    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                provider_id = provider.id(),
                timeout_secs = timeout.as_secs(),
                "Generation timed out",
            );
            if let Some(handle) = submitted.as_ref() {
                if let Err(e) = provider.cancel(handle).await {
                    tracing::debug!(
                        provider_id = provider.id(),
                        external_id = %handle.external_id,
                        error = %e,
                        "Failed to abort timed-out generation",
                    );
                }
            }
            Err(ProviderError::Timeout(timeout).into())
        }
    }
}

async fn drive(
    provider: &dyn VideoProvider,
    input: &GenerationInput,
    poll_interval: Duration,
    submitted: &mut Option<JobHandle>,
) -> Result<GeneratedClip, AttemptError> {
    let handle = provider.submit(input).await?;
    let handle = submitted.insert(handle);
    let mut poll_errors = 0u32;

    loop {
        tokio::time::sleep(poll_interval).await;
        match provider.poll(handle).await {
            Ok(PollStatus::Pending) => poll_errors = 0,
            Ok(PollStatus::Succeeded { clip_url, cost_usd }) => {
                return Ok(GeneratedClip { clip_url, cost_usd });
            }
            Ok(PollStatus::Failed { error, cost_usd }) => {
                return Err(AttemptError {
                    error,
                    reported_cost_usd: cost_usd.unwrap_or(0.0),
                });
            }
            Err(e) if e.is_retryable() && poll_errors + 1 < MAX_CONSECUTIVE_POLL_ERRORS => {
                poll_errors += 1;
                tracing::debug!(
                    provider_id = provider.id(),
                    external_id = %handle.external_id,
                    poll_errors,
                    error = %e,
                    "Poll failed, will poll again",
                );
            }
            Err(e) => return Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
