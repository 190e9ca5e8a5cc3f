//! JSON REST adapter for hosted video generation APIs.
//!
//! Speaks a small common protocol:
//!
//! - `POST {base}/generations` with a [`SubmitRequest`], answered by
//!   `{"id": "..."}`.
//! - `GET {base}/generations/{id}`, answered by a [`StatusResponse`].
//! - `DELETE {base}/generations/{id}` to abort.
//!
//! HTTP 408, 429 and 5xx are transient; any other non-2xx status means the
//! provider refused the request.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use shotline_core::analysis::FrameStrategy;
use shotline_core::job::GenerationInput;
use shotline_core::types::ProviderId;

use crate::provider::{JobHandle, PollStatus, ProviderError, VideoProvider};

/// Body of `POST /generations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub prompt: String,
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub frame_strategy: FrameStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_state_hint: Option<String>,
}

impl From<&GenerationInput> for SubmitRequest {
    fn from(input: &GenerationInput) -> Self {
        Self {
            prompt: input.prompt.clone(),
            duration_secs: input.duration_secs,
            width: input.output.resolution.width,
            height: input.output.resolution.height,
            fps: input.output.fps,
            frame_strategy: input.frame_strategy,
            start_image_url: input.start_image_url.clone(),
            end_state_hint: match input.frame_strategy {
                FrameStrategy::FirstLastInterpolated => input.end_state_hint.clone(),
                FrameStrategy::SingleAnchor => None,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

/// Body of `GET /generations/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// `queued`, `running`, `succeeded` or `failed`.
    pub status: String,
    #[serde(default)]
    pub clip_url: Option<String>,
    #[serde(default)]
    pub cost_usd: Option<f64>,
    /// Machine-readable failure code, e.g. `rate_limited`.
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusResponse {
    fn into_poll_status(self) -> PollStatus {
        match self.status.as_str() {
            "succeeded" => match self.clip_url {
                Some(clip_url) => PollStatus::Succeeded {
                    clip_url,
                    cost_usd: self.cost_usd.unwrap_or(0.0),
                },
                None => PollStatus::Failed {
                    error: ProviderError::Transient(
                        "provider reported success without a clip url".to_string(),
                    ),
                    cost_usd: self.cost_usd,
                },
            },
            "failed" => {
                let message = self.error.unwrap_or_else(|| "generation failed".to_string());
                PollStatus::Failed {
                    error: classify_error_code(self.error_code.as_deref(), message),
                    cost_usd: self.cost_usd,
                }
            }
            _ => PollStatus::Pending,
        }
    }
}

/// Map a provider failure code to the error taxonomy.
pub fn classify_error_code(code: Option<&str>, message: String) -> ProviderError {
    match code {
        Some("rate_limited") => ProviderError::RateLimited(message),
        Some("timeout") | Some("internal") | Some("unavailable") | None => {
            ProviderError::Transient(message)
        }
        // invalid_input, content_rejected and unknown codes
        Some(_) => ProviderError::RejectedInput(message),
    }
}

/// Map a non-2xx HTTP status to the error taxonomy.
pub fn classify_status(status: StatusCode, body: String) -> ProviderError {
    let message = format!("HTTP {}: {body}", status.as_u16());
    if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited(message)
    } else if status == StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
        ProviderError::Transient(message)
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        ProviderError::Unauthorized(message)
    } else {
        ProviderError::RejectedInput(message)
    }
}

/// HTTP client for one hosted provider.
pub struct HttpProvider {
    id: ProviderId,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpProvider {
    /// * `base_url` - API root, e.g. `https://api.example.com/v1`.
    pub fn new(id: impl Into<ProviderId>, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), id, base_url, api_key)
    }

    /// Reuse an existing [`reqwest::Client`] (connection pooling across
    /// providers).
    pub fn with_client(
        client: reqwest::Client,
        id: impl Into<ProviderId>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, classifying the
    /// failure otherwise.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(classify_status(status, body));
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl VideoProvider for HttpProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn submit(&self, input: &GenerationInput) -> Result<JobHandle, ProviderError> {
        if input.start_image_url.is_none() && input.frame_strategy == FrameStrategy::FirstLastInterpolated {
            return Err(ProviderError::InvalidInput(
                "first/last interpolation needs a start image".to_string(),
            ));
        }
        let body = SubmitRequest::from(input);
        let request = self
            .client
            .post(format!("{}/generations", self.base_url))
            .json(&body);
        let response = self.authorize(request).send().await?;
        let submitted: SubmitResponse = Self::parse_response(response).await?;

        tracing::debug!(provider_id = %self.id, external_id = %submitted.id, "Generation submitted");
        Ok(JobHandle {
            provider_id: self.id.clone(),
            external_id: submitted.id,
        })
    }

    async fn poll(&self, handle: &JobHandle) -> Result<PollStatus, ProviderError> {
        let request = self
            .client
            .get(format!("{}/generations/{}", self.base_url, handle.external_id));
        let response = self.authorize(request).send().await?;
        // The provider may expire finished or abandoned generations; a fresh
        // submission can still succeed.
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::Transient(format!(
                "generation {} is no longer known to the provider",
                handle.external_id
            )));
        }
        let status: StatusResponse = Self::parse_response(response).await?;
        Ok(status.into_poll_status())
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<(), ProviderError> {
        let request = self
            .client
            .delete(format!("{}/generations/{}", self.base_url, handle.external_id));
        let response = self.authorize(request).send().await?;
        Self::ensure_success(response).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
