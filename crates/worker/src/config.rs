use std::fmt::Debug;
use std::path::PathBuf;
use std::str::FromStr;

use shotline_core::batch::{self, BatchConfig};

/// Worker configuration loaded from environment variables.
///
/// Everything except `DATABASE_URL` has a default suitable for local
/// development.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Directory continuity anchors are written to.
    pub storage_root: PathBuf,
    /// Public URL `storage_root` is served from.
    pub storage_base_url: String,
    /// JSON capability registry replacing the built-in table.
    pub provider_registry_path: Option<PathBuf>,
    pub batch: BatchConfig,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                  | Default                          |
    /// |--------------------------|----------------------------------|
    /// | `DATABASE_URL`           | required                         |
    /// | `STORAGE_ROOT`           | `./storage`                      |
    /// | `STORAGE_BASE_URL`       | `http://localhost:8080/storage`  |
    /// | `PROVIDER_REGISTRY_PATH` | built-in registry                |
    /// | `MAX_CONCURRENT_JOBS`    | `4`                              |
    /// | `MAX_RETRIES`            | `3`                              |
    /// | `ANCHOR_MAX_ATTEMPTS`    | `3`                              |
    /// | `RETRY_BASE_DELAY_MS`    | `2000`                           |
    /// | `RETRY_MAX_DELAY_MS`     | `60000`                          |
    /// | `POLL_INTERVAL_MS`       | `5000`                           |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`.
    ///
    /// Panics on a missing `DATABASE_URL` or an unparsable number.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let database_url = lookup("DATABASE_URL").expect("DATABASE_URL must be set");

        let storage_root = lookup("STORAGE_ROOT")
            .unwrap_or_else(|| "./storage".into())
            .into();
        let storage_base_url =
            lookup("STORAGE_BASE_URL").unwrap_or_else(|| "http://localhost:8080/storage".into());
        let provider_registry_path = lookup("PROVIDER_REGISTRY_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let batch = BatchConfig {
            max_concurrent_jobs: parse_or(
                &lookup,
                "MAX_CONCURRENT_JOBS",
                batch::DEFAULT_MAX_CONCURRENT_JOBS,
            ),
            max_retries: parse_or(&lookup, "MAX_RETRIES", batch::DEFAULT_MAX_RETRIES),
            anchor_max_attempts: parse_or(
                &lookup,
                "ANCHOR_MAX_ATTEMPTS",
                batch::DEFAULT_ANCHOR_MAX_ATTEMPTS,
            ),
            retry_base_delay_ms: parse_or(
                &lookup,
                "RETRY_BASE_DELAY_MS",
                batch::DEFAULT_RETRY_BASE_DELAY_MS,
            ),
            retry_max_delay_ms: parse_or(
                &lookup,
                "RETRY_MAX_DELAY_MS",
                batch::DEFAULT_RETRY_MAX_DELAY_MS,
            ),
            poll_interval_ms: parse_or(&lookup, "POLL_INTERVAL_MS", batch::DEFAULT_POLL_INTERVAL_MS),
            ..BatchConfig::default()
        };

        Self {
            database_url,
            storage_root,
            storage_base_url,
            provider_registry_path,
            batch,
        }
    }
}

/// Where to reach one provider's HTTP API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl ProviderEndpoint {
    /// Read `PROVIDER_<ID>_URL` and `PROVIDER_<ID>_API_KEY`. `None` when
    /// no URL is configured.
    pub fn from_env(provider_id: &str) -> Option<Self> {
        Self::from_lookup(provider_id, |key| std::env::var(key).ok())
    }

    pub fn from_lookup(provider_id: &str, lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let prefix = env_prefix(provider_id);
        let base_url = lookup(&format!("{prefix}_URL")).filter(|u| !u.trim().is_empty())?;
        let api_key = lookup(&format!("{prefix}_API_KEY")).filter(|k| !k.is_empty());
        Some(Self { base_url, api_key })
    }
}

/// `PROVIDER_` followed by the id upper-cased, with anything outside
/// `[A-Z0-9]` replaced by `_`.
fn env_prefix(provider_id: &str) -> String {
    let id: String = provider_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("PROVIDER_{id}")
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Debug,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{key} must be a valid number: {e:?}")),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // -- WorkerConfig --

    #[test]
    fn defaults_apply_when_unset() {
        let env = vars(&[("DATABASE_URL", "postgres://localhost/shotline")]);
        let config = WorkerConfig::from_lookup(|k| env.get(k).cloned());

        assert_eq!(config.storage_root, PathBuf::from("./storage"));
        assert!(config.provider_registry_path.is_none());
        assert_eq!(config.batch, BatchConfig::default());
    }

    #[test]
    fn overrides_are_parsed() {
        let env = vars(&[
            ("DATABASE_URL", "postgres://db/shotline"),
            ("MAX_CONCURRENT_JOBS", "8"),
            ("MAX_RETRIES", " 5 "),
            ("RETRY_BASE_DELAY_MS", "500"),
            ("PROVIDER_REGISTRY_PATH", "/etc/shotline/providers.json"),
        ]);
        let config = WorkerConfig::from_lookup(|k| env.get(k).cloned());

        assert_eq!(config.batch.max_concurrent_jobs, 8);
        assert_eq!(config.batch.max_retries, 5);
        assert_eq!(config.batch.retry_base_delay_ms, 500);
        assert_eq!(
            config.provider_registry_path,
            Some(PathBuf::from("/etc/shotline/providers.json"))
        );
    }

    #[test]
    #[should_panic(expected = "MAX_RETRIES must be a valid number")]
    fn garbage_number_panics() {
        let env = vars(&[("DATABASE_URL", "postgres://db"), ("MAX_RETRIES", "three")]);
        WorkerConfig::from_lookup(|k| env.get(k).cloned());
    }

    // -- ProviderEndpoint --

    #[test]
    fn endpoint_keys_are_normalized() {
        assert_eq!(env_prefix("kling"), "PROVIDER_KLING");
        assert_eq!(env_prefix("runway-gen3"), "PROVIDER_RUNWAY_GEN3");
    }

    #[test]
    fn endpoint_requires_url() {
        let env = vars(&[
            ("PROVIDER_RUNWAY_GEN3_URL", "https://api.runway.test/v1"),
            ("PROVIDER_RUNWAY_GEN3_API_KEY", "secret"),
            ("PROVIDER_KLING_API_KEY", "orphan"),
        ]);
        let endpoint = ProviderEndpoint::from_lookup("runway-gen3", |k| env.get(k).cloned()).unwrap();
        assert_eq!(endpoint.base_url, "https://api.runway.test/v1");
        assert_eq!(endpoint.api_key.as_deref(), Some("secret"));
        assert!(ProviderEndpoint::from_lookup("kling", |k| env.get(k).cloned()).is_none());
    }
}
