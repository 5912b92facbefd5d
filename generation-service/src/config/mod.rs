use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::retry::RetryPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.replicate.com/v1";
pub const DEFAULT_BASE_MODEL: &str = "google/nano-banana";
pub const DEFAULT_UPSCALER_MODEL: &str = "recraft-ai/recraft-crisp-upscale";
pub const DEFAULT_USER_AGENT: &str = "streetview-archive/1.0";

/// Timeout for downloading the final image.
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub common: core_config::Config,
    pub replicate: ReplicateConfig,
    pub fetch_timeout_secs: u64,
    /// Allowed CORS origin. `None` allows any origin.
    pub cors_origin: Option<String>,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct ReplicateConfig {
    /// Checked per request; the service starts without it.
    pub api_token: Option<Secret<String>>,
    pub api_base: String,
    pub base_model: String,
    pub upscaler_model: String,
    pub user_agent: String,
    pub poll_interval_ms: u64,
    /// Upper bound on how long a single prediction may stay pending.
    pub prediction_timeout_secs: u64,
    /// Per HTTP request timeout for calls to the Replicate API.
    pub request_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            replicate: ReplicateConfig::default(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            cors_origin: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl Default for ReplicateConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            api_base: DEFAULT_API_BASE.to_string(),
            base_model: DEFAULT_BASE_MODEL.to_string(),
            upscaler_model: DEFAULT_UPSCALER_MODEL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            poll_interval_ms: 500,
            prediction_timeout_secs: 300,
            request_timeout_secs: 120,
        }
    }
}

impl GenerationConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let defaults = ReplicateConfig::default();

        let mut retry = RetryPolicy::default();
        if let Some(delays) = optional_env("GENERATION_RETRY_DELAYS_MS") {
            retry.delays = parse_list::<u64>("GENERATION_RETRY_DELAYS_MS", &delays)?
                .into_iter()
                .map(Duration::from_millis)
                .collect();
        }
        if let Some(markers) = optional_env("GENERATION_RETRYABLE_MARKERS") {
            retry.retryable_markers =
                parse_list::<String>("GENERATION_RETRYABLE_MARKERS", &markers)?
                    .into_iter()
                    .map(|m| m.to_lowercase())
                    .collect();
        }

        Ok(GenerationConfig {
            common,
            replicate: ReplicateConfig {
                api_token: optional_env("REPLICATE_API_TOKEN").map(Secret::new),
                api_base: get_env("REPLICATE_API_BASE", &defaults.api_base),
                base_model: get_env("GENERATION_BASE_MODEL", &defaults.base_model),
                upscaler_model: get_env("GENERATION_UPSCALER_MODEL", &defaults.upscaler_model),
                user_agent: get_env("GENERATION_USER_AGENT", &defaults.user_agent),
                poll_interval_ms: parse_env(
                    "REPLICATE_POLL_INTERVAL_MS",
                    defaults.poll_interval_ms,
                )?,
                prediction_timeout_secs: parse_env(
                    "REPLICATE_PREDICTION_TIMEOUT_SECS",
                    defaults.prediction_timeout_secs,
                )?,
                request_timeout_secs: parse_env(
                    "REPLICATE_REQUEST_TIMEOUT_SECS",
                    defaults.request_timeout_secs,
                )?,
            },
            fetch_timeout_secs: parse_env(
                "GENERATION_FETCH_TIMEOUT_SECS",
                DEFAULT_FETCH_TIMEOUT_SECS,
            )?,
            cors_origin: optional_env("CORS_ORIGIN"),
            retry,
        })
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Non-empty value of an environment variable.
fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn get_env(key: &str, default: &str) -> String {
    optional_env(key).unwrap_or_else(|| default.to_string())
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, AppError>
where
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        Some(raw) => raw.trim().parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e))
        }),
        None => Ok(default),
    }
}

fn parse_list<T: FromStr>(key: &str, raw: &str) -> Result<Vec<T>, AppError>
where
    T::Err: std::fmt::Display,
{
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!(
                    "{} has invalid entry '{}': {}",
                    key,
                    item,
                    e
                ))
            })
        })
        .collect()
}
