use crate::workflow::policy::{PollPolicy, WorkflowPolicy};
use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SETTINGS_FILE: &str = "attempt-runner.toml";
pub const ENV_PREFIX: &str = "ATTEMPT_RUNNER";

/// Dedicated proxy variable, checked before the conventional ones
pub const PROXY_ENV_KEY: &str = "ATTEMPT_RUNNER_PROXY_URL";

/// Conventional proxy variables, in lookup order
pub const DEFAULT_PROXY_ENV_KEYS: [&str; 6] = [
    "HTTPS_PROXY",
    "https_proxy",
    "HTTP_PROXY",
    "http_proxy",
    "ALL_PROXY",
    "all_proxy",
];

/// Main configuration structure, layered from defaults, file and environment
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerSettings {
    /// Run sizing and output locations
    pub run: RunSettings,
    /// Stage retry budgets
    pub workflow: WorkflowSettings,
    /// Logging settings
    pub observability: ObservabilitySettings,
    /// Behaviour of the in-process simulation backend
    pub simulation: SimulationSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunSettings {
    pub workers: usize,
    pub target: u64,
    /// Unset means `compute_effective_max_attempts` decides
    pub max_attempts: Option<i64>,
    /// Keep the resource of a successful attempt instead of releasing it
    pub keep_success_resource: bool,
    pub output_dir: String,
    pub metrics_dir: String,
    /// Proxy URL handed to collaborators; falls back to the proxy
    /// environment variables when unset
    pub proxy: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowSettings {
    pub code_request_rounds: u32,
    pub code_polls_per_round: u32,
    pub code_poll_interval_ms: u64,
    pub max_code_cycles: u32,
    pub submit_retries: u32,
    pub challenge_polls: u32,
    pub challenge_poll_interval_ms: u64,
    pub submit_retry_delay_ms: u64,
    pub attempt_backoff_ms: u64,
    pub startup_jitter_ms: u64,
    /// 0 disables the submission throttle
    pub submit_per_second: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilitySettings {
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationSettings {
    pub landing_url: String,
    pub code_delivery_rate: f64,
    pub verify_accept_rate: f64,
    pub challenge_solve_rate: f64,
    pub code_invalid_rate: f64,
    pub submit_accept_rate: f64,
    pub action_supported_rate: f64,
    pub latency_ms: u64,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            code_request_rounds: 3,
            code_polls_per_round: 180,
            code_poll_interval_ms: 1_000,
            max_code_cycles: 3,
            submit_retries: 3,
            challenge_polls: 35,
            challenge_poll_interval_ms: 2_000,
            submit_retry_delay_ms: 3_000,
            attempt_backoff_ms: 5_000,
            startup_jitter_ms: 5_000,
            submit_per_second: 0,
        }
    }
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            landing_url: "https://signup.example.test/sign-up".to_string(),
            code_delivery_rate: 0.9,
            verify_accept_rate: 0.95,
            challenge_solve_rate: 0.85,
            code_invalid_rate: 0.05,
            submit_accept_rate: 0.9,
            action_supported_rate: 0.8,
            latency_ms: 20,
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            run: RunSettings {
                workers: 8,
                target: 100,
                max_attempts: None,
                keep_success_resource: false,
                output_dir: "output".to_string(),
                metrics_dir: "logs".to_string(),
                proxy: None,
            },
            workflow: WorkflowSettings::default(),
            observability: ObservabilitySettings {
                log_level: "info".to_string(),
            },
            simulation: SimulationSettings::default(),
        }
    }
}

impl WorkflowSettings {
    pub fn to_policy(&self) -> WorkflowPolicy {
        WorkflowPolicy {
            credential: PollPolicy::new(
                self.code_request_rounds,
                self.code_polls_per_round,
                Duration::from_millis(self.code_poll_interval_ms),
            ),
            challenge: PollPolicy::new(
                self.submit_retries,
                self.challenge_polls,
                Duration::from_millis(self.challenge_poll_interval_ms),
            ),
            max_code_cycles: self.max_code_cycles.max(1),
            submit_retry_delay: Duration::from_millis(self.submit_retry_delay_ms),
            attempt_backoff: Duration::from_millis(self.attempt_backoff_ms),
            startup_jitter: Duration::from_millis(self.startup_jitter_ms),
            submit_per_second: (self.submit_per_second > 0).then_some(self.submit_per_second),
        }
    }
}

impl RunnerSettings {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (attempt-runner.toml)
    /// 3. Environment variables (ATTEMPT_RUNNER__SECTION__KEY)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(SETTINGS_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&RunnerSettings::default())?);

        if path.exists() {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings: RunnerSettings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Immutable per-run configuration shared read-only by all workers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub worker_count: usize,
    pub target_successes: u64,
    pub max_attempts: u64,
    pub keep_successful_resource: bool,
    pub output_path: PathBuf,
    pub metrics_path: PathBuf,
    pub proxy: Option<String>,
}

/// Command-line values that take precedence over settings
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub workers: Option<usize>,
    pub target: Option<u64>,
    pub max_attempts: Option<i64>,
    pub metrics_file: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
    pub keep_success_resource: Option<bool>,
}

impl RunConfig {
    pub fn resolve(settings: &RunSettings, overrides: RunOverrides) -> Self {
        let worker_count = overrides.workers.unwrap_or(settings.workers).max(1);
        let target_successes = overrides.target.unwrap_or(settings.target).max(1);
        let max_attempts = compute_effective_max_attempts(
            target_successes,
            overrides.max_attempts.or(settings.max_attempts),
        );

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let output_path = overrides.output_file.unwrap_or_else(|| {
            Path::new(&settings.output_dir).join(format!("successes_{stamp}_{target_successes}.txt"))
        });
        let metrics_path = overrides
            .metrics_file
            .unwrap_or_else(|| Path::new(&settings.metrics_dir).join(format!("metrics.{stamp}.jsonl")));

        Self {
            worker_count,
            target_successes,
            max_attempts,
            keep_successful_resource: overrides
                .keep_success_resource
                .unwrap_or(settings.keep_success_resource),
            output_path,
            metrics_path,
            proxy: resolve_proxy_url(settings.proxy.as_deref()),
        }
    }
}

/// First non-empty proxy URL: the configured value, then `PROXY_ENV_KEY`,
/// then `DEFAULT_PROXY_ENV_KEYS`.
pub fn resolve_proxy_url(configured: Option<&str>) -> Option<String> {
    resolve_proxy_url_with(configured, |key| std::env::var(key).ok())
}

/// `resolve_proxy_url` over an arbitrary variable lookup
pub fn resolve_proxy_url_with<F>(configured: Option<&str>, lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = configured.map(str::trim).filter(|v| !v.is_empty()) {
        return Some(value.to_string());
    }
    std::iter::once(PROXY_ENV_KEY)
        .chain(DEFAULT_PROXY_ENV_KEYS)
        .filter_map(lookup)
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

/// Attempt budget: `max(target * 4, target + 10)` unless given explicitly;
/// explicit values are clamped to at least 1.
pub fn compute_effective_max_attempts(target: u64, max_attempts: Option<i64>) -> u64 {
    let target = target.max(1);
    match max_attempts {
        None => (target.saturating_mul(4)).max(target.saturating_add(10)),
        Some(provided) => provided.max(1) as u64,
    }
}
