//! Configuration system (layered: defaults > TOML file > environment).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::retry::{RetryConfig, RetryPreset};
use crate::error::RunlineError;
use crate::tools::safety::{DEFAULT_TOOL_MAX_RETRIES, DEFAULT_TOOL_TIMEOUT_MS};
use crate::tools::{PathSandbox, SafetyPolicy};

const ENV_BASE_URL: &str = "RUNLINE_BASE_URL";
const ENV_TOOL_TIMEOUT_MS: &str = "RUNLINE_TOOL_TIMEOUT_MS";
const ENV_TOOL_MAX_RETRIES: &str = "RUNLINE_TOOL_MAX_RETRIES";
const ENV_ALLOWED_PATHS: &str = "RUNLINE_ALLOWED_PATHS";
const ENV_RETRY_PRESET: &str = "RUNLINE_RETRY_PRESET";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunlineConfig {
    /// Backend root used by the request client and run client.
    pub base_url: String,
    /// Path of the streaming execution endpoint.
    pub execute_path: String,
    /// Per-attempt HTTP timeout.
    pub request_timeout_ms: u64,
    pub tool: ToolSettings,
    pub retry: RetrySettings,
}

/// Safety policy settings for wrapped tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub allowed_path_prefixes: Vec<String>,
}

/// Request retry settings: a preset plus optional overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub preset: RetryPreset,
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub jitter: Option<bool>,
}

impl Default for RunlineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            execute_path: "/api/execute".to_string(),
            request_timeout_ms: 30_000,
            tool: ToolSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
            max_retries: DEFAULT_TOOL_MAX_RETRIES,
            allowed_path_prefixes: Vec::new(),
        }
    }
}

impl RunlineConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, RunlineError> {
        toml::from_str(source).map_err(|e| RunlineError::Configuration(e.to_string()))
    }

    /// Read a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RunlineError> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }

    /// Default config file location (`<config dir>/runline/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "runline")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load defaults, then the file at `path` (or the default location if
    /// present), then environment overrides (including `.env`).
    pub fn load(path: Option<&Path>) -> Result<Self, RunlineError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(path)?,
                None => Self::default(),
            },
        };
        let _ = dotenvy::dotenv();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, RunlineError> {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), RunlineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(raw) = lookup(ENV_TOOL_TIMEOUT_MS) {
            self.tool.timeout_ms = parse_env(ENV_TOOL_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_TOOL_MAX_RETRIES) {
            self.tool.max_retries = parse_env(ENV_TOOL_MAX_RETRIES, &raw)?;
        }
        if let Some(raw) = lookup(ENV_ALLOWED_PATHS) {
            self.tool.allowed_path_prefixes = raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(raw) = lookup(ENV_RETRY_PRESET) {
            self.retry.preset = parse_env(ENV_RETRY_PRESET, &raw)?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Full URL of the execution endpoint.
    pub fn execute_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.execute_path.trim_start_matches('/')
        )
    }

    /// Safety policy for wrapped tools (accepting any input).
    pub fn safety_policy(&self) -> SafetyPolicy {
        SafetyPolicy::builder()
            .timeout(Duration::from_millis(self.tool.timeout_ms))
            .max_retries(self.tool.max_retries)
            .sandbox(PathSandbox::new(&self.tool.allowed_path_prefixes))
            .build()
    }

    /// Request retry configuration: preset, then overrides.
    pub fn retry_config(&self) -> RetryConfig {
        let settings = &self.retry;
        let mut config = RetryConfig::preset(settings.preset);
        if let Some(max_attempts) = settings.max_attempts {
            config.max_attempts = max_attempts;
        }
        if let Some(ms) = settings.initial_delay_ms {
            config.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = settings.max_delay_ms {
            config.max_delay = Duration::from_millis(ms);
        }
        if let Some(multiplier) = settings.multiplier {
            config.multiplier = multiplier;
        }
        if let Some(jitter) = settings.jitter {
            config.jitter = jitter;
        }
        config
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, RunlineError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| RunlineError::Configuration(format!("{key}={raw}: {e}")))
}
