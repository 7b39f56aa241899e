//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.pr-watcher.toml` files.

use crate::models::{AgentSpec, Category, Methodology};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default config file name, looked up in the current directory.
pub const CONFIG_FILE: &str = ".pr-watcher.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Search API settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Additional agents tracked on top of the built-in registry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<AgentEntry>,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Path of the JSONL history file.
    #[serde(default = "default_history_path")]
    pub history_path: String,

    /// Path of the rendered report.
    #[serde(default = "default_report_output")]
    pub report_output: String,

    /// Rate definition applied to new snapshots.
    #[serde(default)]
    pub methodology: Methodology,

    /// Deadline for one complete collection run.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_seconds: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            history_path: default_history_path(),
            report_output: default_report_output(),
            methodology: Methodology::default(),
            run_timeout_seconds: default_run_timeout(),
        }
    }
}

fn default_history_path() -> String {
    "history.jsonl".to_string()
}

fn default_report_output() -> String {
    "README_STATS.md".to_string()
}

fn default_run_timeout() -> u64 {
    600
}

/// Search API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Base URL of the GitHub REST API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Attempts per count query, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay; doubles on every further attempt.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound for a single retry delay.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Search request budget. Unset means 10/min anonymous, 30/min with a token.
    #[serde(default)]
    pub requests_per_minute: Option<u32>,

    /// Maximum count queries in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// User-Agent header sent to GitHub.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            timeout_seconds: default_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            requests_per_minute: None,
            concurrency: default_concurrency(),
            user_agent: default_user_agent(),
        }
    }
}

impl SearchConfig {
    /// Effective request budget per minute.
    pub fn effective_requests_per_minute(&self, authenticated: bool) -> u32 {
        match self.requests_per_minute {
            Some(rpm) => rpm.max(1),
            None if authenticated => 30,
            None => 10,
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    2_000
}

fn default_max_backoff() -> u64 {
    60_000
}

fn default_concurrency() -> usize {
    4
}

fn default_user_agent() -> String {
    "PR-Watcher".to_string()
}

/// An agent declared in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEntry {
    pub key: String,
    pub display_name: String,
    #[serde(default)]
    pub total: Option<String>,
    #[serde(default)]
    pub ready: Option<String>,
    #[serde(default)]
    pub merged: Option<String>,
}

impl AgentEntry {
    pub fn to_spec(&self) -> AgentSpec {
        let mut spec = AgentSpec::new(&self.key, &self.display_name);
        let queries = [
            (Category::Total, &self.total),
            (Category::Ready, &self.ready),
            (Category::Merged, &self.merged),
        ];
        for (category, query) in queries {
            if let Some(query) = query {
                spec = spec.with(category, query.clone());
            }
        }
        spec
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref history) = args.history {
            self.general.history_path = history.display().to_string();
        }
        if let Some(ref output) = args.output {
            self.general.report_output = output.display().to_string();
        }
        if let Some(methodology) = args.methodology {
            self.general.methodology = methodology.into();
        }
        if let Some(timeout) = args.timeout {
            self.general.run_timeout_seconds = timeout;
        }

        if let Some(ref api_url) = args.api_url {
            self.search.api_url = api_url.clone();
        }
        if let Some(concurrency) = args.concurrency {
            self.search.concurrency = concurrency;
        }
        if let Some(max_attempts) = args.max_attempts {
            self.search.max_attempts = max_attempts;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
