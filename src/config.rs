//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `stockpulse.toml` files.

use crate::failover::FailoverConfig;
use crate::models::Operation;
use crate::provider::http::CodeStyle;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "stockpulse.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Retry and circuit breaker settings.
    #[serde(default)]
    pub failover: FailoverSettings,

    /// Group analysis settings.
    #[serde(default)]
    pub analysis: AnalysisSettings,

    /// Known index codes and their display names.
    #[serde(default = "default_indices")]
    pub indices: BTreeMap<String, String>,

    /// Upstream providers in priority order.
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            failover: FailoverSettings::default(),
            analysis: AnalysisSettings::default(),
            indices: default_indices(),
            providers: default_providers(),
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Write reports to this file instead of stdout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverSettings {
    /// Attempts per provider per call.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause between attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Consecutive failed calls before a provider is skipped.
    #[serde(default = "default_circuit_open_threshold")]
    pub circuit_open_threshold: u32,
}

impl Default for FailoverSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            circuit_open_threshold: default_circuit_open_threshold(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_circuit_open_threshold() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// How long a group summary stays fresh.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    /// Members analyzed per group (0 = all).
    #[serde(default = "default_member_limit")]
    pub member_limit: usize,

    /// Member analyses in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Deadline for a single member analysis (0 = none).
    #[serde(default = "default_member_timeout")]
    pub member_timeout_seconds: u64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: default_cache_ttl(),
            member_limit: default_member_limit(),
            concurrency: default_concurrency(),
            member_timeout_seconds: default_member_timeout(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_member_limit() -> usize {
    30
}

fn default_concurrency() -> usize {
    8
}

fn default_member_timeout() -> u64 {
    30
}

fn default_indices() -> BTreeMap<String, String> {
    [
        ("000300", "CSI 300"),
        ("000905", "CSI 500"),
        ("000852", "CSI 1000"),
        ("000001", "SSE Composite"),
        ("000016", "SSE 50"),
    ]
    .into_iter()
    .map(|(code, name)| (code.to_string(), name.to_string()))
    .collect()
}

/// One upstream HTTP provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider name.
    pub name: String,

    /// Gateway root URL.
    pub base_url: String,

    /// How this vendor spells entity codes.
    #[serde(default)]
    pub code_style: CodeStyle,

    /// Send dates as `YYYYMMDD` instead of `YYYY-MM-DD`.
    #[serde(default)]
    pub compact_dates: bool,

    /// Failover operations this provider serves.
    #[serde(default = "default_operations")]
    pub operations: Vec<Operation>,

    /// Exclusive extensions: `boards`, `capital_flow`.
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Log in before the first request and log out on shutdown.
    #[serde(default)]
    pub session: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_provider_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_url: String::new(),
            code_style: CodeStyle::default(),
            compact_dates: false,
            operations: default_operations(),
            extensions: Vec::new(),
            session: false,
            timeout_seconds: default_provider_timeout(),
        }
    }
}

fn default_operations() -> Vec<Operation> {
    Operation::FAILOVER.to_vec()
}

fn default_provider_timeout() -> u64 {
    15
}

const KNOWN_EXTENSIONS: [&str; 2] = ["boards", "capital_flow"];

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            name: "primary".to_string(),
            base_url: "http://127.0.0.1:8600".to_string(),
            compact_dates: true,
            extensions: KNOWN_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            ..ProviderConfig::default()
        },
        ProviderConfig {
            name: "fallback".to_string(),
            base_url: "http://127.0.0.1:8601".to_string(),
            code_style: CodeStyle::Dotted,
            session: true,
            ..ProviderConfig::default()
        },
    ]
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
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(retries) = args.max_retries {
            self.failover.max_retries = retries;
        }
        if let Some(concurrency) = args.concurrency {
            self.analysis.concurrency = concurrency;
        }
        if let Some(ttl) = args.cache_ttl {
            self.analysis.cache_ttl_seconds = ttl;
        }
        if let Some(timeout) = args.member_timeout {
            self.analysis.member_timeout_seconds = timeout;
        }
        if let Some(ref output) = args.output {
            self.general.output = Some(output.clone());
        }
    }

    /// Check values a parser cannot catch.
    pub fn validate(&self) -> Result<()> {
        if self.failover.max_retries == 0 {
            bail!("failover.max_retries must be at least 1");
        }
        if self.failover.circuit_open_threshold == 0 {
            bail!("failover.circuit_open_threshold must be at least 1");
        }
        if self.analysis.concurrency == 0 {
            bail!("analysis.concurrency must be at least 1");
        }
        if self.providers.is_empty() {
            bail!("At least one [[providers]] entry is required");
        }

        let mut names = HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                bail!("Provider name must not be empty");
            }
            if !names.insert(provider.name.as_str()) {
                bail!("Duplicate provider name: {}", provider.name);
            }
            if !provider.base_url.starts_with("http://") && !provider.base_url.starts_with("https://")
            {
                bail!(
                    "Provider {} base_url must start with 'http://' or 'https://'",
                    provider.name
                );
            }
            if let Some(unknown) = provider
                .extensions
                .iter()
                .find(|e| !KNOWN_EXTENSIONS.contains(&e.as_str()))
            {
                bail!("Provider {} has unknown extension: {}", provider.name, unknown);
            }
        }

        Ok(())
    }

    pub fn failover_config(&self) -> FailoverConfig {
        FailoverConfig {
            max_retries: self.failover.max_retries,
            retry_delay: Duration::from_millis(self.failover.retry_delay_ms),
            circuit_open_threshold: self.failover.circuit_open_threshold,
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
