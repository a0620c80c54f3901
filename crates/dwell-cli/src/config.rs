//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dwell_core::{ResumePolicy, TrackerConfig};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Model used for project suggestions unless configured otherwise.
pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Anthropic API key for project suggestions.
    pub api_key: Option<String>,
    /// Model used for project suggestions.
    pub model: String,
    #[serde(default)]
    pub tracking: TrackingSettings,
}

/// The `[tracking]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    pub guard_interval_secs: u64,
    pub timeout_secs: u64,
    pub resume_policy: ResumePolicy,
    pub ai_categorization: bool,
    pub persist_attempts: u32,
    pub suggestion_cache_size: usize,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        let defaults = TrackerConfig::default();
        Self {
            guard_interval_secs: defaults.guard_interval.as_secs(),
            timeout_secs: defaults.timeout_threshold.as_secs(),
            resume_policy: defaults.resume_policy,
            ai_categorization: defaults.ai_categorization,
            persist_attempts: defaults.persist_attempts,
            suggestion_cache_size: 256,
        }
    }
}

impl TrackingSettings {
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            guard_interval: Duration::from_secs(self.guard_interval_secs.max(1)),
            timeout_threshold: Duration::from_secs(self.timeout_secs),
            resume_policy: self.resume_policy,
            ai_categorization: self.ai_categorization,
            persist_attempts: self.persist_attempts.max(1),
            ..TrackerConfig::default()
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("tracking", &self.tracking)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("dwell.db"),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            tracking: TrackingSettings::default(),
        }
    }
}

impl Config {
    /// Loads configuration from default locations.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally from a specific file.
    ///
    /// Later sources win: defaults, then `config.toml` in the config
    /// directory, then `config_path`, then `DWELL_*` environment variables.
    /// Nested keys use a double underscore, as in
    /// `DWELL_TRACKING__TIMEOUT_SECS`.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("DWELL_").split("__"));

        figment.extract()
    }
}

/// Returns the platform-specific config directory for dwell.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("dwell"))
}

/// Returns the platform-specific data directory for dwell.
///
/// On Linux: `~/.local/share/dwell`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("dwell"))
}
