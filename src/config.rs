//! Startup configuration: the static provider set and policy tunables.
//!
//! Configuration is read once from a TOML document (or built in code)
//! and handed to `registry::populate`. Unknown keys are tolerated but
//! warned about, so a typo in a tunable does not silently fall back to
//! a default.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::breaker::BreakerConfig;
use crate::resources::ResourceThresholds;
use crate::retry::BackoffPolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Whether a configured provider should be activated.
#[derive(Deserialize, Serialize, Default, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivationPolicy {
    /// Activate when the prerequisites (API key, reachable server)
    /// are present; skip quietly otherwise.
    #[default]
    Auto,
    /// Activate unconditionally; missing prerequisites are an error.
    Enabled,
    /// Never activate.
    Disabled,
}

#[derive(Deserialize, Serialize, Default, Debug)]
pub struct OpenAIConfig {
    #[serde(default)]
    pub activate: ActivationPolicy,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    /// Embedding model id, e.g. `text-embedding-3-large`.
    pub model: Option<String>,
    pub dimension: Option<usize>,
    pub cost_per_token: Option<f64>,
    pub max_batch_size: Option<usize>,
}

#[derive(Deserialize, Serialize, Default, Debug)]
pub struct OllamaConfig {
    #[serde(default)]
    pub activate: ActivationPolicy,
    pub api_base: Option<String>,
    /// Embedding model id, e.g. `nomic-embed-text`.
    pub model: Option<String>,
    pub dimension: Option<usize>,
    pub max_batch_size: Option<usize>,
}

#[derive(Deserialize, Serialize, Default, Debug)]
pub struct LocalConfig {
    #[serde(default)]
    pub activate: ActivationPolicy,
    /// Identifier the registered engine provider appears under.
    pub id: Option<String>,
    pub name: Option<String>,
    pub max_batch_size: Option<usize>,
}

#[derive(Deserialize, Serialize, Default, Debug)]
pub struct Providers {
    #[serde(default)]
    pub openai: OpenAIConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub local: LocalConfig,
}

#[derive(Deserialize, Serialize, Debug)]
#[serde(default)]
pub struct BreakerSection {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub max_cooldown_secs: u64,
}

impl Default for BreakerSection {
    fn default() -> BreakerSection {
        let defaults = BreakerConfig::default();

        BreakerSection {
            failure_threshold: defaults.failure_threshold,
            cooldown_secs: defaults.cooldown.as_secs(),
            max_cooldown_secs: defaults.max_cooldown.as_secs(),
        }
    }
}

impl BreakerSection {
    pub fn to_breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_secs(self.cooldown_secs),
            max_cooldown: Duration::from_secs(self.max_cooldown_secs),
        }
    }
}

#[derive(Deserialize, Serialize, Debug)]
#[serde(default)]
pub struct BackoffSection {
    pub base_ms: u64,
    pub max_ms: u64,
    pub max_attempts: u32,
    pub default_retry_after_ms: u64,
}

impl Default for BackoffSection {
    fn default() -> BackoffSection {
        let defaults = BackoffPolicy::default();

        BackoffSection {
            base_ms: defaults.base.as_millis() as u64,
            max_ms: defaults.max.as_millis() as u64,
            max_attempts: defaults.max_attempts,
            default_retry_after_ms: defaults.default_retry_after.as_millis() as u64,
        }
    }
}

impl BackoffSection {
    pub fn to_backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.base_ms),
            max: Duration::from_millis(self.max_ms),
            max_attempts: self.max_attempts,
            default_retry_after: Duration::from_millis(self.default_retry_after_ms),
        }
    }
}

#[derive(Deserialize, Serialize, Debug)]
#[serde(default)]
pub struct ResourceSection {
    pub min_disk_free_bytes: u64,
    pub min_mem_free_bytes: u64,
    pub sample_interval_secs: u64,
    pub staleness_ttl_secs: u64,
}

impl Default for ResourceSection {
    fn default() -> ResourceSection {
        let thresholds = ResourceThresholds::default();

        ResourceSection {
            min_disk_free_bytes: thresholds.min_disk_free,
            min_mem_free_bytes: thresholds.min_mem_free,
            sample_interval_secs: 30,
            staleness_ttl_secs: 60,
        }
    }
}

impl ResourceSection {
    pub fn to_thresholds(&self) -> ResourceThresholds {
        ResourceThresholds {
            min_disk_free: self.min_disk_free_bytes,
            min_mem_free: self.min_mem_free_bytes,
        }
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn staleness_ttl(&self) -> Duration {
        Duration::from_secs(self.staleness_ttl_secs)
    }
}

#[derive(Deserialize, Serialize, Debug)]
#[serde(default)]
pub struct Policy {
    pub breaker: BreakerSection,
    pub backoff: BackoffSection,
    pub resources: ResourceSection,
    pub health_check_interval_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for Policy {
    fn default() -> Policy {
        Policy {
            breaker: BreakerSection::default(),
            backoff: BackoffSection::default(),
            resources: ResourceSection::default(),
            health_check_interval_secs: 300,
            request_timeout_secs: 120,
        }
    }
}

impl Policy {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Deserialize, Serialize, Default, Debug)]
pub struct Config {
    #[serde(default)]
    pub providers: Providers,
    #[serde(default)]
    pub policy: Policy,
}

fn warn_on_extra_fields_helper<'a>(
    path: &mut Vec<&'a String>,
    user_config: &'a toml::Table,
    config: &'a toml::Table,
) {
    for (user_key, user_value) in user_config {
        path.push(user_key);

        if let Some(config_value) = config.get(user_key) {
            if let (toml::Value::Table(user_value), toml::Value::Table(config_value)) =
                (user_value, config_value)
            {
                warn_on_extra_fields_helper(path, user_value, config_value);
            }
        } else {
            let path: Vec<&str> = path.iter().map(|&s| s.as_str()).collect();

            warn!(key = path.join("."), "config contains extraneous key, ignoring");
        }

        path.pop();
    }
}

fn warn_on_extra_fields(config: &Config, raw_config: &str) -> Result<(), ConfigError> {
    let user_config: toml::Table = toml::de::from_str(raw_config)?;

    let config: toml::Table = {
        let reserialized = toml::ser::to_string(&config)
            .unwrap_or_else(|_| panic!("the default-populated config must reserialize"));

        toml::de::from_str(&reserialized)?
    };

    let mut path = Vec::new();

    warn_on_extra_fields_helper(&mut path, &user_config, &config);

    Ok(())
}

impl Config {
    /// Parse a TOML document, warning about unknown keys.
    pub fn from_toml_str(raw_config: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::de::from_str(raw_config)?;

        warn_on_extra_fields(&config, raw_config)?;

        Ok(config)
    }

    /// Read and parse the config file at `path`.
    pub fn load(path: &PathBuf) -> Result<Config, ConfigError> {
        let raw_config = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        Self::from_toml_str(&raw_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();

        assert_eq!(config.policy.breaker.failure_threshold, 5);
        assert_eq!(config.policy.breaker.cooldown_secs, 30);
        assert_eq!(config.policy.backoff.base_ms, 250);
        assert_eq!(config.policy.backoff.max_ms, 30_000);
        assert_eq!(config.policy.backoff.max_attempts, 4);
        assert_eq!(
            config.policy.resources.min_disk_free_bytes,
            500 * 1024 * 1024
        );
        assert_eq!(
            config.policy.resources.min_mem_free_bytes,
            200 * 1024 * 1024
        );
        assert_eq!(config.policy.health_check_interval_secs, 300);
        assert_eq!(config.providers.openai.activate, ActivationPolicy::Auto);
    }

    #[test]
    fn provider_tables_parse() {
        let config = Config::from_toml_str(
            r#"
            [providers.openai]
            activate = "enabled"
            api_key = "sk-test"
            model = "text-embedding-3-large"
            dimension = 3072
            cost_per_token = 0.00000013

            [providers.ollama]
            activate = "disabled"

            [policy.breaker]
            failure_threshold = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.providers.openai.activate, ActivationPolicy::Enabled);
        assert_eq!(config.providers.openai.dimension, Some(3072));
        assert_eq!(config.providers.ollama.activate, ActivationPolicy::Disabled);
        assert_eq!(config.policy.breaker.failure_threshold, 3);
        // Untouched sections keep their defaults.
        assert_eq!(config.policy.breaker.cooldown_secs, 30);
    }

    #[test]
    fn malformed_documents_are_rejected() {
        assert!(Config::from_toml_str("providers = 3").is_err());
    }
}
