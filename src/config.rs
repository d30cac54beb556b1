//! Configuration file → provider catalog and run limits.
//!
//! ```yaml
//! max_concurrent_providers: 8
//! probe:
//!   prompt: "What is 2+2?"
//!   response_timeout_secs: 30
//! providers:
//!   - id: openai
//!     base_url: https://api.openai.com/v1
//!     api_key_env: OPENAI_API_KEY
//!     max_concurrency: 4
//!   - id: claude
//!     family: anthropic
//!     base_url: https://api.anthropic.com/v1
//!     api_key_env: ANTHROPIC_API_KEY
//! ```

use reqwest::Url;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::catalog::{ProbeLimits, Provider, ProviderCatalog, ProviderFamily, Secret};
use crate::probe::ProbeOptions;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("provider entry has an empty id")]
    EmptyId,

    #[error("duplicate provider id '{0}'")]
    DuplicateId(String),

    #[error("provider '{id}': base_url '{url}' is not a valid absolute URL")]
    InvalidBaseUrl { id: String, url: String },

    #[error("{0} must be greater than zero")]
    ZeroLimit(String),

    #[error("cannot determine a home directory for the default data dir")]
    NoHomeDir,
}

fn default_max_concurrent_providers() -> usize { 8 }
fn default_prompt() -> String { "What is 2+2?".into() }
fn default_max_tokens() -> u32 { 16 }
fn default_discovery_timeout() -> u64 { 10 }
fn default_existence_timeout() -> u64 { 10 }
fn default_response_timeout() -> u64 { 30 }
fn default_provider_concurrency() -> usize { 2 }
fn default_true() -> bool { true }

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Where the database lives by default. `~/.model-verifier` if unset.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub database: Option<PathBuf>,
    /// External model metadata (prices, capabilities, release dates).
    #[serde(default)]
    pub metadata_file: Option<PathBuf>,
    #[serde(default = "default_max_concurrent_providers")]
    pub max_concurrent_providers: usize,
    #[serde(default)]
    pub probe: ProbeSettings,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeSettings {
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_secs: u64,
    #[serde(default = "default_existence_timeout")]
    pub existence_timeout_secs: u64,
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            prompt: default_prompt(),
            max_tokens: default_max_tokens(),
            discovery_timeout_secs: default_discovery_timeout(),
            existence_timeout_secs: default_existence_timeout(),
            response_timeout_secs: default_response_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub base_url: String,
    #[serde(default)]
    pub family: ProviderFamily,
    /// Name of the environment variable holding the key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Inline key. Prefer `api_key_env`.
    #[serde(default)]
    pub api_key: Option<Secret>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_provider_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub response_timeout_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub model_lookup: bool,
    #[serde(default = "default_true")]
    pub streaming: bool,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_providers == 0 {
            return Err(ConfigError::ZeroLimit("max_concurrent_providers".into()));
        }
        if self.probe.discovery_timeout_secs == 0
            || self.probe.existence_timeout_secs == 0
            || self.probe.response_timeout_secs == 0
        {
            return Err(ConfigError::ZeroLimit("probe timeouts".into()));
        }

        let mut seen = HashSet::new();
        for p in &self.providers {
            if p.id.trim().is_empty() {
                return Err(ConfigError::EmptyId);
            }
            if !seen.insert(p.id.as_str()) {
                return Err(ConfigError::DuplicateId(p.id.clone()));
            }
            parse_base_url(&p.id, &p.base_url)?;
            if p.max_concurrency == 0 {
                return Err(ConfigError::ZeroLimit(format!("providers.{}.max_concurrency", p.id)));
            }
            if p.response_timeout_secs == Some(0) {
                return Err(ConfigError::ZeroLimit(format!("providers.{}.response_timeout_secs", p.id)));
            }
        }
        Ok(())
    }

    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_data_dir(),
        }
    }

    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database {
            Some(db) => Ok(db.clone()),
            None => Ok(self.data_dir()?.join("verifier.db")),
        }
    }

    pub fn probe_options(&self) -> ProbeOptions {
        ProbeOptions {
            prompt: self.probe.prompt.clone(),
            max_tokens: self.probe.max_tokens,
        }
    }

    /// Resolve credentials and build the immutable catalog.
    ///
    /// A provider whose credential cannot be resolved is kept, but marked
    /// inactive so it never enters a run.
    pub fn build_catalog(&self) -> Result<ProviderCatalog, ConfigError> {
        self.build_catalog_with(|name| std::env::var(name).ok())
    }

    pub fn build_catalog_with(
        &self,
        lookup_env: impl Fn(&str) -> Option<String>,
    ) -> Result<ProviderCatalog, ConfigError> {
        let mut providers = Vec::with_capacity(self.providers.len());
        for pc in &self.providers {
            let base_url = parse_base_url(&pc.id, &pc.base_url)?;

            let (auth_secret_ref, credential) = match (&pc.api_key_env, &pc.api_key) {
                (Some(var), _) => (var.clone(), lookup_env(var).map(Secret::new)),
                (None, Some(inline)) => ("inline".to_string(), Some(inline.clone())),
                (None, None) => (String::new(), None),
            };

            let has_credential = credential.as_ref().is_some_and(|s| !s.is_empty());
            if pc.active && !has_credential {
                warn!(
                    provider = %pc.id,
                    secret_ref = %auth_secret_ref,
                    "No credential resolved — provider disabled for this process"
                );
            }

            providers.push(Provider {
                id: pc.id.clone(),
                display_name: pc.display_name.clone().unwrap_or_else(|| pc.id.clone()),
                base_url,
                family: pc.family,
                auth_secret_ref,
                credential,
                is_active: pc.active && has_credential,
                limits: ProbeLimits {
                    max_concurrency: pc.max_concurrency,
                    discovery_timeout: Duration::from_secs(self.probe.discovery_timeout_secs),
                    existence_timeout: Duration::from_secs(self.probe.existence_timeout_secs),
                    response_timeout: Duration::from_secs(
                        pc.response_timeout_secs.unwrap_or(self.probe.response_timeout_secs),
                    ),
                },
                model_lookup: pc.model_lookup,
                streaming: pc.streaming,
            });
        }
        Ok(ProviderCatalog::new(providers))
    }
}

fn parse_base_url(id: &str, raw: &str) -> Result<Url, ConfigError> {
    let invalid = || ConfigError::InvalidBaseUrl {
        id: id.to_string(),
        url: raw.to_string(),
    };
    let url = Url::parse(raw).map_err(|_| invalid())?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }
    Ok(url)
}

pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".model-verifier"))
        .ok_or(ConfigError::NoHomeDir)
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(default_data_dir()?.join("config.yaml"))
}
