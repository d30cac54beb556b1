//! Provider catalog — the immutable set of configured providers.
//!
//! Built once at startup from configuration and shared by reference
//! (`Arc<ProviderCatalog>`) with every component. Nothing mutates it
//! during a run; re-reading configuration produces a new catalog.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Which request/response dialect a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    /// `/models`, `/chat/completions`, bearer auth. Most vendors.
    #[default]
    OpenAi,
    Anthropic,
    Google,
}

impl ProviderFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFamily::OpenAi => "openai",
            ProviderFamily::Anthropic => "anthropic",
            ProviderFamily::Google => "google",
        }
    }
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An API credential. Never printed, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value, for building an auth header. Do not log it.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

/// Per-provider call limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeLimits {
    /// Concurrent model probes within this provider.
    pub max_concurrency: usize,
    pub discovery_timeout: Duration,
    pub existence_timeout: Duration,
    pub response_timeout: Duration,
}

impl Default for ProbeLimits {
    fn default() -> Self {
        Self {
            max_concurrency: 2,
            discovery_timeout: Duration::from_secs(10),
            existence_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(30),
        }
    }
}

/// One LLM vendor endpoint.
#[derive(Debug, Clone)]
pub struct Provider {
    /// Stable slug, unique within the catalog.
    pub id: String,
    pub display_name: String,
    /// Absolute API root, e.g. `https://api.openai.com/v1`.
    pub base_url: Url,
    pub family: ProviderFamily,
    /// Handle the credential was resolved from (env var name, `inline`).
    pub auth_secret_ref: String,
    pub credential: Option<Secret>,
    pub is_active: bool,
    pub limits: ProbeLimits,
    /// Whether `GET /models/{id}` exists for this provider.
    pub model_lookup: bool,
    /// Request a streamed completion so time-to-first-token can be measured.
    pub streaming: bool,
}

impl Provider {
    /// Join a relative path onto the base URL, keeping any base path
    /// segments (`/v1`, `/openai/v1`).
    pub fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let base = url.path().trim_end_matches('/').to_string();
        let tail = path.trim_start_matches('/');
        url.set_path(&format!("{base}/{tail}"));
        url
    }

    /// The credential, if one resolved and it is non-empty.
    pub fn secret(&self) -> Option<&Secret> {
        self.credential.as_ref().filter(|s| !s.is_empty())
    }
}

/// Immutable registry of providers keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ProviderCatalog {
    providers: BTreeMap<String, Arc<Provider>>,
}

impl ProviderCatalog {
    pub fn new(providers: impl IntoIterator<Item = Provider>) -> Self {
        let providers = providers
            .into_iter()
            .map(|p| (p.id.clone(), Arc::new(p)))
            .collect();
        Self { providers }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Provider>> {
        self.providers.get(id)
    }

    /// All providers, ordered by id.
    pub fn all(&self) -> impl Iterator<Item = &Arc<Provider>> {
        self.providers.values()
    }

    pub fn active(&self) -> impl Iterator<Item = &Arc<Provider>> {
        self.providers.values().filter(|p| p.is_active)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn test_provider(id: &str, base_url: &str) -> Provider {
    Provider {
        id: id.to_string(),
        display_name: id.to_uppercase(),
        base_url: Url::parse(base_url).expect("test url"),
        family: ProviderFamily::OpenAi,
        auth_secret_ref: "inline".into(),
        credential: Some(Secret::new("sk-test")),
        is_active: true,
        limits: ProbeLimits::default(),
        model_lookup: true,
        streaming: false,
    }
}
