//! Records produced by discovery, probing and scoring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ErrorKind;

/// `(provider id, model id)`, the key every time series hangs off.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider_id: String,
    pub model_id: String,
}

impl ModelRef {
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider_id, self.model_id)
    }
}

/// A model as advertised by a provider's listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredModel {
    pub id: String,
    pub display_name: Option<String>,
    /// Unix seconds, when the vendor reports it.
    pub created: Option<i64>,
    pub max_context_tokens: Option<u64>,
}

impl DiscoveredModel {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            created: None,
            max_context_tokens: None,
        }
    }
}

/// Persisted row for a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    pub family: String,
    /// Credential handle only; the secret itself is never stored.
    pub auth_secret_ref: String,
    pub is_active: bool,
}

impl From<&crate::catalog::Provider> for ProviderRecord {
    fn from(p: &crate::catalog::Provider) -> Self {
        Self {
            id: p.id.clone(),
            display_name: p.display_name.clone(),
            base_url: p.base_url.to_string(),
            family: p.family.as_str().to_string(),
            auth_secret_ref: p.auth_secret_ref.clone(),
            is_active: p.is_active,
        }
    }
}

/// Persisted row for a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub provider_id: String,
    pub model_id: String,
    pub display_name: String,
    pub discovered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub max_context_tokens: Option<u64>,
    pub is_active: bool,
}

impl ModelRecord {
    pub fn model_ref(&self) -> ModelRef {
        ModelRef::new(&self.provider_id, &self.model_id)
    }
}

/// One probe outcome for one model at one instant. Never mutated once
/// stored; the next run appends a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub model: ModelRef,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub model_exists: bool,
    pub is_responsive: bool,
    /// False when the chat probe was skipped (auth failure, model missing).
    pub responsiveness_attempted: bool,
    pub latency_ms: Option<u64>,
    pub ttft_ms: Option<u64>,
    pub http_status: Option<u16>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

impl VerificationResult {
    /// Enforce the cross-field invariant: a model that does not exist can
    /// be neither responsive nor timed.
    pub fn normalized(mut self) -> Self {
        if !self.model_exists {
            self.is_responsive = false;
            self.latency_ms = None;
            self.ttft_ms = None;
        }
        if !self.is_responsive {
            self.ttft_ms = None;
        }
        self
    }

    pub fn is_consistent(&self) -> bool {
        self.model_exists || (!self.is_responsive && self.latency_ms.is_none() && self.ttft_ms.is_none())
    }
}

/// A stored verification result with its store sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredResult {
    pub seq: i64,
    pub result: VerificationResult,
}

/// Five components, each in [0, 10].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ScoreComponents {
    pub speed: f64,
    pub efficiency: f64,
    pub cost: f64,
    pub capability: f64,
    pub recency: f64,
}

/// Composite score for a model, derived from one verification result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelScore {
    pub model: ModelRef,
    pub overall_score: f64,
    pub components: ScoreComponents,
    /// `(SC:x.y)`.
    pub score_suffix: String,
    pub computed_at: DateTime<Utc>,
    /// SHA-256 (hex) of every input that fed the computation.
    pub inputs_hash: String,
}

impl ModelScore {
    /// Same inputs, same numbers; `computed_at` ignored.
    pub fn same_outcome(&self, other: &ModelScore) -> bool {
        self.model == other.model
            && self.overall_score.to_bits() == other.overall_score.to_bits()
            && self.components == other.components
            && self.score_suffix == other.score_suffix
            && self.inputs_hash == other.inputs_hash
    }
}

/// A model with its latest score, for ranking queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredModel {
    pub model: ModelRecord,
    pub score: ModelScore,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exists: bool, responsive: bool) -> VerificationResult {
        VerificationResult {
            model: ModelRef::new("alpha", "m1"),
            run_id: "run".into(),
            timestamp: Utc::now(),
            model_exists: exists,
            is_responsive: responsive,
            responsiveness_attempted: true,
            latency_ms: Some(500),
            ttft_ms: Some(120),
            http_status: Some(200),
            error_kind: None,
            error_message: None,
        }
    }

    #[test]
    fn test_normalize_missing_model() {
        let r = result(false, true);
        assert!(!r.is_consistent());
        let r = r.normalized();
        assert!(r.is_consistent());
        assert!(!r.is_responsive);
        assert_eq!(r.latency_ms, None);
        assert_eq!(r.ttft_ms, None);
    }

    #[test]
    fn test_normalize_keeps_existing_latency() {
        let r = result(true, false).normalized();
        assert_eq!(r.latency_ms, Some(500));
        assert_eq!(r.ttft_ms, None);
    }

    #[test]
    fn test_model_ref_display() {
        assert_eq!(ModelRef::new("groq", "llama-3.1-8b").to_string(), "groq/llama-3.1-8b");
    }
}
