//! Per-model probes: does the model exist, and does it answer?
//!
//! Both probes run under the provider's deadlines. Negative answers
//! (404, not listed, non-2xx, timeout) are data for the caller to record;
//! the responsiveness probe never returns `Err` at all.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::adapters::{AdapterRegistry, ChatProbeRequest, Lookup, ProviderAdapter};
use crate::catalog::{Provider, Secret};
use crate::error::{ErrorKind, ProbeFailure};

/// What the chat probe sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOptions {
    pub prompt: String,
    pub max_tokens: u32,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            prompt: "What is 2+2?".into(),
            max_tokens: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistenceCheck {
    pub exists: bool,
    /// Set when a lookup endpoint answered; listing-based checks leave it empty.
    pub status: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponsivenessCheck {
    pub responded: bool,
    pub latency_ms: Option<u64>,
    pub ttft_ms: Option<u64>,
    pub status: Option<u16>,
    pub failure: Option<ProbeFailure>,
}

impl ResponsivenessCheck {
    fn failed(failure: ProbeFailure) -> Self {
        Self {
            status: failure.status,
            failure: Some(failure),
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct ProbeClient {
    adapters: Arc<AdapterRegistry>,
    options: ProbeOptions,
}

impl ProbeClient {
    pub fn new(adapters: Arc<AdapterRegistry>, options: ProbeOptions) -> Self {
        Self { adapters, options }
    }

    pub fn options(&self) -> &ProbeOptions {
        &self.options
    }

    fn resolve<'a>(&'a self, provider: &'a Provider) -> Result<(&'a dyn ProviderAdapter, &'a Secret), ProbeFailure> {
        let adapter = self.adapters.get(provider.family).ok_or_else(|| {
            ProbeFailure::new(
                ErrorKind::Unknown,
                None,
                format!("no adapter for provider family '{}'", provider.family),
            )
        })?;
        let secret = provider
            .secret()
            .ok_or_else(|| ProbeFailure::new(ErrorKind::AuthFailure, None, "no credential configured"))?;
        Ok((adapter, secret))
    }

    /// Check that `model_id` is still served.
    ///
    /// Uses the single-model lookup endpoint when the provider has one,
    /// otherwise membership in `listing` (the run's discovery result) or,
    /// failing that, a fresh listing call.
    pub async fn probe_existence(
        &self,
        provider: &Provider,
        model_id: &str,
        listing: Option<&[String]>,
    ) -> Result<ExistenceCheck, ProbeFailure> {
        let (adapter, secret) = self.resolve(provider)?;
        let deadline = provider.limits.existence_timeout;

        let check = check_existence(adapter, provider, secret, model_id, listing);
        match tokio::time::timeout(deadline, check).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProbeFailure::timeout("existence check", deadline)),
        }
    }

    /// Send the probe prompt and time the answer.
    pub async fn probe_responsiveness(
        &self,
        provider: &Provider,
        model_id: &str,
        prompt: &str,
    ) -> ResponsivenessCheck {
        let (adapter, secret) = match self.resolve(provider) {
            Ok(resolved) => resolved,
            Err(f) => return ResponsivenessCheck::failed(f),
        };
        let req = ChatProbeRequest {
            model_id: model_id.to_string(),
            prompt: prompt.to_string(),
            max_tokens: self.options.max_tokens,
            stream: provider.streaming,
        };
        let deadline = provider.limits.response_timeout;

        match tokio::time::timeout(deadline, adapter.chat_probe(provider, secret, &req)).await {
            Ok(Ok(reply)) => {
                debug!(
                    provider = %provider.id,
                    model = %model_id,
                    latency_ms = millis(reply.total),
                    "Model responded"
                );
                ResponsivenessCheck {
                    responded: true,
                    latency_ms: Some(millis(reply.total)),
                    ttft_ms: reply.ttft.map(millis),
                    status: Some(reply.status),
                    failure: None,
                }
            }
            Ok(Err(failure)) => ResponsivenessCheck::failed(failure),
            Err(_) => ResponsivenessCheck::failed(ProbeFailure::timeout("chat probe", deadline)),
        }
    }
}

async fn check_existence(
    adapter: &dyn ProviderAdapter,
    provider: &Provider,
    secret: &Secret,
    model_id: &str,
    listing: Option<&[String]>,
) -> Result<ExistenceCheck, ProbeFailure> {
    match adapter.lookup_model(provider, secret, model_id).await? {
        Lookup::Found => Ok(ExistenceCheck { exists: true, status: Some(200) }),
        Lookup::Missing => Ok(ExistenceCheck { exists: false, status: Some(404) }),
        Lookup::Unsupported => {
            let exists = match listing {
                Some(ids) => ids.iter().any(|id| id == model_id),
                None => adapter
                    .list_models(provider, secret)
                    .await?
                    .iter()
                    .any(|m| m.id == model_id),
            };
            Ok(ExistenceCheck { exists, status: None })
        }
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}
