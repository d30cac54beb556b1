//! Model discovery — one listing call per provider.
//!
//! Resolves the adapter for the provider's family, calls its listing
//! endpoint under the provider's discovery timeout and hands back the
//! decoded models. Persisting them is the caller's job.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::adapters::AdapterRegistry;
use crate::catalog::Provider;
use crate::error::{DiscoveryError, ProbeFailure};
use crate::models::DiscoveredModel;

#[derive(Clone)]
pub struct ModelDiscoveryClient {
    adapters: Arc<AdapterRegistry>,
}

impl ModelDiscoveryClient {
    pub fn new(adapters: Arc<AdapterRegistry>) -> Self {
        Self { adapters }
    }

    /// Every model the provider currently advertises, in listing order with
    /// duplicate ids dropped. An empty list is a valid answer.
    pub async fn discover(&self, provider: &Provider) -> Result<Vec<DiscoveredModel>, DiscoveryError> {
        let adapter = self
            .adapters
            .get(provider.family)
            .ok_or_else(|| DiscoveryError::NoAdapter(provider.family.to_string()))?;
        let secret = provider
            .secret()
            .ok_or_else(|| DiscoveryError::MissingCredential(provider.id.clone()))?;

        let deadline = provider.limits.discovery_timeout;
        let listed = match tokio::time::timeout(deadline, adapter.list_models(provider, secret)).await {
            Ok(Ok(models)) => models,
            Ok(Err(failure)) => {
                warn!(provider = %provider.id, error = %failure, "Model listing failed");
                return Err(failure.into());
            }
            Err(_) => {
                warn!(provider = %provider.id, timeout_ms = deadline.as_millis() as u64, "Model listing timed out");
                return Err(ProbeFailure::timeout("model listing", deadline).into());
            }
        };

        let mut seen = std::collections::HashSet::new();
        let models: Vec<DiscoveredModel> = listed
            .into_iter()
            .filter(|m| seen.insert(m.id.clone()))
            .collect();

        debug!(provider = %provider.id, count = models.len(), "Discovered models");
        Ok(models)
    }

    /// Just the ids.
    pub async fn discover_ids(&self, provider: &Provider) -> Result<Vec<String>, DiscoveryError> {
        Ok(self
            .discover(provider)
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect())
    }
}
