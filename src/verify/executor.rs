//! Verification Executor — one pass over every active provider.
//!
//! Fan-out is two-level: providers run concurrently behind a global
//! semaphore, and within a provider model probes run behind that
//! provider's own `max_concurrency` semaphore. Each model additionally
//! holds a per-model lock for the duration of its probe, so overlapping
//! runs on one executor never probe the same model at once.
//!
//! Every discovered model gets exactly one verification result per run.
//! Failed probes, cancellation and panicking probe tasks all end in a
//! recorded result.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{ModelTally, ProviderOutcome, RunSummary};
use crate::adapters::AdapterRegistry;
use crate::catalog::{Provider, ProviderCatalog};
use crate::discovery::ModelDiscoveryClient;
use crate::error::{ErrorKind, ProbeFailure};
use crate::metadata::MetadataCatalog;
use crate::models::{ModelRef, ProviderRecord, VerificationResult};
use crate::probe::{ExistenceCheck, ProbeClient, ProbeOptions};
use crate::scoring::ScoringEngine;
use crate::store::ResultStore;

/// One lock per model, created on first use. Shared by every run of an
/// executor.
#[derive(Default)]
struct InFlight {
    locks: Mutex<HashMap<ModelRef, Arc<tokio::sync::Mutex<()>>>>,
}

impl InFlight {
    fn lock_for(&self, model: &ModelRef) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(locks.entry(model.clone()).or_default())
    }
}

/// Everything a provider task needs, cloned once per run.
struct Shared {
    discovery: ModelDiscoveryClient,
    probe: ProbeClient,
    scoring: ScoringEngine,
    metadata: Arc<MetadataCatalog>,
    store: Arc<dyn ResultStore>,
    in_flight: Arc<InFlight>,
}

pub struct VerificationExecutor {
    catalog: Arc<ProviderCatalog>,
    adapters: Arc<AdapterRegistry>,
    store: Arc<dyn ResultStore>,
    metadata: Arc<MetadataCatalog>,
    scoring: ScoringEngine,
    probe_options: ProbeOptions,
    max_concurrent_providers: usize,
    in_flight: Arc<InFlight>,
}

impl VerificationExecutor {
    pub fn new(
        catalog: Arc<ProviderCatalog>,
        adapters: Arc<AdapterRegistry>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            catalog,
            adapters,
            store,
            metadata: Arc::new(MetadataCatalog::empty()),
            scoring: ScoringEngine::new(),
            probe_options: ProbeOptions::default(),
            max_concurrent_providers: 8,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn with_probe_options(mut self, options: ProbeOptions) -> Self {
        self.probe_options = options;
        self
    }

    pub fn with_scoring(mut self, scoring: ScoringEngine) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn with_metadata(mut self, metadata: Arc<MetadataCatalog>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_max_concurrent_providers(mut self, max: usize) -> Self {
        self.max_concurrent_providers = max.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    fn shared(&self) -> Arc<Shared> {
        Arc::new(Shared {
            discovery: ModelDiscoveryClient::new(Arc::clone(&self.adapters)),
            probe: ProbeClient::new(Arc::clone(&self.adapters), self.probe_options.clone()),
            scoring: self.scoring.clone(),
            metadata: Arc::clone(&self.metadata),
            store: Arc::clone(&self.store),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Run one full pass over every active provider.
    ///
    /// Cancelling `cancel` stops new probes and abandons in-flight ones;
    /// every model already discovered is still recorded (as a timeout).
    pub async fn run(&self, cancel: &CancellationToken) -> RunSummary {
        let run_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let providers: Vec<Arc<Provider>> = self.catalog.active().cloned().collect();
        let shared = self.shared();

        info!(
            run_id = %run_id,
            providers = providers.len(),
            skipped = self.catalog.len() - providers.len(),
            "📡 Verification run starting"
        );

        let gate = Arc::new(Semaphore::new(self.max_concurrent_providers.min(providers.len()).max(1)));
        let mut handles = Vec::with_capacity(providers.len());
        for provider in providers {
            let shared = Arc::clone(&shared);
            let gate = Arc::clone(&gate);
            let cancel = cancel.clone();
            let run_id = run_id.clone();
            let provider_id = provider.id.clone();

            let handle = tokio::spawn(async move {
                let _permit = gate.acquire_owned().await;
                shared.verify_provider(provider, &run_id, &cancel).await
            });
            handles.push((provider_id, handle));
        }

        let mut summary = RunSummary::new(run_id, handles.len());
        for (provider_id, handle) in handles {
            match handle.await {
                Ok(outcome) => summary.absorb(outcome),
                Err(e) => error!(provider = %provider_id, "Provider task failed: {}", e),
            }
        }
        summary.cancelled = cancel.is_cancelled();
        summary.duration = started.elapsed();
        summary.log();
        summary
    }
}

impl Shared {
    async fn verify_provider(
        self: Arc<Self>,
        provider: Arc<Provider>,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> ProviderOutcome {
        let mut outcome = ProviderOutcome::new(&provider.id);

        if let Err(e) = self.store.upsert_provider(&ProviderRecord::from(provider.as_ref())) {
            error!(provider = %provider.id, "Failed to upsert provider: {}", e);
            outcome.store_errors += 1;
        }

        // 1. Discover
        let discovered = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(provider = %provider.id, "Run cancelled before discovery");
                return outcome;
            }
            listed = self.discovery.discover(&provider) => listed,
        };
        let models = match discovered {
            Ok(models) => models,
            Err(e) => {
                warn!(provider = %provider.id, error_kind = %e.kind(), "Discovery failed — no results for this provider: {}", e);
                outcome.discovery_error = Some(e);
                return outcome;
            }
        };
        outcome.models_discovered = models.len();

        // 2. Persist the whole listing before any probing
        if let Err(e) = self.store.upsert_models(&provider.id, &models, Utc::now()) {
            error!(provider = %provider.id, "Failed to upsert models: {}", e);
            outcome.store_errors += 1;
        }
        let listing: Arc<Vec<String>> = Arc::new(models.into_iter().map(|m| m.id).collect());

        // 3. Models that vanished since the last pass
        match self.store.deactivate_missing(&provider.id, &listing) {
            Ok(gone) => {
                for model_id in gone {
                    let model = ModelRef::new(&provider.id, model_id);
                    info!(provider = %provider.id, model = %model.model_id, "Model no longer listed — deactivated");
                    let failure = ProbeFailure::new(ErrorKind::NotFound, None, "no longer listed by provider");
                    let result = failed_result(&model, run_id, &failure);
                    let tally = self.record(result);
                    outcome.tallies.push(tally);
                    outcome.deactivated.push(model);
                }
            }
            Err(e) => {
                error!(provider = %provider.id, "Failed to deactivate missing models: {}", e);
                outcome.store_errors += 1;
            }
        }

        info!(
            provider = %provider.id,
            models = listing.len(),
            concurrency = provider.limits.max_concurrency,
            "Probing models..."
        );

        // 4. Probe, bounded per provider
        let gate = Arc::new(Semaphore::new(provider.limits.max_concurrency.max(1)));
        let mut handles = Vec::with_capacity(listing.len());
        for model_id in listing.iter() {
            let model = ModelRef::new(&provider.id, model_id);
            let task = tokio::spawn(Arc::clone(&self).verify_model(
                Arc::clone(&provider),
                model.clone(),
                Arc::clone(&listing),
                run_id.to_string(),
                Arc::clone(&gate),
                cancel.clone(),
            ));
            handles.push((model, task));
        }

        for (model, handle) in handles {
            let tally = match handle.await {
                Ok(tally) => tally,
                Err(e) => {
                    error!(provider = %model.provider_id, model = %model.model_id, "Probe task failed: {}", e);
                    let failure = ProbeFailure::new(ErrorKind::Unknown, None, format!("probe task failed: {e}"));
                    self.record(failed_result(&model, run_id, &failure))
                }
            };
            outcome.tallies.push(tally);
        }
        outcome
    }

    async fn verify_model(
        self: Arc<Self>,
        provider: Arc<Provider>,
        model: ModelRef,
        listing: Arc<Vec<String>>,
        run_id: String,
        gate: Arc<Semaphore>,
        cancel: CancellationToken,
    ) -> ModelTally {
        let lock = self.in_flight.lock_for(&model);
        let probed = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = async {
                let _permit = gate.acquire().await;
                let _exclusive = lock.lock().await;
                self.probe_model(&provider, &model, &listing, &run_id).await
            } => Some(result),
        };
        // Persist outside the select so cancellation never interrupts a write.
        let result = probed.unwrap_or_else(|| {
            debug!(provider = %model.provider_id, model = %model.model_id, "Probe cancelled");
            failed_result(&model, &run_id, &ProbeFailure::cancelled())
        });
        self.record(result)
    }

    /// Existence, then (conditionally) responsiveness.
    async fn probe_model(
        &self,
        provider: &Provider,
        model: &ModelRef,
        listing: &[String],
        run_id: &str,
    ) -> VerificationResult {
        let mut result = blank_result(model, run_id);

        let inconclusive = match self.probe.probe_existence(provider, &model.model_id, Some(listing)).await {
            Ok(ExistenceCheck { exists: false, status }) => {
                result.http_status = status;
                result.error_kind = Some(ErrorKind::NotFound);
                result.error_message = Some("model not found".into());
                return result;
            }
            Ok(ExistenceCheck { exists: true, status }) => {
                result.model_exists = true;
                result.http_status = status;
                None
            }
            Err(failure) if failure.kind.skips_responsiveness() => {
                apply_failure(&mut result, &failure);
                return result;
            }
            Err(failure) => Some(failure),
        };

        let check = self
            .probe
            .probe_responsiveness(provider, &model.model_id, &self.probe.options().prompt)
            .await;
        result.responsiveness_attempted = true;

        if check.responded {
            if let Some(failure) = &inconclusive {
                debug!(
                    provider = %provider.id,
                    model = %model.model_id,
                    "Existence check failed ({}) but the model answered",
                    failure
                );
            }
            result.model_exists = true;
            result.is_responsive = true;
            result.latency_ms = check.latency_ms;
            result.ttft_ms = check.ttft_ms;
            result.http_status = check.status;
        } else if let Some(failure) = inconclusive.as_ref().or(check.failure.as_ref()) {
            apply_failure(&mut result, failure);
        }
        result.normalized()
    }

    /// Append the result and its score. Never fails; store errors are
    /// logged and counted.
    fn record(&self, result: VerificationResult) -> ModelTally {
        let result = result.normalized();
        let mut tally = ModelTally {
            recorded: false,
            responsive: result.is_responsive,
            error_kind: result.error_kind,
            store_failed: false,
        };

        match self.store.append_verification_result(&result) {
            Ok(_) => tally.recorded = true,
            Err(e) => {
                error!(provider = %result.model.provider_id, model = %result.model.model_id, "Failed to store result: {}", e);
                tally.store_failed = true;
                return tally;
            }
        }

        let score = self.scoring.score(&result, self.metadata.get(&result.model));
        if let Err(e) = self.store.append_model_score(&score) {
            error!(provider = %result.model.provider_id, model = %result.model.model_id, "Failed to store score: {}", e);
            tally.store_failed = true;
        }

        info!(
            provider = %result.model.provider_id,
            model = %result.model.model_id,
            exists = result.model_exists,
            responsive = result.is_responsive,
            latency_ms = result.latency_ms,
            error_kind = result.error_kind.map(|k| k.as_str()),
            score = score.overall_score,
            "Model verified"
        );
        tally
    }
}

fn blank_result(model: &ModelRef, run_id: &str) -> VerificationResult {
    VerificationResult {
        model: model.clone(),
        run_id: run_id.to_string(),
        timestamp: Utc::now(),
        model_exists: false,
        is_responsive: false,
        responsiveness_attempted: false,
        latency_ms: None,
        ttft_ms: None,
        http_status: None,
        error_kind: None,
        error_message: None,
    }
}

fn apply_failure(result: &mut VerificationResult, failure: &ProbeFailure) {
    result.error_kind = Some(failure.kind);
    result.http_status = failure.status;
    result.error_message = Some(failure.message.clone());
}

fn failed_result(model: &ModelRef, run_id: &str, failure: &ProbeFailure) -> VerificationResult {
    let mut result = blank_result(model, run_id);
    apply_failure(&mut result, failure);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::ScriptedAdapter;
    use crate::adapters::Lookup;
    use crate::catalog::test_provider;
    use crate::store::{SqliteStore, StoreEvent};
    use std::time::Duration;

    struct Harness {
        adapter: ScriptedAdapter,
        store: Arc<SqliteStore>,
        executor: VerificationExecutor,
    }

    fn harness(adapter: ScriptedAdapter, providers: Vec<Provider>) -> Harness {
        let mut registry = AdapterRegistry::empty();
        registry.register(Box::new(adapter.clone()));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let executor = VerificationExecutor::new(
            Arc::new(ProviderCatalog::new(providers)),
            Arc::new(registry),
            store.clone(),
        );
        Harness { adapter, store, executor }
    }

    fn latest(store: &SqliteStore, provider: &str, model: &str) -> VerificationResult {
        store
            .latest_result(&ModelRef::new(provider, model))
            .unwrap()
            .expect("result recorded")
            .result
    }

    #[tokio::test]
    async fn test_auth_failure_skips_responsiveness() {
        let adapter = ScriptedAdapter::new()
            .with_models("alpha", &["m1", "m2"])
            .with_lookup(
                "alpha",
                "m2",
                Err(ProbeFailure::new(ErrorKind::AuthFailure, Some(401), "invalid api key")),
            );
        let h = harness(adapter, vec![test_provider("alpha", "http://alpha.test/v1")]);

        let summary = h.executor.run(&CancellationToken::new()).await;
        assert_eq!(summary.models_discovered, 2);
        assert_eq!(summary.results_recorded, 2);
        assert_eq!(summary.responsive, 1);
        assert_eq!(summary.error_count(ErrorKind::AuthFailure), 1);

        let m1 = latest(&h.store, "alpha", "m1");
        assert!(m1.model_exists && m1.is_responsive && m1.responsiveness_attempted);
        assert!(m1.latency_ms.is_some());
        assert_eq!(m1.error_kind, None);

        let m2 = latest(&h.store, "alpha", "m2");
        assert!(!m2.model_exists && !m2.is_responsive);
        assert!(!m2.responsiveness_attempted);
        assert_eq!(m2.error_kind, Some(ErrorKind::AuthFailure));
        assert_eq!(m2.http_status, Some(401));
        assert_eq!(h.adapter.chat_calls("alpha", "m2"), 0);

        let score = h.store.latest_score(&ModelRef::new("alpha", "m2")).unwrap().unwrap();
        assert_eq!(score.overall_score, 0.0);
        assert!(h.store.latest_score(&ModelRef::new("alpha", "m1")).unwrap().unwrap().overall_score > 0.0);
    }

    #[tokio::test]
    async fn test_payment_required_skips_responsiveness() {
        let adapter = ScriptedAdapter::new()
            .with_models("alpha", &["m1"])
            .with_lookup(
                "alpha",
                "m1",
                Err(ProbeFailure::new(ErrorKind::PaymentRequired, Some(402), "insufficient balance")),
            );
        let h = harness(adapter, vec![test_provider("alpha", "http://alpha.test/v1")]);

        let summary = h.executor.run(&CancellationToken::new()).await;
        assert_eq!(summary.error_count(ErrorKind::PaymentRequired), 1);

        let m1 = latest(&h.store, "alpha", "m1");
        assert!(!m1.model_exists && !m1.is_responsive);
        assert!(!m1.responsiveness_attempted);
        assert_eq!(m1.http_status, Some(402));
        assert_eq!(h.adapter.chat_calls("alpha", "m1"), 0);
        assert_eq!(h.store.latest_score(&ModelRef::new("alpha", "m1")).unwrap().unwrap().overall_score, 0.0);
    }

    #[tokio::test]
    async fn test_chat_timeout_keeps_confirmed_existence() {
        let adapter = ScriptedAdapter::new()
            .with_models("alpha", &["m1"])
            .with_chat_delay("alpha", "m1", Duration::from_secs(5));
        let mut alpha = test_provider("alpha", "http://alpha.test/v1");
        alpha.limits.response_timeout = Duration::from_millis(50);
        let h = harness(adapter, vec![alpha]);

        let summary = h.executor.run(&CancellationToken::new()).await;
        assert_eq!(summary.error_count(ErrorKind::Timeout), 1);
        assert!(!summary.cancelled);

        let m1 = latest(&h.store, "alpha", "m1");
        assert!(m1.model_exists, "existence was confirmed by the lookup");
        assert!(!m1.is_responsive);
        assert!(m1.responsiveness_attempted);
        assert_eq!(m1.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(m1.latency_ms, None);
        assert_eq!(h.adapter.chat_calls("alpha", "m1"), 1);
    }

    #[tokio::test]
    async fn test_missing_model_is_not_probed() {
        let adapter = ScriptedAdapter::new()
            .with_models("alpha", &["m1"])
            .with_lookup("alpha", "m1", Ok(Lookup::Missing));
        let h = harness(adapter, vec![test_provider("alpha", "http://alpha.test/v1")]);

        h.executor.run(&CancellationToken::new()).await;
        let m1 = latest(&h.store, "alpha", "m1");
        assert_eq!(m1.error_kind, Some(ErrorKind::NotFound));
        assert_eq!(m1.http_status, Some(404));
        assert!(!m1.responsiveness_attempted);
        assert_eq!(h.adapter.chat_calls("alpha", "m1"), 0);
    }

    #[tokio::test]
    async fn test_discovery_timeout_is_isolated() {
        let adapter = ScriptedAdapter::new()
            .with_models("alpha", &["m1"])
            .with_models("beta", &["b1"])
            .with_listing_delay("beta", Duration::from_millis(500));
        let mut beta = test_provider("beta", "http://beta.test/v1");
        beta.limits.discovery_timeout = Duration::from_millis(50);
        let h = harness(adapter, vec![test_provider("alpha", "http://alpha.test/v1"), beta]);

        let summary = h.executor.run(&CancellationToken::new()).await;
        assert_eq!(summary.providers_attempted, 2);
        assert_eq!(summary.providers_failed.len(), 1);
        assert_eq!(summary.providers_failed[0].0, "beta");
        assert_eq!(summary.providers_failed[0].1.kind(), ErrorKind::Timeout);

        assert!(latest(&h.store, "alpha", "m1").is_responsive);
        assert!(h.store.latest_result(&ModelRef::new("beta", "b1")).unwrap().is_none());
        assert!(h.store.list_models(Some("beta")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_every_model_recorded_when_all_probes_fail() {
        let failure = ProbeFailure::new(ErrorKind::ServerError, Some(503), "overloaded");
        let adapter = ScriptedAdapter::new()
            .with_models("alpha", &["m1", "m2", "m3"])
            .with_chat_failure("alpha", "m1", failure.clone())
            .with_chat_failure("alpha", "m2", failure.clone())
            .with_chat_failure("alpha", "m3", failure);
        let mut alpha = test_provider("alpha", "http://alpha.test/v1");
        alpha.model_lookup = false;
        let h = harness(adapter, vec![alpha]);

        let summary = h.executor.run(&CancellationToken::new()).await;
        assert_eq!(summary.results_recorded, 3);
        assert_eq!(summary.error_count(ErrorKind::ServerError), 3);
        for id in ["m1", "m2", "m3"] {
            let r = latest(&h.store, "alpha", id);
            assert!(r.model_exists, "listed models exist");
            assert!(!r.is_responsive);
            assert!(r.responsiveness_attempted);
            assert_eq!(r.http_status, Some(503));
            assert_eq!(r.latency_ms, None);
        }
    }

    #[tokio::test]
    async fn test_inconclusive_existence_then_answer() {
        let adapter = ScriptedAdapter::new()
            .with_models("alpha", &["m1", "m2"])
            .with_lookup("alpha", "m1", Err(ProbeFailure::new(ErrorKind::ServerError, Some(500), "boom")))
            .with_lookup("alpha", "m2", Err(ProbeFailure::new(ErrorKind::ServerError, Some(500), "boom")))
            .with_chat_failure("alpha", "m2", ProbeFailure::new(ErrorKind::RateLimited, Some(429), "slow down"));
        let h = harness(adapter, vec![test_provider("alpha", "http://alpha.test/v1")]);

        h.executor.run(&CancellationToken::new()).await;

        let m1 = latest(&h.store, "alpha", "m1");
        assert!(m1.model_exists && m1.is_responsive);
        assert_eq!(m1.error_kind, None);
        assert_eq!(m1.http_status, Some(200));

        // Neither probe confirmed the model; the existence failure is what gets recorded.
        let m2 = latest(&h.store, "alpha", "m2");
        assert!(!m2.model_exists && !m2.is_responsive);
        assert!(m2.responsiveness_attempted);
        assert_eq!(m2.error_kind, Some(ErrorKind::ServerError));
        assert_eq!(m2.http_status, Some(500));
    }

    #[tokio::test]
    async fn test_per_provider_concurrency_cap() {
        let ids: Vec<String> = (0..8).map(|i| format!("m{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let adapter = ScriptedAdapter::new()
            .with_models("alpha", &refs)
            .with_default_chat_delay(Duration::from_millis(40));
        let mut alpha = test_provider("alpha", "http://alpha.test/v1");
        alpha.limits.max_concurrency = 2;
        let h = harness(adapter, vec![alpha]);

        let summary = h.executor.run(&CancellationToken::new()).await;
        assert_eq!(summary.responsive, 8);
        let peak = h.adapter.max_provider_in_flight("alpha");
        assert!((1..=2).contains(&peak), "peak {peak}");
    }

    #[tokio::test]
    async fn test_overlapping_runs_never_probe_a_model_twice_at_once() {
        let adapter = ScriptedAdapter::new()
            .with_models("alpha", &["m1", "m2"])
            .with_default_chat_delay(Duration::from_millis(50));
        let mut alpha = test_provider("alpha", "http://alpha.test/v1");
        alpha.limits.max_concurrency = 4;
        let h = harness(adapter, vec![alpha]);

        let cancel = CancellationToken::new();
        let (a, b) = tokio::join!(h.executor.run(&cancel), h.executor.run(&cancel));
        assert_ne!(a.run_id, b.run_id);
        assert_eq!(a.results_recorded + b.results_recorded, 4);
        assert_eq!(h.adapter.max_in_flight_per_model(), 1);
        assert_eq!(h.adapter.chat_calls("alpha", "m1"), 2);
        assert_eq!(h.store.result_history(&ModelRef::new("alpha", "m1"), 10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_records_every_model() {
        let adapter = ScriptedAdapter::new()
            .with_models("alpha", &["m1", "m2", "m3"])
            .with_default_chat_delay(Duration::from_secs(20));
        let mut alpha = test_provider("alpha", "http://alpha.test/v1");
        alpha.limits.max_concurrency = 1;
        let h = harness(adapter, vec![alpha]);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let summary = tokio::time::timeout(Duration::from_secs(5), h.executor.run(&cancel))
            .await
            .expect("run stops promptly after cancel");
        assert!(summary.cancelled);
        assert_eq!(summary.results_recorded, 3);
        assert_eq!(summary.error_count(ErrorKind::Timeout), 3);
        for id in ["m1", "m2", "m3"] {
            let r = latest(&h.store, "alpha", id);
            assert_eq!(r.error_kind, Some(ErrorKind::Timeout));
            assert_eq!(r.error_message.as_deref(), Some("run cancelled"));
        }
    }

    #[tokio::test]
    async fn test_vanished_model_is_deactivated() {
        let adapter = ScriptedAdapter::new().with_models("alpha", &["m1", "m2"]);
        let h = harness(adapter, vec![test_provider("alpha", "http://alpha.test/v1")]);
        h.executor.run(&CancellationToken::new()).await;

        let _ = h.adapter.clone().with_models("alpha", &["m1"]);
        let summary = h.executor.run(&CancellationToken::new()).await;
        assert_eq!(summary.deactivated, vec![ModelRef::new("alpha", "m2")]);
        assert_eq!(summary.results_recorded, 2);

        let m2 = latest(&h.store, "alpha", "m2");
        assert_eq!(m2.error_kind, Some(ErrorKind::NotFound));
        assert!(!m2.responsiveness_attempted);
        assert_eq!(h.adapter.chat_calls("alpha", "m2"), 1);

        let models = h.store.list_models(Some("alpha")).unwrap();
        let m2_row = models.iter().find(|m| m.model_id == "m2").unwrap();
        assert!(!m2_row.is_active);
        assert!(models.iter().find(|m| m.model_id == "m1").unwrap().is_active);

        // Already inactive; not reported again.
        let third = h.executor.run(&CancellationToken::new()).await;
        assert!(third.deactivated.is_empty());
    }

    #[tokio::test]
    async fn test_large_listing_persisted_before_probing() {
        let ids: Vec<String> = (0..179).map(|i| format!("model-{i:03}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let adapter = ScriptedAdapter::new().with_models("alpha", &refs);
        let mut alpha = test_provider("alpha", "http://alpha.test/v1");
        alpha.limits.max_concurrency = 16;
        let h = harness(adapter, vec![alpha]);

        let summary = h.executor.run(&CancellationToken::new()).await;
        assert_eq!(summary.models_discovered, 179);
        assert_eq!(summary.results_recorded, 179);
        assert_eq!(h.store.list_models(Some("alpha")).unwrap().len(), 179);
        assert_eq!(h.store.top_models(200).unwrap().len(), 179);
    }

    #[tokio::test]
    async fn test_inactive_provider_is_skipped() {
        let adapter = ScriptedAdapter::new().with_models("alpha", &["m1"]).with_models("off", &["x"]);
        let mut off = test_provider("off", "http://off.test/v1");
        off.is_active = false;
        let h = harness(adapter, vec![test_provider("alpha", "http://alpha.test/v1"), off]);

        let summary = h.executor.run(&CancellationToken::new()).await;
        assert_eq!(summary.providers_attempted, 1);
        assert!(h.store.latest_result(&ModelRef::new("off", "x")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_events_follow_appends() {
        let adapter = ScriptedAdapter::new().with_models("alpha", &["m1"]);
        let h = harness(adapter, vec![test_provider("alpha", "http://alpha.test/v1")]);
        let mut events = h.store.subscribe();

        h.executor.run(&CancellationToken::new()).await;
        assert!(matches!(events.try_recv().unwrap(), StoreEvent::ResultAppended { .. }));
        assert!(matches!(events.try_recv().unwrap(), StoreEvent::ScoreAppended { .. }));
    }
}
