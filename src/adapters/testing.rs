//! In-process scripted adapter for discovery, probe and executor tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::*;

type Key = (String, String);

#[derive(Default)]
struct Script {
    models: HashMap<String, Vec<String>>,
    listing_delay: HashMap<String, Duration>,
    listing_failure: HashMap<String, ProbeFailure>,
    lookups: HashMap<Key, Result<Lookup, ProbeFailure>>,
    chat_failures: HashMap<Key, ProbeFailure>,
    chat_delays: HashMap<Key, Duration>,
    default_chat_delay: Duration,
    family: ProviderFamily,
}

#[derive(Default)]
struct Observed {
    in_flight: HashMap<Key, usize>,
    max_in_flight_per_model: usize,
    provider_in_flight: HashMap<String, usize>,
    max_provider_in_flight: HashMap<String, usize>,
    chat_calls: HashMap<Key, usize>,
    lookup_calls: HashMap<Key, usize>,
}

/// Cheap to clone; every clone shares the script and the observations.
#[derive(Clone, Default)]
pub(crate) struct ScriptedAdapter {
    script: Arc<Mutex<Script>>,
    observed: Arc<Mutex<Observed>>,
}

fn key(provider: &str, model: &str) -> Key {
    (provider.to_string(), model.to_string())
}

impl ScriptedAdapter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn edit(self, f: impl FnOnce(&mut Script)) -> Self {
        f(&mut self.script.lock().unwrap());
        self
    }

    pub(crate) fn with_models(self, provider: &str, ids: &[&str]) -> Self {
        let ids = ids.iter().map(|s| s.to_string()).collect();
        self.edit(|s| {
            s.models.insert(provider.to_string(), ids);
        })
    }

    pub(crate) fn with_listing_delay(self, provider: &str, delay: Duration) -> Self {
        self.edit(|s| {
            s.listing_delay.insert(provider.to_string(), delay);
        })
    }

    pub(crate) fn with_listing_failure(self, provider: &str, failure: ProbeFailure) -> Self {
        self.edit(|s| {
            s.listing_failure.insert(provider.to_string(), failure);
        })
    }

    pub(crate) fn with_lookup(self, provider: &str, model: &str, outcome: Result<Lookup, ProbeFailure>) -> Self {
        self.edit(|s| {
            s.lookups.insert(key(provider, model), outcome);
        })
    }

    pub(crate) fn with_chat_failure(self, provider: &str, model: &str, failure: ProbeFailure) -> Self {
        self.edit(|s| {
            s.chat_failures.insert(key(provider, model), failure);
        })
    }

    pub(crate) fn with_chat_delay(self, provider: &str, model: &str, delay: Duration) -> Self {
        self.edit(|s| {
            s.chat_delays.insert(key(provider, model), delay);
        })
    }

    pub(crate) fn with_default_chat_delay(self, delay: Duration) -> Self {
        self.edit(|s| s.default_chat_delay = delay)
    }

    pub(crate) fn chat_calls(&self, provider: &str, model: &str) -> usize {
        let observed = self.observed.lock().unwrap();
        observed.chat_calls.get(&key(provider, model)).copied().unwrap_or(0)
    }

    pub(crate) fn lookup_calls(&self, provider: &str, model: &str) -> usize {
        let observed = self.observed.lock().unwrap();
        observed.lookup_calls.get(&key(provider, model)).copied().unwrap_or(0)
    }

    /// Highest number of overlapping chat probes seen for any single model.
    pub(crate) fn max_in_flight_per_model(&self) -> usize {
        self.observed.lock().unwrap().max_in_flight_per_model
    }

    /// Highest number of overlapping chat probes seen within one provider.
    pub(crate) fn max_provider_in_flight(&self, provider: &str) -> usize {
        let observed = self.observed.lock().unwrap();
        observed.max_provider_in_flight.get(provider).copied().unwrap_or(0)
    }

    fn enter(&self, k: &Key) {
        let mut o = self.observed.lock().unwrap();
        *o.chat_calls.entry(k.clone()).or_default() += 1;
        let n = {
            let n = o.in_flight.entry(k.clone()).or_default();
            *n += 1;
            *n
        };
        o.max_in_flight_per_model = o.max_in_flight_per_model.max(n);
        let p = {
            let p = o.provider_in_flight.entry(k.0.clone()).or_default();
            *p += 1;
            *p
        };
        let max = o.max_provider_in_flight.entry(k.0.clone()).or_default();
        *max = (*max).max(p);
    }

    fn leave(&self, k: &Key) {
        let mut o = self.observed.lock().unwrap();
        if let Some(n) = o.in_flight.get_mut(k) {
            *n -= 1;
        }
        if let Some(p) = o.provider_in_flight.get_mut(&k.0) {
            *p -= 1;
        }
    }
}

/// Decrements the in-flight counters even when the probe future is dropped
/// by a timeout.
struct InFlight<'a> {
    adapter: &'a ScriptedAdapter,
    key: Key,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.adapter.leave(&self.key);
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn family(&self) -> ProviderFamily {
        self.script.lock().unwrap().family
    }

    fn display_name(&self) -> &str {
        "scripted"
    }

    async fn list_models(
        &self,
        provider: &Provider,
        _secret: &Secret,
    ) -> Result<Vec<DiscoveredModel>, ProbeFailure> {
        let (delay, outcome) = {
            let s = self.script.lock().unwrap();
            let outcome = match s.listing_failure.get(&provider.id) {
                Some(f) => Err(f.clone()),
                None => Ok(s
                    .models
                    .get(&provider.id)
                    .map(|ids| ids.iter().map(DiscoveredModel::new).collect())
                    .unwrap_or_default()),
            };
            (s.listing_delay.get(&provider.id).copied(), outcome)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }

    async fn lookup_model(
        &self,
        provider: &Provider,
        _secret: &Secret,
        model_id: &str,
    ) -> Result<Lookup, ProbeFailure> {
        let k = key(&provider.id, model_id);
        *self.observed.lock().unwrap().lookup_calls.entry(k.clone()).or_default() += 1;
        let s = self.script.lock().unwrap();
        if let Some(outcome) = s.lookups.get(&k) {
            return outcome.clone();
        }
        if !provider.model_lookup {
            return Ok(Lookup::Unsupported);
        }
        let listed = s
            .models
            .get(&provider.id)
            .is_some_and(|ids| ids.iter().any(|id| id == model_id));
        Ok(if listed { Lookup::Found } else { Lookup::Missing })
    }

    async fn chat_probe(
        &self,
        provider: &Provider,
        _secret: &Secret,
        req: &ChatProbeRequest,
    ) -> Result<ChatReply, ProbeFailure> {
        let k = key(&provider.id, &req.model_id);
        let (delay, failure) = {
            let s = self.script.lock().unwrap();
            (
                s.chat_delays.get(&k).copied().unwrap_or(s.default_chat_delay),
                s.chat_failures.get(&k).cloned(),
            )
        };

        self.enter(&k);
        let _guard = InFlight { adapter: self, key: k };
        let start = Instant::now();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(f) = failure {
            return Err(f);
        }
        let total = start.elapsed();
        Ok(ChatReply {
            status: 200,
            total,
            ttft: req.stream.then(|| total / 2),
        })
    }
}
