//! Verification runs: discover → probe → persist → score.

use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{DiscoveryError, ErrorKind};
use crate::models::ModelRef;

mod executor;

pub use executor::VerificationExecutor;

/// Outcome of one model's probe, as far as the summary cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ModelTally {
    pub recorded: bool,
    pub responsive: bool,
    pub error_kind: Option<ErrorKind>,
    pub store_failed: bool,
}

/// What one provider contributed to a run.
#[derive(Debug, Default)]
pub(crate) struct ProviderOutcome {
    pub provider_id: String,
    pub discovery_error: Option<DiscoveryError>,
    pub models_discovered: usize,
    pub tallies: Vec<ModelTally>,
    pub deactivated: Vec<ModelRef>,
    pub store_errors: usize,
}

impl ProviderOutcome {
    pub fn new(provider_id: &str) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            ..Self::default()
        }
    }
}

/// Totals for one verification run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub run_id: String,
    pub providers_attempted: usize,
    /// Providers whose discovery failed, with the cause. They contributed
    /// no results.
    pub providers_failed: Vec<(String, DiscoveryError)>,
    pub models_discovered: usize,
    /// Verification results persisted, including those for deactivated models.
    pub results_recorded: usize,
    pub responsive: usize,
    pub error_counts: BTreeMap<ErrorKind, usize>,
    pub deactivated: Vec<ModelRef>,
    pub store_errors: usize,
    pub cancelled: bool,
    pub duration: Duration,
}

impl RunSummary {
    pub(crate) fn new(run_id: String, providers_attempted: usize) -> Self {
        Self {
            run_id,
            providers_attempted,
            ..Self::default()
        }
    }

    pub(crate) fn absorb(&mut self, outcome: ProviderOutcome) {
        if let Some(err) = outcome.discovery_error {
            self.providers_failed.push((outcome.provider_id, err));
        }
        self.models_discovered += outcome.models_discovered;
        for tally in &outcome.tallies {
            if tally.recorded {
                self.results_recorded += 1;
            }
            if tally.responsive {
                self.responsive += 1;
            }
            if tally.store_failed {
                self.store_errors += 1;
            }
            if let Some(kind) = tally.error_kind {
                *self.error_counts.entry(kind).or_default() += 1;
            }
        }
        self.deactivated.extend(outcome.deactivated);
        self.store_errors += outcome.store_errors;
    }

    pub fn error_count(&self, kind: ErrorKind) -> usize {
        self.error_counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn failed(&self) -> usize {
        self.error_counts.values().sum()
    }

    pub(crate) fn log(&self) {
        for (provider, err) in &self.providers_failed {
            warn!(run_id = %self.run_id, provider = %provider, error_kind = %err.kind(), "Provider skipped: {}", err);
        }
        info!(
            run_id = %self.run_id,
            providers = self.providers_attempted,
            providers_failed = self.providers_failed.len(),
            models = self.models_discovered,
            recorded = self.results_recorded,
            responsive = self.responsive,
            failed = self.failed(),
            deactivated = self.deactivated.len(),
            store_errors = self.store_errors,
            cancelled = self.cancelled,
            duration_ms = self.duration.as_millis() as u64,
            "📡 Verification run complete"
        );
    }
}
