//! Result store — the pipeline's only shared mutable resource.
//!
//! Providers and models are upserted; verification results and scores are
//! append-only logs ordered by a store-assigned sequence number, so
//! "latest" is simply the highest sequence for a model. Every append is
//! announced on a broadcast channel for whoever wants to watch.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::models::{
    DiscoveredModel, ModelRecord, ModelRef, ModelScore, ProviderRecord, ScoredModel, StoredResult,
    VerificationResult,
};

pub mod sqlite;

pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// An insert whose value list does not line up with its column list.
    /// This is a programming error, never a runtime condition.
    #[error("insert into '{table}' declares {columns} columns but binds {values} values")]
    ColumnMismatch {
        table: &'static str,
        columns: usize,
        values: usize,
    },

    #[error("failed to open result store at {path}: {source}")]
    Open {
        path: String,
        source: rusqlite::Error,
    },
}

/// Something was appended. Carries keys only; readers fetch what they need.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    ResultAppended { model: ModelRef, seq: i64 },
    ScoreAppended { model: ModelRef, seq: i64, overall: f64 },
}

impl StoreEvent {
    pub fn model(&self) -> &ModelRef {
        match self {
            StoreEvent::ResultAppended { model, .. } | StoreEvent::ScoreAppended { model, .. } => model,
        }
    }
}

pub trait ResultStore: Send + Sync {
    fn upsert_provider(&self, provider: &ProviderRecord) -> Result<(), StoreError>;

    /// Idempotent on `(provider_id, model_id)`; `discovered_at` is kept from
    /// the first insert.
    fn upsert_model(&self, model: &ModelRecord) -> Result<(), StoreError>;

    /// Upsert a whole discovery listing in one transaction. Returns the
    /// number of rows written.
    fn upsert_models(
        &self,
        provider_id: &str,
        models: &[DiscoveredModel],
        seen_at: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// Mark every active model of `provider_id` not in `present` inactive and
    /// return their ids.
    fn deactivate_missing(&self, provider_id: &str, present: &[String]) -> Result<Vec<String>, StoreError>;

    fn list_providers(&self) -> Result<Vec<ProviderRecord>, StoreError>;

    fn list_models(&self, provider_id: Option<&str>) -> Result<Vec<ModelRecord>, StoreError>;

    /// Append-only. Returns the new sequence number.
    fn append_verification_result(&self, result: &VerificationResult) -> Result<i64, StoreError>;

    /// Append-only. Returns the new sequence number.
    fn append_model_score(&self, score: &ModelScore) -> Result<i64, StoreError>;

    fn latest_result(&self, model: &ModelRef) -> Result<Option<StoredResult>, StoreError>;

    fn latest_score(&self, model: &ModelRef) -> Result<Option<ModelScore>, StoreError>;

    /// Newest first.
    fn result_history(&self, model: &ModelRef, limit: usize) -> Result<Vec<StoredResult>, StoreError>;

    /// Models whose latest score lies in `[min, max]`, best first.
    fn list_models_by_score_range(&self, min: f64, max: f64) -> Result<Vec<ScoredModel>, StoreError>;

    fn top_models(&self, limit: usize) -> Result<Vec<ScoredModel>, StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}
