//! model-verifier — find out which configured LLM models actually work.
//!
//! Each run lists the models every active provider advertises, checks that
//! each one exists and answers a short prompt, and stores the measurement
//! together with a composite 0–10 score.
//!
//! ```text
//! ProviderCatalog ──▶ ModelDiscoveryClient ──▶ ProbeClient ──▶ ScoringEngine
//!                              │                    │                │
//!                              └──────────▶ ResultStore ◀────────────┘
//! ```

pub mod adapters;
pub mod catalog;
pub mod config;
pub mod discovery;
pub mod error;
pub mod metadata;
pub mod models;
pub mod probe;
pub mod scoring;
pub mod store;
pub mod verify;

pub use adapters::{AdapterRegistry, ProviderAdapter};
pub use catalog::{Provider, ProviderCatalog, ProviderFamily};
pub use config::Config;
pub use error::{DiscoveryError, ErrorKind, ProbeFailure};
pub use metadata::{ExternalMetadata, MetadataCatalog};
pub use models::{ModelRef, ModelScore, VerificationResult};
pub use scoring::{ScoreWeights, ScoringEngine};
pub use store::{ResultStore, SqliteStore, StoreEvent};
pub use verify::{RunSummary, VerificationExecutor};
