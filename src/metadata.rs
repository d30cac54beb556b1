//! External model metadata: prices, size, feature flags, release dates.
//!
//! Loaded from a YAML (or JSON) file shaped like a models.dev export:
//!
//! ```yaml
//! models:
//!   - provider: openai
//!     model: gpt-4o-mini
//!     input_cost_per_1m: 0.15
//!     output_cost_per_1m: 0.60
//!     context_window: 128000
//!     tool_call: true
//!     vision: true
//!     structured_output: true
//!     release_date: 2024-07-18
//!   - provider: "*"
//!     model: llama-3.1-8b-instant
//!     parameter_count_b: 8
//!     free_to_use: true
//! ```
//!
//! A `"*"` provider matches the model id on any provider that has no entry
//! of its own.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::models::ModelRef;

pub const ANY_PROVIDER: &str = "*";

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("failed to read metadata file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid metadata file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("metadata for {model}: {reason}")]
    Invalid { model: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExternalMetadata {
    #[serde(default)]
    pub free_to_use: bool,
    /// USD per million input tokens.
    #[serde(default)]
    pub input_cost_per_1m: Option<f64>,
    #[serde(default)]
    pub output_cost_per_1m: Option<f64>,
    /// Billions of parameters.
    #[serde(default)]
    pub parameter_count_b: Option<f64>,
    #[serde(default)]
    pub context_window: Option<u64>,
    #[serde(default)]
    pub tool_call: bool,
    #[serde(default)]
    pub vision: bool,
    #[serde(default)]
    pub reasoning: bool,
    #[serde(default)]
    pub structured_output: bool,
    #[serde(default)]
    pub release_date: Option<NaiveDate>,
}

impl ExternalMetadata {
    fn validate(&self) -> Result<(), String> {
        let numbers = [
            ("input_cost_per_1m", self.input_cost_per_1m),
            ("output_cost_per_1m", self.output_cost_per_1m),
            ("parameter_count_b", self.parameter_count_b),
        ];
        for (field, value) in numbers {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(format!("{field} must be a non-negative number, got {v}"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct MetadataFile {
    #[serde(default)]
    models: Vec<MetadataEntry>,
}

#[derive(Debug, Deserialize)]
struct MetadataEntry {
    provider: String,
    model: String,
    #[serde(flatten)]
    meta: ExternalMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct MetadataCatalog {
    entries: HashMap<ModelRef, ExternalMetadata>,
}

impl MetadataCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let raw = std::fs::read_to_string(path).map_err(|source| MetadataError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    /// YAML is a superset of JSON, so both parse here.
    pub fn from_yaml(raw: &str) -> Result<Self, MetadataError> {
        let file: MetadataFile = serde_yaml::from_str(raw)?;
        let mut catalog = Self::empty();
        for entry in file.models {
            let model = ModelRef::new(entry.provider, entry.model);
            entry.meta.validate().map_err(|reason| MetadataError::Invalid {
                model: model.to_string(),
                reason,
            })?;
            catalog.insert(model, entry.meta);
        }
        Ok(catalog)
    }

    /// Later entries for the same model replace earlier ones.
    pub fn insert(&mut self, model: ModelRef, meta: ExternalMetadata) {
        self.entries.insert(model, meta);
    }

    pub fn get(&self, model: &ModelRef) -> Option<&ExternalMetadata> {
        self.entries.get(model).or_else(|| {
            self.entries
                .get(&ModelRef::new(ANY_PROVIDER, model.model_id.as_str()))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
