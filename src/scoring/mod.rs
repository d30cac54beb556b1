//! Composite model scoring.
//!
//! Five components, each in [0, 10], combined with fixed weights:
//!
//! | component  | weight | driven by                                   |
//! |------------|--------|---------------------------------------------|
//! | speed      | 0.25   | latency / time-to-first-token               |
//! | efficiency | 0.20   | parameter count                             |
//! | cost       | 0.25   | per-token price, free-to-use flag           |
//! | capability | 0.20   | tool calling, vision, reasoning, JSON mode  |
//! | recency    | 0.10   | age of the release at verification time     |
//!
//! The engine is a pure function of (result, metadata, weights); the
//! wall clock only ever reaches `computed_at`. A model that does not exist
//! scores 0 across the board.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::metadata::ExternalMetadata;
use crate::models::{ModelRef, ModelScore, ScoreComponents, VerificationResult};

pub mod naming;

/// Neutral value for a component whose inputs are unknown.
pub const NEUTRAL: f64 = 5.0;
pub const MAX_SCORE: f64 = 10.0;

const WEIGHT_TOLERANCE: f64 = 1e-9;

// Curve midpoints: the input at which a component scores 5.0.
const LATENCY_MIDPOINT_MS: f64 = 2000.0;
const PARAMS_MIDPOINT_B: f64 = 70.0;
const PRICE_MIDPOINT_PER_1M: f64 = 5.0;
const RECENCY_HALF_LIFE_DAYS: f64 = 365.0;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ScoringError {
    #[error("score weights must be finite and non-negative ({0})")]
    NegativeWeight(String),

    #[error("score weights must sum to 1.0, got {0}")]
    WeightSum(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub speed: f64,
    pub efficiency: f64,
    pub cost: f64,
    pub capability: f64,
    pub recency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            speed: 0.25,
            efficiency: 0.20,
            cost: 0.25,
            capability: 0.20,
            recency: 0.10,
        }
    }
}

impl ScoreWeights {
    fn named(&self) -> [(&'static str, f64); 5] {
        [
            ("speed", self.speed),
            ("efficiency", self.efficiency),
            ("cost", self.cost),
            ("capability", self.capability),
            ("recency", self.recency),
        ]
    }

    pub fn sum(&self) -> f64 {
        self.named().iter().map(|(_, w)| w).sum()
    }

    pub fn validate(&self) -> Result<(), ScoringError> {
        for (name, w) in self.named() {
            if !w.is_finite() || w < 0.0 {
                return Err(ScoringError::NegativeWeight(format!("{name} = {w}")));
            }
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ScoringError::WeightSum(sum));
        }
        Ok(())
    }

    fn combine(&self, c: &ScoreComponents) -> f64 {
        self.speed * c.speed
            + self.efficiency * c.efficiency
            + self.cost * c.cost
            + self.capability * c.capability
            + self.recency * c.recency
    }
}

/// Everything that can change a score. Its hash is `inputs_hash`.
#[derive(Debug, Serialize)]
struct ScoreInputs<'a> {
    model: &'a ModelRef,
    model_exists: bool,
    is_responsive: bool,
    latency_ms: Option<u64>,
    ttft_ms: Option<u64>,
    reference_date: NaiveDate,
    meta: Option<&'a ExternalMetadata>,
    weights: &'a ScoreWeights,
}

#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    weights: ScoreWeights,
}

impl ScoringEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weights(weights: ScoreWeights) -> Result<Self, ScoringError> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    /// Score a verification result now.
    pub fn score(&self, result: &VerificationResult, meta: Option<&ExternalMetadata>) -> ModelScore {
        self.score_at(result, meta, Utc::now())
    }

    /// Score with an explicit `computed_at`. Identical arguments give an
    /// identical `ModelScore`.
    pub fn score_at(
        &self,
        result: &VerificationResult,
        meta: Option<&ExternalMetadata>,
        computed_at: DateTime<Utc>,
    ) -> ModelScore {
        let components = components(result, meta);
        let overall = if result.model_exists {
            round1(self.weights.combine(&components).clamp(0.0, MAX_SCORE))
        } else {
            0.0
        };
        ModelScore {
            model: result.model.clone(),
            overall_score: overall,
            components,
            score_suffix: naming::format_suffix(overall),
            computed_at,
            inputs_hash: self.inputs_hash(result, meta),
        }
    }

    pub fn inputs_hash(&self, result: &VerificationResult, meta: Option<&ExternalMetadata>) -> String {
        let inputs = ScoreInputs {
            model: &result.model,
            model_exists: result.model_exists,
            is_responsive: result.is_responsive,
            latency_ms: result.latency_ms,
            ttft_ms: result.ttft_ms,
            reference_date: result.timestamp.date_naive(),
            meta,
            weights: &self.weights,
        };
        // serde_json only fails on maps with non-string keys, and there are
        // none here; the fallback still covers every input.
        let canonical = serde_json::to_vec(&inputs).unwrap_or_else(|_| format!("{inputs:?}").into_bytes());
        hex::encode(Sha256::digest(&canonical))
    }
}

/// Per-component scores. All zero for a model that does not exist.
pub fn components(result: &VerificationResult, meta: Option<&ExternalMetadata>) -> ScoreComponents {
    if !result.model_exists {
        return ScoreComponents::default();
    }
    let reference = result.timestamp.date_naive();
    ScoreComponents {
        speed: speed_score(result),
        efficiency: meta.and_then(|m| m.parameter_count_b).map_or(NEUTRAL, |p| {
            decay(p, PARAMS_MIDPOINT_B)
        }),
        cost: meta.map_or(NEUTRAL, cost_score),
        capability: meta.map_or(NEUTRAL, capability_score),
        recency: meta
            .and_then(|m| m.release_date)
            .map_or(NEUTRAL, |released| recency_score(released, reference)),
    }
}

/// 10 at zero, 5 at `midpoint`, tending to 0.
fn decay(value: f64, midpoint: f64) -> f64 {
    (MAX_SCORE / (1.0 + value.max(0.0) / midpoint)).clamp(0.0, MAX_SCORE)
}

fn speed_score(result: &VerificationResult) -> f64 {
    if !result.is_responsive {
        return 0.0;
    }
    let Some(latency) = result.latency_ms else {
        return NEUTRAL;
    };
    let effective = match result.ttft_ms {
        Some(ttft) => 0.7 * latency as f64 + 0.3 * ttft as f64,
        None => latency as f64,
    };
    decay(effective, LATENCY_MIDPOINT_MS)
}

fn cost_score(meta: &ExternalMetadata) -> f64 {
    if meta.free_to_use {
        return MAX_SCORE;
    }
    let prices: Vec<f64> = [meta.input_cost_per_1m, meta.output_cost_per_1m]
        .into_iter()
        .flatten()
        .collect();
    if prices.is_empty() {
        return NEUTRAL;
    }
    let mean = prices.iter().sum::<f64>() / prices.len() as f64;
    decay(mean, PRICE_MIDPOINT_PER_1M)
}

fn capability_score(meta: &ExternalMetadata) -> f64 {
    let mut score: f64 = 4.0;
    if meta.tool_call {
        score += 1.5;
    }
    if meta.vision {
        score += 1.5;
    }
    if meta.reasoning {
        score += 1.5;
    }
    if meta.structured_output {
        score += 1.0;
    }
    if meta.context_window.is_some_and(|c| c >= 128_000) {
        score += 0.5;
    }
    score.min(MAX_SCORE)
}

fn recency_score(released: NaiveDate, reference: NaiveDate) -> f64 {
    let age_days = (reference - released).num_days().max(0) as f64;
    (MAX_SCORE * 0.5f64.powf(age_days / RECENCY_HALF_LIFE_DAYS)).clamp(0.0, MAX_SCORE)
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}
