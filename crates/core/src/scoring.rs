//! Deterministic scoring models used when no remote scoring service is
//! configured, and as the reference values in tests.

use serde::{Deserialize, Serialize};

use crate::domain::claim::{ClaimRecord, Region};

pub const HEURISTIC_MODEL_VERSION: &str = "heuristic-v1";

/// Regional loading applied by the premium estimator.
pub fn region_modifier(region: Region) -> f64 {
    match region {
        Region::Gb => 2.2,
        Region::Usa => 2.1,
        Region::Eu => 2.3,
        Region::Asia => 3.0,
        Region::Africa => 4.5,
        Region::Other => 1.5,
    }
}

/// Feature row sent to the remote premium model: coverage in thousands and
/// the region ordinal, comma separated.
pub fn premium_feature_row(coverage_amount: f64, region: Option<Region>) -> String {
    let thousands = (coverage_amount / 1000.0).floor() as i64;
    let ordinal = region.unwrap_or(Region::Other).ordinal();
    format!("{thousands},{ordinal}")
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PremiumEstimate {
    pub premium: f64,
    pub coverage_amount: f64,
    pub region: Region,
    pub modifier: f64,
    pub model_version: String,
}

/// `(coverage / 100, floored) * modifier`, rounded to two decimals.
pub fn heuristic_premium(coverage_amount: f64, region: Option<Region>) -> PremiumEstimate {
    let region = region.unwrap_or(Region::Other);
    let modifier = region_modifier(region);
    let units = (coverage_amount.max(0.0) / 100.0).floor();
    PremiumEstimate {
        premium: round_cents(units * modifier),
        coverage_amount,
        region,
        modifier,
        model_version: HEURISTIC_MODEL_VERSION.to_string(),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskEstimate {
    pub risk_score: f64,
    pub band: RiskBand,
    pub model_version: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBand {
    Low,
    Medium,
    High,
}

impl RiskBand {
    pub fn from_score(score: f64) -> Self {
        if score < 0.35 {
            Self::Low
        } else if score < 0.65 {
            Self::Medium
        } else {
            Self::High
        }
    }
}

/// Logistic risk model over normalised claim features.
#[derive(Clone, Debug, PartialEq)]
pub struct HeuristicRiskModel {
    /// bias, coverage, region loading, missing identity, missing description
    weights: [f64; 5],
}

impl Default for HeuristicRiskModel {
    fn default() -> Self {
        Self { weights: [-1.2, 1.6, 1.1, 0.6, 0.3] }
    }
}

impl HeuristicRiskModel {
    fn sigmoid(z: f64) -> f64 {
        let z = z.clamp(-500.0, 500.0);
        1.0 / (1.0 + (-z).exp())
    }

    /// Features in 0..=1: log-scaled coverage (saturating at 10m), region
    /// loading relative to the highest modifier, and two absence flags.
    pub fn features(claim: &ClaimRecord) -> [f64; 5] {
        let coverage = claim.coverage_amount.unwrap_or(0.0).max(0.0);
        let coverage_norm = ((1.0 + coverage).ln() / (1.0 + 10_000_000.0_f64).ln()).clamp(0.0, 1.0);
        let region_norm =
            region_modifier(claim.region_of_operation.unwrap_or(Region::Other)) / 4.5;
        [
            1.0,
            coverage_norm,
            region_norm.clamp(0.0, 1.0),
            if claim.has_identity() { 0.0 } else { 1.0 },
            if claim.description.is_some() { 0.0 } else { 1.0 },
        ]
    }

    pub fn score(&self, claim: &ClaimRecord) -> RiskEstimate {
        let x = Self::features(claim);
        let z: f64 = self.weights.iter().zip(x.iter()).map(|(w, xi)| w * xi).sum();
        let risk_score = round_to(Self::sigmoid(z).clamp(0.0, 1.0), 4);
        RiskEstimate {
            risk_score,
            band: RiskBand::from_score(risk_score),
            model_version: HEURISTIC_MODEL_VERSION.to_string(),
        }
    }
}

fn round_cents(value: f64) -> f64 {
    round_to(value, 2)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10_f64.powi(places);
    (value * factor).round() / factor
}
