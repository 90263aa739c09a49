//! Scoring services behind the risk and premium tools.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use underwrite_core::config::{ScoringConfig, ScoringMode};
use underwrite_core::domain::claim::{ClaimRecord, Region};
use underwrite_core::scoring::{heuristic_premium, premium_feature_row, HeuristicRiskModel};

pub const PREMIUM_CURRENCY: &str = "GBP";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ScoringError {
    #[error("scoring request timed out")]
    Timeout,
    #[error("scoring transport error: {0}")]
    Transport(String),
    #[error("scoring endpoint returned status {0}")]
    Status(u16),
    #[error("scoring response malformed: {0}")]
    MalformedResponse(String),
    #[error("scoring is not configured: {0}")]
    NotConfigured(String),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub risk_score: f64,
    pub model_used: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PremiumQuote {
    pub estimated_insurance_premium: f64,
    pub currency: String,
    pub model_used: String,
}

#[async_trait]
pub trait ScoringService: Send + Sync {
    async fn risk(&self, claim: &ClaimRecord) -> Result<RiskAssessment, ScoringError>;

    async fn premium(
        &self,
        coverage_amount: f64,
        region: Option<Region>,
    ) -> Result<PremiumQuote, ScoringError>;
}

pub fn scoring_from_config(
    config: &ScoringConfig,
) -> Result<Box<dyn ScoringService>, ScoringError> {
    match config.mode {
        ScoringMode::Heuristic => Ok(Box::new(HeuristicScoringService::default())),
        ScoringMode::Remote => Ok(Box::new(HttpScoringService::from_config(config)?)),
    }
}

#[derive(Default)]
pub struct HeuristicScoringService {
    model: HeuristicRiskModel,
}

#[async_trait]
impl ScoringService for HeuristicScoringService {
    async fn risk(&self, claim: &ClaimRecord) -> Result<RiskAssessment, ScoringError> {
        let estimate = self.model.score(claim);
        Ok(RiskAssessment { risk_score: estimate.risk_score, model_used: estimate.model_version })
    }

    async fn premium(
        &self,
        coverage_amount: f64,
        region: Option<Region>,
    ) -> Result<PremiumQuote, ScoringError> {
        let estimate = heuristic_premium(coverage_amount, region);
        Ok(PremiumQuote {
            estimated_insurance_premium: estimate.premium,
            currency: PREMIUM_CURRENCY.to_string(),
            model_used: estimate.model_version,
        })
    }
}

/// Hosted model endpoints taking a CSV feature row and answering
/// `{"predictions":[{"score":..}]}`.
pub struct HttpScoringService {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    risk_endpoint: String,
    premium_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    score: f64,
}

impl HttpScoringService {
    pub fn from_config(config: &ScoringConfig) -> Result<Self, ScoringError> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| ScoringError::NotConfigured("scoring.base_url is required".into()))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| ScoringError::Transport(error.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            risk_endpoint: config.risk_endpoint.clone(),
            premium_endpoint: config.premium_endpoint.clone(),
        })
    }

    pub fn invocation_url(&self, endpoint: &str) -> String {
        format!("{}/endpoints/{endpoint}/invocations", self.base_url)
    }

    async fn invoke(&self, endpoint: &str, row: String) -> Result<f64, ScoringError> {
        let url = self.invocation_url(endpoint);
        debug!(event_name = "agent.scoring.invoke", endpoint, row = %row);

        let mut request =
            self.client.post(&url).header(reqwest::header::CONTENT_TYPE, "text/csv").body(row);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }
        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                ScoringError::Timeout
            } else {
                ScoringError::Transport(error.to_string())
            }
        })?;
        if !response.status().is_success() {
            return Err(ScoringError::Status(response.status().as_u16()));
        }

        let body: PredictionResponse = response
            .json()
            .await
            .map_err(|error| ScoringError::MalformedResponse(error.to_string()))?;
        let score = body
            .predictions
            .first()
            .map(|prediction| prediction.score)
            .filter(|score| score.is_finite())
            .ok_or_else(|| ScoringError::MalformedResponse("no prediction score".to_string()))?;
        Ok(score)
    }
}

#[async_trait]
impl ScoringService for HttpScoringService {
    async fn risk(&self, claim: &ClaimRecord) -> Result<RiskAssessment, ScoringError> {
        let row = premium_feature_row(
            claim.coverage_amount.unwrap_or(0.0),
            claim.region_of_operation,
        );
        let score = self.invoke(&self.risk_endpoint, row).await?;
        Ok(RiskAssessment {
            risk_score: round_to(score.clamp(0.0, 1.0), 4),
            model_used: self.risk_endpoint.clone(),
        })
    }

    async fn premium(
        &self,
        coverage_amount: f64,
        region: Option<Region>,
    ) -> Result<PremiumQuote, ScoringError> {
        let row = premium_feature_row(coverage_amount, region);
        let score = self.invoke(&self.premium_endpoint, row).await?;
        Ok(PremiumQuote {
            estimated_insurance_premium: round_to(score, 2),
            currency: PREMIUM_CURRENCY.to_string(),
            model_used: self.premium_endpoint.clone(),
        })
    }
}

/// Fixed answers with an optional delay, counting every call.
pub struct StaticScoringService {
    pub risk_score: f64,
    pub premium: f64,
    pub model_used: String,
    pub delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticScoringService {
    pub fn new(risk_score: f64, premium: f64) -> Self {
        Self {
            risk_score,
            premium,
            model_used: "static-test-model".to_string(),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ScoringService for StaticScoringService {
    async fn risk(&self, _claim: &ClaimRecord) -> Result<RiskAssessment, ScoringError> {
        self.enter().await;
        Ok(RiskAssessment { risk_score: self.risk_score, model_used: self.model_used.clone() })
    }

    async fn premium(
        &self,
        _coverage_amount: f64,
        _region: Option<Region>,
    ) -> Result<PremiumQuote, ScoringError> {
        self.enter().await;
        Ok(PremiumQuote {
            estimated_insurance_premium: self.premium,
            currency: PREMIUM_CURRENCY.to_string(),
            model_used: self.model_used.clone(),
        })
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10_f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use underwrite_core::config::{
        ScoringConfig, ScoringMode, DEFAULT_PREMIUM_ENDPOINT, DEFAULT_RISK_ENDPOINT,
    };
    use underwrite_core::domain::claim::{ClaimRecord, Region};

    use super::{HeuristicScoringService, HttpScoringService, ScoringError, ScoringService};

    fn remote_config(base_url: Option<&str>) -> ScoringConfig {
        ScoringConfig {
            mode: ScoringMode::Remote,
            base_url: base_url.map(str::to_string),
            api_key: None,
            risk_endpoint: DEFAULT_RISK_ENDPOINT.to_string(),
            premium_endpoint: DEFAULT_PREMIUM_ENDPOINT.to_string(),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn heuristic_premium_is_tagged_gbp() {
        let service = HeuristicScoringService::default();
        let quote = service.premium(1_000_000.0, Some(Region::Gb)).await.expect("quote");
        assert!((quote.estimated_insurance_premium - 22_000.0).abs() < 1e-6);
        assert_eq!(quote.currency, "GBP");
        assert_eq!(quote.model_used, "heuristic-v1");
    }

    #[tokio::test]
    async fn heuristic_risk_stays_in_unit_interval() {
        let service = HeuristicScoringService::default();
        let claim = ClaimRecord {
            coverage_amount: Some(250_000.0),
            region_of_operation: Some(Region::Africa),
            ..ClaimRecord::default()
        };
        let assessment = service.risk(&claim).await.expect("risk");
        assert!((0.0..=1.0).contains(&assessment.risk_score));
    }

    #[test]
    fn remote_scoring_requires_a_base_url() {
        assert!(matches!(
            HttpScoringService::from_config(&remote_config(None)),
            Err(ScoringError::NotConfigured(_))
        ));
        let service =
            HttpScoringService::from_config(&remote_config(Some("http://models.local/")))
                .expect("service");
        assert_eq!(
            service.invocation_url(DEFAULT_PREMIUM_ENDPOINT),
            "http://models.local/endpoints/claim-amount-linear-v2-endpoint/invocations"
        );
    }
}
