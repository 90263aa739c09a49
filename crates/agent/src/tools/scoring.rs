use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::scoring::{ScoringError, ScoringService};

use super::{
    claim_data_schema, require_claim, SideEffect, Tool, ToolDescriptor, ToolError, ToolErrorKind,
    ToolInput, ToolOutput,
};

impl From<ScoringError> for ToolError {
    fn from(error: ScoringError) -> Self {
        match error {
            ScoringError::Timeout => {
                ToolError::new(ToolErrorKind::Timeout, "the scoring model did not answer in time")
            }
            ScoringError::MalformedResponse(_) => ToolError::new(
                ToolErrorKind::MalformedResponse,
                "the scoring model returned an unreadable answer",
            ),
            ScoringError::Transport(_)
            | ScoringError::Status(_)
            | ScoringError::NotConfigured(_) => {
                ToolError::upstream("the scoring model is currently unavailable")
            }
        }
    }
}

pub struct AssessRiskTool {
    descriptor: ToolDescriptor,
    scoring: Arc<dyn ScoringService>,
}

impl AssessRiskTool {
    pub const NAME: &'static str = "assess_risk";

    pub fn new(scoring: Arc<dyn ScoringService>) -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: Self::NAME,
                description: "Determine the overall risk exposure rating of an organisation from \
                              our risk model. Use only when the user asks for a risk rating.",
                parameters: claim_data_schema(
                    "Structured claim data with fields like coverage_amount and region_of_operation.",
                ),
                requires_claim_data: true,
                idempotent: false,
                side_effect: SideEffect::ExternalCall,
            },
            scoring,
        }
    }
}

#[async_trait]
impl Tool for AssessRiskTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let claim = require_claim(&input)?;
        let assessment = self.scoring.risk(claim).await?;
        Ok(ToolOutput::payload(json!({
            "risk_score": assessment.risk_score,
            "model_used": assessment.model_used,
        })))
    }
}

pub struct EstimatePremiumTool {
    descriptor: ToolDescriptor,
    scoring: Arc<dyn ScoringService>,
}

impl EstimatePremiumTool {
    pub const NAME: &'static str = "estimate_premium";

    pub fn new(scoring: Arc<dyn ScoringService>) -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: Self::NAME,
                description: "Estimate the likely insurance premium in GBP from our premium model. \
                              Use only when the user asks for a premium.",
                parameters: claim_data_schema(
                    "Structured claim data; coverage_amount is required, region_of_operation \
                     defaults to other.",
                ),
                requires_claim_data: true,
                idempotent: false,
                side_effect: SideEffect::ExternalCall,
            },
            scoring,
        }
    }
}

#[async_trait]
impl Tool for EstimatePremiumTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let claim = require_claim(&input)?;
        let coverage_amount = claim
            .coverage_amount
            .filter(|amount| *amount >= 0.0)
            .ok_or_else(|| ToolError::missing_claim_data(&["coverage_amount"]))?;
        let quote = self.scoring.premium(coverage_amount, claim.region_of_operation).await?;
        Ok(ToolOutput::payload(json!({
            "estimated_insurance_premium": quote.estimated_insurance_premium,
            "currency": quote.currency,
            "model_used": quote.model_used,
        })))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use underwrite_core::domain::claim::{ClaimRecord, Region};

    use super::{AssessRiskTool, EstimatePremiumTool};
    use crate::scoring::HeuristicScoringService;
    use crate::tools::{Tool, ToolErrorKind, ToolInput};

    fn input(claim: Option<ClaimRecord>) -> ToolInput {
        ToolInput { session_id: "s-1".to_string(), arguments: json!({}), claim }
    }

    #[tokio::test]
    async fn premium_uses_coverage_and_region() {
        let tool = EstimatePremiumTool::new(Arc::new(HeuristicScoringService::default()));
        let claim = ClaimRecord {
            coverage_amount: Some(500_000.0),
            region_of_operation: Some(Region::Eu),
            ..ClaimRecord::default()
        };

        let output = tool.invoke(input(Some(claim))).await.expect("premium");
        assert_eq!(output.payload["estimated_insurance_premium"], json!(11_500.0));
        assert_eq!(output.payload["currency"], "GBP");
        assert!(output.payload.get("risk_score").is_none());
    }

    #[tokio::test]
    async fn premium_without_coverage_names_the_missing_field() {
        let tool = EstimatePremiumTool::new(Arc::new(HeuristicScoringService::default()));
        let claim = ClaimRecord { policy_number: Some("POL-123".to_string()), ..ClaimRecord::default() };

        let error = tool.invoke(input(Some(claim))).await.expect_err("missing coverage");
        assert_eq!(error.kind, ToolErrorKind::MissingClaimData);
        assert!(error.message.contains("coverage_amount"));
    }

    #[tokio::test]
    async fn risk_rejects_failed_extraction() {
        let tool = AssessRiskTool::new(Arc::new(HeuristicScoringService::default()));

        let error =
            tool.invoke(input(Some(ClaimRecord::extraction_failed()))).await.expect_err("no data");
        assert_eq!(error.kind, ToolErrorKind::MissingClaimData);

        let claim = ClaimRecord { policy_number: Some("POL-123".to_string()), ..ClaimRecord::default() };
        let output = tool.invoke(input(Some(claim))).await.expect("risk");
        let score = output.payload["risk_score"].as_f64().expect("score");
        assert!((0.0..=1.0).contains(&score));
        assert!(output.payload.get("estimated_insurance_premium").is_none());
    }
}
