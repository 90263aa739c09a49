use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use underwrite_db::repositories::{FailureScoreRepository, RepositoryError};
use underwrite_db::UnderwritingLookup;

use super::{
    claim_data_schema, SideEffect, Tool, ToolDescriptor, ToolError, ToolInput, ToolOutput,
};

impl From<RepositoryError> for ToolError {
    fn from(error: RepositoryError) -> Self {
        warn!(event_name = "agent.tool.lookup_failed", error = %error, "lookup query failed");
        ToolError::upstream("the underwriting database is currently unavailable")
    }
}

/// Identity fields from the resolved claim, falling back to top-level
/// arguments of the same name.
fn identity(input: &ToolInput) -> (Option<String>, Option<String>) {
    let claim = input.claim.as_ref();
    let policy_number = claim
        .and_then(|claim| claim.policy_number.clone())
        .or_else(|| input.text_argument("policy_number").map(str::to_string));
    let claimant_name = claim
        .and_then(|claim| claim.claimant_name.clone())
        .or_else(|| input.text_argument("claimant_name").map(str::to_string));
    (policy_number, claimant_name)
}

pub struct GetUserPolicyTool {
    descriptor: ToolDescriptor,
    lookup: UnderwritingLookup,
}

impl GetUserPolicyTool {
    pub const NAME: &'static str = "get_user_policy";

    pub fn new(lookup: UnderwritingLookup) -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: Self::NAME,
                description: "Validate a policy using the policy number or claimant name against \
                              the internal database. Returns an empty list when nothing matches.",
                parameters: claim_data_schema(
                    "Structured claim object containing at least claimant_name or policy_number.",
                ),
                requires_claim_data: true,
                idempotent: false,
                side_effect: SideEffect::ReadOnly,
            },
            lookup,
        }
    }
}

#[async_trait]
impl Tool for GetUserPolicyTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let (policy_number, claimant_name) = identity(&input);
        let policies =
            self.lookup.user_policies(policy_number.as_deref(), claimant_name.as_deref()).await?;
        Ok(ToolOutput::payload(json!(policies)))
    }
}

pub struct GetClaimHistoryTool {
    descriptor: ToolDescriptor,
    lookup: UnderwritingLookup,
}

impl GetClaimHistoryTool {
    pub const NAME: &'static str = "get_claim_history";

    pub fn new(lookup: UnderwritingLookup) -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: Self::NAME,
                description: "Retrieve the claim history for a customer using the policy number \
                              or claimant name: total claims, approved amount and every claim.",
                parameters: claim_data_schema(
                    "Structured claim object containing at least claimant_name or policy_number.",
                ),
                requires_claim_data: true,
                idempotent: false,
                side_effect: SideEffect::ReadOnly,
            },
            lookup,
        }
    }
}

#[async_trait]
impl Tool for GetClaimHistoryTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let (policy_number, claimant_name) = identity(&input);
        let history =
            self.lookup.claim_history(policy_number.as_deref(), claimant_name.as_deref()).await?;
        Ok(ToolOutput::payload(json!(history)))
    }
}

pub struct RetrieveFailureRatingTool {
    descriptor: ToolDescriptor,
    repository: Arc<dyn FailureScoreRepository>,
}

impl RetrieveFailureRatingTool {
    pub const NAME: &'static str = "retrieve_failure_rating";

    pub fn new(repository: Arc<dyn FailureScoreRepository>) -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: Self::NAME,
                description: "Retrieve the Dun & Bradstreet failure score and commentary for an \
                              organisation.",
                parameters: claim_data_schema(
                    "Structured claim object containing organisation_name.",
                ),
                requires_claim_data: true,
                idempotent: false,
                side_effect: SideEffect::ReadOnly,
            },
            repository,
        }
    }
}

#[async_trait]
impl Tool for RetrieveFailureRatingTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let organisation_name = input
            .claim
            .as_ref()
            .and_then(|claim| claim.organisation_name.clone())
            .or_else(|| input.text_argument("organisation_name").map(str::to_string))
            .ok_or_else(|| ToolError::missing_claim_data(&["organisation_name"]))?;
        let scores = self.repository.search(&organisation_name).await?;
        Ok(ToolOutput::payload(json!(scores)))
    }
}
