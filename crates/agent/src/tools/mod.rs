//! Tool catalog: every capability the orchestrator may invoke, with its
//! declared input schema and invocation contract.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use underwrite_core::domain::claim::ClaimRecord;
use underwrite_core::domain::metrics::TokenUsage;
use underwrite_db::repositories::FailureScoreRepository;
use underwrite_db::UnderwritingLookup;

use crate::llm::{LlmClient, ToolSpec};
use crate::memory::MemoryStore;
use crate::scoring::ScoringService;
use crate::structurer::ClaimStructurer;

pub mod consumer_duty;
pub mod lookup;
pub mod memory;
pub mod scoring;
pub mod structure;

pub use consumer_duty::CheckConsumerDutyTool;
pub use lookup::{GetClaimHistoryTool, GetUserPolicyTool, RetrieveFailureRatingTool};
pub use memory::SearchDocumentsTool;
pub use scoring::{AssessRiskTool, EstimatePremiumTool};
pub use structure::StructureClaimDataTool;

pub const CLAIM_DATA_ARGUMENT: &str = "claim_data";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    ReadOnly,
    ExternalCall,
    LanguageModel,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
    /// The orchestrator resolves a `ClaimRecord` before invoking the tool.
    pub requires_claim_data: bool,
    /// Safe to run again after an attempt with an unknown outcome.
    pub idempotent: bool,
    pub side_effect: SideEffect,
}

impl ToolDescriptor {
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.to_string(),
            description: self.description.to_string(),
            parameters: self.parameters.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolInput {
    pub session_id: String,
    pub arguments: Value,
    /// Resolved claim for tools that declare `claim_data`.
    pub claim: Option<ClaimRecord>,
}

impl ToolInput {
    pub fn text_argument(&self, name: &str) -> Option<&str> {
        self.arguments
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutput {
    pub payload: Value,
    /// Claim produced by the tool, adopted by the session.
    pub claim: Option<ClaimRecord>,
    pub usage: TokenUsage,
}

impl ToolOutput {
    pub fn payload(payload: Value) -> Self {
        Self { payload, claim: None, usage: TokenUsage::default() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    InvalidInput,
    MissingClaimData,
    Timeout,
    Upstream,
    MalformedResponse,
    DuplicateSuppressed,
}

impl ToolErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::MissingClaimData => "missing_claim_data",
            Self::Timeout => "timeout",
            Self::Upstream => "upstream",
            Self::MalformedResponse => "malformed_response",
            Self::DuplicateSuppressed => "duplicate_suppressed",
        }
    }
}

/// Tool failure with a message that is safe to show to the model and user.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Upstream, message)
    }

    pub fn missing_claim_data(fields: &[&str]) -> Self {
        Self::new(
            ToolErrorKind::MissingClaimData,
            format!("claim data is missing required fields: {}", fields.join(", ")),
        )
    }

    /// Payload recorded in the tool-result turn.
    pub fn to_payload(&self) -> Value {
        json!({
            "kind": "ToolInvocationFailure",
            "error_kind": self.kind.as_str(),
            "message": self.message,
        })
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("tool `{0}` is already registered")]
    DuplicateTool(String),
}

/// Registered tools keyed by unique name. Built once, then shared read-only.
#[derive(Default)]
pub struct ToolCatalog {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
    order: Vec<&'static str>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T>(&mut self, tool: T) -> Result<(), CatalogError>
    where
        T: Tool + 'static,
    {
        let name = tool.descriptor().name;
        if self.tools.contains_key(name) {
            return Err(CatalogError::DuplicateTool(name.to_string()));
        }
        self.tools.insert(name, Arc::new(tool));
        self.order.push(name);
        Ok(())
    }

    /// The eight underwriting tools wired to their collaborators.
    pub fn standard(dependencies: ToolDependencies) -> Result<Self, CatalogError> {
        let mut catalog = Self::new();
        catalog.register(StructureClaimDataTool::new(dependencies.structurer))?;
        catalog.register(AssessRiskTool::new(dependencies.scoring.clone()))?;
        catalog.register(EstimatePremiumTool::new(dependencies.scoring))?;
        catalog.register(RetrieveFailureRatingTool::new(dependencies.failure_scores))?;
        catalog.register(GetUserPolicyTool::new(dependencies.lookup.clone()))?;
        catalog.register(GetClaimHistoryTool::new(dependencies.lookup))?;
        catalog.register(SearchDocumentsTool::new(dependencies.memory, dependencies.memory_top_k))?;
        catalog.register(CheckConsumerDutyTool::new(dependencies.llm))?;
        Ok(catalog)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn descriptors(&self) -> Vec<&ToolDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.descriptor())
            .collect()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.descriptors().into_iter().map(ToolDescriptor::spec).collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[derive(Clone)]
pub struct ToolDependencies {
    pub llm: Arc<dyn LlmClient>,
    pub structurer: Arc<ClaimStructurer>,
    pub scoring: Arc<dyn ScoringService>,
    pub lookup: UnderwritingLookup,
    pub failure_scores: Arc<dyn FailureScoreRepository>,
    pub memory: Arc<dyn MemoryStore>,
    pub memory_top_k: usize,
}

/// JSON schema of the `claim_data` argument shared by claim-based tools.
pub fn claim_data_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            CLAIM_DATA_ARGUMENT: {
                "type": "object",
                "description": description,
                "properties": {
                    "organisation_name": {"type": ["string", "null"]},
                    "claimant_name": {"type": ["string", "null"]},
                    "policy_number": {"type": ["string", "null"]},
                    "coverage_amount": {"type": ["number", "null"]},
                    "region_of_operation": {
                        "type": ["string", "null"],
                        "enum": ["gb", "usa", "eu", "asia", "africa", "other", null]
                    },
                    "description": {"type": ["string", "null"]}
                }
            }
        },
        "required": [CLAIM_DATA_ARGUMENT]
    })
}

pub(crate) fn require_claim(input: &ToolInput) -> Result<&ClaimRecord, ToolError> {
    input
        .claim
        .as_ref()
        .filter(|claim| claim.is_usable())
        .ok_or_else(|| {
            ToolError::new(
                ToolErrorKind::MissingClaimData,
                "no structured claim data is available; ask the user for the claim details",
            )
        })
}
