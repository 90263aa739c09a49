use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::llm::{LlmClient, LlmError};
use crate::prompts::CONSUMER_DUTY_INSTRUCTIONS;
use crate::structurer::extract_json_object;

use super::{SideEffect, Tool, ToolDescriptor, ToolError, ToolErrorKind, ToolInput, ToolOutput};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutyCheck {
    pub passed: bool,
    #[serde(default)]
    pub notes: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerDutyChecklist {
    pub clear_communication: DutyCheck,
    pub fair_treatment: DutyCheck,
    pub transparent_reasoning: DutyCheck,
    pub consumer_understanding: DutyCheck,
    pub vulnerable_customers: DutyCheck,
}

impl ConsumerDutyChecklist {
    pub fn dimensions(&self) -> [(&'static str, &DutyCheck); 5] {
        [
            ("clear_communication", &self.clear_communication),
            ("fair_treatment", &self.fair_treatment),
            ("transparent_reasoning", &self.transparent_reasoning),
            ("consumer_understanding", &self.consumer_understanding),
            ("vulnerable_customers", &self.vulnerable_customers),
        ]
    }
}

/// Consumer Duty audit of a claim decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerDutyAssessment {
    pub meets_requirements: bool,
    pub checklist: ConsumerDutyChecklist,
    #[serde(default)]
    pub improvement_suggestions: Vec<String>,
    #[serde(default)]
    pub risk_flags: Vec<String>,
}

impl ConsumerDutyAssessment {
    /// Parses a model answer and rejects any dimension without notes.
    pub fn parse(text: &str) -> Result<Self, ToolError> {
        let malformed = |message: String| ToolError::new(ToolErrorKind::MalformedResponse, message);
        let value = extract_json_object(text)
            .ok_or_else(|| malformed("the compliance audit returned no JSON object".to_string()))?;
        let assessment: Self = serde_json::from_value(value)
            .map_err(|error| malformed(format!("the compliance audit is incomplete: {error}")))?;

        let empty: Vec<&str> = assessment
            .checklist
            .dimensions()
            .into_iter()
            .filter(|(_, check)| check.notes.trim().is_empty())
            .map(|(name, _)| name)
            .collect();
        if !empty.is_empty() {
            return Err(malformed(format!(
                "the compliance audit left notes empty for: {}",
                empty.join(", ")
            )));
        }
        Ok(assessment)
    }
}

pub struct CheckConsumerDutyTool {
    descriptor: ToolDescriptor,
    llm: Arc<dyn LlmClient>,
}

impl CheckConsumerDutyTool {
    pub const NAME: &'static str = "check_consumer_duty";

    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: Self::NAME,
                description: "Evaluate whether an insurance claim decision meets UK Consumer Duty \
                              requirements.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "decision_text": {
                            "type": "string",
                            "description": "The claim decision and explanation."
                        }
                    },
                    "required": ["decision_text"]
                }),
                requires_claim_data: false,
                idempotent: false,
                side_effect: SideEffect::LanguageModel,
            },
            llm,
        }
    }
}

#[async_trait]
impl Tool for CheckConsumerDutyTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let decision_text = input.text_argument("decision_text").ok_or_else(|| {
            ToolError::new(ToolErrorKind::InvalidInput, "the decision text to review is required")
        })?;

        let completion =
            self.llm.complete(CONSUMER_DUTY_INSTRUCTIONS, decision_text).await.map_err(|error| {
                match error {
                    LlmError::Timeout { .. } => ToolError::new(
                        ToolErrorKind::Timeout,
                        "the compliance audit did not finish in time",
                    ),
                    _ => ToolError::upstream("the compliance audit is currently unavailable"),
                }
            })?;

        let assessment = ConsumerDutyAssessment::parse(&completion.text)?;
        Ok(ToolOutput { payload: json!(assessment), claim: None, usage: completion.usage })
    }
}
