use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::structurer::ClaimStructurer;

use super::{SideEffect, Tool, ToolDescriptor, ToolError, ToolErrorKind, ToolInput, ToolOutput};

pub struct StructureClaimDataTool {
    descriptor: ToolDescriptor,
    structurer: Arc<ClaimStructurer>,
}

impl StructureClaimDataTool {
    pub const NAME: &'static str = "structure_claim_data";

    pub fn new(structurer: Arc<ClaimStructurer>) -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: Self::NAME,
                description: "Structure pasted or uploaded claim text into claim data usable by \
                              any tool that takes a claim_data parameter.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "raw_text": {
                            "type": "string",
                            "description": "The unstructured claim text."
                        }
                    },
                    "required": ["raw_text"]
                }),
                requires_claim_data: false,
                idempotent: true,
                side_effect: SideEffect::LanguageModel,
            },
            structurer,
        }
    }
}

#[async_trait]
impl Tool for StructureClaimDataTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let raw_text = input
            .text_argument("raw_text")
            .ok_or_else(|| ToolError::new(ToolErrorKind::InvalidInput, "raw_text is required"))?;
        let extraction = self.structurer.structure(raw_text).await;
        Ok(ToolOutput {
            payload: extraction.record.to_json(),
            claim: Some(extraction.record),
            usage: extraction.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::StructureClaimDataTool;
    use crate::llm::ScriptedLlmClient;
    use crate::structurer::ClaimStructurer;
    use crate::tools::{Tool, ToolInput};

    #[tokio::test]
    async fn structured_record_is_returned_as_claim() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_completion(
            r#"{"organisation_name": "Globex Logistics PLC", "coverage_amount": 750000,
                "region_of_operation": "usa"}"#,
        );
        let tool = StructureClaimDataTool::new(Arc::new(ClaimStructurer::new(llm)));

        let output = tool
            .invoke(ToolInput {
                session_id: "s-1".to_string(),
                arguments: json!({"raw_text": "Globex Logistics PLC, US operations, 750k cover"}),
                claim: None,
            })
            .await
            .expect("structured");

        assert_eq!(output.payload["coverage_amount"], json!(750_000.0));
        assert_eq!(output.payload["region_of_operation"], "usa");
        let claim = output.claim.expect("claim");
        assert_eq!(claim.policy_number, None);
        assert!(claim.is_usable());
    }
}
