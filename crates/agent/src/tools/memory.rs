use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::memory::MemoryStore;

use super::{SideEffect, Tool, ToolDescriptor, ToolError, ToolErrorKind, ToolInput, ToolOutput};

const MAX_TOP_K: usize = 10;

pub struct SearchDocumentsTool {
    descriptor: ToolDescriptor,
    memory: Arc<dyn MemoryStore>,
    default_top_k: usize,
}

impl SearchDocumentsTool {
    pub const NAME: &'static str = "search_documents";

    pub fn new(memory: Arc<dyn MemoryStore>, default_top_k: usize) -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: Self::NAME,
                description: "Search the documents uploaded in this conversation for passages \
                              relevant to a question.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "What to look for."},
                        "top_k": {"type": "integer", "minimum": 1, "maximum": MAX_TOP_K}
                    },
                    "required": ["query"]
                }),
                requires_claim_data: false,
                idempotent: true,
                side_effect: SideEffect::ReadOnly,
            },
            memory,
            default_top_k: default_top_k.clamp(1, MAX_TOP_K),
        }
    }
}

#[async_trait]
impl Tool for SearchDocumentsTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let query = input
            .text_argument("query")
            .ok_or_else(|| {
                ToolError::new(ToolErrorKind::InvalidInput, "a search query is required")
            })?;
        let top_k = input
            .arguments
            .get("top_k")
            .and_then(Value::as_u64)
            .map(|value| (value as usize).clamp(1, MAX_TOP_K))
            .unwrap_or(self.default_top_k);

        let passages = self.memory.query(&input.session_id, query, top_k).await;
        Ok(ToolOutput::payload(json!(passages)))
    }
}
