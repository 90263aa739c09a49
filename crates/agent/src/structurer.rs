use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use underwrite_core::domain::claim::ClaimRecord;
use underwrite_core::domain::metrics::TokenUsage;

use crate::llm::LlmClient;
use crate::prompts::EXTRACTION_INSTRUCTIONS;

#[derive(Clone, Debug, PartialEq)]
pub struct Extraction {
    pub record: ClaimRecord,
    pub usage: TokenUsage,
    /// Served from the cache without calling the language model.
    pub cached: bool,
}

/// Converts unstructured claim text into a `ClaimRecord`.
///
/// Successful extractions are cached by content hash so identical text
/// always yields the identical record. Failures are not cached and come back
/// as `ClaimRecord::extraction_failed()`.
pub struct ClaimStructurer {
    llm: Arc<dyn LlmClient>,
    cache: Mutex<HashMap<String, ClaimRecord>>,
}

impl ClaimStructurer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm, cache: Mutex::new(HashMap::new()) }
    }

    pub fn content_hash(raw_text: &str) -> String {
        format!("{:x}", Sha256::digest(raw_text.trim().as_bytes()))
    }

    pub async fn structure(&self, raw_text: &str) -> Extraction {
        if raw_text.trim().is_empty() {
            return Extraction {
                record: ClaimRecord::default(),
                usage: TokenUsage::default(),
                cached: false,
            };
        }

        let key = Self::content_hash(raw_text);
        if let Some(record) = self.cached(&key) {
            debug!(event_name = "agent.structurer.cache_hit", content_hash = %key);
            return Extraction { record, usage: TokenUsage::default(), cached: true };
        }

        let completion = match self.llm.complete(EXTRACTION_INSTRUCTIONS, raw_text.trim()).await {
            Ok(completion) => completion,
            Err(error) => {
                warn!(
                    event_name = "agent.structurer.extraction_failed",
                    content_hash = %key,
                    error = %error,
                    "claim extraction call failed"
                );
                return Extraction {
                    record: ClaimRecord::extraction_failed(),
                    usage: TokenUsage::default(),
                    cached: false,
                };
            }
        };

        let Some(record) = parse_claim_json(&completion.text) else {
            warn!(
                event_name = "agent.structurer.extraction_failed",
                content_hash = %key,
                "claim extraction returned no JSON object"
            );
            return Extraction {
                record: ClaimRecord::extraction_failed(),
                usage: completion.usage,
                cached: false,
            };
        };

        debug!(
            event_name = "agent.structurer.extracted",
            content_hash = %key,
            missing = ?record.missing_fields()
        );
        self.store(key, record.clone());
        Extraction { record, usage: completion.usage, cached: false }
    }

    fn cached(&self, key: &str) -> Option<ClaimRecord> {
        match self.cache.lock() {
            Ok(cache) => cache.get(key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(key).cloned(),
        }
    }

    fn store(&self, key: String, record: ClaimRecord) {
        match self.cache.lock() {
            Ok(mut cache) => {
                cache.insert(key, record);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(key, record);
            }
        }
    }
}

/// Pulls the first JSON object out of a model answer, tolerating code fences
/// and surrounding prose.
pub fn parse_claim_json(text: &str) -> Option<ClaimRecord> {
    let value = extract_json_object(text)?;
    let mut record = ClaimRecord::from_json(&value)?;
    record.extraction_failed = false;
    Some(record)
}

pub(crate) fn extract_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end]).ok().filter(Value::is_object)
}
