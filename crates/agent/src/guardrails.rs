use serde_json::{json, Value};

use crate::intent::{ExtractedIntent, ToolIntent};
use crate::tools::{AssessRiskTool, CheckConsumerDutyTool, EstimatePremiumTool};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String, fallback_path: &'static str },
    Degrade { reason_code: &'static str, user_message: String, fallback_path: &'static str },
}

impl GuardrailDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Result payload recorded when a call is declined.
    pub fn declined_payload(&self) -> Option<Value> {
        match self {
            Self::Allow => None,
            Self::Deny { reason_code, user_message, fallback_path }
            | Self::Degrade { reason_code, user_message, fallback_path } => Some(json!({
                "kind": "ToolDeclined",
                "reason_code": reason_code,
                "message": user_message,
                "fallback_path": fallback_path,
            })),
        }
    }

    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::Allow => None,
            Self::Deny { reason_code, .. } | Self::Degrade { reason_code, .. } => Some(reason_code),
        }
    }
}

/// Intent a model-running tool needs before it may run. Other tools are
/// never gated.
pub fn gated_intent(tool_name: &str) -> Option<ToolIntent> {
    match tool_name {
        AssessRiskTool::NAME => Some(ToolIntent::Risk),
        EstimatePremiumTool::NAME => Some(ToolIntent::Premium),
        CheckConsumerDutyTool::NAME => Some(ToolIntent::ConsumerDuty),
        _ => None,
    }
}

/// Gates the model-running tools on what the user actually asked for.
/// Read-only lookups, document search and claim structuring always pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub enforce_intent: bool,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { enforce_intent: true }
    }
}

impl GuardrailPolicy {
    pub fn new(enforce_intent: bool) -> Self {
        Self { enforce_intent }
    }

    pub fn evaluate(&self, tool_name: &str, intent: &ExtractedIntent) -> GuardrailDecision {
        if !self.enforce_intent {
            return GuardrailDecision::Allow;
        }

        let Some(required) = gated_intent(tool_name) else {
            return GuardrailDecision::Allow;
        };
        let label = match required {
            ToolIntent::Risk => "a risk rating",
            ToolIntent::Premium => "a premium estimate",
            _ => "a Consumer Duty review",
        };

        if intent.requests(required) {
            return GuardrailDecision::Allow;
        }

        if intent.ambiguous_assessment && required != ToolIntent::ConsumerDuty {
            return GuardrailDecision::Degrade {
                reason_code: "ambiguous_assessment",
                user_message: "The request does not say whether a risk rating or a premium \
                               estimate is wanted. Ask the user which one to run."
                    .to_string(),
                fallback_path: "ask_which_model",
            };
        }

        GuardrailDecision::Deny {
            reason_code: "tool_not_requested",
            user_message: format!(
                "The user did not ask for {label}. Answer only what was asked."
            ),
            fallback_path: "answer_only_what_was_asked",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{GuardrailDecision, GuardrailPolicy};
    use crate::intent::IntentExtractor;

    #[test]
    fn requested_model_is_allowed() {
        let intent = IntentExtractor::new().extract("what's the risk rating for POL-123?");
        let decision = GuardrailPolicy::default().evaluate("assess_risk", &intent);
        assert_eq!(decision, GuardrailDecision::Allow);
    }

    #[test]
    fn unrequested_model_is_denied() {
        let intent = IntentExtractor::new().extract("what's the risk rating for POL-123?");
        let decision = GuardrailPolicy::default().evaluate("estimate_premium", &intent);

        let (reason_code, user_message, fallback_path) = match decision {
            GuardrailDecision::Deny { reason_code, user_message, fallback_path } => {
                (reason_code, user_message, fallback_path)
            }
            _ => ("", String::new(), ""),
        };

        assert_eq!(reason_code, "tool_not_requested");
        assert!(user_message.contains("premium estimate"));
        assert_eq!(fallback_path, "answer_only_what_was_asked");
    }

    #[test]
    fn ambiguous_assessment_degrades_both_models() {
        let intent = IntentExtractor::new().extract("please assess this claim");
        for tool in ["assess_risk", "estimate_premium"] {
            let decision = GuardrailPolicy::default().evaluate(tool, &intent);
            assert_eq!(decision.reason_code(), Some("ambiguous_assessment"), "{tool}");
            assert_eq!(decision.declined_payload().expect("payload")["kind"], "ToolDeclined");
        }
    }

    #[test]
    fn lookups_and_disabled_policy_always_allow() {
        let intent = IntentExtractor::new().extract("hello");
        let policy = GuardrailPolicy::default();
        assert!(policy.evaluate("get_user_policy", &intent).is_allowed());
        assert!(policy.evaluate("structure_claim_data", &intent).is_allowed());
        assert!(GuardrailPolicy::new(false).evaluate("assess_risk", &intent).is_allowed());
    }
}
