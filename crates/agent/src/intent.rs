//! Keyword intent extraction over the user's own wording. Uploaded document
//! text is never inspected here.

use std::collections::BTreeSet;

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolIntent {
    Risk,
    Premium,
    ConsumerDuty,
    FailureScore,
    PolicyLookup,
    ClaimHistory,
    DocumentSearch,
}

impl ToolIntent {
    /// Intents that run a scoring or review model rather than a lookup.
    pub fn runs_a_model(self) -> bool {
        matches!(self, Self::Risk | Self::Premium | Self::ConsumerDuty)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedIntent {
    pub requested: BTreeSet<ToolIntent>,
    /// Generic "assess / evaluate this claim" wording that names neither a
    /// risk rating nor a premium.
    pub ambiguous_assessment: bool,
    pub policy_numbers: Vec<String>,
}

impl ExtractedIntent {
    pub fn requests(&self, intent: ToolIntent) -> bool {
        self.requested.contains(&intent)
    }
}

const RISK_TERMS: &[&str] = &["risk", "risks", "risky", "fraud", "fraudulent", "exposure"];
const PREMIUM_TERMS: &[&str] = &[
    "premium",
    "premiums",
    "price",
    "pricing",
    "quote",
    "quotes",
    "cost to insure",
    "insurance cost",
];
const CONSUMER_DUTY_TERMS: &[&str] =
    &["consumer duty", "compliance", "compliant", "fca", "fair treatment"];
const FAILURE_TERMS: &[&str] = &[
    "failure score",
    "failure rating",
    "dun & bradstreet",
    "dun and bradstreet",
    "d&b",
    "dnb",
    "insolvent",
    "insolvency",
    "financial health",
];
const POLICY_TERMS: &[&str] =
    &["policy", "policies", "policyholder", "deductible", "coverage limit", "covered"];
const HISTORY_TERMS: &[&str] = &["claim history", "previous claims", "past claims", "prior claims"];
const SEARCH_TERMS: &[&str] =
    &["document", "upload", "uploaded", "says", "mention", "mentions", "mentioned", "find in"];
const ASSESSMENT_TERMS: &[&str] = &[
    "assess",
    "assessment",
    "evaluate",
    "evaluation",
    "analyse",
    "analyze",
    "review",
    "underwrite",
    "look at",
];

#[derive(Clone, Debug, Default)]
pub struct IntentExtractor;

impl IntentExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, text: &str) -> ExtractedIntent {
        let normalized_text = normalize_text(text);
        let tokens = tokenize(&normalized_text);
        let phrase_text = format!(" {} ", tokens.join(" "));

        let mut requested = BTreeSet::new();
        let table: [(&[&str], ToolIntent); 7] = [
            (RISK_TERMS, ToolIntent::Risk),
            (PREMIUM_TERMS, ToolIntent::Premium),
            (CONSUMER_DUTY_TERMS, ToolIntent::ConsumerDuty),
            (FAILURE_TERMS, ToolIntent::FailureScore),
            (POLICY_TERMS, ToolIntent::PolicyLookup),
            (HISTORY_TERMS, ToolIntent::ClaimHistory),
            (SEARCH_TERMS, ToolIntent::DocumentSearch),
        ];
        for (terms, intent) in table {
            if contains_any(&phrase_text, terms) {
                requested.insert(intent);
            }
        }

        let names_a_model = requested.iter().any(|intent| intent.runs_a_model());
        let ambiguous_assessment =
            !names_a_model && contains_any(&phrase_text, ASSESSMENT_TERMS);

        ExtractedIntent { requested, ambiguous_assessment, policy_numbers: policy_numbers(&tokens) }
    }
}

fn normalize_text(text: &str) -> String {
    text.to_lowercase()
}

fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_alphanumeric() || character == '-' {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized.split_whitespace().map(|token| token.to_string()).collect()
}

/// Terms match whole tokens only. Multi-word terms match consecutive tokens.
fn contains_any(phrase_text: &str, terms: &[&str]) -> bool {
    terms.iter().any(|term| {
        let term_tokens = tokenize(term);
        !term_tokens.is_empty() && phrase_text.contains(&format!(" {} ", term_tokens.join(" ")))
    })
}

fn policy_numbers(tokens: &[String]) -> Vec<String> {
    let mut found = Vec::new();
    for token in tokens {
        if let Some(digits) = token.strip_prefix("pol-") {
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_alphanumeric()) {
                let number = format!("POL-{}", digits.to_ascii_uppercase());
                if !found.contains(&number) {
                    found.push(number);
                }
            }
        }
    }
    found
}
