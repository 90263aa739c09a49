use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub String);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub dob: Option<String>,
    pub address: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub policy_number: String,
    pub customer_id: CustomerId,
    /// Comma separated list of covered incident types.
    pub coverage: String,
    pub coverage_limit: f64,
    pub deductible: f64,
    pub status: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoricClaim {
    pub claim_id: String,
    pub policy_number: String,
    pub incident_type: Option<String>,
    pub incident_date: Option<String>,
    pub claim_amount: f64,
    pub status: String,
    pub decision_date: Option<String>,
    pub description: Option<String>,
}

/// Policy joined with the identity fields of its holder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicySummary {
    pub policy_number: String,
    pub claimant_name: String,
    pub dob: Option<String>,
    pub address: Option<String>,
    pub covered_incidents: Vec<String>,
    pub coverage_limit: f64,
    pub deductible: f64,
    pub policy_status: String,
}

impl PolicySummary {
    pub fn join(customer: &Customer, policy: &Policy) -> Self {
        Self {
            policy_number: policy.policy_number.clone(),
            claimant_name: customer.name.clone(),
            dob: customer.dob.clone(),
            address: customer.address.clone(),
            covered_incidents: policy
                .coverage
                .split(',')
                .map(str::trim)
                .filter(|incident| !incident.is_empty())
                .map(str::to_string)
                .collect(),
            coverage_limit: policy.coverage_limit,
            deductible: policy.deductible,
            policy_status: policy.status.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClaimHistoryEntry {
    pub claim_id: String,
    pub incident_type: Option<String>,
    pub incident_date: Option<String>,
    pub claim_amount: f64,
    pub status: String,
    pub decision_date: Option<String>,
    pub description: Option<String>,
    pub claimant_name: String,
    pub policy_number: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClaimHistory {
    pub claimant_name: String,
    pub policy_number: Option<String>,
    pub total_claims: usize,
    pub total_approved_amount: f64,
    pub claims: Vec<ClaimHistoryEntry>,
}

impl ClaimHistory {
    pub fn aggregate(claimant_name: &str, claims: &[HistoricClaim]) -> Self {
        let entries = claims
            .iter()
            .map(|claim| ClaimHistoryEntry {
                claim_id: claim.claim_id.clone(),
                incident_type: claim.incident_type.clone(),
                incident_date: claim.incident_date.clone(),
                claim_amount: claim.claim_amount,
                status: claim.status.clone(),
                decision_date: claim.decision_date.clone(),
                description: claim.description.clone(),
                claimant_name: claimant_name.to_string(),
                policy_number: claim.policy_number.clone(),
            })
            .collect::<Vec<_>>();

        let total_approved_amount = entries
            .iter()
            .filter(|entry| entry.status.eq_ignore_ascii_case("approved"))
            .map(|entry| entry.claim_amount)
            .sum();

        Self {
            claimant_name: claimant_name.to_string(),
            policy_number: entries.first().map(|entry| entry.policy_number.clone()),
            total_claims: entries.len(),
            total_approved_amount,
            claims: entries,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotFoundReason {
    NoIdentifier,
    PolicyNotFound,
    CustomerNotFound,
    NoClaimHistory,
}

/// Claim-history lookups distinguish "nothing matched" from "matched but has
/// no claims"; neither is an error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClaimHistoryLookup {
    Found(ClaimHistory),
    NotFound { reason: NotFoundReason },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailureScore {
    pub organisation_name: String,
    pub duns_number: Option<String>,
    /// Percentile in 1..=100; lower means more likely to fail.
    pub failure_score: u8,
    pub commentary: String,
    pub as_of: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        ClaimHistory, ClaimHistoryLookup, Customer, CustomerId, HistoricClaim, NotFoundReason,
        Policy, PolicySummary,
    };

    fn claim(id: &str, amount: f64, status: &str) -> HistoricClaim {
        HistoricClaim {
            claim_id: id.to_string(),
            policy_number: "POL-1".to_string(),
            incident_type: Some("flood".to_string()),
            incident_date: Some("2024-01-02".to_string()),
            claim_amount: amount,
            status: status.to_string(),
            decision_date: None,
            description: None,
        }
    }

    #[test]
    fn aggregate_sums_only_approved_claims() {
        let history = ClaimHistory::aggregate(
            "Jane Doe",
            &[claim("C-1", 1_000.0, "approved"), claim("C-2", 500.0, "rejected")],
        );
        assert_eq!(history.total_claims, 2);
        assert_eq!(history.total_approved_amount, 1_000.0);
        assert_eq!(history.policy_number.as_deref(), Some("POL-1"));
        assert!(history.claims.iter().all(|entry| entry.claimant_name == "Jane Doe"));
    }

    #[test]
    fn join_splits_covered_incidents() {
        let customer = Customer {
            id: CustomerId("CUST-1".to_string()),
            name: "Jane Doe".to_string(),
            dob: Some("1980-05-01".to_string()),
            address: None,
        };
        let policy = Policy {
            policy_number: "POL-1".to_string(),
            customer_id: customer.id.clone(),
            coverage: "fire, flood,theft".to_string(),
            coverage_limit: 250_000.0,
            deductible: 1_000.0,
            status: "active".to_string(),
        };

        let summary = PolicySummary::join(&customer, &policy);
        assert_eq!(summary.covered_incidents, vec!["fire", "flood", "theft"]);
        assert_eq!(summary.claimant_name, "Jane Doe");
    }

    #[test]
    fn not_found_is_tagged_distinctly_from_found() {
        let not_found = ClaimHistoryLookup::NotFound { reason: NotFoundReason::PolicyNotFound };
        assert_eq!(
            serde_json::to_value(&not_found).expect("serialize"),
            json!({ "status": "not_found", "reason": "policy_not_found" })
        );

        let found = ClaimHistoryLookup::Found(ClaimHistory::aggregate("A", &[]));
        let value = serde_json::to_value(&found).expect("serialize");
        assert_eq!(value["status"], "found");
        assert_eq!(value["total_claims"], 0);
    }
}
