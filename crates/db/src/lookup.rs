//! Policy and claim-history lookups behind the `get_user_policy` and
//! `get_claim_history` tools.
//!
//! A policy number always takes precedence over a claimant name. Neither
//! lookup treats "nothing matched" as an error.

use std::sync::Arc;

use tracing::debug;
use underwrite_core::domain::underwriting::{
    ClaimHistory, ClaimHistoryLookup, HistoricClaim, NotFoundReason, PolicySummary,
};

use crate::repositories::{RepositoryError, UnderwritingRepository};

/// Claimant shown when a policy exists but its holder record does not.
pub const UNKNOWN_CLAIMANT: &str = "Unknown";

#[derive(Clone)]
pub struct UnderwritingLookup {
    repository: Arc<dyn UnderwritingRepository>,
}

impl UnderwritingLookup {
    pub fn new(repository: Arc<dyn UnderwritingRepository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<dyn UnderwritingRepository> {
        &self.repository
    }

    /// Policies joined with holder identity. Empty when no identifier is
    /// given, nothing matches, or the holder of a matched policy is missing.
    pub async fn user_policies(
        &self,
        policy_number: Option<&str>,
        claimant_name: Option<&str>,
    ) -> Result<Vec<PolicySummary>, RepositoryError> {
        match (non_blank(policy_number), non_blank(claimant_name)) {
            (Some(policy_number), _) => {
                let Some(policy) = self.repository.find_policy(policy_number).await? else {
                    debug!(
                        event_name = "lookup.policy_missing",
                        policy_number,
                        "no policy matched"
                    );
                    return Ok(Vec::new());
                };
                let customer = self.repository.find_customer(&policy.customer_id).await?;
                Ok(customer
                    .map(|customer| vec![PolicySummary::join(&customer, &policy)])
                    .unwrap_or_default())
            }
            (None, Some(name)) => {
                let Some(customer) = self.repository.find_customer_by_name(name).await? else {
                    debug!(event_name = "lookup.customer_missing", "no customer matched name");
                    return Ok(Vec::new());
                };
                let policies = self.repository.policies_for_customer(&customer.id).await?;
                Ok(policies.iter().map(|policy| PolicySummary::join(&customer, policy)).collect())
            }
            (None, None) => Ok(Vec::new()),
        }
    }

    pub async fn claim_history(
        &self,
        policy_number: Option<&str>,
        claimant_name: Option<&str>,
    ) -> Result<ClaimHistoryLookup, RepositoryError> {
        let (claimant, claims) = match (non_blank(policy_number), non_blank(claimant_name)) {
            (Some(policy_number), _) => {
                let Some(policy) = self.repository.find_policy(policy_number).await? else {
                    return Ok(not_found(NotFoundReason::PolicyNotFound));
                };
                let claimant = self
                    .repository
                    .find_customer(&policy.customer_id)
                    .await?
                    .map(|customer| customer.name)
                    .unwrap_or_else(|| UNKNOWN_CLAIMANT.to_string());
                (claimant, self.repository.claims_for_policy(&policy.policy_number).await?)
            }
            (None, Some(name)) => {
                let Some(customer) = self.repository.find_customer_by_name(name).await? else {
                    return Ok(not_found(NotFoundReason::CustomerNotFound));
                };
                let mut claims: Vec<HistoricClaim> = Vec::new();
                for policy in self.repository.policies_for_customer(&customer.id).await? {
                    claims.extend(self.repository.claims_for_policy(&policy.policy_number).await?);
                }
                (customer.name, claims)
            }
            (None, None) => return Ok(not_found(NotFoundReason::NoIdentifier)),
        };

        if claims.is_empty() {
            return Ok(not_found(NotFoundReason::NoClaimHistory));
        }

        Ok(ClaimHistoryLookup::Found(ClaimHistory::aggregate(&claimant, &claims)))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn not_found(reason: NotFoundReason) -> ClaimHistoryLookup {
    ClaimHistoryLookup::NotFound { reason }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use underwrite_core::domain::underwriting::{
        ClaimHistoryLookup, Customer, CustomerId, HistoricClaim, NotFoundReason, Policy,
    };

    use super::{UnderwritingLookup, UNKNOWN_CLAIMANT};
    use crate::repositories::{InMemoryUnderwritingRepository, UnderwritingRepository};

    fn claim(id: &str, policy: &str, amount: f64, status: &str) -> HistoricClaim {
        HistoricClaim {
            claim_id: id.to_string(),
            policy_number: policy.to_string(),
            incident_type: Some("water damage".to_string()),
            incident_date: Some(format!("2023-01-{:02}", id.len())),
            claim_amount: amount,
            status: status.to_string(),
            decision_date: None,
            description: None,
        }
    }

    fn policy(number: &str, customer: &str) -> Policy {
        Policy {
            policy_number: number.to_string(),
            customer_id: CustomerId(customer.to_string()),
            coverage: "fire, flood ,theft".to_string(),
            coverage_limit: 100_000.0,
            deductible: 250.0,
            status: "active".to_string(),
        }
    }

    async fn lookup() -> UnderwritingLookup {
        let repo = InMemoryUnderwritingRepository::default();
        repo.save_customer(Customer {
            id: CustomerId("C-1".to_string()),
            name: "Alex Morgan".to_string(),
            dob: Some("1975-06-30".to_string()),
            address: Some("12 Dock Road, Leeds".to_string()),
        })
        .await
        .expect("customer");
        repo.save_customer(Customer {
            id: CustomerId("C-2".to_string()),
            name: "Sam Clarke".to_string(),
            dob: None,
            address: None,
        })
        .await
        .expect("customer");
        repo.save_policy(policy("POL-123", "C-1")).await.expect("policy");
        repo.save_policy(policy("POL-124", "C-1")).await.expect("policy");
        repo.save_policy(policy("POL-200", "C-2")).await.expect("policy");
        repo.save_policy(policy("POL-900", "C-404")).await.expect("orphan policy");
        repo.save_claim(claim("CLM-1", "POL-123", 1_000.0, "approved")).await.expect("claim");
        repo.save_claim(claim("CLM-22", "POL-124", 400.0, "Approved")).await.expect("claim");
        repo.save_claim(claim("CLM-333", "POL-124", 900.0, "denied")).await.expect("claim");
        repo.save_claim(claim("CLM-9", "POL-900", 50.0, "approved")).await.expect("claim");
        UnderwritingLookup::new(Arc::new(repo))
    }

    #[tokio::test]
    async fn user_policies_without_identifiers_is_empty() {
        let lookup = lookup().await;
        assert!(lookup.user_policies(None, None).await.expect("lookup").is_empty());
        assert!(lookup.user_policies(Some("  "), Some("")).await.expect("lookup").is_empty());
    }

    #[tokio::test]
    async fn policy_number_takes_precedence_over_name() {
        let lookup = lookup().await;
        let found =
            lookup.user_policies(Some("POL-200"), Some("Alex Morgan")).await.expect("lookup");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].claimant_name, "Sam Clarke");
    }

    #[tokio::test]
    async fn name_lookup_returns_every_policy_with_split_coverage() {
        let lookup = lookup().await;
        let found = lookup.user_policies(None, Some("alex morgan")).await.expect("lookup");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].covered_incidents, vec!["fire", "flood", "theft"]);
        assert!(lookup.user_policies(Some("POL-404"), None).await.expect("lookup").is_empty());
        assert!(lookup.user_policies(Some("POL-900"), None).await.expect("lookup").is_empty());
    }

    #[tokio::test]
    async fn claim_history_by_name_spans_all_policies() {
        let lookup = lookup().await;
        let ClaimHistoryLookup::Found(history) =
            lookup.claim_history(None, Some("Alex Morgan")).await.expect("lookup")
        else {
            panic!("expected history");
        };
        assert_eq!(history.total_claims, 3);
        assert!((history.total_approved_amount - 1_400.0).abs() < 1e-9);
        assert_eq!(history.claimant_name, "Alex Morgan");
    }

    #[tokio::test]
    async fn claim_history_distinguishes_not_found_reasons() {
        let lookup = lookup().await;
        let cases = [
            (None, None, NotFoundReason::NoIdentifier),
            (Some("POL-404"), None, NotFoundReason::PolicyNotFound),
            (None, Some("Nobody"), NotFoundReason::CustomerNotFound),
            (Some("POL-200"), None, NotFoundReason::NoClaimHistory),
        ];
        for (policy, name, reason) in cases {
            assert_eq!(
                lookup.claim_history(policy, name).await.expect("lookup"),
                ClaimHistoryLookup::NotFound { reason },
            );
        }
    }

    #[tokio::test]
    async fn orphaned_policy_reports_unknown_claimant() {
        let lookup = lookup().await;
        let ClaimHistoryLookup::Found(history) =
            lookup.claim_history(Some("POL-900"), None).await.expect("lookup")
        else {
            panic!("expected history");
        };
        assert_eq!(history.claimant_name, UNKNOWN_CLAIMANT);
        assert_eq!(history.policy_number.as_deref(), Some("POL-900"));
    }
}
