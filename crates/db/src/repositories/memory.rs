use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use underwrite_core::domain::conversation::{ConversationThread, ThreadHandle};
use underwrite_core::domain::underwriting::{
    Customer, CustomerId, FailureScore, HistoricClaim, Policy,
};

use super::{
    FailureScoreRepository, RepositoryError, ThreadRepository, ThreadSummary,
    UnderwritingRepository,
};

#[derive(Default)]
pub struct InMemoryUnderwritingRepository {
    customers: RwLock<HashMap<String, Customer>>,
    policies: RwLock<HashMap<String, Policy>>,
    claims: RwLock<HashMap<String, HistoricClaim>>,
}

#[async_trait::async_trait]
impl UnderwritingRepository for InMemoryUnderwritingRepository {
    async fn find_customer(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError> {
        let customers = self.customers.read().await;
        Ok(customers.get(&id.0).cloned())
    }

    async fn find_customer_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Customer>, RepositoryError> {
        let name = name.trim();
        let customers = self.customers.read().await;
        let mut matches: Vec<&Customer> = customers
            .values()
            .filter(|customer| customer.name.eq_ignore_ascii_case(name))
            .collect();
        matches.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(matches.first().map(|customer| (*customer).clone()))
    }

    async fn find_policy(&self, policy_number: &str) -> Result<Option<Policy>, RepositoryError> {
        let policies = self.policies.read().await;
        Ok(policies.get(policy_number.trim()).cloned())
    }

    async fn policies_for_customer(
        &self,
        id: &CustomerId,
    ) -> Result<Vec<Policy>, RepositoryError> {
        let policies = self.policies.read().await;
        let mut found: Vec<Policy> =
            policies.values().filter(|policy| policy.customer_id == *id).cloned().collect();
        found.sort_by(|a, b| a.policy_number.cmp(&b.policy_number));
        Ok(found)
    }

    async fn claims_for_policy(
        &self,
        policy_number: &str,
    ) -> Result<Vec<HistoricClaim>, RepositoryError> {
        let policy_number = policy_number.trim();
        let claims = self.claims.read().await;
        let mut found: Vec<HistoricClaim> = claims
            .values()
            .filter(|claim| claim.policy_number == policy_number)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.incident_date.cmp(&b.incident_date).then_with(|| a.claim_id.cmp(&b.claim_id))
        });
        Ok(found)
    }

    async fn save_customer(&self, customer: Customer) -> Result<(), RepositoryError> {
        let mut customers = self.customers.write().await;
        customers.insert(customer.id.0.clone(), customer);
        Ok(())
    }

    async fn save_policy(&self, policy: Policy) -> Result<(), RepositoryError> {
        let mut policies = self.policies.write().await;
        policies.insert(policy.policy_number.clone(), policy);
        Ok(())
    }

    async fn save_claim(&self, claim: HistoricClaim) -> Result<(), RepositoryError> {
        let mut claims = self.claims.write().await;
        claims.insert(claim.claim_id.clone(), claim);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryFailureScoreRepository {
    scores: RwLock<HashMap<String, FailureScore>>,
}

#[async_trait::async_trait]
impl FailureScoreRepository for InMemoryFailureScoreRepository {
    async fn search(
        &self,
        organisation_name: &str,
    ) -> Result<Vec<FailureScore>, RepositoryError> {
        let needle = organisation_name.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let scores = self.scores.read().await;
        let mut found: Vec<FailureScore> = scores
            .values()
            .filter(|score| score.organisation_name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.organisation_name.cmp(&b.organisation_name));
        Ok(found)
    }

    async fn save(&self, score: FailureScore) -> Result<(), RepositoryError> {
        let mut scores = self.scores.write().await;
        scores.insert(score.organisation_name.clone(), score);
        Ok(())
    }
}

struct StoredThread {
    session_id: Option<String>,
    thread: ConversationThread,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemoryThreadRepository {
    threads: RwLock<HashMap<String, StoredThread>>,
}

#[async_trait::async_trait]
impl ThreadRepository for InMemoryThreadRepository {
    async fn save(
        &self,
        session_id: Option<&str>,
        thread: &ConversationThread,
    ) -> Result<(), RepositoryError> {
        let mut threads = self.threads.write().await;
        let key = thread.continuation_handle().0.clone();
        let previous_session = threads.get(&key).and_then(|stored| stored.session_id.clone());
        if let Some(stored) = threads.get(&key) {
            if stored.thread.len() > thread.len() {
                return Err(RepositoryError::Decode(format!(
                    "thread {key} has {} stored turns but only {} in memory",
                    stored.thread.len(),
                    thread.len()
                )));
            }
        }
        threads.insert(
            key,
            StoredThread {
                session_id: session_id.map(str::to_string).or(previous_session),
                thread: thread.clone(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn load(
        &self,
        handle: &ThreadHandle,
    ) -> Result<Option<ConversationThread>, RepositoryError> {
        let threads = self.threads.read().await;
        Ok(threads.get(&handle.0).map(|stored| stored.thread.clone()))
    }

    async fn delete(&self, handle: &ThreadHandle) -> Result<bool, RepositoryError> {
        let mut threads = self.threads.write().await;
        Ok(threads.remove(&handle.0).is_some())
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<ThreadSummary>, RepositoryError> {
        let threads = self.threads.read().await;
        let mut summaries: Vec<ThreadSummary> = threads
            .values()
            .map(|stored| ThreadSummary {
                handle: stored.thread.continuation_handle().clone(),
                session_id: stored.session_id.clone(),
                turn_count: stored.thread.len(),
                updated_at: stored.updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| {
            b.updated_at.cmp(&a.updated_at).then_with(|| a.handle.0.cmp(&b.handle.0))
        });
        summaries.truncate(limit as usize);
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use underwrite_core::domain::conversation::{ConversationThread, ConversationTurn};
    use underwrite_core::domain::underwriting::{Customer, CustomerId, FailureScore};

    use crate::repositories::{
        FailureScoreRepository, InMemoryFailureScoreRepository, InMemoryThreadRepository,
        InMemoryUnderwritingRepository, ThreadRepository, UnderwritingRepository,
    };

    #[tokio::test]
    async fn in_memory_customer_lookup_by_name_ignores_case() {
        let repo = InMemoryUnderwritingRepository::default();
        let customer = Customer {
            id: CustomerId("CUST-9".to_string()),
            name: "Priya Shah".to_string(),
            dob: None,
            address: None,
        };
        repo.save_customer(customer.clone()).await.expect("save");

        assert_eq!(repo.find_customer_by_name("priya shah").await.expect("find"), Some(customer));
        assert_eq!(repo.find_customer_by_name("priya").await.expect("find"), None);
    }

    #[tokio::test]
    async fn in_memory_failure_scores_match_substrings() {
        let repo = InMemoryFailureScoreRepository::default();
        repo.save(FailureScore {
            organisation_name: "Northwind Traders".to_string(),
            duns_number: None,
            failure_score: 41,
            commentary: "moderate".to_string(),
            as_of: None,
        })
        .await
        .expect("save");

        assert_eq!(repo.search("NORTHWIND").await.expect("search").len(), 1);
        assert!(repo.search("southwind").await.expect("search").is_empty());
    }

    #[tokio::test]
    async fn in_memory_threads_reject_shrinking_saves() {
        let repo = InMemoryThreadRepository::default();
        let mut thread = ConversationThread::new();
        let stale = thread.clone();
        thread.append(ConversationTurn::user("hello")).expect("append");

        repo.save(Some("s-1"), &thread).await.expect("save");
        assert!(repo.save(None, &stale).await.is_err());

        let summaries = repo.list_recent(5).await.expect("list");
        assert_eq!(summaries[0].session_id.as_deref(), Some("s-1"));
        assert_eq!(summaries[0].turn_count, 1);
    }
}
