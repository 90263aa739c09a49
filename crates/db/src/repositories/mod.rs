use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use underwrite_core::domain::conversation::{ConversationThread, ThreadHandle};
use underwrite_core::domain::underwriting::{
    Customer, CustomerId, FailureScore, HistoricClaim, Policy,
};

pub mod failure_score;
pub mod memory;
pub mod thread;
pub mod underwriting;

pub use failure_score::SqlFailureScoreRepository;
pub use memory::{
    InMemoryFailureScoreRepository, InMemoryThreadRepository, InMemoryUnderwritingRepository,
};
pub use thread::SqlThreadRepository;
pub use underwriting::SqlUnderwritingRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Read side of the customer / policy / claim tables the lookup tools query.
#[async_trait]
pub trait UnderwritingRepository: Send + Sync {
    async fn find_customer(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError>;

    /// Exact name match, ignoring ASCII case. The first match wins.
    async fn find_customer_by_name(&self, name: &str)
        -> Result<Option<Customer>, RepositoryError>;

    async fn find_policy(&self, policy_number: &str) -> Result<Option<Policy>, RepositoryError>;

    async fn policies_for_customer(&self, id: &CustomerId)
        -> Result<Vec<Policy>, RepositoryError>;

    async fn claims_for_policy(
        &self,
        policy_number: &str,
    ) -> Result<Vec<HistoricClaim>, RepositoryError>;

    async fn save_customer(&self, customer: Customer) -> Result<(), RepositoryError>;
    async fn save_policy(&self, policy: Policy) -> Result<(), RepositoryError>;
    async fn save_claim(&self, claim: HistoricClaim) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait FailureScoreRepository: Send + Sync {
    /// Case-insensitive substring match on the organisation name.
    async fn search(&self, organisation_name: &str)
        -> Result<Vec<FailureScore>, RepositoryError>;

    async fn save(&self, score: FailureScore) -> Result<(), RepositoryError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadSummary {
    pub handle: ThreadHandle,
    pub session_id: Option<String>,
    pub turn_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// Durable storage for conversation threads. Turns are append-only, so a save
/// only writes turns the store has not seen yet.
#[async_trait]
pub trait ThreadRepository: Send + Sync {
    async fn save(
        &self,
        session_id: Option<&str>,
        thread: &ConversationThread,
    ) -> Result<(), RepositoryError>;

    async fn load(
        &self,
        handle: &ThreadHandle,
    ) -> Result<Option<ConversationThread>, RepositoryError>;

    async fn delete(&self, handle: &ThreadHandle) -> Result<bool, RepositoryError>;

    async fn list_recent(&self, limit: u32) -> Result<Vec<ThreadSummary>, RepositoryError>;
}

pub(crate) fn parse_timestamp(
    column: &'static str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|error| {
            RepositoryError::Decode(format!("invalid timestamp in {column}: {value} ({error})"))
        })
}
