use sqlx::{sqlite::SqliteRow, Row};

use underwrite_core::domain::underwriting::{Customer, CustomerId, HistoricClaim, Policy};

use super::{RepositoryError, UnderwritingRepository};
use crate::DbPool;

pub struct SqlUnderwritingRepository {
    pool: DbPool,
}

impl SqlUnderwritingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UnderwritingRepository for SqlUnderwritingRepository {
    async fn find_customer(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError> {
        let row = sqlx::query(
            "SELECT customer_id, name, dob, address
             FROM customers
             WHERE customer_id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(customer_from_row).transpose()
    }

    async fn find_customer_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Customer>, RepositoryError> {
        let row = sqlx::query(
            "SELECT customer_id, name, dob, address
             FROM customers
             WHERE name = ? COLLATE NOCASE
             ORDER BY customer_id ASC
             LIMIT 1",
        )
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;

        row.map(customer_from_row).transpose()
    }

    async fn find_policy(&self, policy_number: &str) -> Result<Option<Policy>, RepositoryError> {
        let row = sqlx::query(
            "SELECT policy_number, customer_id, coverage, coverage_limit, deductible, status
             FROM policies
             WHERE policy_number = ?",
        )
        .bind(policy_number.trim())
        .fetch_optional(&self.pool)
        .await?;

        row.map(policy_from_row).transpose()
    }

    async fn policies_for_customer(
        &self,
        id: &CustomerId,
    ) -> Result<Vec<Policy>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT policy_number, customer_id, coverage, coverage_limit, deductible, status
             FROM policies
             WHERE customer_id = ?
             ORDER BY policy_number ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(policy_from_row).collect()
    }

    async fn claims_for_policy(
        &self,
        policy_number: &str,
    ) -> Result<Vec<HistoricClaim>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                claim_id,
                policy_number,
                incident_type,
                incident_date,
                claim_amount,
                status,
                decision_date,
                description
             FROM historic_claims
             WHERE policy_number = ?
             ORDER BY incident_date ASC, claim_id ASC",
        )
        .bind(policy_number.trim())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(claim_from_row).collect()
    }

    async fn save_customer(&self, customer: Customer) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO customers (customer_id, name, dob, address)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(customer_id) DO UPDATE SET
                name = excluded.name,
                dob = excluded.dob,
                address = excluded.address",
        )
        .bind(&customer.id.0)
        .bind(&customer.name)
        .bind(&customer.dob)
        .bind(&customer.address)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_policy(&self, policy: Policy) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO policies (
                policy_number,
                customer_id,
                coverage,
                coverage_limit,
                deductible,
                status
             ) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(policy_number) DO UPDATE SET
                customer_id = excluded.customer_id,
                coverage = excluded.coverage,
                coverage_limit = excluded.coverage_limit,
                deductible = excluded.deductible,
                status = excluded.status",
        )
        .bind(&policy.policy_number)
        .bind(&policy.customer_id.0)
        .bind(&policy.coverage)
        .bind(policy.coverage_limit)
        .bind(policy.deductible)
        .bind(&policy.status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_claim(&self, claim: HistoricClaim) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO historic_claims (
                claim_id,
                policy_number,
                incident_type,
                incident_date,
                claim_amount,
                status,
                decision_date,
                description
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(claim_id) DO UPDATE SET
                policy_number = excluded.policy_number,
                incident_type = excluded.incident_type,
                incident_date = excluded.incident_date,
                claim_amount = excluded.claim_amount,
                status = excluded.status,
                decision_date = excluded.decision_date,
                description = excluded.description",
        )
        .bind(&claim.claim_id)
        .bind(&claim.policy_number)
        .bind(&claim.incident_type)
        .bind(&claim.incident_date)
        .bind(claim.claim_amount)
        .bind(&claim.status)
        .bind(&claim.decision_date)
        .bind(&claim.description)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn customer_from_row(row: SqliteRow) -> Result<Customer, RepositoryError> {
    Ok(Customer {
        id: CustomerId(row.try_get("customer_id")?),
        name: row.try_get("name")?,
        dob: row.try_get("dob")?,
        address: row.try_get("address")?,
    })
}

fn policy_from_row(row: SqliteRow) -> Result<Policy, RepositoryError> {
    Ok(Policy {
        policy_number: row.try_get("policy_number")?,
        customer_id: CustomerId(row.try_get("customer_id")?),
        coverage: row.try_get("coverage")?,
        coverage_limit: row.try_get("coverage_limit")?,
        deductible: row.try_get("deductible")?,
        status: row.try_get("status")?,
    })
}

fn claim_from_row(row: SqliteRow) -> Result<HistoricClaim, RepositoryError> {
    Ok(HistoricClaim {
        claim_id: row.try_get("claim_id")?,
        policy_number: row.try_get("policy_number")?,
        incident_type: row.try_get("incident_type")?,
        incident_date: row.try_get("incident_date")?,
        claim_amount: row.try_get("claim_amount")?,
        status: row.try_get("status")?,
        decision_date: row.try_get("decision_date")?,
        description: row.try_get("description")?,
    })
}

#[cfg(test)]
mod tests {
    use underwrite_core::domain::underwriting::{Customer, CustomerId, HistoricClaim, Policy};

    use super::SqlUnderwritingRepository;
    use crate::repositories::UnderwritingRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlUnderwritingRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlUnderwritingRepository::new(pool)
    }

    fn customer() -> Customer {
        Customer {
            id: CustomerId("CUST-1".to_string()),
            name: "Jane Doe".to_string(),
            dob: Some("1980-04-01".to_string()),
            address: Some("1 High Street, London".to_string()),
        }
    }

    fn policy(number: &str) -> Policy {
        Policy {
            policy_number: number.to_string(),
            customer_id: CustomerId("CUST-1".to_string()),
            coverage: "fire,flood".to_string(),
            coverage_limit: 250_000.0,
            deductible: 500.0,
            status: "active".to_string(),
        }
    }

    #[tokio::test]
    async fn customer_lookup_by_name_ignores_case() {
        let repo = setup().await;
        repo.save_customer(customer()).await.expect("save customer");

        let found = repo.find_customer_by_name("  jane DOE ").await.expect("lookup");
        assert_eq!(found, Some(customer()));
        assert_eq!(repo.find_customer_by_name("John Smith").await.expect("lookup"), None);
    }

    #[tokio::test]
    async fn policies_and_claims_round_trip_through_sqlite() {
        let repo = setup().await;
        repo.save_customer(customer()).await.expect("save customer");
        repo.save_policy(policy("POL-2")).await.expect("save policy");
        repo.save_policy(policy("POL-1")).await.expect("save policy");
        repo.save_claim(HistoricClaim {
            claim_id: "CLM-1".to_string(),
            policy_number: "POL-1".to_string(),
            incident_type: Some("flood".to_string()),
            incident_date: Some("2023-02-01".to_string()),
            claim_amount: 1_200.0,
            status: "approved".to_string(),
            decision_date: Some("2023-03-01".to_string()),
            description: None,
        })
        .await
        .expect("save claim");

        let policies = repo
            .policies_for_customer(&CustomerId("CUST-1".to_string()))
            .await
            .expect("policies");
        let numbers: Vec<_> = policies.iter().map(|p| p.policy_number.as_str()).collect();
        assert_eq!(numbers, vec!["POL-1", "POL-2"]);

        let claims = repo.claims_for_policy("POL-1").await.expect("claims");
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].claim_amount, 1_200.0);
        assert!(repo.claims_for_policy("POL-2").await.expect("claims").is_empty());
        assert_eq!(repo.find_policy("POL-404").await.expect("policy"), None);
    }
}
