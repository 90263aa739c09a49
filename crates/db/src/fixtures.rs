use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

const SEED_CUSTOMER_IDS: &[&str] = &["CUST-001", "CUST-002", "CUST-003"];

const SEED_POLICY_NUMBERS: &[&str] = &["POL-123", "POL-124", "POL-200", "POL-300"];

const SEED_CLAIM_IDS: &[&str] = &["CLM-1001", "CLM-1002", "CLM-1003", "CLM-2001"];

const SEED_ORGANISATIONS: &[&str] = &[
    "Acme Manufacturing Ltd",
    "Globex Logistics PLC",
    "Initech Software Ltd",
    "Northwind Traders",
];

/// Demo customers, policies, claim history and failure scores.
///
/// Backs the CLI `seed` command and the lookup tool tests. Loading is an
/// upsert, so running it twice leaves the same rows behind.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            customers: SEED_CUSTOMER_IDS.len(),
            policies: SEED_POLICY_NUMBERS.len(),
            claims: SEED_CLAIM_IDS.len(),
            failure_scores: SEED_ORGANISATIONS.len(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        checks.push((
            "customers",
            count_in(pool, "customers", "customer_id", SEED_CUSTOMER_IDS).await?
                == SEED_CUSTOMER_IDS.len() as i64,
        ));
        checks.push((
            "policies",
            count_in(pool, "policies", "policy_number", SEED_POLICY_NUMBERS).await?
                == SEED_POLICY_NUMBERS.len() as i64,
        ));
        checks.push((
            "historic-claims",
            count_in(pool, "historic_claims", "claim_id", SEED_CLAIM_IDS).await?
                == SEED_CLAIM_IDS.len() as i64,
        ));
        checks.push((
            "failure-scores",
            count_in(pool, "dnb_failure_scores", "organisation_name", SEED_ORGANISATIONS).await?
                == SEED_ORGANISATIONS.len() as i64,
        ));

        let orphaned_policies: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM policies p
             LEFT JOIN customers c ON c.customer_id = p.customer_id
             WHERE c.customer_id IS NULL",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("policy-holders-present", orphaned_policies == 0));

        let claimless_policy: i64 = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM policies p
                WHERE p.policy_number = 'POL-300'
                  AND NOT EXISTS (SELECT 1 FROM historic_claims h WHERE h.policy_number = p.policy_number)
             )",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("policy-without-claims", claimless_policy == 1));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes only the seeded rows; anything else in the tables is kept.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(&format!(
            "DELETE FROM historic_claims WHERE claim_id IN {}",
            sql_array_from_ids(SEED_CLAIM_IDS)
        )))
        .await?;
        tx.execute(sqlx::query(&format!(
            "DELETE FROM policies WHERE policy_number IN {}",
            sql_array_from_ids(SEED_POLICY_NUMBERS)
        )))
        .await?;
        tx.execute(sqlx::query(&format!(
            "DELETE FROM customers WHERE customer_id IN {}",
            sql_array_from_ids(SEED_CUSTOMER_IDS)
        )))
        .await?;
        tx.execute(sqlx::query(&format!(
            "DELETE FROM dnb_failure_scores WHERE organisation_name IN {}",
            sql_array_from_ids(SEED_ORGANISATIONS)
        )))
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

async fn count_in(
    pool: &DbPool,
    table: &str,
    column: &str,
    ids: &[&str],
) -> Result<i64, RepositoryError> {
    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(1) FROM {table} WHERE {column} IN {}",
        sql_array_from_ids(ids)
    ))
    .fetch_one(pool)
    .await?;
    Ok(count)
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted =
        ids.iter().map(|id| format!("'{}'", id.replace('\'', "''"))).collect::<Vec<_>>().join(", ");
    format!("({quoted})")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedResult {
    pub customers: usize,
    pub policies: usize,
    pub claims: usize,
    pub failure_scores: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect_with_settings, migrations};

    async fn migrated_pool() -> DbPool {
        let pool =
            connect_with_settings("sqlite::memory:", 1, 30)
                .await
                .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    #[test]
    fn sql_fixture_covers_every_seed_id() {
        for id in SEED_CUSTOMER_IDS
            .iter()
            .chain(SEED_POLICY_NUMBERS)
            .chain(SEED_CLAIM_IDS)
            .chain(SEED_ORGANISATIONS)
        {
            assert!(DemoSeedDataset::SQL.contains(&format!("'{id}'")), "fixture is missing {id}");
        }
    }

    #[tokio::test]
    async fn load_is_idempotent() {
        let pool = migrated_pool().await;

        let first = DemoSeedDataset::load(&pool).await.expect("load seed fixtures");
        let first_verification = DemoSeedDataset::verify(&pool).await.expect("verify");
        assert!(first_verification.all_present, "{:?}", first_verification.checks);

        let second = DemoSeedDataset::load(&pool).await.expect("reload seed fixtures");
        let second_verification = DemoSeedDataset::verify(&pool).await.expect("re-verify");
        assert!(second_verification.all_present);
        assert_eq!(first, second);
        assert_eq!(first_verification.checks, second_verification.checks);
    }

    #[tokio::test]
    async fn clean_removes_seeded_rows_only() {
        let pool = migrated_pool().await;
        DemoSeedDataset::load(&pool).await.expect("load");
        sqlx::query("INSERT INTO customers (customer_id, name) VALUES ('CUST-LOCAL', 'Local')")
            .execute(&pool)
            .await
            .expect("insert local customer");

        DemoSeedDataset::clean(&pool).await.expect("clean");

        let verification = DemoSeedDataset::verify(&pool).await.expect("verify");
        assert!(!verification.all_present);
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM customers")
            .fetch_one(&pool)
            .await
            .expect("count customers");
        assert_eq!(remaining, 1);
    }
}
