use std::sync::Arc;

use serde::Deserialize;
use underwrite_core::domain::underwriting::{ClaimHistoryLookup, NotFoundReason};
use underwrite_db::repositories::{
    FailureScoreRepository, SqlFailureScoreRepository, SqlUnderwritingRepository,
};
use underwrite_db::{connect_with_settings, migrations, DemoSeedDataset, UnderwritingLookup};

type SeedContractTestResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
    ($left:expr, $right:expr, $($arg:tt)*) => {
        if $left != $right {
            return Err(format!($($arg)*));
        }
    };
}

#[derive(Debug, Deserialize)]
struct CustomerContract {
    customer_id: String,
    name: String,
    policies: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ClaimHistoryContract {
    policy_number: String,
    total_claims: usize,
    total_approved_amount: f64,
}

#[derive(Debug, Deserialize)]
struct FailureScoreContract {
    organisation_name: String,
    failure_score: u8,
}

#[derive(Debug, Deserialize)]
struct SeedContract {
    dataset_version: String,
    seed_dataset: String,
    customers: Vec<CustomerContract>,
    claim_history: Vec<ClaimHistoryContract>,
    failure_scores: Vec<FailureScoreContract>,
}

fn contract() -> SeedContractTestResult<SeedContract> {
    serde_json::from_str(include_str!("../../../config/fixtures/demo_seed_contract.json"))
        .map_err(|error| format!("seed contract JSON must parse: {error}"))
}

#[test]
fn seed_contract_matches_sql_fixture() -> SeedContractTestResult {
    let fixture_sql = include_str!("../../../config/fixtures/demo_seed.sql");
    let contract = contract()?;

    require_eq!(contract.dataset_version, "demo-2024.1");
    require_eq!(contract.seed_dataset, "deterministic_underwriting_lookup");
    require_eq!(contract.customers.len(), 3);

    for customer in &contract.customers {
        require!(
            fixture_sql.contains(&format!("'{}', '{}'", customer.customer_id, customer.name)),
            "fixture is missing customer {}",
            customer.customer_id
        );
        for policy in &customer.policies {
            require!(
                fixture_sql.contains(&format!("'{}', '{}'", policy, customer.customer_id)),
                "fixture is missing policy {policy} for {}",
                customer.customer_id
            );
        }
    }

    for score in &contract.failure_scores {
        require!(
            fixture_sql.contains(&format!("'{}'", score.organisation_name)),
            "fixture is missing organisation {}",
            score.organisation_name
        );
    }

    Ok(())
}

#[tokio::test]
async fn seeded_database_answers_lookups_per_contract() -> SeedContractTestResult {
    let contract = contract()?;
    let pool = connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .map_err(|error| format!("connect: {error}"))?;
    migrations::run_pending(&pool).await.map_err(|error| format!("migrate: {error}"))?;
    DemoSeedDataset::load(&pool).await.map_err(|error| format!("seed: {error}"))?;

    let lookup = UnderwritingLookup::new(Arc::new(SqlUnderwritingRepository::new(pool.clone())));

    for customer in &contract.customers {
        let policies = lookup
            .user_policies(None, Some(&customer.name.to_uppercase()))
            .await
            .map_err(|error| format!("user_policies: {error}"))?;
        let numbers: Vec<String> = policies.iter().map(|p| p.policy_number.clone()).collect();
        require_eq!(numbers, customer.policies, "policies for {}", customer.name);
    }

    for expected in &contract.claim_history {
        let result = lookup
            .claim_history(Some(&expected.policy_number), None)
            .await
            .map_err(|error| format!("claim_history: {error}"))?;
        match result {
            ClaimHistoryLookup::Found(history) => {
                require_eq!(history.total_claims, expected.total_claims);
                require!(
                    (history.total_approved_amount - expected.total_approved_amount).abs() < 1e-6,
                    "approved total for {} was {}",
                    expected.policy_number,
                    history.total_approved_amount
                );
            }
            ClaimHistoryLookup::NotFound { reason } => {
                require_eq!(expected.total_claims, 0);
                require_eq!(reason, NotFoundReason::NoClaimHistory);
            }
        }
    }

    let scores = SqlFailureScoreRepository::new(pool);
    for expected in &contract.failure_scores {
        let found = scores
            .search(&expected.organisation_name)
            .await
            .map_err(|error| format!("failure score search: {error}"))?;
        require_eq!(found.len(), 1, "one match for {}", expected.organisation_name);
        require_eq!(found[0].failure_score, expected.failure_score);
    }

    Ok(())
}
