use crate::commands::{prepare, CommandResult};
use underwrite_core::config::LoadOptions;
use underwrite_db::{connect_from_config, migrations, DemoSeedDataset, SeedResult};

pub fn run(options: LoadOptions) -> CommandResult {
    let (config, runtime) = match prepare("seed", options) {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seed_result = DemoSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result = if verification.all_present {
            Ok(seed_result)
        } else {
            Err(("seed_verification", verification_message(&verification.checks), 6u8))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", summary(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn summary(seeded: &SeedResult) -> String {
    format!(
        "demo dataset loaded: {} customers, {} policies, {} historic claims, {} failure scores",
        seeded.customers, seeded.policies, seeded.claims, seeded.failure_scores
    )
}

fn verification_message(checks: &[(&'static str, bool)]) -> String {
    let failed_checks =
        checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect::<Vec<_>>();
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use underwrite_db::SeedResult;

    use super::{summary, verification_message};

    #[test]
    fn verification_error_message_targets_failed_checks() {
        let checks = [("customers", true), ("policies", false), ("failure-scores", false)];

        assert_eq!(
            verification_message(&checks),
            "Seed verification failed for checks: policies, failure-scores"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        let checks = [("customers", true), ("policies", true)];

        assert_eq!(verification_message(&checks), "Some seed data failed to load");
    }

    #[test]
    fn summary_lists_every_table() {
        let seeded = SeedResult { customers: 3, policies: 4, claims: 4, failure_scores: 4 };

        assert_eq!(
            summary(&seeded),
            "demo dataset loaded: 3 customers, 4 policies, 4 historic claims, 4 failure scores"
        );
    }
}
