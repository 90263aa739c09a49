use crate::commands::{prepare, CommandResult};
use underwrite_core::config::LoadOptions;
use underwrite_db::{connect_from_config, migrations};

pub fn run(options: LoadOptions) -> CommandResult {
    let (config, runtime) = match prepare("migrate", options) {
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
        let status = migrations::status(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(status)
    });

    match result {
        Ok(status) => CommandResult::success(
            "migrate",
            format!("applied pending migrations ({}/{} applied)", status.applied, status.known),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
