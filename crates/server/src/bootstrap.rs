use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use underwrite_agent::{assemble, AgentServices, AssemblyError};
use underwrite_core::config::{AppConfig, ConfigError, LoadOptions};
use underwrite_db::{connect_from_config, migrations, DbPool};

use crate::audit::TracingAuditSink;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub services: AgentServices,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("agent assembly failed: {0}")]
    Assembly(#[from] AssemblyError),
}

pub fn load_config(options: LoadOptions) -> Result<AppConfig, BootstrapError> {
    Ok(AppConfig::load(options)?)
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let services = assemble(&config, &db_pool, Some(Arc::new(TracingAuditSink)))?;

    Ok(Application { config, db_pool, services })
}

#[cfg(test)]
mod tests {
    use underwrite_core::config::{ConfigOverrides, LlmProvider, LoadOptions};

    use crate::bootstrap::{bootstrap_with_config, load_config, BootstrapError};

    #[test]
    fn config_fails_fast_when_openai_has_no_key() {
        let result = load_config(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                llm_provider: Some(LlmProvider::OpenAi),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });

        let error = result.err().expect("must fail");
        assert!(matches!(error, BootstrapError::Config(_)));
        assert!(error.to_string().contains("llm.api_key"));
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_assembles_the_runtime() {
        let config = load_config(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:?cache=shared".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("defaults are valid");
        let app = bootstrap_with_config(config).await.expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('customers', 'policies', 'conversation_threads')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("tables should be queryable after bootstrap");
        assert_eq!(table_count, 3);
        assert_eq!(app.services.runtime.catalog().len(), 8);

        app.db_pool.close().await;
    }
}
