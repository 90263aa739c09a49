//! Wires the runtime from configuration and an open database pool. Shared by
//! the server and the CLI `chat` command.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use underwrite_core::audit::AuditSink;
use underwrite_core::config::AppConfig;
use underwrite_db::repositories::{
    SqlFailureScoreRepository, SqlThreadRepository, SqlUnderwritingRepository,
};
use underwrite_db::{DbPool, UnderwritingLookup};

use crate::llm::{LlmClient, LlmError, OpenAiCompatibleClient};
use crate::memory::InMemoryMemoryStore;
use crate::runtime::{AgentRuntime, RuntimeSettings};
use crate::scoring::{scoring_from_config, ScoringError};
use crate::session::SessionManager;
use crate::structurer::ClaimStructurer;
use crate::tools::{CatalogError, ToolDependencies};

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("language model client: {0}")]
    Llm(#[from] LlmError),
    #[error("scoring service: {0}")]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

pub struct AgentServices {
    pub runtime: Arc<AgentRuntime>,
    pub sessions: Arc<SessionManager>,
}

pub fn assemble(
    config: &AppConfig,
    pool: &DbPool,
    audit: Option<Arc<dyn AuditSink>>,
) -> Result<AgentServices, AssemblyError> {
    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiCompatibleClient::from_config(&config.llm)?);
    let dependencies = ToolDependencies {
        llm: llm.clone(),
        structurer: Arc::new(ClaimStructurer::new(llm)),
        scoring: Arc::from(scoring_from_config(&config.scoring)?),
        lookup: UnderwritingLookup::new(Arc::new(SqlUnderwritingRepository::new(pool.clone()))),
        failure_scores: Arc::new(SqlFailureScoreRepository::new(pool.clone())),
        memory: Arc::new(InMemoryMemoryStore::new()),
        memory_top_k: config.agent.memory_top_k,
    };

    let mut runtime =
        AgentRuntime::from_dependencies(dependencies, RuntimeSettings::from_config(config))?;
    if let Some(audit) = audit {
        runtime = runtime.with_audit_sink(audit);
    }
    let sessions =
        SessionManager::with_thread_store(Arc::new(SqlThreadRepository::new(pool.clone())));

    info!(
        event_name = "agent.assembly.ready",
        llm_provider = config.llm.provider.as_str(),
        llm_model = %config.llm.model,
        scoring_mode = config.scoring.mode.as_str(),
        max_steps = config.agent.max_steps,
        "agent runtime assembled"
    );

    Ok(AgentServices { runtime: Arc::new(runtime), sessions: Arc::new(sessions) })
}
