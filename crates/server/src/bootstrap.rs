use std::sync::Arc;

use querydesk_agent::{GenerationError, HttpLlmClient, LlmClient, Orchestrator};
use querydesk_core::config::{AppConfig, ConfigError, LoadOptions};
use querydesk_core::session::SessionStore;
use querydesk_db::{connect_with_settings, DbPool, SqliteQueryExecutor};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("model client initialization failed: {0}")]
    Llm(#[source] GenerationError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    let registry = config.dataset_registry();
    let sessions = Arc::new(SessionStore::new(config.agent.session_retention));
    let llm: Arc<dyn LlmClient> =
        Arc::new(HttpLlmClient::from_config(&config.llm).map_err(BootstrapError::Llm)?);
    let executor = Arc::new(SqliteQueryExecutor::new(db_pool.clone(), config.database.max_rows));
    let orchestrator =
        Arc::new(Orchestrator::new(registry, sessions, llm, executor, config.agent.clone()));
    info!(
        event_name = "system.bootstrap.orchestrator_ready",
        datasets = config.datasets.len(),
        "orchestrator initialized"
    );

    Ok(Application { config, db_pool, orchestrator })
}
