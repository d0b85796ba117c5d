//! Builds the object graph behind every command.

use anyhow::{Context, Result};
use insight_application::{Orchestrator, SessionUseCase};
use insight_core::config::RootConfig;
use insight_core::llm::ProviderKind;
use insight_core::query::{QueryExecutionAdapter, QueryLimits};
use insight_core::sandbox::{SandboxDispatcher, SandboxLimits};
use insight_core::schema::{SchemaDescriptor, SchemaProvider};
use insight_infrastructure::{
    ConfigService, JsonSchemaProvider, JsonSessionRepository, PythonSandbox, SqliteEngine,
};
use insight_interaction::LlmGateway;
use std::path::Path;
use std::sync::Arc;

/// Loads configuration and assembles the session use case.
pub async fn build(config_path: Option<&Path>) -> Result<SessionUseCase> {
    let loaded = ConfigService::load(config_path)?;
    match &loaded.source {
        Some(path) => tracing::info!(path = %path.display(), "Configuration loaded"),
        None => tracing::info!("Using default configuration"),
    }
    let config = loaded.config;

    let schema = JsonSchemaProvider::load(&config.data.schema_path).with_context(|| {
        format!(
            "Failed to load schema descriptor {}",
            config.data.schema_path.display()
        )
    })?;
    let limits = QueryLimits::from(&config.query);
    let engine = SqliteEngine::open(&config.data.database_path, limits.timeout)?;
    check_columns(&engine, schema.descriptor());

    let gateway = LlmGateway::from_config(&config)?;
    warn_missing_keys(&gateway, &config);

    let queries = QueryExecutionAdapter::new(Arc::new(engine), limits);
    let sandbox = SandboxDispatcher::new(
        Arc::new(PythonSandbox::from(&config.sandbox)),
        SandboxLimits::from(&config.sandbox),
    );
    let orchestrator = Orchestrator::new(
        Arc::new(gateway),
        queries,
        sandbox,
        Arc::new(schema),
        config.workflow.clone(),
    )?;

    let sessions = JsonSessionRepository::default_location(config.sessions.max_turns).await?;
    Ok(SessionUseCase::new(Arc::new(sessions), Arc::new(orchestrator)))
}

fn warn_missing_keys(gateway: &LlmGateway, config: &RootConfig) {
    for kind in [ProviderKind::Gemini, ProviderKind::Groq] {
        if !gateway.is_available(kind) {
            tracing::warn!(
                "No API key for {} (set {} or providers.{}.api_key)",
                kind,
                kind.api_key_env(),
                kind
            );
        }
    }
    if !gateway.is_available(config.providers.default)
        && !gateway.is_available(config.providers.default.alternate())
    {
        tracing::error!("No language model provider is configured; questions will fail");
    }
}

/// Logs descriptor columns the table lacks, and table columns the descriptor omits.
fn check_columns(engine: &SqliteEngine, schema: &SchemaDescriptor) {
    let actual = match engine.table_columns(&schema.table_name) {
        Ok(columns) if !columns.is_empty() => columns,
        Ok(_) => {
            tracing::warn!("Table '{}' not found in the database", schema.table_name);
            return;
        }
        Err(e) => {
            tracing::warn!("Could not inspect table '{}': {:#}", schema.table_name, e);
            return;
        }
    };

    for column in &schema.columns {
        let name = column.column_name();
        if !actual.iter().any(|c| c.eq_ignore_ascii_case(&name)) {
            tracing::warn!("Schema column '{}' is missing from table '{}'", name, schema.table_name);
        }
    }
    for name in &actual {
        if schema.column(name).is_none() {
            tracing::warn!("Table column '{}' is not described in the schema", name);
        }
    }
}
