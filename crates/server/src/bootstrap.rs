use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use botforge_codegen::TemplateGenerator;
use botforge_core::config::{AppConfig, ConfigError, LoadOptions};
use botforge_core::GenerateError;
use botforge_db::{connect_with_settings, migrations, DbPool, SqlBotRegistry};
use botforge_orchestrator::{Orchestrator, Reconciler};
use botforge_runtime::{DockerGateway, RuntimeError};

/// Everything `main` needs, fully wired. The reconciler is held by value so
/// the caller can move it onto its own task.
pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<Orchestrator<SqlBotRegistry, DockerGateway, TemplateGenerator>>,
    pub reconciler: Reconciler<SqlBotRegistry, DockerGateway>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("container runtime client could not be constructed: {0}")]
    Runtime(#[source] RuntimeError),
    #[error("bot templates failed to compile: {0}")]
    Templates(#[source] GenerateError),
}

/// Loads config, prepares the database, and wires the lifecycle engine.
/// Reaching the Docker daemon is deferred to the first operation that needs
/// it; `botforge doctor` is the eager check.
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

/// Bootstrap for callers that already loaded (and logged under) a config.
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

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let registry = Arc::new(SqlBotRegistry::new(db_pool.clone()));
    let gateway = Arc::new(DockerGateway::connect().map_err(BootstrapError::Runtime)?);
    let generator = Arc::new(TemplateGenerator::new().map_err(BootstrapError::Templates)?);

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&registry),
        Arc::clone(&gateway),
        generator,
        &config.runtime,
        &config.quota,
    ));
    let reconciler = Reconciler::new(
        registry,
        gateway,
        &config.reconciler,
        Duration::from_secs(config.runtime.probe_timeout_secs),
    );
    info!(event_name = "system.bootstrap.engine_ready", "orchestrator and reconciler constructed");

    Ok(Application { config, db_pool, orchestrator, reconciler })
}

#[cfg(test)]
mod tests {
    use botforge_core::config::{ConfigOverrides, LoadOptions};
    use sqlx::Row;

    use crate::bootstrap::bootstrap;

    fn options(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_a_malformed_telegram_token() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                telegram_bot_token: Some("invalid-token".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("bootstrap should refuse bad token").to_string();
        assert!(message.contains("telegram.bot_token"), "got {message}");
    }

    #[tokio::test]
    async fn bootstrap_prepares_schema_and_engine() {
        let app = bootstrap(options("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed with defaults");

        let count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'bots'",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("query sqlite_master")
        .get::<i64, _>("count");
        assert_eq!(count, 1, "bots table should exist after bootstrap");

        // Defaults survive the load pipeline untouched.
        assert_eq!(app.config.quota.max_bots_per_owner, 10);
        assert!(app.config.telegram.bot_token.is_none());

        app.db_pool.close().await;
    }
}
