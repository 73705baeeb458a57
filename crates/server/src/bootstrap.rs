use permitly_core::config::{AppConfig, ConfigError, LoadOptions};
use permitly_db::{connect_with_settings, migrations, seed_permit_type_catalog, DbPool};
use permitly_db::repositories::RepositoryError;
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("permit type catalog seeding failed: {0}")]
    Seed(#[source] RepositoryError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        permit_id = "unknown",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        permit_id = "unknown",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        permit_id = "unknown",
        "database migrations applied"
    );

    let seeded = seed_permit_type_catalog(&db_pool).await.map_err(BootstrapError::Seed)?;
    info!(
        event_name = "system.bootstrap.catalog_seeded",
        correlation_id = "bootstrap",
        permit_id = "unknown",
        permit_types = seeded,
        "permit type catalog seeded"
    );

    Ok(Application { config, db_pool })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use permitly_core::config::{ConfigOverrides, LoadOptions};
    use permitly_core::domain::permit::{ActorRole, PermitStatus, UserId};
    use permitly_core::lifecycle::{PermitEvent, PermitStateMachine, TransitionContext};

    use crate::bootstrap::bootstrap;

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_sweeper_interval() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                sweeper_interval_secs: Some(600),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("sweeper.interval_secs"));
    }

    #[tokio::test]
    async fn integration_smoke_covers_startup_schema_catalog_and_lifecycle_path() {
        let app = bootstrap(valid_overrides("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN \
             ('permit', 'permit_type', 'permit_type_control', 'permit_state_history')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected foundation tables to be available after bootstrap");
        assert_eq!(table_count, 4, "bootstrap should expose baseline permit-path tables");

        let (catalog_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM permit_type")
            .fetch_one(&app.db_pool)
            .await
            .expect("expected seeded permit types");
        assert_eq!(catalog_count, 4, "bootstrap should seed the builtin permit type catalog");

        let machine = PermitStateMachine::new();
        let now = Utc::now();
        let requester = TransitionContext {
            actor_id: UserId("u-req".to_string()),
            actor_role: ActorRole::Employee,
            acting_as_requester: true,
            worker_count: 2,
            start_time: now,
            end_time: now + Duration::hours(8),
            now,
            missing_pre_work_controls: Vec::new(),
            missing_close_out_controls: Vec::new(),
            reason: None,
        };
        let manager = TransitionContext {
            actor_id: UserId("u-mgr".to_string()),
            actor_role: ActorRole::Manager,
            acting_as_requester: false,
            ..requester.clone()
        };

        let submitted = machine
            .apply(&PermitStatus::Draft, &PermitEvent::Submit, &requester)
            .expect("draft -> submitted should succeed");
        assert_eq!(submitted.to, PermitStatus::Submitted);

        let approved = machine
            .apply(&submitted.to, &PermitEvent::Approve, &manager)
            .expect("submitted -> approved should succeed");
        assert_eq!(approved.to, PermitStatus::Approved);

        let active = machine
            .apply(&approved.to, &PermitEvent::Activate, &manager)
            .expect("approved -> active should succeed");
        assert_eq!(active.to, PermitStatus::Active);

        app.db_pool.close().await;
    }

    fn valid_overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }
}
