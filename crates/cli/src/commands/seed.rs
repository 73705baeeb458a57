use crate::commands::CommandResult;
use permitly_core::config::{AppConfig, LoadOptions};
use permitly_db::fixtures::builtin_permit_types;
use permitly_db::{connect_with_settings, migrations, seed_permit_type_catalog};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seeded = seed_permit_type_catalog(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 6u8))?;

        pool.close().await;
        Ok::<usize, (&'static str, String, u8)>(seeded)
    });

    match result {
        Ok(seeded) => {
            let catalog_lines: Vec<String> = builtin_permit_types()
                .iter()
                .map(|permit_type| {
                    format!(
                        "  - {}: {} ({} controls)",
                        permit_type.code,
                        permit_type.name,
                        permit_type.controls.len()
                    )
                })
                .collect();
            let message = format!(
                "permit type catalog seeded ({seeded} types):\n{}",
                catalog_lines.join("\n")
            );
            CommandResult::success("seed", message)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}
