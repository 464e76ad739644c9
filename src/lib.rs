pub mod cli;
pub mod core;
pub mod migrate;
pub mod service;
pub mod store;

use crate::core::config::{AppConfig, StorageConfig};
use crate::core::model::{FundId, Strategy};
use crate::migrate::{MigrationOptions, MigrationOutcome};
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{debug, info};

pub enum AppCommand {
    Migrate {
        source: Option<PathBuf>,
        target: Option<String>,
        dry_run: bool,
    },
    Funds {
        strategy: Option<Strategy>,
    },
    Investments {
        fund_id: Option<String>,
    },
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("fundtrack starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    match command {
        AppCommand::Migrate {
            source,
            target,
            dry_run,
        } => {
            let source = source
                .or(config.migration.source)
                .context("No migration source; pass --source or set migration.source")?;
            let (configured_target, cascade_on_delete) = match config.storage {
                StorageConfig::Relational {
                    connection,
                    cascade_on_delete,
                } => (Some(connection), cascade_on_delete),
                StorageConfig::Document { .. } => (None, false),
            };
            let target = target
                .or(config.migration.target)
                .or(configured_target)
                .context("No migration target; pass --target or set migration.target")?;

            let report = cli::migrate::run(
                &source,
                &target,
                cascade_on_delete,
                config.rules,
                MigrationOptions { dry_run },
            )
            .await?;
            if report.outcome() == MigrationOutcome::PartialFailure {
                anyhow::bail!(
                    "Migration left {} fund(s) and {} investment(s) behind",
                    report.funds.rejected(),
                    report.investments.rejected()
                );
            }
            Ok(())
        }
        AppCommand::Funds { strategy } => {
            let store = store::open_store(&config.storage, config.rules)?;
            cli::list::funds(store.as_ref(), strategy).await?;
            Ok(())
        }
        AppCommand::Investments { fund_id } => {
            let store = store::open_store(&config.storage, config.rules)?;
            cli::list::investments(store.as_ref(), fund_id.map(FundId::from)).await?;
            Ok(())
        }
    }
}
