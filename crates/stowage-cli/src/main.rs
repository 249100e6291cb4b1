//! stowage: maintenance passes over attachment payloads.
//!
//! Each batch subcommand runs a single bounded pass and exits; schedule it
//! from cron or a systemd timer. Passes of the same job must not overlap.

mod logging;

use std::sync::Arc;

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use stowage_core::defaults::LEGACY_BULK_MOVE_LIMIT;
use stowage_core::{BlobStore, StorageLocation, StowageConfig};
use stowage_db::{
    blob_store_from_config, create_pool_with_config, log_pool_metrics, run_migrations,
    FilesystemBackend, PgRecordStore, PoolConfig,
};
use stowage_jobs::{BatchReport, CancelFlag, IndexJob, MigrationJob, PlainTextIndexer, RepairJob};

#[derive(Parser)]
#[command(name = "stowage")]
#[command(author, version, about = "Content-addressed attachment storage maintenance")]
#[command(propagate_version = true)]
struct Cli {
    /// Blob store root, overrides STORAGE_ROOT_LOCATION (file:// only)
    #[arg(long, global = true)]
    storage: Option<String>,

    /// Print the batch report as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply schema migrations, validate the storage root and, when
    /// MIGRATION_RUN_DURING_INIT is set, run the bulk mover once
    Init,

    /// Move inline payloads into the blob store (oldest first)
    Migrate {
        /// Records per pass (default: MIGRATION_BATCH_LIMIT)
        #[arg(short, long)]
        limit: Option<i64>,
    },

    /// Decode base64-encoded blobs and certify stored payloads (newest first)
    Repair {
        /// Records per pass (default: REPAIR_BATCH_LIMIT)
        #[arg(short, long)]
        limit: Option<i64>,
    },

    /// Extract full-text index content for stored payloads (newest first)
    Index {
        /// Records per pass (default: INDEX_BATCH_LIMIT)
        #[arg(short, long)]
        limit: Option<i64>,
    },

    /// Write/read/delete round trip under the storage root
    Check,
}

/// Shared handles for one invocation.
struct Context {
    config: StowageConfig,
    records: Arc<PgRecordStore>,
    blobs: Arc<dyn BlobStore>,
    cancel: CancelFlag,
}

impl Context {
    async fn connect(config: StowageConfig) -> anyhow::Result<Self> {
        let pool = create_pool_with_config(&config.database_url, PoolConfig::from_env())
            .await
            .context("connecting to the record store")?;
        log_pool_metrics(&pool);

        let records = Arc::new(PgRecordStore::new(pool));
        let blobs = blob_store_from_config(&config, records.clone());
        if !blobs.is_configured() {
            warn!("STORAGE_ROOT_LOCATION not set; payloads stay inline");
        }

        let cancel = CancelFlag::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current record");
                on_signal.cancel();
            }
        });

        Ok(Self {
            config,
            records,
            blobs,
            cancel,
        })
    }
}

fn positive(limit: Option<i64>, default: i64) -> anyhow::Result<i64> {
    match limit {
        Some(n) if n < 1 => bail!("--limit must be positive"),
        Some(n) => Ok(n),
        None => Ok(default),
    }
}

fn emit(report: &BatchReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!(
            "{}: selected={} done={} changed={} errors={}{}{} ({} ms)",
            report.job,
            report.selected,
            report.done,
            report.changed,
            report.errors,
            if report.aborted { " aborted" } else { "" },
            if report.cancelled { " cancelled" } else { "" },
            report.duration_ms
        );
    }
    Ok(())
}

async fn check_storage(location: Option<&StorageLocation>) -> anyhow::Result<()> {
    let Some(location) = location else {
        bail!("STORAGE_ROOT_LOCATION is not set");
    };
    FilesystemBackend::new(location.root())
        .validate()
        .await
        .map_err(|e| anyhow::anyhow!("storage root {}: {}", location.root().display(), e))?;
    info!(root = %location.root().display(), "Storage root healthy");
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = StowageConfig::from_env().context("reading configuration")?;
    if let Some(storage) = cli.storage.as_deref() {
        config = config.with_storage(StorageLocation::parse(storage)?);
    }

    match cli.command {
        Commands::Check => {
            check_storage(config.storage.as_ref()).await?;
            println!("ok");
        }
        Commands::Init => {
            let ctx = Context::connect(config).await?;
            run_migrations(ctx.records.pool())
                .await
                .context("applying schema migrations")?;
            if ctx.config.storage.is_some() {
                check_storage(ctx.config.storage.as_ref()).await?;
            }
            if ctx.config.run_during_init {
                info!(limit = LEGACY_BULK_MOVE_LIMIT, "Running bulk move during init");
                let report = MigrationJob::new(
                    ctx.records.clone(),
                    ctx.blobs.clone(),
                    LEGACY_BULK_MOVE_LIMIT,
                )
                .with_cancel(ctx.cancel.clone())
                .run()
                .await;
                emit(&report, cli.json)?;
            }
        }
        Commands::Migrate { limit } => {
            let ctx = Context::connect(config).await?;
            let limit = positive(limit, ctx.config.limits.migrate)?;
            let report = MigrationJob::new(ctx.records.clone(), ctx.blobs.clone(), limit)
                .with_cancel(ctx.cancel.clone())
                .run()
                .await;
            emit(&report, cli.json)?;
        }
        Commands::Repair { limit } => {
            let ctx = Context::connect(config).await?;
            let limit = positive(limit, ctx.config.limits.repair)?;
            let report = RepairJob::new(ctx.records.clone(), ctx.blobs.clone(), limit)
                .with_cancel(ctx.cancel.clone())
                .run()
                .await;
            emit(&report, cli.json)?;
        }
        Commands::Index { limit } => {
            let ctx = Context::connect(config).await?;
            let limit = positive(limit, ctx.config.limits.index)?;
            let report = IndexJob::new(
                ctx.records.clone(),
                ctx.blobs.clone(),
                Arc::new(PlainTextIndexer::new()),
                limit,
            )
            .with_cancel(ctx.cancel.clone())
            .run()
            .await;
            emit(&report, cli.json)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let _log_guard = logging::init();

    let cli = Cli::parse();
    run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_limit_flag() {
        let cli = Cli::try_parse_from(["stowage", "migrate", "--limit", "10000", "--json"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Migrate { limit } => assert_eq!(limit, Some(10_000)),
            _ => panic!("Expected migrate"),
        }
    }

    #[test]
    fn test_positive_limit() {
        assert_eq!(positive(None, 512).unwrap(), 512);
        assert_eq!(positive(Some(3), 512).unwrap(), 3);
        assert!(positive(Some(0), 512).is_err());
    }

    #[tokio::test]
    async fn test_check_requires_location() {
        assert!(check_storage(None).await.is_err());
    }
}
