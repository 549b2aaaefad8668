//! # Marketplace Sync Service
//!
//! Replays marketplace contract events into the order ledger on a fixed
//! interval, one pass per configured chain.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin marketplace_sync -- --config Config.toml
//! cargo run --bin marketplace_sync -- --once --chain-id 4
//! ```
//!
//! Without `database.url` (or `DATABASE_URL`) the service runs against an
//! in-memory ledger, which is only useful as a dry run.
//!
//! Press Ctrl+C to stop gracefully.

use anyhow::Result;
use clap::Parser;
use marketplace_ledger_sdk::{
    cursor_store::{CursorAdvance, CursorStore, InMemoryCursorStore},
    database::{self, PgCursorStore, PgOrderLedger},
    ledger::{InMemoryLedger, OrderLedger},
    orchestrator::{ChainTarget, SyncOrchestrator, SyncOutcome},
    settings::Settings,
};
use std::sync::Arc;
use tokio::signal;
use tokio::time::{interval, Duration, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(name = "marketplace_sync", about = "Reconcile marketplace events into the order ledger")]
struct Args {
    /// Configuration file (without extension is fine)
    #[arg(long, default_value = "Config.toml")]
    config: String,
    /// Run a single pass and exit
    #[arg(long)]
    once: bool,
    /// Only sync this chain
    #[arg(long)]
    chain_id: Option<u64>,
}

#[cfg(feature = "observability")]
fn init_logging(settings: &Settings) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log.level.clone()));
    if settings.log.format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(not(feature = "observability"))]
fn init_logging(settings: &Settings) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(settings.log.level.as_str()))
        .init();
}

async fn build_stores(settings: &Settings) -> Result<(Arc<dyn OrderLedger>, Arc<dyn CursorStore>)> {
    if settings.database.url.is_empty() {
        log::warn!("⚠️  No database configured, using in-memory ledger (dry run)");
        let ledger: Arc<dyn OrderLedger> = Arc::new(InMemoryLedger::new());
        let cursors: Arc<dyn CursorStore> = Arc::new(InMemoryCursorStore::new());
        return Ok((ledger, cursors));
    }

    let pool = database::connect(&settings.database).await?;
    let ledger: Arc<dyn OrderLedger> = Arc::new(PgOrderLedger::new(pool.clone(), settings.database.schema.clone()));

    #[cfg(feature = "redis")]
    if settings.redis.enabled {
        use marketplace_ledger_sdk::cursor_store::RedisCursorStore;
        match RedisCursorStore::connect(&settings.redis.url).await {
            Ok(store) => {
                let cursors: Arc<dyn CursorStore> = Arc::new(store);
                return Ok((ledger, cursors));
            }
            Err(e) => log::warn!("⚠️  Redis cursor store unavailable ({}), falling back to Postgres", e),
        }
    }

    let cursors: Arc<dyn CursorStore> = Arc::new(PgCursorStore::new(pool, settings.database.schema.clone()));
    Ok((ledger, cursors))
}

fn log_outcome(chain_id: u64, outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::UpToDate { cursor, head } => {
            log::debug!("chain {}: up to date (cursor {}, head {})", chain_id, cursor, head)
        }
        SyncOutcome::AlreadyRunning => log::debug!("chain {}: pass already running", chain_id),
        SyncOutcome::Synced(report) => {
            let cursor = match &report.cursor {
                CursorAdvance::Advanced { current, .. } => current.to_string(),
                CursorAdvance::Unchanged(value) => value.to_string(),
                CursorAdvance::Refused { stored, .. } => format!("{} (refused)", stored),
            };
            log::info!(
                "chain {}: blocks {}..={} applied={} failed={} complete={} cursor={} in {:?}",
                chain_id,
                report.from_block,
                report.to_block,
                report.applied(),
                report.failed(),
                report.is_complete(),
                cursor,
                report.duration
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let args = Args::parse();
    let settings = Settings::from_path(&args.config)?;
    init_logging(&settings);

    log::info!("🚀 Starting Marketplace Sync Service");

    #[cfg(feature = "observability")]
    if settings.metrics.enabled {
        marketplace_ledger_sdk::metrics::install_prometheus_exporter(settings.metrics.port)?;
        log::info!("✅ Prometheus exporter listening on :{}", settings.metrics.port);
    }

    let (ledger, cursors) = build_stores(&settings).await?;
    log::info!("✅ Ledger and cursor store ready");

    let mut orchestrator = SyncOrchestrator::from_settings(&settings, ledger, cursors);
    for chain in &settings.chains {
        if args.chain_id.map_or(false, |id| id != chain.chain_id) {
            continue;
        }
        orchestrator = orchestrator.with_chain(ChainTarget::from_config(chain, &settings)?);
        log::info!(
            "✅ Chain {} configured (marketplace {}, deployed at block {})",
            chain.chain_id,
            chain.marketplace_address,
            chain.deployment_block
        );
    }
    if orchestrator.chain_ids().is_empty() {
        anyhow::bail!("No chains to sync; check [[chains]] in {}", args.config);
    }

    if args.once {
        for (chain_id, result) in orchestrator.sync_all().await {
            match result {
                Ok(outcome) => log_outcome(chain_id, &outcome),
                Err(e) => log::error!("chain {}: sync pass failed: {}", chain_id, e),
            }
        }
        return Ok(());
    }

    let mut ticker = interval(Duration::from_secs(settings.sync.interval_seconds.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    log::info!("   Sync interval: {} seconds", settings.sync.interval_seconds);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for (chain_id, result) in orchestrator.sync_all().await {
                    match result {
                        Ok(outcome) => log_outcome(chain_id, &outcome),
                        Err(e) => log::error!("chain {}: sync pass failed: {}", chain_id, e),
                    }
                }
                let quarantined = orchestrator.quarantine().len();
                if quarantined > 0 {
                    log::warn!("⚠️  {} log(s) in quarantine", quarantined);
                }
            }
            _ = signal::ctrl_c() => {
                log::info!("🛑 Shutdown signal received, stopping");
                break;
            }
        }
    }

    Ok(())
}
