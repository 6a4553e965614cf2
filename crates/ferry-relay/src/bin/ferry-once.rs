//! Relay the contents of an inbox directory once, then exit.
//!
//! Useful for backfills and for checking credentials: no scheduling, no
//! idle sleeps and no first-run guard. Cooldowns still apply between
//! publishes.
//!
//! # Usage
//!
//! ```bash
//! # Relay everything in ./backfill, keeping the files
//! ferry-once -i ./backfill --keep
//!
//! # Use a separate identity store
//! ferry-once -i ./inbox --data-dir /var/lib/ferry
//! ```

use anyhow::{Context, Result, bail};
use clap::Parser;
use ferry_core::metrics::{init_metrics, start_metrics_server};
use ferry_relay::adapter::{
    ChatTranslator, DynamicClient, DynamicConfig, FfmpegTransformer, MediaConfig,
    TranslatorConfig,
};
use ferry_relay::{
    Collaborators, EngineControl, IdentityStore, InboxConfig, InboxSource, ItemSource,
    RelayConfig, RelayEngine, RelayOutcome, events,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Relay an inbox directory once.
#[derive(Parser, Debug)]
#[command(name = "ferry-once")]
#[command(about = "Relay queued items once and exit")]
struct Args {
    /// Inbox directory with *.json / *.jsonl items
    #[arg(short, long)]
    input: PathBuf,

    /// Data directory (identity store lives in <data-dir>/identity)
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Keep input files instead of deleting them
    #[arg(long)]
    keep: bool,

    /// Load environment from this file before reading configuration
    #[arg(long)]
    dotenv: Option<PathBuf>,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "0")]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ferry_relay=debug")),
        )
        .init();

    let args = Args::parse();

    match &args.dotenv {
        Some(path) => {
            dotenvy::from_path(path).with_context(|| format!("loading {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    if !args.input.is_dir() {
        bail!("input must be a directory: {}", args.input.display());
    }

    if args.metrics_port > 0 {
        let handle = init_metrics();
        start_metrics_server(args.metrics_port, handle).await?;
    }

    let config = RelayConfig::from_env()?;
    let store = Arc::new(IdentityStore::open(args.data_dir.join("identity"))?);
    let (events_tx, _) = events::channel();
    let control = Arc::new(EngineControl::new(events_tx));

    let collaborators = Collaborators {
        translator: Arc::new(ChatTranslator::new(TranslatorConfig::from_env())?),
        media: Arc::new(FfmpegTransformer::new(MediaConfig::from_env())),
        destination: Arc::new(DynamicClient::new(DynamicConfig::from_env()?)?),
    };
    let engine = RelayEngine::new(config, store.clone(), control, collaborators);

    let recovered = engine.recover_attempts()?;
    if recovered > 0 {
        warn!(recovered, "Previous run left publishes with unknown outcome");
    }

    let mut source = InboxSource::new(InboxConfig {
        dir: args.input.clone(),
        delete_consumed: !args.keep,
    });
    let mut items = source.fetch().await?;
    items.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    info!("Found {} items in {}", items.len(), args.input.display());

    let start = Instant::now();
    let mut relayed = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;

    for item in &items {
        if store.has_processed(&item.id)? {
            skipped += 1;
            continue;
        }
        match engine.relay(item).await {
            Ok(RelayOutcome::Relayed { destination }) => {
                info!("{} -> {}", item.id, destination);
                relayed += 1;
            }
            Ok(RelayOutcome::Halted { reason }) => {
                warn!("Destination rejected credentials ({reason}); stopping");
                failed += 1;
                break;
            }
            Ok(RelayOutcome::Aborted { reason, .. }) => {
                warn!("{} failed: {}", item.id, reason);
                failed += 1;
            }
            Ok(_) => skipped += 1,
            Err(e) => {
                warn!("{} errored: {}", item.id, e);
                failed += 1;
            }
        }
    }

    store.flush()?;

    info!("═══════════════════════════════════════════════════════");
    info!("Relayed:  {}", relayed);
    info!("Skipped:  {}", skipped);
    info!("Failed:   {}", failed);
    info!("Elapsed:  {:.1}s", start.elapsed().as_secs_f64());

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
