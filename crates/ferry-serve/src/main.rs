//! Ferry relay daemon.
//!
//! Drains the inbox on a randomized schedule, relays every new item to the
//! destination, and exposes the control API for pause/resume/wake.
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (./data/identity, ./data/inbox, control on 0.0.0.0:8090)
//! ferry
//!
//! # Custom paths, no control surface
//! ferry --data-dir /var/lib/ferry --inbox /srv/ferry/inbox --no-control
//! ```
//!
//! # Graceful Shutdown
//!
//! On SIGINT (Ctrl+C) the scheduler finishes the destination call in flight,
//! leaves the remaining items for the next start, flushes the identity store
//! and exits.

use anyhow::{Context, Result};
use axum::http::Request;
use clap::Parser;
use ferry_core::metrics::{init_metrics, start_metrics_server};
use ferry_relay::adapter::{
    ChatTranslator, DynamicClient, DynamicConfig, FfmpegTransformer, MediaConfig,
    TranslatorConfig,
};
use ferry_relay::{
    Collaborators, EngineControl, IdentityStore, InboxConfig, InboxSource, RelayConfig,
    RelayEngine, Scheduler, events,
};
use ferry_serve::{AppState, Config, Notifier, NotifierConfig, router};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Ferry relay daemon.
#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(about = "Relay daemon with control API", long_about = None)]
#[command(version)]
struct Args {
    /// Path to .env file (optional).
    #[arg(long, env = "DOTENV_PATH", default_value = ".env")]
    dotenv: String,

    /// Data directory (identity store lives in <data-dir>/identity)
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Inbox directory (default: <data-dir>/inbox)
    #[arg(long)]
    inbox: Option<PathBuf>,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "9091")]
    metrics_port: u16,

    /// Do not start the HTTP control API
    #[arg(long)]
    no_control: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load .env file if it exists
    if std::path::Path::new(&args.dotenv).exists() {
        dotenvy::from_path(&args.dotenv)?;
        eprintln!("Loaded environment from {}", args.dotenv);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap())
                .add_directive("ferry_relay=debug".parse().unwrap()),
        )
        .init();

    tracing::info!("Ferry relay daemon starting...");

    if args.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(args.metrics_port, metrics_handle).await?;
    }

    // Configuration
    let relay_config = RelayConfig::from_env()?;
    let control_config = if args.no_control {
        None
    } else {
        Some(Config::from_env()?)
    };
    let inbox_dir = args
        .inbox
        .clone()
        .unwrap_or_else(|| args.data_dir.join("inbox"));
    let identity_dir = args.data_dir.join("identity");

    tracing::info!("Configuration:");
    tracing::info!("  Identity store: {}", identity_dir.display());
    tracing::info!("  Inbox: {}", inbox_dir.display());
    tracing::info!(
        "  Control API: {}",
        control_config
            .as_ref()
            .map(|c| c.bind_addr.as_str())
            .unwrap_or("disabled")
    );

    // Engine
    let store = Arc::new(
        IdentityStore::open(&identity_dir)
            .with_context(|| format!("opening identity store at {}", identity_dir.display()))?,
    );
    let (events_tx, events_rx) = events::channel();
    let control = Arc::new(EngineControl::new(events_tx));
    let collaborators = Collaborators {
        translator: Arc::new(ChatTranslator::new(TranslatorConfig::from_env())?),
        media: Arc::new(FfmpegTransformer::new(MediaConfig::from_env())),
        destination: Arc::new(DynamicClient::new(DynamicConfig::from_env()?)?),
    };
    let engine = Arc::new(RelayEngine::new(
        relay_config,
        store.clone(),
        control,
        collaborators,
    ));
    let handle = engine.control_handle();

    // Notifications
    let notifier = Notifier::new(NotifierConfig::from_env())?;
    tokio::spawn(notifier.run(events_rx));

    // Graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping gracefully...");
        let _ = shutdown_tx.send(true);
    })
    .context("Failed to set Ctrl+C handler")?;

    // Control API
    let server = match control_config {
        Some(config) => {
            let bind_addr = config.bind_addr.clone();
            let app = router(AppState::new(config, handle.clone())).layer(
                TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                    tracing::span!(
                        Level::INFO,
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                }),
            );
            let listener = tokio::net::TcpListener::bind(&bind_addr)
                .await
                .with_context(|| format!("binding control api on {bind_addr}"))?;
            tracing::info!(addr = %bind_addr, "control api listening");

            let mut stop = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = stop.wait_for(|stopping| *stopping).await;
                    })
                    .await
            }))
        }
        None => None,
    };

    // Relay loop
    let source = InboxSource::new(InboxConfig {
        dir: inbox_dir,
        delete_consumed: true,
    });
    let scheduler = Scheduler::new(engine.clone(), Box::new(source), shutdown_rx);
    let result = scheduler.run().await;

    if let Some(server) = server {
        match server.await {
            Ok(Err(e)) => tracing::warn!("Control API stopped with error: {}", e),
            Err(e) => tracing::warn!("Control API task failed: {}", e),
            Ok(Ok(())) => {}
        }
    }

    let status = handle.status();
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Mappings:          {}", status.mappings);
    tracing::info!("Relayed today:     {}", status.today.counters.successes);
    tracing::info!("Failed today:      {}", status.today.counters.failures);
    tracing::info!("Media today:       {}", status.today.counters.media_published);

    result.context("relay scheduler failed")
}
