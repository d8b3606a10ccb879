//! rra-archiver - feed archiver entry point
//!
//! Loads configuration, opens the store, optionally starts the read
//! surface, and runs archival cycles until shutdown (or once).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rra_common::config::Settings;
use rra_common::db::{connect_readonly, init_database, requeue_errored_legs};
use rra_common::time::{Clock, SystemClock};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rra_archiver::services::{ArchiveTodayClient, RssFeedSource, WaybackClient};
use rra_archiver::workflow::{Coordinator, CycleConfig, Dispatcher, RunMode, Verifier, VerifyPolicy};
use rra_archiver::AppState;

/// Command-line arguments for rra-archiver
#[derive(Parser, Debug)]
#[command(name = "rra-archiver")]
#[command(about = "Archive new feed posts to the Wayback Machine and archive.today")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, default_value = "archiver.toml", env = "RRA_CONFIG")]
    config: PathBuf,

    /// SQLite store location
    #[arg(long, default_value = "reddit_archiver.sqlite", env = "RRA_DB")]
    db: PathBuf,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Create or migrate the store, then exit
    #[arg(long)]
    migrate_only: bool,

    /// Run with built-in defaults when the config file is missing
    #[arg(long)]
    use_defaults: bool,

    /// Additional source to monitor (repeatable)
    #[arg(long = "source", value_name = "NAME")]
    sources: Vec<String>,

    /// Move every errored leg back to unsubmitted before running
    #[arg(long)]
    requeue_errors: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Parse errors are reported after logging is up
    let settings = Settings::load_or_defaults(&args.config, args.use_defaults);
    let level = settings
        .as_ref()
        .map(|s| s.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},tower_http=info,sqlx=warn", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting rra-archiver v{}", env!("CARGO_PKG_VERSION"));

    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    info!("Database path: {}", args.db.display());
    let pool = init_database(&args.db)
        .await
        .with_context(|| format!("Failed to open store {}", args.db.display()))?;

    if args.migrate_only {
        info!("Store initialized and migrated; exiting (--migrate-only)");
        pool.close().await;
        return Ok(());
    }

    if args.requeue_errors {
        let requeued = requeue_errored_legs(&pool).await?;
        info!("Requeued {} errored leg(s)", requeued);
    }

    let sources = settings.resolve_sources(&args.sources)?;
    info!("Monitoring {} source(s): {}", sources.len(), sources.join(", "));

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let dashboard = if settings.dashboard.enabled {
        Some(start_dashboard(&settings, &args.db, cancel.clone()).await?)
    } else {
        None
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let wayback = Arc::new(WaybackClient::new().context("Failed to build Wayback client")?);

    let mut dispatcher =
        Dispatcher::new(pool.clone(), clock.clone()).with_jitter(settings.delay_jitter());
    if settings.do_wayback {
        dispatcher = dispatcher.with_service(wayback.clone(), settings.delay_wayback());
    }
    if settings.do_archive_today {
        let archive_today =
            Arc::new(ArchiveTodayClient::new().context("Failed to build archive.today client")?);
        dispatcher = dispatcher.with_service(archive_today, settings.delay_archive_today());
    }

    let verifier = Verifier::new(pool.clone(), clock.clone(), VerifyPolicy::from_settings(&settings))
        .with_checker(wayback);

    let feed = Arc::new(
        RssFeedSource::new(settings.feed_url_template.clone()).context("Failed to build feed client")?,
    );

    let coordinator = Coordinator::new(
        pool.clone(),
        clock,
        feed,
        dispatcher,
        verifier,
        CycleConfig::from_settings(&settings, sources),
    );

    let mode = if args.once { RunMode::Once } else { RunMode::Continuous };
    let result = coordinator.run(mode, &cancel).await;

    cancel.cancel();
    if let Some(handle) = dashboard {
        if let Err(e) = handle.await {
            warn!("Dashboard task ended abnormally: {}", e);
        }
    }
    pool.close().await;

    result?;
    info!("Shutdown complete");
    Ok(())
}

/// Bind the read surface and serve it in the background
async fn start_dashboard(
    settings: &Settings,
    db_path: &std::path::Path,
    cancel: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let read_pool = connect_readonly(db_path)
        .await
        .context("Failed to open read-only store")?;

    let addr: SocketAddr = format!("{}:{}", settings.dashboard.host, settings.dashboard.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid dashboard address {}:{}",
                settings.dashboard.host, settings.dashboard.port
            )
        })?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard to {}", addr))?;
    info!("Read surface listening on http://{}", addr);

    Ok(tokio::spawn(async move {
        if let Err(e) = rra_archiver::serve(listener, AppState::new(read_pool), cancel).await {
            error!("Read surface error: {}", e);
        }
    }))
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
        _ = token.cancelled() => return,
    }

    token.cancel();
}
