use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use postbot_core::PostbotConfig;
use postbot_scheduler::{SchedulerEngine, SchedulerHandle};
use postbot_store::{PostStore, SqlitePostStore, ViewSync};
use tracing::{error, info, warn};

mod app;
mod http;
mod ws;

/// How long in-flight background work gets to wind down after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "postbot-gateway", version, about = "Scheduled media posting service")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "POSTBOT_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "postbot_gateway=info,postbot_scheduler=info,postbot_store=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let config = PostbotConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        PostbotConfig::default()
    });

    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");
    let store: Arc<dyn PostStore> = Arc::new(SqlitePostStore::open(
        &db_path,
        Duration::from_millis(config.database.busy_timeout_ms),
    )?);

    let sync = ViewSync::new(Arc::clone(&store));
    let mut watcher = sync.watcher(Duration::from_millis(config.sync.poll_interval_ms))?;
    let retention = i64::try_from(config.sync.change_retention_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds);
    match retention {
        Some(retention) if config.sync.change_retention_secs > 0 => {
            watcher = watcher.with_retention(retention);
        }
        Some(_) => {}
        None => warn!("sync.change_retention_secs out of range, change log kept forever"),
    }

    let captioner = postbot_agent::build_captioner(&config.caption)?;
    let publisher = postbot_agent::build_publisher(&config.publisher)?;
    let engine = SchedulerEngine::new(
        Arc::clone(&store),
        captioner,
        publisher,
        &config.scheduler,
    );
    let scheduler = SchedulerHandle::new(Arc::clone(&store), config.scheduler.max_media_bytes);

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, scheduler, sync));
    let router = app::build_router(state);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let watcher_task = tokio::spawn(watcher.run(shutdown_rx.clone()));
    let mut engine_task = tokio::spawn(engine.run(shutdown_rx));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("postbot gateway listening on {}", addr);
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .into_future();

    tokio::select! {
        res = server => res?,
        res = &mut engine_task => {
            // the engine only returns on its own after a fatal store error
            let _ = shutdown_tx.send(true);
            return match res {
                Ok(Ok(())) => Err(anyhow::anyhow!("scheduler engine stopped unexpectedly")),
                Ok(Err(e)) => {
                    error!("scheduler engine failed: {e}");
                    Err(e.into())
                }
                Err(e) => Err(e.into()),
            };
        }
    }

    // signal background loops to stop, then give them a moment to finish
    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(SHUTDOWN_GRACE, engine_task).await {
        Ok(Ok(Err(e))) => warn!("scheduler engine stopped with error: {e}"),
        Ok(_) => {}
        Err(_) => warn!("scheduler engine did not stop within {:?}", SHUTDOWN_GRACE),
    }
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, watcher_task).await;
    info!("postbot gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// Create the database file's parent directory if it is missing.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
