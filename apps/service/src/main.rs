#![warn(clippy::all)]

use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

mod api;
mod config;
mod database;
mod models;
mod monitoring;
mod pool;
mod validation;

use config::Config;
use database::{Database, DatabaseImpl, initialize_database};
use logger::init_tracing;
use monitoring::notifier::{NotificationGate, Notifier, WebhookNotifier};
use monitoring::recorder::StatusRecorder;
use monitoring::retention::{RetentionCleanup, RetentionPolicy};
use monitoring::{MonitorScheduler, MonitoringExecutor};

#[derive(Parser, Debug)]
#[command(version, about = "Monitor scheduling and execution service")]
struct Args {
    /// Path to the TOML config file (created with defaults if missing)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    // sqlx pulls in ring while rustls would otherwise default to aws-lc-rs;
    // pin the process-wide provider before any TLS config is built.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args = Args::parse();
    let config = Config::from_config(args.config).context("failed to load configuration")?;
    info!("{config}");

    let pool = pool::create_pool(&config.database.path).await?;
    {
        let conn = pool.get().await?;
        initialize_database(&conn).await?;
    }

    let database: Arc<dyn Database> = Arc::new(DatabaseImpl::new_from_pool(pool));

    let channel: Option<Arc<dyn Notifier>> = config
        .notifications
        .webhook_url
        .as_deref()
        .map(|url| Arc::new(WebhookNotifier::new(url)) as Arc<dyn Notifier>);
    let gate = Arc::new(NotificationGate::new(channel));

    let executor = Arc::new(MonitoringExecutor::new(Arc::clone(&database)));
    let recorder = Arc::new(StatusRecorder::new(Arc::clone(&database)));
    let scheduler = Arc::new(MonitorScheduler::new(
        Arc::clone(&database),
        executor,
        recorder,
        gate,
        config.scheduler.max_concurrent_checks,
    ));
    scheduler.start_all().await;

    let retention = RetentionCleanup::new(
        Arc::clone(&database),
        RetentionPolicy { record_days: config.scheduler.retention_days },
    );
    let cleanup_handle = retention.start_periodic_cleanup();

    let push_db = Arc::clone(&database);
    let server = HttpServer::new(move || {
        App::new().app_data(web::Data::new(Arc::clone(&push_db))).configure(api::routes)
    })
    .bind((config.push.bind.as_str(), config.push.port))
    .with_context(|| {
        format!("failed to bind push listener on {}:{}", config.push.bind, config.push.port)
    })?
    .run();

    info!("push listener on {}:{}", config.push.bind, config.push.port);
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutdown signal received, draining");

    server_handle.stop(true).await;
    cleanup_handle.abort();
    scheduler.shutdown().await;

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => error!("push listener exited with error: {error}"),
        Err(error) => error!("push listener task panicked: {error}"),
    }

    info!("shutdown complete");
    Ok(())
}
