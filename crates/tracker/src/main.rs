//! Main entry point for the passport slot tracker.
//! Polls the remote availability API, persists observations, and sends a
//! Slack notification whenever slot state changes.

use std::sync::Arc;

use notifier::SlackNotifier;
use postgres::database::*;
use slot_scan::{
    ChangeDetector, PgSlotStore, ProbeSource, ProberConfig, ScanExecutor, SlotProber,
    WaitingRoomConfig, WaitingRoomQueue,
};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
use config::AppConfig;

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("🚀 Starting passport slot tracker...");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if config.scan.locations.is_empty() {
        error!("❌ No locations configured, nothing to track");
        std::process::exit(1);
    }

    // Create database connection pool
    let pool = match create_connection_pool().await {
        Ok(pool) => {
            info!("🗃️ Database pool created successfully");

            if let Err(e) = test_connection(&pool).await {
                error!("❌ Database connection test failed: {}", e);
            }
            pool
        }
        Err(e) => {
            error!("❌ Failed to create database pool: {}", e);
            error!("💡 Make sure PostgreSQL is running and DATABASE_URL is set");
            std::process::exit(1);
        }
    };

    let prober: Arc<dyn ProbeSource> = match SlotProber::new(ProberConfig::default()) {
        Ok(prober) => Arc::new(prober),
        Err(e) => {
            error!("❌ Failed to create slot prober: {}", e);
            std::process::exit(1);
        }
    };

    let store = Arc::new(PgSlotStore::new(pool));
    let detector = Arc::new(ChangeDetector::new(store.clone()));
    let notifier = Arc::new(SlackNotifier::new(config.slack_webhook.clone()));

    let (waiting_room, worker) = WaitingRoomQueue::new(
        prober.clone(),
        detector.clone(),
        notifier.clone(),
        WaitingRoomConfig::default(),
    );
    let worker_handle = tokio::spawn(worker.run());

    let executor = ScanExecutor::new(
        prober,
        detector,
        store,
        notifier,
        waiting_room,
        config.scan,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Ctrl-C received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    if let Err(e) = executor.run(shutdown_rx).await {
        error!("❌ Scan executor failed: {}", e);
    }

    // Dropping the executor drops the queue handle, which lets the worker
    // drain and exit.
    drop(executor);
    let _ = worker_handle.await;

    info!("👋 Tracker stopped");
}
