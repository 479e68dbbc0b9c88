//! driftwatch - endpoint availability and content drift monitoring.

use driftwatch::config::ServerConfig;
use driftwatch::db::{Store, Target};
use driftwatch::evaluation::Evaluator;
use driftwatch::probe::HttpProber;
use driftwatch::scheduler::Scheduler;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("driftwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting driftwatch...");
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Add sample target if none exist
    if let Some(url) = &cfg.seed_url {
        if store.get_targets()?.is_empty() {
            tracing::info!("Adding sample target: {}", url);
            let mut target = Target {
                name: url.clone(),
                url: url.clone(),
                confirmation_threshold: i64::from(cfg.seed_threshold),
                ..Default::default()
            };
            store.add_target(&mut target)?;
        }
    }

    let evaluator = Arc::new(Evaluator::new(store.clone(), store.clone()));
    let prober = HttpProber::new(&cfg.user_agent)?;

    // Start scheduler
    let scheduler = Scheduler::new(store, evaluator, prober);
    scheduler.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    scheduler.stop_all().await;

    Ok(())
}
