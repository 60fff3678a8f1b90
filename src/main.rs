use std::sync::Arc;

use chrono::Utc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tavla::{Config, Node, NodeTaskEngine};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            eprintln!("Optional: TAVLA_DB_PATH (default: ./tavla.redb)");
            eprintln!("Optional: TAVLA_STARTUP_DELAY_SECS, TAVLA_MAINTENANCE_PERIOD_SECS");
            eprintln!("Optional: TAVLA_TASK_INTERVAL_SECS, TAVLA_OWN_IDENTITIES=id@key,...");
            std::process::exit(1);
        }
    };

    tracing::info!("Starting Tavla node");
    tracing::info!("Database path: {}", config.db_path.display());
    tracing::info!("Own identities: {}", config.own_identities.len());

    let node = match Node::open(&config) {
        Ok(node) => node,
        Err(e) => {
            eprintln!("Database error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = node.start() {
        eprintln!("Failed to start message manager: {}", e);
        std::process::exit(1);
    }

    // The task engine has no thread of its own
    let tasks = Arc::clone(&node.tasks);
    let interval = config.task_interval();
    let task_loop = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            run_tasks(Arc::clone(&tasks)).await;
        }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }

    tracing::info!("Shutting down");
    task_loop.abort();
    let manager = Arc::clone(&node.manager);
    if tokio::task::spawn_blocking(move || manager.terminate())
        .await
        .is_err()
    {
        tracing::error!("Message manager shutdown panicked");
    }
}

async fn run_tasks(tasks: Arc<NodeTaskEngine>) {
    match tokio::task::spawn_blocking(move || tasks.run_once(Utc::now())).await {
        Ok(Ok(stats)) if stats.deleted + stats.processed > 0 => {
            tracing::debug!(
                deleted = stats.deleted,
                processed = stats.processed,
                "Task engine pass"
            );
        }
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::error!("Task engine pass failed: {}", e),
        Err(e) => tracing::error!("Task engine pass panicked: {}", e),
    }
}
