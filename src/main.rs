use anyhow::{Context, Result};
use frigate_dashboard::api::{AppState, RestApi};
use frigate_dashboard::cache::{CacheBackend, MemoryCache, RedisCache};
use frigate_dashboard::config;
use frigate_dashboard::db::{DatabaseService, EventStore};
use frigate_dashboard::{AppContext, TaskSupervisor};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

async fn run_app() -> Result<()> {
    // Config path: first argument, then DASHBOARD_CONFIG
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("DASHBOARD_CONFIG").ok())
        .map(PathBuf::from);
    let config = config::load_config(config_path.as_deref())?;

    let log_env = env_logger::Env::default().default_filter_or(&config.api.log_level);
    env_logger::Builder::from_env(log_env).init();
    info!("Starting Frigate dashboard middleware");
    info!("Configuration loaded");

    let database = DatabaseService::new(&config.database).await?;
    let store: Arc<dyn EventStore> = Arc::new(database.timeline());

    let cache: Arc<dyn CacheBackend> = match &config.cache.redis_url {
        Some(url) => Arc::new(
            RedisCache::new(url)
                .await
                .context("Failed to connect to Redis")?,
        ),
        None => {
            warn!("No Redis URL configured, using in-process cache");
            Arc::new(MemoryCache::new())
        }
    };

    let ctx = Arc::new(AppContext::new(config.clone(), store, cache)?);
    let supervisor = Arc::new(TaskSupervisor::from_context(&ctx));
    supervisor.start().await;

    let http_server = RestApi::new(
        &config.api,
        AppState {
            ctx: Arc::clone(&ctx),
            supervisor: Arc::clone(&supervisor),
        },
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutting down...");
    };
    if let Err(e) = http_server.run(shutdown).await {
        error!("API server failed: {}", e);
    }

    // No task tick is cut short against the shared cache or pool
    supervisor.stop_all().await;
    database.close().await;
    info!("Shutdown complete");

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run_app().await {
        eprintln!("Application error: {:#}", e);
        std::process::exit(1);
    }
}
