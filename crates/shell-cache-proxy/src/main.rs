//! Shell Cache Proxy - offline-first reverse proxy for a web application shell
//!
//! Every request for the application's assets goes through the shell cache
//! policy: cached assets are answered locally, everything else is fetched
//! from the origin and stored when eligible. When the origin is unreachable
//! the cached shell document is served instead.

mod config;
mod error;
mod server;
mod types;

use crate::config::{CacheBackend, Config};
use crate::error::{ProxyError, Result};
use crate::server::{start_server, ServerState, SharedState};
use shell_cache::{
    CacheStorage, FileCacheStorage, HttpNetwork, MemoryCacheStorage, Network, Registration,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("shell_cache_proxy=info".parse()?)
        .add_directive("shell_cache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting Shell Cache Proxy...");

    let config = Config::from_env()?;
    info!("Port: {}", config.port);
    info!("Origin: {}", config.origin_url);
    info!("Cache version: {}", config.policy.version);
    info!("Core files: {:?}", config.policy.core_files);
    info!("Cache backend: {:?}", config.backend);

    let caches: Arc<dyn CacheStorage> = match config.backend {
        CacheBackend::File => {
            info!("Cache dir: {:?}", config.cache_dir);
            Arc::new(FileCacheStorage::open_at(config.cache_dir.clone()).await?)
        }
        CacheBackend::Memory => Arc::new(MemoryCacheStorage::new()),
    };
    let network: Arc<dyn Network> = Arc::new(HttpNetwork::new(&config.origin_url)?);

    // Install and activate the configured generation before serving
    let registration = Registration::new(config.origin_url.clone(), caches, Arc::clone(&network));
    registration.register_policy(config.policy.clone()).await?;

    let state: SharedState = Arc::new(ServerState::new(registration, network));

    // Start HTTP server (blocking)
    start_server(state, config.port)
        .await
        .map_err(|e| ProxyError::Config(format!("Server error: {}", e)))?;

    Ok(())
}
