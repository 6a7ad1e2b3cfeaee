// src/main.rs
use env_logger::{Builder, Env};
use finance_tracker::auth::{AuthService, SessionManager};
use finance_tracker::config::{Config, StorageBackend};
use finance_tracker::db::{MemoryStore, ScyllaStore, Store};
use finance_tracker::quotes::TwelveDataClient;
use finance_tracker::trading::TradingEngine;
use finance_tracker::{api, FinanceTracker};
use log::{error, info, warn};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let store: Arc<dyn Store> = match config.storage {
        StorageBackend::Scylla => {
            match ScyllaStore::connect(&config.scylla_node, &config.keyspace).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    error!("Failed to initialize database: {}", e);
                    return;
                }
            }
        }
        StorageBackend::Memory => {
            warn!("Using the in-memory store; nothing survives a restart.");
            Arc::new(MemoryStore::new())
        }
    };
    info!("Connected to database...");

    let quotes = match TwelveDataClient::new(
        &config.quote_api_url,
        &config.quote_api_key,
        config.quote_timeout,
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to build quote client: {}", e);
            return;
        }
    };

    let sessions = SessionManager::new(&config.session_secret, config.session_ttl);
    let tracker = Arc::new(FinanceTracker::new(
        AuthService::new(store.clone(), sessions),
        TradingEngine::new(store, quotes),
    ));

    let routes = api::routes(tracker);

    info!("Server running on http://{}", config.listen_addr);
    warp::serve(routes).run(config.listen_addr).await;
}
