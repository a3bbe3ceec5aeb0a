use std::sync::Arc;

use parking_lot::Mutex;

use reconnect::campaign::scheduler::run_campaign_scheduler;
use reconnect::config::load_config;
use reconnect::store::Store;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match load_config() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            log::error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let store = match Store::open() {
        Ok(store) => Arc::new(Mutex::new(store)),
        Err(e) => {
            log::error!("Failed to open store: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("reconnectd started");

    let scheduler = tokio::spawn(run_campaign_scheduler(store.clone(), config.clone()));

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
    }
    log::info!("Shutting down");
    scheduler.abort();
}
