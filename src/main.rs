mod api;
mod cli;
mod config;
mod domain_utils;
mod errors;
mod models;
mod probe;
mod queue;
mod retry;
mod risk;
mod scanner;
mod service;
mod store;

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use api::AppState;
use cli::Cli;
use config::Config;
use errors::{Result, TwistwatchError};
use probe::RootProbe;
use queue::QueueClient;
use scanner::CommandScanner;
use store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over --verbose when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load configuration
    let mut config = Config::from_env();
    config.merge_with_cli(&cli);

    if let Err(e) = config.validate() {
        error!(error = %e, "configuration rejected");
        return Err(TwistwatchError::configuration(e.to_string()));
    }

    let store = Store::connect(&config.database).await?;
    info!(url = %config.database.url, "database ready");

    let scanner = Arc::new(CommandScanner::new(config.scanner.clone()));

    let probe = if config.probe.enabled {
        Some(RootProbe::new(&config.probe)?)
    } else {
        None
    };

    let queue = QueueClient::from_config(&config.queue)?.map(Arc::new);
    if let Some(ref client) = queue {
        queue::ensure_infrastructure(client).await;
        if config.queue.run_subscriber {
            queue::spawn_subscriber(client.clone());
        }
    }

    let state = Arc::new(AppState {
        store,
        scanner,
        probe,
        queue,
        risk: config.risk.clone(),
    });

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TwistwatchError::internal_with(format!("failed to bind {addr}"), e))?;
    info!(%addr, "listening");

    axum::serve(listener, api::router(state))
        .await
        .map_err(|e| TwistwatchError::internal_with("server error", e))?;

    Ok(())
}
