#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use dotenv::dotenv;
use machine_mcm::mcm::{
    ChaChaCipher, ConnectionManager, DashMapStatsStore, InMemoryRepository, McmConfig, Resolver,
    SshTransport, Sweeper,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

const INVENTORY_ENV_VAR: &str = "MCM_INVENTORY";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let config = McmConfig::from_env();
    info!("Resolved configuration: {:?}", config);

    let repository = match std::env::var(INVENTORY_ENV_VAR) {
        Ok(path) => {
            info!("Loading machine inventory from {}", path);
            Arc::new(InMemoryRepository::from_inventory_file(&path)?)
        }
        Err(_) => {
            info!("{} is not set, starting with an empty inventory", INVENTORY_ENV_VAR);
            Arc::new(InMemoryRepository::new())
        }
    };
    info!("{} machine(s) in inventory", repository.len());

    let cipher = Arc::new(ChaChaCipher::from_env()?);
    let resolver = Resolver::new(repository.clone(), repository.clone(), cipher);
    let transport = Arc::new(SshTransport::new(config.clone()));
    let manager = Arc::new(ConnectionManager::new(
        resolver,
        transport,
        Arc::new(DashMapStatsStore::new()),
    ));

    let sweeper = Arc::new(Sweeper::new(manager.clone(), repository, config.clone()));
    let cancel = CancellationToken::new();
    let schedule = sweeper.schedule(config.sweep_interval, cancel.clone());

    info!("Machine connection manager is ready");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    cancel.cancel();
    schedule.await?;
    manager.shutdown().await;

    Ok(())
}
