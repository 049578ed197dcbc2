// =============================================================================
// trading-suite — demonstration binary
// =============================================================================
//
// Wires a Suite from the config file named by `SUITE_CONFIG_PATH` (default
// `./suite.json`) and credentials from the environment, starts the Stream
// Client, and runs until interrupted.
// =============================================================================

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use trading_suite::config::{Credentials, SuiteConfig};
use trading_suite::suite::Suite;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("trading-suite starting up");

    let config_path = std::env::var("SUITE_CONFIG_PATH").unwrap_or_else(|_| "./suite.json".to_string());
    let config = match SuiteConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, path = %config_path, "no usable suite config found, refusing to start without one");
            return Err(e);
        }
    };

    let credentials = Credentials::from_env()?;

    let suite = Arc::new(Suite::new(config, credentials)?);
    suite.start();

    info!("suite running, press Ctrl+C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }

    info!("shutting down");
    suite.shutdown().await;
    Ok(())
}
