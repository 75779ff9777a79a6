//! Process bootstrap for the node-local volume lifecycle manager. This
//! binary parses configuration, starts the driver (catalog + registry +
//! deletion queue + pruner), and waits for a shutdown signal. It does not
//! serve any RPC surface; wiring a CSI dispatch loop on top of
//! [`scratchvol::Driver`] is left to the serving layer that embeds this
//! crate.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scratchvol::{Config, Driver};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    #[cfg(feature = "cli")]
    let config = Config::new_from_flags()?;
    #[cfg(not(feature = "cli"))]
    let config = Config::default();

    tracing::info!(
        driver = %config.driver_name,
        node = %config.node_id,
        workdir = %config.workdir.display(),
        version = %config.version,
        "starting scratchvol driver"
    );

    let driver = Driver::start(config)?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    driver.shutdown();
    Ok(())
}
