//! The configuration needed to run the driver. This can be built manually in
//! your code or, if the `cli` feature is enabled, parsed from command line
//! flags and environment variables with [`Config::new_from_flags`].

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

const DEFAULT_PRUNE_INTERVAL_SECS: u64 = 60;
const DEFAULT_AFTER_LIFESPAN_SECS: u64 = 600;
const DEFAULT_HEADROOM: f64 = 0.10;
const DEFAULT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The configuration needed for the driver to run properly.
#[derive(Clone, Debug)]
pub struct Config {
    pub driver_name: String,
    pub node_id: String,
    pub endpoint: String,
    pub workdir: PathBuf,
    pub max_volumes_per_node: i64,
    pub after_lifespan: Duration,
    pub prune_interval: Duration,
    pub headroom: f64,
    pub version: String,
}

impl Config {
    /// Builds a config from explicit values, validating the same fields
    /// [`pressure::pressure_factor`](crate::pressure::pressure_factor) would
    /// otherwise reject only once a prune pass runs.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver_name: String,
        node_id: String,
        endpoint: String,
        workdir: PathBuf,
        max_volumes_per_node: i64,
        after_lifespan: Duration,
        prune_interval: Duration,
        headroom: f64,
        version: Option<String>,
    ) -> Result<Self> {
        if driver_name.is_empty() {
            return Err(Error::InvalidArgument("driverName must not be empty".to_string()));
        }
        if node_id.is_empty() {
            return Err(Error::InvalidArgument("nodeID must not be empty".to_string()));
        }
        // `headroom` is intentionally not range-checked here: an
        // out-of-range value is a valid (if useless) configuration that the
        // pruner degrades gracefully from at prune time, falling back to
        // `pressure::FALLBACK_FACTOR` rather than refusing to start.

        Ok(Config {
            driver_name,
            node_id,
            endpoint,
            workdir,
            max_volumes_per_node,
            after_lifespan,
            prune_interval,
            headroom,
            version: version.filter(|v| !v.is_empty()).unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        })
    }

    /// Parses all command line flags and environment variables, applying the
    /// defaults above for anything left unset.
    #[cfg(feature = "cli")]
    pub fn new_from_flags() -> Result<Self> {
        use structopt::StructOpt;
        let opts = Opts::from_args();
        Config::new(
            opts.driver_name,
            opts.node_id,
            opts.endpoint,
            opts.workdir,
            opts.max_volumes_per_node,
            Duration::from_secs(opts.after_lifespan_secs),
            Duration::from_secs(opts.prune_interval_secs),
            opts.headroom,
            opts.version,
        )
    }
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "cli", derive(structopt::StructOpt))]
#[cfg_attr(
    feature = "cli",
    structopt(name = "scratchvold", about = "Node-local lifecycle manager for ephemeral scratch volumes")
)]
#[cfg(feature = "cli")]
struct Opts {
    #[structopt(long, env = "SCRATCHVOL_DRIVER_NAME", default_value = "scratchvol.csi.example.com")]
    driver_name: String,

    #[structopt(long, env = "SCRATCHVOL_NODE_ID")]
    node_id: String,

    #[structopt(long, env = "SCRATCHVOL_ENDPOINT", default_value = "unix:///var/lib/kubelet/plugins/scratchvol/csi.sock")]
    endpoint: String,

    #[structopt(long, env = "SCRATCHVOL_WORKDIR", parse(from_os_str))]
    workdir: PathBuf,

    #[structopt(long, env = "SCRATCHVOL_MAX_VOLUMES_PER_NODE", default_value = "0")]
    max_volumes_per_node: i64,

    #[structopt(long = "after-lifespan-secs", env = "SCRATCHVOL_AFTER_LIFESPAN_SECS", default_value = "600")]
    after_lifespan_secs: u64,

    #[structopt(long = "prune-interval-secs", env = "SCRATCHVOL_PRUNE_INTERVAL_SECS", default_value = "60")]
    prune_interval_secs: u64,

    #[structopt(long, env = "SCRATCHVOL_HEADROOM", default_value = "0.10")]
    headroom: f64,

    #[structopt(long, env = "SCRATCHVOL_VERSION")]
    version: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config::new(
            "scratchvol.csi.example.com".to_string(),
            "default-node".to_string(),
            "unix:///var/lib/kubelet/plugins/scratchvol/csi.sock".to_string(),
            std::env::temp_dir().join("scratchvol"),
            0,
            Duration::from_secs(DEFAULT_AFTER_LIFESPAN_SECS),
            Duration::from_secs(DEFAULT_PRUNE_INTERVAL_SECS),
            DEFAULT_HEADROOM,
            None,
        )
        .expect("hardcoded default config is always valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.headroom, DEFAULT_HEADROOM);
        assert_eq!(config.version, DEFAULT_VERSION);
    }

    #[test]
    fn rejects_empty_driver_name() {
        let err = Config::new(
            String::new(),
            "node-1".to_string(),
            "unix:///tmp/csi.sock".to_string(),
            PathBuf::from("/tmp/scratchvol"),
            0,
            Duration::from_secs(600),
            Duration::from_secs(60),
            0.10,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn out_of_range_headroom_is_accepted_at_construction() {
        // Rejected only when the pruner asks the pressure model to use it;
        // see pruner::tests and pressure::tests for the fallback behavior.
        let config = Config::new(
            "driver".to_string(),
            "node-1".to_string(),
            "unix:///tmp/csi.sock".to_string(),
            PathBuf::from("/tmp/scratchvol"),
            0,
            Duration::from_secs(600),
            Duration::from_secs(60),
            1.5,
            None,
        )
        .unwrap();
        assert_eq!(config.headroom, 1.5);
    }

    #[test]
    fn empty_version_falls_back_to_crate_version() {
        let config = Config::new(
            "driver".to_string(),
            "node-1".to_string(),
            "unix:///tmp/csi.sock".to_string(),
            PathBuf::from("/tmp/scratchvol"),
            0,
            Duration::from_secs(600),
            Duration::from_secs(60),
            0.10,
            Some(String::new()),
        )
        .unwrap();
        assert_eq!(config.version, DEFAULT_VERSION);
    }
}
