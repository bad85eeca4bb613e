//! Process-wide runtime and manager behind the C exports.

use crate::error::BridgeError;
use enchantnet_core::{InstanceManager, ManagerConfig};
use once_cell::sync::OnceCell;
use std::future::Future;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log filter used when `ENCHANTNET_LOG` is unset or invalid.
pub const DEFAULT_LOG_FILTER: &str = "enchantnet=info";

/// Default number of runtime worker threads.
pub const DEFAULT_WORKER_THREADS: usize = 2;

static BRIDGE: OnceCell<Bridge> = OnceCell::new();

/// Bridge configuration, read once from the environment.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub manager: ManagerConfig,
    pub worker_threads: usize,
    pub log_filter: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            manager: ManagerConfig::default(),
            worker_threads: DEFAULT_WORKER_THREADS,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl BridgeConfig {
    /// Load from environment variables.
    ///
    /// - `ENCHANTNET_WORKER_THREADS`: runtime worker threads (default: 2)
    /// - `ENCHANTNET_LOG`: tracing filter (default: `enchantnet=info`)
    /// - plus everything [`ManagerConfig::from_env`] reads
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            manager: ManagerConfig::from_env(),
            worker_threads: std::env::var("ENCHANTNET_WORKER_THREADS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(default.worker_threads),
            log_filter: std::env::var("ENCHANTNET_LOG").unwrap_or(default.log_filter),
        }
    }
}

/// Runtime plus the manager it drives.
pub struct Bridge {
    runtime: Runtime,
    manager: InstanceManager,
}

impl Bridge {
    fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        init_logging(&config.log_filter);
        config.manager.validate().map_err(enchantnet_core::CoreError::from)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name("enchantnet-worker")
            .enable_all()
            .build()
            .map_err(BridgeError::Runtime)?;

        tracing::info!(
            worker_threads = config.worker_threads,
            max_instances = config.manager.max_instances,
            "Bridge initialized"
        );

        Ok(Self {
            runtime,
            manager: InstanceManager::new(config.manager),
        })
    }

    pub fn manager(&self) -> &InstanceManager {
        &self.manager
    }

    /// Run a future to completion on the bridge runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

/// The shared bridge, created on first use.
pub fn global() -> Result<&'static Bridge, BridgeError> {
    BRIDGE.get_or_try_init(|| Bridge::new(BridgeConfig::from_env()))
}

/// Install a stderr subscriber unless the host already installed one.
fn init_logging(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
