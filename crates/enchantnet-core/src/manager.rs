//! Instance manager: registry, tunnel binding, retention sweeps and status
//! collection for every running network instance.

use crate::config::{self, InstanceConfig};
use crate::error::{BindError, ConfigError, CoreError, RetainError, StartError, StopError};
use crate::instance::{InstanceName, NetworkInstance, TunnelHandle};
use crate::status::{self, InfoRecord, InstanceInfo};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Configuration for InstanceManager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Maximum number of concurrent instances (default: 16, 0 = unlimited).
    pub max_instances: usize,
    /// How long a stopping instance may take before it is aborted (default: 3s).
    pub stop_timeout: Duration,
    /// Instance heartbeat interval (default: 1s).
    pub heartbeat_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_instances: 16,
            stop_timeout: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(1),
        }
    }
}

impl ManagerConfig {
    /// Create a new config builder.
    pub fn builder() -> ManagerConfigBuilder {
        ManagerConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `ENCHANTNET_MAX_INSTANCES` | `16` |
    /// | `ENCHANTNET_STOP_TIMEOUT_MS` | `3000` |
    /// | `ENCHANTNET_HEARTBEAT_MS` | `1000` |
    ///
    /// Unparseable or zero durations fall back to the defaults.
    pub fn from_env() -> Self {
        let default = Self::default();
        let millis = |var: &str| {
            std::env::var(var)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
        };

        Self {
            max_instances: std::env::var("ENCHANTNET_MAX_INSTANCES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_instances),
            stop_timeout: millis("ENCHANTNET_STOP_TIMEOUT_MS").unwrap_or(default.stop_timeout),
            heartbeat_interval: millis("ENCHANTNET_HEARTBEAT_MS")
                .unwrap_or(default.heartbeat_interval),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stop_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "stop_timeout",
                reason: "must be > 0".into(),
            });
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "heartbeat_interval",
                reason: "must be > 0".into(),
            });
        }
        Ok(())
    }
}

/// Builder for ManagerConfig.
#[derive(Debug, Default)]
pub struct ManagerConfigBuilder {
    config: ManagerConfig,
}

impl ManagerConfigBuilder {
    /// Set the instance limit (0 = unlimited).
    pub fn max_instances(mut self, max: usize) -> Self {
        self.config.max_instances = max;
        self
    }

    /// Set the graceful stop bound.
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.config.stop_timeout = timeout;
        self
    }

    /// Set the heartbeat interval.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<ManagerConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Manages the set of running network instances, keyed by name.
///
/// # Thread Safety
///
/// The registry sits behind an async RwLock. `start` and `retain` take the
/// write lock for the whole check-and-mutate step, so a half-built instance
/// is never visible to `collect` or `bind_tunnel`. Stopping happens after
/// the instances have been unlinked, outside the lock.
///
/// Iteration order is ascending by name.
#[derive(Clone)]
pub struct InstanceManager {
    instances: Arc<RwLock<BTreeMap<InstanceName, NetworkInstance>>>,
    config: ManagerConfig,
}

impl InstanceManager {
    /// Create a new instance manager.
    pub fn new(config: ManagerConfig) -> Self {
        tracing::info!(
            max_instances = config.max_instances,
            stop_timeout_ms = config.stop_timeout.as_millis() as u64,
            "Creating instance manager"
        );
        Self {
            instances: Arc::new(RwLock::new(BTreeMap::new())),
            config,
        }
    }

    /// Get the manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Parse a config blob and start the instance it describes.
    pub async fn run(&self, blob: &str) -> Result<InstanceName, CoreError> {
        let config = config::parse(blob)?;
        Ok(self.start(config).await?)
    }

    /// Start a new instance.
    ///
    /// Returns once the instance is registered and its task scheduled, not
    /// once it is connected. On error the registry is unchanged.
    ///
    /// # Errors
    ///
    /// - [`StartError::NameCollision`] if the name is already running
    /// - [`StartError::CapacityExhausted`] if `max_instances` is reached
    /// - [`StartError::Rejected`] if a bind port is claimed by another instance
    pub async fn start(&self, config: InstanceConfig) -> Result<InstanceName, StartError> {
        let name = config.instance_name.clone();
        let mut instances = self.instances.write().await;

        if instances.contains_key(&name) {
            tracing::warn!(instance = %name, "Duplicate instance start");
            return Err(StartError::NameCollision(name));
        }

        if self.config.max_instances > 0 && instances.len() >= self.config.max_instances {
            return Err(StartError::CapacityExhausted(self.config.max_instances));
        }

        let claims = config.bind_claims();
        for (other, instance) in instances.iter() {
            let taken = instance.config().bind_claims();
            if let Some((transport, port)) = claims.iter().find(|c| taken.contains(*c)) {
                let reason = format!("{transport} port {port} already bound by instance {other}");
                tracing::warn!(instance = %name, %reason, "Instance rejected");
                return Err(StartError::Rejected { name, reason });
            }
        }

        tracing::info!(
            instance = %name,
            instance_id = %config.instance_id,
            network = %config.network_identity.network_name,
            peers = config.peers.len(),
            "Starting instance"
        );
        let instance = NetworkInstance::spawn(config, self.config.heartbeat_interval);
        instances.insert(name.clone(), instance);

        tracing::info!(instance = %name, running = instances.len(), "Instance registered");
        Ok(name)
    }

    /// Register an already-built instance.
    #[cfg(test)]
    pub(crate) async fn adopt(&self, instance: NetworkInstance) {
        let name = instance.name().clone();
        self.instances.write().await.insert(name, instance);
    }

    /// Attach a tunnel handle to a running instance.
    ///
    /// Last call wins. Returns the previously bound handle, which is left
    /// open.
    pub async fn bind_tunnel(
        &self,
        name: &InstanceName,
        handle: TunnelHandle,
    ) -> Result<Option<TunnelHandle>, BindError> {
        let instances = self.instances.read().await;
        let instance = instances
            .get(name)
            .ok_or_else(|| BindError::NotFound(name.clone()))?;
        let previous = instance.bind_tunnel(handle);
        tracing::debug!(
            instance = %name,
            fd = handle.raw(),
            previous = ?previous.map(|h| h.raw()),
            "Tunnel handle bound"
        );
        Ok(previous)
    }

    /// Stop and remove every instance whose name is not in `names`.
    ///
    /// Names without a running instance are ignored; this never starts
    /// anything. All doomed instances are unlinked first, then stopped
    /// concurrently. A failed stop does not prevent the others.
    ///
    /// Returns the number of instances removed.
    pub async fn retain<I, S>(&self, names: I) -> Result<usize, RetainError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let desired: HashSet<String> = names
            .into_iter()
            .map(|s| s.as_ref().to_owned())
            .collect();

        let doomed = {
            let mut instances = self.instances.write().await;
            let (keep, doomed): (BTreeMap<_, _>, BTreeMap<_, _>) = std::mem::take(&mut *instances)
                .into_iter()
                .partition(|(name, _)| desired.contains(name.as_str()));
            *instances = keep;
            doomed
        };

        if doomed.is_empty() {
            tracing::debug!(retained = desired.len(), "Retention sweep: nothing to remove");
            return Ok(0);
        }

        let attempted = doomed.len();
        tracing::info!(
            removing = attempted,
            retained = desired.len(),
            "Retention sweep"
        );

        let timeout = self.config.stop_timeout;
        let results =
            futures::future::join_all(doomed.into_values().map(|i| i.stop(timeout))).await;
        let failures: Vec<StopError> = results.into_iter().filter_map(Result::err).collect();

        if failures.is_empty() {
            Ok(attempted)
        } else {
            let err = RetainError {
                attempted,
                failures,
            };
            tracing::error!(error = %err, "Retention sweep finished with failures");
            Err(err)
        }
    }

    /// Stop and remove a single instance.
    pub async fn stop(&self, name: &InstanceName) -> Result<(), StopError> {
        let instance = {
            let mut instances = self.instances.write().await;
            instances
                .remove(name)
                .ok_or_else(|| StopError::NotFound(name.clone()))?
        };
        instance.stop(self.config.stop_timeout).await
    }

    /// Stop every instance. Equivalent to retaining the empty set.
    pub async fn stop_all(&self) -> Result<usize, RetainError> {
        self.retain(std::iter::empty::<&str>()).await
    }

    /// Structured snapshot of every instance, in name order.
    pub async fn snapshot(&self) -> Vec<InstanceInfo> {
        let instances = self.instances.read().await;
        instances.values().map(InstanceInfo::capture).collect()
    }

    /// Flattened snapshot, at most `max_records` long.
    ///
    /// Never fails: no instances or a zero capacity yield an empty list.
    pub async fn collect(&self, max_records: usize) -> Vec<InfoRecord> {
        if max_records == 0 {
            return Vec::new();
        }
        let infos = self.snapshot().await;
        status::flatten_truncated(&infos, max_records)
    }

    /// List all instance names.
    pub async fn list(&self) -> Vec<InstanceName> {
        let instances = self.instances.read().await;
        instances.keys().cloned().collect()
    }

    /// Check if an instance exists.
    pub async fn exists(&self, name: &str) -> bool {
        let instances = self.instances.read().await;
        instances.contains_key(name)
    }

    /// Get the number of registered instances.
    pub async fn count(&self) -> usize {
        let instances = self.instances.read().await;
        instances.len()
    }
}
