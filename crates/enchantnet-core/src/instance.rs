//! NetworkInstance - one running virtual-network endpoint.

use crate::config::InstanceConfig;
use crate::error::{BindError, ConfigError, StopError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Caller-chosen unique name of an instance. Case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceName(String);

impl InstanceName {
    /// Validate and wrap a name. Only the empty string and names containing
    /// NUL are rejected; length and whitespace are the caller's business.
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("must not be empty")
        } else if name.contains('\0') {
            Some("contains NUL")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(ConfigError::InvalidName { name, reason }),
            None => Ok(Self(name)),
        }
    }

    /// Borrow the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for InstanceName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Borrow<str> for InstanceName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Raw tunnel descriptor owned by the host process.
///
/// This is a back-reference only: it has no `Drop` impl and nothing in this
/// crate ever closes or duplicates the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelHandle(i32);

impl TunnelHandle {
    /// Wrap a descriptor. Negative values are rejected.
    pub fn new(fd: i32) -> Result<Self, BindError> {
        if fd < 0 {
            return Err(BindError::InvalidHandle(fd));
        }
        Ok(Self(fd))
    }

    /// The raw descriptor value.
    pub fn raw(&self) -> i32 {
        self.0
    }
}

#[cfg(unix)]
impl std::os::fd::AsRawFd for TunnelHandle {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0
    }
}

/// Lifecycle state of an instance task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Accepted and scheduled, first heartbeat not yet emitted.
    Starting,
    /// Task is alive and heartbeating.
    Running,
    /// Shutdown requested.
    Stopping,
    /// Task has exited.
    Stopped,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Runtime state published by the instance task.
#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub state: InstanceState,
    pub heartbeats: u64,
    pub tunnel_binds: u64,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl Default for RuntimeStatus {
    fn default() -> Self {
        Self {
            state: InstanceState::Starting,
            heartbeats: 0,
            tunnel_binds: 0,
            last_heartbeat: None,
        }
    }
}

/// A running network instance.
///
/// The instance's ongoing work happens on its own tokio task. The registry
/// only talks to it through watch channels and a shutdown signal, so every
/// method here returns promptly.
pub struct NetworkInstance {
    config: Arc<InstanceConfig>,
    tunnel_tx: watch::Sender<Option<TunnelHandle>>,
    status_rx: watch::Receiver<RuntimeStatus>,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
    created_at: DateTime<Utc>,
}

impl NetworkInstance {
    /// Spawn the instance task. Must be called from within a tokio runtime.
    pub(crate) fn spawn(config: InstanceConfig, heartbeat: Duration) -> Self {
        let (tunnel_tx, tunnel_rx) = watch::channel(None);
        let (status_tx, status_rx) = watch::channel(RuntimeStatus::default());
        let shutdown = Arc::new(Notify::new());

        let name = config.instance_name.clone();
        let task = tokio::spawn(run_instance(
            name,
            tunnel_rx,
            status_tx,
            Arc::clone(&shutdown),
            heartbeat,
        ));

        Self {
            config: Arc::new(config),
            tunnel_tx,
            status_rx,
            shutdown,
            task,
            created_at: Utc::now(),
        }
    }

    /// Build an instance around an arbitrary task, for exercising stop paths.
    #[cfg(test)]
    pub(crate) fn with_task<F>(config: InstanceConfig, task: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let (tunnel_tx, _) = watch::channel(None);
        let (_, status_rx) = watch::channel(RuntimeStatus {
            state: InstanceState::Running,
            ..Default::default()
        });
        Self {
            config: Arc::new(config),
            tunnel_tx,
            status_rx,
            shutdown: Arc::new(Notify::new()),
            task: tokio::spawn(task),
            created_at: Utc::now(),
        }
    }

    /// Get the instance name.
    pub fn name(&self) -> &InstanceName {
        &self.config.instance_name
    }

    /// Get the configuration the instance was started with.
    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    /// Get the creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Latest runtime status published by the task.
    pub fn status(&self) -> RuntimeStatus {
        self.status_rx.borrow().clone()
    }

    /// Currently bound tunnel handle, if any.
    pub fn tunnel(&self) -> Option<TunnelHandle> {
        *self.tunnel_tx.borrow()
    }

    /// True while the task is alive and has not been asked to stop.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
            && matches!(
                self.status_rx.borrow().state,
                InstanceState::Starting | InstanceState::Running
            )
    }

    /// True if the task exited without being asked to.
    pub fn exited_unexpectedly(&self) -> bool {
        self.task.is_finished() && self.status_rx.borrow().state != InstanceState::Stopped
    }

    /// Attach a tunnel handle, replacing any previous one.
    ///
    /// Returns the handle that was replaced. The old descriptor is left
    /// untouched; closing it is the host's job.
    pub(crate) fn bind_tunnel(&self, handle: TunnelHandle) -> Option<TunnelHandle> {
        if self.config.flags.no_tun {
            tracing::warn!(
                instance = %self.name(),
                fd = handle.raw(),
                "Binding tunnel to an instance configured with no_tun"
            );
        }
        self.tunnel_tx.send_replace(Some(handle))
    }

    /// Ask the task to wind down and wait up to `timeout` for it.
    ///
    /// A task that overruns the timeout is aborted.
    pub(crate) async fn stop(self, timeout: Duration) -> Result<(), StopError> {
        let start = std::time::Instant::now();
        let name = self.config.instance_name.clone();
        tracing::info!(instance = %name, "Stopping instance");
        self.shutdown.notify_one();

        let mut task = self.task;
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => {
                tracing::info!(
                    instance = %name,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Instance stopped"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                let message = if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    e.to_string()
                };
                tracing::error!(instance = %name, error = %message, "Instance task failed");
                Err(StopError::Panicked { name, message })
            }
            Err(_) => {
                tracing::warn!(instance = %name, ?timeout, "Instance stop timed out, aborting");
                task.abort();
                Err(StopError::Timeout { name, timeout })
            }
        }
    }
}

impl fmt::Debug for NetworkInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkInstance")
            .field("name", self.name())
            .field("tunnel", &self.tunnel())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Instance task: heartbeat, follow tunnel rebinds, exit on shutdown.
async fn run_instance(
    name: InstanceName,
    mut tunnel_rx: watch::Receiver<Option<TunnelHandle>>,
    status_tx: watch::Sender<RuntimeStatus>,
    shutdown: Arc<Notify>,
    heartbeat: Duration,
) {
    tracing::debug!(instance = %name, "Instance task started");
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.notified() => {
                status_tx.send_modify(|s| s.state = InstanceState::Stopping);
                break;
            }

            changed = tunnel_rx.changed() => {
                if changed.is_err() {
                    tracing::debug!(instance = %name, "Tunnel channel closed");
                    break;
                }
                let handle = *tunnel_rx.borrow_and_update();
                if let Some(handle) = handle {
                    tracing::info!(instance = %name, fd = handle.raw(), "Tunnel bound");
                }
                status_tx.send_modify(|s| s.tunnel_binds += 1);
            }

            _ = ticker.tick() => {
                status_tx.send_modify(|s| {
                    s.state = InstanceState::Running;
                    s.heartbeats += 1;
                    s.last_heartbeat = Some(Utc::now());
                });
                tracing::trace!(instance = %name, "Heartbeat");
            }
        }
    }

    status_tx.send_modify(|s| s.state = InstanceState::Stopped);
    tracing::debug!(instance = %name, "Instance task exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse;

    fn config(name: &str) -> InstanceConfig {
        parse(&format!(
            "instance_name = \"{name}\"\n[network_identity]\nnetwork_name = \"net\"\n"
        ))
        .unwrap()
    }

    #[test]
    fn test_instance_name_rules() {
        assert!(InstanceName::new("n1").is_ok());
        assert!(InstanceName::new("").is_err());
        assert!(InstanceName::new("a\0b").is_err());
        assert!(InstanceName::new("   ").is_ok());
        assert_ne!(InstanceName::new("N1").unwrap(), InstanceName::new("n1").unwrap());
    }

    #[test]
    fn test_long_instance_name_is_accepted() {
        let long = format!("EnchantNet-Host-{}", "s".repeat(200));
        let name = InstanceName::new(long.clone()).unwrap();
        assert_eq!(name.as_str(), long);
        assert_eq!(InstanceName::new("x".repeat(65)).unwrap().as_str().len(), 65);
    }

    #[test]
    fn test_tunnel_handle_rejects_negative() {
        assert!(matches!(
            TunnelHandle::new(-1),
            Err(BindError::InvalidHandle(-1))
        ));
        assert_eq!(TunnelHandle::new(7).unwrap().raw(), 7);
    }

    #[test]
    fn test_instance_state_display() {
        assert_eq!(InstanceState::Starting.to_string(), "starting");
        assert_eq!(InstanceState::Running.to_string(), "running");
        assert_eq!(InstanceState::Stopped.to_string(), "stopped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_instance_heartbeats_then_stops() {
        let instance = NetworkInstance::spawn(config("n1"), Duration::from_millis(100));
        assert!(instance.is_running());

        tokio::time::sleep(Duration::from_millis(350)).await;
        let status = instance.status();
        assert_eq!(status.state, InstanceState::Running);
        assert!(status.heartbeats >= 3);

        instance.stop(Duration::from_secs(1)).await.expect("clean stop");
    }

    #[tokio::test]
    async fn test_rebind_replaces_without_side_effects() {
        let instance = NetworkInstance::spawn(config("n1"), Duration::from_secs(1));
        let first = TunnelHandle::new(10).unwrap();
        let second = TunnelHandle::new(11).unwrap();

        assert_eq!(instance.bind_tunnel(first), None);
        assert_eq!(instance.bind_tunnel(second), Some(first));
        assert_eq!(instance.tunnel(), Some(second));

        instance.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_times_out_on_wedged_task() {
        let instance = NetworkInstance::with_task(config("stuck"), std::future::pending());
        let result = instance.stop(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(StopError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_stop_reports_panicked_task() {
        let instance = NetworkInstance::with_task(config("boom"), async { panic!("kaboom") });
        tokio::task::yield_now().await;
        let result = instance.stop(Duration::from_secs(1)).await;
        match result {
            Err(StopError::Panicked { message, .. }) => assert_eq!(message, "kaboom"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
