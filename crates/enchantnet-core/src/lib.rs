//! # enchantnet-core
//!
//! Network instance manager for EnchantNet virtual networks.
//!
//! This crate owns everything that happens between a host handing over a
//! configuration blob and a virtual-network instance running under a name:
//! parsing, registration, tunnel binding, teardown and status snapshots.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  enchantnet-core                         │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  config::parse ──▶ InstanceConfig                        │
//! │                         │                                │
//! │                         ▼                                │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │ InstanceManager │────▶│ BTreeMap<InstanceName,   │   │
//! │  │   - start()     │     │          NetworkInstance>│   │
//! │  │   - bind_tunnel │     └──────────────────────────┘   │
//! │  │   - retain()    │                │                   │
//! │  │   - collect()   │                ▼                   │
//! │  └─────────────────┘     ┌──────────────────────────┐   │
//! │                          │ instance task (tokio)    │   │
//! │                          │  heartbeat, tunnel watch │   │
//! │                          └──────────────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use enchantnet_core::{InstanceManager, ManagerConfig, TunnelHandle};
//!
//! # async fn example(cfg: &str) -> enchantnet_core::Result<()> {
//! let manager = InstanceManager::new(ManagerConfig::default());
//!
//! let name = manager.run(cfg).await?;
//! manager.bind_tunnel(&name, TunnelHandle::new(42)?).await?;
//!
//! for record in manager.collect(64).await {
//!     println!("{} = {}", record.key, record.value);
//! }
//!
//! // Tear down everything that is not in the desired set.
//! manager.retain(Vec::<String>::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod error;
mod instance;
pub mod invite;
mod manager;
pub mod probe;
mod profile;
mod status;

pub use config::{parse, InstanceConfig};
pub use error::{
    BindError, ConfigError, CoreError, InviteError, Result, RetainError, StartError, StopError,
};
pub use instance::{InstanceName, InstanceState, NetworkInstance, RuntimeStatus, TunnelHandle};
pub use invite::Room;
pub use manager::{InstanceManager, ManagerConfig, ManagerConfigBuilder};
pub use profile::{GuestOptions, Profile, RoomKind, DEFAULT_PORT, DEFAULT_RELAY_PEERS};
pub use status::{InfoRecord, InstanceInfo, Liveness, NodeInfo};
