//! EnchantNet command-line runner.
//!
//! Starts one network instance (from a TOML file, a hosted room or an
//! invite code), logs its status on an interval and tears everything down on
//! Ctrl-C.

mod cli;
mod config;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Command};
use config::CliConfig;
use enchantnet_core::{invite, probe, InstanceManager, InstanceName, Liveness, Profile, RoomKind};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Local forward port used when the OS cannot hand out a free one.
const FALLBACK_LOCAL_PORT: u16 = 35781;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let command = Cli::parse().command;
    let config = CliConfig::from_env();

    // Logs go to stderr; stdout carries command output.
    let filter = EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Command::Probe { port } = command {
        let reachable = probe::check_port(port, PROBE_TIMEOUT).await;
        println!("{port}: {}", if reachable { "reachable" } else { "unreachable" });
        return Ok(());
    }

    tracing::info!(?config, "Configuration loaded");
    config.manager.validate()?;
    let manager = InstanceManager::new(config.manager.clone());

    let name = start(&manager, command).await?;
    tracing::info!(instance = %name, "Instance running");

    let mut ticker = tokio::time::interval(config.status_interval);
    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                tracing::info!("Received shutdown signal, cleaning up...");
                break;
            }
            _ = ticker.tick() => report(&manager).await,
        }
    }

    match manager.stop_all().await {
        Ok(stopped) => tracing::info!(stopped, "All instances stopped"),
        Err(e) => tracing::error!(error = %e, "Error during instance cleanup"),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn start(manager: &InstanceManager, command: Command) -> anyhow::Result<InstanceName> {
    let name = match command {
        Command::Run { path } => {
            let blob = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            manager.run(&blob).await?
        }
        Command::Host { port } => {
            let code = invite::generate(port);
            let room = invite::parse(&code)?;
            let profile = Profile::host(
                &room.host_instance_name(),
                &room.network_name,
                &room.network_secret,
            )?;
            let name = manager.start(profile).await?;
            println!("{code}");
            tracing::info!(port, network = %room.network_name, "Room hosted");
            name
        }
        Command::Guest {
            invite,
            local_port,
            room_kind,
            no_ipv4_forward,
        } => {
            let mut room = invite::parse(&invite)?;
            if let Some(kind) = room_kind {
                room.kind = kind.into();
            }
            let local_port = match local_port {
                Some(port) => port,
                None => free_local_port().await,
            };
            let opts = room.guest_options(local_port, guest_address(room.kind), !no_ipv4_forward)?;
            tracing::info!(
                network = %room.network_name,
                remote_port = room.port,
                local_port,
                ipv4 = %opts.ipv4,
                "Joining room"
            );
            manager.start(Profile::guest(&opts)?).await?
        }
        Command::Probe { .. } => anyhow::bail!("probe does not start an instance"),
    };
    Ok(name)
}

/// Pick a guest address in the room's /24, never the host's own address.
fn guest_address(kind: RoomKind) -> Ipv4Addr {
    let [a, b, c, host_octet] = kind.host_ip().octets();
    let mut host = rand::random_range(2..=254u8);
    if host == host_octet {
        host += 1;
    }
    Ipv4Addr::new(a, b, c, host)
}

async fn free_local_port() -> u16 {
    match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
        Ok(socket) => socket
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(FALLBACK_LOCAL_PORT),
        Err(e) => {
            tracing::warn!(error = %e, "No free local port, using fallback");
            FALLBACK_LOCAL_PORT
        }
    }
}

async fn report(manager: &InstanceManager) {
    let records = manager.collect(usize::MAX).await;
    for record in &records {
        tracing::debug!(key = %record.key, value = %record.value, "Status");
    }
    let alive = Liveness::evaluate(&records);
    if alive {
        tracing::info!(instances = manager.count().await, "Network alive");
    } else {
        tracing::warn!(records = records.len(), "Network not alive");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_address_stays_in_room_subnet() {
        for kind in [RoomKind::Terracotta, RoomKind::Pcl2ce] {
            let host_ip = kind.host_ip();
            for _ in 0..2000 {
                let addr = guest_address(kind);
                assert_eq!(&addr.octets()[..3], &host_ip.octets()[..3]);
                assert!((2..=254).contains(&addr.octets()[3]));
                assert_ne!(addr, host_ip);
            }
        }
    }

    #[tokio::test]
    async fn test_free_local_port_is_nonzero() {
        assert_ne!(free_local_port().await, 0);
    }
}
