//! Ready-made host and guest configurations.
//!
//! A host publishes a room at a fixed virtual address; a guest joins it and
//! forwards a local port to the host's game port.

use crate::config::{
    parse_listener, parse_peer, Flags, ForwardProto, InstanceConfig, Ipv4Inet, NetworkIdentity,
    PortForward, DEFAULT_IPV4_PREFIX,
};
use crate::error::ConfigError;
use crate::instance::InstanceName;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use uuid::Uuid;

/// Port every profile listens on.
pub const DEFAULT_PORT: u16 = 11010;

/// Public relay peers every profile dials.
pub const DEFAULT_RELAY_PEERS: &[&str] = &[
    "tcp://public.easytier.top:11010",
    "tcp://ah.nkbpal.cn:11010",
    "tcp://turn.hb.629957.xyz:11010",
    "tcp://turn.js.629957.xyz:11012",
    "tcp://sh.993555.xyz:11010",
    "tcp://turn.bj.629957.xyz:11010",
    "tcp://et.sh.suhoan.cn:11010",
    "tcp://et-hk.clickor.click:11010",
    "tcp://et.01130328.xyz:11010",
    "tcp://et.gbc.moe:11011",
];

/// Extra relay dialled first by PCL2CE guests.
pub const PCL2CE_EXTRA_PEER: &str = "tcp://43.139.42.188:11010";

/// Room flavour, which decides the host's virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomKind {
    Terracotta,
    Pcl2ce,
}

impl RoomKind {
    /// Virtual address of the room host.
    pub fn host_ip(&self) -> Ipv4Addr {
        match self {
            Self::Terracotta => Ipv4Addr::new(10, 144, 144, 1),
            Self::Pcl2ce => Ipv4Addr::new(10, 114, 51, 41),
        }
    }
}

/// Parameters for a guest profile.
#[derive(Debug, Clone)]
pub struct GuestOptions {
    pub instance_name: String,
    pub network_name: String,
    pub network_secret: String,
    /// Local TCP port the game connects to.
    pub local_port: u16,
    /// Port on the host the traffic is forwarded to.
    pub remote_port: u16,
    pub room_kind: RoomKind,
    /// Guest virtual address (a /24 is assumed).
    pub ipv4: Ipv4Addr,
    /// Also bind the forward on `0.0.0.0` (only when the device has IPv4).
    pub ipv4_forward: bool,
}

/// Profile constructors.
pub struct Profile;

impl Profile {
    /// Host profile: fixed address `10.144.144.1`, listening on the default
    /// port over tcp, udp and wg.
    pub fn host(
        instance_name: &str,
        network_name: &str,
        network_secret: &str,
    ) -> Result<InstanceConfig, ConfigError> {
        let ipv4 = Ipv4Inet {
            addr: RoomKind::Terracotta.host_ip(),
            prefix_len: DEFAULT_IPV4_PREFIX,
        };
        build(
            instance_name,
            network_name,
            network_secret,
            ipv4,
            Vec::new(),
            Vec::new(),
        )
    }

    /// Guest profile: forwards `local_port` to the room host.
    pub fn guest(opts: &GuestOptions) -> Result<InstanceConfig, ConfigError> {
        let dst_addr = SocketAddr::new(IpAddr::V4(opts.room_kind.host_ip()), opts.remote_port);
        let mut forwards = vec![PortForward {
            proto: ForwardProto::Tcp,
            bind_addr: SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), opts.local_port),
            dst_addr,
        }];
        if opts.ipv4_forward {
            forwards.push(PortForward {
                proto: ForwardProto::Tcp,
                bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), opts.local_port),
                dst_addr,
            });
        }

        let extra_peers = match opts.room_kind {
            RoomKind::Pcl2ce => vec![PCL2CE_EXTRA_PEER],
            RoomKind::Terracotta => Vec::new(),
        };

        build(
            &opts.instance_name,
            &opts.network_name,
            &opts.network_secret,
            Ipv4Inet {
                addr: opts.ipv4,
                prefix_len: DEFAULT_IPV4_PREFIX,
            },
            extra_peers,
            forwards,
        )
    }
}

fn build(
    instance_name: &str,
    network_name: &str,
    network_secret: &str,
    ipv4: Ipv4Inet,
    extra_peers: Vec<&str>,
    port_forwards: Vec<PortForward>,
) -> Result<InstanceConfig, ConfigError> {
    let listeners = ["tcp", "udp", "wg"]
        .iter()
        .map(|scheme| parse_listener(&format!("{scheme}://0.0.0.0:{DEFAULT_PORT}")))
        .collect::<Result<Vec<_>, _>>()?;

    let peers = extra_peers
        .into_iter()
        .chain(DEFAULT_RELAY_PEERS.iter().copied())
        .map(parse_peer)
        .collect::<Result<Vec<_>, _>>()?;

    let config = InstanceConfig {
        instance_name: InstanceName::new(instance_name)?,
        instance_id: Uuid::new_v4(),
        hostname: None,
        ipv4: Some(ipv4),
        dhcp: false,
        listeners,
        rpc_portal: Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)),
        network_identity: NetworkIdentity {
            network_name: network_name.to_string(),
            network_secret: Some(network_secret.to_string()),
        },
        flags: Flags {
            latency_first: true,
            enable_kcp_proxy: true,
            ..Default::default()
        },
        peers,
        port_forwards,
    };
    config.validate()?;
    Ok(config)
}
