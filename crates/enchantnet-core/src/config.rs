//! Instance configuration: TOML grammar, parsing and validation.
//!
//! [`parse`] is pure. It never touches the registry, it only turns a text
//! blob into a self-consistent [`InstanceConfig`] or explains why it can't.

use crate::error::ConfigError;
use crate::instance::InstanceName;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use url::Url;
use uuid::Uuid;

/// Default prefix length applied to `ipv4` when none is given.
pub const DEFAULT_IPV4_PREFIX: u8 = 24;

/// Allowed MTU range for the tunnel device.
pub const MTU_RANGE: std::ops::RangeInclusive<u16> = 576..=9000;

/// Parse and validate a configuration blob.
pub fn parse(blob: &str) -> Result<InstanceConfig, ConfigError> {
    InstanceConfig::from_toml(blob)
}

// ============================================================================
// Typed configuration
// ============================================================================

/// Transport scheme of a listener or peer URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Tcp,
    Udp,
    Wg,
    Ws,
    Wss,
    Quic,
}

impl Scheme {
    /// The socket protocol a listener of this scheme binds.
    pub fn transport(&self) -> Transport {
        match self {
            Self::Tcp | Self::Ws | Self::Wss => Transport::Tcp,
            Self::Udp | Self::Wg | Self::Quic => Transport::Udp,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Wg => "wg",
            Self::Ws => "ws",
            Self::Wss => "wss",
            Self::Quic => "quic",
        }
    }
}

impl FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "wg" => Ok(Self::Wg),
            "ws" => Ok(Self::Ws),
            "wss" => Ok(Self::Wss),
            "quic" => Ok(Self::Quic),
            other => Err(format!("unsupported scheme `{other}`")),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Socket protocol, used to detect bind conflicts between instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// A local address the instance accepts peer connections on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub scheme: Scheme,
    pub addr: SocketAddr,
}

impl fmt::Display for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.addr)
    }
}

/// A remote peer the instance dials. The host may be a DNS name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEndpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}

/// Virtual IPv4 address with prefix length, e.g. `10.144.144.1/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Inet {
    pub addr: Ipv4Addr,
    pub prefix_len: u8,
}

impl FromStr for Ipv4Inet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix_len) = match s.split_once('/') {
            Some((addr, len)) => {
                let len: u8 = len
                    .parse()
                    .map_err(|_| format!("bad prefix length `{len}`"))?;
                (addr, len)
            }
            None => (s, DEFAULT_IPV4_PREFIX),
        };
        if prefix_len > 32 {
            return Err(format!("prefix length {prefix_len} exceeds 32"));
        }
        let addr = addr.parse::<Ipv4Addr>().map_err(|e| e.to_string())?;
        Ok(Self { addr, prefix_len })
    }
}

impl fmt::Display for Ipv4Inet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

/// Which virtual network the instance joins.
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkIdentity {
    pub network_name: String,
    pub network_secret: Option<String>,
}

impl fmt::Debug for NetworkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkIdentity")
            .field("network_name", &self.network_name)
            .field(
                "network_secret",
                &self.network_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Feature flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Flags {
    pub latency_first: bool,
    pub enable_kcp_proxy: bool,
    /// Run without a tunnel device (no handle will ever be bound).
    pub no_tun: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_name: Option<String>,
}

/// Protocol of a port forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardProto {
    Tcp,
    Udp,
}

impl From<ForwardProto> for Transport {
    fn from(proto: ForwardProto) -> Self {
        match proto {
            ForwardProto::Tcp => Transport::Tcp,
            ForwardProto::Udp => Transport::Udp,
        }
    }
}

/// Forward a local socket to an address inside the virtual network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortForward {
    pub proto: ForwardProto,
    pub bind_addr: SocketAddr,
    pub dst_addr: SocketAddr,
}

/// Validated configuration of one network instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceConfig {
    pub instance_name: InstanceName,
    pub instance_id: Uuid,
    pub hostname: Option<String>,
    pub ipv4: Option<Ipv4Inet>,
    pub dhcp: bool,
    pub listeners: Vec<Listener>,
    pub rpc_portal: Option<SocketAddr>,
    pub network_identity: NetworkIdentity,
    pub flags: Flags,
    pub peers: Vec<PeerEndpoint>,
    pub port_forwards: Vec<PortForward>,
}

impl InstanceConfig {
    /// Parse and validate a TOML blob.
    pub fn from_toml(blob: &str) -> Result<Self, ConfigError> {
        if blob.trim().is_empty() {
            return Err(ConfigError::Empty);
        }
        let raw: RawConfig = toml::from_str(blob)?;
        let config = Self::try_from(raw)?;
        config.validate()?;
        tracing::debug!(
            instance = %config.instance_name,
            network = %config.network_identity.network_name,
            listeners = config.listeners.len(),
            peers = config.peers.len(),
            "Configuration parsed"
        );
        Ok(config)
    }

    /// Render back into the TOML grammar accepted by [`InstanceConfig::from_toml`].
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(&RawConfig::from(self))?)
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network_identity.network_name.trim().is_empty() {
            return Err(ConfigError::MissingField("network_identity.network_name"));
        }
        if let Some(mtu) = self.flags.mtu {
            if !MTU_RANGE.contains(&mtu) {
                return Err(ConfigError::InvalidValue {
                    field: "flags.mtu",
                    reason: format!(
                        "{mtu} outside {}..={}",
                        MTU_RANGE.start(),
                        MTU_RANGE.end()
                    ),
                });
            }
        }
        for (i, listener) in self.listeners.iter().enumerate() {
            if self.listeners[..i].contains(listener) {
                return Err(ConfigError::DuplicateListener(listener.to_string()));
            }
        }
        Ok(())
    }

    /// Local `(transport, port)` pairs this instance will bind.
    ///
    /// Ephemeral ports (0) are never reported.
    pub fn bind_claims(&self) -> Vec<(Transport, u16)> {
        let listeners = self
            .listeners
            .iter()
            .map(|l| (l.scheme.transport(), l.addr.port()));
        let forwards = self
            .port_forwards
            .iter()
            .map(|pf| (pf.proto.into(), pf.bind_addr.port()));
        let mut claims: Vec<_> = listeners
            .chain(forwards)
            .filter(|(_, port)| *port != 0)
            .collect();
        claims.sort_unstable();
        claims.dedup();
        claims
    }
}

// ============================================================================
// Raw (serde) representation
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    instance_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ipv4: Option<String>,
    #[serde(default)]
    dhcp: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    listeners: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rpc_portal: Option<String>,
    network_identity: Option<RawNetworkIdentity>,
    #[serde(default)]
    flags: Flags,
    #[serde(default, rename = "peer", skip_serializing_if = "Vec::is_empty")]
    peers: Vec<RawPeer>,
    #[serde(default, rename = "port_forward", skip_serializing_if = "Vec::is_empty")]
    port_forwards: Vec<PortForward>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawNetworkIdentity {
    network_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    network_secret: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPeer {
    uri: String,
}

impl TryFrom<RawConfig> for InstanceConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let instance_name = match raw.instance_name {
            Some(name) => InstanceName::new(name)?,
            None => return Err(ConfigError::MissingField("instance_name")),
        };

        let instance_id = match raw.instance_id {
            Some(id) => Uuid::parse_str(&id).map_err(|e| ConfigError::InvalidValue {
                field: "instance_id",
                reason: e.to_string(),
            })?,
            None => Uuid::new_v4(),
        };

        let ipv4 = raw
            .ipv4
            .map(|v| {
                v.parse::<Ipv4Inet>()
                    .map_err(|reason| ConfigError::InvalidAddress {
                        field: "ipv4",
                        value: v.clone(),
                        reason,
                    })
            })
            .transpose()?;

        let listeners = raw
            .listeners
            .iter()
            .map(|uri| parse_listener(uri))
            .collect::<Result<Vec<_>, _>>()?;

        let rpc_portal = raw
            .rpc_portal
            .map(|v| parse_socket_addr("rpc_portal", &v))
            .transpose()?;

        let identity = raw
            .network_identity
            .ok_or(ConfigError::MissingField("network_identity"))?;
        let network_name = identity
            .network_name
            .filter(|n| !n.trim().is_empty())
            .ok_or(ConfigError::MissingField("network_identity.network_name"))?;

        let peers = raw
            .peers
            .iter()
            .map(|peer| parse_peer(&peer.uri))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            instance_name,
            instance_id,
            hostname: raw.hostname.filter(|h| !h.is_empty()),
            ipv4,
            dhcp: raw.dhcp,
            listeners,
            rpc_portal,
            network_identity: NetworkIdentity {
                network_name,
                network_secret: identity.network_secret,
            },
            flags: raw.flags,
            peers,
            port_forwards: raw.port_forwards,
        })
    }
}

impl From<&InstanceConfig> for RawConfig {
    fn from(config: &InstanceConfig) -> Self {
        Self {
            instance_name: Some(config.instance_name.to_string()),
            instance_id: Some(config.instance_id.to_string()),
            hostname: config.hostname.clone(),
            ipv4: config.ipv4.map(|ip| ip.to_string()),
            dhcp: config.dhcp,
            listeners: config.listeners.iter().map(ToString::to_string).collect(),
            rpc_portal: config.rpc_portal.map(|addr| addr.to_string()),
            network_identity: Some(RawNetworkIdentity {
                network_name: Some(config.network_identity.network_name.clone()),
                network_secret: config.network_identity.network_secret.clone(),
            }),
            flags: config.flags.clone(),
            peers: config
                .peers
                .iter()
                .map(|p| RawPeer { uri: p.to_string() })
                .collect(),
            port_forwards: config.port_forwards.clone(),
        }
    }
}

fn parse_socket_addr(field: &'static str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|e: std::net::AddrParseError| ConfigError::InvalidAddress {
            field,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Split a `scheme://host:port` URI into its parts.
fn split_uri(field: &'static str, value: &str) -> Result<(Scheme, String, u16), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUri {
        field,
        value: value.to_string(),
        reason,
    };

    let url = Url::parse(value).map_err(|e| invalid(e.to_string()))?;
    let scheme: Scheme = url.scheme().parse().map_err(invalid)?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("missing host".into()))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| invalid("missing port".into()))?;
    if !matches!(url.path(), "" | "/") {
        return Err(invalid("unexpected path".into()));
    }
    Ok((scheme, host, port))
}

pub(crate) fn parse_listener(value: &str) -> Result<Listener, ConfigError> {
    let (scheme, host, port) = split_uri("listeners", value)?;
    let ip: IpAddr = host.parse().map_err(|_| ConfigError::InvalidUri {
        field: "listeners",
        value: value.to_string(),
        reason: "listener host must be an IP address".into(),
    })?;
    Ok(Listener {
        scheme,
        addr: SocketAddr::new(ip, port),
    })
}

pub(crate) fn parse_peer(value: &str) -> Result<PeerEndpoint, ConfigError> {
    let (scheme, host, port) = split_uri("peer.uri", value)?;
    Ok(PeerEndpoint { scheme, host, port })
}
