//! Command-line argument definitions.

use clap::{Parser, Subcommand, ValueEnum};
use enchantnet_core::RoomKind;
use std::path::PathBuf;

/// EnchantNet virtual-network runner.
#[derive(Debug, Parser)]
#[command(
    name = "enchantnet",
    version,
    about = "Run an EnchantNet virtual-network instance"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start one instance from a TOML configuration file.
    Run {
        /// Path to the configuration file.
        path: PathBuf,
    },

    /// Host a room for a local game port and print its invite code.
    Host {
        /// Game port guests are forwarded to.
        #[arg(value_parser = clap::value_parser!(u16).range(1..))]
        port: u16,
    },

    /// Join a room from an invite code.
    Guest {
        /// Terracotta or PCL2CE invite code.
        invite: String,

        /// Local TCP port the game connects to. Picked by the OS when absent.
        #[arg(long, short, value_parser = clap::value_parser!(u16).range(1..))]
        local_port: Option<u16>,

        /// Override the room kind decoded from the invite.
        #[arg(long, value_enum)]
        room_kind: Option<RoomKindArg>,

        /// Only forward on the IPv6 wildcard address.
        #[arg(long)]
        no_ipv4_forward: bool,
    },

    /// Check whether a local port answers the ping byte, then exit.
    Probe {
        #[arg(value_parser = clap::value_parser!(u16).range(1..))]
        port: u16,
    },
}

/// Room kind as spelled on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoomKindArg {
    Terracotta,
    Pcl2ce,
}

impl From<RoomKindArg> for RoomKind {
    fn from(kind: RoomKindArg) -> Self {
        match kind {
            RoomKindArg::Terracotta => RoomKind::Terracotta,
            RoomKindArg::Pcl2ce => RoomKind::Pcl2ce,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Result<Command, clap::Error> {
        Cli::try_parse_from(std::iter::once("enchantnet").chain(args.iter().copied()))
            .map(|cli| cli.command)
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_port_and_path_subcommands() {
        assert!(matches!(
            parse(&["run", "room.toml"]).unwrap(),
            Command::Run { path } if path == PathBuf::from("room.toml")
        ));
        assert!(matches!(
            parse(&["host", "25565"]).unwrap(),
            Command::Host { port: 25565 }
        ));
        assert!(matches!(
            parse(&["probe", "35781"]).unwrap(),
            Command::Probe { port: 35781 }
        ));
    }

    #[test]
    fn test_parse_guest() {
        match parse(&["guest", "X3N00-00000-00000-00000-0000N"]).unwrap() {
            Command::Guest {
                invite,
                local_port,
                room_kind,
                no_ipv4_forward,
            } => {
                assert_eq!(invite, "X3N00-00000-00000-00000-0000N");
                assert_eq!(local_port, None);
                assert_eq!(room_kind, None);
                assert!(!no_ipv4_forward);
            }
            other => panic!("unexpected command {other:?}"),
        }

        match parse(&["guest", "abc", "--local-port", "40000", "--room-kind", "pcl2ce"]).unwrap() {
            Command::Guest {
                local_port,
                room_kind,
                ..
            } => {
                assert_eq!(local_port, Some(40000));
                assert_eq!(room_kind.map(RoomKind::from), Some(RoomKind::Pcl2ce));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        let kind = |args: &[&str]| parse(args).unwrap_err().kind();

        assert_eq!(kind(&[]), ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand);
        assert_eq!(kind(&["probe", "0"]), ErrorKind::ValueValidation);
        assert_eq!(kind(&["probe", "70000"]), ErrorKind::ValueValidation);
        assert_eq!(kind(&["host", "http"]), ErrorKind::ValueValidation);
        assert_eq!(
            kind(&["guest", "abc", "--room-kind", "lan"]),
            ErrorKind::InvalidValue
        );
        assert_eq!(kind(&["host"]), ErrorKind::MissingRequiredArgument);
    }
}
