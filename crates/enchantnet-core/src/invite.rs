//! Invite codes.
//!
//! Two formats are understood. Terracotta codes are generated here and read
//! as `XXXXX-XXXXX-XXXXX-XXXXX-XXXXX` in a base-34 alphabet with a trailing
//! checksum digit. PCL2CE codes are short base-32 strings whose decimal value
//! embeds the lobby id and game port.

use crate::error::InviteError;
use crate::profile::{GuestOptions, RoomKind};
use rand::Rng;
use std::fmt;
use std::net::Ipv4Addr;

const BASE34: &[u8; 34] = b"0123456789ABCDEFGHJKLMNPQRSTUVWXYZ";
const PCL2CE_ALPHABET: &[u8; 32] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

const TERRACOTTA_DIGITS: usize = 25;
const TERRACOTTA_NAME_PREFIX: &str = "terracotta-mc-";

const PCL2CE_MAX_CHARS: usize = 10;
const PCL2CE_LIMIT: u64 = 999_999_999_965_536;
const PCL2CE_NAME_PREFIX: &str = "PCLCELobby";
const PCL2CE_SECRET_PREFIX: &str = "PCLCEETLOBBY2025";

/// A room decoded from an invite code.
#[derive(Clone, PartialEq, Eq)]
pub struct Room {
    pub kind: RoomKind,
    pub network_name: String,
    pub network_secret: String,
    /// Game port on the host.
    pub port: u16,
    /// Always 0 for PCL2CE rooms.
    pub room_id: u64,
}

impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("kind", &self.kind)
            .field("network_name", &self.network_name)
            .field("network_secret", &"<redacted>")
            .field("port", &self.port)
            .field("room_id", &self.room_id)
            .finish()
    }
}

impl Room {
    /// Instance name used when hosting this room.
    pub fn host_instance_name(&self) -> String {
        format!("EnchantNet-Host-{}", self.network_secret)
    }

    /// Instance name used when joining this room.
    pub fn guest_instance_name(&self) -> String {
        format!("EnchantNet-Guest-{}", self.network_secret)
    }

    /// Guest options that forward `local_port` to the room's game port.
    pub fn guest_options(
        &self,
        local_port: u16,
        ipv4: Ipv4Addr,
        ipv4_forward: bool,
    ) -> Result<GuestOptions, InviteError> {
        if self.port == 0 {
            return Err(InviteError::NoPort);
        }
        Ok(GuestOptions {
            instance_name: self.guest_instance_name(),
            network_name: self.network_name.clone(),
            network_secret: self.network_secret.clone(),
            local_port,
            remote_port: self.port,
            room_kind: self.kind,
            ipv4,
            ipv4_forward,
        })
    }
}

/// Generate a Terracotta invite code for a game port.
pub fn generate(port: u16) -> String {
    let mut bytes = [0u8; 15];
    rand::rng().fill(&mut bytes[..13]);
    bytes[13..].copy_from_slice(&port.to_be_bytes());
    encode_terracotta(bytes)
}

/// Decode an invite code in either format.
pub fn parse(code: &str) -> Result<Room, InviteError> {
    parse_terracotta(code)
        .or_else(|| parse_pcl2ce(code))
        .ok_or(InviteError::Unrecognized)
}

fn encode_terracotta(bytes: [u8; 15]) -> String {
    let mut wide = [0u8; 16];
    wide[1..].copy_from_slice(&bytes);
    let mut value = u128::from_be_bytes(wide);

    let mut digits = [0u8; TERRACOTTA_DIGITS];
    for digit in digits.iter_mut().take(TERRACOTTA_DIGITS - 1) {
        *digit = (value % 34) as u8;
        value /= 34;
    }
    digits[TERRACOTTA_DIGITS - 1] = checksum(&digits[..TERRACOTTA_DIGITS - 1]);

    let mut code = String::with_capacity(TERRACOTTA_DIGITS + 4);
    for (i, digit) in digits.iter().enumerate() {
        if i > 0 && i % 5 == 0 {
            code.push('-');
        }
        code.push(char::from(BASE34[usize::from(*digit)]));
    }
    code
}

fn checksum(digits: &[u8]) -> u8 {
    (digits.iter().map(|d| u32::from(*d)).sum::<u32>() % 34) as u8
}

fn base34_digit(c: char) -> Option<u8> {
    let c = match c.to_ascii_uppercase() {
        'I' => '1',
        'O' => '0',
        c => c,
    };
    BASE34
        .iter()
        .position(|b| char::from(*b) == c)
        .map(|i| i as u8)
}

fn parse_terracotta(code: &str) -> Option<Room> {
    let digits = code
        .chars()
        .filter(|c| c.is_alphanumeric())
        .map(base34_digit)
        .collect::<Option<Vec<u8>>>()?;
    if digits.len() != TERRACOTTA_DIGITS {
        return None;
    }
    let (body, check) = digits.split_at(TERRACOTTA_DIGITS - 1);
    if checksum(body) != check[0] {
        return None;
    }

    // 34^25 < 2^128, so the full value fits.
    let total = digits
        .iter()
        .rev()
        .fold(0u128, |acc, d| acc * 34 + u128::from(*d));
    let low = total as u64;

    let canonical: String = digits
        .iter()
        .map(|d| char::from(BASE34[usize::from(*d)]).to_ascii_lowercase())
        .collect();

    Some(Room {
        kind: RoomKind::Terracotta,
        network_name: format!("{TERRACOTTA_NAME_PREFIX}{}", &canonical[..15]),
        network_secret: canonical[15..].to_string(),
        port: (low & 0xFFFF) as u16,
        room_id: low >> 16,
    })
}

fn parse_pcl2ce(code: &str) -> Option<Room> {
    let code = code.trim();
    if code.is_empty() || code.chars().count() > PCL2CE_MAX_CHARS {
        return None;
    }

    let mut value = 0u64;
    for c in code.chars() {
        let c = c.to_ascii_uppercase();
        let digit = PCL2CE_ALPHABET.iter().position(|b| char::from(*b) == c)?;
        value = (value << 5) | digit as u64;
    }
    if value >= PCL2CE_LIMIT {
        return None;
    }

    let decimal = value.to_string();
    let port = match decimal.len() {
        14 => value % 10_000,
        15 => value % 100_000,
        _ => return None,
    };
    let port = u16::try_from(port).ok()?;

    Some(Room {
        kind: RoomKind::Pcl2ce,
        network_name: format!("{PCL2CE_NAME_PREFIX}{}", &decimal[..8]),
        network_secret: format!("{PCL2CE_SECRET_PREFIX}{}", &decimal[8..10]),
        port,
        room_id: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pcl2ce_code(mut value: u64) -> String {
        let mut chars = Vec::new();
        while value > 0 {
            chars.push(char::from(PCL2CE_ALPHABET[(value & 31) as usize]));
            value >>= 5;
        }
        chars.iter().rev().collect()
    }

    #[test]
    fn test_generated_code_round_trips_port() {
        for port in [1, 25565, 35781, u16::MAX] {
            let code = generate(port);
            assert_eq!(code.len(), 29);
            assert!(code.split('-').all(|group| group.len() == 5));

            let room = parse(&code).unwrap();
            assert_eq!(room.kind, RoomKind::Terracotta);
            assert_eq!(room.port, port);
            assert!(room.network_name.starts_with("terracotta-mc-"));
            assert_eq!(room.network_name.len(), 14 + 15);
            assert_eq!(room.network_secret.len(), 10);
        }
    }

    #[test]
    fn test_known_terracotta_code() {
        let mut bytes = [0u8; 15];
        bytes[13..].copy_from_slice(&25565u16.to_be_bytes());
        let code = encode_terracotta(bytes);
        assert_eq!(code, "X3N00-00000-00000-00000-0000N");

        let room = parse(&code).unwrap();
        assert_eq!(room.network_name, "terracotta-mc-x3n000000000000");
        assert_eq!(room.network_secret, "000000000n");
        assert_eq!(room.port, 25565);
    }

    #[test]
    fn test_terracotta_parse_is_lenient() {
        let code = "X3N00-00000-00000-00000-0000N";
        let expected = parse(code).unwrap();

        assert_eq!(parse(&code.to_lowercase()).unwrap(), expected);
        assert_eq!(parse(&code.replace('-', "")).unwrap(), expected);
        assert_eq!(parse(&code.replace('0', "O")).unwrap(), expected);
        assert_eq!(parse(&format!("  {code}\n")).unwrap(), expected);
    }

    #[test]
    fn test_terracotta_checksum_mismatch_is_rejected() {
        let code = generate(25565);
        let first = code.chars().next().unwrap();
        let swapped = if first == 'A' { 'B' } else { 'A' };
        let tampered = format!("{swapped}{}", &code[1..]);
        assert_eq!(parse(&tampered), Err(InviteError::Unrecognized));

        assert_eq!(parse(&code[..23]), Err(InviteError::Unrecognized));
    }

    #[test]
    fn test_pcl2ce_codes() {
        let room = parse(&pcl2ce_code(123_456_789_012_345)).unwrap();
        assert_eq!(room.kind, RoomKind::Pcl2ce);
        assert_eq!(room.network_name, "PCLCELobby12345678");
        assert_eq!(room.network_secret, "PCLCEETLOBBY202590");
        assert_eq!(room.port, 12345);
        assert_eq!(room.room_id, 0);

        let short = parse(&pcl2ce_code(12_345_678_901_234).to_lowercase()).unwrap();
        assert_eq!(short.port, 1234);
        assert_eq!(short.network_name, "PCLCELobby12345678");
    }

    #[test]
    fn test_pcl2ce_out_of_range_ports_are_rejected() {
        // Five-digit port above 65535.
        assert_eq!(
            parse(&pcl2ce_code(123_456_789_099_999)),
            Err(InviteError::Unrecognized)
        );
        // Decimal form too short.
        assert_eq!(
            parse(&pcl2ce_code(123_456_789)),
            Err(InviteError::Unrecognized)
        );
    }

    #[test]
    fn test_garbage_is_rejected() {
        for code in ["", "   ", "hello", "ZZZZZZZZZZZ", "11111-22222"] {
            assert_eq!(parse(code), Err(InviteError::Unrecognized), "{code:?}");
        }
    }

    #[test]
    fn test_room_guest_options() {
        let room = parse(&generate(25565)).unwrap();
        let opts = room
            .guest_options(35781, Ipv4Addr::new(10, 144, 144, 9), true)
            .unwrap();
        assert_eq!(opts.remote_port, 25565);
        assert_eq!(opts.local_port, 35781);
        assert_eq!(opts.room_kind, RoomKind::Terracotta);
        assert_eq!(
            opts.instance_name,
            format!("EnchantNet-Guest-{}", room.network_secret)
        );
        assert!(room.host_instance_name().starts_with("EnchantNet-Host-"));

        let portless = parse(&generate(0)).unwrap();
        assert!(matches!(
            portless.guest_options(35781, Ipv4Addr::new(10, 144, 144, 9), true),
            Err(InviteError::NoPort)
        ));
    }

    #[test]
    fn test_room_debug_redacts_secret() {
        let room = parse("X3N00-00000-00000-00000-0000N").unwrap();
        let rendered = format!("{room:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("000000000n"));
    }
}
