//! MAC address parsing and canonicalization (§3 "Valve registration", §8 S6).

use std::fmt;

/// A 48-bit BLE device address, stored as six octets.
///
/// Always displays as lowercase colon-separated hex, matching the canonical
/// form the registry stores valve addresses in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Parse a MAC string in `AA:BB:CC:DD:EE:FF` form (case-insensitive).
    /// Rejects anything that isn't exactly six colon-separated hex octets.
    pub fn parse(s: &str) -> Result<Self, String> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(format!("expected 6 colon-separated octets, got {}", parts.len()));
        }
        let mut octets = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(format!("octet {i} ({part:?}) is not 2 hex digits"));
            }
            octets[i] = u8::from_str_radix(part, 16)
                .map_err(|_| format!("octet {i} ({part:?}) is not valid hex"))?;
        }
        Ok(Self(octets))
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// The address as a single big-endian 48-bit integer, as used by the
    /// proxy RPC's `bluetooth_device_connect` address argument.
    pub fn as_u64(&self) -> u64 {
        self.0.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
    }

    pub fn from_u64(addr: u64) -> Self {
        let mut octets = [0u8; 6];
        for i in 0..6 {
            octets[5 - i] = ((addr >> (8 * i)) & 0xFF) as u8;
        }
        Self(octets)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_normalize_mixed_case() {
        let mac = MacAddress::parse("62:00:A1:1E:C1:1F").unwrap();
        assert_eq!(mac.to_string(), "62:00:a1:1e:c1:1f");
        assert_eq!(mac.as_u64(), 0x6200A11EC11F);
    }

    #[test]
    fn rejects_bad_hex_digit() {
        assert!(MacAddress::parse("62:00:A1:1E:C1:1G").is_err());
    }

    #[test]
    fn rejects_wrong_octet_count() {
        assert!(MacAddress::parse("62:00:A1:1E:C1").is_err());
        assert!(MacAddress::parse("62:00:A1:1E:C1:1F:FF").is_err());
    }

    #[test]
    fn round_trips_through_u64() {
        let mac = MacAddress::parse("aa:bb:cc:dd:ee:ff").unwrap();
        let back = MacAddress::from_u64(mac.as_u64());
        assert_eq!(mac, back);
    }
}
