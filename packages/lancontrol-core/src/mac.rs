//! Hardware (MAC) address parsing and normalization.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A link-layer address. Displays in canonical form `AA:BB:CC:DD:EE:FF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// All-zero and broadcast addresses show up in neighbor tables for
    /// incomplete entries; neither identifies a device.
    pub fn is_placeholder(&self) -> bool {
        self.0 == [0; 6] || self.0 == [0xFF; 6]
    }
}

impl FromStr for MacAddress {
    type Err = Error;

    /// Accepts any separator and case: every non-hex character is dropped and
    /// exactly twelve hex digits must remain.
    fn from_str(s: &str) -> Result<Self> {
        let digits: Vec<u8> = s
            .chars()
            .filter_map(|c| c.to_digit(16))
            .map(|d| d as u8)
            .collect();

        if digits.len() != 12 {
            return Err(Error::InvalidMac(s.to_string()));
        }

        let mut octets = [0u8; 6];
        for (i, pair) in digits.chunks_exact(2).enumerate() {
            octets[i] = (pair[0] << 4) | pair[1];
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl TryFrom<String> for MacAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

/// Normalize a hardware address to six colon-separated uppercase hex pairs.
pub fn normalize_hardware_address(input: &str) -> Result<String> {
    input.parse::<MacAddress>().map(|mac| mac.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_common_notations() {
        for input in [
            "aa:bb:cc:dd:ee:ff",
            "AA-BB-CC-DD-EE-FF",
            "aabb.ccdd.eeff",
            "AaBbCcDdEeFf",
            " aa bb cc dd ee ff ",
        ] {
            assert_eq!(
                normalize_hardware_address(input).unwrap(),
                "AA:BB:CC:DD:EE:FF",
                "input {input:?}"
            );
        }
    }

    #[test]
    fn rejects_wrong_digit_count() {
        assert!(matches!(
            normalize_hardware_address("AA:BB:CC:DD:EE"),
            Err(Error::InvalidMac(_))
        ));
        assert!(normalize_hardware_address("AA:BB:CC:DD:EE:FF:00").is_err());
        assert!(normalize_hardware_address("").is_err());
        assert!(normalize_hardware_address("not a mac").is_err());
    }

    #[test]
    fn octets_follow_text_order() {
        let mac: MacAddress = "01:23:45:67:89:ab".parse().unwrap();
        assert_eq!(mac.octets(), [0x01, 0x23, 0x45, 0x67, 0x89, 0xAB]);
    }

    #[test]
    fn serde_uses_canonical_string() {
        let mac: MacAddress = "de-ad-be-ef-00-01".parse().unwrap();
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"DE:AD:BE:EF:00:01\"");
        let back: MacAddress = serde_json::from_str("\"deadbeef0001\"").unwrap();
        assert_eq!(back, mac);
        assert!(serde_json::from_str::<MacAddress>("\"dead\"").is_err());
    }

    #[test]
    fn placeholder_addresses() {
        assert!(MacAddress::new([0; 6]).is_placeholder());
        assert!(MacAddress::new([0xFF; 6]).is_placeholder());
        assert!(!MacAddress::new([0, 0x11, 0x22, 0x33, 0x44, 0x55]).is_placeholder());
    }
}
