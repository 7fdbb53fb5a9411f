//! IPv4 CIDR block type and the equal-size split used for default subnets.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 network in CIDR notation.
///
/// The address is always normalized to the network address, so
/// `10.0.1.7/16` parses to `10.0.0.0/16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Cidr {
    /// Creates a CIDR block, masking host bits off `address`.
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, ParseError> {
        if prefix_len > 32 {
            return Err(ParseError::InvalidCidr(format!(
                "{}/{}: prefix length exceeds 32",
                address, prefix_len
            )));
        }
        let network = Ipv4Addr::from(u32::from(address) & Self::mask_bits(prefix_len));
        Ok(Self {
            network,
            prefix_len,
        })
    }

    fn mask_bits(prefix_len: u8) -> u32 {
        if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix_len))
        }
    }

    /// Returns the network address.
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// Returns the prefix length.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Returns the number of addresses in the block.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len))
    }

    /// Returns true if the address falls inside this block.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & Self::mask_bits(self.prefix_len) == u32::from(self.network)
    }

    /// Returns true if the two blocks share any address.
    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        self.contains(other.network) || other.contains(self.network)
    }

    /// Splits this block into `count` equal, contiguous child blocks.
    ///
    /// The child prefix grows by `ceil(log2(count))` bits, so when `count`
    /// is not a power of two the trailing part of the parent stays unused.
    pub fn split(&self, count: usize) -> Result<Vec<Ipv4Cidr>, ParseError> {
        let split_failed = || ParseError::SplitFailed {
            cidr: self.to_string(),
            count,
        };

        if count == 0 {
            return Err(split_failed());
        }

        let extra_bits = count.next_power_of_two().trailing_zeros();
        let new_prefix = u32::from(self.prefix_len) + extra_bits;
        if new_prefix > 32 {
            return Err(split_failed());
        }

        let base = u64::from(u32::from(self.network));
        let step = 1u64 << (32 - new_prefix);
        (0..count as u64)
            .map(|i| {
                let start = u32::try_from(base + i * step).map_err(|_| split_failed())?;
                Ipv4Cidr::new(Ipv4Addr::from(start), new_prefix as u8)
            })
            .collect()
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_str, len_str) = s
            .split_once('/')
            .ok_or_else(|| ParseError::InvalidCidr(s.to_string()))?;

        let address: Ipv4Addr = addr_str
            .parse()
            .map_err(|_| ParseError::InvalidCidr(s.to_string()))?;
        let prefix_len: u8 = len_str
            .parse()
            .map_err(|_| ParseError::InvalidCidr(s.to_string()))?;

        Ipv4Cidr::new(address, prefix_len)
    }
}

impl TryFrom<String> for Ipv4Cidr {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ipv4Cidr> for String {
    fn from(cidr: Ipv4Cidr) -> Self {
        cidr.to_string()
    }
}

/// Parses `cidr` and splits it into `count` equal child blocks.
pub fn split_into_subnets(cidr: &str, count: usize) -> Result<Vec<Ipv4Cidr>, ParseError> {
    cidr.parse::<Ipv4Cidr>()?.split(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn strings(blocks: &[Ipv4Cidr]) -> Vec<String> {
        blocks.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_parse_normalizes_host_bits() {
        let cidr: Ipv4Cidr = "10.0.1.7/16".parse().unwrap();
        assert_eq!(cidr.to_string(), "10.0.0.0/16");
        assert_eq!(cidr.prefix_len(), 16);
        assert_eq!(cidr.size(), 65536);
    }

    #[test]
    fn test_parse_invalid() {
        assert!("10.0.0.0".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.0/33".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0/16".parse::<Ipv4Cidr>().is_err());
        assert!("fd00::/64".parse::<Ipv4Cidr>().is_err());
    }

    #[test]
    fn test_split_in_two() {
        let blocks = split_into_subnets("10.0.0.0/16", 2).unwrap();
        assert_eq!(strings(&blocks), vec!["10.0.0.0/17", "10.0.128.0/17"]);
    }

    #[test]
    fn test_split_non_power_of_two() {
        let blocks = split_into_subnets("10.0.0.0/16", 3).unwrap();
        assert_eq!(
            strings(&blocks),
            vec!["10.0.0.0/18", "10.0.64.0/18", "10.0.128.0/18"]
        );
    }

    #[test]
    fn test_split_into_one_is_identity() {
        let blocks = split_into_subnets("10.0.0.0/17", 1).unwrap();
        assert_eq!(strings(&blocks), vec!["10.0.0.0/17"]);
    }

    #[test]
    fn test_split_children_do_not_overlap() {
        let blocks = split_into_subnets("172.16.0.0/12", 7).unwrap();
        assert_eq!(blocks.len(), 7);
        for (i, a) in blocks.iter().enumerate() {
            assert_eq!(a.prefix_len(), 15);
            for b in &blocks[i + 1..] {
                assert!(!a.overlaps(b), "{} overlaps {}", a, b);
            }
        }
    }

    #[test]
    fn test_split_too_small() {
        let err = split_into_subnets("10.0.0.0/31", 3).unwrap_err();
        assert_eq!(
            err,
            ParseError::SplitFailed {
                cidr: "10.0.0.0/31".to_string(),
                count: 3
            }
        );
        assert!(split_into_subnets("10.0.0.0/16", 0).is_err());
    }

    #[test]
    fn test_contains() {
        let cidr: Ipv4Cidr = "192.168.0.0/24".parse().unwrap();
        assert!(cidr.contains(Ipv4Addr::new(192, 168, 0, 200)));
        assert!(!cidr.contains(Ipv4Addr::new(192, 168, 1, 0)));
    }
}
