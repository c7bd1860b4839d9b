//! IPv4 subnet arithmetic.
//!
//! Maps between an index and the address of one allocation unit inside a
//! subnet. With an allocation length of 32 the unit is a single host
//! address; with a shorter allocation length the unit is a sub-subnet whose
//! base address is returned. The same formula serves both cases.
//!
//! All arithmetic is done on `u32` (widened to `u64` where a shift by 32 is
//! possible), so the mapping is exact in both directions.

use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::NetworkError;

/// Maximum IPv4 prefix length.
pub const IPV4_MAX_PREFIX: u8 = 32;

/// A canonical IPv4 subnet (no bits set beyond the prefix).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    /// Base (network) address.
    address: Ipv4Addr,

    /// Prefix length, 0..=32.
    prefix_len: u8,
}

impl Subnet {
    /// Create a subnet, rejecting non-canonical base addresses.
    ///
    /// The address is never masked: `172.12.0.0/4` is an error, not
    /// `160.0.0.0/4`.
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, NetworkError> {
        if prefix_len > IPV4_MAX_PREFIX {
            return Err(NetworkError::InvalidSubnet {
                address,
                prefix_len,
                reason: format!("prefix length exceeds {}", IPV4_MAX_PREFIX),
            });
        }

        if u32::from(address) & !prefix_mask(prefix_len) != 0 {
            return Err(NetworkError::InvalidSubnet {
                address,
                prefix_len,
                reason: "address has bits set beyond the prefix".to_string(),
            });
        }

        Ok(Self {
            address,
            prefix_len,
        })
    }

    /// Parse from CIDR notation (e.g., "10.123.16.0/22").
    pub fn from_cidr(s: &str) -> Result<Self, NetworkError> {
        let Some((addr_str, prefix_str)) = s.trim().split_once('/') else {
            return Err(NetworkError::InvalidPrefix(format!(
                "missing '/' in CIDR: {}",
                s
            )));
        };

        let address = Ipv4Addr::from_str(addr_str)
            .map_err(|_| NetworkError::InvalidAddress(addr_str.to_string()))?;

        let prefix_len = prefix_str
            .parse::<u8>()
            .map_err(|_| NetworkError::InvalidPrefix(prefix_str.to_string()))?;

        Self::new(address, prefix_len)
    }

    /// Base address of the subnet.
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Prefix length of the subnet.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Check if an address shares the subnet's prefix bits.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & prefix_mask(self.prefix_len) == u32::from(self.address)
    }

    /// Number of allocation units of length `alloc_len` in this subnet.
    pub fn unit_count(&self, alloc_len: u8) -> Result<u64, NetworkError> {
        self.check_alloc_len(alloc_len)?;
        Ok(1u64 << (alloc_len - self.prefix_len))
    }

    /// Address of the `index`-th allocation unit.
    ///
    /// `base | (index << (32 - alloc_len))`.
    pub fn derive_address(&self, alloc_len: u8, index: u32) -> Result<Ipv4Addr, NetworkError> {
        let units = self.unit_count(alloc_len)?;
        if u64::from(index) >= units {
            return Err(NetworkError::IndexOutOfRange {
                index,
                units,
                subnet: self.to_string(),
                alloc_len,
            });
        }

        let offset = u64::from(index) << (IPV4_MAX_PREFIX - alloc_len);
        // offset < 2^(32 - prefix_len), so it only touches host bits
        let bits = u64::from(u32::from(self.address)) | offset;
        Ok(Ipv4Addr::from(bits as u32))
    }

    /// Index of the allocation unit that `addr` falls into.
    ///
    /// `(addr >> (32 - alloc_len)) & (2^(alloc_len - prefix_len) - 1)`.
    pub fn derive_index(&self, alloc_len: u8, addr: Ipv4Addr) -> Result<u32, NetworkError> {
        let units = self.unit_count(alloc_len)?;
        if !self.contains(addr) {
            return Err(NetworkError::AddressNotInSubnet {
                address: addr,
                subnet: self.to_string(),
            });
        }

        let shifted = u64::from(u32::from(addr)) >> (IPV4_MAX_PREFIX - alloc_len);
        Ok((shifted & (units - 1)) as u32)
    }

    fn check_alloc_len(&self, alloc_len: u8) -> Result<(), NetworkError> {
        if alloc_len < self.prefix_len || alloc_len > IPV4_MAX_PREFIX {
            return Err(NetworkError::InvalidAllocationLength {
                alloc_len,
                prefix_len: self.prefix_len,
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for Subnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for Subnet {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_cidr(s)
    }
}

/// Network mask for a prefix length.
fn prefix_mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else if prefix_len >= IPV4_MAX_PREFIX {
        u32::MAX
    } else {
        u32::MAX << (IPV4_MAX_PREFIX - prefix_len)
    }
}

/// Address of unit `index` in `subnet_ip/subnet_len`, as a dotted string.
pub fn subnet_ip(
    subnet_ip: &str,
    subnet_len: u8,
    alloc_len: u8,
    index: u32,
) -> Result<String, NetworkError> {
    let subnet = Subnet::new(parse_ipv4(subnet_ip)?, subnet_len)?;
    Ok(subnet.derive_address(alloc_len, index)?.to_string())
}

/// Index of the unit holding `addr` in `subnet_ip/subnet_len`.
pub fn ip_number(
    subnet_ip: &str,
    subnet_len: u8,
    alloc_len: u8,
    addr: &str,
) -> Result<u32, NetworkError> {
    let subnet = Subnet::new(parse_ipv4(subnet_ip)?, subnet_len)?;
    subnet.derive_index(alloc_len, parse_ipv4(addr)?)
}

fn parse_ipv4(s: &str) -> Result<Ipv4Addr, NetworkError> {
    Ipv4Addr::from_str(s.trim()).map_err(|_| NetworkError::InvalidAddress(s.to_string()))
}
