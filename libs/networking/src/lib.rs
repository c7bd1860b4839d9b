//! Networking utilities for the plugin.
//!
//! This library provides helpers for:
//! - IPv4 subnet arithmetic (host and sub-subnet addresses by index)
//! - VLAN/VXLAN tag range parsing and validation
//!
//! Both are pure and allocation-free apart from error messages, so they are
//! safe to call from any thread.

use std::net::Ipv4Addr;

use thiserror::Error;

pub mod subnet;
pub mod tags;

pub use subnet::{ip_number, subnet_ip, Subnet, IPV4_MAX_PREFIX};
pub use tags::{
    parse_tag_ranges, TagKind, TagLimits, TagRange, TagRangeError, TagRangeSet,
    VLAN_DEFAULT_MAX, VXLAN_DEFAULT_MAX,
};

/// Address arithmetic errors.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Invalid IP address.
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    /// Invalid CIDR prefix.
    #[error("invalid CIDR prefix: {0}")]
    InvalidPrefix(String),

    /// Subnet base address is not canonical for its prefix.
    #[error("invalid subnet {address}/{prefix_len}: {reason}")]
    InvalidSubnet {
        address: Ipv4Addr,
        prefix_len: u8,
        reason: String,
    },

    /// Allocation length shorter than the subnet prefix or longer than 32.
    #[error("invalid allocation length {alloc_len} for /{prefix_len} subnet")]
    InvalidAllocationLength { alloc_len: u8, prefix_len: u8 },

    /// Index beyond the number of allocation units.
    #[error("index {index} out of range for {subnet} with allocation length {alloc_len} ({units} units)")]
    IndexOutOfRange {
        index: u32,
        units: u64,
        subnet: String,
        alloc_len: u8,
    },

    /// Address outside the subnet.
    #[error("address {address} is not in subnet {subnet}")]
    AddressNotInSubnet { address: Ipv4Addr, subnet: String },
}
