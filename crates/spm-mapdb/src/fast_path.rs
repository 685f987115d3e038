//! Per-packet helpers: flow hashing and header field extraction.
//!
//! Everything here is branch-light and allocation-free; these run once per
//! classified frame or flow.

use serde::{Deserialize, Serialize};
use spm_core::types::FLOW_HASH_BUCKETS;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const VLAN_PRIO_MASK: u16 = 0xE000;
const VLAN_PRIO_SHIFT: u16 = 13;
const VLAN_VID_MASK: u16 = 0x0FFF;

/// Addresses, ports and protocol identifying a flow-keyed rule.
///
/// IPv4 addresses occupy word 0 with the remaining words zero; IPv6
/// addresses fill all four words.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowTuple {
    pub src_addr: [u32; 4],
    pub dst_addr: [u32; 4],
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
}

impl FlowTuple {
    /// Builds a tuple from typed addresses. Mixed families leave the
    /// mismatched side zeroed.
    pub fn new(src: IpAddr, dst: IpAddr, src_port: u16, dst_port: u16, protocol: u8) -> Self {
        Self {
            src_addr: addr_words(src),
            dst_addr: addr_words(dst),
            src_port,
            dst_port,
            protocol,
        }
    }

    /// Hash bucket of this tuple.
    #[inline]
    pub fn hash_key(&self) -> u32 {
        flow_hash(self)
    }
}

impl fmt::Display for FlowTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} proto {}",
            words_to_addr(&self.src_addr),
            self.src_port,
            words_to_addr(&self.dst_addr),
            self.dst_port,
            self.protocol
        )
    }
}

/// Address words for an IPv4 address.
#[inline]
pub fn ipv4_words(addr: Ipv4Addr) -> [u32; 4] {
    [u32::from(addr), 0, 0, 0]
}

/// Address words for an IPv6 address, most significant word first.
#[inline]
pub fn ipv6_words(addr: Ipv6Addr) -> [u32; 4] {
    let bits = u128::from(addr);
    [
        (bits >> 96) as u32,
        (bits >> 64) as u32,
        (bits >> 32) as u32,
        bits as u32,
    ]
}

#[inline]
fn addr_words(addr: IpAddr) -> [u32; 4] {
    match addr {
        IpAddr::V4(v4) => ipv4_words(v4),
        IpAddr::V6(v6) => ipv6_words(v6),
    }
}

fn words_to_addr(words: &[u32; 4]) -> IpAddr {
    if words[1..].iter().all(|w| *w == 0) {
        IpAddr::V4(Ipv4Addr::from(words[0]))
    } else {
        let bits = words
            .iter()
            .fold(0u128, |acc, w| (acc << 32) | u128::from(*w));
        IpAddr::V6(Ipv6Addr::from(bits))
    }
}

/// Hash of a flow tuple, reduced to a bucket index.
///
/// XOR of every address word of both endpoints, both ports and the
/// protocol, masked with `FLOW_HASH_BUCKETS - 1`. Used for both insertion
/// and lookup, so the two always agree.
#[inline]
pub fn flow_hash(tuple: &FlowTuple) -> u32 {
    let mut val = 0u32;
    for i in 0..4 {
        val ^= tuple.dst_addr[i];
        val ^= tuple.src_addr[i];
    }
    val ^= u32::from(tuple.dst_port);
    val ^= u32::from(tuple.src_port);
    val ^= u32::from(tuple.protocol);

    val & (FLOW_HASH_BUCKETS - 1)
}

/// Priority code point of a VLAN tag control field.
#[inline]
pub fn vlan_pcp(tci: u16) -> u8 {
    ((tci & VLAN_PRIO_MASK) >> VLAN_PRIO_SHIFT) as u8
}

/// VLAN identifier of a tag control field.
#[inline]
pub fn vlan_id(tci: u16) -> u16 {
    tci & VLAN_VID_MASK
}

/// DSCP carried in an IP DS field.
#[inline]
pub fn dscp_of(dsfield: u8) -> u8 {
    dsfield >> 2
}

/// PCP derived from an IP DS field (class selector bits).
#[inline]
pub fn pcp_of_dsfield(dsfield: u8) -> u8 {
    dsfield >> 5
}
