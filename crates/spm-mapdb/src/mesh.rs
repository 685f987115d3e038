//! Raw-frame matching for mesh rules.
//!
//! A [`MeshMatch`] is a conjunction of typed predicates, each with its own
//! polarity. Rules arriving in the legacy bitmask encoding (one flag bit and
//! one sense bit per criterion) convert losslessly through
//! [`MeshMatch::from_flags`] and [`MeshMatch::to_flags`].

use serde::{Deserialize, Serialize};
use spm_core::types::{MacAddr, IPPROTO_TCP, IPPROTO_UDP};
use std::fmt;
use std::net::Ipv4Addr;

use crate::fast_path::{dscp_of, pcp_of_dsfield};

/// Legacy bitmask encoding of mesh predicates.
pub mod flags {
    pub const ALWAYS_TRUE: u32 = 0x0000_0001;
    pub const UP: u32 = 0x0000_0002;
    pub const UP_SENSE: u32 = 0x0000_0004;
    pub const SOURCE_MAC: u32 = 0x0000_0008;
    pub const SOURCE_MAC_SENSE: u32 = 0x0000_0010;
    pub const DEST_MAC: u32 = 0x0000_0020;
    pub const DEST_MAC_SENSE: u32 = 0x0000_0040;
    pub const SRC_IPV4: u32 = 0x0000_0080;
    pub const SRC_IPV4_SENSE: u32 = 0x0000_0100;
    pub const DST_IPV4: u32 = 0x0000_0800;
    pub const DST_IPV4_SENSE: u32 = 0x0000_1000;
    pub const SRC_PORT: u32 = 0x0000_8000;
    pub const SRC_PORT_SENSE: u32 = 0x0001_0000;
    pub const DST_PORT: u32 = 0x0002_0000;
    pub const DST_PORT_SENSE: u32 = 0x0004_0000;
    pub const PROTOCOL: u32 = 0x0008_0000;
    pub const PROTOCOL_SENSE: u32 = 0x0010_0000;
    pub const VLAN_ID: u32 = 0x0020_0000;
    pub const VLAN_ID_SENSE: u32 = 0x0040_0000;
    pub const DSCP: u32 = 0x0080_0000;
    pub const DSCP_SENSE: u32 = 0x0100_0000;
}

/// Polarity of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sense {
    /// Matches when the field equals the value
    #[default]
    Positive,
    /// Matches when the field differs from the value
    Negative,
}

impl Sense {
    #[inline]
    fn apply(self, result: bool) -> bool {
        match self {
            Sense::Positive => result,
            Sense::Negative => !result,
        }
    }

    fn from_bit(set: bool) -> Self {
        if set {
            Sense::Negative
        } else {
            Sense::Positive
        }
    }
}

/// A single field comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeshCriterion {
    UserPriority(u8),
    SourceMac(MacAddr),
    DestMac(MacAddr),
    /// Compared against the full tag control field
    VlanId(u16),
    Dscp(u8),
    SourceIpv4(Ipv4Addr),
    DestIpv4(Ipv4Addr),
    Protocol(u8),
    SourcePort(u16),
    DestPort(u16),
}

impl MeshCriterion {
    /// Criteria that only apply to IPv4 frames.
    pub fn needs_ipv4(&self) -> bool {
        matches!(
            self,
            MeshCriterion::Dscp(_)
                | MeshCriterion::SourceIpv4(_)
                | MeshCriterion::DestIpv4(_)
                | MeshCriterion::Protocol(_)
                | MeshCriterion::SourcePort(_)
                | MeshCriterion::DestPort(_)
        )
    }

    /// Compares the criterion against a frame.
    ///
    /// `None` when the frame lacks the field entirely (untagged frame for a
    /// VLAN criterion, non-IPv4 frame for an IP-level criterion); such a
    /// predicate fails regardless of its sense.
    fn compare(&self, frame: &Frame) -> Option<bool> {
        let result = match *self {
            MeshCriterion::UserPriority(up) => frame.priority == up,
            MeshCriterion::SourceMac(mac) => frame.src_mac == mac,
            MeshCriterion::DestMac(mac) => frame.dst_mac == mac,
            MeshCriterion::VlanId(vid) => frame.vlan_tci? == vid,
            MeshCriterion::Dscp(dscp) => dscp_of(frame.ipv4()?.dsfield) == dscp,
            MeshCriterion::SourceIpv4(addr) => frame.ipv4()?.src == addr,
            MeshCriterion::DestIpv4(addr) => frame.ipv4()?.dst == addr,
            MeshCriterion::Protocol(proto) => frame.ipv4()?.protocol == proto,
            MeshCriterion::SourcePort(port) => frame.ipv4()?.l4_ports().0 == port,
            MeshCriterion::DestPort(port) => frame.ipv4()?.l4_ports().1 == port,
        };
        Some(result)
    }

    fn flag_bits(&self) -> (u32, u32) {
        match self {
            MeshCriterion::UserPriority(_) => (flags::UP, flags::UP_SENSE),
            MeshCriterion::SourceMac(_) => (flags::SOURCE_MAC, flags::SOURCE_MAC_SENSE),
            MeshCriterion::DestMac(_) => (flags::DEST_MAC, flags::DEST_MAC_SENSE),
            MeshCriterion::VlanId(_) => (flags::VLAN_ID, flags::VLAN_ID_SENSE),
            MeshCriterion::Dscp(_) => (flags::DSCP, flags::DSCP_SENSE),
            MeshCriterion::SourceIpv4(_) => (flags::SRC_IPV4, flags::SRC_IPV4_SENSE),
            MeshCriterion::DestIpv4(_) => (flags::DST_IPV4, flags::DST_IPV4_SENSE),
            MeshCriterion::Protocol(_) => (flags::PROTOCOL, flags::PROTOCOL_SENSE),
            MeshCriterion::SourcePort(_) => (flags::SRC_PORT, flags::SRC_PORT_SENSE),
            MeshCriterion::DestPort(_) => (flags::DST_PORT, flags::DST_PORT_SENSE),
        }
    }
}

impl fmt::Display for MeshCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshCriterion::UserPriority(up) => write!(f, "up={}", up),
            MeshCriterion::SourceMac(mac) => write!(f, "smac={}", mac),
            MeshCriterion::DestMac(mac) => write!(f, "dmac={}", mac),
            MeshCriterion::VlanId(vid) => write!(f, "vlan={}", vid),
            MeshCriterion::Dscp(dscp) => write!(f, "dscp={}", dscp),
            MeshCriterion::SourceIpv4(addr) => write!(f, "sip={}", addr),
            MeshCriterion::DestIpv4(addr) => write!(f, "dip={}", addr),
            MeshCriterion::Protocol(proto) => write!(f, "proto={}", proto),
            MeshCriterion::SourcePort(port) => write!(f, "sport={}", port),
            MeshCriterion::DestPort(port) => write!(f, "dport={}", port),
        }
    }
}

/// A criterion together with its polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeshPredicate {
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub criterion: MeshCriterion,
    #[serde(default)]
    pub sense: Sense,
}

impl MeshPredicate {
    pub fn positive(criterion: MeshCriterion) -> Self {
        Self {
            criterion,
            sense: Sense::Positive,
        }
    }

    pub fn negative(criterion: MeshCriterion) -> Self {
        Self {
            criterion,
            sense: Sense::Negative,
        }
    }

    #[inline]
    pub fn matches(&self, frame: &Frame) -> bool {
        self.criterion
            .compare(frame)
            .is_some_and(|result| self.sense.apply(result))
    }
}

impl fmt::Display for MeshPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sense {
            Sense::Positive => write!(f, "{}", self.criterion),
            Sense::Negative => write!(f, "!{}", self.criterion),
        }
    }
}

/// Field values that accompany a legacy flag word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshFields {
    pub user_priority: u8,
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub vlan_id: u16,
    pub dscp: u8,
    pub src_ipv4: Option<Ipv4Addr>,
    pub dst_ipv4: Option<Ipv4Addr>,
    pub protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
}

/// Match criteria of a mesh rule.
///
/// An empty predicate list matches every frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshMatch {
    /// Matches unconditionally when set
    pub always: bool,
    pub predicates: Vec<MeshPredicate>,
}

impl MeshMatch {
    /// A match that accepts every frame.
    pub fn always() -> Self {
        Self {
            always: true,
            predicates: Vec::new(),
        }
    }

    /// Adds a positive predicate.
    pub fn with(mut self, criterion: MeshCriterion) -> Self {
        self.predicates.push(MeshPredicate::positive(criterion));
        self
    }

    /// Adds a negated predicate.
    pub fn without(mut self, criterion: MeshCriterion) -> Self {
        self.predicates.push(MeshPredicate::negative(criterion));
        self
    }

    /// Evaluates the match against a frame.
    pub fn matches(&self, frame: &Frame) -> bool {
        if self.always {
            return true;
        }

        // An IP-level criterion rejects anything that is not IPv4, even
        // when negated.
        if frame.ipv4().is_none() && self.predicates.iter().any(|p| p.criterion.needs_ipv4()) {
            return false;
        }

        self.predicates.iter().all(|p| p.matches(frame))
    }

    /// Decodes the legacy flag word.
    ///
    /// Field values are taken from `fields` for every flag that is set;
    /// an IPv4 flag without an address in `fields` falls back to
    /// `0.0.0.0`.
    pub fn from_flags(bits: u32, fields: &MeshFields) -> Self {
        let mut mesh = MeshMatch {
            always: bits & flags::ALWAYS_TRUE != 0,
            predicates: Vec::new(),
        };

        let candidates = [
            MeshCriterion::UserPriority(fields.user_priority),
            MeshCriterion::SourceMac(fields.src_mac),
            MeshCriterion::DestMac(fields.dst_mac),
            MeshCriterion::VlanId(fields.vlan_id),
            MeshCriterion::Dscp(fields.dscp),
            MeshCriterion::SourceIpv4(fields.src_ipv4.unwrap_or(Ipv4Addr::UNSPECIFIED)),
            MeshCriterion::DestIpv4(fields.dst_ipv4.unwrap_or(Ipv4Addr::UNSPECIFIED)),
            MeshCriterion::Protocol(fields.protocol),
            MeshCriterion::SourcePort(fields.src_port),
            MeshCriterion::DestPort(fields.dst_port),
        ];

        for criterion in candidates {
            let (flag, sense) = criterion.flag_bits();
            if bits & flag != 0 {
                mesh.predicates.push(MeshPredicate {
                    criterion,
                    sense: Sense::from_bit(bits & sense != 0),
                });
            }
        }

        mesh
    }

    /// Encodes the match as a legacy flag word plus field values.
    ///
    /// When a criterion appears more than once only the last value survives;
    /// the flag word has a single slot per criterion.
    pub fn to_flags(&self) -> (u32, MeshFields) {
        let mut bits = if self.always { flags::ALWAYS_TRUE } else { 0 };
        let mut fields = MeshFields::default();

        for predicate in &self.predicates {
            let (flag, sense) = predicate.criterion.flag_bits();
            bits |= flag;
            if predicate.sense == Sense::Negative {
                bits |= sense;
            }

            match predicate.criterion {
                MeshCriterion::UserPriority(v) => fields.user_priority = v,
                MeshCriterion::SourceMac(v) => fields.src_mac = v,
                MeshCriterion::DestMac(v) => fields.dst_mac = v,
                MeshCriterion::VlanId(v) => fields.vlan_id = v,
                MeshCriterion::Dscp(v) => fields.dscp = v,
                MeshCriterion::SourceIpv4(v) => fields.src_ipv4 = Some(v),
                MeshCriterion::DestIpv4(v) => fields.dst_ipv4 = Some(v),
                MeshCriterion::Protocol(v) => fields.protocol = v,
                MeshCriterion::SourcePort(v) => fields.src_port = v,
                MeshCriterion::DestPort(v) => fields.dst_port = v,
            }
        }

        (bits, fields)
    }
}

impl fmt::Display for MeshMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.always {
            return f.write_str("always");
        }
        if self.predicates.is_empty() {
            return f.write_str("any");
        }
        for (i, predicate) in self.predicates.iter().enumerate() {
            if i > 0 {
                f.write_str(" && ")?;
            }
            write!(f, "{}", predicate)?;
        }
        Ok(())
    }
}

/// IPv4 fields a mesh rule can inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Header {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    #[serde(default)]
    pub dsfield: u8,
    #[serde(default)]
    pub protocol: u8,
    #[serde(default)]
    pub src_port: u16,
    #[serde(default)]
    pub dst_port: u16,
}

impl Ipv4Header {
    /// Source and destination ports, zero unless the payload is TCP or UDP.
    #[inline]
    pub fn l4_ports(&self) -> (u16, u16) {
        match self.protocol {
            IPPROTO_TCP | IPPROTO_UDP => (self.src_port, self.dst_port),
            _ => (0, 0),
        }
    }
}

/// Network layer view of a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum L3Header {
    Ipv4(Ipv4Header),
    Ipv6 {
        #[serde(default)]
        dsfield: u8,
    },
    #[default]
    Other,
}

impl L3Header {
    /// PCP implied by the DS field, `None` for non-IP frames.
    pub fn dscp_pcp(&self) -> Option<u8> {
        match self {
            L3Header::Ipv4(hdr) => Some(pcp_of_dsfield(hdr.dsfield)),
            L3Header::Ipv6 { dsfield } => Some(pcp_of_dsfield(*dsfield)),
            L3Header::Other => None,
        }
    }
}

/// A frame presented to the mesh classification path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Frame {
    /// Priority already assigned to the frame
    pub priority: u8,
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    /// 802.1Q tag control field, absent for untagged frames
    pub vlan_tci: Option<u16>,
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub l3: L3Header,
}

impl Frame {
    #[inline]
    pub fn ipv4(&self) -> Option<&Ipv4Header> {
        match &self.l3 {
            L3Header::Ipv4(hdr) => Some(hdr),
            _ => None,
        }
    }
}
