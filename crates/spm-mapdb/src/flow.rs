//! Structured flow matching for SAWF, SCS, MSCS, SAWF-SCS and IFLI rules.

use serde::{Deserialize, Serialize};
use spm_core::types::{ClassifierType, IpVersion, MacAddr};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::fast_path::{self, FlowTuple};

/// IPv4 address with an optional mask.
///
/// Without a mask the comparison is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Match {
    pub addr: Ipv4Addr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<Ipv4Addr>,
}

impl Ipv4Match {
    pub fn exact(addr: Ipv4Addr) -> Self {
        Self { addr, mask: None }
    }

    pub fn masked(addr: Ipv4Addr, mask: Ipv4Addr) -> Self {
        Self {
            addr,
            mask: Some(mask),
        }
    }

    #[inline]
    pub fn matches(&self, input: Ipv4Addr) -> bool {
        let mask = self.mask.map_or(u32::MAX, u32::from);
        u32::from(input) & mask == u32::from(self.addr) & mask
    }
}

/// IPv6 address with an optional mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv6Match {
    pub addr: Ipv6Addr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<Ipv6Addr>,
}

impl Ipv6Match {
    pub fn exact(addr: Ipv6Addr) -> Self {
        Self { addr, mask: None }
    }

    pub fn masked(addr: Ipv6Addr, mask: Ipv6Addr) -> Self {
        Self {
            addr,
            mask: Some(mask),
        }
    }

    #[inline]
    pub fn matches(&self, input: Ipv6Addr) -> bool {
        let mask = self.mask.map_or(u128::MAX, u128::from);
        u128::from(input) & mask == u128::from(self.addr) & mask
    }
}

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }
}

/// IPsec SPI pattern: matches when `spi & mask == value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpiMatch {
    pub value: u32,
    #[serde(default = "default_spi_mask")]
    pub mask: u32,
}

fn default_spi_mask() -> u32 {
    u32::MAX
}

impl SpiMatch {
    #[inline]
    pub fn matches(&self, spi: u32) -> bool {
        spi & self.mask == self.value
    }
}

/// Match criteria of a flow-family rule. Absent fields are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowMatch {
    pub ip_version: Option<IpVersion>,
    pub src_mac: Option<MacAddr>,
    pub dst_mac: Option<MacAddr>,
    /// Interface index consulted when an SCS destination MAC differs
    pub dst_ifindex: Option<u32>,
    pub src_ipv4: Option<Ipv4Match>,
    pub dst_ipv4: Option<Ipv4Match>,
    pub src_ipv6: Option<Ipv6Match>,
    pub dst_ipv6: Option<Ipv6Match>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub src_port_range: Option<PortRange>,
    pub dst_port_range: Option<PortRange>,
    pub protocol: Option<u8>,
    pub dscp: Option<u8>,
    pub vlan_pcp: Option<u8>,
    pub vlan_id: Option<u16>,
    pub spi: Option<SpiMatch>,
    /// Informational only
    pub src_iface: Option<String>,
    /// Informational only
    pub dst_iface: Option<String>,
}

impl FlowMatch {
    /// Checks the fields for internal consistency.
    pub fn validate(&self) -> Result<(), String> {
        for (name, range) in [
            ("src_port_range", self.src_port_range),
            ("dst_port_range", self.dst_port_range),
        ] {
            if let Some(range) = range {
                if !range.is_valid() {
                    return Err(format!(
                        "{} start {} is above end {}",
                        name, range.start, range.end
                    ));
                }
            }
        }

        if let Some(pcp) = self.vlan_pcp {
            if pcp > 7 {
                return Err(format!("vlan_pcp {} is out of range", pcp));
            }
        }

        if let Some(dscp) = self.dscp {
            if dscp > 63 {
                return Err(format!("dscp {} is out of range", dscp));
            }
        }

        Ok(())
    }

    /// The rule's own 5-tuple, used to key flow-keyed rules.
    ///
    /// IPv4 addresses are used when both are present, otherwise IPv6 when
    /// both are present, otherwise the address words stay zero. Ports and
    /// protocol are always included.
    pub fn tuple(&self) -> FlowTuple {
        let mut tuple = FlowTuple {
            src_port: self.src_port.unwrap_or(0),
            dst_port: self.dst_port.unwrap_or(0),
            protocol: self.protocol.unwrap_or(0),
            ..Default::default()
        };

        if let (Some(src), Some(dst)) = (self.src_ipv4, self.dst_ipv4) {
            tuple.src_addr = fast_path::ipv4_words(src.addr);
            tuple.dst_addr = fast_path::ipv4_words(dst.addr);
        } else if let (Some(src), Some(dst)) = (self.src_ipv6, self.dst_ipv6) {
            tuple.src_addr = fast_path::ipv6_words(src.addr);
            tuple.dst_addr = fast_path::ipv6_words(dst.addr);
        }

        tuple
    }

    /// Evaluates the match against a flow. `classifier` selects the
    /// destination MAC fallback for SCS-style rules.
    pub fn matches(&self, input: &FlowInput, classifier: ClassifierType) -> bool {
        if let Some(version) = self.ip_version {
            if input.ip_version() != Some(version) {
                return false;
            }
        }

        if let Some(dst_mac) = self.dst_mac {
            if input.dst_mac != dst_mac && !self.dst_mac_fallback(input, dst_mac, classifier) {
                return false;
            }
        }

        if self.dst_port.is_some_and(|port| input.dst_port != port) {
            return false;
        }

        if self
            .dst_port_range
            .is_some_and(|range| !range.contains(input.dst_port))
        {
            return false;
        }

        if let Some(rule) = self.dst_ipv4 {
            if !input.dst_ipv4().is_some_and(|addr| rule.matches(addr)) {
                return false;
            }
        }

        if self.src_mac.is_some_and(|mac| input.src_mac != mac) {
            return false;
        }

        if let Some(rule) = self.src_ipv6 {
            if !input.src_ipv6().is_some_and(|addr| rule.matches(addr)) {
                return false;
            }
        }

        if let Some(rule) = self.dst_ipv6 {
            if !input.dst_ipv6().is_some_and(|addr| rule.matches(addr)) {
                return false;
            }
        }

        if self.src_port.is_some_and(|port| input.src_port != port) {
            return false;
        }

        if self
            .src_port_range
            .is_some_and(|range| !range.contains(input.src_port))
        {
            return false;
        }

        if let Some(rule) = self.src_ipv4 {
            if !input.src_ipv4().is_some_and(|addr| rule.matches(addr)) {
                return false;
            }
        }

        if self.protocol.is_some_and(|proto| input.protocol != proto) {
            return false;
        }

        if self.dscp.is_some_and(|dscp| input.dscp != dscp) {
            return false;
        }

        if let Some(pcp) = self.vlan_pcp {
            if input.vlan_pcp() != Some(pcp) {
                return false;
            }
        }

        if let Some(vid) = self.vlan_id {
            if input.vlan_id() != Some(vid) {
                return false;
            }
        }

        if self.spi.is_some_and(|spi| !spi.matches(input.spi)) {
            return false;
        }

        true
    }

    /// SCS rules addressed at a local interface also match when the flow
    /// egresses that interface.
    fn dst_mac_fallback(
        &self,
        input: &FlowInput,
        dst_mac: MacAddr,
        classifier: ClassifierType,
    ) -> bool {
        if !classifier.is_scs_like() {
            return false;
        }

        match self.dst_ifindex {
            Some(ifindex) => input.dev_addr == dst_mac && input.dst_ifindex == Some(ifindex),
            None => false,
        }
    }
}

impl fmt::Display for FlowMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();

        if let Some(v) = self.ip_version {
            parts.push(format!("ipv{}", v.number()));
        }
        if let Some(mac) = self.src_mac {
            parts.push(format!("smac={}", mac));
        }
        if let Some(mac) = self.dst_mac {
            parts.push(format!("dmac={}", mac));
        }
        if let Some(m) = self.src_ipv4 {
            parts.push(fmt_masked("sip", m.addr, m.mask));
        }
        if let Some(m) = self.dst_ipv4 {
            parts.push(fmt_masked("dip", m.addr, m.mask));
        }
        if let Some(m) = self.src_ipv6 {
            parts.push(fmt_masked("sip6", m.addr, m.mask));
        }
        if let Some(m) = self.dst_ipv6 {
            parts.push(fmt_masked("dip6", m.addr, m.mask));
        }
        if let Some(p) = self.src_port {
            parts.push(format!("sport={}", p));
        }
        if let Some(r) = self.src_port_range {
            parts.push(format!("sport={}-{}", r.start, r.end));
        }
        if let Some(p) = self.dst_port {
            parts.push(format!("dport={}", p));
        }
        if let Some(r) = self.dst_port_range {
            parts.push(format!("dport={}-{}", r.start, r.end));
        }
        if let Some(p) = self.protocol {
            parts.push(format!("proto={}", p));
        }
        if let Some(d) = self.dscp {
            parts.push(format!("dscp={}", d));
        }
        if let Some(p) = self.vlan_pcp {
            parts.push(format!("pcp={}", p));
        }
        if let Some(v) = self.vlan_id {
            parts.push(format!("vid={}", v));
        }
        if let Some(s) = self.spi {
            parts.push(format!("spi={:#x}/{:#x}", s.value, s.mask));
        }

        if parts.is_empty() {
            f.write_str("any")
        } else {
            f.write_str(&parts.join(" "))
        }
    }
}

fn fmt_masked<A: fmt::Display>(name: &str, addr: A, mask: Option<A>) -> String {
    match mask {
        Some(mask) => format!("{}={}/{}", name, addr, mask),
        None => format!("{}={}", name, addr),
    }
}

/// A flow presented to the structured classification paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowInput {
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub src_ip: Option<IpAddr>,
    pub dst_ip: Option<IpAddr>,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub dscp: u8,
    /// 802.1Q tag control field, absent for untagged traffic
    pub vlan_tci: Option<u16>,
    pub spi: u32,
    pub dst_ifindex: Option<u32>,
    /// Hardware address of the egress interface
    pub dev_addr: MacAddr,
    /// Priority already assigned to the flow (the TID for MSCS)
    pub priority: u8,
    /// Egress device name; SAWF classification needs one
    pub dest_dev: Option<String>,
}

impl FlowInput {
    /// IP version of the flow, taken from the destination address (or the
    /// source address when the destination is absent).
    pub fn ip_version(&self) -> Option<IpVersion> {
        match self.dst_ip.or(self.src_ip)? {
            IpAddr::V4(_) => Some(IpVersion::V4),
            IpAddr::V6(_) => Some(IpVersion::V6),
        }
    }

    pub fn src_ipv4(&self) -> Option<Ipv4Addr> {
        match self.src_ip? {
            IpAddr::V4(addr) => Some(addr),
            IpAddr::V6(_) => None,
        }
    }

    pub fn dst_ipv4(&self) -> Option<Ipv4Addr> {
        match self.dst_ip? {
            IpAddr::V4(addr) => Some(addr),
            IpAddr::V6(_) => None,
        }
    }

    pub fn src_ipv6(&self) -> Option<Ipv6Addr> {
        match self.src_ip? {
            IpAddr::V6(addr) => Some(addr),
            IpAddr::V4(_) => None,
        }
    }

    pub fn dst_ipv6(&self) -> Option<Ipv6Addr> {
        match self.dst_ip? {
            IpAddr::V6(addr) => Some(addr),
            IpAddr::V4(_) => None,
        }
    }

    #[inline]
    pub fn vlan_pcp(&self) -> Option<u8> {
        self.vlan_tci.map(fast_path::vlan_pcp)
    }

    #[inline]
    pub fn vlan_id(&self) -> Option<u16> {
        self.vlan_tci.map(fast_path::vlan_id)
    }

    /// The flow's 5-tuple. Missing addresses hash as zero.
    pub fn tuple(&self) -> FlowTuple {
        let words = |ip: Option<IpAddr>| match ip {
            Some(IpAddr::V4(addr)) => fast_path::ipv4_words(addr),
            Some(IpAddr::V6(addr)) => fast_path::ipv6_words(addr),
            None => [0; 4],
        };

        FlowTuple {
            src_addr: words(self.src_ip),
            dst_addr: words(self.dst_ip),
            src_port: self.src_port,
            dst_port: self.dst_port,
            protocol: self.protocol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_input() -> FlowInput {
        FlowInput {
            src_mac: MacAddr::new([0x02, 0, 0, 0, 0, 0x01]),
            dst_mac: MacAddr::new([0x02, 0, 0, 0, 0, 0x02]),
            src_ip: Some("192.168.1.10".parse().unwrap()),
            dst_ip: Some("10.0.0.1".parse().unwrap()),
            src_port: 40000,
            dst_port: 443,
            protocol: 6,
            dscp: 46,
            vlan_tci: Some((6 << 13) | 42),
            spi: 0x1234_5678,
            dst_ifindex: Some(7),
            dev_addr: MacAddr::new([0x02, 0, 0, 0, 0, 0xff]),
            priority: 5,
            dest_dev: Some("wlan0".to_string()),
        }
    }

    #[test]
    fn test_empty_match_accepts_all() {
        let input = create_test_input();
        assert!(FlowMatch::default().matches(&input, ClassifierType::Sawf));
        assert!(FlowMatch::default().matches(&FlowInput::default(), ClassifierType::Scs));
    }

    #[test]
    fn test_ports_and_ranges() {
        let input = create_test_input();
        let rule = FlowMatch {
            dst_port: Some(443),
            src_port_range: Some(PortRange::new(32768, 60999)),
            ..Default::default()
        };
        assert!(rule.matches(&input, ClassifierType::Sawf));

        let rule = FlowMatch {
            dst_port_range: Some(PortRange::new(444, 500)),
            ..Default::default()
        };
        assert!(!rule.matches(&input, ClassifierType::Sawf));

        let rule = FlowMatch {
            dst_port_range: Some(PortRange::new(443, 443)),
            ..Default::default()
        };
        assert!(rule.matches(&input, ClassifierType::Sawf));
    }

    #[test]
    fn test_ipv4_masks() {
        let input = create_test_input();

        let subnet = FlowMatch {
            src_ipv4: Some(Ipv4Match::masked(
                "192.168.1.0".parse().unwrap(),
                "255.255.255.0".parse().unwrap(),
            )),
            ..Default::default()
        };
        assert!(subnet.matches(&input, ClassifierType::Sawf));

        let zero_mask = FlowMatch {
            dst_ipv4: Some(Ipv4Match::masked(
                "172.16.0.1".parse().unwrap(),
                Ipv4Addr::UNSPECIFIED,
            )),
            ..Default::default()
        };
        assert!(zero_mask.matches(&input, ClassifierType::Sawf));

        let full_mask = FlowMatch {
            dst_ipv4: Some(Ipv4Match::masked(
                "10.0.0.2".parse().unwrap(),
                Ipv4Addr::BROADCAST,
            )),
            ..Default::default()
        };
        assert!(!full_mask.matches(&input, ClassifierType::Sawf));

        // a v4 criterion never matches a v6 flow
        let mut v6 = input.clone();
        v6.dst_ip = Some("2001:db8::1".parse().unwrap());
        assert!(!zero_mask.matches(&v6, ClassifierType::Sawf));
    }

    #[test]
    fn test_ipv6_masks() {
        let mut input = create_test_input();
        input.src_ip = Some("2001:db8:1::10".parse().unwrap());
        input.dst_ip = Some("2001:db8:2::20".parse().unwrap());

        let rule = FlowMatch {
            ip_version: Some(IpVersion::V6),
            src_ipv6: Some(Ipv6Match::masked(
                "2001:db8:1::".parse().unwrap(),
                "ffff:ffff:ffff::".parse().unwrap(),
            )),
            dst_ipv6: Some(Ipv6Match::exact("2001:db8:2::20".parse().unwrap())),
            ..Default::default()
        };
        assert!(rule.matches(&input, ClassifierType::Sawf));

        let v4_only = FlowMatch {
            ip_version: Some(IpVersion::V4),
            ..Default::default()
        };
        assert!(!v4_only.matches(&input, ClassifierType::Sawf));
    }

    #[test]
    fn test_dst_mac_fallback() {
        let mut input = create_test_input();
        input.dst_mac = MacAddr::new([0x0a, 0, 0, 0, 0, 0x09]);

        let rule = FlowMatch {
            dst_mac: Some(input.dev_addr),
            dst_ifindex: Some(7),
            ..Default::default()
        };
        assert!(rule.matches(&input, ClassifierType::Scs));
        assert!(rule.matches(&input, ClassifierType::SawfScs));
        assert!(!rule.matches(&input, ClassifierType::Sawf));

        // fallback needs the rule to carry an interface
        let no_ifindex = FlowMatch {
            dst_ifindex: None,
            ..rule.clone()
        };
        assert!(!no_ifindex.matches(&input, ClassifierType::Scs));

        input.dst_ifindex = Some(8);
        assert!(!rule.matches(&input, ClassifierType::Scs));
    }

    #[test]
    fn test_vlan_fields() {
        let mut input = create_test_input();
        let rule = FlowMatch {
            vlan_pcp: Some(6),
            vlan_id: Some(42),
            ..Default::default()
        };
        assert!(rule.matches(&input, ClassifierType::Sawf));

        input.vlan_tci = None;
        assert!(!rule.matches(&input, ClassifierType::Sawf));
    }

    #[test]
    fn test_spi_pattern() {
        let input = create_test_input();
        let rule = FlowMatch {
            spi: Some(SpiMatch {
                value: 0x1234_0000,
                mask: 0xFFFF_0000,
            }),
            ..Default::default()
        };
        assert!(rule.matches(&input, ClassifierType::Scs));

        let exact = FlowMatch {
            spi: Some(SpiMatch {
                value: 0x1234_0000,
                mask: u32::MAX,
            }),
            ..Default::default()
        };
        assert!(!exact.matches(&input, ClassifierType::Scs));
    }

    #[test]
    fn test_validate() {
        let bad = FlowMatch {
            dst_port_range: Some(PortRange::new(100, 10)),
            ..Default::default()
        };
        assert!(bad.validate().unwrap_err().contains("dst_port_range"));

        let bad_pcp = FlowMatch {
            vlan_pcp: Some(8),
            ..Default::default()
        };
        assert!(bad_pcp.validate().is_err());
        assert!(FlowMatch::default().validate().is_ok());
    }

    #[test]
    fn test_rule_tuple_family_selection() {
        let rule = FlowMatch {
            src_ipv4: Some(Ipv4Match::exact("10.0.0.1".parse().unwrap())),
            dst_ipv4: Some(Ipv4Match::exact("10.0.0.2".parse().unwrap())),
            src_ipv6: Some(Ipv6Match::exact("2001:db8::1".parse().unwrap())),
            src_port: Some(1000),
            dst_port: Some(2000),
            protocol: Some(17),
            ..Default::default()
        };
        let tuple = rule.tuple();
        assert_eq!(tuple.src_addr, [0x0a00_0001, 0, 0, 0]);
        assert_eq!(tuple.dst_addr, [0x0a00_0002, 0, 0, 0]);

        // half a v4 pair leaves the addresses zero
        let partial = FlowMatch {
            src_ipv4: Some(Ipv4Match::exact("10.0.0.1".parse().unwrap())),
            dst_port: Some(53),
            ..Default::default()
        };
        assert_eq!(partial.tuple().src_addr, [0; 4]);
        assert_eq!(partial.tuple().dst_port, 53);
    }

    #[test]
    fn test_input_tuple_matches_rule_tuple() {
        let input = create_test_input();
        let rule = FlowMatch {
            src_ipv4: Some(Ipv4Match::exact("192.168.1.10".parse().unwrap())),
            dst_ipv4: Some(Ipv4Match::exact("10.0.0.1".parse().unwrap())),
            src_port: Some(40000),
            dst_port: Some(443),
            protocol: Some(6),
            ..Default::default()
        };
        assert_eq!(input.tuple(), rule.tuple());
        assert_eq!(input.tuple().hash_key(), rule.tuple().hash_key());
    }

    #[test]
    fn test_display() {
        let rule = FlowMatch {
            dst_port: Some(443),
            src_ipv4: Some(Ipv4Match::masked(
                "192.168.1.0".parse().unwrap(),
                "255.255.255.0".parse().unwrap(),
            )),
            ..Default::default()
        };
        assert_eq!(rule.to_string(), "sip=192.168.1.0/255.255.255.0 dport=443");
        assert_eq!(FlowMatch::default().to_string(), "any");
    }
}
