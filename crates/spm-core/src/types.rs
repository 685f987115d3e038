//! Core types shared by the rule table, the matchers and the plugin boundary.
//!
//! This module defines the classifier families, hardware addresses, radio
//! descriptors and the sentinel values that travel across the administrative
//! surface.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Number of precedence buckets. Valid precedences are `0..MAX_PRECEDENCE`.
pub const MAX_PRECEDENCE: usize = 255;

/// Size of the flow hash table. Keys are reduced with `FLOW_HASH_BUCKETS - 1`.
pub const FLOW_HASH_BUCKETS: u32 = 255;

/// Default rule table capacity.
pub const DEFAULT_MAX_RULES: usize = 1024;

/// Output code: take the priority carried by the frame itself.
pub const USE_UP: u8 = 8;

/// Output code: derive the priority from the DSCP field.
pub const USE_DSCP: u8 = 9;

/// First invalid output code. Also used internally for "nothing matched".
pub const NO_MATCH: u8 = 10;

/// Default PCP applied when nothing else decides.
pub const DEFAULT_PCP: u8 = 0;

/// Sentinel rule id for flow-keyed rules installed without a caller id.
pub const INVALID_RULE_ID: u32 = 0xFFFF_FFFF;

/// Priority reported by the SCS and MSCS entry points when no rule matched.
pub const INVALID_PRIORITY: u8 = 0xFF;

/// Raw sentinel for service class id, DSCP remark and PCP remark outputs.
pub const INVALID_OUTPUT: u8 = 0xFF;

/// Maximum number of radio descriptors on a multi-link rule.
pub const MAX_RADIOS: usize = 7;

/// Maximum SSID length in bytes.
pub const MAX_SSID_LEN: usize = 32;

/// IP protocol number for TCP.
pub const IPPROTO_TCP: u8 = 6;

/// IP protocol number for UDP.
pub const IPPROTO_UDP: u8 = 17;

/// An IEEE 802 MAC address.
///
/// Parsed from and rendered as colon separated hex (`00:11:22:33:44:55`).
///
/// # Examples
///
/// ```
/// use spm_core::types::MacAddr;
///
/// let mac: MacAddr = "00:11:22:aa:bb:cc".parse().unwrap();
/// assert_eq!(mac.octets()[3], 0xaa);
/// assert_eq!(mac.to_string(), "00:11:22:aa:bb:cc");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    /// The all-zero address.
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    /// Creates an address from raw octets.
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Returns the raw octets.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Returns true for the all-zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);

        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| format!("MAC address too short: {}", s))?;
            if part.len() != 2 {
                return Err(format!("Invalid MAC octet '{}' in {}", part, s));
            }
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| format!("Invalid MAC octet '{}' in {}", part, s))?;
        }

        if parts.next().is_some() {
            return Err(format!("MAC address too long: {}", s));
        }

        Ok(Self(octets))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Rule family. Determines which matcher and which storage key apply.
///
/// Wire code `0` is reserved for "invalid" and has no variant here; use
/// [`ClassifierType::from_code`] to decode untrusted input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierType {
    /// Raw-frame rules used by the mesh prioritization path
    Mesh,
    /// Service-aware WiFi rules
    Sawf,
    /// Legacy stream classification service rules
    Scs,
    /// Mirrored stream classification service rules
    Mscs,
    /// SCS rules installed through the SAWF path
    SawfScs,
    /// Flow-keyed rules located by 5-tuple hash
    Ifli,
}

impl ClassifierType {
    /// All valid classifier types in wire-code order.
    pub const ALL: [ClassifierType; 6] = [
        ClassifierType::Mesh,
        ClassifierType::Sawf,
        ClassifierType::Scs,
        ClassifierType::Mscs,
        ClassifierType::SawfScs,
        ClassifierType::Ifli,
    ];

    /// Decodes a wire code. Returns `None` for `0` and anything past `Ifli`.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ClassifierType::Mesh),
            2 => Some(ClassifierType::Sawf),
            3 => Some(ClassifierType::Scs),
            4 => Some(ClassifierType::Mscs),
            5 => Some(ClassifierType::SawfScs),
            6 => Some(ClassifierType::Ifli),
            _ => None,
        }
    }

    /// Returns the wire code.
    pub fn code(&self) -> u8 {
        match self {
            ClassifierType::Mesh => 1,
            ClassifierType::Sawf => 2,
            ClassifierType::Scs => 3,
            ClassifierType::Mscs => 4,
            ClassifierType::SawfScs => 5,
            ClassifierType::Ifli => 6,
        }
    }

    /// Short lowercase name, as used in dumps and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassifierType::Mesh => "mesh",
            ClassifierType::Sawf => "sawf",
            ClassifierType::Scs => "scs",
            ClassifierType::Mscs => "mscs",
            ClassifierType::SawfScs => "sawf_scs",
            ClassifierType::Ifli => "ifli",
        }
    }

    /// Name for an optional type, `"none"` when absent.
    pub fn name_of(classifier: Option<ClassifierType>) -> &'static str {
        classifier.map_or("none", |c| c.as_str())
    }

    /// Returns true for rules keyed by their own 5-tuple.
    pub fn is_flow_keyed(&self) -> bool {
        matches!(self, ClassifierType::Ifli)
    }

    /// Returns true for types that get the interface-address fallback on a
    /// destination MAC mismatch.
    pub fn is_scs_like(&self) -> bool {
        matches!(self, ClassifierType::Scs | ClassifierType::SawfScs)
    }
}

impl fmt::Display for ClassifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassifierType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ClassifierType::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown classifier type: {}", s))
    }
}

/// Acceleration engine hint attached to a rule's outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AeType {
    #[default]
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "ppe")]
    Ppe,
    #[serde(rename = "sfe")]
    Sfe,
    #[serde(rename = "ppe-ds")]
    PpeDs,
    #[serde(rename = "ppe-vp")]
    PpeVp,
    #[serde(rename = "none")]
    None,
}

impl AeType {
    /// Decodes a wire code; unknown codes map to `Default`.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => AeType::Ppe,
            2 => AeType::Sfe,
            3 => AeType::PpeDs,
            4 => AeType::PpeVp,
            5 => AeType::None,
            _ => AeType::Default,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AeType::Default => "default",
            AeType::Ppe => "ppe",
            AeType::Sfe => "sfe",
            AeType::PpeDs => "ppe-ds",
            AeType::PpeVp => "ppe-vp",
            AeType::None => "none",
        }
    }
}

impl fmt::Display for AeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IP version selector carried by flow rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpVersion {
    #[serde(rename = "4")]
    V4,
    #[serde(rename = "6")]
    V6,
}

impl IpVersion {
    /// Decodes the numeric form (`4` or `6`).
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            4 => Some(IpVersion::V4),
            6 => Some(IpVersion::V6),
            _ => None,
        }
    }

    pub fn number(&self) -> u8 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }
}

/// Radio band of one link in a multi-link rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RadioBand {
    #[serde(rename = "2G")]
    Band2G,
    #[serde(rename = "5G")]
    Band5G,
    #[serde(rename = "5GH")]
    Band5GHigh,
    #[serde(rename = "5GL")]
    Band5GLow,
    #[serde(rename = "6G")]
    Band6G,
}

impl RadioBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            RadioBand::Band2G => "2G",
            RadioBand::Band5G => "5G",
            RadioBand::Band5GHigh => "5GH",
            RadioBand::Band5GLow => "5GL",
            RadioBand::Band6G => "6G",
        }
    }

    /// Index of this band in per-band arrays (`0` is the invalid slot).
    pub fn index(&self) -> usize {
        match self {
            RadioBand::Band2G => 1,
            RadioBand::Band5G => 2,
            RadioBand::Band5GHigh => 3,
            RadioBand::Band5GLow => 4,
            RadioBand::Band6G => 5,
        }
    }
}

impl fmt::Display for RadioBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RadioBand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            RadioBand::Band2G,
            RadioBand::Band5G,
            RadioBand::Band5GHigh,
            RadioBand::Band5GLow,
            RadioBand::Band6G,
        ]
        .into_iter()
        .find(|b| b.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| format!("Unknown radio band: {}", s))
    }
}

/// Channel width of one link in a multi-link rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RadioBandwidth {
    #[serde(rename = "20")]
    Mhz20,
    #[serde(rename = "40")]
    Mhz40,
    #[serde(rename = "80")]
    Mhz80,
    #[serde(rename = "160")]
    Mhz160,
    #[serde(rename = "80_80")]
    Mhz80Plus80,
}

impl RadioBandwidth {
    pub fn as_str(&self) -> &'static str {
        match self {
            RadioBandwidth::Mhz20 => "20",
            RadioBandwidth::Mhz40 => "40",
            RadioBandwidth::Mhz80 => "80",
            RadioBandwidth::Mhz160 => "160",
            RadioBandwidth::Mhz80Plus80 => "80_80",
        }
    }

    /// Wire code (`0` is the invalid value).
    pub fn code(&self) -> u8 {
        match self {
            RadioBandwidth::Mhz20 => 1,
            RadioBandwidth::Mhz40 => 2,
            RadioBandwidth::Mhz80 => 3,
            RadioBandwidth::Mhz160 => 4,
            RadioBandwidth::Mhz80Plus80 => 5,
        }
    }
}

impl fmt::Display for RadioBandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RadioBandwidth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            RadioBandwidth::Mhz20,
            RadioBandwidth::Mhz40,
            RadioBandwidth::Mhz80,
            RadioBandwidth::Mhz160,
            RadioBandwidth::Mhz80Plus80,
        ]
        .into_iter()
        .find(|b| b.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| format!("Unknown radio bandwidth: {}", s))
    }
}

/// How a list of radio constraints combines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Any listed value may match
    #[default]
    Or,
    /// Every listed value must match
    And,
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMode::Or => write!(f, "OR"),
            MatchMode::And => write!(f, "AND"),
        }
    }
}
