//! Rule definitions: identity, match criteria and outputs.

use serde::{Deserialize, Serialize};
use spm_core::error::UpdateError;
use spm_core::types::{
    AeType, ClassifierType, INVALID_RULE_ID, MAX_PRECEDENCE, NO_MATCH, USE_DSCP, USE_UP,
};
use spm_plugin_api::WlanParams;
use std::fmt;

use crate::fast_path::FlowTuple;
use crate::flow::FlowMatch;
use crate::mesh::MeshMatch;

/// How a rule's output priority is turned into a PCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputAction {
    /// Literal PCP value `0..=7`
    Pcp(u8),
    /// Reuse the priority already on the frame
    UseUp,
    /// Derive the PCP from the IP DS field
    UseDscp,
}

impl OutputAction {
    /// Decodes an output code; `None` for codes at or above `NO_MATCH`.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0..=7 => Some(OutputAction::Pcp(code)),
            USE_UP => Some(OutputAction::UseUp),
            USE_DSCP => Some(OutputAction::UseDscp),
            _ => None,
        }
    }
}

/// Values a matching rule hands back to the caller.
///
/// Absent optional fields are reported as the invalid sentinel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOutput {
    /// Output action code (`0..=7`, `USE_UP` or `USE_DSCP`)
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dscp_remark: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan_pcp_remark: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_class_id: Option<u8>,
    /// Size at which IPv4 fragmentation starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_frag_thresh: Option<u16>,
    #[serde(default)]
    pub ae_type: AeType,
}

impl RuleOutput {
    pub fn priority(priority: u8) -> Self {
        Self {
            priority,
            dscp_remark: None,
            vlan_pcp_remark: None,
            service_class_id: None,
            ipv4_frag_thresh: None,
            ae_type: AeType::Default,
        }
    }

    pub fn action(&self) -> Option<OutputAction> {
        OutputAction::from_code(self.priority)
    }
}

impl Default for RuleOutput {
    fn default() -> Self {
        Self::priority(USE_DSCP)
    }
}

/// WiFi scheduling hints looked up per frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyParams {
    /// Downlink service interval in milliseconds
    pub service_interval_dl: u8,
    /// Downlink burst size in bytes
    pub burst_size_dl: u32,
    pub service_interval_ul: u8,
    pub burst_size_ul: u32,
}

impl LatencyParams {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// MSCS admission parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MscsParams {
    /// TIDs eligible for the rule, one bit per TID; zero never matches
    pub tid_bitmap: u8,
    #[serde(default)]
    pub priority_limit: u8,
}

/// A classification rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Caller-assigned identifier; flow-keyed rules may leave it invalid
    #[serde(default = "default_rule_id")]
    pub id: u32,
    pub classifier: ClassifierType,
    /// Higher values are evaluated first; 255 is stored as 0
    #[serde(default)]
    pub precedence: u8,
    #[serde(default)]
    pub mesh: MeshMatch,
    #[serde(default)]
    pub flow: FlowMatch,
    #[serde(default)]
    pub output: RuleOutput,
    #[serde(default, skip_serializing_if = "LatencyParams::is_zero")]
    pub latency: LatencyParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mscs: Option<MscsParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wlan: Option<WlanParams>,
}

fn default_rule_id() -> u32 {
    INVALID_RULE_ID
}

impl Rule {
    /// Creates a rule that matches everything and leaves the priority to
    /// the DS field.
    pub fn new(id: u32, classifier: ClassifierType) -> Self {
        Self {
            id,
            classifier,
            precedence: 0,
            mesh: MeshMatch::default(),
            flow: FlowMatch::default(),
            output: RuleOutput::default(),
            latency: LatencyParams::default(),
            mscs: None,
            wlan: None,
        }
    }

    pub fn with_precedence(mut self, precedence: u8) -> Self {
        self.precedence = precedence;
        self
    }

    pub fn with_mesh(mut self, mesh: MeshMatch) -> Self {
        self.mesh = mesh;
        self
    }

    pub fn with_flow(mut self, flow: FlowMatch) -> Self {
        self.flow = flow;
        self
    }

    pub fn with_output(mut self, output: RuleOutput) -> Self {
        self.output = output;
        self
    }

    /// Sets only the output action code.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.output.priority = priority;
        self
    }

    pub fn with_latency(mut self, latency: LatencyParams) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_mscs(mut self, mscs: MscsParams) -> Self {
        self.mscs = Some(mscs);
        self
    }

    pub fn with_wlan(mut self, wlan: WlanParams) -> Self {
        self.wlan = Some(wlan);
        self
    }

    /// Precedence bucket the rule lives in.
    #[inline]
    pub fn bucket(&self) -> usize {
        if usize::from(self.precedence) >= MAX_PRECEDENCE {
            0
        } else {
            usize::from(self.precedence)
        }
    }

    /// Tuple keying a flow-keyed rule, `None` for every other family.
    pub fn flow_tuple(&self) -> Option<FlowTuple> {
        self.classifier
            .is_flow_keyed()
            .then(|| self.flow.tuple())
    }

    /// Returns true when the rule defers its match to the wireless plugin.
    pub fn is_wlan(&self) -> bool {
        self.classifier == ClassifierType::Sawf && self.wlan.is_some()
    }

    /// Checks everything that can be checked without the table.
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.output.priority >= NO_MATCH {
            return Err(UpdateError::invalid_entry(format!(
                "output {} is not a valid action",
                self.output.priority
            )));
        }

        if let Some(pcp) = self.output.vlan_pcp_remark {
            if pcp > 7 {
                return Err(UpdateError::invalid_entry(format!(
                    "vlan_pcp_remark {} is out of range",
                    pcp
                )));
            }
        }

        self.flow.validate().map_err(UpdateError::invalid_entry)?;

        if let Some(wlan) = &self.wlan {
            wlan.validate()
                .map_err(|e| UpdateError::invalid_entry(e.to_string()))?;
        }

        Ok(())
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.id == INVALID_RULE_ID {
            write!(f, "rule - ")?;
        } else {
            write!(f, "rule {} ", self.id)?;
        }
        write!(f, "[{}] prec {} ", self.classifier, self.precedence)?;

        match self.classifier {
            ClassifierType::Mesh => write!(f, "match {{{}}}", self.mesh)?,
            _ => write!(f, "match {{{}}}", self.flow)?,
        }

        write!(f, " -> out {}", self.output.priority)?;
        if let Some(dscp) = self.output.dscp_remark {
            write!(f, " dscp {}", dscp)?;
        }
        if let Some(pcp) = self.output.vlan_pcp_remark {
            write!(f, " pcp {}", pcp)?;
        }
        if let Some(scid) = self.output.service_class_id {
            write!(f, " scid {}", scid)?;
        }
        if let Some(thresh) = self.output.ipv4_frag_thresh {
            write!(f, " frag {}", thresh)?;
        }
        if self.output.ae_type != AeType::Default {
            write!(f, " ae {}", self.output.ae_type)?;
        }
        if let Some(mscs) = self.mscs {
            write!(f, " tids {:#04x}", mscs.tid_bitmap)?;
        }
        if let Some(wlan) = &self.wlan {
            write!(f, " wlan ssid '{}'", wlan.ssid)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::PortRange;
    use crate::mesh::MeshCriterion;
    use spm_core::types::MAX_SSID_LEN;

    #[test]
    fn test_output_action() {
        assert_eq!(OutputAction::from_code(0), Some(OutputAction::Pcp(0)));
        assert_eq!(OutputAction::from_code(7), Some(OutputAction::Pcp(7)));
        assert_eq!(OutputAction::from_code(USE_UP), Some(OutputAction::UseUp));
        assert_eq!(OutputAction::from_code(USE_DSCP), Some(OutputAction::UseDscp));
        assert_eq!(OutputAction::from_code(NO_MATCH), None);
    }

    #[test]
    fn test_bucket_normalization() {
        let rule = Rule::new(1, ClassifierType::Mesh).with_precedence(255);
        assert_eq!(rule.bucket(), 0);
        assert_eq!(rule.with_precedence(254).bucket(), 254);
    }

    #[test]
    fn test_validate_output() {
        let rule = Rule::new(1, ClassifierType::Mesh).with_priority(NO_MATCH);
        assert!(matches!(
            rule.validate(),
            Err(UpdateError::InvalidEntry { .. })
        ));
        assert!(rule.with_priority(USE_UP).validate().is_ok());
    }

    #[test]
    fn test_validate_flow_and_wlan() {
        let bad_range = Rule::new(2, ClassifierType::Sawf).with_flow(FlowMatch {
            src_port_range: Some(PortRange::new(9, 1)),
            ..Default::default()
        });
        assert!(bad_range.validate().is_err());

        let bad_ssid = Rule::new(3, ClassifierType::Sawf).with_wlan(WlanParams {
            ssid: "s".repeat(MAX_SSID_LEN + 1),
            ..Default::default()
        });
        assert!(bad_ssid.validate().is_err());
    }

    #[test]
    fn test_flow_tuple_only_for_ifli() {
        let flow = FlowMatch {
            dst_port: Some(80),
            ..Default::default()
        };
        let scs = Rule::new(1, ClassifierType::Scs).with_flow(flow.clone());
        assert!(scs.flow_tuple().is_none());

        let ifli = Rule::new(INVALID_RULE_ID, ClassifierType::Ifli).with_flow(flow);
        assert_eq!(ifli.flow_tuple().map(|t| t.dst_port), Some(80));
    }

    #[test]
    fn test_display() {
        let rule = Rule::new(7, ClassifierType::Mesh)
            .with_precedence(3)
            .with_mesh(MeshMatch::default().with(MeshCriterion::UserPriority(1)))
            .with_priority(5);
        assert_eq!(rule.to_string(), "rule 7 [mesh] prec 3 match {up=1} -> out 5");

        let ifli = Rule::new(INVALID_RULE_ID, ClassifierType::Ifli);
        assert!(ifli.to_string().starts_with("rule - [ifli]"));
    }

    #[test]
    fn test_rule_from_yaml() {
        let yaml = r#"
id: 5
classifier: scs
precedence: 4
flow:
  dst_port: 443
  protocol: 6
output:
  priority: 6
  service_class_id: 12
  ae_type: sfe
"#;
        let rule: Rule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.classifier, ClassifierType::Scs);
        assert_eq!(rule.flow.dst_port, Some(443));
        assert_eq!(rule.output.priority, 6);
        assert_eq!(rule.output.ae_type, AeType::Sfe);
        assert!(rule.wlan.is_none());

        let minimal: Rule = serde_yaml::from_str("classifier: ifli").unwrap();
        assert_eq!(minimal.id, INVALID_RULE_ID);
        assert_eq!(minimal.output.priority, USE_DSCP);
    }
}
