//! Classification entry points.
//!
//! Every lookup works on one snapshot loaded at entry, so a concurrent
//! mutation is seen either entirely or not at all.

use serde::{Deserialize, Serialize};
use spm_core::types::{
    AeType, ClassifierType, INVALID_OUTPUT, INVALID_PRIORITY, INVALID_RULE_ID, USE_DSCP,
};
use spm_plugin_api::WifiMetadata;
use tracing::trace;

use crate::fast_path::flow_hash;
use crate::flow::FlowInput;
use crate::mesh::Frame;
use crate::rule::{LatencyParams, OutputAction};
use crate::snapshot::{RuleNode, Snapshot};
use crate::table::RuleTable;

/// Outcome of a structured-flow lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SawfDecision {
    /// Output action code of the matching rule, `USE_DSCP` on a miss
    pub priority: u8,
    pub dscp_remark: Option<u8>,
    pub vlan_pcp_remark: Option<u8>,
    pub service_class_id: Option<u8>,
    pub ipv4_frag_thresh: Option<u16>,
    pub rule_id: Option<u32>,
    pub ae_type: AeType,
    /// Family that produced the decision, `None` on a miss
    pub rule_type: Option<ClassifierType>,
    /// Flow hash of a matching flow-keyed rule
    pub key: Option<u32>,
}

impl SawfDecision {
    /// The decision reported when nothing matched.
    pub fn no_match() -> Self {
        Self {
            priority: USE_DSCP,
            dscp_remark: None,
            vlan_pcp_remark: None,
            service_class_id: None,
            ipv4_frag_thresh: None,
            rule_id: None,
            ae_type: AeType::Default,
            rule_type: None,
            key: None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.rule_type.is_some()
    }

    /// Rule id with the invalid sentinel for a miss.
    pub fn wire_rule_id(&self) -> u32 {
        self.rule_id.unwrap_or(INVALID_RULE_ID)
    }

    pub fn wire_dscp_remark(&self) -> u8 {
        self.dscp_remark.unwrap_or(INVALID_OUTPUT)
    }

    pub fn wire_vlan_pcp_remark(&self) -> u8 {
        self.vlan_pcp_remark.unwrap_or(INVALID_OUTPUT)
    }

    pub fn wire_service_class_id(&self) -> u8 {
        self.service_class_id.unwrap_or(INVALID_OUTPUT)
    }
}

impl Default for SawfDecision {
    fn default() -> Self {
        Self::no_match()
    }
}

/// Outcome of an SCS or MSCS lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityDecision {
    pub priority: Option<u8>,
    pub rule_id: Option<u32>,
}

impl PriorityDecision {
    fn hit(priority: u8, rule_id: u32) -> Self {
        Self {
            priority: Some(priority),
            rule_id: Some(rule_id),
        }
    }

    /// Priority with the invalid sentinel for a miss.
    pub fn wire_priority(&self) -> u8 {
        self.priority.unwrap_or(INVALID_PRIORITY)
    }

    pub fn wire_rule_id(&self) -> u32 {
        self.rule_id.unwrap_or(INVALID_RULE_ID)
    }
}

/// A request for the unified [`RuleTable::classify`] entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifyInput {
    /// Mesh PCP for a frame
    Frame(Frame),
    /// WiFi latency parameters for a frame
    Latency(Frame),
    /// SAWF, then SCS, then IFLI
    Sawf(FlowInput),
    Scs(FlowInput),
    Mscs(FlowInput),
}

/// Result of [`RuleTable::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Pcp(u8),
    Latency(LatencyParams),
    Sawf(SawfDecision),
    Priority(PriorityDecision),
}

impl RuleTable {
    /// Dispatches to the lookup matching the input kind.
    pub fn classify(&self, input: &ClassifyInput) -> Decision {
        match input {
            ClassifyInput::Frame(frame) => Decision::Pcp(self.classify_frame(frame)),
            ClassifyInput::Latency(frame) => Decision::Latency(self.wlan_latency_params(frame)),
            ClassifyInput::Sawf(flow) => Decision::Sawf(self.classify_flow(flow)),
            ClassifyInput::Scs(flow) => Decision::Priority(self.classify_scs(flow)),
            ClassifyInput::Mscs(flow) => Decision::Priority(self.classify_mscs(flow)),
        }
    }

    /// PCP for a frame on the mesh path.
    pub fn classify_frame(&self, frame: &Frame) -> u8 {
        let snapshot = self.load();
        let node = first_mesh_match(&snapshot, frame);
        self.metrics
            .record_lookup(ClassifierType::Mesh, node.is_some());

        // An empty table behaves like a rule with output USE_DSCP.
        let action = match node {
            Some(node) => node.rule.output.action(),
            None if snapshot.is_empty() => Some(OutputAction::UseDscp),
            None => None,
        };

        let default_pcp = self.config().default_pcp;
        let pcp = match action {
            Some(OutputAction::Pcp(pcp)) => pcp,
            Some(OutputAction::UseUp) => frame.priority,
            Some(OutputAction::UseDscp) => frame.l3.dscp_pcp().unwrap_or(default_pcp),
            None => default_pcp,
        };

        trace!(
            rule_id = node.map(|n| n.rule.id),
            pcp,
            "Mesh frame classified"
        );
        pcp
    }

    /// Service intervals and burst sizes of the first matching mesh rule,
    /// zeros when none matches.
    pub fn wlan_latency_params(&self, frame: &Frame) -> LatencyParams {
        let snapshot = self.load();
        first_mesh_match(&snapshot, frame)
            .map(|n| n.rule.latency)
            .unwrap_or_default()
    }

    /// Structured-flow lookup: SAWF rules first, then SCS and SAWF-SCS
    /// rules, then the flow-keyed rules.
    ///
    /// A flow without a destination device is never classified.
    pub fn classify_flow(&self, input: &FlowInput) -> SawfDecision {
        let snapshot = self.load();
        if input.dest_dev.is_none() || snapshot.is_empty() {
            return SawfDecision::no_match();
        }

        let decision = self
            .sawf_pass(&snapshot, input)
            .or_else(|| scs_pass(&snapshot, input))
            .or_else(|| ifli_pass(&snapshot, input))
            .unwrap_or_default();

        self.metrics.record_lookup(
            decision.rule_type.unwrap_or(ClassifierType::Sawf),
            decision.is_match(),
        );
        trace!(
            rule_id = decision.rule_id,
            rule_type = ClassifierType::name_of(decision.rule_type),
            priority = decision.priority,
            "Flow classified"
        );
        decision
    }

    fn sawf_pass(&self, snapshot: &Snapshot, input: &FlowInput) -> Option<SawfDecision> {
        snapshot
            .iter_family(ClassifierType::Sawf)
            .find(|node| match &node.rule.wlan {
                // the plugin decides alone; no plugin, no match
                Some(wlan) => {
                    let metadata = WifiMetadata::for_flow(
                        wlan,
                        input.dst_mac,
                        input.dscp,
                        input.vlan_pcp(),
                        input.dest_dev.as_deref(),
                    );
                    self.plugins().query(&metadata).unwrap_or(false)
                }
                None => node.rule.flow.matches(input, ClassifierType::Sawf),
            })
            .map(|node| {
                let out = &node.rule.output;
                SawfDecision {
                    priority: out.priority,
                    dscp_remark: out.dscp_remark,
                    vlan_pcp_remark: out.vlan_pcp_remark,
                    service_class_id: out.service_class_id,
                    ipv4_frag_thresh: out.ipv4_frag_thresh,
                    rule_id: Some(node.rule.id),
                    ae_type: out.ae_type,
                    rule_type: Some(ClassifierType::Sawf),
                    key: None,
                }
            })
    }

    /// SCS lookup: the output code of the first matching SCS rule.
    pub fn classify_scs(&self, input: &FlowInput) -> PriorityDecision {
        let snapshot = self.load();
        let decision = snapshot
            .iter_family(ClassifierType::Scs)
            .find(|node| node.rule.flow.matches(input, ClassifierType::Scs))
            .map(|node| PriorityDecision::hit(node.rule.output.priority, node.rule.id))
            .unwrap_or_default();

        self.metrics
            .record_lookup(ClassifierType::Scs, decision.priority.is_some());
        decision
    }

    /// MSCS lookup: admits the flow's own priority when a matching rule
    /// lists it in its TID bitmap.
    pub fn classify_mscs(&self, input: &FlowInput) -> PriorityDecision {
        let snapshot = self.load();
        let decision = snapshot
            .iter_family(ClassifierType::Mscs)
            .find(|node| {
                node.rule.flow.matches(input, ClassifierType::Mscs)
                    && node
                        .rule
                        .mscs
                        .is_some_and(|mscs| tid_allowed(mscs.tid_bitmap, input.priority))
            })
            .map(|node| PriorityDecision::hit(input.priority, node.rule.id))
            .unwrap_or_default();

        self.metrics
            .record_lookup(ClassifierType::Mscs, decision.priority.is_some());
        decision
    }
}

fn first_mesh_match<'a>(snapshot: &'a Snapshot, frame: &Frame) -> Option<&'a RuleNode> {
    snapshot
        .iter_family(ClassifierType::Mesh)
        .find(|node| node.rule.mesh.matches(frame))
        .map(|node| node.as_ref())
}

fn scs_pass(snapshot: &Snapshot, input: &FlowInput) -> Option<SawfDecision> {
    snapshot
        .iter()
        .filter(|node| node.rule.classifier.is_scs_like())
        .find(|node| node.rule.flow.matches(input, node.rule.classifier))
        .map(|node| {
            let out = &node.rule.output;
            SawfDecision {
                priority: out.priority,
                dscp_remark: out.dscp_remark,
                vlan_pcp_remark: out.vlan_pcp_remark,
                service_class_id: out.service_class_id,
                rule_id: Some(node.rule.id),
                rule_type: Some(ClassifierType::SawfScs),
                ..SawfDecision::no_match()
            }
        })
}

fn ifli_pass(snapshot: &Snapshot, input: &FlowInput) -> Option<SawfDecision> {
    let hash = flow_hash(&input.tuple());
    snapshot
        .flow_chain(hash)
        .find(|node| node.rule.flow.matches(input, ClassifierType::Ifli))
        .map(|node| {
            let out = &node.rule.output;
            SawfDecision {
                priority: out.priority,
                dscp_remark: out.dscp_remark,
                service_class_id: out.service_class_id,
                rule_id: Some(node.rule.id),
                ae_type: out.ae_type,
                rule_type: Some(ClassifierType::Ifli),
                key: Some(node.key),
                ..SawfDecision::no_match()
            }
        })
}

#[inline]
fn tid_allowed(bitmap: u8, tid: u8) -> bool {
    bitmap != 0
        && 1u32
            .checked_shl(u32::from(tid))
            .is_some_and(|bit| bit & u32::from(bitmap) != 0)
}
