//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use spm_core::types::{ClassifierType, MacAddr, INVALID_RULE_ID, IPPROTO_TCP, IPPROTO_UDP};
use spm_mapdb::flow::{FlowInput, FlowMatch, Ipv4Match};
use spm_mapdb::mesh::{Frame, Ipv4Header, L3Header};
use spm_mapdb::notifier::{ChangeKind, RuleEvent};
use spm_mapdb::{Rule, RuleObserver};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

/// Get the path to test fixtures
pub fn fixtures_dir() -> PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    PathBuf::from(manifest_dir).join("tests").join("fixtures")
}

pub fn rules_fixture() -> PathBuf {
    fixtures_dir().join("rules.yaml")
}

pub fn requests_fixture() -> PathBuf {
    fixtures_dir().join("requests.yaml")
}

/// SCS rule matching a destination port.
pub fn scs_port_rule(id: u32, precedence: u8, dst_port: u16, output: u8) -> Rule {
    Rule::new(id, ClassifierType::Scs)
        .with_precedence(precedence)
        .with_flow(FlowMatch {
            dst_port: Some(dst_port),
            ..Default::default()
        })
        .with_priority(output)
}

/// Flow-keyed rule for an exact IPv4 5-tuple.
pub fn ifli_rule(src: [u8; 4], src_port: u16, dst: [u8; 4], dst_port: u16, protocol: u8) -> Rule {
    Rule::new(INVALID_RULE_ID, ClassifierType::Ifli).with_flow(FlowMatch {
        src_ipv4: Some(Ipv4Match::exact(Ipv4Addr::from(src))),
        dst_ipv4: Some(Ipv4Match::exact(Ipv4Addr::from(dst))),
        src_port: Some(src_port),
        dst_port: Some(dst_port),
        protocol: Some(protocol),
        ..Default::default()
    })
}

/// A TCP flow headed for `dst_port`, with a destination device set.
pub fn tcp_flow(dst_port: u16) -> FlowInput {
    FlowInput {
        src_mac: MacAddr::new([0x02, 0, 0, 0, 0, 0x01]),
        dst_mac: MacAddr::new([0x02, 0, 0, 0, 0, 0x02]),
        src_ip: Some("192.168.1.10".parse().unwrap()),
        dst_ip: Some("10.0.0.1".parse().unwrap()),
        src_port: 40000,
        dst_port,
        protocol: IPPROTO_TCP,
        dest_dev: Some("wlan0".to_string()),
        ..Default::default()
    }
}

/// A UDP flow for an exact IPv4 5-tuple.
pub fn udp_flow(src: [u8; 4], src_port: u16, dst: [u8; 4], dst_port: u16) -> FlowInput {
    FlowInput {
        src_ip: Some(Ipv4Addr::from(src).into()),
        dst_ip: Some(Ipv4Addr::from(dst).into()),
        src_port,
        dst_port,
        protocol: IPPROTO_UDP,
        dest_dev: Some("wlan0".to_string()),
        ..Default::default()
    }
}

/// An IPv4 UDP frame.
pub fn ipv4_frame(priority: u8, dsfield: u8, dst_port: u16) -> Frame {
    Frame {
        priority,
        src_mac: MacAddr::new([0x02, 0, 0, 0, 0, 0x0a]),
        dst_mac: MacAddr::new([0x02, 0, 0, 0, 0, 0x0b]),
        vlan_tci: None,
        l3: L3Header::Ipv4(Ipv4Header {
            src: Ipv4Addr::new(10, 1, 0, 1),
            dst: Ipv4Addr::new(10, 1, 0, 2),
            dsfield,
            protocol: IPPROTO_UDP,
            src_port: 50000,
            dst_port,
        }),
    }
}

/// Observer that records every event it sees.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<(ChangeKind, u32)>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `(kind, rule id)` pairs in delivery order.
    pub fn events(&self) -> Vec<(ChangeKind, u32)> {
        self.events.lock().clone()
    }
}

impl RuleObserver for RecordingObserver {
    fn on_change(&self, event: &RuleEvent) {
        self.events.lock().push((event.kind, event.rule.id));
    }
}
