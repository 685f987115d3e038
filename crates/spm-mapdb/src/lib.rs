//! Service prioritization rule table and classification engine
//!
//! This crate holds the rules that map traffic to a priority, remark or
//! service class, and answers per-packet lookups against them:
//!
//! - Mesh rules matching raw frames by user priority, MAC, VLAN and IPv4 fields
//! - Structured flow rules for the SAWF, SCS, MSCS and SAWF-SCS families
//! - Flow-keyed (IFLI) rules located through a 5-tuple hash
//! - Precedence ordering with insertion order as the tie-breaker
//! - Change notification for observers and YAML rule sets for start-up
//!
//! # Concurrency
//!
//! Lookups never block. Every lookup loads one immutable snapshot and works
//! on it until it returns; writers build a new snapshot and publish it
//! atomically. Only one writer may be active at a time and a second one is
//! rejected instead of waiting.
//!
//! # Examples
//!
//! ## Mesh classification
//!
//! ```rust
//! use spm_core::types::{ClassifierType, USE_UP};
//! use spm_mapdb::mesh::{Frame, MeshCriterion, MeshMatch};
//! use spm_mapdb::{Rule, RuleTable};
//!
//! let table = RuleTable::default();
//! table
//!     .add(
//!         Rule::new(1, ClassifierType::Mesh)
//!             .with_precedence(5)
//!             .with_mesh(MeshMatch::default().with(MeshCriterion::UserPriority(3)))
//!             .with_priority(6),
//!     )
//!     .unwrap();
//! table
//!     .add(Rule::new(2, ClassifierType::Mesh).with_mesh(MeshMatch::always()).with_priority(USE_UP))
//!     .unwrap();
//!
//! let voice = Frame { priority: 3, ..Default::default() };
//! assert_eq!(table.classify_frame(&voice), 6);
//!
//! let other = Frame { priority: 1, ..Default::default() };
//! assert_eq!(table.classify_frame(&other), 1);
//! ```
//!
//! ## SCS lookup
//!
//! ```rust
//! use spm_core::types::ClassifierType;
//! use spm_mapdb::flow::{FlowInput, FlowMatch};
//! use spm_mapdb::{Rule, RuleTable};
//!
//! let table = RuleTable::default();
//! let rule = Rule::new(5, ClassifierType::Scs)
//!     .with_flow(FlowMatch { dst_port: Some(443), ..Default::default() })
//!     .with_priority(6);
//! table.add(rule).unwrap();
//!
//! let input = FlowInput { dst_port: 443, ..Default::default() };
//! let decision = table.classify_scs(&input);
//! assert_eq!(decision.priority, Some(6));
//! assert_eq!(decision.rule_id, Some(5));
//! ```
//!
//! ## Rule sets from YAML
//!
//! ```yaml
//! rules:
//!   - id: 1
//!     classifier: mesh
//!     precedence: 10
//!     mesh:
//!       predicates:
//!         - criterion: { dest_port: 5060 }
//!     output:
//!       priority: 6
//! ```

pub mod admin;
pub mod config;
pub mod fast_path;
pub mod flow;
pub mod lookup;
pub mod mesh;
pub mod metrics;
pub mod notifier;
pub mod rule;
pub mod snapshot;
pub mod table;

// Re-export commonly used types
pub use admin::{AdminCommand, RuleRequest, RuleStatus};
pub use config::{ApplySummary, RuleConfig, RuleSet};
pub use fast_path::FlowTuple;
pub use flow::{FlowInput, FlowMatch};
pub use lookup::{ClassifyInput, Decision, PriorityDecision, SawfDecision};
pub use mesh::{Frame, MeshMatch};
pub use metrics::{MatchStats, MetricsSnapshot, TableMetrics};
pub use notifier::{ChangeKind, ObserverId, RuleEvent, RuleObserver};
pub use rule::{LatencyParams, MscsParams, Rule, RuleOutput};
pub use snapshot::RuleSelector;
pub use table::{RuleTable, RuleTableBuilder, UpdateResult};

#[cfg(test)]
mod tests {
    use super::*;
    use spm_core::types::{ClassifierType, USE_DSCP};

    #[test]
    fn test_empty_table_defaults() {
        let table = RuleTable::default();
        assert!(table.is_empty());
        assert_eq!(table.classify_frame(&Frame::default()), 0);
        assert_eq!(table.classify_scs(&FlowInput::default()).priority, None);

        let decision = table.classify_flow(&FlowInput {
            dest_dev: Some("wlan0".into()),
            ..Default::default()
        });
        assert_eq!(decision.priority, USE_DSCP);
        assert!(!decision.is_match());
    }

    #[test]
    fn test_decision_json() {
        let table = RuleTable::default();
        table
            .add(Rule::new(9, ClassifierType::Mesh).with_mesh(MeshMatch::always()).with_priority(4))
            .unwrap();

        let decision = table.classify(&ClassifyInput::Frame(Frame::default()));
        let json = serde_json::to_value(decision).unwrap();
        assert_eq!(json, serde_json::json!({ "pcp": 4 }));
    }
}
