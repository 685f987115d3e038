//! Administrative entry points used by management transports.
//!
//! A transport decodes its message into a [`RuleRequest`] carrying the raw
//! command code and hands it to [`RuleTable::rule_update`]; the numeric
//! result goes back through [`RuleStatus`].

use serde::{Deserialize, Serialize};
use spm_core::error::{UpdateError, UpdateOutcome};
use spm_core::types::{ClassifierType, INVALID_RULE_ID};
use std::fmt;
use tracing::debug;

use crate::fast_path::FlowTuple;
use crate::rule::Rule;
use crate::snapshot::RuleSelector;
use crate::table::{RuleTable, UpdateResult};

/// Administrative commands and their wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminCommand {
    Delete,
    Add,
    Query,
}

impl AdminCommand {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(AdminCommand::Delete),
            1 => Some(AdminCommand::Add),
            2 => Some(AdminCommand::Query),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            AdminCommand::Delete => 0,
            AdminCommand::Add => 1,
            AdminCommand::Query => 2,
        }
    }
}

impl fmt::Display for AdminCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminCommand::Delete => write!(f, "delete"),
            AdminCommand::Add => write!(f, "add"),
            AdminCommand::Query => write!(f, "query"),
        }
    }
}

/// A decoded management request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRequest {
    /// Raw command code, validated on dispatch
    pub command: u8,
    pub rule: Rule,
}

impl RuleRequest {
    pub fn new(command: AdminCommand, rule: Rule) -> Self {
        Self {
            command: command.code(),
            rule,
        }
    }

    /// How delete and query locate the rule: flow-keyed rules without an
    /// id by their tuple, everything else by id.
    pub fn selector(&self) -> RuleSelector {
        if self.rule.classifier.is_flow_keyed() && self.rule.id == INVALID_RULE_ID {
            RuleSelector::Flow(self.rule.flow.tuple())
        } else {
            RuleSelector::Id(self.rule.id)
        }
    }
}

/// Reply to a management request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStatus {
    pub rule_id: u32,
    /// Error code `0..=7` or success code `10..=13`
    pub code: u8,
    /// Flow hash of a flow-keyed rule
    pub key: Option<u32>,
}

impl RuleStatus {
    pub fn from_result(rule_id: u32, result: &UpdateResult) -> Self {
        match result {
            Ok(outcome) => Self {
                rule_id,
                code: outcome.code(),
                key: outcome.key(),
            },
            Err(e) => Self {
                rule_id,
                code: e.code(),
                key: None,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.code >= 10
    }
}

impl RuleTable {
    /// Dispatches a management request by its command code.
    pub fn rule_update(&self, request: RuleRequest) -> UpdateResult {
        let Some(command) = AdminCommand::from_code(request.command) else {
            debug!(code = request.command, "Unknown rule command");
            return Err(UpdateError::UnknownCommand {
                code: request.command,
            });
        };

        debug!(
            command = %command,
            rule_id = request.rule.id,
            classifier = %request.rule.classifier,
            "Rule update requested"
        );

        match command {
            AdminCommand::Add => self.add(request.rule),
            AdminCommand::Delete => self.delete(request.selector(), request.rule.classifier),
            AdminCommand::Query => self
                .query(request.selector(), request.rule.classifier)
                .map(|rule| UpdateOutcome::Found(Box::new(rule))),
        }
    }

    /// Deletes a flow-keyed rule by its 5-tuple.
    pub fn delete_by_tuple(&self, tuple: FlowTuple) -> UpdateResult {
        self.delete(RuleSelector::Flow(tuple), ClassifierType::Ifli)
    }

    pub fn delete_by_id(&self, id: u32, classifier: ClassifierType) -> UpdateResult {
        self.delete(RuleSelector::Id(id), classifier)
    }

    pub fn query_by_id(&self, id: u32, classifier: ClassifierType) -> Result<Rule, UpdateError> {
        self.query(RuleSelector::Id(id), classifier)
    }

    /// Removes every rule.
    pub fn flush_all(&self) -> Result<usize, UpdateError> {
        self.flush(None)
    }

    /// Removes every rule of one family.
    pub fn flush_by_type(&self, classifier: ClassifierType) -> Result<usize, UpdateError> {
        self.flush(Some(classifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{FlowMatch, Ipv4Match};

    fn create_ifli_rule() -> Rule {
        Rule::new(INVALID_RULE_ID, ClassifierType::Ifli).with_flow(FlowMatch {
            src_ipv4: Some(Ipv4Match::exact("172.16.0.1".parse().unwrap())),
            dst_ipv4: Some(Ipv4Match::exact("172.16.0.2".parse().unwrap())),
            src_port: Some(7000),
            dst_port: Some(8000),
            protocol: Some(17),
            ..Default::default()
        })
    }

    #[test]
    fn test_command_codes() {
        for command in [AdminCommand::Delete, AdminCommand::Add, AdminCommand::Query] {
            assert_eq!(AdminCommand::from_code(command.code()), Some(command));
        }
        assert_eq!(AdminCommand::from_code(3), None);
    }

    #[test]
    fn test_unknown_command() {
        let table = RuleTable::default();
        let request = RuleRequest {
            command: 7,
            rule: Rule::new(1, ClassifierType::Scs),
        };
        let result = table.rule_update(request);
        assert_eq!(result, Err(UpdateError::UnknownCommand { code: 7 }));
        assert_eq!(RuleStatus::from_result(1, &result).code, 5);
    }

    #[test]
    fn test_add_query_delete_cycle() {
        let table = RuleTable::default();
        let rule = Rule::new(3, ClassifierType::Sawf).with_priority(2);

        let added = table.rule_update(RuleRequest::new(AdminCommand::Add, rule.clone()));
        assert_eq!(RuleStatus::from_result(3, &added).code, 10);

        let found = table
            .rule_update(RuleRequest::new(AdminCommand::Query, rule.clone()))
            .unwrap();
        assert_eq!(found, UpdateOutcome::Found(Box::new(rule.clone())));
        assert_eq!(found.code(), 13);

        let deleted = table.rule_update(RuleRequest::new(AdminCommand::Delete, rule.clone()));
        let status = RuleStatus::from_result(3, &deleted);
        assert_eq!(status.code, 11);
        assert!(status.is_success());

        let again = table.rule_update(RuleRequest::new(AdminCommand::Delete, rule));
        assert_eq!(RuleStatus::from_result(3, &again).code, 1);
    }

    #[test]
    fn test_ifli_delete_by_tuple() {
        let table = RuleTable::default();
        let rule = create_ifli_rule();
        let tuple = rule.flow.tuple();

        let added = table.rule_update(RuleRequest::new(AdminCommand::Add, rule.clone()));
        let status = RuleStatus::from_result(INVALID_RULE_ID, &added);
        assert_eq!(status.key, Some(tuple.hash_key()));

        table
            .add(Rule::new(1, ClassifierType::Scs))
            .unwrap();
        assert_eq!(
            table.delete_by_tuple(tuple),
            Ok(UpdateOutcome::Deleted)
        );
        assert_eq!(
            table.rule_update(RuleRequest::new(AdminCommand::Delete, rule)),
            Err(UpdateError::not_found(INVALID_RULE_ID, ClassifierType::Ifli))
        );
    }

    #[test]
    fn test_unset_id_never_selects_ifli_rule() {
        let table = RuleTable::default();
        let rule = create_ifli_rule();
        let tuple = rule.flow.tuple();
        table.add(rule.clone()).unwrap();

        let mut other = create_ifli_rule();
        other.flow.dst_port = Some(8001);
        table.add(other).unwrap();

        let not_found = Err(UpdateError::not_found(INVALID_RULE_ID, ClassifierType::Ifli));
        assert_eq!(
            table.query_by_id(INVALID_RULE_ID, ClassifierType::Ifli),
            Err(UpdateError::not_found(INVALID_RULE_ID, ClassifierType::Ifli))
        );
        assert_eq!(table.delete_by_id(INVALID_RULE_ID, ClassifierType::Ifli), not_found);

        let mut stranger = create_ifli_rule();
        stranger.flow.src_port = Some(7001);
        assert_eq!(
            table.rule_update(RuleRequest::new(AdminCommand::Delete, stranger.clone())),
            not_found
        );
        let status = RuleStatus::from_result(
            INVALID_RULE_ID,
            &table.rule_update(RuleRequest::new(AdminCommand::Query, stranger)),
        );
        assert_eq!(status.code, 4);

        assert_eq!(table.len(), 2);
        assert_eq!(table.delete_by_tuple(tuple), Ok(UpdateOutcome::Deleted));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_ifli_with_id_found_by_id() {
        let table = RuleTable::default();
        let mut rule = create_ifli_rule();
        rule.id = 77;
        table.add(rule).unwrap();

        assert!(table.query_by_id(77, ClassifierType::Ifli).is_ok());
        assert_eq!(
            table.delete_by_id(77, ClassifierType::Ifli),
            Ok(UpdateOutcome::Deleted)
        );
    }

    #[test]
    fn test_flush_helpers() {
        let table = RuleTable::default();
        table.add(Rule::new(1, ClassifierType::Scs)).unwrap();
        table.add(Rule::new(2, ClassifierType::Mscs)).unwrap();

        assert_eq!(table.flush_by_type(ClassifierType::Mscs), Ok(1));
        assert_eq!(table.flush_all(), Ok(1));
        assert_eq!(table.flush_all(), Ok(0));
    }
}
