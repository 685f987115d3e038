//! Rule sets loaded from YAML
//!
//! A rule set seeds a table at start-up; the table itself keeps no state
//! across restarts.
//!
//! ```yaml
//! rules:
//!   - id: 5
//!     classifier: scs
//!     precedence: 4
//!     flow:
//!       dst_port: 443
//!       protocol: 6
//!     output:
//!       priority: 6
//!   - id: 1
//!     classifier: mesh
//!     enabled: false
//!     mesh:
//!       always: true
//!     output:
//!       priority: 0
//! ```

use crate::flow::FlowMatch;
use crate::mesh::{MeshCriterion, MeshMatch};
use crate::rule::{Rule, RuleOutput};
use crate::table::{RuleTable, RuleTableBuilder};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use spm_core::config::TableConfig;
use spm_core::error::UpdateOutcome;
use spm_core::types::{ClassifierType, INVALID_RULE_ID, USE_UP};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::info;

/// One rule of a rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Disabled rules are kept in the file but not installed
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub rule: Rule,
}

fn default_enabled() -> bool {
    true
}

/// Counts reported by [`RuleSet::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplySummary {
    pub added: usize,
    pub modified: usize,
    pub skipped: usize,
}

/// An ordered list of rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl RuleSet {
    /// Load a rule set from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read rule file: {}", path.display()))?;

        let set = Self::from_yaml(&contents)
            .with_context(|| format!("Failed to load rule file: {}", path.display()))?;

        info!(
            path = %path.display(),
            rule_count = set.rules.len(),
            "Loaded rule set"
        );

        Ok(set)
    }

    /// Parse and validate a rule set
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let set: RuleSet = serde_yaml::from_str(yaml).context("Failed to parse rule set")?;
        set.validate()?;
        Ok(set)
    }

    /// Checks every rule and rejects duplicate identities.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();

        for (index, entry) in self.rules.iter().enumerate() {
            let rule = &entry.rule;
            rule.validate()
                .with_context(|| format!("Rule #{} ({}) is invalid", index, rule.id))?;

            if rule.id == INVALID_RULE_ID {
                if !rule.classifier.is_flow_keyed() {
                    return Err(anyhow!(
                        "Rule #{} of type {} needs an id",
                        index,
                        rule.classifier
                    ));
                }
                continue;
            }

            if !seen.insert((rule.classifier, rule.id)) {
                return Err(anyhow!(
                    "Duplicate rule id {} for type {}",
                    rule.id,
                    rule.classifier
                ));
            }
        }

        Ok(())
    }

    /// Enabled rules in file order.
    pub fn enabled_rules(&self) -> impl Iterator<Item = &Rule> + '_ {
        self.rules.iter().filter(|e| e.enabled).map(|e| &e.rule)
    }

    /// Installs the enabled rules into `table`.
    pub fn apply(&self, table: &RuleTable) -> Result<ApplySummary> {
        let mut summary = ApplySummary::default();

        for entry in &self.rules {
            if !entry.enabled {
                info!(rule_id = entry.rule.id, "Skipping disabled rule");
                summary.skipped += 1;
                continue;
            }

            let outcome = table
                .add(entry.rule.clone())
                .with_context(|| format!("Failed to install rule {}", entry.rule.id))?;
            match outcome {
                UpdateOutcome::Modified { .. } => summary.modified += 1,
                _ => summary.added += 1,
            }
        }

        info!(
            added = summary.added,
            modified = summary.modified,
            skipped = summary.skipped,
            "Rule set applied"
        );

        Ok(summary)
    }

    /// Builds a fresh table holding the enabled rules.
    pub fn into_rule_table(self, config: TableConfig) -> Result<RuleTable> {
        let mut builder = RuleTableBuilder::new().config(config);
        for rule in self.enabled_rules() {
            builder = builder.add_rule(rule.clone());
        }
        builder.build().context("Failed to build rule table")
    }

    /// Save the rule set to a YAML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self).context("Failed to serialize rule set")?;

        fs::write(path, yaml)
            .with_context(|| format!("Failed to write rule file: {}", path.display()))?;

        info!(path = %path.display(), "Saved rule set");

        Ok(())
    }

    /// A small rule set covering the mesh and SCS paths.
    pub fn example() -> Self {
        RuleSet {
            rules: vec![
                RuleConfig {
                    enabled: true,
                    rule: Rule::new(1, ClassifierType::Mesh)
                        .with_precedence(10)
                        .with_mesh(MeshMatch::default().with(MeshCriterion::DestPort(5060)))
                        .with_priority(6),
                },
                RuleConfig {
                    enabled: true,
                    rule: Rule::new(2, ClassifierType::Mesh)
                        .with_mesh(MeshMatch::always())
                        .with_priority(USE_UP),
                },
                RuleConfig {
                    enabled: true,
                    rule: Rule::new(5, ClassifierType::Scs)
                        .with_precedence(4)
                        .with_flow(FlowMatch {
                            dst_port: Some(443),
                            protocol: Some(6),
                            ..Default::default()
                        })
                        .with_output(RuleOutput {
                            service_class_id: Some(12),
                            ..RuleOutput::priority(6)
                        }),
                },
            ],
        }
    }
}
