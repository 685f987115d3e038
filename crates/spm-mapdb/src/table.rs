//! The rule table
//!
//! Lookups load the current [`Snapshot`] without locking. Mutations are
//! serialized twice over: a try-acquire writer flag rejects overlapping
//! writers outright, and a mutex guards the build-and-publish step. Change
//! notifications fire after publication while the writer flag is still
//! held, so an observer that tries to mutate the table is rejected.

use arc_swap::{ArcSwap, Guard};
use parking_lot::Mutex;
use spm_core::config::TableConfig;
use spm_core::error::{UpdateError, UpdateOutcome};
use spm_core::types::{ClassifierType, INVALID_RULE_ID};
use spm_plugin_api::{PluginError, WifiMetadata, WifiPluginRegistry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::metrics::TableMetrics;
use crate::notifier::{ChangeKind, ChangeNotifier, ObserverId, RuleEvent, RuleObserver};
use crate::rule::Rule;
use crate::snapshot::{RuleNode, RuleSelector, Snapshot};

/// Result of a table mutation or query.
pub type UpdateResult = Result<UpdateOutcome<Rule>, UpdateError>;

/// Holds the writer flag until dropped.
struct WriterGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> WriterGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Precedence-ordered rule store shared between writers and lookups.
pub struct RuleTable {
    snapshot: ArcSwap<Snapshot>,
    update_lock: Mutex<()>,
    writer: AtomicBool,
    notifier: ChangeNotifier,
    plugins: Arc<WifiPluginRegistry>,
    config: TableConfig,
    pub(crate) metrics: TableMetrics,
}

impl RuleTable {
    /// Creates an empty table with its own plugin registry.
    pub fn new(config: TableConfig) -> Self {
        Self::with_plugins(config, Arc::new(WifiPluginRegistry::new()))
    }

    /// Creates an empty table using a shared plugin registry.
    pub fn with_plugins(config: TableConfig, plugins: Arc<WifiPluginRegistry>) -> Self {
        Self::build(config, plugins, TableMetrics::default())
    }

    fn build(config: TableConfig, plugins: Arc<WifiPluginRegistry>, metrics: TableMetrics) -> Self {
        info!(max_rules = config.max_rules, "Rule table initialized");
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::new()),
            update_lock: Mutex::new(()),
            writer: AtomicBool::new(false),
            notifier: ChangeNotifier::new(),
            plugins,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn plugins(&self) -> &Arc<WifiPluginRegistry> {
        &self.plugins
    }

    pub fn metrics(&self) -> &TableMetrics {
        &self.metrics
    }

    /// Current snapshot. Stays valid while held, whatever writers do.
    #[inline]
    pub fn load(&self) -> Guard<Arc<Snapshot>> {
        self.snapshot.load()
    }

    /// Number of live rules.
    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }

    /// Every rule in evaluation order.
    pub fn rules(&self) -> Vec<Rule> {
        self.snapshot.load().iter().map(|n| n.rule.clone()).collect()
    }

    pub fn register_observer(&self, observer: Arc<dyn RuleObserver>) -> ObserverId {
        self.notifier.register(observer)
    }

    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        self.notifier.unregister(id)
    }

    fn begin_write(&self) -> Result<WriterGuard<'_>, UpdateError> {
        WriterGuard::try_acquire(&self.writer).ok_or_else(|| {
            self.metrics.record_writer_rejected();
            warn!("Rule table busy, write rejected");
            UpdateError::ConcurrentWriteRejected
        })
    }

    /// Runs the WLAN validator for rules that carry WLAN parameters.
    fn validate_wlan(&self, rule: &Rule) -> Result<(), UpdateError> {
        let Some(wlan) = rule.wlan.as_ref().filter(|_| rule.is_wlan()) else {
            return Ok(());
        };

        match self.plugins.validate(&WifiMetadata::for_rule(wlan)) {
            Ok(true) => Ok(()),
            Ok(false) => Err(UpdateError::invalid_entry(format!(
                "WLAN parameters of rule {} rejected by validator",
                rule.id
            ))),
            Err(PluginError::NotRegistered { .. }) => Err(UpdateError::invalid_entry(
                "WLAN rule needs a registered validator",
            )),
            Err(e) => Err(UpdateError::invalid_entry(e.to_string())),
        }
    }

    /// Inserts a rule, or replaces the stored rule with the same identity.
    ///
    /// Identity is id plus family; flow-keyed rules without an id are
    /// identified by their 5-tuple. A replacement at a different precedence
    /// moves the rule to the tail of its new bucket.
    pub fn add(&self, rule: Rule) -> UpdateResult {
        let _writer = self.begin_write()?;

        let (event, outcome) = {
            let _lock = self.update_lock.lock();
            let current = self.snapshot.load_full();

            if current.len() >= self.config.max_rules {
                warn!(
                    rule_id = rule.id,
                    capacity = self.config.max_rules,
                    "Rule table full"
                );
                return Err(UpdateError::TableFull {
                    capacity: self.config.max_rules,
                });
            }

            if let Err(e) = rule.validate().and_then(|_| self.validate_wlan(&rule)) {
                warn!(rule_id = rule.id, error = %e, "Rejected invalid rule");
                return Err(e);
            }

            let node = Arc::new(RuleNode::new(rule));
            let key = node.tuple.map(|_| node.key);
            let mut next = Snapshot::clone(&current);

            let (kind, outcome) = match current.find_same(&node) {
                Some(existing) => {
                    next.replace(existing, Arc::clone(&node));
                    (ChangeKind::Modified, UpdateOutcome::Modified { key })
                }
                None => {
                    next.insert(Arc::clone(&node));
                    (ChangeKind::Added, UpdateOutcome::Added { key })
                }
            };

            self.snapshot.store(Arc::new(next));

            debug!(
                rule_id = node.rule.id,
                classifier = %node.rule.classifier,
                precedence = node.rule.precedence,
                key = node.key,
                change = %kind,
                "Rule stored"
            );

            let event = RuleEvent {
                kind,
                rule: node.rule.clone(),
                key: node.key,
            };
            (event, outcome)
        };

        match event.kind {
            ChangeKind::Modified => self.metrics.record_modified(),
            _ => self.metrics.record_added(),
        }
        self.notifier.notify(&event);
        Ok(outcome)
    }

    /// Removes one rule.
    ///
    /// Removal of a flow-keyed rule is not announced to observers.
    pub fn delete(&self, selector: RuleSelector, classifier: ClassifierType) -> UpdateResult {
        let _writer = self.begin_write()?;

        let node = {
            let _lock = self.update_lock.lock();
            let current = self.snapshot.load_full();

            if current.is_empty() {
                warn!("Delete on empty rule table");
                return Err(UpdateError::TableEmpty);
            }

            let Some(node) = current.find(selector, classifier).cloned() else {
                let id = selector_id(selector);
                warn!(rule_id = id, classifier = %classifier, "Rule to delete not found");
                return Err(UpdateError::not_found(id, classifier));
            };

            let mut next = Snapshot::clone(&current);
            next.remove(&node);
            self.snapshot.store(Arc::new(next));
            node
        };

        debug!(
            rule_id = node.rule.id,
            classifier = %classifier,
            key = node.key,
            "Rule deleted"
        );
        self.metrics.record_deleted(1);

        if !classifier.is_flow_keyed() {
            let node = Arc::unwrap_or_clone(node);
            self.notifier.notify(&RuleEvent {
                kind: ChangeKind::Removed,
                key: node.key,
                rule: node.rule,
            });
        }

        Ok(UpdateOutcome::Deleted)
    }

    /// Removes every rule, or every rule of one family. Returns the number
    /// removed; an empty table is not an error.
    pub fn flush(&self, classifier: Option<ClassifierType>) -> Result<usize, UpdateError> {
        let _writer = self.begin_write()?;
        let _lock = self.update_lock.lock();
        let current = self.snapshot.load_full();

        if current.is_empty() {
            warn!(
                classifier = ClassifierType::name_of(classifier),
                "Flush on empty rule table"
            );
            return Ok(0);
        }

        let mut next = Snapshot::clone(&current);
        let removed = next.remove_family(classifier);
        if removed > 0 {
            self.snapshot.store(Arc::new(next));
        }

        info!(
            classifier = ClassifierType::name_of(classifier),
            removed,
            remaining = current.len() - removed,
            "Rule table flushed"
        );
        self.metrics.record_flush();
        self.metrics.record_deleted(removed as u64);
        Ok(removed)
    }

    /// Looks up one rule.
    pub fn query(&self, selector: RuleSelector, classifier: ClassifierType) -> Result<Rule, UpdateError> {
        let snapshot = self.snapshot.load();
        if snapshot.is_empty() {
            return Err(UpdateError::TableEmpty);
        }

        snapshot
            .find(selector, classifier)
            .map(|n| n.rule.clone())
            .ok_or_else(|| UpdateError::not_found(selector_id(selector), classifier))
    }

    /// Every rule of one family, highest precedence first.
    ///
    /// Flow-keyed rules cannot be listed this way.
    pub fn query_by_type(&self, classifier: ClassifierType) -> Result<Vec<Rule>, UpdateError> {
        if classifier.is_flow_keyed() {
            return Err(UpdateError::invalid_entry(format!(
                "query by type is not supported for {} rules",
                classifier
            )));
        }

        let snapshot = self.snapshot.load();
        if snapshot.is_empty() {
            return Err(UpdateError::TableEmpty);
        }

        Ok(snapshot
            .iter_family(classifier)
            .map(|n| n.rule.clone())
            .collect())
    }
}

fn selector_id(selector: RuleSelector) -> u32 {
    match selector {
        RuleSelector::Id(id) => id,
        RuleSelector::Flow(_) => INVALID_RULE_ID,
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::new(TableConfig::default())
    }
}

impl std::fmt::Debug for RuleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleTable")
            .field("rules", &self.len())
            .field("max_rules", &self.config.max_rules)
            .field("observers", &self.notifier.len())
            .field("plugins", &self.plugins)
            .finish()
    }
}

/// Builder for constructing rule tables
pub struct RuleTableBuilder {
    config: TableConfig,
    plugins: Option<Arc<WifiPluginRegistry>>,
    metrics_enabled: bool,
    observers: Vec<Arc<dyn RuleObserver>>,
    rules: Vec<Rule>,
}

impl RuleTableBuilder {
    pub fn new() -> Self {
        Self {
            config: TableConfig::default(),
            plugins: None,
            metrics_enabled: true,
            observers: Vec::new(),
            rules: Vec::new(),
        }
    }

    pub fn config(mut self, config: TableConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_rules(mut self, max_rules: usize) -> Self {
        self.config.max_rules = max_rules;
        self
    }

    pub fn plugins(mut self, plugins: Arc<WifiPluginRegistry>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    /// Emit counters through the `metrics` facade (on by default).
    pub fn metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn RuleObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Queues a rule to be added at build time.
    pub fn add_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Builds the table, adding queued rules in order.
    ///
    /// Observers are registered first and see the initial rules.
    pub fn build(self) -> Result<RuleTable, UpdateError> {
        let plugins = self
            .plugins
            .unwrap_or_else(|| Arc::new(WifiPluginRegistry::new()));
        let table = RuleTable::build(self.config, plugins, TableMetrics::new(self.metrics_enabled));

        for observer in self.observers {
            table.register_observer(observer);
        }

        for rule in self.rules {
            table.add(rule)?;
        }

        Ok(table)
    }
}

impl Default for RuleTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}
