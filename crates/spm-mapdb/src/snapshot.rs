//! Immutable view of the rule table.
//!
//! Readers hold an `Arc<Snapshot>` for the duration of a lookup. Writers
//! clone the current snapshot, edit the clone and publish it. Buckets and
//! index chains are shared between snapshots and only the touched ones are
//! copied, so a write costs one pointer copy per index key plus the touched
//! chain. A retired node is freed once the last snapshot referencing it is
//! dropped.

use spm_core::types::{ClassifierType, INVALID_RULE_ID, MAX_PRECEDENCE};
use std::collections::HashMap;
use std::sync::Arc;

use crate::fast_path::{flow_hash, FlowTuple};
use crate::rule::Rule;

/// A stored rule with its derived storage key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleNode {
    pub rule: Rule,
    /// Rule id, or the flow hash for flow-keyed rules
    pub key: u32,
    /// Own 5-tuple of a flow-keyed rule
    pub tuple: Option<FlowTuple>,
}

impl RuleNode {
    /// Wraps a rule, normalizing its precedence and deriving the key.
    pub fn new(mut rule: Rule) -> Self {
        rule.precedence = rule.bucket() as u8;
        let tuple = rule.flow_tuple();
        let key = match tuple {
            Some(t) => flow_hash(&t),
            None => rule.id,
        };
        Self { rule, key, tuple }
    }

    /// Identity test used by add and delete.
    ///
    /// Flow-keyed rules without a caller id are identified by their tuple;
    /// everything else by id and family.
    pub fn same_identity(&self, other: &RuleNode) -> bool {
        if self.rule.classifier != other.rule.classifier {
            return false;
        }
        if other.rule.classifier.is_flow_keyed() && other.rule.id == INVALID_RULE_ID {
            return self.tuple == other.tuple;
        }
        self.rule.id == other.rule.id
    }
}

/// Selects a rule for delete and query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSelector {
    /// By caller id
    Id(u32),
    /// By the 5-tuple of a flow-keyed rule
    Flow(FlowTuple),
}

type Bucket = Arc<Vec<Arc<RuleNode>>>;
type Chain = Arc<Vec<Arc<RuleNode>>>;

#[derive(Debug, Clone)]
pub struct Snapshot {
    buckets: Vec<Bucket>,
    index: HashMap<u32, Chain>,
    count: usize,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl Snapshot {
    pub fn new() -> Self {
        let empty: Bucket = Arc::new(Vec::new());
        Self {
            buckets: vec![empty; MAX_PRECEDENCE],
            index: HashMap::new(),
            count: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Every node, highest precedence first and insertion order within a
    /// precedence.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RuleNode>> + '_ {
        self.buckets.iter().rev().flat_map(|bucket| bucket.iter())
    }

    /// Nodes of one family in evaluation order.
    pub fn iter_family(
        &self,
        classifier: ClassifierType,
    ) -> impl Iterator<Item = &Arc<RuleNode>> + '_ {
        self.iter().filter(move |n| n.rule.classifier == classifier)
    }

    /// Flow-keyed nodes chained under `hash`.
    pub fn flow_chain(&self, hash: u32) -> impl Iterator<Item = &Arc<RuleNode>> + '_ {
        self.index
            .get(&hash)
            .into_iter()
            .flat_map(|chain| chain.iter())
            .filter(|n| n.rule.classifier.is_flow_keyed())
    }

    /// The stored node with the same identity as `node`.
    pub fn find_same(&self, node: &RuleNode) -> Option<&Arc<RuleNode>> {
        self.index
            .get(&node.key)?
            .iter()
            .find(|n| n.same_identity(node))
    }

    /// Resolves a selector within one family.
    pub fn find(&self, selector: RuleSelector, classifier: ClassifierType) -> Option<&Arc<RuleNode>> {
        match selector {
            // id-less flow-keyed rules are only reachable through their tuple
            RuleSelector::Id(INVALID_RULE_ID) if classifier.is_flow_keyed() => None,
            RuleSelector::Id(id) if classifier.is_flow_keyed() => {
                // stored under their hash, not their id
                self.index
                    .values()
                    .flat_map(|chain| chain.iter())
                    .find(|n| n.rule.classifier == classifier && n.rule.id == id)
            }
            RuleSelector::Id(id) => self
                .index
                .get(&id)?
                .iter()
                .find(|n| n.rule.classifier == classifier && n.rule.id == id),
            RuleSelector::Flow(tuple) => self
                .index
                .get(&flow_hash(&tuple))?
                .iter()
                .find(|n| n.rule.classifier == classifier && n.tuple == Some(tuple)),
        }
    }

    /// Appends a node to its precedence bucket and the index.
    pub fn insert(&mut self, node: Arc<RuleNode>) {
        let bucket = node.rule.bucket();
        Arc::make_mut(&mut self.buckets[bucket]).push(Arc::clone(&node));
        Arc::make_mut(self.index.entry(node.key).or_default()).push(node);
        self.count += 1;
    }

    /// Swaps `old` for `new`.
    ///
    /// Within the same precedence the node keeps its position; otherwise it
    /// moves to the tail of its new bucket.
    pub fn replace(&mut self, old: &Arc<RuleNode>, new: Arc<RuleNode>) {
        let old_bucket = old.rule.bucket();
        let new_bucket = new.rule.bucket();

        if old_bucket == new_bucket {
            let bucket = Arc::make_mut(&mut self.buckets[old_bucket]);
            if let Some(slot) = bucket.iter_mut().find(|n| Arc::ptr_eq(n, old)) {
                *slot = Arc::clone(&new);
            }
        } else {
            Arc::make_mut(&mut self.buckets[old_bucket]).retain(|n| !Arc::ptr_eq(n, old));
            Arc::make_mut(&mut self.buckets[new_bucket]).push(Arc::clone(&new));
        }

        if let Some(chain) = self.index.get_mut(&old.key) {
            if let Some(slot) = Arc::make_mut(chain).iter_mut().find(|n| Arc::ptr_eq(n, old)) {
                *slot = new;
            }
        }
    }

    /// Unlinks a node. Returns false if it was not present.
    pub fn remove(&mut self, node: &Arc<RuleNode>) -> bool {
        let bucket = Arc::make_mut(&mut self.buckets[node.rule.bucket()]);
        let before = bucket.len();
        bucket.retain(|n| !Arc::ptr_eq(n, node));
        if bucket.len() == before {
            return false;
        }

        if let Some(chain) = self.index.get_mut(&node.key) {
            Arc::make_mut(chain).retain(|n| !Arc::ptr_eq(n, node));
            if chain.is_empty() {
                self.index.remove(&node.key);
            }
        }

        self.count -= 1;
        true
    }

    /// Unlinks every node of `classifier`, or every node when `None`.
    /// Returns the number removed.
    pub fn remove_family(&mut self, classifier: Option<ClassifierType>) -> usize {
        let Some(classifier) = classifier else {
            let removed = self.count;
            *self = Snapshot::new();
            return removed;
        };

        let mut removed = 0;
        for bucket in self.buckets.iter_mut() {
            if bucket.iter().any(|n| n.rule.classifier == classifier) {
                let bucket = Arc::make_mut(bucket);
                let before = bucket.len();
                bucket.retain(|n| n.rule.classifier != classifier);
                removed += before - bucket.len();
            }
        }

        self.index.retain(|_, chain| {
            if chain.iter().any(|n| n.rule.classifier == classifier) {
                Arc::make_mut(chain).retain(|n| n.rule.classifier != classifier);
            }
            !chain.is_empty()
        });

        self.count -= removed;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{FlowMatch, Ipv4Match};

    fn create_test_node(id: u32, precedence: u8) -> Arc<RuleNode> {
        Arc::new(RuleNode::new(
            Rule::new(id, ClassifierType::Scs).with_precedence(precedence),
        ))
    }

    fn create_ifli_node(dst_port: u16) -> Arc<RuleNode> {
        let flow = FlowMatch {
            src_ipv4: Some(Ipv4Match::exact("10.0.0.1".parse().unwrap())),
            dst_ipv4: Some(Ipv4Match::exact("10.0.0.2".parse().unwrap())),
            src_port: Some(1000),
            dst_port: Some(dst_port),
            protocol: Some(17),
            ..Default::default()
        };
        Arc::new(RuleNode::new(
            Rule::new(INVALID_RULE_ID, ClassifierType::Ifli).with_flow(flow),
        ))
    }

    #[test]
    fn test_node_key_derivation() {
        let node = create_test_node(42, 255);
        assert_eq!(node.key, 42);
        assert_eq!(node.rule.precedence, 0);
        assert!(node.tuple.is_none());

        let ifli = create_ifli_node(2000);
        let tuple = ifli.tuple.unwrap();
        assert_eq!(ifli.key, flow_hash(&tuple));
    }

    #[test]
    fn test_precedence_order() {
        let mut snap = Snapshot::new();
        snap.insert(create_test_node(1, 1));
        snap.insert(create_test_node(2, 8));
        snap.insert(create_test_node(3, 5));
        snap.insert(create_test_node(4, 8));

        let order: Vec<u32> = snap.iter().map(|n| n.rule.id).collect();
        assert_eq!(order, vec![2, 4, 3, 1]);
        assert_eq!(snap.len(), 4);
    }

    #[test]
    fn test_copy_on_write_isolation() {
        let mut snap = Snapshot::new();
        let node = create_test_node(1, 3);
        snap.insert(Arc::clone(&node));

        let before = snap.clone();
        assert!(snap.remove(&node));
        assert!(snap.is_empty());
        assert_eq!(before.len(), 1);
        assert_eq!(before.iter().count(), 1);
        assert!(!snap.remove(&node));
    }

    #[test]
    fn test_replace_keeps_or_moves_position() {
        let mut snap = Snapshot::new();
        let a = create_test_node(1, 4);
        snap.insert(Arc::clone(&a));
        snap.insert(create_test_node(2, 4));

        let a2 = create_test_node(1, 4);
        snap.replace(&a, Arc::clone(&a2));
        let order: Vec<u32> = snap.iter().map(|n| n.rule.id).collect();
        assert_eq!(order, vec![1, 2]);
        assert!(Arc::ptr_eq(snap.find_same(&a2).unwrap(), &a2));

        let a3 = create_test_node(1, 9);
        snap.replace(&a2, Arc::clone(&a3));
        let precedences: Vec<u8> = snap.iter().map(|n| n.rule.precedence).collect();
        assert_eq!(precedences, vec![9, 4]);
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn test_find_by_selector() {
        let mut snap = Snapshot::new();
        snap.insert(create_test_node(7, 1));
        let ifli = create_ifli_node(2000);
        snap.insert(Arc::clone(&ifli));

        assert!(snap.find(RuleSelector::Id(7), ClassifierType::Scs).is_some());
        assert!(snap.find(RuleSelector::Id(7), ClassifierType::Sawf).is_none());

        let tuple = ifli.tuple.unwrap();
        assert!(snap.find(RuleSelector::Flow(tuple), ClassifierType::Ifli).is_some());
        assert_eq!(snap.flow_chain(ifli.key).count(), 1);

        let other = create_ifli_node(2001);
        assert!(snap.find_same(&other).is_none());
        assert!(snap.find_same(&create_ifli_node(2000)).is_some());
    }

    #[test]
    fn test_unset_id_does_not_select_flow_rule() {
        let mut snap = Snapshot::new();
        let ifli = create_ifli_node(2000);
        snap.insert(Arc::clone(&ifli));

        assert!(snap
            .find(RuleSelector::Id(INVALID_RULE_ID), ClassifierType::Ifli)
            .is_none());
        assert!(snap
            .find(RuleSelector::Flow(ifli.tuple.unwrap()), ClassifierType::Ifli)
            .is_some());
    }

    #[test]
    fn test_chains_shared_between_snapshots() {
        let mut snap = Snapshot::new();
        let first = create_ifli_node(2000);
        snap.insert(Arc::clone(&first));

        let before = snap.clone();
        snap.insert(create_ifli_node(2001));
        snap.remove(&first);

        assert_eq!(before.flow_chain(first.key).count(), 1);
        assert!(before.flow_chain(first.key).any(|n| Arc::ptr_eq(n, &first)));
        assert!(!snap.flow_chain(first.key).any(|n| Arc::ptr_eq(n, &first)));
        assert_eq!(before.len(), 1);
        assert_eq!(snap.len(), 1);
    }

    #[test]
    fn test_remove_family() {
        let mut snap = Snapshot::new();
        snap.insert(create_test_node(1, 1));
        snap.insert(create_test_node(2, 2));
        snap.insert(create_ifli_node(53));

        assert_eq!(snap.remove_family(Some(ClassifierType::Scs)), 2);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.remove_family(Some(ClassifierType::Scs)), 0);
        assert_eq!(snap.remove_family(None), 1);
        assert!(snap.is_empty());
    }
}
