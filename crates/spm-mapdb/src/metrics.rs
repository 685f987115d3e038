//! Rule table metrics
//!
//! Counters are emitted through the `metrics` facade and mirrored locally so
//! they can be read back without an exporter. The lookup path only touches
//! atomics.

use metrics::{counter, describe_counter};
use serde::{Deserialize, Serialize};
use spm_core::types::ClassifierType;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lookup and hit counts of one classifier family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStats {
    pub lookups: u64,
    pub matches: u64,
}

impl MatchStats {
    pub fn misses(&self) -> u64 {
        self.lookups.saturating_sub(self.matches)
    }
}

/// Lookup counters of one family, indexed by wire code.
#[derive(Debug, Default)]
struct FamilyCounters {
    lookups: AtomicU64,
    matches: AtomicU64,
}

impl FamilyCounters {
    fn load(&self) -> MatchStats {
        MatchStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            matches: self.matches.load(Ordering::Relaxed),
        }
    }
}

const FAMILY_COUNT: usize = ClassifierType::ALL.len();

#[inline]
fn family_slot(family: ClassifierType) -> usize {
    usize::from(family.code() - 1)
}

/// Counters of a single rule table.
#[derive(Debug)]
pub struct TableMetrics {
    enabled: bool,
    rules_added: AtomicU64,
    rules_modified: AtomicU64,
    rules_deleted: AtomicU64,
    flushes: AtomicU64,
    writer_rejections: AtomicU64,
    per_family: [FamilyCounters; FAMILY_COUNT],
}

impl TableMetrics {
    pub fn new(enabled: bool) -> Self {
        if enabled {
            describe_counter!("spm_rules_added_total", "Rules inserted into the table");
            describe_counter!("spm_rules_modified_total", "Rules replaced in place");
            describe_counter!("spm_rules_deleted_total", "Rules removed by delete or flush");
            describe_counter!("spm_flushes_total", "Table flushes");
            describe_counter!(
                "spm_writer_rejections_total",
                "Mutations rejected because another writer held the table"
            );
            describe_counter!("spm_lookups_total", "Classification lookups per family");
            describe_counter!("spm_matches_total", "Classification hits per family");
        }

        Self {
            enabled,
            rules_added: AtomicU64::new(0),
            rules_modified: AtomicU64::new(0),
            rules_deleted: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            writer_rejections: AtomicU64::new(0),
            per_family: Default::default(),
        }
    }

    pub fn record_added(&self) {
        self.rules_added.fetch_add(1, Ordering::Relaxed);
        if self.enabled {
            counter!("spm_rules_added_total").increment(1);
        }
    }

    pub fn record_modified(&self) {
        self.rules_modified.fetch_add(1, Ordering::Relaxed);
        if self.enabled {
            counter!("spm_rules_modified_total").increment(1);
        }
    }

    pub fn record_deleted(&self, count: u64) {
        self.rules_deleted.fetch_add(count, Ordering::Relaxed);
        if self.enabled {
            counter!("spm_rules_deleted_total").increment(count);
        }
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        if self.enabled {
            counter!("spm_flushes_total").increment(1);
        }
    }

    pub fn record_writer_rejected(&self) {
        self.writer_rejections.fetch_add(1, Ordering::Relaxed);
        if self.enabled {
            counter!("spm_writer_rejections_total").increment(1);
        }
    }

    /// Records one lookup against `family` and whether it hit.
    pub fn record_lookup(&self, family: ClassifierType, matched: bool) {
        let slot = &self.per_family[family_slot(family)];
        slot.lookups.fetch_add(1, Ordering::Relaxed);
        if matched {
            slot.matches.fetch_add(1, Ordering::Relaxed);
        }

        if self.enabled {
            counter!("spm_lookups_total", "family" => family.as_str()).increment(1);
            if matched {
                counter!("spm_matches_total", "family" => family.as_str()).increment(1);
            }
        }
    }

    pub fn get_rules_added(&self) -> u64 {
        self.rules_added.load(Ordering::Relaxed)
    }

    pub fn get_rules_modified(&self) -> u64 {
        self.rules_modified.load(Ordering::Relaxed)
    }

    pub fn get_rules_deleted(&self) -> u64 {
        self.rules_deleted.load(Ordering::Relaxed)
    }

    pub fn get_flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn get_writer_rejections(&self) -> u64 {
        self.writer_rejections.load(Ordering::Relaxed)
    }

    pub fn get_match_stats(&self, family: ClassifierType) -> MatchStats {
        self.per_family[family_slot(family)].load()
    }

    /// Per-family stats for every family that has seen a lookup.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let families = ClassifierType::ALL
            .iter()
            .map(|&family| (family, self.get_match_stats(family)))
            .filter(|(_, stats)| stats.lookups > 0)
            .collect();

        MetricsSnapshot {
            rules_added: self.get_rules_added(),
            rules_modified: self.get_rules_modified(),
            rules_deleted: self.get_rules_deleted(),
            flushes: self.get_flushes(),
            writer_rejections: self.get_writer_rejections(),
            families,
        }
    }
}

impl Default for TableMetrics {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Point-in-time copy of [`TableMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub rules_added: u64,
    pub rules_modified: u64,
    pub rules_deleted: u64,
    pub flushes: u64,
    pub writer_rejections: u64,
    pub families: Vec<(ClassifierType, MatchStats)>,
}
