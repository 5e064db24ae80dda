// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Value reconciliation.
//!
//! Merges incoming [`ValueRecord`]s into the last-known-value cache and
//! decides which of them are changes worth forwarding.
//!
//! # Rules
//!
//! | cached             | incoming timestamp | (value, quality) | result            |
//! |--------------------|--------------------|------------------|-------------------|
//! | none               | any                | any              | accept, emit      |
//! | `t`                | `< t`              | any              | reject            |
//! | `t`                | `>= t`             | differs          | accept, emit      |
//! | `t`                | `>= t`             | same             | accept, suppress  |
//!
//! [`ValueCache`] is pure bookkeeping with no I/O; [`ValueReconciler`]
//! shares one cache between all subscriptions of a client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use xmlda_core::{Quality, Value};

use super::messages::ItemValue;
use crate::types::{ItemIdentity, SubscriptionId};

// =============================================================================
// ValueRecord
// =============================================================================

/// One observation of an item.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRecord {
    /// Item the value belongs to.
    pub item: ItemIdentity,
    /// The value.
    pub value: Value,
    /// The quality.
    pub quality: Quality,
    /// When the value was sampled at the source.
    pub source_timestamp: DateTime<Utc>,
    /// When the server sent it.
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl ValueRecord {
    /// Creates a record.
    pub fn new(
        item: ItemIdentity,
        value: impl Into<Value>,
        quality: Quality,
        source_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            item,
            value: value.into(),
            quality,
            source_timestamp,
            server_timestamp: None,
        }
    }

    /// Sets the server timestamp.
    pub fn with_server_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.server_timestamp = Some(timestamp);
        self
    }

    /// Builds a record from a reply item.
    ///
    /// A missing value becomes [`Value::Null`], a missing quality is good and
    /// a missing item timestamp falls back to the reply time.
    pub fn from_item_value(
        item: ItemIdentity,
        value: &ItemValue,
        reply_time: DateTime<Utc>,
    ) -> Self {
        Self {
            item,
            value: value.value.clone().unwrap_or_default(),
            quality: value.quality.unwrap_or(Quality::GOOD),
            source_timestamp: value.timestamp.unwrap_or(reply_time),
            server_timestamp: Some(reply_time),
        }
    }

    fn same_reading(&self, other: &ValueRecord) -> bool {
        self.quality == other.quality && self.value.same_as(&other.value)
    }
}

// =============================================================================
// ValueChange
// =============================================================================

/// A genuine change of an item's value or quality.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    /// Subscription that delivered the change (`None` for reads).
    pub subscription: Option<SubscriptionId>,
    /// Item.
    pub item: ItemIdentity,
    /// New value.
    pub value: Value,
    /// New quality.
    pub quality: Quality,
    /// Source timestamp of the new value.
    pub timestamp: DateTime<Utc>,
    /// The record this change replaced.
    pub previous: Option<ValueRecord>,
}

/// What happened to a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// First record for the item.
    Inserted,
    /// Value or quality changed.
    Changed,
    /// Same value and quality with a timestamp not earlier than the cache.
    Refreshed,
    /// Older than the cached record; discarded.
    Stale,
}

impl Decision {
    /// Returns `true` if the record replaced the cache entry.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Self::Stale)
    }

    /// Returns `true` if the record is forwarded as a change.
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Inserted | Self::Changed)
    }
}

/// Result of reconciling a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileOutcome {
    /// Changes to forward, in input order.
    pub changes: Vec<ValueChange>,
    /// Records that replaced their cache entry.
    pub accepted: usize,
    /// Records discarded as older than the cache.
    pub rejected: usize,
    /// Accepted records that were not changes.
    pub suppressed: usize,
}

impl ReconcileOutcome {
    /// Returns `true` if nothing is to be forwarded.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

// =============================================================================
// ValueCache
// =============================================================================

/// Last-known value per item.
#[derive(Debug, Clone, Default)]
pub struct ValueCache {
    entries: HashMap<ItemIdentity, ValueRecord>,
}

impl ValueCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached record of an item.
    pub fn get(&self, item: &ItemIdentity) -> Option<&ValueRecord> {
        self.entries.get(item)
    }

    /// Removes an item.
    pub fn remove(&mut self, item: &ItemIdentity) -> Option<ValueRecord> {
        self.entries.remove(item)
    }

    /// Returns the number of cached items.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies one record, returning the decision and the replaced record.
    pub fn apply(&mut self, record: ValueRecord) -> (Decision, Option<ValueRecord>) {
        match self.entries.get(&record.item) {
            None => {
                self.entries.insert(record.item.clone(), record);
                (Decision::Inserted, None)
            }
            Some(cached) if record.source_timestamp < cached.source_timestamp => {
                (Decision::Stale, None)
            }
            Some(cached) => {
                let decision = if record.same_reading(cached) {
                    Decision::Refreshed
                } else {
                    Decision::Changed
                };
                let previous = self.entries.insert(record.item.clone(), record);
                (decision, previous)
            }
        }
    }

    /// Applies a batch in order.
    pub fn reconcile<I>(&mut self, source: Option<SubscriptionId>, records: I) -> ReconcileOutcome
    where
        I: IntoIterator<Item = ValueRecord>,
    {
        let mut outcome = ReconcileOutcome::default();

        for record in records {
            let change = ValueChange {
                subscription: source,
                item: record.item.clone(),
                value: record.value.clone(),
                quality: record.quality,
                timestamp: record.source_timestamp,
                previous: None,
            };

            let (decision, previous) = self.apply(record);
            if !decision.is_accepted() {
                outcome.rejected += 1;
                tracing::debug!(
                    item = %change.item,
                    timestamp = %change.timestamp,
                    "Discarding record older than cached value"
                );
                continue;
            }

            outcome.accepted += 1;
            if decision.is_change() {
                outcome.changes.push(ValueChange { previous, ..change });
            } else {
                outcome.suppressed += 1;
            }
        }

        outcome
    }
}

/// Reconciles `records` against `cache`, returning the updated cache and the
/// outcome.
pub fn reconcile(
    mut cache: ValueCache,
    source: Option<SubscriptionId>,
    records: Vec<ValueRecord>,
) -> (ValueCache, ReconcileOutcome) {
    let outcome = cache.reconcile(source, records);
    (cache, outcome)
}

// =============================================================================
// ValueReconciler
// =============================================================================

/// Shared reconciler used by reads and every subscription of a client.
#[derive(Debug, Default)]
pub struct ValueReconciler {
    cache: Mutex<ValueCache>,
    stats: ReconcilerStats,
}

impl ValueReconciler {
    /// Creates a reconciler with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconciles a batch under the cache lock.
    pub fn reconcile(
        &self,
        source: Option<SubscriptionId>,
        records: Vec<ValueRecord>,
    ) -> ReconcileOutcome {
        let outcome = self.cache.lock().reconcile(source, records);
        self.stats.record(&outcome);
        outcome
    }

    /// Returns the cached record of an item.
    pub fn last_value(&self, item: &ItemIdentity) -> Option<ValueRecord> {
        self.cache.lock().get(item).cloned()
    }

    /// Drops the cached record of an item.
    pub fn forget(&self, item: &ItemIdentity) -> Option<ValueRecord> {
        self.cache.lock().remove(item)
    }

    /// Returns the number of cached items.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Returns `true` if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    /// Returns reconciler statistics.
    pub fn stats(&self) -> ReconcilerStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Reconciler counters.
#[derive(Debug, Default)]
pub struct ReconcilerStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    suppressed: AtomicU64,
    changes: AtomicU64,
}

impl ReconcilerStats {
    fn record(&self, outcome: &ReconcileOutcome) {
        self.accepted.fetch_add(outcome.accepted as u64, Ordering::Relaxed);
        self.rejected.fetch_add(outcome.rejected as u64, Ordering::Relaxed);
        self.suppressed.fetch_add(outcome.suppressed as u64, Ordering::Relaxed);
        self.changes.fetch_add(outcome.changes.len() as u64, Ordering::Relaxed);
    }

    /// Returns a snapshot.
    pub fn snapshot(&self) -> ReconcilerStatsSnapshot {
        ReconcilerStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            changes: self.changes.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`ReconcilerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerStatsSnapshot {
    /// Records accepted.
    pub accepted: u64,
    /// Records rejected as stale.
    pub rejected: u64,
    /// Accepted records without a change.
    pub suppressed: u64,
    /// Changes emitted.
    pub changes: u64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use xmlda_core::QualityStatus;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + ChronoDuration::seconds(secs)
    }

    fn record(name: &str, value: i32, quality: Quality, at: i64) -> ValueRecord {
        ValueRecord::new(ItemIdentity::named(name), value, quality, t(at))
    }

    #[test]
    fn test_first_sight_emits() {
        let mut cache = ValueCache::new();
        let outcome = cache.reconcile(None, vec![record("A", 10, Quality::GOOD, 0)]);

        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(outcome.changes[0].value, Value::Int32(10));
        assert!(outcome.changes[0].previous.is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_unchanged_value_is_suppressed_but_cached() {
        let mut cache = ValueCache::new();
        cache.reconcile(None, vec![record("A", 10, Quality::GOOD, 0)]);

        let outcome = cache.reconcile(None, vec![record("A", 10, Quality::GOOD, 5)]);
        assert!(outcome.is_empty());
        assert_eq!(outcome.accepted, 1);
        assert_eq!(outcome.suppressed, 1);
        assert_eq!(cache.get(&ItemIdentity::named("A")).unwrap().source_timestamp, t(5));
    }

    #[test]
    fn test_stale_record_rejected() {
        let mut cache = ValueCache::new();
        cache.reconcile(None, vec![record("A", 10, Quality::GOOD, 10)]);

        let outcome = cache.reconcile(None, vec![record("A", 99, Quality::GOOD, 9)]);
        assert!(outcome.is_empty());
        assert_eq!(outcome.rejected, 1);

        let cached = cache.get(&ItemIdentity::named("A")).unwrap();
        assert_eq!(cached.value, Value::Int32(10));
        assert_eq!(cached.source_timestamp, t(10));
    }

    #[test]
    fn test_same_timestamp_clarification_replaces() {
        let mut cache = ValueCache::new();
        cache.reconcile(None, vec![record("A", 10, Quality::GOOD, 10)]);

        let outcome = cache.reconcile(None, vec![record("A", 10, Quality::BAD, 10)]);
        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(outcome.changes[0].quality, Quality::BAD);
        assert_eq!(
            outcome.changes[0].previous.as_ref().map(|p| p.quality),
            Some(Quality::GOOD)
        );
    }

    #[test]
    fn test_vendor_bits_count_as_quality_change() {
        let mut cache = ValueCache::new();
        cache.reconcile(None, vec![record("A", 1, Quality::GOOD, 0)]);

        let vendor = Quality::new(QualityStatus::Good).with_vendor(0x12);
        let outcome = cache.reconcile(None, vec![record("A", 1, vendor, 1)]);
        assert_eq!(outcome.changes.len(), 1);
    }

    #[test]
    fn test_batch_order_is_respected() {
        let mut cache = ValueCache::new();
        let outcome = cache.reconcile(
            Some(SubscriptionId::new(4)),
            vec![
                record("A", 1, Quality::GOOD, 1),
                record("A", 2, Quality::GOOD, 2),
                record("A", 0, Quality::GOOD, 0),
            ],
        );

        assert_eq!(outcome.changes.len(), 2);
        assert_eq!(outcome.rejected, 1);
        assert!(outcome
            .changes
            .iter()
            .all(|c| c.subscription == Some(SubscriptionId::new(4))));
        assert_eq!(cache.get(&ItemIdentity::named("A")).unwrap().value, Value::Int32(2));
    }

    #[test]
    fn test_pure_reconcile_returns_cache() {
        let (cache, outcome) = reconcile(
            ValueCache::new(),
            None,
            vec![record("A", 1, Quality::GOOD, 0), record("B", 2, Quality::GOOD, 0)],
        );
        assert_eq!(cache.len(), 2);
        assert_eq!(outcome.changes.len(), 2);
    }

    #[test]
    fn test_from_item_value_defaults() {
        let reply_time = t(30);
        let item_value = ItemValue::new("A").with_value(3.5f64);
        let record = ValueRecord::from_item_value(ItemIdentity::named("A"), &item_value, reply_time);

        assert_eq!(record.quality, Quality::GOOD);
        assert_eq!(record.source_timestamp, reply_time);
        assert_eq!(record.server_timestamp, Some(reply_time));

        let empty = ValueRecord::from_item_value(ItemIdentity::named("B"), &ItemValue::new("B"), reply_time);
        assert!(empty.value.is_null());
    }

    #[test]
    fn test_reconciler_stats() {
        let reconciler = ValueReconciler::new();
        reconciler.reconcile(None, vec![record("A", 1, Quality::GOOD, 1)]);
        reconciler.reconcile(None, vec![record("A", 1, Quality::GOOD, 2)]);
        reconciler.reconcile(None, vec![record("A", 5, Quality::GOOD, 0)]);

        let stats = reconciler.stats();
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.changes, 1);
        assert_eq!(stats.suppressed, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(reconciler.len(), 1);
        assert!(reconciler.forget(&ItemIdentity::named("A")).is_some());
        assert!(reconciler.is_empty());
    }
}
