//! Bounded-retention latency record store
//!
//! Append-only, FIFO-evicting store with a secondary index on `order_id`.
//! A single `parking_lot::RwLock` guards records, index and running totals, so
//! a record and its contribution to the counters become visible together.
//! Readers copy `Arc` pointers out under the read lock and never observe a
//! partially written record.

pub mod aggregator;


use crate::error::Result;
use crate::types::{DetailedStats, LatencyRecord, NewLatencyRecord, Stats};
use aggregator::{PercentileCache, RunningTotals};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// How long records are kept
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionPolicy {
    /// Hard cap on retained records
    pub max_records: usize,
    /// Optional age bound, measured against record timestamps
    pub max_age: Option<Duration>,
}

impl RetentionPolicy {
    pub fn max_records(max_records: usize) -> Self {
        Self {
            max_records: max_records.max(1),
            max_age: None,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let age = chrono::Duration::from_std(self.max_age?).ok()?;
        now.checked_sub_signed(age)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::max_records(10_000)
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    records: VecDeque<Arc<LatencyRecord>>,
    by_order: HashMap<String, VecDeque<u64>>,
    next_id: u64,
    /// Bumped on every append and eviction
    generation: u64,
    totals: RunningTotals,
}

impl StoreInner {
    fn push(&mut self, record: Arc<LatencyRecord>) {
        self.by_order
            .entry(record.order_id.clone())
            .or_default()
            .push_back(record.id);
        self.totals.add(&record);
        self.records.push_back(record);
        self.generation += 1;
    }

    fn pop_oldest(&mut self) -> Option<Arc<LatencyRecord>> {
        let record = self.records.pop_front()?;
        if let Some(ids) = self.by_order.get_mut(&record.order_id) {
            // oldest id for this order is always at the front
            if ids.front() == Some(&record.id) {
                ids.pop_front();
            } else {
                ids.retain(|id| *id != record.id);
            }
            if ids.is_empty() {
                self.by_order.remove(&record.order_id);
            }
        }
        self.totals.remove(&record);
        self.generation += 1;
        Some(record)
    }

    fn enforce(&mut self, policy: &RetentionPolicy, now: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        while self.records.len() > policy.max_records {
            self.pop_oldest();
            evicted += 1;
        }
        if let Some(cutoff) = policy.cutoff(now) {
            while self
                .records
                .front()
                .is_some_and(|oldest| oldest.timestamp < cutoff)
            {
                self.pop_oldest();
                evicted += 1;
            }
        }
        evicted
    }

    fn find(&self, id: u64) -> Option<&Arc<LatencyRecord>> {
        self.records
            .binary_search_by_key(&id, |r| r.id)
            .ok()
            .map(|idx| &self.records[idx])
    }
}

/// In-memory store of latency records plus its aggregator state
pub struct LatencyStore {
    inner: RwLock<StoreInner>,
    percentiles: PercentileCache,
    retention: RetentionPolicy,
}

impl LatencyStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                next_id: 1,
                ..StoreInner::default()
            }),
            percentiles: PercentileCache::default(),
            retention,
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Append a record and return its id
    pub fn append(&self, record: NewLatencyRecord) -> Result<u64> {
        self.insert(record).map(|r| r.id)
    }

    /// Append a record and return the stored copy
    pub fn insert(&self, record: NewLatencyRecord) -> Result<Arc<LatencyRecord>> {
        record.validate()?;
        if record.status.is_failure() && record.error.is_none() {
            tracing::debug!("Failure record for order {} has no error detail", record.order_id);
        }

        let now = Utc::now();
        let mut inner = self.inner.write();
        let id = inner.next_id;
        inner.next_id += 1;
        let stored = Arc::new(record.into_record(id));
        inner.push(stored.clone());
        let evicted = inner.enforce(&self.retention, now);
        drop(inner);

        if evicted > 0 {
            tracing::debug!("Evicted {} records after append of id {}", evicted, id);
        }
        Ok(stored)
    }

    /// Seed the store with previously persisted records.
    ///
    /// Records are applied in id order, ids are kept as-is, and id assignment
    /// resumes after the highest restored id. Records at or below the current
    /// highest id are skipped.
    pub fn restore(&self, mut records: Vec<LatencyRecord>) -> usize {
        records.sort_by_key(|r| r.id);
        let now = Utc::now();
        let mut inner = self.inner.write();
        let mut restored = 0;
        for record in records {
            if record.id < inner.next_id {
                continue;
            }
            inner.next_id = record.id + 1;
            inner.push(Arc::new(record));
            restored += 1;
        }
        inner.enforce(&self.retention, now);
        restored
    }

    /// Make sure ids handed out from now on are greater than `id`
    pub fn resume_after(&self, id: u64) {
        let mut inner = self.inner.write();
        if inner.next_id <= id {
            inner.next_id = id + 1;
        }
    }

    /// Drop records older than the age bound; returns how many were evicted.
    ///
    /// Eviction walks from the oldest id, so a record whose own timestamp is
    /// older than a newer-id record ahead of it stays until that one expires.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        if self.retention.max_age.is_none() {
            return 0;
        }
        self.inner.write().enforce(&self.retention, now)
    }

    /// All records for an order id, in insertion order
    pub fn get_by_order_id(&self, order_id: &str) -> Vec<Arc<LatencyRecord>> {
        let inner = self.inner.read();
        match inner.by_order.get(order_id) {
            Some(ids) => ids.iter().filter_map(|id| inner.find(*id).cloned()).collect(),
            None => Vec::new(),
        }
    }

    /// Up to `limit` records, most recent first
    pub fn recent(&self, limit: usize) -> Vec<Arc<LatencyRecord>> {
        let inner = self.inner.read();
        inner.records.iter().rev().take(limit).cloned().collect()
    }

    pub fn get(&self, id: u64) -> Option<Arc<LatencyRecord>> {
        self.inner.read().find(id).cloned()
    }

    /// Point-in-time snapshot of the retained window, oldest first
    pub fn all(&self) -> Snapshot {
        let inner = self.inner.read();
        Snapshot {
            records: inner.records.iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current aggregate statistics.
    ///
    /// Counters come straight from the write path; the p99 sample is rebuilt
    /// only if the window changed since the last call.
    pub fn stats(&self) -> Stats {
        let (totals, generation) = {
            let inner = self.inner.read();
            (inner.totals, inner.generation)
        };
        let sorted = self.percentiles.sorted_rtts(generation, || {
            let inner = self.inner.read();
            let rtts = inner.records.iter().map(|r| r.rtt_ms).collect();
            (rtts, inner.generation)
        });
        totals.to_stats(aggregator::nearest_rank(&sorted, 99.0))
    }

    pub fn detailed_stats(&self) -> DetailedStats {
        aggregator::detailed_stats(&self.all())
    }
}

impl Default for LatencyStore {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}

/// Immutable view of the retained records at one instant.
///
/// Eviction after the snapshot was taken does not affect it; iteration can be
/// restarted any number of times.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    records: Arc<[Arc<LatencyRecord>]>,
}

impl Snapshot {
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<LatencyRecord>> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<LatencyRecord>> {
        self.records.get(index)
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Arc<LatencyRecord>;
    type IntoIter = std::slice::Iter<'a, Arc<LatencyRecord>>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
