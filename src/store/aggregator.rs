//! Running statistics over the retained window
//!
//! Counters are maintained inside the store's write section so they always
//! agree with the visible record set. The sorted RTT sample used for
//! percentiles is rebuilt lazily on read and memoized per store generation.

use crate::types::{
    BrokerStats, DetailedStats, LatencyRecord, Percentiles, SlaCompliance, Stats,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Incrementally maintained counters
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RunningTotals {
    pub count: u64,
    pub failed: u64,
    pub rtt_sum: f64,
}

impl RunningTotals {
    pub fn add(&mut self, record: &LatencyRecord) {
        self.count += 1;
        if record.is_failure() {
            self.failed += 1;
        }
        self.rtt_sum += record.rtt_ms;
    }

    pub fn remove(&mut self, record: &LatencyRecord) {
        self.count = self.count.saturating_sub(1);
        if record.is_failure() {
            self.failed = self.failed.saturating_sub(1);
        }
        if self.count == 0 {
            // no float residue once the window drains
            self.rtt_sum = 0.0;
        } else {
            self.rtt_sum = (self.rtt_sum - record.rtt_ms).max(0.0);
        }
    }

    pub fn avg_rtt(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.rtt_sum / self.count as f64
        }
    }

    pub fn to_stats(self, p99_rtt: f64) -> Stats {
        Stats {
            total_orders: self.count,
            failed_orders: self.failed,
            avg_rtt: self.avg_rtt(),
            p99_rtt,
        }
    }
}

/// Nearest-rank percentile over an ascending slice.
///
/// Rank is `ceil(p/100 * n)`, 1-indexed, computed on hundredths of a percent in
/// integer arithmetic. Returns 0 for an empty slice.
pub fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len() as u64;
    let hundredths = (percentile.clamp(0.0, 100.0) * 100.0).round() as u64;
    let rank = ((n * hundredths).div_ceil(10_000)).clamp(1, n);
    sorted[(rank - 1) as usize]
}

pub(crate) fn sort_ascending(values: &mut [f64]) {
    values.sort_unstable_by(|a, b| a.total_cmp(b));
}

#[derive(Debug, Default)]
struct Memo {
    generation: Option<u64>,
    sorted: Arc<Vec<f64>>,
}

/// Memoized sorted RTT sample keyed by store generation
#[derive(Debug, Default)]
pub(crate) struct PercentileCache {
    memo: Mutex<Memo>,
}

impl PercentileCache {
    /// Return the sorted sample for `generation`, rebuilding it with `snapshot`
    /// when the memo is older. `snapshot` returns the RTTs together with the
    /// generation they were read at.
    pub fn sorted_rtts<F>(&self, generation: u64, snapshot: F) -> Arc<Vec<f64>>
    where
        F: FnOnce() -> (Vec<f64>, u64),
    {
        let mut memo = self.memo.lock();
        if let Some(cached) = memo.generation {
            if cached >= generation {
                return memo.sorted.clone();
            }
        }

        let (mut rtts, observed) = snapshot();
        sort_ascending(&mut rtts);
        let sorted = Arc::new(rtts);
        memo.generation = Some(observed);
        memo.sorted = sorted.clone();
        tracing::debug!(
            "Percentile sample rebuilt: {} values at generation {}",
            sorted.len(),
            observed
        );
        sorted
    }
}

/// Full scan of a snapshot for the detailed breakdown
pub fn detailed_stats<'a, I>(records: I) -> DetailedStats
where
    I: IntoIterator<Item = &'a Arc<LatencyRecord>>,
{
    let mut total = RunningTotals::default();
    let mut total_latency_sum = 0.0;
    let mut overhead_sum = 0.0;
    let mut under = [0u64; 3];
    let mut rtts = Vec::new();
    let mut per_broker: BTreeMap<&str, (RunningTotals, Vec<f64>)> = BTreeMap::new();

    for record in records {
        total.add(record);
        total_latency_sum += record.total_latency_ms;
        overhead_sum += record.overhead_ms;
        for (slot, threshold) in under.iter_mut().zip([100.0, 150.0, 200.0]) {
            if record.total_latency_ms < threshold {
                *slot += 1;
            }
        }
        rtts.push(record.rtt_ms);

        let entry = per_broker.entry(record.broker.as_str()).or_default();
        entry.0.add(record);
        entry.1.push(record.rtt_ms);
    }

    if total.count == 0 {
        return DetailedStats::default();
    }

    let n = total.count as f64;
    sort_ascending(&mut rtts);
    let pct = |c: u64| c as f64 / n * 100.0;

    let brokers = per_broker
        .into_iter()
        .map(|(broker, (totals, mut broker_rtts))| {
            sort_ascending(&mut broker_rtts);
            BrokerStats {
                broker: broker.to_string(),
                total_orders: totals.count,
                failed_orders: totals.failed,
                avg_rtt: totals.avg_rtt(),
                p99_rtt: nearest_rank(&broker_rtts, 99.0),
            }
        })
        .collect();

    DetailedStats {
        total_orders: total.count,
        failed_orders: total.failed,
        failure_rate_pct: pct(total.failed),
        avg_rtt: total.avg_rtt(),
        avg_total_latency: total_latency_sum / n,
        avg_overhead: overhead_sum / n,
        rtt_percentiles: Percentiles {
            p50: nearest_rank(&rtts, 50.0),
            p90: nearest_rank(&rtts, 90.0),
            p95: nearest_rank(&rtts, 95.0),
            p99: nearest_rank(&rtts, 99.0),
        },
        sla: SlaCompliance {
            under_100ms_pct: pct(under[0]),
            under_150ms_pct: pct(under[1]),
            under_200ms_pct: pct(under[2]),
        },
        brokers,
    }
}
