//! Ingest gateway between the order execution path and the store
//!
//! Validates and normalizes submissions, appends them, and hands the stored
//! record to the archive queue without waiting on it.

use crate::error::{Result, TelemetryError};
use crate::storage::ArchiveHandle;
use crate::store::LatencyStore;
use crate::types::{check_latency, LatencyRecord, LatencySubmission, NewLatencyRecord, OrderType};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct IngestGateway {
    store: Arc<LatencyStore>,
    archive: Option<ArchiveHandle>,
    breakdown_tolerance_ms: f64,
}

impl IngestGateway {
    pub fn new(store: Arc<LatencyStore>) -> Self {
        Self {
            store,
            archive: None,
            breakdown_tolerance_ms: 1.0,
        }
    }

    pub fn with_archive(mut self, archive: ArchiveHandle) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_breakdown_tolerance(mut self, tolerance_ms: f64) -> Self {
        self.breakdown_tolerance_ms = tolerance_ms;
        self
    }

    pub fn store(&self) -> &Arc<LatencyStore> {
        &self.store
    }

    /// Validate, normalize and append a submission
    pub fn submit(&self, submission: LatencySubmission) -> Result<Arc<LatencyRecord>> {
        let draft = self.normalize(submission, Utc::now())?;
        let record = self.store.insert(draft)?;

        if let Some(archive) = &self.archive {
            archive.enqueue(record.clone());
        }

        tracing::debug!(
            "Recorded latency for order {} ({} {}): rtt={:.2}ms total={:.2}ms {}",
            record.order_id,
            record.broker,
            record.symbol,
            record.rtt_ms,
            record.total_latency_ms,
            record.status
        );
        Ok(record)
    }

    /// Best-effort variant for the trading path: failures are logged and
    /// dropped so telemetry can never interrupt order flow
    pub fn record(&self, submission: LatencySubmission) -> Option<u64> {
        let order_id = submission.order_id.clone();
        match self.submit(submission) {
            Ok(record) => Some(record.id),
            Err(e) => {
                tracing::warn!("Dropping latency record for order {}: {}", order_id, e);
                None
            }
        }
    }

    /// Turn a raw submission into a store-ready record
    pub fn normalize(
        &self,
        submission: LatencySubmission,
        received_at: DateTime<Utc>,
    ) -> Result<NewLatencyRecord> {
        let order_id = required("order_id", &submission.order_id)?;
        let broker = required("broker", &submission.broker)?;
        let symbol = required("symbol", &submission.symbol)?;

        for (field, value) in [
            ("rtt_ms", submission.rtt_ms),
            ("total_latency_ms", submission.total_latency_ms),
            ("validation_latency_ms", submission.validation_latency_ms),
            ("response_latency_ms", submission.response_latency_ms),
            ("overhead_ms", submission.overhead_ms),
        ] {
            check_latency(field, value)?;
        }

        let order_type = OrderType::normalize(&submission.order_type);
        if order_type == OrderType::Other && !submission.order_type.trim().is_empty() {
            tracing::debug!(
                "Order type '{}' for order {} recorded as OTHER",
                submission.order_type,
                order_id
            );
        }

        let breakdown = submission.validation_latency_ms
            + submission.response_latency_ms
            + submission.overhead_ms;
        let gap = (breakdown - submission.total_latency_ms).abs();
        if gap > self.breakdown_tolerance_ms {
            tracing::warn!(
                "Latency breakdown for order {} is off by {:.3}ms (phases {:.3}ms, total {:.3}ms)",
                order_id,
                gap,
                breakdown,
                submission.total_latency_ms
            );
        }

        let error = submission
            .error
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());
        let error = if submission.status.is_failure() {
            if error.is_none() {
                tracing::warn!("Failure recorded for order {} without error detail", order_id);
            }
            error
        } else {
            if let Some(e) = &error {
                tracing::debug!("Ignoring error '{}' on successful order {}", e, order_id);
            }
            None
        };

        let timestamp = truncate_to_millis(submission.timestamp.unwrap_or(received_at));

        Ok(NewLatencyRecord {
            order_id,
            broker,
            symbol,
            order_type,
            timestamp,
            rtt_ms: submission.rtt_ms,
            total_latency_ms: submission.total_latency_ms,
            validation_latency_ms: submission.validation_latency_ms,
            response_latency_ms: submission.response_latency_ms,
            overhead_ms: submission.overhead_ms,
            status: submission.status,
            error,
        })
    }
}

fn required(field: &'static str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TelemetryError::validation(field, "is required"));
    }
    Ok(trimmed.to_string())
}

fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}
