//! Core record and statistics types

use crate::error::{Result, TelemetryError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Order type, closed over the kinds the dashboard distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
    Other,
}

impl OrderType {
    /// Map a broker-supplied order type onto the closed set.
    /// Anything not recognisably MARKET or LIMIT (SL, SL-M, ...) becomes OTHER.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "MARKET" | "MKT" => Self::Market,
            "LIMIT" | "LMT" => Self::Limit,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
            Self::Other => "OTHER",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    #[serde(alias = "success")]
    Success,
    #[serde(alias = "failure")]
    Failure,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            other => Err(TelemetryError::validation(
                "status",
                format!("must be SUCCESS or FAILURE, got '{}'", other),
            )),
        }
    }
}

/// A stored latency measurement for one order operation.
///
/// Never mutated after the store assigns its id; shared read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyRecord {
    pub id: u64,
    pub order_id: String,
    pub broker: String,
    pub symbol: String,
    pub order_type: OrderType,
    /// Creation instant, epoch millis on the wire
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub rtt_ms: f64,
    pub total_latency_ms: f64,
    pub validation_latency_ms: f64,
    pub response_latency_ms: f64,
    pub overhead_ms: f64,
    pub status: OrderStatus,
    pub error: Option<String>,
}

impl LatencyRecord {
    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }

    /// Sum of the three phase latencies
    pub fn breakdown_sum(&self) -> f64 {
        self.validation_latency_ms + self.response_latency_ms + self.overhead_ms
    }
}

/// A validated record awaiting id assignment by the store
#[derive(Debug, Clone, PartialEq)]
pub struct NewLatencyRecord {
    pub order_id: String,
    pub broker: String,
    pub symbol: String,
    pub order_type: OrderType,
    pub timestamp: DateTime<Utc>,
    pub rtt_ms: f64,
    pub total_latency_ms: f64,
    pub validation_latency_ms: f64,
    pub response_latency_ms: f64,
    pub overhead_ms: f64,
    pub status: OrderStatus,
    pub error: Option<String>,
}

impl NewLatencyRecord {
    /// Reject non-finite or negative latency fields
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("rtt_ms", self.rtt_ms),
            ("total_latency_ms", self.total_latency_ms),
            ("validation_latency_ms", self.validation_latency_ms),
            ("response_latency_ms", self.response_latency_ms),
            ("overhead_ms", self.overhead_ms),
        ] {
            check_latency(field, value)?;
        }
        Ok(())
    }

    pub(crate) fn into_record(self, id: u64) -> LatencyRecord {
        LatencyRecord {
            id,
            order_id: self.order_id,
            broker: self.broker,
            symbol: self.symbol,
            order_type: self.order_type,
            timestamp: self.timestamp,
            rtt_ms: self.rtt_ms,
            total_latency_ms: self.total_latency_ms,
            validation_latency_ms: self.validation_latency_ms,
            response_latency_ms: self.response_latency_ms,
            overhead_ms: self.overhead_ms,
            status: self.status,
            error: self.error,
        }
    }
}

pub(crate) fn check_latency(field: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(TelemetryError::validation(field, "must be a finite number"));
    }
    if value < 0.0 {
        return Err(TelemetryError::validation(
            field,
            format!("must be non-negative, got {}", value),
        ));
    }
    Ok(())
}

/// Write request from the order execution path (everything but the id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySubmission {
    pub order_id: String,
    pub broker: String,
    pub symbol: String,
    /// Free-form broker order type, normalized at ingest
    pub order_type: String,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub timestamp: Option<DateTime<Utc>>,
    pub rtt_ms: f64,
    pub total_latency_ms: f64,
    pub validation_latency_ms: f64,
    pub response_latency_ms: f64,
    pub overhead_ms: f64,
    pub status: OrderStatus,
    #[serde(default)]
    pub error: Option<String>,
}

/// Aggregate statistics served to the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Stats {
    pub total_orders: u64,
    pub failed_orders: u64,
    pub avg_rtt: f64,
    pub p99_rtt: f64,
}

impl Stats {
    /// Failure rate in percent, 0 when empty
    pub fn failure_rate_pct(&self) -> f64 {
        if self.total_orders == 0 {
            0.0
        } else {
            self.failed_orders as f64 / self.total_orders as f64 * 100.0
        }
    }
}

/// Nearest-rank RTT percentiles
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Share of orders whose total latency stayed under each threshold (percent)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SlaCompliance {
    pub under_100ms_pct: f64,
    pub under_150ms_pct: f64,
    pub under_200ms_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerStats {
    pub broker: String,
    pub total_orders: u64,
    pub failed_orders: u64,
    pub avg_rtt: f64,
    pub p99_rtt: f64,
}

/// Full breakdown over the retained window
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetailedStats {
    pub total_orders: u64,
    pub failed_orders: u64,
    pub failure_rate_pct: f64,
    pub avg_rtt: f64,
    pub avg_total_latency: f64,
    pub avg_overhead: f64,
    pub rtt_percentiles: Percentiles,
    pub sla: SlaCompliance,
    pub brokers: Vec<BrokerStats>,
}
