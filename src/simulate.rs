//! Synthetic latency feed for demoing the dashboard without a live broker

use crate::ingest::IngestGateway;
use crate::types::{LatencySubmission, OrderStatus};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

const BROKERS: &[&str] = &["zerodha", "angel", "dhan", "fyers", "upstox"];
const SYMBOLS: &[&str] = &["RELIANCE", "SBIN", "INFY", "TCS", "NIFTY24DECFUT", "BANKNIFTY24DEC48000CE"];
const ORDER_TYPES: &[&str] = &["MARKET", "LIMIT", "SL", "SL-M"];
const ERRORS: &[&str] = &[
    "RMS: Margin Exceeds",
    "Order price is out of circuit range",
    "Connection timed out",
];

/// Generates plausible order latency measurements
pub struct DemoFeed {
    rng: StdRng,
    failure_rate: f64,
    sequence: u64,
}

impl DemoFeed {
    pub fn new(failure_rate: f64) -> Self {
        Self::with_rng(StdRng::from_os_rng(), failure_rate)
    }

    pub fn seeded(seed: u64, failure_rate: f64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), failure_rate)
    }

    fn with_rng(rng: StdRng, failure_rate: f64) -> Self {
        Self {
            rng,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            sequence: 0,
        }
    }

    pub fn next_submission(&mut self) -> LatencySubmission {
        self.sequence += 1;
        let validation = self.rng.random_range(0.5..6.0);
        let response = self.rng.random_range(15.0..140.0);
        let overhead = self.rng.random_range(2.0..25.0);
        // occasional slow outlier so p99 has something to show
        let response = if self.rng.random_bool(0.02) { response * 4.0 } else { response };
        let total = validation + response + overhead;
        let rtt = response * self.rng.random_range(0.85..1.0);
        let failed = self.rng.random_bool(self.failure_rate);

        LatencySubmission {
            order_id: format!("DEMO{:08}", self.sequence),
            broker: pick(&mut self.rng, BROKERS).to_string(),
            symbol: pick(&mut self.rng, SYMBOLS).to_string(),
            order_type: pick(&mut self.rng, ORDER_TYPES).to_string(),
            timestamp: None,
            rtt_ms: round2(rtt),
            total_latency_ms: round2(total),
            validation_latency_ms: round2(validation),
            response_latency_ms: round2(response),
            overhead_ms: round2(overhead),
            status: if failed { OrderStatus::Failure } else { OrderStatus::Success },
            error: failed.then(|| pick(&mut self.rng, ERRORS).to_string()),
        }
    }

    /// Push one submission per `interval` into the gateway until the task is dropped
    pub async fn run(mut self, gateway: Arc<IngestGateway>, interval: Duration) {
        tracing::info!("Demo latency feed started ({:?} interval)", interval);
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            gateway.record(self.next_submission());
        }
    }
}

fn pick<'a>(rng: &mut StdRng, options: &[&'a str]) -> &'a str {
    options[rng.random_range(0..options.len())]
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
