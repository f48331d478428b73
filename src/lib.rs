//! Order Latency Telemetry
//!
//! Records per-order execution latency from the trading path and serves
//! aggregate statistics to the latency dashboard.
//!
//! ## Architecture
//!
//! ```text
//! Order execution → IngestGateway → LatencyStore (+ aggregator) → QueryService → HTTP API
//!                        ↓
//!                  archive queue → SqliteArchive
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod export;
pub mod ingest;
pub mod query;
pub mod simulate;
pub mod storage;
pub mod store;
pub mod types;

#[cfg(test)]
mod types_tests;
#[cfg(test)]
mod integration_tests;
