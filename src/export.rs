//! CSV export of the retained window
//!
//! Rows are produced in fixed-size chunks from a store snapshot so the full
//! serialized export never has to sit in memory at once.

use crate::error::{Result, TelemetryError};
use crate::store::Snapshot;
use crate::types::LatencyRecord;
use chrono::{DateTime, FixedOffset, Utc};
use std::fmt::Write;

/// Column order of the export, matching the JSON record fields
pub const CSV_COLUMNS: [&str; 13] = [
    "id",
    "order_id",
    "broker",
    "symbol",
    "order_type",
    "timestamp",
    "rtt_ms",
    "total_latency_ms",
    "validation_latency_ms",
    "response_latency_ms",
    "overhead_ms",
    "status",
    "error",
];

/// How timestamps are rendered for humans
#[derive(Debug, Clone)]
pub struct ExportFormat {
    pub offset: FixedOffset,
    pub timestamp_format: String,
    pub rows_per_chunk: usize,
}

impl ExportFormat {
    /// Falls back to RFC 3339 when the pattern cannot be rendered
    pub fn format_timestamp(&self, ts: &DateTime<Utc>) -> String {
        let local = ts.with_timezone(&self.offset);
        let mut out = String::new();
        if write!(out, "{}", local.format(&self.timestamp_format)).is_err() {
            return local.to_rfc3339();
        }
        out
    }

    /// Attachment name stamped with the export time in the export zone
    pub fn file_name(&self, now: DateTime<Utc>) -> String {
        format!(
            "latency_logs_{}.csv",
            now.with_timezone(&self.offset).format("%Y%m%d_%H%M%S")
        )
    }
}

fn row(record: &LatencyRecord, format: &ExportFormat) -> [String; 13] {
    [
        record.id.to_string(),
        record.order_id.clone(),
        record.broker.clone(),
        record.symbol.clone(),
        record.order_type.to_string(),
        format.format_timestamp(&record.timestamp),
        record.rtt_ms.to_string(),
        record.total_latency_ms.to_string(),
        record.validation_latency_ms.to_string(),
        record.response_latency_ms.to_string(),
        record.overhead_ms.to_string(),
        record.status.to_string(),
        record.error.clone().unwrap_or_default(),
    ]
}

/// Chunked CSV encoder over a snapshot; the first chunk carries the header
pub struct CsvExport {
    snapshot: Snapshot,
    format: ExportFormat,
    position: usize,
    header_written: bool,
}

impl CsvExport {
    pub fn new(snapshot: Snapshot, format: ExportFormat) -> Self {
        Self {
            snapshot,
            format,
            position: 0,
            header_written: false,
        }
    }

    pub fn row_count(&self) -> usize {
        self.snapshot.len()
    }

    fn encode_chunk(&mut self) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());

        if !self.header_written {
            writer.write_record(CSV_COLUMNS)?;
            self.header_written = true;
        }

        let end = (self.position + self.format.rows_per_chunk).min(self.snapshot.len());
        for index in self.position..end {
            if let Some(record) = self.snapshot.get(index) {
                writer.write_record(row(record, &self.format))?;
            }
        }
        self.position = end;

        writer
            .into_inner()
            .map_err(|e| TelemetryError::Export(e.to_string()))
    }

    /// Drain every chunk into one buffer
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for chunk in self {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl Iterator for CsvExport {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.header_written && self.position >= self.snapshot.len() {
            return None;
        }
        Some(self.encode_chunk())
    }
}
