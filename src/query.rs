//! Read-only query façade used by the dashboard

use crate::export::{CsvExport, ExportFormat};
use crate::store::LatencyStore;
use crate::types::{DetailedStats, LatencyRecord, Stats};
use std::sync::Arc;

#[derive(Clone)]
pub struct QueryService {
    store: Arc<LatencyStore>,
    default_limit: usize,
    max_limit: usize,
    export_format: ExportFormat,
}

impl QueryService {
    pub fn new(store: Arc<LatencyStore>, export_format: ExportFormat) -> Self {
        Self {
            store,
            default_limit: 100,
            max_limit: 1_000,
            export_format,
        }
    }

    pub fn with_limits(mut self, default_limit: usize, max_limit: usize) -> Self {
        self.max_limit = max_limit.max(1);
        self.default_limit = default_limit.clamp(1, self.max_limit);
        self
    }

    /// Most recent records first; `None` uses the default page size and
    /// oversized limits are clamped
    pub fn get_recent_logs(&self, limit: Option<usize>) -> Vec<Arc<LatencyRecord>> {
        let limit = limit.unwrap_or(self.default_limit).min(self.max_limit);
        self.store.recent(limit)
    }

    /// Every retained record for an order id; empty when nothing matches
    pub fn get_logs_by_order_id(&self, order_id: &str) -> Vec<Arc<LatencyRecord>> {
        self.store.get_by_order_id(order_id.trim())
    }

    pub fn get_stats(&self) -> Stats {
        self.store.stats()
    }

    pub fn get_detailed_stats(&self) -> DetailedStats {
        self.store.detailed_stats()
    }

    /// Chunked CSV of the window as it stands right now
    pub fn export_csv(&self) -> CsvExport {
        CsvExport::new(self.store.all(), self.export_format.clone())
    }

    pub fn export_format(&self) -> &ExportFormat {
        &self.export_format
    }
}
