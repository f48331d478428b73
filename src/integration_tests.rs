//! End-to-end tests: HTTP API over a real listener, client round trips, archive restore

#[cfg(test)]
mod tests {
    use crate::api::{self, ApiState};
    use crate::client::TelemetryClient;
    use crate::config::ExportConfig;
    use crate::error::TelemetryError;
    use crate::export::CSV_COLUMNS;
    use crate::ingest::IngestGateway;
    use crate::query::QueryService;
    use crate::storage::{spawn_archive_writer, LatencyArchive, SqliteArchive};
    use crate::store::{LatencyStore, RetentionPolicy};
    use crate::types::{LatencySubmission, OrderStatus, OrderType};
    use std::sync::Arc;
    use std::time::Duration;

    fn submission(order_id: &str, broker: &str, rtt_ms: f64) -> LatencySubmission {
        LatencySubmission {
            order_id: order_id.to_string(),
            broker: broker.to_string(),
            symbol: "RELIANCE".to_string(),
            order_type: "MARKET".to_string(),
            timestamp: None,
            rtt_ms,
            total_latency_ms: rtt_ms + 10.0,
            validation_latency_ms: 2.0,
            response_latency_ms: rtt_ms,
            overhead_ms: 8.0,
            status: OrderStatus::Success,
            error: None,
        }
    }

    async fn spawn_server(store: Arc<LatencyStore>) -> TelemetryClient {
        let format = ExportConfig::default().format().unwrap();
        let query = QueryService::new(store.clone(), format).with_limits(100, 1_000);
        let gateway = Arc::new(IngestGateway::new(store));
        let state = ApiState::new(query, gateway);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, api::create_router(state)).await.unwrap();
        });

        TelemetryClient::new(&format!("http://{}", addr)).unwrap()
    }

    #[tokio::test]
    async fn test_record_and_query_over_http() {
        let store = Arc::new(LatencyStore::new(RetentionPolicy::max_records(1_000)));
        let client = spawn_server(store.clone()).await;

        let first = client.record(&submission("ORD1", "zerodha", 40.0)).await.unwrap();
        let second = client.record(&submission("ORD2", "angel", 60.0)).await.unwrap();
        let retry = client.record(&submission("ORD1", "zerodha", 80.0)).await.unwrap();
        assert!(first < second && second < retry);
        assert_eq!(store.len(), 3);

        let recent = client.recent_logs(None).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].id, retry);
        assert_eq!(recent[0].order_type, OrderType::Market);

        let limited = client.recent_logs(Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);

        let ord1 = client.logs_for_order("ORD1").await.unwrap();
        assert_eq!(ord1.len(), 2);
        assert!(ord1.iter().all(|log| log.order_id == "ORD1"));

        assert!(client.logs_for_order("MISSING").await.unwrap().is_empty());

        let stats = client.stats().await.unwrap();
        assert_eq!(stats.total_orders, 3);
        assert_eq!(stats.failed_orders, 0);
        assert!((stats.avg_rtt - 60.0).abs() < 1e-9);
        assert_eq!(stats.p99_rtt, 80.0);

        let detailed = client.detailed_stats().await.unwrap();
        assert_eq!(detailed.total_orders, 3);
        assert_eq!(detailed.brokers.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_submission_is_rejected() {
        let store = Arc::new(LatencyStore::default());
        let client = spawn_server(store.clone()).await;

        let err = client
            .record(&submission("ORD1", "zerodha", -5.0))
            .await
            .unwrap_err();
        match err {
            TelemetryError::Api { status, message } => {
                assert_eq!(status, 422);
                assert!(message.contains("rtt_ms"));
            }
            other => panic!("unexpected error: {}", other),
        }

        let err = client.record(&submission("  ", "zerodha", 5.0)).await.unwrap_err();
        assert!(matches!(err, TelemetryError::Api { status: 422, .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_empty_stats_over_http() {
        let client = spawn_server(Arc::new(LatencyStore::default())).await;
        let stats = client.stats().await.unwrap();
        assert_eq!(stats.total_orders, 0);
        assert_eq!(stats.avg_rtt, 0.0);
        assert_eq!(stats.p99_rtt, 0.0);
        assert!(client.recent_logs(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_csv_export_over_http() {
        let store = Arc::new(LatencyStore::default());
        let client = spawn_server(store).await;

        let mut failed = submission("ORD9", "dhan", 33.0);
        failed.status = OrderStatus::Failure;
        failed.error = Some("RMS: Margin Exceeds, retry later".to_string());
        client.record(&submission("ORD8", "dhan", 21.5)).await.unwrap();
        client.record(&failed).await.unwrap();

        let csv = client.export_csv().await.unwrap();
        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), CSV_COLUMNS.to_vec());

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        let last = &rows[1];
        assert_eq!(last.get(1), Some("ORD9"));
        assert_eq!(last.get(12), Some("RMS: Margin Exceeds, retry later"));
        // 12-hour clock with AM/PM
        let ts = last.get(5).unwrap();
        assert!(ts.ends_with("AM") || ts.ends_with("PM"));
    }

    #[tokio::test]
    async fn test_archive_restores_into_fresh_store() {
        let archive = Arc::new(SqliteArchive::in_memory(Duration::from_secs(2)).await.unwrap());
        let dyn_archive: Arc<dyn LatencyArchive> = archive.clone();

        let store = Arc::new(LatencyStore::default());
        let (handle, writer) = spawn_archive_writer(dyn_archive.clone(), 64, 16);
        let gateway = IngestGateway::new(store.clone()).with_archive(handle);
        for i in 0..10 {
            gateway
                .submit(submission(&format!("ORD{}", i), "fyers", 10.0 + i as f64))
                .unwrap();
        }
        drop(gateway);
        writer.await.unwrap();
        assert_eq!(archive.count().await.unwrap(), 10);

        let restored_store = LatencyStore::new(RetentionPolicy::max_records(5));
        let records = dyn_archive.load_recent(5).await.unwrap();
        assert_eq!(restored_store.restore(records), 5);

        let recent = restored_store.recent(10);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].order_id, "ORD9");
        assert_eq!(recent[4].order_id, "ORD5");
        assert_eq!(restored_store.stats(), store_stats_tail(&store, 5));
    }

    fn store_stats_tail(store: &LatencyStore, n: usize) -> crate::types::Stats {
        let tail = LatencyStore::new(RetentionPolicy::max_records(n));
        let records: Vec<_> = store
            .all()
            .iter()
            .map(|record| (**record).clone())
            .collect();
        tail.restore(records);
        tail.stats()
    }
}
