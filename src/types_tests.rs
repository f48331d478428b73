//! Tests for core types

#[cfg(test)]
mod tests {
    use super::super::types::*;
    use chrono::{TimeZone, Utc};

    fn sample_record() -> LatencyRecord {
        LatencyRecord {
            id: 7,
            order_id: "ORD123".to_string(),
            broker: "zerodha".to_string(),
            symbol: "RELIANCE".to_string(),
            order_type: OrderType::Market,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 15, 9, 15, 30).unwrap(),
            rtt_ms: 45.2,
            total_latency_ms: 52.1,
            validation_latency_ms: 2.0,
            response_latency_ms: 45.2,
            overhead_ms: 4.9,
            status: OrderStatus::Success,
            error: None,
        }
    }

    #[test]
    fn test_order_type_serialization() {
        assert_eq!(serde_json::to_string(&OrderType::Market).unwrap(), "\"MARKET\"");
        assert_eq!(serde_json::to_string(&OrderType::Limit).unwrap(), "\"LIMIT\"");
        assert_eq!(serde_json::to_string(&OrderType::Other).unwrap(), "\"OTHER\"");
    }

    #[test]
    fn test_order_type_normalize() {
        assert_eq!(OrderType::normalize("market"), OrderType::Market);
        assert_eq!(OrderType::normalize(" LMT "), OrderType::Limit);
        assert_eq!(OrderType::normalize("SL-M"), OrderType::Other);
        assert_eq!(OrderType::normalize(""), OrderType::Other);
    }

    #[test]
    fn test_order_status_deserialization() {
        let success: OrderStatus = serde_json::from_str("\"SUCCESS\"").unwrap();
        let failure: OrderStatus = serde_json::from_str("\"failure\"").unwrap();
        assert_eq!(success, OrderStatus::Success);
        assert_eq!(failure, OrderStatus::Failure);
        assert!(serde_json::from_str::<OrderStatus>("\"PENDING\"").is_err());
    }

    #[test]
    fn test_order_status_from_str() {
        assert_eq!("success".parse::<OrderStatus>().unwrap(), OrderStatus::Success);
        assert_eq!(" FAILURE ".parse::<OrderStatus>().unwrap(), OrderStatus::Failure);
        assert!("rejected".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_record_wire_format() {
        let json = serde_json::to_value(sample_record()).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["order_id"], "ORD123");
        assert_eq!(json["order_type"], "MARKET");
        assert_eq!(json["status"], "SUCCESS");
        assert_eq!(json["timestamp"], 1_710_494_130_000i64);
        assert_eq!(json["rtt_ms"], 45.2);
        assert!(json["error"].is_null());
    }

    #[test]
    fn test_record_breakdown_sum() {
        let record = sample_record();
        assert!((record.breakdown_sum() - 52.1).abs() < 1e-9);
        assert!(!record.is_failure());
    }

    #[test]
    fn test_submission_without_timestamp() {
        let json = r#"{
            "order_id": "ORD9",
            "broker": "angel",
            "symbol": "SBIN",
            "order_type": "SL",
            "rtt_ms": 30.0,
            "total_latency_ms": 40.0,
            "validation_latency_ms": 1.0,
            "response_latency_ms": 30.0,
            "overhead_ms": 9.0,
            "status": "FAILURE",
            "error": "RMS: Margin Exceeds"
        }"#;
        let submission: LatencySubmission = serde_json::from_str(json).unwrap();
        assert!(submission.timestamp.is_none());
        assert_eq!(submission.order_type, "SL");
        assert_eq!(submission.status, OrderStatus::Failure);
        assert_eq!(submission.error.as_deref(), Some("RMS: Margin Exceeds"));
    }

    #[test]
    fn test_new_record_validation() {
        let record = sample_record();
        let mut new = NewLatencyRecord {
            order_id: record.order_id,
            broker: record.broker,
            symbol: record.symbol,
            order_type: record.order_type,
            timestamp: record.timestamp,
            rtt_ms: record.rtt_ms,
            total_latency_ms: record.total_latency_ms,
            validation_latency_ms: record.validation_latency_ms,
            response_latency_ms: record.response_latency_ms,
            overhead_ms: record.overhead_ms,
            status: record.status,
            error: None,
        };
        assert!(new.validate().is_ok());

        new.overhead_ms = -0.1;
        assert!(new.validate().is_err());

        new.overhead_ms = f64::INFINITY;
        assert!(new.validate().is_err());
    }

    #[test]
    fn test_stats_failure_rate() {
        let stats = Stats {
            total_orders: 200,
            failed_orders: 5,
            avg_rtt: 40.0,
            p99_rtt: 90.0,
        };
        assert!((stats.failure_rate_pct() - 2.5).abs() < 1e-9);
        assert_eq!(Stats::default().failure_rate_pct(), 0.0);
    }
}
