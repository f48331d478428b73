//! Dashboard HTTP API
//!
//! Read endpoints polled by the latency dashboard, the CSV export, and the
//! internal write endpoint used by out-of-process order execution.

use crate::error::TelemetryError;
use crate::ingest::IngestGateway;
use crate::query::QueryService;
use crate::types::{DetailedStats, LatencyRecord, LatencySubmission, Stats};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

/// State shared across handlers
#[derive(Clone)]
pub struct ApiState {
    pub query: QueryService,
    pub gateway: Arc<IngestGateway>,
}

impl ApiState {
    pub fn new(query: QueryService, gateway: Arc<IngestGateway>) -> Self {
        Self { query, gateway }
    }
}

/// Error body matching the dashboard's `{status, message}` convention
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: String,
    pub message: String,
}

pub struct ApiError(TelemetryError);

impl From<TelemetryError> for ApiError {
    fn from(err: TelemetryError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TelemetryError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            TelemetryError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            TelemetryError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("API request failed: {}", self.0);
        }
        let body = ErrorBody {
            status: "error".to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub order_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordedResponse {
    pub id: u64,
}

// ============ HTTP API Handlers ============

/// Recent logs, or every log for one order id
async fn get_logs(
    State(state): State<ApiState>,
    Query(params): Query<LogsQuery>,
) -> Json<Vec<Arc<LatencyRecord>>> {
    let logs = match params.order_id.as_deref().map(str::trim) {
        Some(order_id) if !order_id.is_empty() => state.query.get_logs_by_order_id(order_id),
        _ => state.query.get_recent_logs(params.limit),
    };
    Json(logs)
}

/// Record a completed order's latency
async fn post_log(
    State(state): State<ApiState>,
    Json(submission): Json<LatencySubmission>,
) -> Result<(StatusCode, Json<RecordedResponse>), ApiError> {
    let record = state.gateway.submit(submission)?;
    Ok((StatusCode::CREATED, Json(RecordedResponse { id: record.id })))
}

async fn get_stats(State(state): State<ApiState>) -> Json<Stats> {
    Json(state.query.get_stats())
}

async fn get_detailed_stats(State(state): State<ApiState>) -> Json<DetailedStats> {
    Json(state.query.get_detailed_stats())
}

/// CSV attachment streamed chunk by chunk
async fn export_csv(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let export = state.query.export_csv();
    let file_name = state.query.export_format().file_name(Utc::now());
    tracing::info!("Exporting {} latency records to {}", export.row_count(), file_name);

    let body = Body::from_stream(futures_util::stream::iter(export));
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file_name),
        )
        .body(body)
        .map_err(|e| TelemetryError::Export(e.to_string()))?;
    Ok(response)
}

/// Health check
async fn health_check() -> &'static str {
    "OK"
}

/// Create API router
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/logs", get(get_logs).post(post_log))
        .route("/api/stats", get(get_stats))
        .route("/api/stats/detailed", get(get_detailed_stats))
        .route("/export", get(export_csv))
        .with_state(state)
}

/// Serve the API until ctrl-c
pub async fn start_server(state: ApiState, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Latency dashboard API listening on http://{}", listener.local_addr()?);
    serve(listener, state).await
}

/// Serve on an already bound listener
pub async fn serve(listener: tokio::net::TcpListener, state: ApiState) -> std::io::Result<()> {
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
        })
        .await
}
