//! HTTP client for a running telemetry server

use crate::api::{ErrorBody, RecordedResponse};
use crate::error::{Result, TelemetryError};
use crate::types::{DetailedStats, LatencyRecord, LatencySubmission, Stats};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

#[derive(Clone)]
pub struct TelemetryClient {
    http: Client,
    base_url: String,
}

impl TelemetryClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn stats(&self) -> Result<Stats> {
        let url = format!("{}/api/stats", self.base_url);
        decode(self.http.get(&url).send().await?).await
    }

    pub async fn detailed_stats(&self) -> Result<DetailedStats> {
        let url = format!("{}/api/stats/detailed", self.base_url);
        decode(self.http.get(&url).send().await?).await
    }

    pub async fn recent_logs(&self, limit: Option<usize>) -> Result<Vec<LatencyRecord>> {
        let url = format!("{}/api/logs", self.base_url);
        let mut request = self.http.get(&url);
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        decode(request.send().await?).await
    }

    pub async fn logs_for_order(&self, order_id: &str) -> Result<Vec<LatencyRecord>> {
        let url = format!("{}/api/logs", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("order_id", order_id)])
            .send()
            .await?;
        decode(resp).await
    }

    /// Submit a measurement, returning the assigned id
    pub async fn record(&self, submission: &LatencySubmission) -> Result<u64> {
        let url = format!("{}/api/logs", self.base_url);
        let resp = self.http.post(&url).json(submission).send().await?;
        let recorded: RecordedResponse = decode(resp).await?;
        Ok(recorded.id)
    }

    /// Raw CSV export
    pub async fn export_csv(&self) -> Result<String> {
        let url = format!("{}/export", self.base_url);
        let resp = check(self.http.get(&url).send().await?).await?;
        Ok(resp.text().await?)
    }
}

async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.message)
        .unwrap_or(text);
    Err(TelemetryError::Api {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    Ok(check(resp).await?.json().await?)
}
