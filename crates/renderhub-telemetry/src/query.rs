//! Tabular analytics queries against the metrics backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{TelemetryError, TelemetryResult};

/// Executes analytics queries and returns their tables.
#[async_trait]
pub trait TelemetryQueryService: Send + Sync {
    async fn execute_query(
        &self,
        app_id: &str,
        api_key: &str,
        query: &str,
    ) -> TelemetryResult<QueryResponse>;
}

/// Result of a query: zero or more tables.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct QueryResponse {
    #[serde(default)]
    pub tables: Vec<QueryTable>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct QueryTable {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub columns: Vec<QueryColumn>,
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct QueryColumn {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl QueryResponse {
    pub fn from_json(body: &str) -> TelemetryResult<Self> {
        serde_json::from_str(body).map_err(|e| TelemetryError::Decode(e.to_string()))
    }

    /// The first table, which holds the rows of a single-statement query.
    pub fn primary_table(&self) -> Option<&QueryTable> {
        self.tables.first()
    }
}

/// REST client for the Application Insights query API.
#[derive(Clone)]
pub struct AppInsightsClient {
    client: reqwest::Client,
    base_url: String,
}

impl AppInsightsClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> TelemetryResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn query_url(&self, app_id: &str) -> String {
        format!("{}/v1/apps/{}/query", self.base_url, app_id)
    }
}

#[async_trait]
impl TelemetryQueryService for AppInsightsClient {
    async fn execute_query(
        &self,
        app_id: &str,
        api_key: &str,
        query: &str,
    ) -> TelemetryResult<QueryResponse> {
        let resp = self
            .client
            .get(self.query_url(app_id))
            .query(&[("query", query)])
            .header(reqwest::header::ACCEPT, "application/json")
            .header("x-api-key", api_key)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TelemetryError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }

        let body = resp.text().await?;
        let response = QueryResponse::from_json(&body)?;
        debug!(
            %app_id,
            tables = response.tables.len(),
            "telemetry query completed"
        );
        Ok(response)
    }
}
