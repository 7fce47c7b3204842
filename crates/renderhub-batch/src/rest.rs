//! Batch data-plane REST client.
//!
//! Endpoints used:
//!
//! | Method | Path | Operation |
//! |---|---|---|
//! | GET | `/pools` | list pools |
//! | GET | `/pools/{id}` | get pool |
//! | GET | `/pools/{id}/nodes` | list nodes |
//! | POST | `/pools/{id}/removenodes` | remove nodes |
//! | POST | `/pools/{id}/resize` | fixed-scale resize |
//!
//! List responses are paged through `odata.nextLink`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use renderhub_core::{
    AllocationState, ComputeNode, ComputePool, NodeState, PoolAutoScaleSettings, PoolState,
    RenderingEnvironment, ScaleTargets,
};

use crate::client::{ComputePoolClient, ComputePoolClientFactory, MAX_NODES_PER_REMOVAL};
use crate::error::{PoolError, PoolResult};

// ── Wire types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "odata.nextLink", default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolDto {
    id: String,
    #[serde(default = "unknown_pool_state")]
    state: PoolState,
    #[serde(default = "unknown_allocation_state")]
    allocation_state: AllocationState,
    #[serde(default)]
    current_dedicated_nodes: u32,
    #[serde(default)]
    current_low_priority_nodes: u32,
    #[serde(default)]
    target_dedicated_nodes: u32,
    #[serde(default)]
    target_low_priority_nodes: u32,
    #[serde(default)]
    metadata: Vec<MetadataItem>,
}

#[derive(Debug, Deserialize)]
struct MetadataItem {
    name: String,
    #[serde(default)]
    value: String,
}

fn unknown_pool_state() -> PoolState {
    PoolState::Unknown
}

fn unknown_allocation_state() -> AllocationState {
    AllocationState::Unknown
}

impl From<PoolDto> for ComputePool {
    fn from(dto: PoolDto) -> Self {
        let metadata: HashMap<String, String> = dto
            .metadata
            .into_iter()
            .map(|item| (item.name, item.value))
            .collect();
        ComputePool {
            id: dto.id,
            state: dto.state,
            allocation_state: dto.allocation_state,
            current_dedicated: dto.current_dedicated_nodes,
            current_low_priority: dto.current_low_priority_nodes,
            target_dedicated: dto.target_dedicated_nodes,
            target_low_priority: dto.target_low_priority_nodes,
            autoscale: PoolAutoScaleSettings::from_metadata(&metadata),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeDto {
    id: String,
    #[serde(default = "unknown_node_state")]
    state: NodeState,
    #[serde(default)]
    is_dedicated: Option<bool>,
    #[serde(default)]
    last_boot_time: Option<DateTime<Utc>>,
    #[serde(default)]
    state_transition_time: Option<DateTime<Utc>>,
}

fn unknown_node_state() -> NodeState {
    NodeState::Unknown
}

impl From<NodeDto> for ComputeNode {
    fn from(dto: NodeDto) -> Self {
        ComputeNode {
            id: dto.id,
            state: dto.state,
            is_dedicated: dto.is_dedicated,
            last_boot_time: dto.last_boot_time,
            state_transition_time: dto.state_transition_time,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoveNodesBody<'a> {
    node_list: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResizeBody {
    target_dedicated_nodes: u32,
    target_low_priority_nodes: u32,
}

#[derive(Debug, Deserialize)]
struct BatchErrorBody {
    code: Option<String>,
    message: Option<BatchErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct BatchErrorMessage {
    value: Option<String>,
}

// ── Client ────────────────────────────────────────────────────────

/// REST client for one batch account.
pub struct BatchRestClient {
    client: reqwest::Client,
    base_url: String,
    api_version: String,
    access_token: String,
}

impl BatchRestClient {
    pub fn new(
        base_url: impl Into<String>,
        api_version: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> PoolResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_version: api_version.into(),
            access_token: access_token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_paged<T: DeserializeOwned>(&self, path: &str) -> PoolResult<Vec<T>> {
        let mut items = Vec::new();
        let mut resp = self
            .client
            .get(self.url(path))
            .query(&[("api-version", self.api_version.as_str())])
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        loop {
            let page: ListResponse<T> = decode(check_status(resp, path).await?).await?;
            items.extend(page.value);
            let Some(next) = page.next_link else {
                break;
            };
            // nextLink is absolute and already carries the api-version.
            resp = self
                .client
                .get(next)
                .bearer_auth(&self.access_token)
                .send()
                .await?;
        }
        Ok(items)
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> PoolResult<()> {
        let resp = self
            .client
            .post(self.url(path))
            .query(&[("api-version", self.api_version.as_str())])
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;
        check_status(resp, path).await?;
        Ok(())
    }
}

async fn check_status(resp: reqwest::Response, path: &str) -> PoolResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = describe_error(&body);
    if status == StatusCode::NOT_FOUND {
        return Err(PoolError::NotFound(format!("{path}: {message}")));
    }
    Err(PoolError::Status {
        status: status.as_u16(),
        message,
    })
}

fn describe_error(body: &str) -> String {
    match serde_json::from_str::<BatchErrorBody>(body) {
        Ok(err) => {
            let code = err.code.unwrap_or_default();
            let text = err.message.and_then(|m| m.value).unwrap_or_default();
            format!("{code} {text}").trim().to_string()
        }
        Err(_) => body.trim().to_string(),
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> PoolResult<T> {
    let body = resp.text().await?;
    serde_json::from_str(&body).map_err(|e| PoolError::Decode(e.to_string()))
}

#[async_trait]
impl ComputePoolClient for BatchRestClient {
    async fn list_pools(&self) -> PoolResult<Vec<ComputePool>> {
        let pools: Vec<PoolDto> = self.get_paged("/pools").await?;
        Ok(pools.into_iter().map(ComputePool::from).collect())
    }

    async fn list_nodes(&self, pool_id: &str) -> PoolResult<Vec<ComputeNode>> {
        let nodes: Vec<NodeDto> = self.get_paged(&format!("/pools/{pool_id}/nodes")).await?;
        Ok(nodes.into_iter().map(ComputeNode::from).collect())
    }

    async fn remove_nodes(&self, pool_id: &str, node_ids: &[String]) -> PoolResult<()> {
        if node_ids.len() > MAX_NODES_PER_REMOVAL {
            return Err(PoolError::InvalidRequest(format!(
                "cannot remove {} nodes in one call (max {MAX_NODES_PER_REMOVAL})",
                node_ids.len()
            )));
        }
        if node_ids.is_empty() {
            return Ok(());
        }
        self.post(
            &format!("/pools/{pool_id}/removenodes"),
            &RemoveNodesBody { node_list: node_ids },
        )
        .await?;
        debug!(pool = %pool_id, count = node_ids.len(), "node removal submitted");
        Ok(())
    }

    async fn get_pool(&self, pool_id: &str) -> PoolResult<Option<ComputePool>> {
        let path = format!("/pools/{pool_id}");
        let resp = self
            .client
            .get(self.url(&path))
            .query(&[("api-version", self.api_version.as_str())])
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        match check_status(resp, &path).await {
            Ok(resp) => {
                let pool: PoolDto = decode(resp).await?;
                Ok(Some(pool.into()))
            }
            Err(PoolError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn update_pool(&self, pool_id: &str, targets: ScaleTargets) -> PoolResult<()> {
        self.post(
            &format!("/pools/{pool_id}/resize"),
            &ResizeBody {
                target_dedicated_nodes: targets.dedicated,
                target_low_priority_nodes: targets.low_priority,
            },
        )
        .await?;
        debug!(
            pool = %pool_id,
            dedicated = targets.dedicated,
            low_priority = targets.low_priority,
            "pool resize submitted"
        );
        Ok(())
    }
}

// ── Factory ───────────────────────────────────────────────────────

/// Builds [`BatchRestClient`]s for environments' batch accounts.
#[derive(Clone)]
pub struct BatchClientFactory {
    api_version: String,
    access_token: String,
    timeout: Duration,
}

impl BatchClientFactory {
    pub fn new(
        api_version: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            access_token: access_token.into(),
            timeout,
        }
    }

    /// Read the bearer token from the named environment variable.
    pub fn from_env(api_version: impl Into<String>, token_var: &str, timeout: Duration) -> PoolResult<Self> {
        let token = std::env::var(token_var)
            .map_err(|_| PoolError::Credentials(format!("{token_var} is not set")))?;
        Ok(Self::new(api_version, token, timeout))
    }
}

impl ComputePoolClientFactory for BatchClientFactory {
    fn connect(&self, env: &RenderingEnvironment) -> PoolResult<Box<dyn ComputePoolClient>> {
        let account = env.batch_account.as_ref().ok_or_else(|| {
            PoolError::InvalidRequest(format!("environment {} has no batch account", env.name))
        })?;
        let client = BatchRestClient::new(
            account.url.as_str(),
            self.api_version.as_str(),
            self.access_token.as_str(),
            self.timeout,
        )?;
        Ok(Box::new(client))
    }
}
