use crate::{Result, probe::BlockHeight};
use async_trait::async_trait;
use mockall::automock;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

/// Response of a Tendermint/CometBFT `status` call, reduced to what probing needs.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub result: Option<StatusResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatusResult {
    #[serde(default)]
    pub sync_info: Option<SyncInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SyncInfo {
    /// Nodes report this as a decimal string, some proxies as a number.
    #[serde(default)]
    pub latest_block_height: Option<Value>,
}

impl StatusResponse {
    pub fn with_height(height: Value) -> Self {
        Self {
            result: Some(StatusResult {
                sync_info: Some(SyncInfo {
                    latest_block_height: Some(height),
                }),
            }),
        }
    }

    pub fn block_height(&self) -> BlockHeight {
        let height = self
            .result
            .as_ref()
            .and_then(|result| result.sync_info.as_ref())
            .and_then(|sync_info| sync_info.latest_block_height.as_ref());

        match height {
            Some(Value::Number(n)) => n.as_u64().map_or(BlockHeight::Unknown, BlockHeight::Reported),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map_or(BlockHeight::Unknown, BlockHeight::Reported),
            _ => BlockHeight::Unknown,
        }
    }
}

#[automock]
#[async_trait]
pub trait StatusClient: Send + Sync {
    /// Issue one JSON-RPC `status` call against `host`.
    async fn status(&self, host: &str) -> Result<StatusResponse>;
}

/// `StatusClient` posting JSON-RPC 2.0 over HTTPS.
#[derive(Debug, Clone)]
pub struct JsonRpcStatusClient {
    http: reqwest::Client,
    scheme: &'static str,
}

impl JsonRpcStatusClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            scheme: "https",
        })
    }

    /// Talk plain HTTP instead, for endpoints on a local network.
    pub fn insecure(mut self) -> Self {
        self.scheme = "http";
        self
    }
}

#[async_trait]
impl StatusClient for JsonRpcStatusClient {
    async fn status(&self, host: &str) -> Result<StatusResponse> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "status",
            "params": {}
        });

        let response = self
            .http
            .post(format!("{}://{host}", self.scheme))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json::<StatusResponse>().await?)
    }
}
