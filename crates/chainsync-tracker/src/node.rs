//! Node status source
//!
//! The tracker only needs two views of the node: its own chain height with a
//! full-sync flag, and wallet recovery status. [`LndRestClient`] serves both
//! from the node's REST interface.

use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Node's self-reported chain position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct NodeStatus {
    /// Local chain height
    #[serde(default)]
    pub block_height: u64,
    /// Node considers itself synced to the chain tip
    #[serde(default)]
    pub synced_to_chain: bool,
}

/// Wallet recovery status reported by the node
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct RecoveryStatus {
    /// Wallet was started in recovery mode
    #[serde(default)]
    pub recovery_mode: bool,
    /// Recovery scan completed
    #[serde(default)]
    pub recovery_finished: bool,
    /// Recovery progress in `[0, 1]`, when reported
    #[serde(default)]
    pub progress: Option<f64>,
}

/// Source of node status, implemented by node clients and test fakes
#[async_trait]
pub trait NodeStatusSource: Send + Sync {
    /// Query the node's chain height and sync flag
    async fn node_status(&self) -> Result<NodeStatus>;

    /// Query wallet recovery status
    async fn recovery_status(&self) -> Result<RecoveryStatus>;
}

/// Header carrying the hex-encoded macaroon
pub const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";

/// Error body returned by the REST gateway
#[derive(Deserialize)]
struct GatewayError {
    #[serde(default)]
    message: String,
}

/// REST client for the embedded node
pub struct LndRestClient {
    base_url: String,
    macaroon_hex: Option<String>,
    client: reqwest::Client,
}

impl LndRestClient {
    /// Create a client for `base_url` (e.g. `https://127.0.0.1:8080`).
    ///
    /// `accept_invalid_certs` allows the node's self-signed TLS certificate.
    pub fn new(base_url: impl Into<String>, accept_invalid_certs: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            macaroon_hex: None,
            client,
        })
    }

    /// Authenticate with raw macaroon bytes
    pub fn with_macaroon(mut self, macaroon: &[u8]) -> Self {
        self.macaroon_hex = Some(hex::encode(macaroon));
        self
    }

    /// Base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<R: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<R> {
        let mut request = self.client.get(format!("{}{}", self.base_url, path));
        if let Some(macaroon) = &self.macaroon_hex {
            request = request.header(MACAROON_HEADER, macaroon);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("HTTP error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(path, status = %status, body = %body, "Node request failed");
            // gRPC gateway errors carry a message worth surfacing
            return match serde_json::from_str::<GatewayError>(&body) {
                Ok(err) if !err.message.is_empty() => Err(Error::Node(err.message)),
                _ => Err(Error::NodeStatus(status.as_u16())),
            };
        }

        response
            .json()
            .await
            .map_err(|e| Error::Parse(format!("JSON decode error: {}", e)))
    }
}

#[async_trait]
impl NodeStatusSource for LndRestClient {
    async fn node_status(&self) -> Result<NodeStatus> {
        self.get("/v1/getinfo").await
    }

    async fn recovery_status(&self) -> Result<RecoveryStatus> {
        self.get("/v1/getrecoveryinfo").await
    }
}
