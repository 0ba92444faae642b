//! Best block height oracle
//!
//! Asks a block explorer for the network tip. The oracle keeps no state; the
//! tracker decides what a failure means (see the fallback in [`crate::sync`]).

use crate::config::OracleConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use chainsync_params::NetworkType;

/// Source of the network's best block height
#[async_trait]
pub trait HeightOracle: Send + Sync {
    /// Fetch the current tip height for `network`
    async fn fetch_height(&self, network: NetworkType) -> Result<u64>;
}

/// Height oracle backed by a mempool.space-compatible explorer API
pub struct MempoolHeightOracle {
    base_url: String,
    client: reqwest::Client,
}

impl MempoolHeightOracle {
    /// Create oracle from config
    pub fn new(config: &OracleConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Tip height endpoint for `network`
    pub fn height_url(&self, network: NetworkType) -> Result<String> {
        let segment = network.explorer_path_segment().ok_or_else(|| {
            Error::Config(format!("No height oracle available for {}", network))
        })?;
        Ok(format!("{}/{}api/blocks/tip/height", self.base_url, segment))
    }
}

#[async_trait]
impl HeightOracle for MempoolHeightOracle {
    async fn fetch_height(&self, network: NetworkType) -> Result<u64> {
        let url = self.height_url(network)?;

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("HTTP error: {}", e)))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(Error::OracleStatus(response.status().as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("HTTP body error: {}", e)))?;

        parse_height(&body)
    }
}

/// Parse a plain-integer height body
pub fn parse_height(body: &str) -> Result<u64> {
    let trimmed = body.trim();
    trimmed
        .parse::<u64>()
        .map_err(|_| Error::Parse(format!("invalid height body: {:?}", trimmed)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn oracle_for(server: &MockServer) -> MempoolHeightOracle {
        MempoolHeightOracle::new(&OracleConfig {
            base_url: server.uri(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_parse_height() {
        assert_eq!(parse_height("800000\n").unwrap(), 800_000);
        assert!(parse_height("").is_err());
        assert!(parse_height("-5").is_err());
        assert!(parse_height("<html>").is_err());
    }

    #[test]
    fn test_height_urls() {
        let oracle = MempoolHeightOracle::new(&OracleConfig {
            base_url: "https://mempool.space/".to_string(),
            timeout_secs: 5,
        })
        .unwrap();

        assert_eq!(
            oracle.height_url(NetworkType::Mainnet).unwrap(),
            "https://mempool.space/api/blocks/tip/height"
        );
        assert_eq!(
            oracle.height_url(NetworkType::Testnet4).unwrap(),
            "https://mempool.space/testnet4/api/blocks/tip/height"
        );
        assert!(oracle.height_url(NetworkType::Regtest).is_err());
    }

    #[tokio::test]
    async fn test_fetch_testnet_height() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/testnet/api/blocks/tip/height"))
            .respond_with(ResponseTemplate::new(200).set_body_string("2812345"))
            .mount(&server)
            .await;

        let height = oracle_for(&server)
            .fetch_height(NetworkType::Testnet)
            .await
            .unwrap();
        assert_eq!(height, 2_812_345);
    }

    #[tokio::test]
    async fn test_non_200_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/blocks/tip/height"))
            .respond_with(ResponseTemplate::new(429).set_body_string("800000"))
            .mount(&server)
            .await;

        let result = oracle_for(&server).fetch_height(NetworkType::Mainnet).await;
        assert!(matches!(result, Err(Error::OracleStatus(429))));
    }

    #[tokio::test]
    async fn test_unreachable_is_network_error() {
        let oracle = MempoolHeightOracle::new(&OracleConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
        })
        .unwrap();

        let result = oracle.fetch_height(NetworkType::Mainnet).await;
        assert!(matches!(result, Err(Error::Network(_))));
    }
}
