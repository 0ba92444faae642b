//! Tracker wired to the REST node client, the explorer oracle and a tailed log file

use chainsync_tracker::{
    log_file_path, ChainSyncTracker, FileLogSource, LndRestClient, MempoolHeightOracle,
    NetworkType, OracleConfig, TrackerConfig, MACAROON_HEADER,
};
use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(oracle_url: String, data_dir: &Path) -> TrackerConfig {
    TrackerConfig {
        network: NetworkType::Testnet,
        node_data_dir: data_dir.to_path_buf(),
        node_ready_poll_secs: 1,
        status_poll_secs: 1,
        oracle: OracleConfig {
            base_url: oracle_url,
            timeout_secs: 5,
        },
        ..Default::default()
    }
}

async fn mock_oracle(height: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/testnet/api/blocks/tip/height"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!("{}\n", height)))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn sync_against_rest_node() {
    let oracle_server = mock_oracle(2_500_100).await;
    let node_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/getinfo"))
        .and(header(MACAROON_HEADER, "0102ff"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "block_height": 2_500_100,
            "synced_to_chain": true
        })))
        .mount(&node_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = config(oracle_server.uri(), dir.path());
    let oracle = MempoolHeightOracle::new(&config.oracle).unwrap();
    let node = LndRestClient::new(node_server.uri(), false)
        .unwrap()
        .with_macaroon(&[0x01, 0x02, 0xff]);
    let logs = FileLogSource::new(config.log_poll());

    let tracker = ChainSyncTracker::new(config, Arc::new(node), Arc::new(oracle), Arc::new(logs));
    tracker.start_syncing().await.unwrap();

    let state = tracker.state();
    assert!(!state.is_syncing);
    assert!(!state.error);
    assert_eq!(state.best_block_height, 2_500_100);
    assert_eq!(state.current_block_height, 2_500_100);
    assert_eq!(state.num_blocks_until_synced, 0);
}

#[tokio::test]
async fn recovery_check_against_rest_node() {
    let node_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/getrecoveryinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&node_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = config("http://127.0.0.1:9".to_string(), dir.path());
    let oracle = MempoolHeightOracle::new(&config.oracle).unwrap();
    let node = LndRestClient::new(node_server.uri(), false).unwrap();
    let logs = FileLogSource::new(config.log_poll());
    let tracker = ChainSyncTracker::new(config, Arc::new(node), Arc::new(oracle), Arc::new(logs));

    // Proto3 omits false flags: not in recovery mode
    assert!(tracker.check_recovery_status().await.unwrap().is_none());
    assert!(!tracker.state().is_recovering);
}

#[tokio::test]
async fn rescan_from_tailed_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = log_file_path(dir.path(), "testnet");
    std::fs::create_dir_all(log_path.parent().unwrap()).unwrap();
    // Lines from an earlier run must not be replayed
    std::fs::write(
        &log_path,
        "2026-01-20 10:00:00.000 [INF] BTWL: Rescanned through block aa (height 5)\n",
    )
    .unwrap();

    let mut config = config("http://127.0.0.1:9".to_string(), dir.path());
    config.log_poll_millis = 20;
    let oracle = MempoolHeightOracle::new(&config.oracle).unwrap();
    let node = LndRestClient::new("http://127.0.0.1:9", false).unwrap();
    let logs = Arc::new(FileLogSource::new(config.log_poll()));
    let tracker = ChainSyncTracker::new(config, Arc::new(node), Arc::new(oracle), logs.clone());

    tracker.start_rescan_tracking(118_000).await;
    let state = tracker.state();
    assert!(state.rescan.is_rescanning);
    assert!(state.rescan.is_log_observation_active);
    assert_eq!(state.rescan.rescan_current_height, Some(118_000));
    assert_eq!(logs.observed_paths(), vec![log_path.clone()]);

    let mut rx = tracker.subscribe();
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&log_path)
        .unwrap();
    writeln!(
        file,
        "2026-01-21 02:15:44.368 [INF] BTWL: Started rescan from block bb (height 118957) for 9 addrs\n\
         2026-01-21 02:16:01.002 [INF] BTWL: Rescanned through block cc (height 119000)"
    )
    .unwrap();
    file.flush().unwrap();

    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| s.rescan.rescan_current_height == Some(119_000)),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(tracker.state().rescan.rescan_start_height, Some(118_957));

    // Finished line arrives in two writes
    write!(file, "2026-01-21 02:17:12.511 [INF] BTWL: Finished rescan for 9 addresses ").unwrap();
    file.flush().unwrap();
    writeln!(file, "(synced to block dd, height 119438)").unwrap();
    file.flush().unwrap();

    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| !s.rescan.is_rescanning))
        .await
        .unwrap()
        .unwrap();
    assert!(!tracker.rescan().is_listening());
    assert_eq!(logs.bus().listener_count(), 0);
}

#[tokio::test]
async fn rescan_without_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = config("http://127.0.0.1:9".to_string(), dir.path());
    let oracle = MempoolHeightOracle::new(&config.oracle).unwrap();
    let node = LndRestClient::new("http://127.0.0.1:9", false).unwrap();
    let logs = FileLogSource::new(config.log_poll());
    let tracker = ChainSyncTracker::new(config, Arc::new(node), Arc::new(oracle), Arc::new(logs));

    tracker.start_rescan_tracking(42).await;

    let state = tracker.state();
    assert!(state.rescan.is_rescanning);
    assert!(!state.rescan.is_log_observation_active);
    assert!(tracker.rescan().is_listening());

    tracker.stop_rescan_tracking();
    assert!(!tracker.rescan().is_listening());
}
