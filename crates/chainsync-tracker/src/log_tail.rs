//! File-backed log event source
//!
//! Tails the embedded node's `lnd.log`. Content already in the file when
//! observation starts is skipped; only appended lines are delivered.

use crate::cancel::CancelToken;
use crate::log_source::{LogEventSource, LogLineBus, LogListener, LogSubscription};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

/// Log file name written by the node
pub const LOG_FILE_NAME: &str = "lnd.log";

/// Path of the node log for `network` under `log_dir`
pub fn log_file_path(log_dir: &Path, network: &str) -> PathBuf {
    log_dir
        .join("logs")
        .join("bitcoin")
        .join(network)
        .join(LOG_FILE_NAME)
}

/// Log event source that tails node log files
pub struct FileLogSource {
    bus: LogLineBus,
    poll_interval: Duration,
    tailers: Mutex<HashMap<PathBuf, CancelToken>>,
}

impl FileLogSource {
    /// Create a source polling files every `poll_interval`
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            bus: LogLineBus::new(),
            poll_interval,
            tailers: Mutex::new(HashMap::new()),
        }
    }

    /// Underlying bus, e.g. to inject lines from another source
    pub fn bus(&self) -> &LogLineBus {
        &self.bus
    }

    /// Paths currently being tailed
    pub fn observed_paths(&self) -> Vec<PathBuf> {
        self.tailers.lock().keys().cloned().collect()
    }

    /// Stop every tail task
    pub fn shutdown(&self) {
        for (path, token) in self.tailers.lock().drain() {
            debug!(path = %path.display(), "Stopping log tail");
            token.cancel();
        }
    }
}

impl Drop for FileLogSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl LogEventSource for FileLogSource {
    fn subscribe(&self, listener: LogListener) -> LogSubscription {
        self.bus.subscribe(listener)
    }

    async fn observe_log_file(&self, log_dir: &Path, network: &str) -> Result<()> {
        let path = log_file_path(log_dir, network);

        if self.tailers.lock().contains_key(&path) {
            return Ok(());
        }

        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::LogFileMissing(path));
            }
            Err(e) => return Err(e.into()),
        };
        let offset = file.seek(SeekFrom::End(0)).await?;

        let token = CancelToken::new();
        {
            let mut tailers = self.tailers.lock();
            if tailers.contains_key(&path) {
                // Lost a race with a concurrent observe of the same file
                return Ok(());
            }
            tailers.insert(path.clone(), token.clone());
        }

        info!(path = %path.display(), offset, "Started watching node log");
        let tail = LogTail {
            path,
            file,
            offset,
            pending: Vec::new(),
            bus: self.bus.clone(),
        };
        tokio::spawn(tail.run(self.poll_interval, token));
        Ok(())
    }
}

struct LogTail {
    path: PathBuf,
    file: tokio::fs::File,
    offset: u64,
    pending: Vec<u8>,
    bus: LogLineBus,
}

impl LogTail {
    async fn run(mut self, poll_interval: Duration, cancel: CancelToken) {
        loop {
            if cancel.sleep(poll_interval).await.is_err() {
                break;
            }
            if let Err(e) = self.poll().await {
                warn!(path = %self.path.display(), error = %e, "Log tail read failed");
            }
        }
        debug!(path = %self.path.display(), "Log tail stopped");
    }

    async fn poll(&mut self) -> Result<()> {
        let len = tokio::fs::metadata(&self.path).await?.len();
        if len < self.offset {
            debug!(path = %self.path.display(), "Log truncated, rewinding");
            self.offset = 0;
            self.pending.clear();
            self.file.seek(SeekFrom::Start(0)).await?;
        }
        if len == self.offset {
            return Ok(());
        }

        let mut buf = Vec::new();
        let read = self.file.read_to_end(&mut buf).await?;
        self.offset += read as u64;
        self.pending.extend_from_slice(&buf);
        self.flush_complete_lines();
        Ok(())
    }

    fn flush_complete_lines(&mut self) {
        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return;
        };
        let complete: Vec<u8> = self.pending.drain(..=last_newline).collect();
        self.bus.emit_chunk(&String::from_utf8_lossy(&complete));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    fn collecting(source: &FileLogSource) -> (Arc<Mutex<Vec<String>>>, LogSubscription) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let sub = source.subscribe(Arc::new(move |line: &str| sink.lock().push(line.to_string())));
        (lines, sub)
    }

    fn create_log(dir: &Path, network: &str, content: &str) -> PathBuf {
        let path = log_file_path(dir, network);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    fn append(path: &Path, content: &str) {
        let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    async fn wait_for_lines(lines: &Arc<Mutex<Vec<String>>>, n: usize) {
        for _ in 0..200 {
            if lines.lock().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn test_log_file_path() {
        let path = log_file_path(Path::new("/data/lnd"), "testnet");
        assert_eq!(path, PathBuf::from("/data/lnd/logs/bitcoin/testnet/lnd.log"));
    }

    #[tokio::test]
    async fn test_missing_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileLogSource::new(Duration::from_millis(10));

        let result = source.observe_log_file(dir.path(), "mainnet").await;
        assert!(matches!(result, Err(Error::LogFileMissing(_))));
        assert!(source.observed_paths().is_empty());
    }

    #[tokio::test]
    async fn test_only_appended_lines_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_log(dir.path(), "mainnet", "old line 1\nold line 2\n");
        let source = FileLogSource::new(Duration::from_millis(10));
        let (lines, _sub) = collecting(&source);

        source.observe_log_file(dir.path(), "mainnet").await.unwrap();
        append(&path, "new line 1\nnew ");
        append(&path, "line 2\npartial");

        wait_for_lines(&lines, 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*lines.lock(), vec!["new line 1", "new line 2"]);
    }

    #[tokio::test]
    async fn test_observe_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_log(dir.path(), "testnet", "");
        let source = FileLogSource::new(Duration::from_millis(10));
        let (lines, _sub) = collecting(&source);

        source.observe_log_file(dir.path(), "testnet").await.unwrap();
        source.observe_log_file(dir.path(), "testnet").await.unwrap();
        assert_eq!(source.observed_paths().len(), 1);

        append(&path, "once\n");
        wait_for_lines(&lines, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*lines.lock(), vec!["once"]);
    }

    #[tokio::test]
    async fn test_truncation_rewinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_log(dir.path(), "mainnet", "a fairly long existing line\n");
        let source = FileLogSource::new(Duration::from_millis(10));
        let (lines, _sub) = collecting(&source);

        source.observe_log_file(dir.path(), "mainnet").await.unwrap();
        std::fs::write(&path, "").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        append(&path, "after rotate\n");

        wait_for_lines(&lines, 1).await;
        assert_eq!(*lines.lock(), vec!["after rotate"]);
    }

    #[tokio::test]
    async fn test_shutdown_stops_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_log(dir.path(), "mainnet", "");
        let source = FileLogSource::new(Duration::from_millis(10));
        let (lines, _sub) = collecting(&source);

        source.observe_log_file(dir.path(), "mainnet").await.unwrap();
        source.shutdown();
        append(&path, "late\n");
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(lines.lock().is_empty());
        assert!(source.observed_paths().is_empty());
    }
}
