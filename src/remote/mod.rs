//! Remote file endpoints.
//!
//! A [`RemoteStore`] is a stateful, single-owner session over a remote
//! directory. It knows how to connect, list, download, upload and disconnect,
//! and nothing else: retries and scheduling live elsewhere.

pub mod s3_store;
pub mod sftp_store;

#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::config::{Protocol, RemoteConfig};
use crate::errors::Result;

pub use s3_store::S3Store;
pub use sftp_store::SftpStore;

#[async_trait]
pub trait RemoteStore: Send {
    /// Opens a session. On failure no session is kept, so calling again
    /// starts from scratch.
    async fn connect(&mut self) -> Result<()>;

    /// Releases the session if there is one. Never fails.
    async fn disconnect(&mut self);

    /// File names in the remote directory, in server order.
    async fn list(&mut self) -> Result<Vec<String>>;

    /// Whole-file download. Partial data is discarded on error.
    async fn download(&mut self, name: &str) -> Result<Vec<u8>>;

    /// Whole-file upload, replacing any existing file of the same name.
    async fn upload(&mut self, name: &str, data: &[u8]) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Human readable location, e.g. `sftp://host:22/saves`.
    fn location(&self) -> String;
}

/// Builds the backend selected by `config.protocol`. The returned store is
/// not connected yet.
pub fn open_store(config: &RemoteConfig) -> Box<dyn RemoteStore> {
    match config.protocol {
        Protocol::Sftp => Box::new(SftpStore::new(config.clone())),
        Protocol::S3 => Box::new(S3Store::new(config.clone())),
    }
}

/// Connects and immediately disconnects.
pub async fn test_connection(store: &mut dyn RemoteStore) -> Result<()> {
    store.connect().await?;
    tracing::info!(location = %store.location(), "Connection test succeeded");
    store.disconnect().await;
    Ok(())
}

/// Runs `fut` with a deadline, folding a timeout into the error message.
pub(crate) async fn bounded<T, E, F>(limit: Duration, fut: F) -> std::result::Result<T, String>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {}s", limit.as_secs_f64())),
    }
}

/// Normalises a configured remote directory to `a/b` form (no leading or
/// trailing slash, empty for the root).
pub(crate) fn normalize_remote_dir(dir: &str) -> String {
    dir.split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;
    use crate::errors::SyncError;

    #[test]
    fn remote_dirs_are_normalised() {
        assert_eq!(normalize_remote_dir("/"), "");
        assert_eq!(normalize_remote_dir(""), "");
        assert_eq!(normalize_remote_dir("/saves/"), "saves");
        assert_eq!(normalize_remote_dir("./saves//slot1"), "saves/slot1");
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_reports_timeouts() {
        let result: std::result::Result<(), String> = bounded(Duration::from_secs(2), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<(), String>(())
        })
        .await;
        assert_eq!(result.unwrap_err(), "timed out after 2s");
    }

    #[tokio::test]
    async fn test_connection_leaves_store_disconnected() {
        let mut store = MemoryStore::new();
        test_connection(&mut store).await.unwrap();
        assert!(!store.is_connected());
        assert_eq!(store.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_connection_reports_connect_failure() {
        let mut store = MemoryStore::new().fail_connect();
        let err = test_connection(&mut store).await.unwrap_err();
        assert!(matches!(err, SyncError::Connection(_)));
    }

    #[test]
    fn open_store_picks_backend_from_protocol() {
        let mut config = RemoteConfig {
            protocol: Protocol::Sftp,
            host: "files.example.org".into(),
            port: Some(2222),
            username: "u".into(),
            password: "p".into(),
            remote_dir: "/saves".into(),
            bucket: Some("bucket".into()),
            region: "us-east-1".into(),
            connect_timeout: Duration::from_secs(1),
            operation_timeout: Duration::from_secs(1),
        };
        let store = open_store(&config);
        assert_eq!(store.location(), "sftp://files.example.org:2222/saves");
        assert!(!store.is_connected());

        config.protocol = Protocol::S3;
        config.port = None;
        let store = open_store(&config);
        assert_eq!(store.location(), "s3://bucket/saves/");
    }
}
