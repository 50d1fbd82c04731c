//! In-memory remote store used by tests.

use async_trait::async_trait;
use std::collections::HashSet;

use super::RemoteStore;
use crate::errors::{Result, SyncError, TransferOp};

#[derive(Debug, Default)]
pub struct MemoryStore {
    files: Vec<(String, Vec<u8>)>,
    connected: bool,
    fail_connect: bool,
    fail_list: bool,
    failing_downloads: HashSet<String>,
    unconfirmed_uploads: bool,
    connect_calls: usize,
    disconnect_calls: usize,
    uploads: Vec<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: &str, data: impl Into<Vec<u8>>) -> Self {
        self.put(name, data.into());
        self
    }

    pub fn fail_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn fail_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn fail_download_of(mut self, name: &str) -> Self {
        self.failing_downloads.insert(name.to_string());
        self
    }

    pub fn unconfirmed_uploads(mut self) -> Self {
        self.unconfirmed_uploads = true;
        self
    }

    pub fn file(&self, name: &str) -> Option<&[u8]> {
        self.files
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.as_slice())
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls
    }

    pub fn uploads(&self) -> &[String] {
        &self.uploads
    }

    fn put(&mut self, name: &str, data: Vec<u8>) {
        match self.files.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = data,
            None => self.files.push((name.to_string(), data)),
        }
    }

    fn require_session(&self, op: &'static str) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(SyncError::NotConnected(op))
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn connect(&mut self) -> Result<()> {
        self.connect_calls += 1;
        if self.fail_connect {
            self.connected = false;
            return Err(SyncError::Connection("memory store refused connection".into()));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.disconnect_calls += 1;
        self.connected = false;
    }

    async fn list(&mut self) -> Result<Vec<String>> {
        self.require_session("list")?;
        if self.fail_list {
            return Err(SyncError::transfer(TransferOp::List, "/", "listing refused"));
        }
        Ok(self.files.iter().map(|(name, _)| name.clone()).collect())
    }

    async fn download(&mut self, name: &str) -> Result<Vec<u8>> {
        self.require_session("download")?;
        if self.failing_downloads.contains(name) {
            return Err(SyncError::transfer(TransferOp::Download, name, "simulated failure"));
        }
        self.file(name)
            .map(|data| data.to_vec())
            .ok_or_else(|| SyncError::transfer(TransferOp::Download, name, "no such file"))
    }

    async fn upload(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.require_session("upload")?;
        self.uploads.push(name.to_string());
        if self.unconfirmed_uploads {
            return Err(SyncError::UnconfirmedWrite(name.to_string()));
        }
        self.put(name, data.to_vec());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn location(&self) -> String {
        "memory://".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn operations_before_connect_are_rejected() {
        let mut store = MemoryStore::new().with_file("a.txt", "a");
        assert!(matches!(store.list().await, Err(SyncError::NotConnected("list"))));
        assert!(matches!(
            store.download("a.txt").await,
            Err(SyncError::NotConnected("download"))
        ));
        assert!(matches!(
            store.upload("a.txt", b"x").await,
            Err(SyncError::NotConnected("upload"))
        ));
    }

    #[tokio::test]
    async fn upload_overwrites_existing_file() {
        let mut store = MemoryStore::new().with_file("a.txt", "old");
        store.connect().await.unwrap();
        store.upload("a.txt", b"new").await.unwrap();
        assert_eq!(store.file("a.txt"), Some(&b"new"[..]));
        assert_eq!(store.list().await.unwrap(), vec!["a.txt".to_string()]);
    }
}
