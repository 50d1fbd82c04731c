// savesync/src/remote/sftp_store.rs
use async_trait::async_trait;
use ssh2::Session;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{Span, debug, info, warn};

use super::{RemoteStore, normalize_remote_dir};
use crate::config::RemoteConfig;
use crate::errors::{Result, SyncError, TransferOp};

const DEFAULT_PORT: u16 = 22;

/// SFTP session over a single remote directory.
///
/// `ssh2` is blocking, so every call runs on the blocking pool. The session
/// is moved into the worker and handed back afterwards; it is bounded by the
/// configured operation timeout, which keeps a stuck server from wedging
/// the scheduler.
pub struct SftpStore {
    config: RemoteConfig,
    session: Option<SftpSession>,
    span: Span,
}

struct SftpSession {
    ssh: Session,
    dir: PathBuf,
}

impl SftpStore {
    pub fn new(config: RemoteConfig) -> Self {
        let span = tracing::info_span!("sftp", host = %config.host);
        Self {
            config,
            session: None,
            span,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    fn port(&self) -> u16 {
        self.config.port.unwrap_or(DEFAULT_PORT)
    }

    async fn with_session<T, F>(&mut self, op: &'static str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&SftpSession) -> Result<T> + Send + 'static,
    {
        let session = self.session.take().ok_or(SyncError::NotConnected(op))?;
        let joined = tokio::task::spawn_blocking(move || {
            let result = work(&session);
            (session, result)
        })
        .await;

        match joined {
            Ok((session, result)) => {
                self.session = Some(session);
                result
            }
            Err(e) => {
                warn!(parent: &self.span, op, error = %e, "SFTP worker died, session dropped");
                Err(SyncError::Connection(format!("SFTP worker for {} stopped: {}", op, e)))
            }
        }
    }
}

/// Resolves the configured host. The lookup is bounded by the connect
/// timeout like every other step of opening a session.
async fn resolve(config: &RemoteConfig, port: u16) -> Result<SocketAddr> {
    let resolve_error = |e: &dyn std::fmt::Display| {
        SyncError::Connection(format!("failed to resolve host ({}:{}): {}", config.host, port, e))
    };

    let lookup = tokio::time::timeout(
        config.connect_timeout,
        tokio::net::lookup_host((config.host.as_str(), port)),
    )
    .await;
    match lookup {
        Ok(Ok(mut addrs)) => addrs.next().ok_or_else(|| resolve_error(&"no addresses")),
        Ok(Err(e)) => Err(resolve_error(&e)),
        Err(_) => Err(resolve_error(&format!(
            "timed out after {}s",
            config.connect_timeout.as_secs_f64()
        ))),
    }
}

fn open_session(config: &RemoteConfig, addr: SocketAddr) -> Result<SftpSession> {
    let port = addr.port();
    let connection_error = |what: &str, e: &dyn std::fmt::Display| {
        SyncError::Connection(format!("{} ({}:{}): {}", what, config.host, port, e))
    };

    let tcp = TcpStream::connect_timeout(&addr, config.connect_timeout)
        .map_err(|e| connection_error("TCP connect failed", &e))?;

    let mut ssh = Session::new().map_err(|e| connection_error("SSH session setup failed", &e))?;
    ssh.set_tcp_stream(tcp);
    ssh.set_timeout(millis(config.connect_timeout));
    ssh.handshake()
        .map_err(|e| connection_error("SSH handshake failed", &e))?;
    ssh.userauth_password(&config.username, &config.password)
        .map_err(|e| connection_error("SSH authentication failed", &e))?;
    if !ssh.authenticated() {
        return Err(connection_error("SSH authentication failed", &"not authenticated"));
    }
    ssh.set_timeout(millis(config.operation_timeout));

    let dir = match config.remote_dir.trim() {
        "" => PathBuf::from("."),
        dir => PathBuf::from(dir),
    };
    let sftp = ssh
        .sftp()
        .map_err(|e| connection_error("SFTP subsystem unavailable", &e))?;
    let stat = sftp
        .stat(&dir)
        .map_err(|e| connection_error(&format!("cannot enter {}", dir.display()), &e))?;
    if !stat.is_dir() {
        return Err(connection_error(
            &format!("cannot enter {}", dir.display()),
            &"not a directory",
        ));
    }

    Ok(SftpSession { ssh, dir })
}

fn millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

#[async_trait]
impl RemoteStore for SftpStore {
    async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            debug!(parent: &self.span, "Already connected, reusing session");
            return Ok(());
        }

        let opened = match resolve(&self.config, self.port()).await {
            Ok(addr) => {
                let config = self.config.clone();
                tokio::task::spawn_blocking(move || open_session(&config, addr))
                    .await
                    .map_err(|e| SyncError::Connection(format!("SFTP connect worker stopped: {}", e)))
                    .and_then(|r| r)
            }
            Err(e) => Err(e),
        };

        match opened {
            Ok(session) => {
                info!(parent: &self.span, dir = %session.dir.display(), "Connected");
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                warn!(parent: &self.span, error = %e, "Connection failed");
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let quit = tokio::task::spawn_blocking(move || {
            session
                .ssh
                .disconnect(None, "savesync session closed", None)
        })
        .await;

        match quit {
            Ok(Ok(())) => info!(parent: &self.span, "Connection closed"),
            Ok(Err(e)) => warn!(parent: &self.span, error = %e, "Error while closing connection"),
            Err(e) => warn!(parent: &self.span, error = %e, "Disconnect worker stopped"),
        }
    }

    async fn list(&mut self) -> Result<Vec<String>> {
        let names = self
            .with_session("list", |s| {
                let list_error =
                    |e: ssh2::Error| SyncError::transfer(TransferOp::List, s.dir.display().to_string(), e);
                let sftp = s.ssh.sftp().map_err(list_error)?;
                let entries = sftp.readdir(&s.dir).map_err(list_error)?;
                Ok(entries
                    .into_iter()
                    .filter(|(_, stat)| stat.is_file())
                    .filter_map(|(path, _)| {
                        path.file_name()
                            .map(|name| name.to_string_lossy().into_owned())
                    })
                    .collect::<Vec<_>>())
            })
            .await?;
        info!(parent: &self.span, count = names.len(), "Listed remote directory");
        Ok(names)
    }

    async fn download(&mut self, name: &str) -> Result<Vec<u8>> {
        let file_name = name.to_string();
        let data = self
            .with_session("download", move |s| {
                let fail = |e: &dyn std::fmt::Display| {
                    SyncError::transfer(TransferOp::Download, file_name.as_str(), e)
                };
                let sftp = s.ssh.sftp().map_err(|e| fail(&e))?;
                let mut file = sftp.open(&s.dir.join(&file_name)).map_err(|e| fail(&e))?;
                let mut buffer = Vec::new();
                file.read_to_end(&mut buffer).map_err(|e| fail(&e))?;
                Ok(buffer)
            })
            .await?;
        debug!(parent: &self.span, file = name, bytes = data.len(), "Downloaded");
        Ok(data)
    }

    async fn upload(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let file_name = name.to_string();
        let payload = data.to_vec();
        self.with_session("upload", move |s| {
            let fail = |e: &dyn std::fmt::Display| {
                SyncError::transfer(TransferOp::Upload, file_name.as_str(), e)
            };
            let sftp = s.ssh.sftp().map_err(|e| fail(&e))?;
            let path = s.dir.join(&file_name);
            let mut file = sftp.create(&path).map_err(|e| fail(&e))?;
            file.write_all(&payload).map_err(|e| fail(&e))?;
            drop(file);

            // Confirm by reading back the size the server recorded.
            let stat = sftp
                .stat(&path)
                .map_err(|_| SyncError::UnconfirmedWrite(file_name.clone()))?;
            if stat.size != Some(payload.len() as u64) {
                return Err(SyncError::UnconfirmedWrite(file_name.clone()));
            }
            Ok(())
        })
        .await?;
        info!(parent: &self.span, file = name, bytes = data.len(), "Uploaded");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn location(&self) -> String {
        format!(
            "sftp://{}:{}/{}",
            self.config.host,
            self.port(),
            normalize_remote_dir(&self.config.remote_dir)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;

    fn config(host: &str, port: u16) -> RemoteConfig {
        RemoteConfig {
            protocol: Protocol::Sftp,
            host: host.into(),
            port: Some(port),
            username: "u".into(),
            password: "p".into(),
            remote_dir: "/saves".into(),
            bucket: None,
            region: "us-east-1".into(),
            connect_timeout: Duration::from_millis(500),
            operation_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn operations_without_session_are_programming_errors() {
        let mut store = SftpStore::new(config("127.0.0.1", 1));
        assert!(matches!(store.list().await, Err(SyncError::NotConnected("list"))));
        assert!(matches!(
            store.download("a").await,
            Err(SyncError::NotConnected("download"))
        ));
        assert!(matches!(
            store.upload("a", b"x").await,
            Err(SyncError::NotConnected("upload"))
        ));
    }

    #[tokio::test]
    async fn failed_connect_leaves_no_session() {
        // Nothing listens on a freshly released local port.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut store = SftpStore::new(config("127.0.0.1", port));
        let err = store.connect().await.unwrap_err();
        assert!(matches!(err, SyncError::Connection(_)));
        assert!(!store.is_connected());

        // disconnect without a session is a quiet no-op
        store.disconnect().await;
        assert!(!store.is_connected());
    }

    #[tokio::test]
    async fn unresolvable_host_is_a_connection_error() {
        let mut store = SftpStore::new(config("no-such-host.invalid", 22));
        let err = store.connect().await.unwrap_err();
        match err {
            SyncError::Connection(message) => assert!(message.starts_with("failed to resolve host")),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!store.is_connected());
    }

    #[test]
    fn timeouts_saturate_into_u32_millis() {
        assert_eq!(millis(Duration::from_secs(10)), 10_000);
        assert_eq!(millis(Duration::from_secs(u64::MAX / 2)), u32::MAX);
    }
}
