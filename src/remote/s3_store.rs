// savesync/src/remote/s3_store.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use tracing::{Span, debug, info, warn};
use url::Url;

use super::{RemoteStore, bounded, normalize_remote_dir};
use crate::config::RemoteConfig;
use crate::errors::{Result, SyncError, TransferOp};

/// S3-compatible object storage treated as a flat remote directory.
///
/// The configured remote directory becomes a key prefix, the username and
/// password become a static access key pair.
pub struct S3Store {
    config: RemoteConfig,
    session: Option<S3Session>,
    span: Span,
}

struct S3Session {
    client: s3::Client,
    bucket: String,
}

impl S3Store {
    pub fn new(config: RemoteConfig) -> Self {
        let span = tracing::info_span!("s3", host = %config.host);
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

    fn prefix(&self) -> String {
        match normalize_remote_dir(&self.config.remote_dir) {
            dir if dir.is_empty() => dir,
            dir => format!("{}/", dir),
        }
    }

    fn key_for(&self, name: &str) -> String {
        format!("{}{}", self.prefix(), name)
    }

    fn session(&self, op: &'static str) -> Result<&S3Session> {
        self.session.as_ref().ok_or(SyncError::NotConnected(op))
    }
}

/// Builds the endpoint URL from a bare host or a full URL plus optional port.
pub(crate) fn endpoint_url(host: &str, port: Option<u16>) -> Result<String> {
    let with_scheme = if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    };
    let mut url = Url::parse(&with_scheme)
        .map_err(|e| SyncError::Connection(format!("invalid S3 endpoint '{}': {}", host, e)))?;
    if port.is_some() {
        url.set_port(port)
            .map_err(|_| SyncError::Connection(format!("cannot set port on S3 endpoint '{}'", host)))?;
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

#[async_trait]
impl RemoteStore for S3Store {
    async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            debug!(parent: &self.span, "Already connected, reusing client");
            return Ok(());
        }

        let bucket = self
            .config
            .bucket
            .clone()
            .ok_or_else(|| SyncError::Connection("no bucket configured for S3".into()))?;
        let endpoint = endpoint_url(&self.config.host, self.config.port)?;

        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(&endpoint)
            .region(Region::new(self.config.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &self.config.username,
                &self.config.password,
                None,     // session_token
                None,     // expiry
                "Static", // provider_name
            ))
            .load()
            .await;
        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();
        let client = s3::Client::from_conf(s3_config);

        // HeadBucket doubles as the credential and "change directory" check.
        let head = bounded(self.config.connect_timeout, async {
            client
                .head_bucket()
                .bucket(&bucket)
                .send()
                .await
                .map_err(DisplayErrorContext)
        })
        .await;

        match head {
            Ok(_) => {
                info!(parent: &self.span, %endpoint, %bucket, prefix = %self.prefix(), "Connected");
                self.session = Some(S3Session { client, bucket });
                Ok(())
            }
            Err(reason) => {
                warn!(parent: &self.span, %endpoint, %bucket, error = %reason, "Connection failed");
                Err(SyncError::Connection(format!(
                    "bucket '{}' at {} is not accessible: {}",
                    bucket, endpoint, reason
                )))
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.session.take().is_some() {
            info!(parent: &self.span, "Connection closed");
        }
    }

    async fn list(&mut self) -> Result<Vec<String>> {
        let prefix = self.prefix();
        let limit = self.config.operation_timeout;
        let session = self.session("list")?;

        let mut names = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let page = bounded(limit, async {
                session
                    .client
                    .list_objects_v2()
                    .bucket(&session.bucket)
                    .prefix(&prefix)
                    .delimiter("/")
                    .set_continuation_token(continuation.clone())
                    .send()
                    .await
                    .map_err(DisplayErrorContext)
            })
            .await
            .map_err(|reason| SyncError::transfer(TransferOp::List, prefix.as_str(), reason))?;

            names.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter_map(|key| key.strip_prefix(prefix.as_str()))
                    .filter(|name| !name.is_empty() && !name.ends_with('/'))
                    .map(str::to_string),
            );

            continuation = match (page.is_truncated(), page.next_continuation_token()) {
                (Some(true), Some(token)) => Some(token.to_string()),
                _ => None,
            };
            if continuation.is_none() {
                break;
            }
        }

        info!(parent: &self.span, count = names.len(), "Listed remote directory");
        Ok(names)
    }

    async fn download(&mut self, name: &str) -> Result<Vec<u8>> {
        let key = self.key_for(name);
        let limit = self.config.operation_timeout;
        let session = self.session("download")?;

        let data = bounded(limit, async {
            let object = session
                .client
                .get_object()
                .bucket(&session.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| DisplayErrorContext(e).to_string())?;
            let bytes = object.body.collect().await.map_err(|e| e.to_string())?;
            Ok::<_, String>(bytes.into_bytes().to_vec())
        })
        .await
        .map_err(|reason| SyncError::transfer(TransferOp::Download, name, reason))?;

        debug!(parent: &self.span, file = name, bytes = data.len(), "Downloaded");
        Ok(data)
    }

    async fn upload(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let key = self.key_for(name);
        let limit = self.config.operation_timeout;
        let session = self.session("upload")?;

        let output = bounded(limit, async {
            session
                .client
                .put_object()
                .bucket(&session.bucket)
                .key(&key)
                .body(ByteStream::from(data.to_vec()))
                .send()
                .await
                .map_err(DisplayErrorContext)
        })
        .await
        .map_err(|reason| SyncError::transfer(TransferOp::Upload, name, reason))?;

        if output.e_tag().is_none() {
            return Err(SyncError::UnconfirmedWrite(name.to_string()));
        }
        info!(parent: &self.span, file = name, bytes = data.len(), "Uploaded");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn location(&self) -> String {
        format!(
            "s3://{}/{}",
            self.config.bucket.as_deref().unwrap_or_default(),
            self.prefix()
        )
    }
}
