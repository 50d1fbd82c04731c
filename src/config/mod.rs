// savesync/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scheduler::SchedulePolicy;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_BACKUP_DIR: &str = "./backups";
pub const DEFAULT_INDEX_FILE: &str = "3ad85aea-index";
const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_SFTP_PORT: u16 = 22;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 60;
const DEFAULT_INTERVAL_MINUTES: u64 = 60;

pub const ENV_REMOTE_USERNAME: &str = "SAVESYNC_REMOTE_USERNAME";
pub const ENV_REMOTE_PASSWORD: &str = "SAVESYNC_REMOTE_PASSWORD";

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonRemoteConfig {
    pub protocol: Option<Protocol>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub remote_dir: Option<String>,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub operation_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonBackupOptions {
    pub enabled: Option<bool>,
    pub backup_dir: Option<PathBuf>,
    pub keep: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonUpdateOptions {
    pub enabled: Option<bool>,
    pub index_file: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonScheduleOptions {
    pub interval_minutes: Option<u64>,
    pub times: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonNotificationOptions {
    pub enabled: Option<bool>,
    pub recipient: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonLogOptions {
    pub level: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub remote: Option<JsonRemoteConfig>,
    pub backup: Option<JsonBackupOptions>,
    pub update: Option<JsonUpdateOptions>,
    pub schedule: Option<JsonScheduleOptions>,
    pub notification: Option<JsonNotificationOptions>,
    pub logging: Option<JsonLogOptions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Sftp,
    S3,
}

// Application's internal configuration structs
#[derive(Clone)]
pub struct RemoteConfig {
    pub protocol: Protocol,
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    pub remote_dir: String,
    pub bucket: Option<String>,
    pub region: String,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("remote_dir", &self.remote_dir)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("connect_timeout", &self.connect_timeout)
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub enabled: bool,
    pub backup_dir: PathBuf,
    /// How many archives to keep; `None` keeps all of them.
    pub keep: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct UpdateConfig {
    pub enabled: bool,
    pub index_file: String,
}

#[derive(Debug, Clone, Default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub recipient: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    pub backup: BackupConfig,
    pub update: UpdateConfig,
    pub schedule: SchedulePolicy,
    pub notification: NotificationConfig,
    pub log: LogConfig,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw_json_config: RawJsonConfig = serde_json::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })?;

        Self::from_raw(raw_json_config, |key| std::env::var(key).ok())
            .with_context(|| format!("Invalid configuration in {}", config_path.display()))
    }

    /// Validates a raw config. `env` supplies credential overrides.
    pub fn from_raw<F>(raw: RawJsonConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let remote = load_remote_config(raw.remote.unwrap_or_default(), &env)?;
        let backup = load_backup_config(raw.backup.unwrap_or_default())?;
        let update = load_update_config(raw.update.unwrap_or_default())?;
        let schedule = load_schedule_policy(raw.schedule.unwrap_or_default())?;

        let notification_raw = raw.notification.unwrap_or_default();
        let notification = NotificationConfig {
            enabled: notification_raw.enabled.unwrap_or(false),
            recipient: notification_raw.recipient.filter(|s| !s.trim().is_empty()),
        };

        let log = LogConfig {
            level: raw
                .logging
                .and_then(|l| l.level)
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "info".to_string()),
        };

        Ok(AppConfig {
            remote,
            backup,
            update,
            schedule,
            notification,
            log,
        })
    }
}

fn load_remote_config<F>(raw: JsonRemoteConfig, env: &F) -> Result<RemoteConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let protocol = raw.protocol.unwrap_or_default();
    let host = raw
        .host
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .context("remote.host must be set in config.json")?;

    let username = env(ENV_REMOTE_USERNAME)
        .or(raw.username)
        .unwrap_or_default();
    let password = env(ENV_REMOTE_PASSWORD)
        .or(raw.password)
        .unwrap_or_default();

    let bucket = raw.bucket.filter(|b| !b.trim().is_empty());
    let port = match protocol {
        Protocol::Sftp => Some(raw.port.unwrap_or(DEFAULT_SFTP_PORT)),
        Protocol::S3 => {
            if bucket.is_none() {
                anyhow::bail!("remote.bucket must be set when remote.protocol is \"s3\"");
            }
            raw.port
        }
    };

    if protocol == Protocol::Sftp && username.is_empty() {
        anyhow::bail!(
            "remote.username (or {}) must be set for SFTP",
            ENV_REMOTE_USERNAME
        );
    }

    Ok(RemoteConfig {
        protocol,
        host,
        port,
        username,
        password,
        remote_dir: raw.remote_dir.unwrap_or_else(|| "/".to_string()),
        bucket,
        region: raw
            .region
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REGION.to_string()),
        connect_timeout: positive_secs(
            "remote.connect_timeout_secs",
            raw.connect_timeout_secs,
            DEFAULT_CONNECT_TIMEOUT_SECS,
        )?,
        operation_timeout: positive_secs(
            "remote.operation_timeout_secs",
            raw.operation_timeout_secs,
            DEFAULT_OPERATION_TIMEOUT_SECS,
        )?,
    })
}

fn load_backup_config(raw: JsonBackupOptions) -> Result<BackupConfig> {
    let backup_dir = raw
        .backup_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR));
    if backup_dir.to_string_lossy().trim().is_empty() {
        anyhow::bail!("backup.backup_dir cannot be empty in config.json.");
    }
    if raw.keep == Some(0) {
        anyhow::bail!("backup.keep must be at least 1 (omit it to keep every archive)");
    }

    Ok(BackupConfig {
        enabled: raw.enabled.unwrap_or(true),
        backup_dir,
        keep: raw.keep,
    })
}

fn load_update_config(raw: JsonUpdateOptions) -> Result<UpdateConfig> {
    let index_file = raw
        .index_file
        .unwrap_or_else(|| DEFAULT_INDEX_FILE.to_string());
    if index_file.trim().is_empty() {
        anyhow::bail!("update.index_file cannot be empty in config.json.");
    }
    Ok(UpdateConfig {
        enabled: raw.enabled.unwrap_or(true),
        index_file,
    })
}

fn load_schedule_policy(raw: JsonScheduleOptions) -> Result<SchedulePolicy> {
    match (raw.interval_minutes, raw.times) {
        (Some(_), Some(_)) => Err(anyhow::anyhow!(
            "schedule must set either interval_minutes or times, not both"
        )),
        (None, Some(times)) => SchedulePolicy::fixed_times(times)
            .context("Failed to parse schedule.times"),
        (minutes, None) => {
            let minutes = minutes.unwrap_or(DEFAULT_INTERVAL_MINUTES);
            SchedulePolicy::interval(Duration::from_secs(minutes.saturating_mul(60)))
                .context("Failed to parse schedule.interval_minutes")
        }
    }
}

fn positive_secs(field: &str, value: Option<u64>, default: u64) -> Result<Duration> {
    match value.unwrap_or(default) {
        0 => Err(anyhow::anyhow!("{} must be greater than zero", field)),
        secs => Ok(Duration::from_secs(secs)),
    }
}
