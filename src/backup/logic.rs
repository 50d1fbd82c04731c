// savesync/src/backup/logic.rs
use std::path::{Path, PathBuf};
use tracing::{Span, error, info, warn};

use super::archive;
use crate::config::BackupConfig;
use crate::errors::{Result, SyncError};
use crate::remote::RemoteStore;
use crate::utils::timestamp_now;

/// A remote file that was left out of the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub name: String,
    pub reason: String,
}

/// Outcome of a successful backup.
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub archive_path: PathBuf,
    pub archived: Vec<String>,
    pub skipped: Vec<SkippedFile>,
    /// Older archives deleted by rotation.
    pub pruned: Vec<PathBuf>,
}

impl BackupReport {
    pub fn warning_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Snapshots the remote directory into `backup_<timestamp>.zip`.
pub struct BackupPipeline {
    backup_dir: PathBuf,
    keep: Option<usize>,
    span: Span,
}

impl BackupPipeline {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        let backup_dir = backup_dir.into();
        let span = tracing::info_span!("backup", dir = %backup_dir.display());
        Self {
            backup_dir,
            keep: None,
            span,
        }
    }

    pub fn from_config(config: &BackupConfig) -> Self {
        Self::new(&config.backup_dir).with_keep(config.keep)
    }

    /// Rotation: keep at most `keep` archives after each successful run.
    pub fn with_keep(mut self, keep: Option<usize>) -> Self {
        self.keep = keep;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Connects, downloads every listed file, writes the archive and
    /// disconnects. The session is closed on every path out of here.
    ///
    /// Individual download failures are skipped and reported in
    /// [`BackupReport::skipped`]. An empty listing, a failed listing or a run
    /// where no file could be downloaded at all is a failure and writes no
    /// archive.
    pub async fn run(&self, store: &mut dyn RemoteStore) -> Result<BackupReport> {
        info!(parent: &self.span, remote = %store.location(), "Starting backup");
        if let Err(e) = store.connect().await {
            error!(parent: &self.span, error = %e, "Backup aborted: cannot connect");
            return Err(e);
        }

        let outcome = self.snapshot(store).await;
        store.disconnect().await;

        match &outcome {
            Ok(report) => info!(
                parent: &self.span,
                archive = %report.archive_path.display(),
                files = report.archived.len(),
                warnings = report.warning_count(),
                "Backup finished"
            ),
            Err(e) => error!(parent: &self.span, error = %e, "Backup failed"),
        }
        outcome
    }

    async fn snapshot(&self, store: &mut dyn RemoteStore) -> Result<BackupReport> {
        let names = store.list().await?;
        if names.is_empty() {
            return Err(SyncError::EmptyDirectory(store.location()));
        }
        info!(parent: &self.span, count = names.len(), "Remote files listed");

        let mut downloaded = Vec::with_capacity(names.len());
        let mut skipped = Vec::new();
        for name in &names {
            match store.download(name).await {
                Ok(data) => downloaded.push((name.clone(), data)),
                Err(e) => {
                    warn!(parent: &self.span, file = %name, error = %e, "Skipping file that could not be downloaded");
                    skipped.push(SkippedFile {
                        name: name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if downloaded.is_empty() {
            return Err(SyncError::NoFilesDownloaded {
                attempted: names.len(),
            });
        }

        let archived: Vec<String> = downloaded.iter().map(|(name, _)| name.clone()).collect();
        let backup_dir = self.backup_dir.clone();
        let timestamp = timestamp_now();
        let archive_path = tokio::task::spawn_blocking(move || {
            archive::write_zip_archive(&backup_dir, &timestamp, &downloaded)
        })
        .await
        .map_err(|e| SyncError::ArchiveWrite(format!("archive worker stopped: {}", e)))??;

        let pruned = match self.keep {
            Some(keep) => match archive::prune_archives(&self.backup_dir, keep) {
                Ok(removed) => {
                    for path in &removed {
                        info!(parent: &self.span, archive = %path.display(), "Removed old archive");
                    }
                    removed
                }
                Err(e) => {
                    warn!(parent: &self.span, error = %e, "Archive rotation failed");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        Ok(BackupReport {
            archive_path,
            archived,
            skipped,
            pruned,
        })
    }
}
