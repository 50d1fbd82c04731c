//! Remote directory snapshots written as timestamped ZIP archives.

mod archive;
mod logic;

pub use archive::{archive_file_name, list_archives, prune_archives, write_zip_archive};
pub use logic::{BackupPipeline, BackupReport, SkippedFile};

use crate::config::AppConfig;
use crate::errors::Result;
use crate::remote::RemoteStore;

/// Runs one backup against `store` using the `backup` section of the config.
pub async fn run_backup_flow(app_config: &AppConfig, store: &mut dyn RemoteStore) -> Result<BackupReport> {
    BackupPipeline::from_config(&app_config.backup).run(store).await
}
