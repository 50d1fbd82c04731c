// savesync/src/sync/mod.rs
mod logic;

pub use logic::{CycleReport, StoreFactory, SyncJob};

use std::sync::Arc;

use crate::config::AppConfig;
use crate::scheduler::TaskScheduler;
use crate::status::StatusSink;

/// Builds a scheduler that runs one [`SyncJob`] cycle per tick, using the
/// configured timing policy. Start/stop transitions and cycle outcomes all
/// go to `status`. The scheduler is not started yet.
pub fn build_scheduler(app_config: Arc<AppConfig>, status: Arc<dyn StatusSink>) -> TaskScheduler {
    let policy = app_config.schedule.clone();
    let job = SyncJob::new(app_config).with_status_sink(status.clone());
    TaskScheduler::new(policy, job.into_task()).with_status_sink(status)
}
