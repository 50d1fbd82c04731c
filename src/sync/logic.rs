// savesync/src/sync/logic.rs
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{Span, error, info, warn};

use crate::backup::{BackupPipeline, BackupReport};
use crate::config::{AppConfig, RemoteConfig};
use crate::remote::{RemoteStore, open_store};
use crate::scheduler::{Task, task};
use crate::status::{LogNotifier, LogStatusSink, Notifier, Status, StatusSink};
use crate::update::{IndexUpdate, IndexUpdatePipeline};

/// Builds a fresh, unconnected store for one cycle.
pub type StoreFactory = Arc<dyn Fn(&RemoteConfig) -> Box<dyn RemoteStore> + Send + Sync>;

/// What one cycle did. `None` means the step is disabled.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub backup: Option<BackupReport>,
    pub index: Option<IndexUpdate>,
}

/// One synchronization cycle: backup, then index update.
///
/// A failed backup skips the index update for that cycle. Each cycle opens
/// its own store, so sessions are never shared between runs.
pub struct SyncJob {
    config: Arc<AppConfig>,
    status: Arc<dyn StatusSink>,
    notifier: Option<Arc<dyn Notifier>>,
    store_factory: StoreFactory,
    span: Span,
}

impl SyncJob {
    /// Uses the configured backend, a logging status sink and, when
    /// notifications are enabled, a [`LogNotifier`].
    pub fn new(config: Arc<AppConfig>) -> Self {
        let notifier: Option<Arc<dyn Notifier>> = if config.notification.enabled {
            let recipient = config.notification.recipient.clone().unwrap_or_default();
            Some(Arc::new(LogNotifier::new(recipient)))
        } else {
            None
        };

        Self {
            config,
            status: Arc::new(LogStatusSink),
            notifier,
            store_factory: Arc::new(open_store),
            span: tracing::info_span!("sync"),
        }
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status = sink;
        self
    }

    pub fn with_notifier(mut self, notifier: Option<Arc<dyn Notifier>>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_store_factory(mut self, factory: StoreFactory) -> Self {
        self.store_factory = factory;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Runs one cycle and reports `Running` on success or `Error` on failure.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let mut store = (self.store_factory)(&self.config.remote);
        let outcome = self.run_steps(store.as_mut()).await;

        match &outcome {
            Ok(report) => {
                if let Some(backup) = report.backup.as_ref().filter(|b| b.warning_count() > 0) {
                    warn!(parent: &self.span, skipped = backup.warning_count(), "Cycle finished with skipped files");
                } else {
                    info!(parent: &self.span, "Cycle finished");
                }
                self.status.report(Status::Running);
            }
            Err(e) => {
                error!(parent: &self.span, error = %format!("{:#}", e), "Cycle failed");
                self.status.report(Status::Error);
                self.notify_failure(e).await;
            }
        }
        outcome
    }

    async fn run_steps(&self, store: &mut dyn RemoteStore) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        if self.config.backup.enabled {
            let backup = BackupPipeline::from_config(&self.config.backup)
                .with_span(tracing::info_span!(parent: &self.span, "backup"))
                .run(store)
                .await
                .context("Backup failed")?;
            report.backup = Some(backup);
        }

        if self.config.update.enabled {
            let update = IndexUpdatePipeline::new(&self.config.update.index_file)
                .with_span(tracing::info_span!(parent: &self.span, "index_update"))
                .run(store)
                .await
                .context("Index update failed")?;
            report.index = Some(update);
        }

        Ok(report)
    }

    async fn notify_failure(&self, failure: &anyhow::Error) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let body = format!("{:#}\n\nRemote: {}", failure, self.config.remote.host);
        if let Err(e) = notifier.notify("savesync cycle failed", &body).await {
            warn!(parent: &self.span, error = %e, "Failed to send failure notification");
        }
    }

    /// Turns the job into a scheduler task running one cycle per tick.
    pub fn into_task(self) -> Task {
        let job = Arc::new(self);
        task(move || {
            let job = job.clone();
            async move { job.run_cycle().await.map(|_| ()) }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawJsonConfig;
    use crate::errors::{Result as SyncResult, SyncError};
    use crate::remote::memory::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Mutex;
    use tokio::sync::Mutex as AsyncMutex;

    const INDEX: &str = "3ad85aea-index";

    /// Lets a test inspect the store after the job has used it.
    #[derive(Clone)]
    struct SharedStore(Arc<AsyncMutex<MemoryStore>>);

    #[async_trait]
    impl RemoteStore for SharedStore {
        async fn connect(&mut self) -> SyncResult<()> {
            self.0.lock().await.connect().await
        }
        async fn disconnect(&mut self) {
            self.0.lock().await.disconnect().await
        }
        async fn list(&mut self) -> SyncResult<Vec<String>> {
            self.0.lock().await.list().await
        }
        async fn download(&mut self, name: &str) -> SyncResult<Vec<u8>> {
            self.0.lock().await.download(name).await
        }
        async fn upload(&mut self, name: &str, data: &[u8]) -> SyncResult<()> {
            self.0.lock().await.upload(name, data).await
        }
        fn is_connected(&self) -> bool {
            self.0.try_lock().map(|s| s.is_connected()).unwrap_or(false)
        }
        fn location(&self) -> String {
            "memory://".to_string()
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, subject: &str, _body: &str) -> SyncResult<()> {
            self.sent.lock().unwrap().push(subject.to_string());
            Ok(())
        }
    }

    fn app_config(backup_dir: &Path, backup: bool, update: bool) -> Arc<AppConfig> {
        let raw: RawJsonConfig = serde_json::from_value(json!({
            "remote": { "host": "h", "username": "u" },
            "backup": { "enabled": backup, "backup_dir": backup_dir },
            "update": { "enabled": update, "index_file": INDEX }
        }))
        .unwrap();
        Arc::new(AppConfig::from_raw(raw, |_| None).unwrap())
    }

    struct Harness {
        job: SyncJob,
        store: Arc<AsyncMutex<MemoryStore>>,
        statuses: Arc<Mutex<Vec<Status>>>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness(config: Arc<AppConfig>, store: MemoryStore) -> Harness {
        let store = Arc::new(AsyncMutex::new(store));
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let notifier = Arc::new(RecordingNotifier::default());

        let shared = store.clone();
        let recorded = statuses.clone();
        let job = SyncJob::new(config)
            .with_store_factory(Arc::new(move |_: &RemoteConfig| {
                Box::new(SharedStore(shared.clone())) as Box<dyn RemoteStore>
            }))
            .with_status_sink(Arc::new(move |s: Status| recorded.lock().unwrap().push(s)))
            .with_notifier(Some(notifier.clone() as Arc<dyn Notifier>));

        Harness {
            job,
            store,
            statuses,
            notifier,
        }
    }

    #[tokio::test]
    async fn cycle_backs_up_then_decrements_index() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(
            app_config(dir.path(), true, true),
            MemoryStore::new()
                .with_file("slot1.sav", "data")
                .with_file(INDEX, r#"{"latest": 3}"#),
        );

        let report = h.job.run_cycle().await.unwrap();

        let backup = report.backup.unwrap();
        assert_eq!(backup.archived, vec!["slot1.sav", INDEX]);
        assert!(backup.archive_path.starts_with(dir.path()));
        assert_eq!(report.index, Some(IndexUpdate { previous: 3, current: 2 }));

        let store = h.store.lock().await;
        let index: serde_json::Value = serde_json::from_slice(store.file(INDEX).unwrap()).unwrap();
        assert_eq!(index, json!({"latest": 2}));
        assert_eq!(store.connect_calls(), 2);
        assert_eq!(*h.statuses.lock().unwrap(), vec![Status::Running]);
        assert!(h.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_backup_skips_index_update() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(
            app_config(dir.path(), true, true),
            MemoryStore::new()
                .with_file(INDEX, r#"{"latest": 3}"#)
                .fail_download_of(INDEX),
        );

        let err = h.job.run_cycle().await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::NoFilesDownloaded { .. })
        ));
        assert!(h.store.lock().await.uploads().is_empty());
        assert_eq!(*h.statuses.lock().unwrap(), vec![Status::Error]);
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disabled_backup_only_updates_index() {
        let dir = tempfile::tempdir().unwrap();
        let backup_dir = dir.path().join("never-created");
        let h = harness(
            app_config(&backup_dir, false, true),
            MemoryStore::new().with_file(INDEX, r#"{"latest": 1, "slot": "a"}"#),
        );

        let report = h.job.run_cycle().await.unwrap();

        assert!(report.backup.is_none());
        assert_eq!(report.index.map(|u| u.current), Some(0));
        assert!(!backup_dir.exists());
    }

    #[tokio::test]
    async fn task_reports_failure_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(
            app_config(dir.path(), false, true),
            MemoryStore::new().with_file(INDEX, r#"{"latest": "five"}"#),
        );
        let statuses = h.statuses.clone();

        let task = h.job.into_task();
        assert!(task().await.is_err());
        assert!(task().await.is_err());
        assert_eq!(*statuses.lock().unwrap(), vec![Status::Error, Status::Error]);
    }
}
