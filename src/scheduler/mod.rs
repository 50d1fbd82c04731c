//! Background task scheduling.
//!
//! A [`TaskScheduler`] drives one tokio task that repeatedly runs a supplied
//! unit of work, either on a fixed interval or at fixed wall-clock times.
//! Runs never overlap: the loop awaits each run before computing the next
//! sleep. Stop and pause are observed at every suspension point.

mod clock;

pub use clock::{LocalClock, WallClock};

use chrono::NaiveDateTime;
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, warn};

use crate::errors::{Result, SyncError};
use crate::status::{Status, StatusSink};
use crate::utils::parse_clock_time;

/// Poll cadence of the fixed-times policy.
pub const FIXED_TIME_POLL: Duration = Duration::from_secs(10);
/// Pause after a fixed-time run so the same minute cannot match again.
pub const FIXED_TIME_COOLDOWN: Duration = Duration::from_secs(60);

pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Zero-argument unit of work run on every tick.
pub type Task = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Wraps an async closure as a [`Task`].
pub fn task<F, Fut>(f: F) -> Task
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as TaskFuture)
}

/// Timing policy, fixed for the lifetime of a scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulePolicy {
    /// Run, then sleep for whatever is left of the interval.
    Interval(Duration),
    /// Run once whenever the local time matches one of these `HH:MM` values.
    FixedTimes(BTreeSet<String>),
}

impl SchedulePolicy {
    pub fn interval(every: Duration) -> Result<Self> {
        if every.is_zero() {
            return Err(SyncError::Config("schedule interval must be greater than zero".into()));
        }
        Ok(SchedulePolicy::Interval(every))
    }

    /// Validates and normalises every time, so `9:30` and `09:30` are the same entry.
    pub fn fixed_times<I, S>(times: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let times = times
            .into_iter()
            .map(|t| parse_clock_time(t.as_ref()))
            .collect::<Result<BTreeSet<_>>>()?;
        if times.is_empty() {
            return Err(SyncError::Config("at least one schedule time is required".into()));
        }
        Ok(SchedulePolicy::FixedTimes(times))
    }
}

/// Snapshot of a scheduler's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleState {
    pub policy: SchedulePolicy,
    pub running: bool,
    pub paused: bool,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct TaskScheduler {
    policy: SchedulePolicy,
    interval_ms: Arc<AtomicU64>,
    task: Task,
    clock: Arc<dyn WallClock>,
    status: Option<Arc<dyn StatusSink>>,
    paused: watch::Sender<bool>,
    worker: Option<Worker>,
    span: Span,
}

impl TaskScheduler {
    pub fn new(policy: SchedulePolicy, task: Task) -> Self {
        let interval_ms = match &policy {
            SchedulePolicy::Interval(every) => duration_to_millis(*every),
            SchedulePolicy::FixedTimes(_) => 0,
        };
        let (paused, _) = watch::channel(false);
        Self {
            policy,
            interval_ms: Arc::new(AtomicU64::new(interval_ms)),
            task,
            clock: Arc::new(LocalClock),
            status: None,
            paused,
            worker: None,
            span: tracing::info_span!("scheduler"),
        }
    }

    pub fn with_clock(mut self, clock: impl WallClock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Receives `Running` on start and `Stopped` on stop.
    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status = Some(sink);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Launches the background loop. Does nothing if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        if self.is_running() {
            debug!(parent: &self.span, "Scheduler already running");
            return;
        }

        self.paused.send_replace(false);
        let cancel = CancellationToken::new();
        let ctx = LoopContext {
            task: self.task.clone(),
            cancel: cancel.clone(),
            paused: self.paused.subscribe(),
        };

        let handle = match &self.policy {
            SchedulePolicy::Interval(_) => {
                info!(parent: &self.span, interval_secs = self.current_interval().as_secs_f64(), "Scheduler started");
                tokio::spawn(run_interval(ctx, self.interval_ms.clone()).instrument(self.span.clone()))
            }
            SchedulePolicy::FixedTimes(times) => {
                info!(parent: &self.span, times = ?times, "Scheduler started");
                let trigger = FixedTimeTrigger::new(times.clone());
                tokio::spawn(run_fixed_times(ctx, trigger, self.clock.clone()).instrument(self.span.clone()))
            }
        };

        self.worker = Some(Worker { cancel, handle });
        self.report(Status::Running);
    }

    /// Signals the loop to end and waits until it has exited. A run already
    /// in progress is allowed to finish first. Returns immediately if the
    /// scheduler was never started.
    pub async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        worker.cancel.cancel();
        if let Err(e) = worker.handle.await {
            error!(parent: &self.span, error = %e, "Scheduler loop ended abnormally");
        }
        self.paused.send_replace(false);
        info!(parent: &self.span, "Scheduler stopped");
        self.report(Status::Stopped);
    }

    /// Skips ticks until [`resume`](Self::resume). Skipped ticks are dropped,
    /// not replayed.
    pub fn pause(&self) {
        if !self.paused.send_replace(true) {
            info!(parent: &self.span, "Scheduler paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.send_replace(false) {
            info!(parent: &self.span, "Scheduler resumed");
        }
    }

    /// Changes the interval used for the next sleep. A sleep already in
    /// progress keeps its length. Ignored, with a warning, for fixed times.
    pub fn set_interval(&self, every: Duration) -> Result<()> {
        if every.is_zero() {
            return Err(SyncError::Config("schedule interval must be greater than zero".into()));
        }
        match self.policy {
            SchedulePolicy::Interval(_) => {
                self.interval_ms.store(duration_to_millis(every), Ordering::Relaxed);
                info!(parent: &self.span, interval_secs = every.as_secs_f64(), "Interval updated");
            }
            SchedulePolicy::FixedTimes(_) => {
                warn!(parent: &self.span, "Interval change ignored by fixed-times schedule");
            }
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn state(&self) -> ScheduleState {
        let policy = match &self.policy {
            SchedulePolicy::Interval(_) => SchedulePolicy::Interval(self.current_interval()),
            fixed => fixed.clone(),
        };
        ScheduleState {
            policy,
            running: self.is_running(),
            paused: self.is_paused(),
        }
    }

    fn current_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    fn report(&self, status: Status) {
        if let Some(sink) = &self.status {
            sink.report(status);
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        if let Some(worker) = &self.worker {
            worker.cancel.cancel();
        }
    }
}

fn duration_to_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1)
}

struct LoopContext {
    task: Task,
    cancel: CancellationToken,
    paused: watch::Receiver<bool>,
}

impl LoopContext {
    /// Blocks while paused. Returns false once the loop should exit.
    async fn wait_while_paused(&mut self) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            resumed = self.paused.wait_for(|paused| !*paused) => resumed.is_ok(),
        }
    }

    /// Sleeps unless stopped first. Returns false once the loop should exit.
    async fn sleep(&self, wait: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(wait) => true,
        }
    }

    /// Runs the task in its own tokio task so a panic is contained and
    /// reported like any other failure.
    async fn run_task(&self) {
        match tokio::spawn((self.task)()).await {
            Ok(Ok(())) => debug!("Scheduled task finished"),
            Ok(Err(e)) => error!(error = %format!("{:#}", e), "Scheduled task failed"),
            Err(e) if e.is_panic() => error!("Scheduled task panicked"),
            Err(e) => warn!(error = %e, "Scheduled task was cancelled"),
        }
    }
}

async fn run_interval(mut ctx: LoopContext, interval_ms: Arc<AtomicU64>) {
    loop {
        if !ctx.wait_while_paused().await {
            break;
        }

        let started = Instant::now();
        ctx.run_task().await;

        let interval = Duration::from_millis(interval_ms.load(Ordering::Relaxed));
        let wait = interval.saturating_sub(started.elapsed());
        if !ctx.sleep(wait).await {
            break;
        }
    }
    debug!("Interval loop exited");
}

async fn run_fixed_times(mut ctx: LoopContext, mut trigger: FixedTimeTrigger, clock: Arc<dyn WallClock>) {
    loop {
        if !ctx.wait_while_paused().await {
            break;
        }

        let wait = if trigger.fire_if_due(clock.now()) {
            info!("Scheduled time reached");
            ctx.run_task().await;
            FIXED_TIME_COOLDOWN
        } else {
            FIXED_TIME_POLL
        };
        if !ctx.sleep(wait).await {
            break;
        }
    }
    debug!("Fixed-times loop exited");
}

/// Decides when a fixed-times schedule fires: at most once per matching
/// calendar minute.
struct FixedTimeTrigger {
    times: BTreeSet<String>,
    last_fired: Option<String>,
}

impl FixedTimeTrigger {
    fn new(times: BTreeSet<String>) -> Self {
        Self {
            times,
            last_fired: None,
        }
    }

    fn fire_if_due(&mut self, now: NaiveDateTime) -> bool {
        if !self.times.contains(&now.format("%H:%M").to_string()) {
            return false;
        }
        let minute = now.format("%Y-%m-%d %H:%M").to_string();
        if self.last_fired.as_deref() == Some(minute.as_str()) {
            return false;
        }
        self.last_fired = Some(minute);
        true
    }
}
