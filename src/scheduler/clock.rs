use chrono::{Local, NaiveDateTime};

/// Source of local wall-clock time for the fixed-times policy.
pub trait WallClock: Send + Sync + 'static {
    fn now(&self) -> NaiveDateTime;
}

/// The machine's local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl WallClock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Wall clock anchored at a fixed time that advances with tokio's clock, so
/// paused-time tests control it.
#[cfg(test)]
pub(crate) struct TestClock {
    base: NaiveDateTime,
    origin: tokio::time::Instant,
}

#[cfg(test)]
impl TestClock {
    pub(crate) fn starting_at(base: NaiveDateTime) -> Self {
        Self {
            base,
            origin: tokio::time::Instant::now(),
        }
    }
}

#[cfg(test)]
impl WallClock for TestClock {
    fn now(&self) -> NaiveDateTime {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed()).unwrap_or_default();
        self.base + elapsed
    }
}
