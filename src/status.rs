//! Status reporting towards whatever drives the presentation layer.

use async_trait::async_trait;
use std::fmt;
use tracing::{Span, info};

use crate::errors::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    Stopped,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Running => write!(f, "running"),
            Status::Stopped => write!(f, "stopped"),
            Status::Error => write!(f, "error"),
        }
    }
}

/// Receives status transitions. Must not block.
pub trait StatusSink: Send + Sync {
    fn report(&self, status: Status);
}

impl<F> StatusSink for F
where
    F: Fn(Status) + Send + Sync,
{
    fn report(&self, status: Status) {
        self(status)
    }
}

/// Sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn report(&self, status: Status) {
        info!(%status, "Status changed");
    }
}

/// Delivers a failure report. Either the message is sent or an error is
/// returned; there is no retry.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str) -> Result<()>;
}

/// Notifier that writes the message to the log for a configured recipient.
pub struct LogNotifier {
    recipient: String,
    span: Span,
}

impl LogNotifier {
    pub fn new(recipient: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            span: tracing::info_span!("notify"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<()> {
        if self.recipient.trim().is_empty() {
            return Err(SyncError::Notification("no recipient configured".into()));
        }
        info!(parent: &self.span, recipient = %self.recipient, subject, body, "Notification");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn closures_are_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            move |s: Status| seen.lock().unwrap().push(s)
        };
        sink.report(Status::Running);
        sink.report(Status::Error);
        assert_eq!(*seen.lock().unwrap(), vec![Status::Running, Status::Error]);
        assert_eq!(Status::Stopped.to_string(), "stopped");
    }

    #[tokio::test]
    async fn log_notifier_requires_recipient() {
        assert!(LogNotifier::new("ops@example.org").notify("s", "b").await.is_ok());
        assert!(matches!(
            LogNotifier::new(" ").notify("s", "b").await,
            Err(SyncError::Notification(_))
        ));
    }
}
