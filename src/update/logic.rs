// savesync/src/update/logic.rs
use serde_json::Value;
use tracing::{Span, error, info};

use crate::errors::{ParseError, Result};
use crate::remote::RemoteStore;

/// Field decremented on every update.
pub const LATEST_FIELD: &str = "latest";

/// Counter values before and after an update. Wide enough for any JSON
/// integer `serde_json` parses, signed or unsigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexUpdate {
    pub previous: i128,
    pub current: i128,
}

/// Decrements `latest` by one, floored at zero, keeping every other field
/// as it was.
///
/// # Returns
/// The pretty-printed record to write back and the counter change.
pub fn decrement_latest(raw: &[u8]) -> std::result::Result<(Vec<u8>, IndexUpdate), ParseError> {
    let mut record: Value = serde_json::from_slice(raw)?;
    let fields = record.as_object_mut().ok_or(ParseError::NotAnObject)?;
    let value = fields
        .get_mut(LATEST_FIELD)
        .ok_or(ParseError::MissingField(LATEST_FIELD))?;

    let (update, replacement) = if let Some(old) = value.as_i64() {
        let new = old.saturating_sub(1).max(0);
        (IndexUpdate { previous: old.into(), current: new.into() }, Value::from(new))
    } else if let Some(old) = value.as_u64() {
        // Only reached above i64::MAX, so the decrement stays unsigned.
        let new = old.saturating_sub(1);
        (IndexUpdate { previous: old.into(), current: new.into() }, Value::from(new))
    } else {
        return Err(ParseError::NotAnInteger {
            field: LATEST_FIELD,
            found: value.to_string(),
        });
    };
    *value = replacement;

    let body = serde_json::to_vec_pretty(&record)?;
    Ok((body, update))
}

/// Read-modify-write of the remote index record.
///
/// There is no concurrency check against other writers of the same record;
/// the scheduler only guarantees that its own runs never overlap.
pub struct IndexUpdatePipeline {
    index_name: String,
    span: Span,
}

impl IndexUpdatePipeline {
    pub fn new(index_name: impl Into<String>) -> Self {
        let index_name = index_name.into();
        let span = tracing::info_span!("index_update", index = %index_name);
        Self { index_name, span }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Connects, downloads the record, writes back the decremented counter
    /// and disconnects. Nothing is uploaded when the record cannot be parsed.
    pub async fn run(&self, store: &mut dyn RemoteStore) -> Result<IndexUpdate> {
        if let Err(e) = store.connect().await {
            error!(parent: &self.span, error = %e, "Index update aborted: cannot connect");
            return Err(e);
        }

        let outcome = self.apply(store).await;
        store.disconnect().await;

        match &outcome {
            Ok(update) => info!(
                parent: &self.span,
                previous = update.previous,
                current = update.current,
                "Index updated"
            ),
            Err(e) => error!(parent: &self.span, error = %e, "Index update failed"),
        }
        outcome
    }

    async fn apply(&self, store: &mut dyn RemoteStore) -> Result<IndexUpdate> {
        let raw = store.download(&self.index_name).await?;
        let (body, update) = decrement_latest(&raw)?;
        store.upload(&self.index_name, &body).await?;
        Ok(update)
    }
}
