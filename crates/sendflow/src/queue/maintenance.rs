use crate::queue::engine::SendEngine;
use crate::queue::error::QueueError;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Error recorded on items the sweep gives up on.
pub const STALE_PROCESSING_ERROR: &str = "stale processing: delivery outcome unknown";

/// What one sweep pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaleSweep {
    /// processing items marked failed.
    pub failed_items: Vec<Uuid>,
    /// queued drafts with no queue item and no log, back to `draft`.
    pub released_drafts: Vec<Uuid>,
}

impl StaleSweep {
    pub fn is_empty(&self) -> bool {
        self.failed_items.is_empty() && self.released_drafts.is_empty()
    }
}

/// Convenience: compute cutoff like "now - N minutes"
pub fn cutoff_minutes(minutes: i64) -> DateTime<Utc> {
    Utc::now() - Duration::minutes(minutes)
}

/// One pass of the stale-processing sweep. `after_minutes <= 0` disables it.
pub async fn sweep_stale_processing(
    engine: &SendEngine,
    after_minutes: i64,
) -> Result<StaleSweep, QueueError> {
    if after_minutes <= 0 {
        return Ok(StaleSweep::default());
    }
    engine.sweep_stale(cutoff_minutes(after_minutes)).await
}
