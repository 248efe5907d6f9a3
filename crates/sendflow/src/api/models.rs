use crate::queue::model::QueueItem;
use crate::queue::report::TickOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct ListQueueQuery {
    pub status: Option<String>,
    pub search: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListQueueResponse {
    pub items: Vec<QueueItem>,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueDraftsRequest {
    pub draft_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct EditQueueRequest {
    pub id: Uuid,
    pub subject: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DirectEnqueueRequest {
    pub company_ids: Vec<Uuid>,
    pub template_id: Option<Uuid>,
}

/// Exactly one of the two lists must be given.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub queue_ids: Option<Vec<Uuid>>,
    pub draft_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    pub queue_ids: Vec<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub search: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CronQuery {
    pub force: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct CronResponse {
    pub success: bool,
    pub skipped: bool,
    pub processed: usize,
    pub message: String,
    #[serde(flatten)]
    pub outcome: TickOutcome,
}

impl From<TickOutcome> for CronResponse {
    fn from(outcome: TickOutcome) -> Self {
        Self {
            success: !matches!(outcome, TickOutcome::Failed { .. }),
            skipped: outcome.skipped(),
            processed: outcome.processed(),
            message: outcome.message().to_string(),
            outcome,
        }
    }
}
