use crate::queue::model::{
    Company, Draft, MailLog, NewQueueItem, QueueItem, QueueStatus, SendSettings, Template,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub mod memory;
pub mod pg;

pub use memory::MemoryQueueStore;
pub use pg::PgQueueStore;

pub const SEND_SETTINGS_KEY: &str = "send_settings";

/// Filters for the queue view. Newest first.
#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    pub status: Option<QueueStatus>,
    /// Case-insensitive substring of recipient or subject.
    pub search: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl QueueFilter {
    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, 500)
    }
}

/// Filters for the sent-mail history. Newest first, 1-based pages.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub search: Option<String>,
    pub sent_from: Option<DateTime<Utc>>,
    pub sent_to: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl HistoryFilter {
    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 200)
    }

    pub fn effective_page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn offset(&self) -> i64 {
        (self.effective_page() - 1) * self.effective_limit()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub items: Vec<MailLog>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

/// Input of the scheduled tick's count-and-claim step.
#[derive(Debug, Clone, Copy)]
pub struct TickClaimRequest {
    pub day_start: DateTime<Utc>,
    pub daily_limit: i64,
    pub now: DateTime<Utc>,
    /// When set, a failed item with `retry_count` below this value and a due
    /// `next_attempt_at` may be claimed if nothing is waiting.
    pub retry_below: Option<i32>,
}

/// `used_today` counts delivered mail since `day_start` plus items claimed
/// since then that are still processing.
#[derive(Debug, Clone, PartialEq)]
pub enum TickClaim {
    LimitReached { used_today: i64 },
    Empty { used_today: i64 },
    Claimed { item: QueueItem, used_today: i64 },
}

/// Everything needed to record a delivered email.
#[derive(Debug, Clone)]
pub struct CompletedSend {
    /// None for direct draft sends that never had a queue item.
    pub queue_item_id: Option<Uuid>,
    pub company_id: Uuid,
    pub draft_id: Option<Uuid>,
    pub to_email: String,
    pub subject: String,
    pub body: String,
    pub send_order: i32,
    pub external_id: Option<String>,
    pub sent_at: DateTime<Utc>,
}

impl CompletedSend {
    pub fn for_item(item: &QueueItem, external_id: Option<String>, sent_at: DateTime<Utc>) -> Self {
        Self {
            queue_item_id: Some(item.id),
            company_id: item.company_id,
            draft_id: item.draft_id,
            to_email: item.to_email.clone(),
            subject: item.subject.clone(),
            body: item.body.clone(),
            send_order: item.send_order,
            external_id,
            sent_at,
        }
    }
}

/// Storage used by the send engine.
///
/// Every status change is a compare-and-set: methods that move a queue item
/// return `None` when the item was not in an accepted prior status.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn get_company(&self, id: Uuid) -> anyhow::Result<Option<Company>>;
    async fn get_draft(&self, id: Uuid) -> anyhow::Result<Option<Draft>>;
    async fn get_template(&self, id: Uuid) -> anyhow::Result<Option<Template>>;
    async fn default_template(&self) -> anyhow::Result<Option<Template>>;
    async fn default_signature(&self) -> anyhow::Result<Option<String>>;

    /// Inserts a waiting item. A linked draft moves draft -> queued in the
    /// same step; `None` when that draft is no longer in `draft`.
    async fn insert_queue_item(&self, item: &NewQueueItem) -> anyhow::Result<Option<QueueItem>>;

    async fn get_queue_item(&self, id: Uuid) -> anyhow::Result<Option<QueueItem>>;
    async fn list_queue_items(&self, filter: &QueueFilter) -> anyhow::Result<Vec<QueueItem>>;

    /// waiting -> waiting with new content.
    async fn update_waiting_content(
        &self,
        id: Uuid,
        subject: Option<&str>,
        body: Option<&str>,
    ) -> anyhow::Result<Option<QueueItem>>;

    /// Deletes a waiting item and reverts its draft to `draft`.
    async fn delete_waiting(&self, id: Uuid) -> anyhow::Result<Option<QueueItem>>;

    /// `from` -> processing, stamping `attempted_at`.
    async fn claim(
        &self,
        id: Uuid,
        from: &[QueueStatus],
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<QueueItem>>;

    /// Counts today's usage and claims at most one item, atomically with
    /// respect to other ticks.
    async fn claim_for_tick(&self, req: &TickClaimRequest) -> anyhow::Result<TickClaim>;

    /// processing -> failed, `retry_count + 1`.
    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Option<QueueItem>>;

    /// Draft draft -> queued for a direct send.
    async fn reserve_draft(&self, id: Uuid) -> anyhow::Result<Option<Draft>>;
    /// Draft queued -> draft after a failed direct send.
    async fn release_draft(&self, id: Uuid) -> anyhow::Result<()>;
    /// Draft queued -> sent when a direct send was delivered but its commit
    /// failed. `false` when the draft was not queued.
    async fn mark_draft_sent(&self, id: Uuid) -> anyhow::Result<bool>;

    /// Writes the MailLog, completes the queue item and applies the company
    /// and draft rollups. Replaying the same queue item returns the existing
    /// log instead of inserting another.
    async fn commit_success(&self, send: &CompletedSend) -> anyhow::Result<MailLog>;

    /// processing items attempted before `cutoff` with no MailLog become
    /// failed. Returns their ids.
    async fn fail_stale_processing(
        &self,
        cutoff: DateTime<Utc>,
        error: &str,
    ) -> anyhow::Result<Vec<Uuid>>;

    /// Queued drafts last touched before `cutoff` that have neither a queue
    /// item nor a MailLog go back to `draft`. Returns their ids.
    async fn release_stale_drafts(&self, cutoff: DateTime<Utc>) -> anyhow::Result<Vec<Uuid>>;

    async fn count_sent_since(&self, since: DateTime<Utc>) -> anyhow::Result<i64>;
    async fn list_history(&self, filter: &HistoryFilter) -> anyhow::Result<HistoryPage>;

    async fn load_send_settings(&self) -> anyhow::Result<SendSettings>;
    async fn save_send_settings(&self, settings: &SendSettings) -> anyhow::Result<()>;
}

pub(crate) fn matches_search(search: Option<&str>, fields: &[&str]) -> bool {
    match search.map(str::trim).filter(|s| !s.is_empty()) {
        None => true,
        Some(needle) => {
            let needle = needle.to_lowercase();
            fields.iter().any(|f| f.to_lowercase().contains(&needle))
        }
    }
}

pub(crate) fn like_pattern(search: Option<&str>) -> Option<String> {
    search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let escaped = s
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            format!("%{escaped}%")
        })
}
