use crate::queue::model::{
    Company, CompanyRollup, Draft, DraftStatus, MailLog, NewQueueItem, QueueItem, QueueStatus,
    SendSettings, Template,
};
use crate::store::{
    matches_search, CompletedSend, HistoryFilter, HistoryPage, QueueFilter, QueueStore,
    TickClaim, TickClaimRequest,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    companies: HashMap<Uuid, Company>,
    drafts: HashMap<Uuid, Draft>,
    templates: Vec<Template>,
    signatures: Vec<(String, bool)>,
    /// Insertion order breaks created_at ties.
    queue: Vec<QueueItem>,
    logs: Vec<MailLog>,
    settings: SendSettings,
}

impl Tables {
    fn item_mut(&mut self, id: Uuid) -> Option<&mut QueueItem> {
        self.queue.iter_mut().find(|q| q.id == id)
    }

    fn used_since(&self, since: DateTime<Utc>) -> i64 {
        let sent = self.logs.iter().filter(|l| l.sent_at >= since).count();
        let in_flight = self
            .queue
            .iter()
            .filter(|q| q.status == QueueStatus::Processing)
            .filter(|q| q.attempted_at.is_some_and(|t| t >= since))
            .count();
        (sent + in_flight) as i64
    }

    fn claim_at(&mut self, idx: usize, now: DateTime<Utc>) -> QueueItem {
        let item = &mut self.queue[idx];
        item.status = QueueStatus::Processing;
        item.attempted_at = Some(now);
        item.clone()
    }
}

/// Whole-database stand-in kept behind one mutex, so every trait call is
/// atomic with respect to the others. Used by tests and `--dry-run` demos.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueueStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ----------------------------
    // Seeding / inspection
    // ----------------------------

    pub fn put_company(&self, company: Company) {
        self.lock().companies.insert(company.id, company);
    }

    pub fn put_draft(&self, draft: Draft) {
        self.lock().drafts.insert(draft.id, draft);
    }

    pub fn put_template(&self, template: Template) {
        self.lock().templates.push(template);
    }

    pub fn put_signature(&self, content: &str, is_default: bool) {
        self.lock().signatures.push((content.to_string(), is_default));
    }

    pub fn put_mail_log(&self, log: MailLog) {
        self.lock().logs.push(log);
    }

    /// Insert or replace a queue item as-is, bypassing the state machine.
    pub fn set_queue_item(&self, item: QueueItem) {
        let mut t = self.lock();
        match t.item_mut(item.id) {
            Some(existing) => *existing = item,
            None => t.queue.push(item),
        }
    }

    pub fn company(&self, id: Uuid) -> Option<Company> {
        self.lock().companies.get(&id).cloned()
    }

    pub fn draft(&self, id: Uuid) -> Option<Draft> {
        self.lock().drafts.get(&id).cloned()
    }

    pub fn queue_item(&self, id: Uuid) -> Option<QueueItem> {
        self.lock().queue.iter().find(|q| q.id == id).cloned()
    }

    pub fn mail_logs(&self) -> Vec<MailLog> {
        self.lock().logs.clone()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn get_company(&self, id: Uuid) -> anyhow::Result<Option<Company>> {
        Ok(self.lock().companies.get(&id).cloned())
    }

    async fn get_draft(&self, id: Uuid) -> anyhow::Result<Option<Draft>> {
        Ok(self.lock().drafts.get(&id).cloned())
    }

    async fn get_template(&self, id: Uuid) -> anyhow::Result<Option<Template>> {
        Ok(self.lock().templates.iter().find(|t| t.id == id).cloned())
    }

    async fn default_template(&self) -> anyhow::Result<Option<Template>> {
        Ok(self.lock().templates.iter().find(|t| t.is_default).cloned())
    }

    async fn default_signature(&self) -> anyhow::Result<Option<String>> {
        Ok(self
            .lock()
            .signatures
            .iter()
            .find(|(_, is_default)| *is_default)
            .map(|(content, _)| content.clone()))
    }

    async fn insert_queue_item(&self, new: &NewQueueItem) -> anyhow::Result<Option<QueueItem>> {
        let mut t = self.lock();
        let now = Utc::now();

        if let Some(draft_id) = new.draft_id {
            match t.drafts.get_mut(&draft_id) {
                Some(d) if d.status == DraftStatus::Draft => {
                    d.status = DraftStatus::Queued;
                    d.updated_at = now;
                }
                Some(_) => return Ok(None),
                None => anyhow::bail!("draft {draft_id} does not exist"),
            }
        }

        let item = QueueItem {
            id: Uuid::new_v4(),
            company_id: new.company_id,
            draft_id: new.draft_id,
            to_email: new.to_email.clone(),
            subject: new.subject.clone(),
            body: new.body.clone(),
            send_order: new.send_order,
            status: QueueStatus::Waiting,
            error_message: None,
            retry_count: 0,
            next_attempt_at: None,
            external_id: None,
            created_at: now,
            attempted_at: None,
            sent_at: None,
        };
        t.queue.push(item.clone());
        Ok(Some(item))
    }

    async fn get_queue_item(&self, id: Uuid) -> anyhow::Result<Option<QueueItem>> {
        Ok(self.lock().queue.iter().find(|q| q.id == id).cloned())
    }

    async fn list_queue_items(&self, filter: &QueueFilter) -> anyhow::Result<Vec<QueueItem>> {
        let t = self.lock();
        let mut rows: Vec<QueueItem> = t
            .queue
            .iter()
            .filter(|q| filter.status.map_or(true, |s| q.status == s))
            .filter(|q| filter.created_from.map_or(true, |from| q.created_at >= from))
            .filter(|q| filter.created_to.map_or(true, |to| q.created_at < to))
            .filter(|q| matches_search(filter.search.as_deref(), &[&q.to_email, &q.subject]))
            .cloned()
            .collect();
        rows.reverse();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(filter.effective_limit() as usize);
        Ok(rows)
    }

    async fn update_waiting_content(
        &self,
        id: Uuid,
        subject: Option<&str>,
        body: Option<&str>,
    ) -> anyhow::Result<Option<QueueItem>> {
        let mut t = self.lock();
        let Some(item) = t.item_mut(id) else {
            return Ok(None);
        };
        if item.status != QueueStatus::Waiting {
            return Ok(None);
        }
        if let Some(s) = subject {
            item.subject = s.to_string();
        }
        if let Some(b) = body {
            item.body = b.to_string();
        }
        Ok(Some(item.clone()))
    }

    async fn delete_waiting(&self, id: Uuid) -> anyhow::Result<Option<QueueItem>> {
        let mut t = self.lock();
        let Some(idx) = t
            .queue
            .iter()
            .position(|q| q.id == id && q.status == QueueStatus::Waiting)
        else {
            return Ok(None);
        };
        let item = t.queue.remove(idx);
        if let Some(draft_id) = item.draft_id {
            if let Some(d) = t.drafts.get_mut(&draft_id) {
                if d.status == DraftStatus::Queued {
                    d.status = DraftStatus::Draft;
                    d.updated_at = Utc::now();
                }
            }
        }
        Ok(Some(item))
    }

    async fn claim(
        &self,
        id: Uuid,
        from: &[QueueStatus],
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<QueueItem>> {
        let mut t = self.lock();
        let Some(idx) = t
            .queue
            .iter()
            .position(|q| q.id == id && from.contains(&q.status))
        else {
            return Ok(None);
        };
        Ok(Some(t.claim_at(idx, now)))
    }

    async fn claim_for_tick(&self, req: &TickClaimRequest) -> anyhow::Result<TickClaim> {
        let mut t = self.lock();
        let used_today = t.used_since(req.day_start);
        if used_today >= req.daily_limit {
            return Ok(TickClaim::LimitReached { used_today });
        }

        let oldest_waiting = t
            .queue
            .iter()
            .enumerate()
            .filter(|(_, q)| q.status == QueueStatus::Waiting)
            .min_by_key(|(_, q)| q.created_at)
            .map(|(idx, _)| idx);

        let candidate = oldest_waiting.or_else(|| {
            let below = req.retry_below?;
            t.queue
                .iter()
                .enumerate()
                .filter(|(_, q)| q.status == QueueStatus::Failed && q.retry_count < below)
                .filter_map(|(idx, q)| q.next_attempt_at.map(|at| (idx, at)))
                .filter(|(_, at)| *at <= req.now)
                .min_by_key(|(_, at)| *at)
                .map(|(idx, _)| idx)
        });

        Ok(match candidate {
            Some(idx) => TickClaim::Claimed {
                item: t.claim_at(idx, req.now),
                used_today,
            },
            None => TickClaim::Empty { used_today },
        })
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Option<QueueItem>> {
        let mut t = self.lock();
        let Some(item) = t.item_mut(id) else {
            return Ok(None);
        };
        if item.status != QueueStatus::Processing {
            return Ok(None);
        }
        item.status = QueueStatus::Failed;
        item.error_message = Some(error.to_string());
        item.retry_count += 1;
        item.next_attempt_at = next_attempt_at;
        Ok(Some(item.clone()))
    }

    async fn reserve_draft(&self, id: Uuid) -> anyhow::Result<Option<Draft>> {
        let mut t = self.lock();
        match t.drafts.get_mut(&id) {
            Some(d) if d.status == DraftStatus::Draft => {
                d.status = DraftStatus::Queued;
                d.updated_at = Utc::now();
                Ok(Some(d.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn release_draft(&self, id: Uuid) -> anyhow::Result<()> {
        let mut t = self.lock();
        if let Some(d) = t.drafts.get_mut(&id) {
            if d.status == DraftStatus::Queued {
                d.status = DraftStatus::Draft;
                d.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn mark_draft_sent(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut t = self.lock();
        match t.drafts.get_mut(&id) {
            Some(d) if d.status == DraftStatus::Queued => {
                d.status = DraftStatus::Sent;
                d.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn commit_success(&self, send: &CompletedSend) -> anyhow::Result<MailLog> {
        let mut t = self.lock();

        if !t.companies.contains_key(&send.company_id) {
            anyhow::bail!("company {} does not exist", send.company_id);
        }

        let existing = send
            .queue_item_id
            .and_then(|qid| t.logs.iter().find(|l| l.queue_item_id == Some(qid)))
            .cloned();

        let log = match existing {
            Some(log) => log,
            None => {
                let log = MailLog {
                    id: Uuid::new_v4(),
                    queue_item_id: send.queue_item_id,
                    company_id: send.company_id,
                    draft_id: send.draft_id,
                    to_email: send.to_email.clone(),
                    subject: send.subject.clone(),
                    body: send.body.clone(),
                    send_order: send.send_order,
                    external_id: send.external_id.clone(),
                    sent_at: send.sent_at,
                };
                t.logs.push(log.clone());
                log
            }
        };

        let item = match send.queue_item_id {
            Some(qid) => t.item_mut(qid),
            None => None,
        };
        if let Some(item) = item {
            item.status = QueueStatus::Complete;
            item.sent_at = Some(log.sent_at);
            item.next_attempt_at = None;
            if log.external_id.is_some() {
                item.external_id = log.external_id.clone();
            }
        }

        let rollup = CompanyRollup::for_send(send.send_order, log.sent_at);
        if let Some(c) = t.companies.get_mut(&send.company_id) {
            c.send_status = rollup.send_status;
            c.send_count = rollup.send_count;
            c.last_send_date = Some(rollup.last_send_date);
        }

        if let Some(draft_id) = send.draft_id {
            if let Some(d) = t.drafts.get_mut(&draft_id) {
                d.status = DraftStatus::Sent;
                d.updated_at = log.sent_at;
            }
        }

        Ok(log)
    }

    async fn fail_stale_processing(
        &self,
        cutoff: DateTime<Utc>,
        error: &str,
    ) -> anyhow::Result<Vec<Uuid>> {
        let mut guard = self.lock();
        let t = &mut *guard;
        let mut failed = Vec::new();
        for item in t.queue.iter_mut() {
            let stale = item.status == QueueStatus::Processing
                && item.attempted_at.is_some_and(|at| at < cutoff);
            let logged = t.logs.iter().any(|l| l.queue_item_id == Some(item.id));
            if stale && !logged {
                item.status = QueueStatus::Failed;
                item.error_message = Some(error.to_string());
                item.retry_count += 1;
                item.next_attempt_at = None;
                failed.push(item.id);
            }
        }
        Ok(failed)
    }

    async fn release_stale_drafts(&self, cutoff: DateTime<Utc>) -> anyhow::Result<Vec<Uuid>> {
        let mut guard = self.lock();
        let t = &mut *guard;
        let now = Utc::now();
        let mut released = Vec::new();
        for d in t.drafts.values_mut() {
            if d.status != DraftStatus::Queued || d.updated_at >= cutoff {
                continue;
            }
            let queued = t.queue.iter().any(|q| q.draft_id == Some(d.id));
            let logged = t.logs.iter().any(|l| l.draft_id == Some(d.id));
            if !queued && !logged {
                d.status = DraftStatus::Draft;
                d.updated_at = now;
                released.push(d.id);
            }
        }
        Ok(released)
    }

    async fn count_sent_since(&self, since: DateTime<Utc>) -> anyhow::Result<i64> {
        Ok(self.lock().logs.iter().filter(|l| l.sent_at >= since).count() as i64)
    }

    async fn list_history(&self, filter: &HistoryFilter) -> anyhow::Result<HistoryPage> {
        let t = self.lock();
        let mut rows: Vec<MailLog> = t
            .logs
            .iter()
            .filter(|l| filter.sent_from.map_or(true, |from| l.sent_at >= from))
            .filter(|l| filter.sent_to.map_or(true, |to| l.sent_at < to))
            .filter(|l| matches_search(filter.search.as_deref(), &[&l.to_email, &l.subject]))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));

        let total = rows.len() as i64;
        let items = rows
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.effective_limit() as usize)
            .collect();

        Ok(HistoryPage {
            items,
            total,
            page: filter.effective_page(),
            limit: filter.effective_limit(),
        })
    }

    async fn load_send_settings(&self) -> anyhow::Result<SendSettings> {
        Ok(self.lock().settings)
    }

    async fn save_send_settings(&self, settings: &SendSettings) -> anyhow::Result<()> {
        self.lock().settings = *settings;
        Ok(())
    }
}
