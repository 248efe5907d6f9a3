use crate::config::Config;
use crate::mail::{self, MailError, Mailer, OutgoingEmail, SentReceipt};
use crate::queue::error::{EntityKind, QueueError};
use crate::queue::limits::{start_of_day, DailyBudget};
use crate::queue::maintenance::{StaleSweep, STALE_PROCESSING_ERROR};
use crate::queue::model::{
    Company, DraftStatus, NewQueueItem, QueueItem, QueueStatus, SendSettings, Template,
};
use crate::queue::report::{BatchReport, ItemResult, SkipReason, TickOutcome};
use crate::queue::retry::AutoRetry;
use crate::queue::state::{allowed_from, ClaimKind, QueueEvent};
use crate::queue::template::{render, SenderIdentity, TemplateVars};
use crate::store::{
    CompletedSend, HistoryFilter, HistoryPage, PgQueueStore, QueueFilter, QueueStore, TickClaim,
    TickClaimRequest,
};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use rand::{rngs::StdRng, SeedableRng};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sender: SenderIdentity,
    /// Where "today" starts for the daily limit.
    pub utc_offset: FixedOffset,
    /// `None`: failed items wait for a manual retry.
    pub auto_retry: Option<AutoRetry>,
    /// Upper bound on one provider call.
    pub send_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sender: SenderIdentity::default(),
            utc_offset: Utc.fix(),
            auto_retry: None,
            send_timeout: Duration::from_secs(30),
        }
    }
}

/// Content change for a waiting item. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueEdit {
    pub subject: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TickOptions {
    /// Run even when scheduled sending is disabled. The daily limit still applies.
    pub force: bool,
}

enum Delivery {
    Sent { email: String },
    Failed { error: String },
}

/// Owns every queue-item transition and the side effects that go with it.
#[derive(Clone)]
pub struct SendEngine {
    store: Arc<dyn QueueStore>,
    mailer: Arc<dyn Mailer>,
    cfg: EngineConfig,
}

impl SendEngine {
    pub fn new(store: Arc<dyn QueueStore>, mailer: Arc<dyn Mailer>, cfg: EngineConfig) -> Self {
        Self { store, mailer, cfg }
    }

    /// Postgres store plus the configured mailer.
    pub fn from_config(cfg: &Config, pool: PgPool) -> anyhow::Result<Self> {
        let store: Arc<dyn QueueStore> = Arc::new(PgQueueStore::new(pool));
        let mailer = mail::from_config(cfg)?;
        Ok(Self::new(store, mailer, cfg.engine_config()))
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    fn day_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        start_of_day(now, self.cfg.utc_offset)
    }

    pub async fn budget(&self, settings: &SendSettings) -> Result<DailyBudget, QueueError> {
        let sent_today = self
            .store
            .count_sent_since(self.day_start(Utc::now()))
            .await?;
        Ok(DailyBudget {
            sent_today,
            daily_limit: settings.daily_limit,
        })
    }

    // ----------------------------
    // Enqueue
    // ----------------------------

    #[tracing::instrument(skip_all, fields(count = draft_ids.len()))]
    pub async fn enqueue_drafts(&self, draft_ids: &[Uuid]) -> Result<BatchReport, QueueError> {
        require_ids(draft_ids)?;

        let mut report = BatchReport::default();
        for &draft_id in draft_ids {
            match self.enqueue_draft(draft_id).await {
                Ok(item) => {
                    info!(%draft_id, queue_id = %item.id, "draft enqueued");
                    report.push(ItemResult::ok(draft_id, Some(item.to_email)));
                }
                Err(e) => {
                    warn!(%draft_id, error = %e, "draft not enqueued");
                    report.push(ItemResult::err(draft_id, e));
                }
            }
        }
        Ok(report)
    }

    async fn enqueue_draft(&self, draft_id: Uuid) -> Result<QueueItem, QueueError> {
        let draft = self
            .store
            .get_draft(draft_id)
            .await?
            .ok_or_else(|| QueueError::not_found(EntityKind::Draft, draft_id))?;

        if draft.status != DraftStatus::Draft {
            return Err(QueueError::Validation(format!(
                "draft {draft_id} is already {}",
                draft.status
            )));
        }

        let company = self.company(draft.company_id).await?;
        let to_email = mailable(&company)?;

        let new = NewQueueItem {
            company_id: company.id,
            draft_id: Some(draft.id),
            to_email,
            subject: draft.subject,
            body: draft.body,
            send_order: draft.send_order,
        };

        self.store.insert_queue_item(&new).await?.ok_or_else(|| {
            QueueError::Validation(format!("draft {draft_id} was enqueued concurrently"))
        })
    }

    /// Builds subject/body from a template and enqueues without a draft.
    #[tracing::instrument(skip_all, fields(count = company_ids.len(), ?template_id))]
    pub async fn enqueue_direct(
        &self,
        company_ids: &[Uuid],
        template_id: Option<Uuid>,
    ) -> Result<BatchReport, QueueError> {
        require_ids(company_ids)?;

        let template = self.resolve_template(template_id).await?;
        let signature = self
            .store
            .default_signature()
            .await?
            .unwrap_or_else(|| self.cfg.sender.fallback_signature());

        let mut report = BatchReport::default();
        for &company_id in company_ids {
            match self.enqueue_for_company(company_id, &template, &signature).await {
                Ok(item) => {
                    info!(%company_id, queue_id = %item.id, send_order = item.send_order, "direct item enqueued");
                    report.push(ItemResult::ok(company_id, Some(item.to_email)));
                }
                Err(e) => {
                    warn!(%company_id, error = %e, "direct item not enqueued");
                    report.push(ItemResult::err(company_id, e));
                }
            }
        }
        Ok(report)
    }

    async fn resolve_template(&self, template_id: Option<Uuid>) -> Result<Template, QueueError> {
        if let Some(id) = template_id {
            match self.store.get_template(id).await? {
                Some(t) => return Ok(t),
                None => warn!(template_id = %id, "template missing, using default"),
            }
        }
        self.store
            .default_template()
            .await?
            .ok_or_else(|| QueueError::Validation("no template available".into()))
    }

    async fn enqueue_for_company(
        &self,
        company_id: Uuid,
        template: &Template,
        signature: &str,
    ) -> Result<QueueItem, QueueError> {
        let company = self.company(company_id).await?;
        let to_email = mailable(&company)?;

        let vars = TemplateVars::for_company(&company, &self.cfg.sender, signature);
        let new = NewQueueItem {
            company_id,
            draft_id: None,
            to_email,
            subject: render(&template.subject, &vars),
            body: render(&template.body, &vars),
            send_order: company.send_count + 1,
        };

        self.store
            .insert_queue_item(&new)
            .await?
            .ok_or_else(|| QueueError::Validation("queue item was not created".into()))
    }

    // ----------------------------
    // Edit / remove
    // ----------------------------

    #[tracing::instrument(skip(self, edit))]
    pub async fn edit(&self, id: Uuid, edit: QueueEdit) -> Result<QueueItem, QueueError> {
        if edit.subject.is_none() && edit.body.is_none() {
            return Err(QueueError::Validation("nothing to update".into()));
        }
        if edit.subject.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(QueueError::Validation("subject must not be empty".into()));
        }

        match self
            .store
            .update_waiting_content(id, edit.subject.as_deref(), edit.body.as_deref())
            .await?
        {
            Some(item) => {
                info!(queue_id = %id, "queue item edited");
                Ok(item)
            }
            None => Err(self
                .rejection(id, QueueEvent::Edit, &allowed_from(QueueEvent::Edit))
                .await),
        }
    }

    /// Deletes a waiting item and hands its draft back.
    #[tracing::instrument(skip(self))]
    pub async fn remove(&self, id: Uuid) -> Result<QueueItem, QueueError> {
        match self.store.delete_waiting(id).await? {
            Some(item) => {
                info!(queue_id = %id, draft_id = ?item.draft_id, "queue item removed");
                Ok(item)
            }
            None => Err(self
                .rejection(id, QueueEvent::Remove, &allowed_from(QueueEvent::Remove))
                .await),
        }
    }

    // ----------------------------
    // Sending
    // ----------------------------

    /// One scheduled invocation: at most one item, oldest first, within the
    /// daily limit.
    #[tracing::instrument(skip(self, settings), fields(daily_limit = settings.daily_limit, force = opts.force))]
    pub async fn tick(
        &self,
        settings: &SendSettings,
        opts: TickOptions,
    ) -> Result<TickOutcome, QueueError> {
        let now = Utc::now();
        let day_start = self.day_start(now);
        let budget = |used: i64| DailyBudget {
            sent_today: used,
            daily_limit: settings.daily_limit,
        };

        if !settings.enabled && !opts.force {
            let sent_today = self.store.count_sent_since(day_start).await?;
            info!("tick skipped: scheduled sending disabled");
            return Ok(TickOutcome::Skipped {
                reason: SkipReason::Disabled,
                budget: budget(sent_today),
            });
        }

        let req = TickClaimRequest {
            day_start,
            daily_limit: settings.daily_limit,
            now,
            retry_below: self.cfg.auto_retry.as_ref().map(|r| r.max_retries),
        };

        let (item, used_today) = match self.store.claim_for_tick(&req).await? {
            TickClaim::LimitReached { used_today } => {
                info!(used_today, "tick skipped: daily limit reached");
                return Ok(TickOutcome::Skipped {
                    reason: SkipReason::LimitReached,
                    budget: budget(used_today),
                });
            }
            TickClaim::Empty { used_today } => {
                debug!("tick idle: nothing to process");
                return Ok(TickOutcome::Idle {
                    budget: budget(used_today),
                });
            }
            TickClaim::Claimed { item, used_today } => (item, used_today),
        };

        let id = item.id;
        Ok(match self.deliver(item).await? {
            Delivery::Sent { email } => TickOutcome::Sent {
                id,
                email,
                budget: budget(used_today + 1),
            },
            Delivery::Failed { error } => TickOutcome::Failed {
                id,
                error,
                budget: budget(used_today),
            },
        })
    }

    /// Manual send of explicit queue items, in the given order. Not subject
    /// to the daily limit.
    #[tracing::instrument(skip_all, fields(count = ids.len()))]
    pub async fn send_queue_items(&self, ids: &[Uuid]) -> Result<BatchReport, QueueError> {
        self.claim_and_send(ids, ClaimKind::Manual).await
    }

    /// Re-attempt previously failed items.
    #[tracing::instrument(skip_all, fields(count = ids.len()))]
    pub async fn retry(&self, ids: &[Uuid]) -> Result<BatchReport, QueueError> {
        self.claim_and_send(ids, ClaimKind::Retry).await
    }

    async fn claim_and_send(
        &self,
        ids: &[Uuid],
        kind: ClaimKind,
    ) -> Result<BatchReport, QueueError> {
        require_ids(ids)?;

        let mut report = BatchReport::default();
        for &id in ids {
            report.push(self.send_one(id, kind).await);
        }
        info!(
            success = report.success_count,
            fail = report.fail_count,
            ?kind,
            "batch send finished"
        );
        Ok(report)
    }

    async fn send_one(&self, id: Uuid, kind: ClaimKind) -> ItemResult {
        let sources = kind.sources();
        let item = match self.store.claim(id, &sources, Utc::now()).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                let e = self.rejection(id, QueueEvent::Claim, &sources).await;
                warn!(queue_id = %id, error = %e, "queue item not sendable");
                return ItemResult::err(id, e);
            }
            Err(e) => return ItemResult::err(id, e),
        };

        match self.deliver(item).await {
            Ok(Delivery::Sent { email }) => ItemResult::ok(id, Some(email)),
            Ok(Delivery::Failed { error }) => ItemResult::err(id, error),
            Err(e) => ItemResult::err(id, e),
        }
    }

    /// Direct send of unsent drafts, bypassing the queue.
    #[tracing::instrument(skip_all, fields(count = draft_ids.len()))]
    pub async fn send_drafts(&self, draft_ids: &[Uuid]) -> Result<BatchReport, QueueError> {
        require_ids(draft_ids)?;

        let mut report = BatchReport::default();
        for &draft_id in draft_ids {
            match self.send_draft(draft_id).await {
                Ok(email) => report.push(ItemResult::ok(draft_id, Some(email))),
                Err(e) => {
                    warn!(%draft_id, error = %e, "direct draft send failed");
                    report.push(ItemResult::err(draft_id, e));
                }
            }
        }
        Ok(report)
    }

    async fn send_draft(&self, draft_id: Uuid) -> Result<String, QueueError> {
        let draft = self
            .store
            .get_draft(draft_id)
            .await?
            .ok_or_else(|| QueueError::not_found(EntityKind::Draft, draft_id))?;

        if draft.status != DraftStatus::Draft {
            return Err(QueueError::Validation(format!(
                "draft {draft_id} is {}; only unsent drafts can be sent directly",
                draft.status
            )));
        }

        let company = self.company(draft.company_id).await?;
        let to_email = mailable(&company)?;

        let draft = self.store.reserve_draft(draft_id).await?.ok_or_else(|| {
            QueueError::Validation(format!("draft {draft_id} changed while sending"))
        })?;

        let email = OutgoingEmail {
            to: to_email.clone(),
            subject: draft.subject.clone(),
            body: draft.body.clone(),
        };

        let receipt = match self.send_bounded(&email).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.store.release_draft(draft_id).await?;
                return Err(QueueError::Provider(e.to_string()));
            }
        };

        let send = CompletedSend {
            queue_item_id: None,
            company_id: draft.company_id,
            draft_id: Some(draft.id),
            to_email: to_email.clone(),
            subject: draft.subject,
            body: draft.body,
            send_order: draft.send_order,
            external_id: receipt.id,
            sent_at: Utc::now(),
        };

        if let Err(e) = self.record_sent(&send).await {
            error!(%draft_id, error = %e, "email sent but recording it failed");
            // the orphan sweep never releases a sent draft
            match self.store.mark_draft_sent(draft_id).await {
                Ok(true) => warn!(%draft_id, "draft marked sent without a mail log"),
                Ok(false) => {}
                Err(mark) => {
                    error!(%draft_id, error = %mark, "draft left queued after a delivered send")
                }
            }
            return Err(QueueError::Storage(e));
        }

        info!(%draft_id, to = %to_email, "draft sent directly");
        Ok(to_email)
    }

    /// processing -> complete | failed for an item this call claimed.
    async fn deliver(&self, item: QueueItem) -> Result<Delivery, QueueError> {
        let email = OutgoingEmail {
            to: item.to_email.clone(),
            subject: item.subject.clone(),
            body: item.body.clone(),
        };

        match self.send_bounded(&email).await {
            Ok(receipt) => {
                let send = CompletedSend::for_item(&item, receipt.id, Utc::now());
                if let Err(e) = self.record_sent(&send).await {
                    error!(queue_id = %item.id, error = %e, "email sent but recording it failed; item left processing");
                    return Err(QueueError::Storage(e));
                }
                info!(queue_id = %item.id, to = %item.to_email, send_order = item.send_order, "email sent");
                Ok(Delivery::Sent {
                    email: item.to_email,
                })
            }
            Err(e) => {
                let error = e.to_string();
                let next_attempt_at = self.next_attempt_at(item.retry_count + 1);

                match self
                    .store
                    .mark_failed(item.id, &error, next_attempt_at)
                    .await?
                {
                    Some(failed) => warn!(
                        queue_id = %item.id,
                        retry_count = failed.retry_count,
                        ?next_attempt_at,
                        %error,
                        "send failed"
                    ),
                    None => warn!(queue_id = %item.id, %error, "send failed; item no longer processing"),
                }
                Ok(Delivery::Failed { error })
            }
        }
    }

    /// Commits a delivered send, retrying once before giving up.
    async fn record_sent(&self, send: &CompletedSend) -> anyhow::Result<()> {
        if let Err(e) = self.store.commit_success(send).await {
            warn!(error = %e, "recording a delivered email failed; retrying once");
            self.store.commit_success(send).await?;
        }
        Ok(())
    }

    async fn send_bounded(&self, email: &OutgoingEmail) -> Result<SentReceipt, MailError> {
        match tokio::time::timeout(self.cfg.send_timeout, self.mailer.send(email)).await {
            Ok(res) => res,
            Err(_) => Err(MailError::Timeout(self.cfg.send_timeout)),
        }
    }

    fn next_attempt_at(&self, retry_count: i32) -> Option<DateTime<Utc>> {
        let policy = self.cfg.auto_retry.as_ref()?;
        let mut rng = StdRng::from_entropy();
        policy.next_attempt_at(retry_count, Utc::now(), &mut rng)
    }

    // ----------------------------
    // Maintenance
    // ----------------------------

    /// Fails processing items claimed before `cutoff` whose delivery was
    /// never recorded, and hands back queued drafts that a direct send left
    /// without a queue item or a log. Never sends.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_stale(&self, cutoff: DateTime<Utc>) -> Result<StaleSweep, QueueError> {
        let failed_items = self
            .store
            .fail_stale_processing(cutoff, STALE_PROCESSING_ERROR)
            .await?;
        for id in &failed_items {
            warn!(queue_id = %id, "stale processing item marked failed");
        }

        let released_drafts = self.store.release_stale_drafts(cutoff).await?;
        for id in &released_drafts {
            warn!(draft_id = %id, "orphaned queued draft released");
        }

        Ok(StaleSweep {
            failed_items,
            released_drafts,
        })
    }

    // ----------------------------
    // Reads / settings
    // ----------------------------

    pub async fn list_queue(&self, filter: &QueueFilter) -> Result<Vec<QueueItem>, QueueError> {
        Ok(self.store.list_queue_items(filter).await?)
    }

    pub async fn list_history(&self, filter: &HistoryFilter) -> Result<HistoryPage, QueueError> {
        Ok(self.store.list_history(filter).await?)
    }

    pub async fn send_settings(&self) -> Result<SendSettings, QueueError> {
        Ok(self.store.load_send_settings().await?)
    }

    pub async fn update_send_settings(
        &self,
        settings: SendSettings,
    ) -> Result<SendSettings, QueueError> {
        settings.validate().map_err(QueueError::Validation)?;
        self.store.save_send_settings(&settings).await?;
        info!(
            daily_limit = settings.daily_limit,
            interval_minutes = settings.interval_minutes,
            enabled = settings.enabled,
            "send settings updated"
        );
        Ok(settings)
    }

    // ----------------------------
    // Helpers
    // ----------------------------

    async fn company(&self, id: Uuid) -> Result<Company, QueueError> {
        self.store
            .get_company(id)
            .await?
            .ok_or_else(|| QueueError::not_found(EntityKind::Company, id))
    }

    /// Why a compare-and-set on `id` from one of `accepted` matched nothing.
    async fn rejection(
        &self,
        id: Uuid,
        event: QueueEvent,
        accepted: &[QueueStatus],
    ) -> QueueError {
        match self.store.get_queue_item(id).await {
            // accepted from where it is now: it moved between the write and this read
            Ok(Some(current)) if accepted.contains(&current.status) => {
                QueueError::Validation(format!("queue item {id} changed concurrently; try again"))
            }
            Ok(Some(current)) => QueueError::rejected(id, current.status, event),
            Ok(None) => QueueError::not_found(EntityKind::QueueItem, id),
            Err(e) => QueueError::Storage(e),
        }
    }
}

fn require_ids(ids: &[Uuid]) -> Result<(), QueueError> {
    if ids.is_empty() {
        return Err(QueueError::Validation("no items selected".into()));
    }
    Ok(())
}

fn mailable(company: &Company) -> Result<String, QueueError> {
    company
        .mailable_address()
        .map(str::to_string)
        .ok_or_else(|| {
            QueueError::Validation(format!(
                "company {} is missing a name or contact email",
                company.id
            ))
        })
}
