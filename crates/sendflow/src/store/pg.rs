use crate::queue::model::{
    Company, CompanyRollup, Draft, DraftStatus, MailLog, NewQueueItem, QueueItem, QueueStatus,
    SendSettings, Template,
};
use crate::store::{
    like_pattern, CompletedSend, HistoryFilter, HistoryPage, QueueFilter, QueueStore, TickClaim,
    TickClaimRequest, SEND_SETTINGS_KEY,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Serialises count-and-claim across concurrent ticks.
const TICK_LOCK_KEY: i64 = 0x5E4D_F10E;

const QUEUE_COLUMNS: &str = r#"
    id, company_id, draft_id,
    to_email, subject, body, send_order,
    status, error_message, retry_count, next_attempt_at, external_id,
    created_at, attempted_at, sent_at
"#;

const LOG_COLUMNS: &str = r#"
    id, queue_item_id, company_id, draft_id,
    to_email, subject, body, send_order,
    external_id, sent_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    id: Uuid,
    company_id: Uuid,
    draft_id: Option<Uuid>,
    to_email: String,
    subject: String,
    body: String,
    send_order: i32,
    status: String,
    error_message: Option<String>,
    retry_count: i32,
    next_attempt_at: Option<DateTime<Utc>>,
    external_id: Option<String>,
    created_at: DateTime<Utc>,
    attempted_at: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
}

impl TryFrom<QueueRow> for QueueItem {
    type Error = anyhow::Error;

    fn try_from(r: QueueRow) -> anyhow::Result<Self> {
        Ok(QueueItem {
            id: r.id,
            company_id: r.company_id,
            draft_id: r.draft_id,
            to_email: r.to_email,
            subject: r.subject,
            body: r.body,
            send_order: r.send_order,
            status: r.status.parse()?,
            error_message: r.error_message,
            retry_count: r.retry_count,
            next_attempt_at: r.next_attempt_at,
            external_id: r.external_id,
            created_at: r.created_at,
            attempted_at: r.attempted_at,
            sent_at: r.sent_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DraftRow {
    id: Uuid,
    company_id: Uuid,
    template_id: Option<Uuid>,
    subject: String,
    body: String,
    send_order: i32,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DraftRow> for Draft {
    type Error = anyhow::Error;

    fn try_from(r: DraftRow) -> anyhow::Result<Self> {
        Ok(Draft {
            id: r.id,
            company_id: r.company_id,
            template_id: r.template_id,
            subject: r.subject,
            body: r.body,
            send_order: r.send_order,
            status: r.status.parse()?,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CompanyRow {
    id: Uuid,
    name: String,
    contact_name: Option<String>,
    contact_title: Option<String>,
    contact_email: Option<String>,
    bm_summary: Option<String>,
    news_summary: Option<String>,
    send_status: String,
    send_count: i32,
    last_send_date: Option<DateTime<Utc>>,
}

impl TryFrom<CompanyRow> for Company {
    type Error = anyhow::Error;

    fn try_from(r: CompanyRow) -> anyhow::Result<Self> {
        Ok(Company {
            id: r.id,
            name: r.name,
            contact_name: r.contact_name,
            contact_title: r.contact_title,
            contact_email: r.contact_email,
            bm_summary: r.bm_summary,
            news_summary: r.news_summary,
            send_status: r.send_status.parse()?,
            send_count: r.send_count,
            last_send_date: r.last_send_date,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TemplateRow {
    id: Uuid,
    name: String,
    subject: String,
    body: String,
    is_default: bool,
}

impl From<TemplateRow> for Template {
    fn from(r: TemplateRow) -> Self {
        Template {
            id: r.id,
            name: r.name,
            subject: r.subject,
            body: r.body,
            is_default: r.is_default,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LogRow {
    id: Uuid,
    queue_item_id: Option<Uuid>,
    company_id: Uuid,
    draft_id: Option<Uuid>,
    to_email: String,
    subject: String,
    body: String,
    send_order: i32,
    external_id: Option<String>,
    sent_at: DateTime<Utc>,
}

impl From<LogRow> for MailLog {
    fn from(r: LogRow) -> Self {
        MailLog {
            id: r.id,
            queue_item_id: r.queue_item_id,
            company_id: r.company_id,
            draft_id: r.draft_id,
            to_email: r.to_email,
            subject: r.subject,
            body: r.body,
            send_order: r.send_order,
            external_id: r.external_id,
            sent_at: r.sent_at,
        }
    }
}

fn to_item(row: Option<QueueRow>) -> anyhow::Result<Option<QueueItem>> {
    row.map(QueueItem::try_from).transpose()
}

#[derive(Clone)]
pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ----------------------------
    // Operator / test helpers
    // ----------------------------

    /// Wipes every table except settings.
    pub async fn reset(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            TRUNCATE mail_logs, send_queue, drafts, signatures, mail_templates, companies
            RESTART IDENTITY CASCADE
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_company(&self, c: &Company) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO companies (
                id, name, contact_name, contact_title, contact_email,
                bm_summary, news_summary, send_status, send_count, last_send_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(c.id)
        .bind(&c.name)
        .bind(&c.contact_name)
        .bind(&c.contact_title)
        .bind(&c.contact_email)
        .bind(&c.bm_summary)
        .bind(&c.news_summary)
        .bind(c.send_status.as_str())
        .bind(c.send_count)
        .bind(c.last_send_date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_draft(&self, d: &Draft) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO drafts (
                id, company_id, template_id, subject, body, send_order, status,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(d.id)
        .bind(d.company_id)
        .bind(d.template_id)
        .bind(&d.subject)
        .bind(&d.body)
        .bind(d.send_order)
        .bind(d.status.as_str())
        .bind(d.created_at)
        .bind(d.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_template(&self, t: &Template) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mail_templates (id, name, subject, body, is_default)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(t.id)
        .bind(&t.name)
        .bind(&t.subject)
        .bind(&t.body)
        .bind(t.is_default)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_signature(&self, content: &str, is_default: bool) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO signatures (content, is_default) VALUES ($1, $2)")
            .bind(content)
            .bind(is_default)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn get_company(&self, id: Uuid) -> anyhow::Result<Option<Company>> {
        let row = sqlx::query_as::<_, CompanyRow>(
            r#"
            SELECT id, name, contact_name, contact_title, contact_email,
                   bm_summary, news_summary, send_status, send_count, last_send_date
            FROM companies
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Company::try_from).transpose()
    }

    async fn get_draft(&self, id: Uuid) -> anyhow::Result<Option<Draft>> {
        let row = sqlx::query_as::<_, DraftRow>(
            r#"
            SELECT id, company_id, template_id, subject, body, send_order, status,
                   created_at, updated_at
            FROM drafts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Draft::try_from).transpose()
    }

    async fn get_template(&self, id: Uuid) -> anyhow::Result<Option<Template>> {
        let row = sqlx::query_as::<_, TemplateRow>(
            "SELECT id, name, subject, body, is_default FROM mail_templates WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Template::from))
    }

    async fn default_template(&self) -> anyhow::Result<Option<Template>> {
        let row = sqlx::query_as::<_, TemplateRow>(
            r#"
            SELECT id, name, subject, body, is_default
            FROM mail_templates
            WHERE is_default
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Template::from))
    }

    async fn default_signature(&self) -> anyhow::Result<Option<String>> {
        let content: Option<String> = sqlx::query_scalar(
            r#"
            SELECT content
            FROM signatures
            WHERE is_default
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(content)
    }

    async fn insert_queue_item(&self, new: &NewQueueItem) -> anyhow::Result<Option<QueueItem>> {
        let mut tx = self.pool.begin().await?;

        if let Some(draft_id) = new.draft_id {
            let moved = sqlx::query(
                r#"
                UPDATE drafts
                SET status = $2, updated_at = now()
                WHERE id = $1 AND status = $3
                "#,
            )
            .bind(draft_id)
            .bind(DraftStatus::Queued.as_str())
            .bind(DraftStatus::Draft.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if moved == 0 {
                return Ok(None);
            }
        }

        let row = sqlx::query_as::<_, QueueRow>(&format!(
            r#"
            INSERT INTO send_queue (company_id, draft_id, to_email, subject, body, send_order, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {QUEUE_COLUMNS}
            "#
        ))
        .bind(new.company_id)
        .bind(new.draft_id)
        .bind(&new.to_email)
        .bind(&new.subject)
        .bind(&new.body)
        .bind(new.send_order)
        .bind(QueueStatus::Waiting.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(row.try_into()?))
    }

    async fn get_queue_item(&self, id: Uuid) -> anyhow::Result<Option<QueueItem>> {
        let row = sqlx::query_as::<_, QueueRow>(&format!(
            "SELECT {QUEUE_COLUMNS} FROM send_queue WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        to_item(row)
    }

    async fn list_queue_items(&self, filter: &QueueFilter) -> anyhow::Result<Vec<QueueItem>> {
        let rows = sqlx::query_as::<_, QueueRow>(&format!(
            r#"
            SELECT {QUEUE_COLUMNS}
            FROM send_queue
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR to_email ILIKE $2 OR subject ILIKE $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at < $4)
            ORDER BY created_at DESC, id DESC
            LIMIT $5
            "#
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(like_pattern(filter.search.as_deref()))
        .bind(filter.created_from)
        .bind(filter.created_to)
        .bind(filter.effective_limit())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(QueueItem::try_from).collect()
    }

    async fn update_waiting_content(
        &self,
        id: Uuid,
        subject: Option<&str>,
        body: Option<&str>,
    ) -> anyhow::Result<Option<QueueItem>> {
        let row = sqlx::query_as::<_, QueueRow>(&format!(
            r#"
            UPDATE send_queue
            SET subject = COALESCE($2, subject),
                body = COALESCE($3, body)
            WHERE id = $1 AND status = $4
            RETURNING {QUEUE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(subject)
        .bind(body)
        .bind(QueueStatus::Waiting.as_str())
        .fetch_optional(&self.pool)
        .await?;
        to_item(row)
    }

    async fn delete_waiting(&self, id: Uuid) -> anyhow::Result<Option<QueueItem>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, QueueRow>(&format!(
            r#"
            DELETE FROM send_queue
            WHERE id = $1 AND status = $2
            RETURNING {QUEUE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(QueueStatus::Waiting.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(item) = to_item(row)? else {
            return Ok(None);
        };

        if let Some(draft_id) = item.draft_id {
            sqlx::query(
                r#"
                UPDATE drafts
                SET status = $2, updated_at = now()
                WHERE id = $1 AND status = $3
                "#,
            )
            .bind(draft_id)
            .bind(DraftStatus::Draft.as_str())
            .bind(DraftStatus::Queued.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some(item))
    }

    async fn claim(
        &self,
        id: Uuid,
        from: &[QueueStatus],
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<QueueItem>> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();

        let row = sqlx::query_as::<_, QueueRow>(&format!(
            r#"
            UPDATE send_queue
            SET status = $2, attempted_at = $3
            WHERE id = $1 AND status = ANY($4)
            RETURNING {QUEUE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(QueueStatus::Processing.as_str())
        .bind(now)
        .bind(from)
        .fetch_optional(&self.pool)
        .await?;
        to_item(row)
    }

    async fn claim_for_tick(&self, req: &TickClaimRequest) -> anyhow::Result<TickClaim> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(TICK_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let used_today: i64 = sqlx::query_scalar(
            r#"
            SELECT
              (SELECT count(*) FROM mail_logs WHERE sent_at >= $1)
              + (SELECT count(*) FROM send_queue WHERE status = $2 AND attempted_at >= $1)
            "#,
        )
        .bind(req.day_start)
        .bind(QueueStatus::Processing.as_str())
        .fetch_one(&mut *tx)
        .await?;

        if used_today >= req.daily_limit {
            tx.commit().await?;
            return Ok(TickClaim::LimitReached { used_today });
        }

        let mut row = sqlx::query_as::<_, QueueRow>(&format!(
            r#"
            UPDATE send_queue
            SET status = $1, attempted_at = $2
            WHERE id = (
                SELECT id
                FROM send_queue
                WHERE status = $3
                ORDER BY created_at ASC, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {QUEUE_COLUMNS}
            "#
        ))
        .bind(QueueStatus::Processing.as_str())
        .bind(req.now)
        .bind(QueueStatus::Waiting.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        if row.is_none() {
            if let Some(below) = req.retry_below {
                row = sqlx::query_as::<_, QueueRow>(&format!(
                    r#"
                    UPDATE send_queue
                    SET status = $1, attempted_at = $2
                    WHERE id = (
                        SELECT id
                        FROM send_queue
                        WHERE status = $3
                          AND retry_count < $4
                          AND next_attempt_at <= $2
                        ORDER BY next_attempt_at ASC, id ASC
                        FOR UPDATE SKIP LOCKED
                        LIMIT 1
                    )
                    RETURNING {QUEUE_COLUMNS}
                    "#
                ))
                .bind(QueueStatus::Processing.as_str())
                .bind(req.now)
                .bind(QueueStatus::Failed.as_str())
                .bind(below)
                .fetch_optional(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        Ok(match to_item(row)? {
            Some(item) => TickClaim::Claimed { item, used_today },
            None => TickClaim::Empty { used_today },
        })
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Option<QueueItem>> {
        let row = sqlx::query_as::<_, QueueRow>(&format!(
            r#"
            UPDATE send_queue
            SET status = $2,
                error_message = $3,
                retry_count = retry_count + 1,
                next_attempt_at = $4
            WHERE id = $1 AND status = $5
            RETURNING {QUEUE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(QueueStatus::Failed.as_str())
        .bind(error)
        .bind(next_attempt_at)
        .bind(QueueStatus::Processing.as_str())
        .fetch_optional(&self.pool)
        .await?;
        to_item(row)
    }

    async fn reserve_draft(&self, id: Uuid) -> anyhow::Result<Option<Draft>> {
        let row = sqlx::query_as::<_, DraftRow>(
            r#"
            UPDATE drafts
            SET status = $2, updated_at = now()
            WHERE id = $1 AND status = $3
            RETURNING id, company_id, template_id, subject, body, send_order, status,
                      created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(DraftStatus::Queued.as_str())
        .bind(DraftStatus::Draft.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Draft::try_from).transpose()
    }

    async fn release_draft(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE drafts
            SET status = $2, updated_at = now()
            WHERE id = $1 AND status = $3
            "#,
        )
        .bind(id)
        .bind(DraftStatus::Draft.as_str())
        .bind(DraftStatus::Queued.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_draft_sent(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE drafts
            SET status = $2, updated_at = now()
            WHERE id = $1 AND status = $3
            "#,
        )
        .bind(id)
        .bind(DraftStatus::Sent.as_str())
        .bind(DraftStatus::Queued.as_str())
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn commit_success(&self, send: &CompletedSend) -> anyhow::Result<MailLog> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, LogRow>(&format!(
            r#"
            INSERT INTO mail_logs (
                queue_item_id, company_id, draft_id,
                to_email, subject, body, send_order,
                status, external_id, sent_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'sent', $8, $9)
            ON CONFLICT (queue_item_id) WHERE queue_item_id IS NOT NULL DO NOTHING
            RETURNING {LOG_COLUMNS}
            "#
        ))
        .bind(send.queue_item_id)
        .bind(send.company_id)
        .bind(send.draft_id)
        .bind(&send.to_email)
        .bind(&send.subject)
        .bind(&send.body)
        .bind(send.send_order)
        .bind(&send.external_id)
        .bind(send.sent_at)
        .fetch_optional(&mut *tx)
        .await?;

        let log: MailLog = match inserted {
            Some(row) => row.into(),
            // replay of an already recorded queue item
            None => sqlx::query_as::<_, LogRow>(&format!(
                "SELECT {LOG_COLUMNS} FROM mail_logs WHERE queue_item_id = $1"
            ))
            .bind(send.queue_item_id)
            .fetch_one(&mut *tx)
            .await?
            .into(),
        };

        if let Some(queue_item_id) = send.queue_item_id {
            sqlx::query(
                r#"
                UPDATE send_queue
                SET status = $2,
                    sent_at = $3,
                    next_attempt_at = NULL,
                    external_id = COALESCE($4, external_id)
                WHERE id = $1
                "#,
            )
            .bind(queue_item_id)
            .bind(QueueStatus::Complete.as_str())
            .bind(log.sent_at)
            .bind(&log.external_id)
            .execute(&mut *tx)
            .await?;
        }

        let rollup = CompanyRollup::for_send(send.send_order, log.sent_at);
        let updated = sqlx::query(
            r#"
            UPDATE companies
            SET send_status = $2, send_count = $3, last_send_date = $4
            WHERE id = $1
            "#,
        )
        .bind(send.company_id)
        .bind(rollup.send_status.as_str())
        .bind(rollup.send_count)
        .bind(rollup.last_send_date)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            anyhow::bail!("company {} does not exist", send.company_id);
        }

        if let Some(draft_id) = send.draft_id {
            sqlx::query("UPDATE drafts SET status = $2, updated_at = $3 WHERE id = $1")
                .bind(draft_id)
                .bind(DraftStatus::Sent.as_str())
                .bind(log.sent_at)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(log)
    }

    async fn fail_stale_processing(
        &self,
        cutoff: DateTime<Utc>,
        error: &str,
    ) -> anyhow::Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE send_queue q
            SET status = $2,
                error_message = $3,
                retry_count = q.retry_count + 1,
                next_attempt_at = NULL
            WHERE q.status = $4
              AND q.attempted_at < $1
              AND NOT EXISTS (
                SELECT 1 FROM mail_logs l WHERE l.queue_item_id = q.id
              )
            RETURNING q.id
            "#,
        )
        .bind(cutoff)
        .bind(QueueStatus::Failed.as_str())
        .bind(error)
        .bind(QueueStatus::Processing.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn release_stale_drafts(&self, cutoff: DateTime<Utc>) -> anyhow::Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE drafts d
            SET status = $2, updated_at = now()
            WHERE d.status = $3
              AND d.updated_at < $1
              AND NOT EXISTS (SELECT 1 FROM send_queue q WHERE q.draft_id = d.id)
              AND NOT EXISTS (SELECT 1 FROM mail_logs l WHERE l.draft_id = d.id)
            RETURNING d.id
            "#,
        )
        .bind(cutoff)
        .bind(DraftStatus::Draft.as_str())
        .bind(DraftStatus::Queued.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn count_sent_since(&self, since: DateTime<Utc>) -> anyhow::Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT count(*) FROM mail_logs WHERE sent_at >= $1")
            .bind(since)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    async fn list_history(&self, filter: &HistoryFilter) -> anyhow::Result<HistoryPage> {
        let pattern = like_pattern(filter.search.as_deref());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT count(*)
            FROM mail_logs
            WHERE ($1::text IS NULL OR to_email ILIKE $1 OR subject ILIKE $1)
              AND ($2::timestamptz IS NULL OR sent_at >= $2)
              AND ($3::timestamptz IS NULL OR sent_at < $3)
            "#,
        )
        .bind(&pattern)
        .bind(filter.sent_from)
        .bind(filter.sent_to)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, LogRow>(&format!(
            r#"
            SELECT {LOG_COLUMNS}
            FROM mail_logs
            WHERE ($1::text IS NULL OR to_email ILIKE $1 OR subject ILIKE $1)
              AND ($2::timestamptz IS NULL OR sent_at >= $2)
              AND ($3::timestamptz IS NULL OR sent_at < $3)
            ORDER BY sent_at DESC, id DESC
            LIMIT $4 OFFSET $5
            "#
        ))
        .bind(&pattern)
        .bind(filter.sent_from)
        .bind(filter.sent_to)
        .bind(filter.effective_limit())
        .bind(filter.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(HistoryPage {
            items: rows.into_iter().map(MailLog::from).collect(),
            total,
            page: filter.effective_page(),
            limit: filter.effective_limit(),
        })
    }

    async fn load_send_settings(&self) -> anyhow::Result<SendSettings> {
        let value: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = $1")
                .bind(SEND_SETTINGS_KEY)
                .fetch_optional(&self.pool)
                .await?;

        match value {
            Some(v) => Ok(serde_json::from_value(v)?),
            None => Ok(SendSettings::default()),
        }
    }

    async fn save_send_settings(&self, settings: &SendSettings) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(SEND_SETTINGS_KEY)
        .bind(serde_json::to_value(settings)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
