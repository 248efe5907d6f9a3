use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Waiting,
    Processing,
    Complete,
    Failed,
}

impl QueueStatus {
    pub const ALL: [QueueStatus; 4] = [
        QueueStatus::Waiting,
        QueueStatus::Processing,
        QueueStatus::Complete,
        QueueStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::Processing => "processing",
            QueueStatus::Complete => "complete",
            QueueStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "waiting" => Ok(Self::Waiting),
            "processing" => Ok(Self::Processing),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            other => anyhow::bail!("unknown queue status: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftStatus {
    Draft,
    Queued,
    Sent,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Draft => "draft",
            DraftStatus::Queued => "queued",
            DraftStatus::Sent => "sent",
        }
    }
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DraftStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "draft" => Ok(Self::Draft),
            "queued" => Ok(Self::Queued),
            "sent" => Ok(Self::Sent),
            other => anyhow::bail!("unknown draft status: {other}"),
        }
    }
}

/// Company-level touch rollup. Labels are the values stored in
/// `companies.send_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendStatus {
    #[serde(rename = "미발송")]
    NotSent,
    #[serde(rename = "1차완료")]
    FirstDone,
    #[serde(rename = "2차완료")]
    SecondDone,
    #[serde(rename = "3차완료")]
    ThirdDone,
}

impl SendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendStatus::NotSent => "미발송",
            SendStatus::FirstDone => "1차완료",
            SendStatus::SecondDone => "2차완료",
            SendStatus::ThirdDone => "3차완료",
        }
    }

    /// 1 -> 1차완료, 2 -> 2차완료, anything else -> 3차완료.
    pub fn for_send_order(send_order: i32) -> Self {
        match send_order {
            1 => SendStatus::FirstDone,
            2 => SendStatus::SecondDone,
            _ => SendStatus::ThirdDone,
        }
    }
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SendStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "미발송" => Ok(Self::NotSent),
            "1차완료" => Ok(Self::FirstDone),
            "2차완료" => Ok(Self::SecondDone),
            "3차완료" => Ok(Self::ThirdDone),
            other => anyhow::bail!("unknown send status: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub company_id: Uuid,
    pub draft_id: Option<Uuid>,

    pub to_email: String,
    pub subject: String,
    pub body: String,
    pub send_order: i32,

    pub status: QueueStatus,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub external_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub attempted_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub company_id: Uuid,
    pub draft_id: Option<Uuid>,
    pub to_email: String,
    pub subject: String,
    pub body: String,
    pub send_order: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub id: Uuid,
    pub company_id: Uuid,
    pub template_id: Option<Uuid>,
    pub subject: String,
    pub body: String,
    pub send_order: i32,
    pub status: DraftStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub contact_name: Option<String>,
    pub contact_title: Option<String>,
    pub contact_email: Option<String>,
    pub bm_summary: Option<String>,
    pub news_summary: Option<String>,

    pub send_status: SendStatus,
    pub send_count: i32,
    pub last_send_date: Option<DateTime<Utc>>,
}

impl Company {
    /// Recipient address, if the company is complete enough to be mailed.
    pub fn mailable_address(&self) -> Option<&str> {
        if self.name.trim().is_empty() {
            return None;
        }
        self.contact_email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub subject: String,
    pub body: String,
    pub is_default: bool,
}

/// Append-only record of a delivered email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailLog {
    pub id: Uuid,
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

/// Absolute values written to a company after a delivered send. Applying the
/// same rollup twice leaves the row unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompanyRollup {
    pub send_status: SendStatus,
    pub send_count: i32,
    pub last_send_date: DateTime<Utc>,
}

impl CompanyRollup {
    pub fn for_send(send_order: i32, sent_at: DateTime<Utc>) -> Self {
        Self {
            send_status: SendStatus::for_send_order(send_order),
            send_count: send_order,
            last_send_date: sent_at,
        }
    }
}

/// The `send_settings` row of the settings table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendSettings {
    #[serde(default = "default_daily_limit")]
    pub daily_limit: i64,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_daily_limit() -> i64 {
    100
}

fn default_interval_minutes() -> i64 {
    2
}

fn default_enabled() -> bool {
    true
}

impl Default for SendSettings {
    fn default() -> Self {
        Self {
            daily_limit: default_daily_limit(),
            interval_minutes: default_interval_minutes(),
            enabled: default_enabled(),
        }
    }
}

impl SendSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.daily_limit < 0 {
            return Err("daily_limit must be >= 0".into());
        }
        if self.interval_minutes < 1 {
            return Err("interval_minutes must be >= 1".into());
        }
        Ok(())
    }
}
