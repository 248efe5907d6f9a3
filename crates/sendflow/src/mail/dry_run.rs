use crate::mail::{MailError, Mailer, OutgoingEmail, SentReceipt};
use async_trait::async_trait;
use uuid::Uuid;

/// Logs instead of sending. Every call succeeds.
#[derive(Debug, Clone, Default)]
pub struct DryRunMailer;

#[async_trait]
impl Mailer for DryRunMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<SentReceipt, MailError> {
        let id = format!("dry-run-{}", Uuid::new_v4());
        tracing::info!(to = %email.to, subject = %email.subject, %id, "dry run: email not sent");
        Ok(SentReceipt { id: Some(id) })
    }
}
