use crate::config::Config;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod dry_run;
pub mod resend;

pub use dry_run::DryRunMailer;
pub use resend::ResendMailer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    /// Plain text; the HTML part is derived from it.
    pub body: String,
}

impl OutgoingEmail {
    pub fn html_body(&self) -> String {
        self.body.replace('\n', "<br>")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentReceipt {
    /// Provider message id, when the provider returns one.
    pub id: Option<String>,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mailer misconfigured: {0}")]
    Config(String),

    #[error("provider did not answer within {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider rejected the message ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// The outbound email provider. Must fail instead of silently dropping.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<SentReceipt, MailError>;
}

/// The configured provider: dry run, or Resend with the sender identity.
pub fn from_config(cfg: &Config) -> Result<Arc<dyn Mailer>, MailError> {
    if cfg.dry_run {
        return Ok(Arc::new(DryRunMailer));
    }
    let api_key = cfg.resend_api_key.as_deref().unwrap_or_default();
    let mailer = ResendMailer::new(api_key, &cfg.sender(), cfg.send_timeout())?;
    Ok(Arc::new(mailer))
}
