use crate::mail::{MailError, Mailer, OutgoingEmail, SentReceipt};
use crate::queue::template::SenderIdentity;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

/// Resend HTTP API client.
#[derive(Clone)]
pub struct ResendMailer {
    client: Client,
    api_key: String,
    endpoint: String,
    from: String,
    reply_to: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    reply_to: &'a str,
    subject: &'a str,
    html: String,
    text: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    id: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    message: Option<String>,
}

impl ResendMailer {
    pub fn new(
        api_key: &str,
        sender: &SenderIdentity,
        timeout: Duration,
    ) -> Result<Self, MailError> {
        if api_key.trim().is_empty() {
            return Err(MailError::Config("RESEND_API_KEY is missing".into()));
        }
        if sender.email.trim().is_empty() {
            return Err(MailError::Config("sender email is missing".into()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MailError::Config(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.trim().to_string(),
            endpoint: RESEND_ENDPOINT.to_string(),
            from: format_from(sender),
            reply_to: sender.email.trim().to_string(),
            timeout,
        })
    }

    /// Point the client at another base URL (staging, local mock).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

fn format_from(sender: &SenderIdentity) -> String {
    let name = sender.name.trim();
    let email = sender.email.trim();
    if name.is_empty() {
        email.to_string()
    } else {
        format!("{name} <{email}>")
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<SentReceipt, MailError> {
        let req = SendRequest {
            from: &self.from,
            to: [email.to.as_str()],
            reply_to: &self.reply_to,
            subject: &email.subject,
            html: email.html_body(),
            text: &email.body,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MailError::Timeout(self.timeout)
                } else {
                    MailError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let raw = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&raw)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or(raw);
            return Err(MailError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: SendResponse = resp
            .json()
            .await
            .map_err(|e| MailError::Transport(format!("unreadable provider response: {e}")))?;

        Ok(SentReceipt { id: body.id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(name: &str, email: &str) -> SenderIdentity {
        SenderIdentity {
            name: name.into(),
            email: email.into(),
        }
    }

    #[test]
    fn from_header_includes_display_name_when_present() {
        assert_eq!(format_from(&sender("Kim", "kim@x.test")), "Kim <kim@x.test>");
        assert_eq!(format_from(&sender(" ", "kim@x.test")), "kim@x.test");
    }

    #[test]
    fn refuses_to_build_without_credentials() {
        let t = Duration::from_secs(5);
        assert!(matches!(
            ResendMailer::new("", &sender("Kim", "kim@x.test"), t),
            Err(MailError::Config(_))
        ));
        assert!(matches!(
            ResendMailer::new("re_123", &sender("Kim", ""), t),
            Err(MailError::Config(_))
        ));
    }

    #[test]
    fn html_part_keeps_line_breaks() {
        let e = OutgoingEmail {
            to: "a@b.test".into(),
            subject: "s".into(),
            body: "line1\nline2".into(),
        };
        assert_eq!(e.html_body(), "line1<br>line2");
    }
}
