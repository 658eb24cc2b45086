/// Outgoing mail
///
/// `MailDispatcher::dispatch` returns immediately. Delivery happens in the
/// background and failures are only logged, never reported to the caller.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::configuration::{EmailSettings, EmailTransport};
use crate::error::EmailError;
use crate::telemetry::mask_email;
use crate::validators::is_valid_email;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl EmailMessage {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

pub trait MailDispatcher: Send + Sync {
    fn dispatch(&self, message: EmailMessage);
}

/// Builds the dispatcher selected by `email.transport`
pub fn build_mailer(settings: &EmailSettings) -> Result<Arc<dyn MailDispatcher>, EmailError> {
    match settings.transport {
        EmailTransport::Memory => Ok(Arc::new(InMemoryMailer::new())),
        EmailTransport::Http => {
            let sender = SenderEmail::parse(&settings.sender)?;
            let http_client = reqwest::Client::builder()
                .timeout(Duration::from_millis(settings.timeout_milliseconds))
                .build()
                .map_err(|e| EmailError::ConfigurationError(e.to_string()))?;
            Ok(Arc::new(EmailClient::new(
                settings.base_url.clone(),
                sender,
                http_client,
            )))
        }
    }
}

#[derive(Clone, Debug)]
pub struct SenderEmail(String);

impl SenderEmail {
    pub fn parse(s: &str) -> Result<Self, EmailError> {
        let email = is_valid_email(s).map_err(|e| EmailError::InvalidRecipient(e.to_string()))?;
        Ok(Self(email))
    }

    pub fn inner(&self) -> &str {
        &self.0
    }
}

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    #[serde(rename = "Subject")]
    subject: &'a str,
    #[serde(rename = "TextBody")]
    text_body: &'a str,
}

/// Delivers through an HTTP email API
#[derive(Clone)]
pub struct EmailClient {
    http_client: reqwest::Client,
    base_url: String,
    sender: SenderEmail,
}

impl EmailClient {
    pub fn new(base_url: String, sender: SenderEmail, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            base_url,
            sender,
        }
    }

    pub async fn send_email(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let url = format!("{}/email", self.base_url.trim_end_matches('/'));
        let request = SendEmailRequest {
            from: self.sender.inner(),
            to: &message.to,
            subject: &message.subject,
            text_body: &message.body,
        };

        self.http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmailError::SendFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| EmailError::SendFailed(format!("Email service error: {}", e)))?;

        Ok(())
    }
}

impl MailDispatcher for EmailClient {
    fn dispatch(&self, message: EmailMessage) {
        let client = self.clone();
        tokio::spawn(async move {
            match client.send_email(&message).await {
                Ok(()) => tracing::info!(to = %mask_email(&message.to), "Email sent"),
                Err(e) => tracing::error!(to = %mask_email(&message.to), error = %e, "Email delivery failed"),
            }
        });
    }
}

/// Messages an `InMemoryMailer` keeps before dropping the oldest
pub const DEFAULT_RETAINED_MESSAGES: usize = 1000;

/// Keeps the most recent messages in memory. Used for local runs and tests.
#[derive(Debug)]
pub struct InMemoryMailer {
    sent: Mutex<VecDeque<EmailMessage>>,
    capacity: usize,
}

impl Default for InMemoryMailer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RETAINED_MESSAGES)
    }
}

impl InMemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sent: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn sent_to(&self, to: &str) -> Vec<EmailMessage> {
        self.sent().into_iter().filter(|m| m.to == to).collect()
    }

    /// The code carried by the latest message to `to`: the last word of its body
    pub fn last_code_for(&self, to: &str) -> Option<String> {
        self.sent_to(to)
            .last()
            .and_then(|m| m.body.split_whitespace().last().map(str::to_string))
    }
}

impl MailDispatcher for InMemoryMailer {
    fn dispatch(&self, message: EmailMessage) {
        tracing::info!(to = %mask_email(&message.to), subject = %message.subject, "Email queued in memory");
        let mut sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
        if sent.len() == self.capacity {
            sent.pop_front();
        }
        sent.push_back(message);
    }
}
