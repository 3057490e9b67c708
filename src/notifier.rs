use crate::error::BookingError;
use askama::Template;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Body of the "review ready" email. Fields are HTML-escaped on render.
#[derive(Template)]
#[template(path = "review_ready.html")]
pub struct ReviewReadyEmail<'a> {
    pub name: &'a str,
    pub target_role: &'a str,
    pub report_url: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardTarget {
    Automation,
    Spreadsheet,
}

/// Outbound calls to third-party services.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send_email(&self, message: EmailMessage) -> Result<(), BookingError>;

    /// Returns `false` without sending when the target is not configured.
    async fn forward(&self, target: ForwardTarget, payload: Value) -> Result<bool, BookingError>;
}

#[derive(Debug, Clone, Default)]
pub struct NotifierSettings {
    pub email_api_url: Option<String>,
    pub email_api_key: Option<String>,
    pub email_sender: String,
    pub automation_webhook_url: Option<String>,
    pub sheets_webhook_url: Option<String>,
}

#[derive(Serialize)]
struct EmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

pub struct HttpNotifier {
    client: reqwest::Client,
    settings: NotifierSettings,
}

impl HttpNotifier {
    pub fn new(settings: NotifierSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
        }
    }

    fn target_url(&self, target: ForwardTarget) -> Option<&str> {
        match target {
            ForwardTarget::Automation => self.settings.automation_webhook_url.as_deref(),
            ForwardTarget::Spreadsheet => self.settings.sheets_webhook_url.as_deref(),
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_email(&self, message: EmailMessage) -> Result<(), BookingError> {
        let Some(url) = self.settings.email_api_url.as_deref() else {
            return Err(BookingError::Upstream("Email API is not configured".into()));
        };

        let mut request = self.client.post(url).json(&EmailRequest {
            from: &self.settings.email_sender,
            to: [&message.to],
            subject: &message.subject,
            html: &message.html,
        });
        if let Some(key) = &self.settings.email_api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if let Err(err) = response.error_for_status_ref() {
            error!(?err, to = message.to, "Email API rejected the message");
            return Err(err.into());
        }
        info!(to = message.to, "Email sent");
        Ok(())
    }

    async fn forward(&self, target: ForwardTarget, payload: Value) -> Result<bool, BookingError> {
        let Some(url) = self.target_url(target) else {
            info!(?target, "No forwarding URL configured, skipping");
            return Ok(false);
        };

        let response = self.client.post(url).json(&payload).send().await?;
        if let Err(err) = response.error_for_status_ref() {
            error!(?err, ?target, "Forwarding endpoint rejected the payload");
            return Err(err.into());
        }
        Ok(true)
    }
}
