use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mail endpoint returned status {0}")]
    Status(u16),

    #[error("install name is not configured")]
    MissingInstall,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Default)]
pub struct NotifierSettings {
    pub endpoint: Option<String>,
    pub install: String,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct SendMailRequest<'a> {
    email: EmailBody<'a>,
    env: MailEnvironment<'a>,
}

#[derive(Debug, Serialize)]
struct EmailBody<'a> {
    to: &'a str,
    subject: &'a str,
    body: &'a str,
    created_on: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct MailEnvironment<'a> {
    install: &'a str,
    user: &'a str,
    adopter: &'a str,
    group: &'a str,
    module: &'a str,
}

/// Sends alert mail through the install's mail endpoint.
///
/// Without an endpoint the mail is only logged.
pub struct Notifier {
    client: reqwest::Client,
    settings: NotifierSettings,
}

impl Notifier {
    pub fn new(settings: NotifierSettings) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("logship/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, settings })
    }

    pub async fn send(&self, mail: &Mail) -> Result<(), NotifyError> {
        let Some(endpoint) = self.settings.endpoint.as_deref() else {
            info!(to = %mail.to, subject = %mail.subject, "Alert mail (no endpoint configured)");
            return Ok(());
        };

        if self.settings.install.is_empty() {
            return Err(NotifyError::MissingInstall);
        }

        let request = SendMailRequest {
            email: EmailBody {
                to: &mail.to,
                subject: &mail.subject,
                body: &mail.body,
                created_on: Utc::now(),
            },
            env: MailEnvironment {
                install: &self.settings.install,
                user: "",
                adopter: "",
                group: "",
                module: "",
            },
        };

        let response = self.client.post(endpoint).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }

        info!(to = %mail.to, subject = %mail.subject, "Alert mail sent");
        Ok(())
    }
}
