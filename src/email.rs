//! Outbound email composition and the delivery abstraction.
//!
//! Services never talk to a mail transport directly. They ask the [`Mailer`]
//! for a message (verification link, reset link, logon code) and the mailer
//! hands it to an [`EmailSender`]. The default sender for local dev is
//! [`LogEmailSender`], which logs and returns `Ok(())`.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::error::AuthError;

pub const TEMPLATE_VERIFY_EMAIL: &str = "verify_email";
pub const TEMPLATE_FORGOT_PASSWORD: &str = "forgot_password";
pub const TEMPLATE_LOGON_CODE: &str = "logon_code";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload_json: String,
}

/// Email delivery abstraction.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the message instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            "email send stub"
        );
        debug!(payload = %message.payload_json, "email send stub payload");
        Ok(())
    }
}

/// Base URLs of the pages that receive links from outbound emails.
#[derive(Clone, Debug)]
pub struct EmailLinks {
    pub verification: Url,
    pub forgot_password: Url,
    pub magic: Url,
}

impl EmailLinks {
    /// # Errors
    ///
    /// Returns an error if any base is not an absolute URL.
    pub fn parse(verification: &str, forgot_password: &str, magic: &str) -> Result<Self> {
        Ok(Self {
            verification: Url::parse(verification)?,
            forgot_password: Url::parse(forgot_password)?,
            magic: Url::parse(magic)?,
        })
    }
}

/// Composes account emails and hands them to the configured sender.
pub struct Mailer {
    links: EmailLinks,
    sender: Arc<dyn EmailSender>,
}

impl Mailer {
    #[must_use]
    pub fn new(links: EmailLinks, sender: Arc<dyn EmailSender>) -> Self {
        Self { links, sender }
    }

    /// # Errors
    ///
    /// Returns `Delivery` if the sender fails.
    pub async fn send_verification(&self, email: &str, token: &str) -> Result<(), AuthError> {
        let link = build_link(&self.links.verification, email, "token", token);
        self.deliver(email, TEMPLATE_VERIFY_EMAIL, &link, ("token", token))
            .await
    }

    /// # Errors
    ///
    /// Returns `Delivery` if the sender fails.
    pub async fn send_forgot_password(&self, email: &str, token: &str) -> Result<(), AuthError> {
        let link = build_link(&self.links.forgot_password, email, "token", token);
        self.deliver(email, TEMPLATE_FORGOT_PASSWORD, &link, ("token", token))
            .await
    }

    /// # Errors
    ///
    /// Returns `Delivery` if the sender fails.
    pub async fn send_logon_code(&self, email: &str, code: &str) -> Result<(), AuthError> {
        let link = build_link(&self.links.magic, email, "code", code);
        self.deliver(email, TEMPLATE_LOGON_CODE, &link, ("code", code))
            .await
    }

    async fn deliver(
        &self,
        email: &str,
        template: &str,
        link: &Url,
        (secret_name, secret): (&str, &str),
    ) -> Result<(), AuthError> {
        let payload = json!({
            "email": email,
            "link": link.as_str(),
            secret_name: secret,
        });
        let message = EmailMessage {
            to_email: email.to_string(),
            template: template.to_string(),
            payload_json: payload.to_string(),
        };
        self.sender
            .send(&message)
            .await
            .map_err(AuthError::Delivery)
    }
}

fn build_link(base: &Url, email: &str, name: &str, value: &str) -> Url {
    let mut link = base.clone();
    link.query_pairs_mut()
        .append_pair("email", email)
        .append_pair(name, value);
    link
}

/// Test sender that keeps every message in memory.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingEmailSender {
    messages: tokio::sync::Mutex<Vec<EmailMessage>>,
    fail: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl RecordingEmailSender {
    pub(crate) async fn messages(&self) -> Vec<EmailMessage> {
        self.messages.lock().await.clone()
    }

    pub(crate) fn set_failing(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Value of `field` in the payload of the last message sent to `email`.
    pub(crate) async fn last_field(&self, email: &str, field: &str) -> Option<String> {
        self.messages
            .lock()
            .await
            .iter()
            .rev()
            .find(|message| message.to_email == email)
            .and_then(|message| {
                let payload: serde_json::Value =
                    serde_json::from_str(&message.payload_json).unwrap();
                payload
                    .get(field)
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
            })
    }
}

#[cfg(test)]
#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("mail relay unavailable");
        }
        self.messages.lock().await.push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) fn test_links() -> EmailLinks {
    EmailLinks::parse(
        "https://bulwark.test/verify",
        "https://bulwark.test/reset",
        "https://bulwark.test/magic",
    )
    .unwrap()
}
