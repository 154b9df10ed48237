use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tracing::{info, warn};

use crate::channel::ChannelRef;
use crate::upstream::{UpstreamClient, UpstreamHttpRequest};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notification endpoint answered status {0}")]
    Status(u16),
    #[error("notification encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Operator-facing delivery channels. Callers treat every send as best-effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(&self, subject: &str, recipient: &str, body: &str)
    -> Result<(), NotifyError>;

    async fn send_sms(&self, channel_name: &str, template_id: &str) -> Result<(), NotifyError>;
}

/// Writes notifications to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_email(
        &self,
        subject: &str,
        recipient: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        info!(event = "notify_email", %recipient, %subject, %body);
        Ok(())
    }

    async fn send_sms(&self, channel_name: &str, template_id: &str) -> Result<(), NotifyError> {
        info!(event = "notify_sms", channel = %channel_name, template = %template_id);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum WebhookPayload<'a> {
    Email {
        subject: &'a str,
        recipient: &'a str,
        body: &'a str,
    },
    Sms {
        channel_name: &'a str,
        template_id: &'a str,
    },
}

/// Posts each notification as JSON to a mail/SMS gateway.
pub struct WebhookNotifier {
    client: Arc<dyn UpstreamClient>,
    url: String,
}

impl WebhookNotifier {
    pub fn new(client: Arc<dyn UpstreamClient>, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    async fn post(&self, payload: WebhookPayload<'_>) -> Result<(), NotifyError> {
        let body = Bytes::from(serde_json::to_vec(&payload)?);
        let resp = self
            .client
            .send(UpstreamHttpRequest {
                method: http::Method::POST,
                url: self.url.clone(),
                headers: vec![("content-type".to_string(), "application/json".to_string())],
                body: Some(body),
            })
            .await
            .map_err(|err| NotifyError::Transport(err.to_string()))?;
        if !resp.is_success() {
            return Err(NotifyError::Status(resp.status));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_email(
        &self,
        subject: &str,
        recipient: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        self.post(WebhookPayload::Email {
            subject,
            recipient,
            body,
        })
        .await
    }

    async fn send_sms(&self, channel_name: &str, template_id: &str) -> Result<(), NotifyError> {
        self.post(WebhookPayload::Sms {
            channel_name,
            template_id,
        })
        .await
    }
}

/// Channel state messages for the operator, built on a [`Notifier`].
#[derive(Clone)]
pub struct OperatorAlerts {
    notifier: Arc<dyn Notifier>,
    recipient: Option<String>,
    sms_template_disabled: String,
}

impl OperatorAlerts {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        recipient: Option<String>,
        sms_template_disabled: impl Into<String>,
    ) -> Self {
        Self {
            notifier,
            recipient,
            sms_template_disabled: sms_template_disabled.into(),
        }
    }

    /// A terminal relay error took the channel out of rotation.
    pub async fn channel_auto_disabled(&self, channel: &ChannelRef, reason: &str) {
        let subject = format!("channel \"{}\" (#{}) has been disabled", channel.name, channel.id);
        let body = format!("{subject}, reason: {reason}");
        self.email(&subject, &body).await;
    }

    /// A health check failed on an enabled channel. Also pages by SMS.
    pub async fn channel_check_failed(&self, channel: &ChannelRef, reason: &str) {
        let subject = format!(
            "channel \"{}\" (#{}) failed its health check",
            channel.name, channel.id
        );
        let body = format!("{subject} and has been disabled, reason: {reason}");
        self.email(&subject, &body).await;
        if let Err(err) = self
            .notifier
            .send_sms(&channel.name, &self.sms_template_disabled)
            .await
        {
            warn!(event = "notify_failed", transport = "sms", channel_id = channel.id, error = %err);
        }
    }

    pub async fn channel_check_recovered(&self, channel: &ChannelRef) {
        let subject = format!("channel \"{}\" (#{}) has been enabled", channel.name, channel.id);
        let body = format!("{subject} after passing its health check");
        self.email(&subject, &body).await;
    }

    async fn email(&self, subject: &str, body: &str) {
        let Some(recipient) = self.recipient.as_deref() else {
            info!(event = "notify_skipped", %subject, "no operator email configured");
            return;
        };
        if let Err(err) = self.notifier.send_email(subject, recipient, body).await {
            warn!(event = "notify_failed", transport = "email", %subject, error = %err);
        }
    }
}
