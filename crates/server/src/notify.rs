use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use permitly_core::domain::permit::Permit;

/// Outbound lifecycle notification payload. Recipients (site contacts,
/// safety officers) are resolved by the receiving system.
#[derive(Clone, Debug, Serialize)]
pub struct NotificationEvent {
    pub event: String,
    pub permit_id: String,
    pub permit_number: String,
    pub site_id: String,
    pub status: String,
    pub occurred_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn for_permit(event: impl Into<String>, permit: &Permit) -> Self {
        Self {
            event: event.into(),
            permit_id: permit.id.0.clone(),
            permit_number: permit.permit_number.0.clone(),
            site_id: permit.site_id.0.clone(),
            status: permit.status.as_str().to_string(),
            occurred_at: Utc::now(),
        }
    }
}

/// Delivery is best effort: a failed notification is logged and never fails
/// the lifecycle operation that produced it.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: NotificationEvent);
}

#[derive(Clone, Debug, Default)]
pub struct NoopNotifier;

#[async_trait::async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, event: NotificationEvent) {
        debug!(
            event_name = "notify.noop",
            correlation_id = "notify",
            permit_id = %event.permit_id,
            notification = %event.event,
            "notification dropped (no webhook configured)"
        );
    }
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: String, timeout_secs: u64) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()?;
        Ok(Self { client, webhook_url })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: NotificationEvent) {
        let result = self.client.post(&self.webhook_url).json(&event).send().await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(
                    event_name = "notify.webhook.delivered",
                    correlation_id = "notify",
                    permit_id = %event.permit_id,
                    notification = %event.event,
                    "webhook notification delivered"
                );
            }
            Ok(response) => {
                warn!(
                    event_name = "notify.webhook.rejected",
                    correlation_id = "notify",
                    permit_id = %event.permit_id,
                    notification = %event.event,
                    http_status = %response.status(),
                    "webhook endpoint rejected notification"
                );
            }
            Err(error) => {
                warn!(
                    event_name = "notify.webhook.failed",
                    correlation_id = "notify",
                    permit_id = %event.permit_id,
                    notification = %event.event,
                    error = %error,
                    "webhook notification failed"
                );
            }
        }
    }
}
