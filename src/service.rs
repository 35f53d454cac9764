//! Creation handler and read operations.
//!
//! The HTTP routing layer in front of these operations is not part of this
//! crate; every returned type serializes to the JSON shape such a router
//! would expose.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{ServiceError, ValidationError};
use crate::queue::DispatchQueue;
use crate::storage::RecordStore;
use crate::types::{CreateWebhookRequest, CreatedWebhook, DeliveryAttempt, QueueMessage, Webhook, WebhookId};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Accepts new webhooks and exposes their delivery state.
pub struct WebhookService {
    store: Arc<dyn RecordStore>,
    queue: Arc<dyn DispatchQueue>,
}

impl WebhookService {
    pub fn new(store: Arc<dyn RecordStore>, queue: Arc<dyn DispatchQueue>) -> Self {
        Self { store, queue }
    }

    /// Validate, persist as `pending`, and enqueue attempt 1 with no delay.
    ///
    /// Invalid input is rejected before anything is written.
    pub async fn create(&self, request: CreateWebhookRequest) -> Result<CreatedWebhook, ServiceError> {
        let (destination_url, event_type, payload) = match validate(request) {
            Ok(fields) => fields,
            Err(err) => {
                metric_inc("webhook.create.rejected");
                tracing::debug!(target: "webhook_delivery", error = %err, "rejected webhook creation");
                return Err(err.into());
            }
        };

        let webhook = Webhook::new(destination_url, event_type, payload, Utc::now().timestamp());
        self.store.insert_webhook(&webhook).await?;
        self.queue.send(QueueMessage::first(webhook.id.clone()), None).await?;

        tracing::info!(
            target: "webhook_delivery",
            webhook_id = %webhook.id,
            event_type = %webhook.event_type,
            "webhook accepted"
        );
        metric_inc("webhook.create.accepted");

        Ok(CreatedWebhook {
            id: webhook.id,
            status: webhook.status,
        })
    }

    pub async fn get(&self, id: &WebhookId) -> Result<Webhook, ServiceError> {
        self.store.get(id).await?.ok_or(ServiceError::NotFound)
    }

    /// Delivery history of a webhook, newest first.
    pub async fn deliveries(&self, id: &WebhookId) -> Result<Vec<DeliveryAttempt>, ServiceError> {
        if self.store.get(id).await?.is_none() {
            return Err(ServiceError::NotFound);
        }
        Ok(self.store.list_attempts(id).await?)
    }
}

fn validate(request: CreateWebhookRequest) -> Result<(String, String, String), ValidationError> {
    let destination_url = non_empty(request.destination_url).ok_or(ValidationError::MissingFields)?;
    let event_type = non_empty(request.event_type).ok_or(ValidationError::MissingFields)?;
    let payload = match request.payload {
        None | Some(serde_json::Value::Null) => return Err(ValidationError::MissingFields),
        Some(serde_json::Value::String(text)) if text.is_empty() => {
            return Err(ValidationError::MissingFields)
        }
        Some(serde_json::Value::String(text)) => text,
        Some(value) => serde_json::to_string(&value)
            .map_err(|e| ValidationError::InvalidPayload(e.to_string()))?,
    };

    url::Url::parse(&destination_url).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;

    Ok((destination_url, event_type, payload))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
