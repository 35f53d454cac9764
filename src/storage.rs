use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::types::{DeliveryAttempt, StatusUpdate, Webhook, WebhookId};

/// Persistence for webhooks and their delivery history.
///
/// Inserting an attempt and updating the webhook are two independent calls;
/// no transaction couples them.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_webhook(&self, webhook: &Webhook) -> Result<(), StoreError>;

    async fn get(&self, id: &WebhookId) -> Result<Option<Webhook>, StoreError>;

    /// Partial update. Unknown ids are ignored.
    async fn update_status(&self, id: &WebhookId, update: &StatusUpdate) -> Result<(), StoreError>;

    async fn insert_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), StoreError>;

    /// Attempts for a webhook, newest first.
    async fn list_attempts(&self, id: &WebhookId) -> Result<Vec<DeliveryAttempt>, StoreError>;
}

/// In-memory storage for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryStore {
    webhooks: Mutex<HashMap<WebhookId, Webhook>>,
    attempts: Mutex<HashMap<WebhookId, Vec<DeliveryAttempt>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn webhook_count(&self) -> usize {
        self.webhooks.lock().await.len()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn insert_webhook(&self, webhook: &Webhook) -> Result<(), StoreError> {
        let mut webhooks = self.webhooks.lock().await;
        if webhooks.contains_key(&webhook.id) {
            return Err(StoreError::Backend(format!("duplicate webhook id {}", webhook.id)));
        }
        webhooks.insert(webhook.id.clone(), webhook.clone());
        Ok(())
    }

    async fn get(&self, id: &WebhookId) -> Result<Option<Webhook>, StoreError> {
        Ok(self.webhooks.lock().await.get(id).cloned())
    }

    async fn update_status(&self, id: &WebhookId, update: &StatusUpdate) -> Result<(), StoreError> {
        if let Some(webhook) = self.webhooks.lock().await.get_mut(id) {
            webhook.apply(update);
        }
        Ok(())
    }

    async fn insert_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), StoreError> {
        self.attempts
            .lock()
            .await
            .entry(attempt.webhook_id.clone())
            .or_default()
            .push(attempt.clone());
        Ok(())
    }

    async fn list_attempts(&self, id: &WebhookId) -> Result<Vec<DeliveryAttempt>, StoreError> {
        let mut attempts = self
            .attempts
            .lock()
            .await
            .get(id)
            .cloned()
            .unwrap_or_default();
        attempts.sort_by(|a, b| {
            b.attempted_at
                .cmp(&a.attempted_at)
                .then(b.attempt_number.cmp(&a.attempt_number))
        });
        Ok(attempts)
    }
}
