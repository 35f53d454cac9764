use async_trait::async_trait;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Row};

use crate::error::StoreError;
use crate::storage::RecordStore;
use crate::types::{AttemptStatus, DeliveryAttempt, StatusUpdate, Webhook, WebhookId, WebhookStatus};

pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    pub async fn new(client: Client) -> Result<Self, StoreError> {
        client
            .execute(
                "CREATE TABLE IF NOT EXISTS webhooks (
                    id TEXT PRIMARY KEY,
                    payload TEXT NOT NULL,
                    destination_url TEXT NOT NULL,
                    event_type TEXT NOT NULL,
                    created_at BIGINT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    retry_count INTEGER NOT NULL DEFAULT 0,
                    next_retry_at BIGINT,
                    last_error TEXT
                )",
                &[],
            )
            .await?;

        client
            .execute(
                "CREATE TABLE IF NOT EXISTS webhook_deliveries (
                    id TEXT PRIMARY KEY,
                    webhook_id TEXT NOT NULL,
                    attempt_number INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    response_code INTEGER,
                    response_body TEXT,
                    error_message TEXT,
                    attempted_at BIGINT NOT NULL
                )",
                &[],
            )
            .await?;

        Ok(Self { client })
    }

    fn webhook_from_row(row: &Row) -> Result<Webhook, StoreError> {
        let status: String = row.try_get("status")?;
        let retry_count: i32 = row.try_get("retry_count")?;
        Ok(Webhook {
            id: WebhookId(row.try_get("id")?),
            payload: row.try_get("payload")?,
            destination_url: row.try_get("destination_url")?,
            event_type: row.try_get("event_type")?,
            created_at: row.try_get("created_at")?,
            status: WebhookStatus::parse(&status)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown webhook status {status:?}")))?,
            retry_count: u32::try_from(retry_count)
                .map_err(|_| StoreError::Corrupt(format!("negative retry_count {retry_count}")))?,
            next_retry_at: row.try_get("next_retry_at")?,
            last_error: row.try_get("last_error")?,
        })
    }

    fn attempt_from_row(row: &Row) -> Result<DeliveryAttempt, StoreError> {
        let status: String = row.try_get("status")?;
        let attempt_number: i32 = row.try_get("attempt_number")?;
        let response_code: Option<i32> = row.try_get("response_code")?;
        Ok(DeliveryAttempt {
            id: row.try_get("id")?,
            webhook_id: WebhookId(row.try_get("webhook_id")?),
            attempt_number: u32::try_from(attempt_number)
                .map_err(|_| StoreError::Corrupt(format!("invalid attempt_number {attempt_number}")))?,
            status: AttemptStatus::parse(&status)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown attempt status {status:?}")))?,
            response_code: response_code.and_then(|code| u16::try_from(code).ok()),
            response_body: row.try_get("response_body")?,
            error_message: row.try_get("error_message")?,
            attempted_at: row.try_get("attempted_at")?,
        })
    }
}

#[async_trait]
impl RecordStore for PostgresStore {
    async fn insert_webhook(&self, webhook: &Webhook) -> Result<(), StoreError> {
        let retry_count = webhook.retry_count as i32;
        self.client
            .execute(
                "INSERT INTO webhooks
                    (id, payload, destination_url, event_type, created_at,
                     status, retry_count, next_retry_at, last_error)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                &[
                    &webhook.id.0,
                    &webhook.payload,
                    &webhook.destination_url,
                    &webhook.event_type,
                    &webhook.created_at,
                    &webhook.status.as_str(),
                    &retry_count,
                    &webhook.next_retry_at,
                    &webhook.last_error,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: &WebhookId) -> Result<Option<Webhook>, StoreError> {
        let row = self
            .client
            .query_opt("SELECT * FROM webhooks WHERE id = $1", &[&id.0])
            .await?;
        row.as_ref().map(Self::webhook_from_row).transpose()
    }

    async fn update_status(&self, id: &WebhookId, update: &StatusUpdate) -> Result<(), StoreError> {
        let status = update.status.as_str();
        let retry_count = update.retry_count.map(|count| count as i32);

        let mut sql = String::from("UPDATE webhooks SET status = $2");
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&id.0, &status];
        if let Some(count) = &retry_count {
            params.push(count);
            sql.push_str(&format!(", retry_count = ${}", params.len()));
        }
        if let Some(next_retry_at) = &update.next_retry_at {
            params.push(next_retry_at);
            sql.push_str(&format!(", next_retry_at = ${}", params.len()));
        }
        if let Some(last_error) = &update.last_error {
            params.push(last_error);
            sql.push_str(&format!(", last_error = ${}", params.len()));
        }
        sql.push_str(" WHERE id = $1");

        self.client.execute(sql.as_str(), &params).await?;
        Ok(())
    }

    async fn insert_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), StoreError> {
        let attempt_number = attempt.attempt_number as i32;
        let response_code = attempt.response_code.map(i32::from);
        self.client
            .execute(
                "INSERT INTO webhook_deliveries
                    (id, webhook_id, attempt_number, status, response_code,
                     response_body, error_message, attempted_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &attempt.id,
                    &attempt.webhook_id.0,
                    &attempt_number,
                    &attempt.status.as_str(),
                    &response_code,
                    &attempt.response_body,
                    &attempt.error_message,
                    &attempt.attempted_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_attempts(&self, id: &WebhookId) -> Result<Vec<DeliveryAttempt>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT * FROM webhook_deliveries
                 WHERE webhook_id = $1
                 ORDER BY attempted_at DESC, attempt_number DESC",
                &[&id.0],
            )
            .await?;
        rows.iter().map(Self::attempt_from_row).collect()
    }
}
