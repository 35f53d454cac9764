use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a webhook record.
///
/// This is a strongly-typed wrapper to avoid accidental mixing
/// of webhook IDs with other string identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebhookId(pub String);

impl WebhookId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WebhookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WebhookId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Delivery lifecycle status of a webhook.
///
/// `Delivered` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Pending,
    Processing,
    Delivered,
    Failed,
    Retrying,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Pending => "pending",
            WebhookStatus::Processing => "processing",
            WebhookStatus::Delivered => "delivered",
            WebhookStatus::Failed => "failed",
            WebhookStatus::Retrying => "retrying",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(WebhookStatus::Pending),
            "processing" => Some(WebhookStatus::Processing),
            "delivered" => Some(WebhookStatus::Delivered),
            "failed" => Some(WebhookStatus::Failed),
            "retrying" => Some(WebhookStatus::Retrying),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WebhookStatus::Delivered | WebhookStatus::Failed)
    }
}

impl fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One accepted event, destined for a single URL.
///
/// `id`, `payload`, `destination_url`, `event_type` and `created_at` never
/// change after creation. The remaining fields are owned by the delivery
/// worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: WebhookId,

    /// Body delivered verbatim to the destination.
    pub payload: String,

    pub destination_url: String,

    /// Echoed to the destination as `X-Webhook-Event`.
    pub event_type: String,

    /// Unix seconds.
    pub created_at: i64,

    pub status: WebhookStatus,

    /// Number of the last processed attempt. Never decreases.
    pub retry_count: u32,

    /// Unix seconds of the next scheduled attempt; only meaningful while
    /// `status == Retrying`.
    pub next_retry_at: Option<i64>,

    pub last_error: Option<String>,
}

impl Webhook {
    /// Create a fresh `pending` webhook with a generated id.
    pub fn new(
        destination_url: impl Into<String>,
        event_type: impl Into<String>,
        payload: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            id: WebhookId::generate(),
            payload: payload.into(),
            destination_url: destination_url.into(),
            event_type: event_type.into(),
            created_at,
            status: WebhookStatus::Pending,
            retry_count: 0,
            next_retry_at: None,
            last_error: None,
        }
    }

    /// Apply a partial status update in place.
    pub fn apply(&mut self, update: &StatusUpdate) {
        self.status = update.status;
        if let Some(count) = update.retry_count {
            self.retry_count = count;
        }
        if let Some(next) = update.next_retry_at {
            self.next_retry_at = next;
        }
        if let Some(ref error) = update.last_error {
            self.last_error = error.clone();
        }
    }
}

/// Outcome recorded on a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Success,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(AttemptStatus::Success),
            "failed" => Some(AttemptStatus::Failed),
            _ => None,
        }
    }
}

/// One outbound call to a destination and its outcome.
///
/// Append-only: rows are never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: String,
    pub webhook_id: WebhookId,

    /// 1-based, matches the queue message's attempt counter.
    pub attempt_number: u32,

    pub status: AttemptStatus,

    /// Present only when an HTTP response was received.
    pub response_code: Option<u16>,
    pub response_body: Option<String>,

    /// Present whenever `status == Failed`.
    pub error_message: Option<String>,

    /// Unix seconds.
    pub attempted_at: i64,
}

impl DeliveryAttempt {
    /// A failed attempt with no HTTP response attached.
    pub fn failed(
        webhook_id: WebhookId,
        attempt_number: u32,
        error_message: impl Into<String>,
        attempted_at: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            webhook_id,
            attempt_number,
            status: AttemptStatus::Failed,
            response_code: None,
            response_body: None,
            error_message: Some(error_message.into()),
            attempted_at,
        }
    }
}

/// Partial update of a webhook's mutable fields.
///
/// `next_retry_at` and `last_error` are tri-state: `None` leaves the stored
/// value alone, `Some(None)` clears it, `Some(Some(v))` sets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: WebhookStatus,
    pub retry_count: Option<u32>,
    pub next_retry_at: Option<Option<i64>>,
    pub last_error: Option<Option<String>>,
}

impl StatusUpdate {
    pub fn new(status: WebhookStatus) -> Self {
        Self {
            status,
            retry_count: None,
            next_retry_at: None,
            last_error: None,
        }
    }

    /// Start of an attempt: `processing`, previous error cleared.
    pub fn processing() -> Self {
        Self::new(WebhookStatus::Processing).with_last_error(None)
    }

    pub fn delivered(attempt: u32) -> Self {
        Self::new(WebhookStatus::Delivered)
            .with_retry_count(attempt)
            .with_next_retry_at(None)
    }

    pub fn failed(attempt: u32, error: impl Into<String>) -> Self {
        Self::new(WebhookStatus::Failed)
            .with_retry_count(attempt)
            .with_next_retry_at(None)
            .with_last_error(Some(error.into()))
    }

    pub fn retrying(attempt: u32, next_retry_at: i64, error: impl Into<String>) -> Self {
        Self::new(WebhookStatus::Retrying)
            .with_retry_count(attempt)
            .with_next_retry_at(Some(next_retry_at))
            .with_last_error(Some(error.into()))
    }

    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn with_next_retry_at(mut self, next_retry_at: Option<i64>) -> Self {
        self.next_retry_at = Some(next_retry_at);
        self
    }

    pub fn with_last_error(mut self, error: Option<String>) -> Self {
        self.last_error = Some(error);
        self
    }
}

/// A unit of work carried by the dispatch queue.
///
/// Serialized as `{"webhookId": "...", "attempt": n}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub webhook_id: WebhookId,
    pub attempt: u32,
}

impl QueueMessage {
    /// The message that starts delivery of a new webhook.
    pub fn first(webhook_id: WebhookId) -> Self {
        Self { webhook_id, attempt: 1 }
    }

    /// The message for the attempt after this one.
    pub fn next(&self) -> Self {
        Self {
            webhook_id: self.webhook_id.clone(),
            attempt: self.attempt + 1,
        }
    }
}

/// Input accepted by the creation handler.
///
/// Every field is optional at the type level so that missing fields are
/// reported as validation errors rather than deserialization errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateWebhookRequest {
    pub destination_url: Option<String>,
    pub event_type: Option<String>,

    /// A JSON string is stored verbatim; any other JSON value is stored as
    /// its serialized text.
    pub payload: Option<serde_json::Value>,
}

impl CreateWebhookRequest {
    pub fn new(
        destination_url: impl Into<String>,
        event_type: impl Into<String>,
        payload: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            destination_url: Some(destination_url.into()),
            event_type: Some(event_type.into()),
            payload: Some(payload.into()),
        }
    }
}

/// Result of a successful creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedWebhook {
    pub id: WebhookId,
    pub status: WebhookStatus,
}
