use std::fmt;
use std::time::Duration;

/// Number of response-body characters quoted in an HTTP failure message.
pub const ERROR_BODY_PREVIEW_CHARS: usize = 500;

/// Errors raised by a record store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not complete the read or write.
    #[error("storage error: {0}")]
    Backend(String),

    /// A stored row could not be mapped back to an entity.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Errors raised when handing a message to the dispatch queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue has been closed.
    #[error("dispatch queue is closed")]
    Closed,

    #[error("dispatch queue error: {0}")]
    Backend(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Backend(err.to_string())
    }
}

/// Rejections of malformed creation input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required fields: destination_url, event_type, payload")]
    MissingFields,

    #[error("Invalid destination_url: {0}")]
    InvalidUrl(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// Errors returned by the creation and read operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Webhook not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Unexpected failures inside the delivery worker, outside the HTTP call.
///
/// These never escape the worker: they are recorded as a failed attempt.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Reasons why an HTTP delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// A response arrived with a non-2xx status.
    HttpStatus { code: u16, body: String },

    /// No response within the request timeout.
    Timeout { after: Duration },

    /// Connection, TLS, request-building or body-read failure.
    Network(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::HttpStatus { code, body } => {
                let preview: String = body.chars().take(ERROR_BODY_PREVIEW_CHARS).collect();
                write!(f, "HTTP {}: {}", code, preview)
            }
            FailureReason::Timeout { after } =>
                write!(f, "request timed out after {}s", after.as_secs_f64()),
            FailureReason::Network(message) if message.is_empty() =>
                write!(f, "Unknown error"),
            FailureReason::Network(message) =>
                write!(f, "{}", message),
        }
    }
}

/// Classified result of one outbound delivery call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub response_code: Option<u16>,
    pub response_body: Option<String>,

    /// `None` means the destination accepted the webhook.
    pub failure: Option<FailureReason>,
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn error_message(&self) -> Option<String> {
        self.failure.as_ref().map(|reason| reason.to_string())
    }
}
