//! Retryable webhook delivery with an auditable attempt history.
//!
//! A webhook is accepted once, persisted, and delivered to its destination by
//! a worker driven solely by a dispatch queue. Failed attempts are retried
//! with exponential backoff until the fifth attempt; every attempt is
//! recorded.
//!
//! ## Guarantees
//! - At-least-once delivery attempts
//! - Fixed, reproducible retry timing (see [`backoff`])
//! - A persisted trace for every failure path
//!
//! ## Non-Guarantees
//! - Exactly-once delivery: receivers deduplicate on `X-Webhook-ID`
//! - Mutual exclusion between concurrent workers
//! - Atomicity between the attempt insert and the webhook update
//!
//! Store and queue are traits; in-memory implementations are always
//! available, Postgres and Redis backends sit behind the `postgres` and
//! `redis` features.

pub mod backoff;
mod error;
mod queue;
mod service;
mod storage;
mod types;
mod worker;

#[cfg(feature = "redis")]
mod queue_redis;

#[cfg(feature = "postgres")]
mod storage_postgres;

pub use error::{
    DeliveryOutcome,
    FailureReason,
    QueueError,
    ServiceError,
    StoreError,
    ValidationError,
    WorkerError,
};
pub use queue::{DispatchQueue, InMemoryQueue, QueueConfig, QueueReceiver};
pub use service::WebhookService;
pub use storage::{InMemoryStore, RecordStore};
pub use types::{
    AttemptStatus,
    CreateWebhookRequest,
    CreatedWebhook,
    DeliveryAttempt,
    QueueMessage,
    StatusUpdate,
    Webhook,
    WebhookId,
    WebhookStatus,
};
pub use worker::{spawn_workers, worker_loop, DeliveryWorker, Disposition, WorkerConfig};

#[cfg(feature = "redis")]
pub use queue_redis::{Claim, RedisQueue};

#[cfg(feature = "redis")]
pub use worker::redis_poll_loop;

#[cfg(feature = "postgres")]
pub use storage_postgres::PostgresStore;
