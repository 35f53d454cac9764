use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::backoff;
use crate::error::{DeliveryOutcome, FailureReason, WorkerError};
use crate::queue::{DispatchQueue, QueueReceiver};
use crate::storage::RecordStore;
use crate::types::{AttemptStatus, DeliveryAttempt, QueueMessage, StatusUpdate, Webhook, WebhookStatus};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Worker tuning. Retry timing is fixed and lives in [`crate::backoff`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Upper bound on one outbound call, body included.
    pub request_timeout: Duration,

    /// Number of tasks spawned by [`spawn_workers`].
    pub worker_count: usize,

    /// `User-Agent` sent with deliveries.
    pub user_agent: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            request_timeout: Duration::from_secs(30),
            worker_count,
            user_agent: concat!("webhook-delivery/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// What the worker did with one queue message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Webhook missing or already delivered; nothing recorded.
    Discarded,
    Delivered,
    /// Failure recorded and `next_attempt` enqueued after `delay_secs`.
    Retrying { next_attempt: u32, delay_secs: u64 },
    /// Failure recorded on the final attempt.
    Failed,
    /// Nothing could be persisted; the message should be redelivered.
    Unacknowledged,
}

/// Performs delivery attempts for queue messages.
///
/// Store and queue are injected; the worker holds no other shared state.
/// Concurrent workers are not coordinated: the only guard against
/// redelivered messages is the `delivered` check on load, which is a plain
/// read-then-act. Two workers racing on the same message can both call the
/// destination and both record an attempt.
pub struct DeliveryWorker {
    store: Arc<dyn RecordStore>,
    queue: Arc<dyn DispatchQueue>,
    http_client: reqwest::Client,
    config: WorkerConfig,
}

impl DeliveryWorker {
    pub fn new(
        store: Arc<dyn RecordStore>,
        queue: Arc<dyn DispatchQueue>,
        config: WorkerConfig,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_else(|err| {
                tracing::warn!(
                    target: "webhook_delivery",
                    error = %err,
                    "failed to build configured HTTP client, using defaults"
                );
                reqwest::Client::new()
            });

        Self {
            store,
            queue,
            http_client,
            config,
        }
    }

    /// Process a batch sequentially, in order.
    pub async fn handle_batch(&self, messages: Vec<QueueMessage>) -> Vec<Disposition> {
        let mut dispositions = Vec::with_capacity(messages.len());
        for message in messages {
            dispositions.push(self.handle_message(message).await);
        }
        dispositions
    }

    /// Handle a message taken off the queue, returning it to the queue after
    /// the backoff delay when nothing could be persisted.
    pub async fn consume(&self, message: QueueMessage) -> Disposition {
        let disposition = self.handle_message(message.clone()).await;
        if disposition == Disposition::Unacknowledged {
            let delay_secs = backoff::next_delay(message.attempt);
            if let Err(err) = self.queue.send(message, Some(delay_secs)).await {
                tracing::error!(
                    target: "webhook_delivery",
                    error = %err,
                    "failed to return unacknowledged message to the queue"
                );
            }
        }
        disposition
    }

    /// Run one delivery attempt for `message`.
    ///
    /// Never fails: store or queue errors are recorded as a failed attempt
    /// and go through the same retry/terminal branching as HTTP failures.
    pub async fn handle_message(&self, message: QueueMessage) -> Disposition {
        let now = Utc::now().timestamp();
        match self.process(&message, now).await {
            Ok(disposition) => disposition,
            Err(err) => self.recover(&message, now, err).await,
        }
    }

    async fn process(&self, message: &QueueMessage, now: i64) -> Result<Disposition, WorkerError> {
        let Some(webhook) = self.store.get(&message.webhook_id).await? else {
            tracing::debug!(
                target: "webhook_delivery",
                webhook_id = %message.webhook_id,
                attempt = message.attempt,
                "webhook not found, discarding message"
            );
            metric_inc("webhook.message.discarded");
            return Ok(Disposition::Discarded);
        };

        if webhook.status == WebhookStatus::Delivered {
            tracing::debug!(
                target: "webhook_delivery",
                webhook_id = %webhook.id,
                attempt = message.attempt,
                "webhook already delivered, discarding message"
            );
            metric_inc("webhook.message.discarded");
            return Ok(Disposition::Discarded);
        }

        self.store
            .update_status(&webhook.id, &StatusUpdate::processing())
            .await?;

        let outcome = self.deliver(&webhook, message.attempt).await;

        let attempt = DeliveryAttempt {
            id: uuid::Uuid::new_v4().to_string(),
            webhook_id: webhook.id.clone(),
            attempt_number: message.attempt,
            status: if outcome.is_success() {
                AttemptStatus::Success
            } else {
                AttemptStatus::Failed
            },
            response_code: outcome.response_code,
            response_body: outcome.response_body.clone(),
            error_message: outcome.error_message(),
            attempted_at: now,
        };
        self.store.insert_attempt(&attempt).await?;

        match outcome.failure {
            None => {
                self.store
                    .update_status(&webhook.id, &StatusUpdate::delivered(message.attempt))
                    .await?;
                tracing::info!(
                    target: "webhook_delivery",
                    webhook_id = %webhook.id,
                    attempt = message.attempt,
                    response_code = outcome.response_code,
                    "webhook delivered"
                );
                metric_inc("webhook.delivery.success");
                Ok(Disposition::Delivered)
            }
            Some(reason) => {
                tracing::warn!(
                    target: "webhook_delivery",
                    webhook_id = %webhook.id,
                    attempt = message.attempt,
                    error = %reason,
                    "delivery attempt failed"
                );
                metric_inc("webhook.delivery.failure");
                self.after_failure(message, reason.to_string()).await
            }
        }
    }

    /// Apply the terminal/retry branch after a recorded failure.
    async fn after_failure(&self, message: &QueueMessage, error: String) -> Result<Disposition, WorkerError> {
        let attempt = message.attempt;

        if backoff::is_terminal(attempt) {
            self.store
                .update_status(&message.webhook_id, &StatusUpdate::failed(attempt, error))
                .await?;
            tracing::error!(
                target: "webhook_delivery",
                webhook_id = %message.webhook_id,
                attempt,
                "webhook delivery failed permanently"
            );
            metric_inc("webhook.delivery.failed");
            return Ok(Disposition::Failed);
        }

        let delay_secs = backoff::next_delay(attempt);
        let next_retry_at = Utc::now().timestamp() + delay_secs as i64;
        self.store
            .update_status(
                &message.webhook_id,
                &StatusUpdate::retrying(attempt, next_retry_at, error),
            )
            .await?;

        let next = message.next();
        let next_attempt = next.attempt;
        self.queue.send(next, Some(delay_secs)).await?;

        tracing::info!(
            target: "webhook_delivery",
            webhook_id = %message.webhook_id,
            next_attempt,
            delay_secs,
            "retry scheduled"
        );
        metric_inc("webhook.delivery.retry_scheduled");
        Ok(Disposition::Retrying { next_attempt, delay_secs })
    }

    /// Record an unexpected error as a failed attempt and branch as usual.
    async fn recover(&self, message: &QueueMessage, now: i64, err: WorkerError) -> Disposition {
        let error = err.to_string();
        tracing::error!(
            target: "webhook_delivery",
            webhook_id = %message.webhook_id,
            attempt = message.attempt,
            error = %error,
            "unexpected error while processing message"
        );

        let attempt = DeliveryAttempt::failed(message.webhook_id.clone(), message.attempt, error.clone(), now);
        let recorded = match self.store.insert_attempt(&attempt).await {
            Ok(()) => self.after_failure(message, error).await,
            Err(insert_err) => Err(insert_err.into()),
        };

        match recorded {
            Ok(disposition) => disposition,
            Err(err) => {
                tracing::error!(
                    target: "webhook_delivery",
                    webhook_id = %message.webhook_id,
                    attempt = message.attempt,
                    error = %err,
                    "unable to record failed attempt"
                );
                metric_inc("webhook.message.unacknowledged");
                Disposition::Unacknowledged
            }
        }
    }

    /// Issue the outbound POST and classify the result.
    async fn deliver(&self, webhook: &Webhook, attempt: u32) -> DeliveryOutcome {
        let request = self
            .http_client
            .post(&webhook.destination_url)
            .timeout(self.config.request_timeout)
            .header("Content-Type", "application/json")
            .header("X-Webhook-ID", webhook.id.as_str())
            .header("X-Webhook-Event", webhook.event_type.as_str())
            .header("X-Webhook-Attempt", attempt.to_string())
            .body(webhook.payload.clone());

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                return DeliveryOutcome {
                    response_code: None,
                    response_body: None,
                    failure: Some(self.classify_error(&err)),
                };
            }
        };

        let status = response.status();
        let code = status.as_u16();
        match response.text().await {
            Ok(body) => {
                let failure = if status.is_success() {
                    None
                } else {
                    Some(FailureReason::HttpStatus { code, body: body.clone() })
                };
                DeliveryOutcome {
                    response_code: Some(code),
                    response_body: Some(body),
                    failure,
                }
            }
            Err(err) => DeliveryOutcome {
                response_code: Some(code),
                response_body: None,
                failure: Some(self.classify_error(&err)),
            },
        }
    }

    fn classify_error(&self, err: &reqwest::Error) -> FailureReason {
        if err.is_timeout() {
            FailureReason::Timeout { after: self.config.request_timeout }
        } else {
            FailureReason::Network(describe_error(err))
        }
    }
}

/// Render an error and its source chain as one line.
fn describe_error(err: &(dyn std::error::Error + 'static)) -> String {
    let mut description = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !text.is_empty() && !description.contains(&text) {
            description.push_str(": ");
            description.push_str(&text);
        }
        source = cause.source();
    }
    description
}

/// Main consumer loop.
///
/// Each worker:
/// - Pulls due messages from the shared receiver
/// - Runs one delivery attempt per message
/// - Hands unacknowledged messages back to the queue after the backoff delay
pub async fn worker_loop(rx: Arc<Mutex<QueueReceiver>>, worker: Arc<DeliveryWorker>) {
    loop {
        let message = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };

        let Some(message) = message else { break };

        worker.consume(message).await;
    }
}

/// Spawn `config.worker_count` consumers sharing one receiver.
pub fn spawn_workers(receiver: QueueReceiver, worker: Arc<DeliveryWorker>) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(receiver));
    (0..worker.config.worker_count.max(1))
        .map(|_| tokio::spawn(worker_loop(rx.clone(), worker.clone())))
        .collect()
}

/// Poll a Redis queue and process claimed messages as batches.
///
/// Claims are acknowledged once the worker has persisted an outcome.
/// Unacknowledged claims stay in the queue and become visible again when
/// their visibility timeout lapses.
#[cfg(feature = "redis")]
pub async fn redis_poll_loop(
    queue: Arc<crate::queue_redis::RedisQueue>,
    worker: Arc<DeliveryWorker>,
    batch_size: usize,
    poll_interval: Duration,
) {
    loop {
        let claims = match queue.poll(batch_size).await {
            Ok(claims) => claims,
            Err(err) => {
                tracing::warn!(target: "webhook_delivery", error = %err, "queue poll failed");
                Vec::new()
            }
        };

        if claims.is_empty() {
            tokio::time::sleep(poll_interval).await;
            continue;
        }

        let messages = claims.iter().map(|claim| claim.message.clone()).collect();
        let dispositions = worker.handle_batch(messages).await;
        for (claim, disposition) in claims.iter().zip(dispositions) {
            if disposition == Disposition::Unacknowledged {
                continue;
            }
            if let Err(err) = queue.ack(claim).await {
                tracing::warn!(
                    target: "webhook_delivery",
                    webhook_id = %claim.message.webhook_id,
                    error = %err,
                    "failed to acknowledge queue message"
                );
            }
        }
    }
}
