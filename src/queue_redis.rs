use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::error::QueueError;
use crate::queue::DispatchQueue;
use crate::types::QueueMessage;

/// Re-score a member to `ARGV[2]` only if it is due at `ARGV[1]`.
const CLAIM_SCRIPT: &str = r#"
local score = redis.call('ZSCORE', KEYS[1], ARGV[3])
if score and tonumber(score) <= tonumber(ARGV[1]) then
    redis.call('ZADD', KEYS[1], ARGV[2], ARGV[3])
    return 1
end
return 0
"#;

/// Dispatch queue backed by a Redis sorted set.
///
/// Each member is a JSON envelope scored by its due time in milliseconds.
/// Envelopes carry a unique tag so that two sends of the same message stay
/// two deliveries.
///
/// Polling does not remove members. A claim pushes the member's score past
/// the visibility timeout and [`RedisQueue::ack`] removes it once handled,
/// so a consumer that dies mid-message leaves it to be claimed again.
pub struct RedisQueue {
    client: redis::Client,
    prefix: String,
    visibility_timeout: Duration,
    claim: redis::Script,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Envelope {
    tag: String,
    message: QueueMessage,
}

/// A message claimed by [`RedisQueue::poll`], pending acknowledgement.
#[derive(Debug, Clone)]
pub struct Claim {
    member: String,
    pub message: QueueMessage,
}

impl RedisQueue {
    /// Claims stay invisible for 5 minutes by default.
    pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
            visibility_timeout: Duration::from_secs(300),
            claim: redis::Script::new(CLAIM_SCRIPT),
        }
    }

    /// How long a claimed message stays hidden before it can be claimed again.
    /// Should exceed the worker's request timeout.
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    fn scheduled_key(&self) -> String {
        format!("{}:scheduled", self.prefix)
    }

    /// Claim up to `max` due messages.
    ///
    /// The claim script is atomic, so concurrent pollers never both claim the
    /// same envelope within one visibility window.
    pub async fn poll(&self, max: usize) -> Result<Vec<Claim>, QueueError> {
        let mut conn = self.client.get_tokio_connection().await?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        let hidden_until = now_ms.saturating_add(self.visibility_timeout.as_millis() as i64);
        let due: Vec<String> = conn
            .zrangebyscore_limit(self.scheduled_key(), "-inf", now_ms, 0, max as isize)
            .await?;

        let mut claimed = Vec::with_capacity(due.len());
        for member in due {
            let won: i64 = self
                .claim
                .key(self.scheduled_key())
                .arg(now_ms)
                .arg(hidden_until)
                .arg(&member)
                .invoke_async(&mut conn)
                .await?;
            if won != 1 {
                continue;
            }
            match serde_json::from_str::<Envelope>(&member) {
                Ok(envelope) => claimed.push(Claim { member, message: envelope.message }),
                Err(err) => {
                    tracing::warn!(
                        target: "webhook_delivery",
                        error = %err,
                        "dropping malformed queue envelope"
                    );
                    let _: i64 = conn.zrem(self.scheduled_key(), &member).await?;
                }
            }
        }
        Ok(claimed)
    }

    /// Remove a handled claim from the queue.
    pub async fn ack(&self, claim: &Claim) -> Result<(), QueueError> {
        let mut conn = self.client.get_tokio_connection().await?;
        let _: i64 = conn.zrem(self.scheduled_key(), &claim.member).await?;
        Ok(())
    }
}

#[async_trait]
impl DispatchQueue for RedisQueue {
    async fn send(&self, message: QueueMessage, delay_secs: Option<u64>) -> Result<(), QueueError> {
        let envelope = Envelope {
            tag: uuid::Uuid::new_v4().to_string(),
            message,
        };
        let member = serde_json::to_string(&envelope)
            .map_err(|e| QueueError::Backend(format!("failed to encode message: {e}")))?;
        let delay_ms = delay_secs.unwrap_or(0).saturating_mul(1_000) as i64;
        let due_ms = chrono::Utc::now().timestamp_millis().saturating_add(delay_ms);

        let mut conn = self.client.get_tokio_connection().await?;
        let _: i64 = conn.zadd(self.scheduled_key(), member, due_ms).await?;
        Ok(())
    }
}
