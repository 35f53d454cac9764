use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::error::QueueError;
use crate::types::QueueMessage;

/// At-least-once channel that triggers delivery work.
///
/// A message may be handed to a consumer more than once, and messages for
/// different webhooks may arrive in any order.
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Enqueue `message`, visible after `delay_secs` (or as soon as possible
    /// when `None`).
    async fn send(&self, message: QueueMessage, delay_secs: Option<u64>) -> Result<(), QueueError>;
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Capacity of the channel feeding the scheduler.
    pub incoming_capacity: usize,
    /// Capacity of the channel of due messages awaiting a consumer.
    pub ready_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            incoming_capacity: 1_000,
            ready_capacity: 1_000,
        }
    }
}

enum Command {
    Send { message: QueueMessage, ready_at: Instant },
    Close,
}

/// In-process dispatch queue.
///
/// A scheduler task holds delayed messages in a min-heap and forwards them to
/// the ready channel once due. Cloning yields another handle to the same
/// queue.
#[derive(Clone)]
pub struct InMemoryQueue {
    tx: mpsc::Sender<Command>,
}

/// Consumer side of an [`InMemoryQueue`].
pub struct QueueReceiver {
    rx: mpsc::Receiver<QueueMessage>,
}

impl QueueReceiver {
    /// Next due message, or `None` once the queue is closed.
    pub async fn recv(&mut self) -> Option<QueueMessage> {
        self.rx.recv().await
    }
}

impl InMemoryQueue {
    /// Create a queue and spawn its scheduler on the current tokio runtime.
    pub fn new(config: QueueConfig) -> (Self, QueueReceiver) {
        let (tx, rx) = mpsc::channel(config.incoming_capacity.max(1));
        let (ready_tx, ready_rx) = mpsc::channel(config.ready_capacity.max(1));
        tokio::spawn(scheduler_loop(rx, ready_tx));
        (Self { tx }, QueueReceiver { rx: ready_rx })
    }

    /// Stop the scheduler. Pending delayed messages are discarded and
    /// consumers observe end-of-stream.
    ///
    /// Fails with [`QueueError::Closed`] if the queue was already closed.
    pub async fn close(&self) -> Result<(), QueueError> {
        self.tx
            .send(Command::Close)
            .await
            .map_err(|_| QueueError::Closed)
    }
}

#[async_trait]
impl DispatchQueue for InMemoryQueue {
    async fn send(&self, message: QueueMessage, delay_secs: Option<u64>) -> Result<(), QueueError> {
        let ready_at = Instant::now() + Duration::from_secs(delay_secs.unwrap_or(0));
        self.tx
            .send(Command::Send { message, ready_at })
            .await
            .map_err(|_| QueueError::Closed)
    }
}

#[derive(Debug)]
struct TimedMessage {
    ready_at: Instant,
    seq: u64,
    message: QueueMessage,
}

impl Eq for TimedMessage {}

impl PartialEq for TimedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl Ord for TimedMessage {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse for min-heap behavior; FIFO among equal ready times.
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

async fn scheduler_loop(mut rx: mpsc::Receiver<Command>, ready_tx: mpsc::Sender<QueueMessage>) {
    let mut heap: BinaryHeap<TimedMessage> = BinaryHeap::new();
    let mut seq = 0u64;

    // Intake is always polled, even while consumers are saturated: workers
    // enqueue retries through the same channel they are drained from.
    loop {
        let next_ready = heap.peek().map(|timed| timed.ready_at);
        let due = next_ready.is_some_and(|ready_at| ready_at <= Instant::now());

        tokio::select! {
            permit = ready_tx.reserve(), if due => {
                let Ok(permit) = permit else { return };
                if let Some(timed) = heap.pop() {
                    permit.send(timed.message);
                }
            }
            _ = sleep_until(next_ready.unwrap_or_else(Instant::now)), if next_ready.is_some() && !due => {}
            command = rx.recv() => match command {
                Some(Command::Send { message, ready_at }) => {
                    seq += 1;
                    heap.push(TimedMessage { ready_at, seq, message });
                }
                Some(Command::Close) | None => {
                    tracing::debug!(
                        target: "webhook_delivery",
                        discarded = heap.len(),
                        "dispatch queue closed"
                    );
                    return;
                }
            },
        }
    }
}
