//! Shared fixtures for integration tests: a recording queue, a store that
//! can be made to fail, and wiremock responders.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use webhook_delivery::{
    DeliveryAttempt, DispatchQueue, InMemoryStore, QueueError, QueueMessage, RecordStore,
    StatusUpdate, StoreError, Webhook, WebhookId, WebhookStatus,
};
use wiremock::{Request, Respond, ResponseTemplate};

// ---------------------------------------------------------------------------
// RecordingQueue - captures sends so tests can drive the worker by hand
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingQueue {
    sent: Mutex<VecDeque<(QueueMessage, Option<u64>)>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest message not yet popped.
    pub fn pop(&self) -> Option<(QueueMessage, Option<u64>)> {
        self.sent.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl DispatchQueue for RecordingQueue {
    async fn send(&self, message: QueueMessage, delay_secs: Option<u64>) -> Result<(), QueueError> {
        self.sent.lock().unwrap().push_back((message, delay_secs));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FlakyStore - InMemoryStore with injectable failures
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    failing_gets: AtomicU32,
    writes_down: AtomicBool,
    fail_next_delivered: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` reads fail.
    pub fn fail_next_gets(&self, n: u32) {
        self.failing_gets.store(n, Ordering::SeqCst);
    }

    pub fn set_writes_down(&self, down: bool) {
        self.writes_down.store(down, Ordering::SeqCst);
    }

    /// Make the next status update to `delivered` fail.
    pub fn fail_next_delivered_update(&self) {
        self.fail_next_delivered.store(true, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.writes_down.load(Ordering::SeqCst) {
            Err(StoreError::Backend("connection reset".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn insert_webhook(&self, webhook: &Webhook) -> Result<(), StoreError> {
        self.check_write()?;
        self.inner.insert_webhook(webhook).await
    }

    async fn get(&self, id: &WebhookId) -> Result<Option<Webhook>, StoreError> {
        let should_fail = self
            .failing_gets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(StoreError::Backend("database is locked".to_string()));
        }
        self.inner.get(id).await
    }

    async fn update_status(&self, id: &WebhookId, update: &StatusUpdate) -> Result<(), StoreError> {
        self.check_write()?;
        if update.status == WebhookStatus::Delivered
            && self.fail_next_delivered.swap(false, Ordering::SeqCst)
        {
            return Err(StoreError::Backend("connection reset".to_string()));
        }
        self.inner.update_status(id, update).await
    }

    async fn insert_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), StoreError> {
        self.check_write()?;
        self.inner.insert_attempt(attempt).await
    }

    async fn list_attempts(&self, id: &WebhookId) -> Result<Vec<DeliveryAttempt>, StoreError> {
        self.inner.list_attempts(id).await
    }
}

// ---------------------------------------------------------------------------
// CapturedRequest / CaptureResponder - for inspecting outbound requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl CapturedRequest {
    /// Get a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }
}

/// A wiremock responder that captures incoming requests.
#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    response_code: u16,
    body: String,
}

impl CaptureResponder {
    pub fn new() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            response_code: status,
            body: String::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let captured = CapturedRequest {
            body: request.body.clone(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect(),
        };
        self.requests.lock().unwrap().push(captured);
        ResponseTemplate::new(self.response_code).set_body_string(self.body.clone())
    }
}

/// A wiremock responder that fails a fixed number of times before succeeding.
#[derive(Clone)]
pub struct FailingResponder {
    attempt_count: Arc<AtomicU32>,
    failures_before_success: u32,
    failure_code: u16,
}

impl FailingResponder {
    pub fn fail_times(n: u32) -> Self {
        Self {
            attempt_count: Arc::new(AtomicU32::new(0)),
            failures_before_success: n,
            failure_code: 500,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count.load(Ordering::SeqCst)
    }
}

impl Respond for FailingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.attempt_count.fetch_add(1, Ordering::SeqCst);
        if n < self.failures_before_success {
            ResponseTemplate::new(self.failure_code).set_body_string("upstream unavailable")
        } else {
            ResponseTemplate::new(200).set_body_string("ok")
        }
    }
}
