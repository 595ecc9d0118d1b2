// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified Processor.
//!
//! A bounded-capacity priority queue fronting a worker pool. Requests are
//! dispatched by `request_type` through a handler table; a handler that
//! raises an error or overruns its timeout is retried up to
//! `max_retries` times by re-enqueuing with an incremented retry count.
//! Running statistics are exposed through [`patchplane_telemetry`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use patchplane_core::{Priority, RequestType};
use patchplane_queue::PriorityQueue;
use patchplane_telemetry::{OutcomeStatus, ProcessorStats, ProcessorTelemetry, RequestOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// A request handler: given the request's data, asynchronously produce a
/// result value or an error message.
pub type RequestHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// Lifecycle status of a dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Enqueued, not yet picked up.
    Pending,
    /// A worker is currently invoking the handler.
    Processing,
    /// The handler returned successfully.
    Completed,
    /// The handler raised an error on the final attempt.
    Failed,
    /// The handler did not finish within its configured timeout on the
    /// final attempt.
    Timeout,
}

/// One request submitted to the processor.
#[derive(Clone)]
pub struct ProcessorRequest {
    /// Opaque identifier returned from [`UnifiedProcessor::submit`].
    pub request_id: String,
    /// The kind of request, used to select a handler.
    pub request_type: RequestType,
    /// Request payload passed to the handler.
    pub data: Value,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Attempts made so far.
    pub retry_count: u32,
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Submission time.
    pub created_at: DateTime<Utc>,
}

/// The stored outcome of one request, keyed by `request_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    /// Terminal (or in-flight) status.
    pub status: ProcessingStatus,
    /// The handler's return value, if it completed successfully.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The handler's error message, if it failed or timed out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock time spent in the final attempt, in milliseconds.
    pub processing_time_ms: u64,
    /// When this result was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Errors returned by [`UnifiedProcessor`] operations.
#[derive(Debug)]
pub enum ProcessorError {
    /// The submission queue rejected the request.
    Queue(patchplane_queue::QueueError),
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue(e) => write!(f, "queue error: {e}"),
        }
    }
}

impl std::error::Error for ProcessorError {}

/// Snapshot of processor-wide counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorSnapshot {
    /// Aggregated outcome statistics (mirrors [`ProcessorStats`]).
    pub stats: ProcessorStats,
    /// Requests currently queued.
    pub queue_size: usize,
    /// Workers currently executing a handler.
    pub active_workers: usize,
}

fn request_type_name(request_type: RequestType) -> &'static str {
    match request_type {
        RequestType::Webhook => "webhook",
        RequestType::Patch => "patch",
        RequestType::Summary => "summary",
        RequestType::SlackCommand => "slack_command",
        RequestType::SlackEvent => "slack_event",
        RequestType::HealthCheck => "health_check",
        RequestType::ResourceCheck => "resource_check",
        RequestType::ProcessCheck => "process_check",
    }
}

struct EngineState {
    queue: PriorityQueue<ProcessorRequest>,
    results: HashMap<String, ProcessingResult>,
    next_seq: u64,
}

/// Bounded-capacity priority queue fronting a worker pool, dispatching by
/// request type.
pub struct UnifiedProcessor {
    handlers: HashMap<RequestType, RequestHandler>,
    state: Mutex<EngineState>,
    telemetry: ProcessorTelemetry,
    active_workers: AtomicUsize,
}

impl UnifiedProcessor {
    /// Build a processor with an empty handler table and a bounded
    /// submission queue.
    #[must_use]
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            handlers: HashMap::new(),
            state: Mutex::new(EngineState {
                queue: PriorityQueue::new(max_queue_size),
                results: HashMap::new(),
                next_seq: 0,
            }),
            telemetry: ProcessorTelemetry::new(),
            active_workers: AtomicUsize::new(0),
        }
    }

    /// Register (or replace) the handler for a request type.
    pub fn register_handler(&mut self, request_type: RequestType, handler: RequestHandler) {
        self.handlers.insert(request_type, handler);
    }

    /// Submit a request for processing. Returns the generated
    /// `request_id`.
    pub async fn submit(
        &self,
        request_type: RequestType,
        data: Value,
        priority: Priority,
        timeout: Duration,
    ) -> Result<String, ProcessorError> {
        self.submit_with_retry(None, request_type, data, priority, timeout, 0, 3).await
    }

    /// Re-enqueue under `request_id` if given, otherwise mint a fresh id.
    /// A request's id is stable across its own retries: only the first,
    /// non-retry submission mints a new one.
    async fn submit_with_retry(
        &self,
        request_id: Option<String>,
        request_type: RequestType,
        data: Value,
        priority: Priority,
        timeout: Duration,
        retry_count: u32,
        max_retries: u32,
    ) -> Result<String, ProcessorError> {
        let mut state = self.state.lock().await;
        let request_id = request_id.unwrap_or_else(|| {
            state.next_seq += 1;
            format!("req-{}", state.next_seq)
        });
        let request = ProcessorRequest {
            request_id: request_id.clone(),
            request_type,
            data,
            timeout,
            retry_count,
            max_retries,
            created_at: Utc::now(),
        };
        state
            .results
            .insert(request_id.clone(), ProcessingResult {
                status: ProcessingStatus::Pending,
                result: None,
                error: None,
                processing_time_ms: 0,
                timestamp: Utc::now(),
            });
        state.queue.enqueue(request_id.clone(), priority, request).map_err(ProcessorError::Queue)?;
        Ok(request_id)
    }

    /// Dequeue and run the next pending request, if any. Returns the
    /// `request_id` processed.
    pub async fn process_next(&self) -> Option<String> {
        let request = {
            let mut state = self.state.lock().await;
            let entry = state.queue.dequeue()?;
            entry.item
        };

        let request_id = request.request_id.clone();
        {
            let mut state = self.state.lock().await;
            if let Some(r) = state.results.get_mut(&request_id) {
                r.status = ProcessingStatus::Processing;
            }
        }

        self.active_workers.fetch_add(1, Ordering::SeqCst);
        let start = std::time::Instant::now();

        let handler = self.handlers.get(&request.request_type).cloned();
        let outcome = match handler {
            Some(handler) => {
                let fut = handler(request.data.clone());
                match tokio::time::timeout(request.timeout, fut).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => Err((false, err)),
                    Err(_) => Err((true, "handler timed out".to_string())),
                }
            }
            None => Err((false, format!("no handler registered for {:?}", request.request_type))),
        };

        self.active_workers.fetch_sub(1, Ordering::SeqCst);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(value) => {
                self.store_result(
                    &request_id,
                    ProcessingResult {
                        status: ProcessingStatus::Completed,
                        result: Some(value),
                        error: None,
                        processing_time_ms: elapsed_ms,
                        timestamp: Utc::now(),
                    },
                )
                .await;
                self.telemetry.record(RequestOutcome {
                    request_type: request_type_name(request.request_type).to_string(),
                    status: OutcomeStatus::Completed,
                    processing_time_ms: elapsed_ms,
                    attempts: request.retry_count + 1,
                });
            }
            Err((timed_out, message)) => {
                if request.retry_count < request.max_retries {
                    tracing::warn!(request_id = %request_id, error = %message, "request failed, re-enqueuing");
                    if let Err(err) = self
                        .submit_with_retry(
                            Some(request_id.clone()),
                            request.request_type,
                            request.data,
                            Priority::Normal,
                            request.timeout,
                            request.retry_count + 1,
                            request.max_retries,
                        )
                        .await
                    {
                        self.store_result(
                            &request_id,
                            ProcessingResult {
                                status: ProcessingStatus::Failed,
                                result: None,
                                error: Some(format!("retry re-enqueue failed: {err}")),
                                processing_time_ms: elapsed_ms,
                                timestamp: Utc::now(),
                            },
                        )
                        .await;
                    }
                } else {
                    let status = if timed_out { ProcessingStatus::Timeout } else { ProcessingStatus::Failed };
                    self.store_result(
                        &request_id,
                        ProcessingResult {
                            status,
                            result: None,
                            error: Some(message),
                            processing_time_ms: elapsed_ms,
                            timestamp: Utc::now(),
                        },
                    )
                    .await;
                    self.telemetry.record(RequestOutcome {
                        request_type: request_type_name(request.request_type).to_string(),
                        status: if timed_out { OutcomeStatus::Timeout } else { OutcomeStatus::Failed },
                        processing_time_ms: elapsed_ms,
                        attempts: request.retry_count + 1,
                    });
                }
            }
        }

        Some(request_id)
    }

    async fn store_result(&self, request_id: &str, result: ProcessingResult) {
        let mut state = self.state.lock().await;
        state.results.insert(request_id.to_string(), result);
    }

    /// Look up a request's current result, if known.
    pub async fn result(&self, request_id: &str) -> Option<ProcessingResult> {
        self.state.lock().await.results.get(request_id).cloned()
    }

    /// Current number of queued requests.
    pub async fn queue_size(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Current number of workers executing a handler.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Take a snapshot of processor-wide statistics.
    pub async fn snapshot(&self) -> ProcessorSnapshot {
        ProcessorSnapshot {
            stats: self.telemetry.stats(),
            queue_size: self.queue_size().await,
            active_workers: self.active_workers(),
        }
    }
}
