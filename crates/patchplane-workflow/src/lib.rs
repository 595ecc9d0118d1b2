// SPDX-License-Identifier: MIT OR Apache-2.0
//! Sequential Workflow Engine.
//!
//! Executes named workflows whose steps carry explicit data dependencies.
//! A worker walks a request's steps in declaration order; a step whose
//! required dependency is missing from `results` is skipped, which (per
//! the same check) transitively skips anything depending on it. A step
//! handler that returns an error is retried up to `max_retries` times with
//! a fixed one-second delay before the step, and the whole request, is
//! marked failed.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use patchplane_core::Priority;
use patchplane_queue::PriorityQueue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Fixed delay between step retries.
const RETRY_DELAY: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Step / workflow definitions
// ---------------------------------------------------------------------------

/// Whether a step's listed dependencies must have produced a result before
/// the step can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Every listed dependency must be present in `results`, or the step is
    /// skipped.
    Required,
    /// Listed dependencies are passed through if present; their absence
    /// does not prevent the step from running.
    Optional,
}

/// A single step in a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStepDef {
    /// Unique (within the workflow) identifier for this step.
    pub step_id: String,
    /// Human-readable step name.
    pub name: String,
    /// Name of the handler registered for this step (see
    /// [`WorkflowEngine::register_handler`]).
    pub handler_ref: String,
    /// `step_id`s of other steps this one depends on.
    pub dependencies: Vec<String>,
    /// How `dependencies` is enforced.
    pub dependency_type: DependencyKind,
    /// Per-attempt timeout. Not separately enforced by this engine; carried
    /// for handlers that want to honor it themselves.
    pub timeout: Duration,
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
}

impl WorkflowStepDef {
    /// Build a required-dependency step with default timeout (30s) and
    /// retry budget (2).
    #[must_use]
    pub fn new(step_id: impl Into<String>, name: impl Into<String>, handler_ref: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            name: name.into(),
            handler_ref: handler_ref.into(),
            dependencies: Vec::new(),
            dependency_type: DependencyKind::Required,
            timeout: Duration::from_secs(30),
            max_retries: 2,
        }
    }

    /// Set the dependencies this step requires.
    #[must_use]
    pub fn depends_on(mut self, step_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = step_ids.into_iter().map(Into::into).collect();
        self
    }

    /// Override the maximum retry count.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// A named sequence of steps.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    /// Workflow name, as passed to [`WorkflowEngine::submit`].
    pub name: String,
    /// Steps, in declaration order.
    pub steps: Vec<WorkflowStepDef>,
}

/// `webhook_processing`: validate, log, process, update metrics.
#[must_use]
pub fn webhook_processing_workflow() -> WorkflowDefinition {
    WorkflowDefinition {
        name: "webhook_processing".to_string(),
        steps: vec![
            WorkflowStepDef::new("validate", "Validate payload", "validate"),
            WorkflowStepDef::new("log", "Log event", "log").depends_on(["validate"]),
            WorkflowStepDef::new("process", "Process event", "process").depends_on(["validate"]),
            WorkflowStepDef::new("update_metrics", "Update metrics", "update_metrics").depends_on(["process"]),
        ],
    }
}

/// `patch_processing`: validate, backup, apply, verify, update status.
#[must_use]
pub fn patch_processing_workflow() -> WorkflowDefinition {
    WorkflowDefinition {
        name: "patch_processing".to_string(),
        steps: vec![
            WorkflowStepDef::new("validate", "Validate patch", "validate"),
            WorkflowStepDef::new("backup", "Backup target file", "backup").depends_on(["validate"]),
            WorkflowStepDef::new("apply", "Apply patch", "apply").depends_on(["backup"]),
            WorkflowStepDef::new("verify", "Verify applied patch", "verify").depends_on(["apply"]),
            WorkflowStepDef::new("update_status", "Update patch status", "update_status").depends_on(["verify"]),
        ],
    }
}

// ---------------------------------------------------------------------------
// Request state
// ---------------------------------------------------------------------------

/// Lifecycle state of a [`SequentialRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Enqueued, not yet picked up by a worker.
    Pending,
    /// A worker is currently walking its steps.
    Processing,
    /// Every step ran (or had no required dependency missing) and
    /// succeeded.
    Completed,
    /// At least one step was skipped or exhausted its retries.
    Failed,
}

/// One submitted, in-flight or completed workflow invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequentialRequest {
    /// Opaque identifier returned from [`WorkflowEngine::submit`].
    pub request_id: String,
    /// Name of the workflow this request runs.
    pub workflow_name: String,
    /// Steps to execute, in declaration order (a snapshot of the
    /// registered definition at submission time).
    pub steps: Vec<WorkflowStepDef>,
    /// Caller-supplied input data, passed to every step handler.
    pub data: Value,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// When a worker began processing this request.
    pub started_at: Option<DateTime<Utc>>,
    /// When this request reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Current lifecycle state.
    pub status: WorkflowStatus,
    /// Per-step results, keyed by `step_id`.
    pub results: BTreeMap<String, Value>,
    /// Per-step error messages, keyed by `step_id`.
    pub errors: BTreeMap<String, String>,
}

/// Errors returned by [`WorkflowEngine`] operations.
#[derive(Debug)]
pub enum WorkflowError {
    /// No workflow is registered under the given name.
    UnknownWorkflow(String),
    /// The submission queue rejected the request.
    Queue(patchplane_queue::QueueError),
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownWorkflow(name) => write!(f, "unknown workflow: {name}"),
            Self::Queue(e) => write!(f, "queue error: {e}"),
        }
    }
}

impl std::error::Error for WorkflowError {}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// A step handler: given the request's input data and the results produced
/// by steps that have already run, produce this step's result or an error
/// message.
pub type StepHandler = Arc<dyn Fn(&Value, &BTreeMap<String, Value>) -> Result<Value, String> + Send + Sync>;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct EngineState {
    queue: PriorityQueue<SequentialRequest>,
    completed_requests: HashMap<String, SequentialRequest>,
    next_request_seq: u64,
    total_completed: u64,
    avg_processing_time_ms: f64,
}

/// Runs named workflows whose steps have explicit data dependencies.
pub struct WorkflowEngine {
    definitions: HashMap<String, WorkflowDefinition>,
    handlers: HashMap<String, StepHandler>,
    state: Mutex<EngineState>,
}

impl WorkflowEngine {
    /// Build an engine with the two built-in workflow definitions
    /// registered and a bounded submission queue.
    #[must_use]
    pub fn new(max_queue_size: usize) -> Self {
        let mut definitions = HashMap::new();
        for def in [webhook_processing_workflow(), patch_processing_workflow()] {
            definitions.insert(def.name.clone(), def);
        }
        Self {
            definitions,
            handlers: HashMap::new(),
            state: Mutex::new(EngineState {
                queue: PriorityQueue::new(max_queue_size),
                completed_requests: HashMap::new(),
                next_request_seq: 0,
                total_completed: 0,
                avg_processing_time_ms: 0.0,
            }),
        }
    }

    /// Register (or replace) a named workflow definition.
    pub fn register_workflow(&mut self, def: WorkflowDefinition) {
        self.definitions.insert(def.name.clone(), def);
    }

    /// Register (or replace) the handler invoked for steps whose
    /// `handler_ref` equals `name`.
    pub fn register_handler(&mut self, name: impl Into<String>, handler: StepHandler) {
        self.handlers.insert(name.into(), handler);
    }

    /// Submit a workflow invocation. Returns the generated `request_id`.
    pub async fn submit(&self, workflow_name: &str, data: Value, priority: Priority) -> Result<String, WorkflowError> {
        let def = self
            .definitions
            .get(workflow_name)
            .ok_or_else(|| WorkflowError::UnknownWorkflow(workflow_name.to_string()))?;

        let mut state = self.state.lock().await;
        state.next_request_seq += 1;
        let request_id = format!("wf-{}", state.next_request_seq);

        let request = SequentialRequest {
            request_id: request_id.clone(),
            workflow_name: workflow_name.to_string(),
            steps: def.steps.clone(),
            data,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            status: WorkflowStatus::Pending,
            results: BTreeMap::new(),
            errors: BTreeMap::new(),
        };
        state.queue.enqueue(request_id.clone(), priority, request).map_err(WorkflowError::Queue)?;
        Ok(request_id)
    }

    /// Dequeue and fully execute the next pending request, if any.
    ///
    /// Walks the request's steps in declaration order. A step whose
    /// `dependency_type` is [`DependencyKind::Required`] and has a missing
    /// entry in `results` is skipped, recorded as
    /// `"skipped: missing required dependency"` in `errors`, and the whole
    /// request is marked [`WorkflowStatus::Failed`] on completion. A step
    /// handler returning `Err` is retried up to `max_retries` times with a
    /// one-second delay; exhausting retries fails the step and the request.
    pub async fn process_next(&self) -> Option<SequentialRequest> {
        let mut request = {
            let mut state = self.state.lock().await;
            let entry = state.queue.dequeue()?;
            entry.item
        };

        request.status = WorkflowStatus::Processing;
        request.started_at = Some(Utc::now());

        let mut request_failed = false;
        let steps = request.steps.clone();
        for step in &steps {
            let deps_satisfied = match step.dependency_type {
                DependencyKind::Required => step.dependencies.iter().all(|d| request.results.contains_key(d)),
                DependencyKind::Optional => true,
            };

            if !deps_satisfied {
                request
                    .errors
                    .insert(step.step_id.clone(), "skipped: missing required dependency".to_string());
                request_failed = true;
                tracing::warn!(step_id = %step.step_id, request_id = %request.request_id, "step skipped, missing dependency");
                continue;
            }

            let handler = self.handlers.get(&step.handler_ref).cloned();
            let Some(handler) = handler else {
                request.errors.insert(step.step_id.clone(), format!("no handler registered for {}", step.handler_ref));
                request_failed = true;
                continue;
            };

            let mut attempt = 0u32;
            let outcome = loop {
                match handler(&request.data, &request.results) {
                    Ok(value) => break Ok(value),
                    Err(err) => {
                        if attempt >= step.max_retries {
                            break Err(err);
                        }
                        attempt += 1;
                        tracing::warn!(step_id = %step.step_id, attempt, error = %err, "step failed, retrying");
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            };

            match outcome {
                Ok(value) => {
                    request.results.insert(step.step_id.clone(), value);
                }
                Err(err) => {
                    request.errors.insert(step.step_id.clone(), err);
                    request_failed = true;
                }
            }
        }

        request.status = if request_failed { WorkflowStatus::Failed } else { WorkflowStatus::Completed };
        request.completed_at = Some(Utc::now());

        let processing_ms = match (request.started_at, request.completed_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as f64,
            _ => 0.0,
        };

        let mut state = self.state.lock().await;
        state.total_completed += 1;
        state.avg_processing_time_ms +=
            (processing_ms - state.avg_processing_time_ms) / state.total_completed as f64;
        state.completed_requests.insert(request.request_id.clone(), request.clone());

        Some(request)
    }

    /// Return a completed request by id, if known.
    pub async fn completed(&self, request_id: &str) -> Option<SequentialRequest> {
        self.state.lock().await.completed_requests.get(request_id).cloned()
    }

    /// Number of requests still queued.
    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Running average processing time across all completed requests, in
    /// milliseconds.
    pub async fn avg_processing_time_ms(&self) -> f64 {
        self.state.lock().await.avg_processing_time_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_handler() -> StepHandler {
        Arc::new(|_data, _results| Ok(Value::Bool(true)))
    }

    #[tokio::test]
    async fn default_workflows_are_registered() {
        let engine = WorkflowEngine::new(10);
        assert!(engine.definitions.contains_key("webhook_processing"));
        assert!(engine.definitions.contains_key("patch_processing"));
    }

    #[tokio::test]
    async fn submit_unknown_workflow_errors() {
        let engine = WorkflowEngine::new(10);
        let err = engine.submit("nonexistent", Value::Null, Priority::Normal).await.unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownWorkflow(name) if name == "nonexistent"));
    }

    #[tokio::test]
    async fn all_steps_succeed_marks_request_completed() {
        let mut engine = WorkflowEngine::new(10);
        for name in ["validate", "log", "process", "update_metrics"] {
            engine.register_handler(name, ok_handler());
        }
        engine.submit("webhook_processing", Value::Null, Priority::Normal).await.unwrap();
        let result = engine.process_next().await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Completed);
        assert_eq!(result.results.len(), 4);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn missing_handler_skips_dependents_and_fails_request() {
        let mut engine = WorkflowEngine::new(10);
        engine.register_handler("log", ok_handler());
        engine.register_handler("process", ok_handler());
        engine.register_handler("update_metrics", ok_handler());
        // "validate" intentionally left unregistered.
        engine.submit("webhook_processing", Value::Null, Priority::Normal).await.unwrap();
        let result = engine.process_next().await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Failed);
        assert!(result.errors.contains_key("validate"));
        assert_eq!(result.errors["log"], "skipped: missing required dependency");
        assert_eq!(result.errors["process"], "skipped: missing required dependency");
        assert_eq!(result.errors["update_metrics"], "skipped: missing required dependency");
        assert!(result.results.is_empty());
    }

    #[tokio::test]
    async fn step_retries_then_fails_after_exhausting_max_retries() {
        let mut engine = WorkflowEngine::new(10);
        let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        engine.register_handler(
            "validate",
            Arc::new(move |_data, _results| {
                attempts_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err("boom".to_string())
            }),
        );
        engine.register_handler("log", ok_handler());
        engine.register_handler("process", ok_handler());
        engine.register_handler("update_metrics", ok_handler());

        engine.submit("webhook_processing", Value::Null, Priority::Normal).await.unwrap();
        let result = engine.process_next().await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Failed);
        assert_eq!(result.errors["validate"], "boom");
        // default max_retries is 2: first attempt + 2 retries = 3 calls.
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn step_succeeds_after_a_transient_failure() {
        let mut engine = WorkflowEngine::new(10);
        let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        engine.register_handler(
            "validate",
            Arc::new(move |_data, _results| {
                let n = attempts_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n == 0 {
                    Err("transient".to_string())
                } else {
                    Ok(Value::Bool(true))
                }
            }),
        );
        engine.register_handler("log", ok_handler());
        engine.register_handler("process", ok_handler());
        engine.register_handler("update_metrics", ok_handler());

        engine.submit("webhook_processing", Value::Null, Priority::Normal).await.unwrap();
        let result = engine.process_next().await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Completed);
        assert!(result.results.contains_key("validate"));
    }

    #[tokio::test]
    async fn process_next_on_empty_queue_returns_none() {
        let engine = WorkflowEngine::new(10);
        assert!(engine.process_next().await.is_none());
    }

    #[tokio::test]
    async fn completed_requests_are_retrievable_by_id() {
        let mut engine = WorkflowEngine::new(10);
        for name in ["validate", "backup", "apply", "verify", "update_status"] {
            engine.register_handler(name, ok_handler());
        }
        let id = engine.submit("patch_processing", Value::Null, Priority::High).await.unwrap();
        let result = engine.process_next().await.unwrap();
        assert_eq!(result.request_id, id);
        let fetched = engine.completed(&id).await.unwrap();
        assert_eq!(fetched.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn avg_processing_time_updates_after_completion() {
        let mut engine = WorkflowEngine::new(10);
        for name in ["validate", "log", "process", "update_metrics"] {
            engine.register_handler(name, ok_handler());
        }
        engine.submit("webhook_processing", Value::Null, Priority::Normal).await.unwrap();
        engine.process_next().await.unwrap();
        assert!(engine.avg_processing_time_ms().await >= 0.0);
    }

    #[tokio::test]
    async fn patch_processing_steps_are_declared_in_order() {
        let def = patch_processing_workflow();
        let ids: Vec<&str> = def.steps.iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["validate", "backup", "apply", "verify", "update_status"]);
    }

    #[tokio::test]
    async fn queue_len_reflects_pending_submissions() {
        let engine = WorkflowEngine::new(10);
        engine.submit("webhook_processing", Value::Null, Priority::Normal).await.unwrap();
        engine.submit("patch_processing", Value::Null, Priority::Normal).await.unwrap();
        assert_eq!(engine.queue_len().await, 2);
    }
}
