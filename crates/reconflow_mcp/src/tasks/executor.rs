//! Background worker pool for reconciliation tasks.
//!
//! A fixed number of worker threads consume a shared queue of task ids.
//! Each worker runs one task's pipeline to completion, updates the
//! registry under its lock, and fires the completion callback outside any
//! lock. Cancellation is cooperative: the engine observes the task's
//! cancel token at phase boundaries, and the wall-clock budget is checked
//! at the same points.
//!
//! # Lock invariant
//!
//! The `cancels` map lock is held only for O(1) insert/remove/get, never
//! across I/O. The token itself is a lock-free atomic.

use super::{TaskId, TaskRegistry};
use crate::config::ServerConfig;
use anyhow::{Context, Result};
use reconflow_engine::{engine, Artifact, CancelToken, EngineError, Metadata};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Callback retry schedule: immediate, then 5s, then 30s.
const CALLBACK_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(0),
    Duration::from_secs(5),
    Duration::from_secs(30),
];

/// Handle used by tools to enqueue and cancel tasks. Clone freely.
#[derive(Clone)]
pub struct TaskExecutorHandle {
    tx: Sender<TaskId>,
    cancels: Arc<Mutex<HashMap<TaskId, CancelToken>>>,
    registry: Arc<TaskRegistry>,
}

impl TaskExecutorHandle {
    /// Queue a pending task for execution.
    pub fn enqueue(&self, id: TaskId) -> Result<()> {
        let mut cancels = self.cancels.lock().expect("cancel map lock poisoned");
        cancels.insert(id.clone(), CancelToken::new());
        drop(cancels);
        self.tx.send(id.clone()).context("executor queue closed")?;
        debug!(task = %id, "enqueued task");
        Ok(())
    }

    /// Request cancellation. Pending tasks transition immediately; running
    /// tasks stop at their next phase boundary. Idempotent. Returns false
    /// only for unknown task ids.
    pub fn cancel(&self, id: &TaskId) -> bool {
        let token = {
            let cancels = self.cancels.lock().expect("cancel map lock poisoned");
            cancels.get(id).cloned()
        };
        if let Some(token) = &token {
            token.cancel();
        }
        // A task still pending will never reach a phase boundary, so the
        // transition happens here; the worker skips it when popped.
        let known = self.registry.transition(id, |task| {
            if matches!(task.state, super::TaskState::Pending) {
                task.cancel(None);
            }
        });
        if known || token.is_some() {
            info!(task = %id, "cancel requested");
            true
        } else {
            false
        }
    }

    fn token_for(&self, id: &TaskId) -> Option<CancelToken> {
        let cancels = self.cancels.lock().expect("cancel map lock poisoned");
        cancels.get(id).cloned()
    }

    fn forget(&self, id: &TaskId) {
        let mut cancels = self.cancels.lock().expect("cancel map lock poisoned");
        cancels.remove(id);
    }
}

/// Spawn the worker pool. Returns the shared handle; worker threads run
/// for the life of the process.
pub fn spawn_executor(
    registry: Arc<TaskRegistry>,
    config: Arc<ServerConfig>,
) -> (TaskExecutorHandle, Vec<JoinHandle<()>>) {
    let (tx, rx) = mpsc::channel::<TaskId>();
    let rx = Arc::new(Mutex::new(rx));
    let handle = TaskExecutorHandle {
        tx,
        cancels: Arc::new(Mutex::new(HashMap::new())),
        registry: registry.clone(),
    };

    let mut workers = Vec::with_capacity(config.max_concurrent_tasks);
    for worker_id in 0..config.max_concurrent_tasks.max(1) {
        let rx = rx.clone();
        let handle = handle.clone();
        let registry = registry.clone();
        let config = config.clone();
        let thread = thread::Builder::new()
            .name(format!("recon-worker-{worker_id}"))
            .spawn(move || worker_loop(worker_id, rx, handle, registry, config))
            .expect("failed to spawn worker thread");
        workers.push(thread);
    }

    (handle, workers)
}

fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<Receiver<TaskId>>>,
    handle: TaskExecutorHandle,
    registry: Arc<TaskRegistry>,
    config: Arc<ServerConfig>,
) {
    debug!(worker_id, "worker started");
    loop {
        let task_id = {
            let rx = rx.lock().expect("task queue lock poisoned");
            match rx.recv() {
                Ok(id) => id,
                // Queue sender dropped: server shutting down.
                Err(_) => break,
            }
        };
        run_task(&task_id, &handle, &registry, &config);
        handle.forget(&task_id);
    }
    debug!(worker_id, "worker exiting");
}

fn run_task(
    id: &TaskId,
    handle: &TaskExecutorHandle,
    registry: &TaskRegistry,
    config: &ServerConfig,
) {
    // Canceled while still queued, or removed.
    let Some(snapshot) = registry.snapshot(id) else {
        return;
    };
    if snapshot.state.is_terminal() {
        debug!(task = %id, status = snapshot.state.status_str(), "skipping terminal task");
        // A task canceled before it ever ran still owes its callback; this
        // is the only time the worker sees it.
        if let super::TaskState::Canceled { error, .. } = &snapshot.state {
            if let Some((_, _, Some(url))) = registry.work_for(id) {
                let payload = json!({
                    "task_id": id.to_string(),
                    "status": "canceled",
                    "summary": Option::<reconflow_engine::Summary>::None,
                    "error": error,
                });
                send_callback(&url, &payload);
            }
        }
        return;
    }
    let Some((schema, files, callback_url)) = registry.work_for(id) else {
        return;
    };
    let token = handle.token_for(id).unwrap_or_default();

    registry.transition(id, |task| task.start());
    info!(task = %id, files = files.len(), "task started");

    let deadline = Instant::now() + Duration::from_secs(config.task_timeout_seconds);
    let timed_out = AtomicBool::new(false);
    let result = engine::reconcile(&schema, &files, &token, |phase| {
        if Instant::now() >= deadline && !token.is_canceled() {
            warn!(task = %id, "wall-clock budget exceeded, canceling");
            timed_out.store(true, Ordering::SeqCst);
            token.cancel();
        }
        registry.transition(id, |task| task.set_phase(phase.name()));
    });

    let (status, summary, error) = match result {
        Ok(report) => {
            let artifact = Artifact {
                task_id: id.to_string(),
                status: "completed".to_string(),
                summary: report.summary.clone(),
                issues: report.issues,
                metadata: Metadata {
                    rule_version: report.rule_version,
                    processed_at: chrono::Utc::now().to_rfc3339(),
                    file_assignments: report.file_assignments,
                    warnings: report.warnings,
                },
            };
            if let Err(e) = artifact.persist(&config.results_dir) {
                // The in-memory record still carries the result.
                error!(task = %id, error = %e, "failed to persist artifact");
            }
            let summary = artifact.summary.clone();
            registry.transition(id, |task| task.complete(artifact));
            info!(task = %id, "task completed");
            ("completed", Some(summary), None)
        }
        Err(EngineError::Canceled) => {
            let error = timed_out
                .load(Ordering::SeqCst)
                .then(|| "TimedOut".to_string());
            registry.transition(id, |task| task.cancel(error.clone()));
            info!(task = %id, timed_out = error.is_some(), "task canceled");
            ("canceled", None, error)
        }
        Err(e) => {
            let message = format!("{}: {e}", e.kind());
            registry.transition(id, |task| task.fail(message.clone()));
            warn!(task = %id, error = %message, "task failed");
            ("failed", None, Some(message))
        }
    };

    // Callback fires outside the registry lock, after the terminal
    // transition is visible to pollers.
    if let Some(url) = callback_url {
        let payload = json!({
            "task_id": id.to_string(),
            "status": status,
            "summary": summary,
            "error": error,
        });
        send_callback(&url, &payload);
    }
}

/// POST the completion envelope, retrying per the schedule. Failures are
/// logged and never alter task state.
fn send_callback(url: &str, payload: &serde_json::Value) {
    let client = match reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            error!(url, error = %e, "callback client construction failed");
            return;
        }
    };

    for (attempt, delay) in CALLBACK_RETRY_DELAYS.iter().enumerate() {
        if !delay.is_zero() {
            thread::sleep(*delay);
        }
        match client.post(url).json(payload).send() {
            Ok(response) if response.status().is_success() => {
                info!(url, attempt, "callback delivered");
                return;
            }
            Ok(response) => {
                warn!(url, attempt, status = %response.status(), "callback rejected");
            }
            Err(e) => {
                warn!(url, attempt, error = %e, "callback attempt failed");
            }
        }
    }
    error!(url, "callback failed after {} attempts", CALLBACK_RETRY_DELAYS.len());
}
