//! Reconciliation task tools: start, status, result, list, cancel.

use super::{McpTool, ToolContext};
use crate::tasks::{Task, TaskId, TaskState};
use anyhow::{bail, Result};
use reconflow_engine::matcher::FileMatcher;
use reconflow_engine::Schema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;

// ============================================================================
// reconciliation_start
// ============================================================================

pub struct StartTool;

#[derive(Debug, Deserialize)]
struct StartArgs {
    schema: Value,
    files: Vec<PathBuf>,
    #[serde(default)]
    callback_url: Option<String>,
}

impl McpTool for StartTool {
    fn name(&self) -> &'static str {
        "reconciliation_start"
    }

    fn description(&self) -> &'static str {
        "Start an asynchronous reconciliation task from a schema and a list of uploaded file paths"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "schema": {
                    "type": "object",
                    "description": "Reconciliation schema: sides, field roles, tolerance, cleaning rules, validations"
                },
                "files": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Paths of the input files to reconcile"
                },
                "callback_url": {
                    "type": "string",
                    "description": "Optional URL that receives a POST when the task reaches a terminal state"
                }
            },
            "required": ["schema", "files"]
        })
    }

    fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: StartArgs = serde_json::from_value(args)?;

        // Schema problems surface synchronously, before a task exists.
        let schema = Schema::from_value(args.schema)?;

        for file in &args.files {
            if !file.exists() {
                bail!("file does not exist: {}", file.display());
            }
        }
        // Classification problems also surface synchronously; the pipeline
        // re-runs the assignment when the task executes.
        FileMatcher::new(&schema)?.assign(&args.files)?;

        let task = Task::new(schema, args.files, args.callback_url);
        let id = ctx.registry.insert(task);
        ctx.executor.enqueue(id.clone())?;
        info!(task = %id, "reconciliation task created");

        Ok(json!({ "task_id": id.to_string(), "status": "pending" }))
    }
}

// ============================================================================
// reconciliation_status
// ============================================================================

pub struct StatusTool;

#[derive(Debug, Deserialize)]
struct TaskIdArgs {
    task_id: String,
}

#[derive(Debug, Serialize)]
struct StatusResult {
    task_id: String,
    status: String,
    created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<ProgressInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProgressInfo {
    phase: String,
}

impl McpTool for StatusTool {
    fn name(&self) -> &'static str {
        "reconciliation_status"
    }

    fn description(&self) -> &'static str {
        "Get the state of a reconciliation task"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "string" }
            },
            "required": ["task_id"]
        })
    }

    fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: TaskIdArgs = serde_json::from_value(args)?;
        let id = TaskId::from_string(&args.task_id);
        let Some(snapshot) = ctx.registry.snapshot(&id) else {
            bail!("TaskNotFound: {}", args.task_id);
        };

        let (progress, error) = match &snapshot.state {
            TaskState::Running { phase, .. } => (
                phase.as_ref().map(|p| ProgressInfo { phase: p.clone() }),
                None,
            ),
            TaskState::Failed { error, .. } => (None, Some(error.clone())),
            TaskState::Canceled { error, .. } => (None, error.clone()),
            _ => (None, None),
        };

        Ok(serde_json::to_value(StatusResult {
            task_id: args.task_id,
            status: snapshot.state.status_str().to_string(),
            created_at: snapshot.created_at.to_rfc3339(),
            progress,
            error,
        })?)
    }
}

// ============================================================================
// reconciliation_result
// ============================================================================

pub struct ResultTool;

impl McpTool for ResultTool {
    fn name(&self) -> &'static str {
        "reconciliation_result"
    }

    fn description(&self) -> &'static str {
        "Fetch the result artifact of a completed reconciliation task"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "string" }
            },
            "required": ["task_id"]
        })
    }

    fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: TaskIdArgs = serde_json::from_value(args)?;
        let id = TaskId::from_string(&args.task_id);
        let Some(snapshot) = ctx.registry.snapshot(&id) else {
            bail!("TaskNotFound: {}", args.task_id);
        };

        match snapshot.state {
            TaskState::Completed { .. } => {}
            TaskState::Failed { error, .. } => {
                bail!("TaskIncomplete: task failed: {error}")
            }
            other => bail!("TaskIncomplete: task is {}", other.status_str()),
        }

        match ctx.registry.artifact(&id) {
            Some(artifact) => Ok(serde_json::to_value(artifact)?),
            None => bail!("TaskIncomplete: artifact not available"),
        }
    }
}

// ============================================================================
// reconciliation_list_tasks
// ============================================================================

pub struct ListTasksTool;

impl McpTool for ListTasksTool {
    fn name(&self) -> &'static str {
        "reconciliation_list_tasks"
    }

    fn description(&self) -> &'static str {
        "List all reconciliation tasks, newest first"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<Value> {
        let tasks: Vec<Value> = ctx
            .registry
            .list()
            .into_iter()
            .map(|t| {
                json!({
                    "task_id": t.id.to_string(),
                    "status": t.state.status_str(),
                    "created_at": t.created_at.to_rfc3339(),
                })
            })
            .collect();
        Ok(json!({ "tasks": tasks }))
    }
}

// ============================================================================
// reconciliation_cancel
// ============================================================================

pub struct CancelTool;

impl McpTool for CancelTool {
    fn name(&self) -> &'static str {
        "reconciliation_cancel"
    }

    fn description(&self) -> &'static str {
        "Request cancellation of a pending or running reconciliation task"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "string" }
            },
            "required": ["task_id"]
        })
    }

    fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let args: TaskIdArgs = serde_json::from_value(args)?;
        let id = TaskId::from_string(&args.task_id);
        if !ctx.executor.cancel(&id) {
            bail!("TaskNotFound: {}", args.task_id);
        }
        let status = ctx
            .registry
            .snapshot(&id)
            .map(|s| s.state.status_str().to_string())
            .unwrap_or_else(|| "canceled".to_string());
        Ok(json!({ "task_id": args.task_id, "status": status }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::tasks::{spawn_executor, TaskRegistry};
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn context(results_dir: PathBuf) -> ToolContext {
        let registry = Arc::new(TaskRegistry::new());
        let config = Arc::new(ServerConfig {
            results_dir,
            max_concurrent_tasks: 2,
            ..Default::default()
        });
        let (executor, _workers) = spawn_executor(registry.clone(), config.clone());
        ToolContext {
            registry,
            executor,
            config,
        }
    }

    fn schema_value() -> Value {
        json!({
            "version": "1.0",
            "sides": {
                "business": { "file_pattern": "*business*", "field_roles": { "order_id": "id", "amount": "amount" } },
                "finance": { "file_pattern": "*finance*", "field_roles": { "order_id": "id", "amount": "amount" } }
            },
            "key_role": "order_id"
        })
    }

    fn wait_completed(ctx: &ToolContext, task_id: &str) {
        for _ in 0..200 {
            let status = StatusTool
                .execute(json!({ "task_id": task_id }), ctx)
                .unwrap();
            if status["status"] == "completed" {
                return;
            }
            assert_ne!(status["status"], "failed", "task failed: {status}");
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("task never completed");
    }

    #[test]
    fn start_status_result_flow() {
        let dir = TempDir::new().unwrap();
        let biz = dir.path().join("business.csv");
        let fin = dir.path().join("finance.csv");
        fs::write(&biz, "id,amount\nA001,5\n").unwrap();
        fs::write(&fin, "id,amount\nA001,5\n").unwrap();
        let ctx = context(dir.path().join("results"));

        let started = StartTool
            .execute(
                json!({ "schema": schema_value(), "files": [biz, fin] }),
                &ctx,
            )
            .unwrap();
        assert_eq!(started["status"], "pending");
        let task_id = started["task_id"].as_str().unwrap().to_string();

        wait_completed(&ctx, &task_id);

        let artifact = ResultTool
            .execute(json!({ "task_id": task_id }), &ctx)
            .unwrap();
        assert_eq!(artifact["status"], "completed");
        assert_eq!(artifact["summary"]["matched_records"], 1);
        assert_eq!(artifact["metadata"]["rule_version"], "1.0");

        let listed = ListTasksTool.execute(json!({}), &ctx).unwrap();
        assert_eq!(listed["tasks"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn invalid_schema_fails_synchronously() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path().join("results"));
        let err = StartTool
            .execute(json!({ "schema": { "version": "1.0" }, "files": [] }), &ctx)
            .unwrap_err();
        assert!(err.to_string().contains("schema"));
    }

    #[test]
    fn unclassified_file_fails_synchronously() {
        let dir = TempDir::new().unwrap();
        let stray = dir.path().join("stray.csv");
        fs::write(&stray, "id\nA\n").unwrap();
        let ctx = context(dir.path().join("results"));
        let err = StartTool
            .execute(json!({ "schema": schema_value(), "files": [stray] }), &ctx)
            .unwrap_err();
        assert!(err.to_string().contains("not claimed"));
    }

    #[test]
    fn missing_file_fails_synchronously() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path().join("results"));
        let err = StartTool
            .execute(
                json!({ "schema": schema_value(), "files": ["/no/such/business.csv"] }),
                &ctx,
            )
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn status_and_result_of_unknown_task() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path().join("results"));
        let err = StatusTool
            .execute(json!({ "task_id": "nope" }), &ctx)
            .unwrap_err();
        assert!(err.to_string().contains("TaskNotFound"));
        let err = ResultTool
            .execute(json!({ "task_id": "nope" }), &ctx)
            .unwrap_err();
        assert!(err.to_string().contains("TaskNotFound"));
    }

    #[test]
    fn result_of_incomplete_task_is_an_error() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path().join("results"));
        let task = Task::new(
            Schema::from_value(schema_value()).unwrap(),
            vec![],
            None,
        );
        let id = ctx.registry.insert(task);
        let err = ResultTool
            .execute(json!({ "task_id": id.to_string() }), &ctx)
            .unwrap_err();
        assert!(err.to_string().contains("TaskIncomplete"));
    }
}
