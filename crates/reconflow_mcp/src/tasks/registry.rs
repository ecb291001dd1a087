//! In-process task registry.
//!
//! The single lock is held only for registry reads and state transitions,
//! never across file I/O, pipeline work or callbacks.

use super::{Task, TaskId, TaskState};
use chrono::{DateTime, Utc};
use reconflow_engine::{Artifact, Schema};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// A cheap view of one task for status/list responses.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<TaskId, Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task: Task) -> TaskId {
        let id = task.id.clone();
        let mut tasks = self.tasks.lock().expect("task registry lock poisoned");
        tasks.insert(id.clone(), task);
        id
    }

    pub fn snapshot(&self, id: &TaskId) -> Option<TaskSnapshot> {
        let tasks = self.tasks.lock().expect("task registry lock poisoned");
        tasks.get(id).map(|t| TaskSnapshot {
            id: t.id.clone(),
            state: t.state.clone(),
            created_at: t.created_at,
        })
    }

    /// List snapshots, newest first.
    pub fn list(&self) -> Vec<TaskSnapshot> {
        let tasks = self.tasks.lock().expect("task registry lock poisoned");
        let mut all: Vec<TaskSnapshot> = tasks
            .values()
            .map(|t| TaskSnapshot {
                id: t.id.clone(),
                state: t.state.clone(),
                created_at: t.created_at,
            })
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.0.cmp(&b.id.0)));
        all
    }

    /// The work description a worker needs, without holding the lock while
    /// the pipeline runs.
    pub fn work_for(&self, id: &TaskId) -> Option<(Schema, Vec<PathBuf>, Option<String>)> {
        let tasks = self.tasks.lock().expect("task registry lock poisoned");
        tasks
            .get(id)
            .map(|t| (t.schema.clone(), t.files.clone(), t.callback_url.clone()))
    }

    pub fn artifact(&self, id: &TaskId) -> Option<Artifact> {
        let tasks = self.tasks.lock().expect("task registry lock poisoned");
        tasks.get(id).and_then(|t| t.artifact.clone())
    }

    /// Apply a state transition under the lock.
    pub fn transition(&self, id: &TaskId, apply: impl FnOnce(&mut Task)) -> bool {
        let mut tasks = self.tasks.lock().expect("task registry lock poisoned");
        match tasks.get_mut(id) {
            Some(task) => {
                apply(task);
                true
            }
            None => false,
        }
    }

    /// Drop a task record entirely (artifacts on disk are untouched).
    pub fn remove(&self, id: &TaskId) -> bool {
        let mut tasks = self.tasks.lock().expect("task registry lock poisoned");
        tasks.remove(id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task() -> Task {
        let schema = Schema::from_value(json!({
            "version": "1.0",
            "sides": {
                "business": { "file_pattern": "*biz*", "field_roles": { "order_id": "id" } },
                "finance": { "file_pattern": "*fin*", "field_roles": { "order_id": "id" } }
            },
            "key_role": "order_id"
        }))
        .unwrap();
        Task::new(schema, vec![], None)
    }

    #[test]
    fn insert_snapshot_list() {
        let registry = TaskRegistry::new();
        let id_a = registry.insert(task());
        let id_b = registry.insert(task());

        assert_eq!(registry.snapshot(&id_a).unwrap().id, id_a);
        assert!(registry.snapshot(&TaskId::from_string("missing")).is_none());

        let listed = registry.list();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|t| t.id == id_b));
    }

    #[test]
    fn transition_under_lock() {
        let registry = TaskRegistry::new();
        let id = registry.insert(task());
        assert!(registry.transition(&id, |t| t.start()));
        assert_eq!(registry.snapshot(&id).unwrap().state.status_str(), "running");
        assert!(!registry.transition(&TaskId::from_string("missing"), |t| t.start()));
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = TaskRegistry::new();
        let id = registry.insert(task());
        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
    }
}
