//! Reconflow MCP server.
//!
//! Exposes the reconciliation engine as a long-running task service over
//! an SSE-based MCP transport:
//!
//! - `reconciliation_start` - create a task, returns immediately
//! - `reconciliation_status` - poll state and phase progress
//! - `reconciliation_result` - fetch the completed artifact
//! - `reconciliation_list_tasks` - enumerate known tasks
//! - `reconciliation_cancel` - cooperative cancellation
//! - `file_upload` - materialize inputs to server-local paths
//!
//! Tasks run on a bounded worker pool ([`tasks`]); results persist as JSON
//! artifacts; terminal states optionally POST a callback envelope.

pub mod config;
pub mod protocol;
pub mod server;
pub mod tasks;
pub mod tools;

pub use config::ServerConfig;
pub use server::{router, AppState};
