//! Process-level configuration, injected at startup. No ambient globals.

use std::path::PathBuf;

/// Server configuration with the documented defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Service name reported by `initialize` and `/health`.
    pub service_name: String,

    /// Service version reported by `initialize` and `/health`.
    pub service_version: String,

    pub listen_host: String,
    pub listen_port: u16,

    /// Worker pool size for reconciliation tasks.
    pub max_concurrent_tasks: usize,

    /// Per-task wall-clock budget in seconds.
    pub task_timeout_seconds: u64,

    /// Directory for uploaded input files.
    pub upload_dir: PathBuf,

    /// Directory for persisted result artifacts.
    pub results_dir: PathBuf,

    /// Reject uploads larger than this many bytes.
    pub upload_max_bytes: usize,

    /// Lowercase extension whitelist for uploads (leading dot included).
    pub allowed_extensions: Vec<String>,

    /// Store uploads under `<uploads>/<yyyy>/<mm>/<dd>/` instead of using
    /// a random filename prefix.
    pub date_partition_uploads: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            service_name: "reconflow-mcp-server".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            listen_host: "0.0.0.0".to_string(),
            listen_port: 3335,
            max_concurrent_tasks: 5,
            task_timeout_seconds: 3600,
            upload_dir: PathBuf::from("uploads"),
            results_dir: PathBuf::from("results"),
            upload_max_bytes: 100 * 1024 * 1024,
            allowed_extensions: vec![".csv".into(), ".xlsx".into(), ".xls".into()],
            date_partition_uploads: false,
        }
    }
}

impl ServerConfig {
    pub fn extension_allowed(&self, filename: &str) -> bool {
        let lower = filename.to_lowercase();
        self.allowed_extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
    }
}
