//! Reconflow MCP server binary.
//!
//! Usage:
//!     reconflow-mcp --host 0.0.0.0 --port 3335 --uploads ./uploads --results ./results

use clap::Parser;
use reconflow_mcp::server::{router, AppState};
use reconflow_mcp::tasks::{spawn_executor, TaskRegistry};
use reconflow_mcp::tools::{ToolContext, ToolRegistry};
use reconflow_mcp::ServerConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "reconflow-mcp", about = "Reconciliation MCP server over SSE")]
struct Args {
    /// Bind address
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Bind port
    #[arg(long, default_value_t = 3335)]
    port: u16,

    /// Directory for uploaded input files
    #[arg(long, default_value = "uploads")]
    uploads: PathBuf,

    /// Directory for persisted result artifacts
    #[arg(long, default_value = "results")]
    results: PathBuf,

    /// Worker pool size
    #[arg(long, default_value_t = 5)]
    max_concurrent_tasks: usize,

    /// Per-task wall-clock budget in seconds
    #[arg(long, default_value_t = 3600)]
    task_timeout_seconds: u64,

    /// Maximum upload size in bytes
    #[arg(long, default_value_t = 100 * 1024 * 1024)]
    upload_max_bytes: usize,

    /// Partition uploads by date instead of random prefixes
    #[arg(long)]
    date_partition_uploads: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reconflow_mcp=info,reconflow_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Arc::new(ServerConfig {
        listen_host: args.host,
        listen_port: args.port,
        upload_dir: args.uploads,
        results_dir: args.results,
        max_concurrent_tasks: args.max_concurrent_tasks,
        task_timeout_seconds: args.task_timeout_seconds,
        upload_max_bytes: args.upload_max_bytes,
        date_partition_uploads: args.date_partition_uploads,
        ..Default::default()
    });

    std::fs::create_dir_all(&config.upload_dir)?;
    std::fs::create_dir_all(&config.results_dir)?;

    let registry = Arc::new(TaskRegistry::new());
    let (executor, _workers) = spawn_executor(registry.clone(), config.clone());
    let tool_ctx = ToolContext {
        registry,
        executor,
        config: config.clone(),
    };
    let state = AppState::new(config.clone(), Arc::new(ToolRegistry::new()), tool_ctx);

    let addr = format!("{}:{}", config.listen_host, config.listen_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        addr,
        workers = config.max_concurrent_tasks,
        "reconflow MCP server listening (endpoints: /events, /messages, /health)"
    );

    axum::serve(listener, router(state)).await?;
    Ok(())
}
