//! Batch file upload: materialize opaque inputs to local paths.
//!
//! Each item succeeds or fails on its own; one bad file never aborts its
//! siblings. Stored names are sanitized and either prefixed with a random
//! tag or date-partitioned, per configuration.

use super::{McpTool, ToolContext};
use base64::Engine as _;
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

pub struct FileUploadTool;

#[derive(Debug, Deserialize)]
struct UploadArgs {
    files: Vec<UploadItem>,
}

#[derive(Debug, Deserialize)]
struct UploadItem {
    filename: String,
    /// Raw text content; mutually exclusive with `base64`.
    #[serde(default)]
    data: Option<String>,
    /// Base64-encoded content.
    #[serde(default)]
    base64: Option<String>,
    #[serde(default)]
    size: Option<usize>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    related_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct UploadOutcome {
    filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    related_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl McpTool for FileUploadTool {
    fn name(&self) -> &'static str {
        "file_upload"
    }

    fn description(&self) -> &'static str {
        "Store uploaded files on the server and return their local paths"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "files": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "filename": { "type": "string" },
                            "data": { "type": "string", "description": "Raw text content" },
                            "base64": { "type": "string", "description": "Base64-encoded content" },
                            "size": { "type": "integer" },
                            "mime_type": { "type": "string" },
                            "related_id": { "type": "string" }
                        },
                        "required": ["filename"]
                    }
                }
            },
            "required": ["files"]
        })
    }

    fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<Value> {
        let args: UploadArgs = serde_json::from_value(args)?;
        let results: Vec<UploadOutcome> = args
            .files
            .into_iter()
            .map(|item| store_item(item, ctx))
            .collect();
        Ok(json!({ "results": results }))
    }
}

fn store_item(item: UploadItem, ctx: &ToolContext) -> UploadOutcome {
    let filename = item.filename.clone();
    let related_id = item.related_id.clone();
    match store_bytes(&item, ctx) {
        Ok(path) => {
            info!(file = %filename, path = %path.display(), "stored upload");
            UploadOutcome {
                filename,
                path: Some(path.display().to_string()),
                related_id,
                error: None,
            }
        }
        Err(e) => {
            warn!(file = %filename, error = %e, "upload rejected");
            UploadOutcome {
                filename,
                path: None,
                related_id,
                error: Some(e),
            }
        }
    }
}

fn store_bytes(item: &UploadItem, ctx: &ToolContext) -> Result<PathBuf, String> {
    if !ctx.config.extension_allowed(&item.filename) {
        return Err(format!(
            "UnsupportedType: '{}' is not one of {}",
            item.filename,
            ctx.config.allowed_extensions.join(", ")
        ));
    }

    let bytes = match (&item.data, &item.base64) {
        (Some(text), None) => text.clone().into_bytes(),
        (None, Some(encoded)) => base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| format!("DecodeFailed: {e}"))?,
        (Some(_), Some(_)) => {
            return Err("DecodeFailed: provide either data or base64, not both".to_string())
        }
        (None, None) => return Err("DecodeFailed: no content provided".to_string()),
    };

    if let Some(declared) = item.size {
        if declared != bytes.len() {
            warn!(
                file = %item.filename,
                declared,
                actual = bytes.len(),
                "declared size differs from decoded size"
            );
        }
    }
    if bytes.len() > ctx.config.upload_max_bytes {
        return Err(format!(
            "DecodeFailed: {} bytes exceeds the {} byte limit",
            bytes.len(),
            ctx.config.upload_max_bytes
        ));
    }
    // mime_type is advisory; the extension whitelist gates storage.
    tracing::debug!(file = %item.filename, mime = ?item.mime_type, bytes = bytes.len(), "storing upload");

    let safe_name = sanitize_filename(&item.filename);
    let target = if ctx.config.date_partition_uploads {
        let today = chrono::Utc::now();
        ctx.config
            .upload_dir
            .join(format!("{:04}", today.year()))
            .join(format!("{:02}", today.month()))
            .join(format!("{:02}", today.day()))
            .join(safe_name)
    } else {
        let prefix = Uuid::new_v4().simple().to_string();
        ctx.config
            .upload_dir
            .join(format!("{}_{safe_name}", &prefix[..8]))
    };

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("DecodeFailed: {e}"))?;
    }
    std::fs::write(&target, &bytes).map_err(|e| format!("DecodeFailed: {e}"))?;
    Ok(target)
}

/// Keep only the basename and replace anything outside `[A-Za-z0-9._-]`
/// and CJK characters with underscores.
fn sanitize_filename(filename: &str) -> String {
    let base = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    base.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::tasks::{spawn_executor, TaskRegistry};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> ToolContext {
        let registry = Arc::new(TaskRegistry::new());
        let config = Arc::new(ServerConfig {
            upload_dir: dir.path().join("uploads"),
            upload_max_bytes: 64,
            ..Default::default()
        });
        let (executor, _workers) = spawn_executor(registry.clone(), config.clone());
        ToolContext {
            registry,
            executor,
            config,
        }
    }

    #[test]
    fn stores_raw_and_base64_content() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let encoded = base64::engine::general_purpose::STANDARD.encode("id,v\n2,3\n");
        let result = FileUploadTool
            .execute(
                json!({ "files": [
                    { "filename": "plain.csv", "data": "id,v\n1,2\n" },
                    { "filename": "encoded.csv", "base64": encoded, "related_id": "r-1" }
                ]}),
                &ctx,
            )
            .unwrap();
        let results = result["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        for item in results {
            assert!(item["error"].is_null());
            let path = PathBuf::from(item["path"].as_str().unwrap());
            assert!(path.exists());
        }
        assert_eq!(results[1]["related_id"], "r-1");
    }

    #[test]
    fn one_bad_item_does_not_abort_siblings() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let result = FileUploadTool
            .execute(
                json!({ "files": [
                    { "filename": "ok.csv", "data": "a,b\n1,2\n" },
                    { "filename": "bad.exe", "data": "x" },
                    { "filename": "broken.csv", "base64": "!!!not-base64!!!" }
                ]}),
                &ctx,
            )
            .unwrap();
        let results = result["results"].as_array().unwrap();
        assert!(results[0]["error"].is_null());
        assert!(results[1]["error"]
            .as_str()
            .unwrap()
            .starts_with("UnsupportedType"));
        assert!(results[2]["error"]
            .as_str()
            .unwrap()
            .starts_with("DecodeFailed"));
    }

    #[test]
    fn oversized_upload_is_rejected() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let big = "x".repeat(100);
        let result = FileUploadTool
            .execute(json!({ "files": [{ "filename": "big.csv", "data": big }] }), &ctx)
            .unwrap();
        let error = result["results"][0]["error"].as_str().unwrap();
        assert!(error.contains("exceeds"));
    }

    #[test]
    fn filenames_are_sanitized_and_prefixed() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let result = FileUploadTool
            .execute(
                json!({ "files": [{ "filename": "../../etc/pass wd!.csv", "data": "a\n1\n" }] }),
                &ctx,
            )
            .unwrap();
        let path = PathBuf::from(result["results"][0]["path"].as_str().unwrap());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("pass_wd_.csv"), "got {name}");
        assert!(path.starts_with(dir.path().join("uploads")));
    }

    #[test]
    fn date_partitioning_builds_nested_dirs() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(TaskRegistry::new());
        let config = Arc::new(ServerConfig {
            upload_dir: dir.path().join("uploads"),
            date_partition_uploads: true,
            ..Default::default()
        });
        let (executor, _workers) = spawn_executor(registry.clone(), config.clone());
        let ctx = ToolContext {
            registry,
            executor,
            config,
        };
        let result = FileUploadTool
            .execute(json!({ "files": [{ "filename": "a.csv", "data": "x\n1\n" }] }), &ctx)
            .unwrap();
        let path = PathBuf::from(result["results"][0]["path"].as_str().unwrap());
        let today = chrono::Utc::now();
        assert!(path
            .to_string_lossy()
            .contains(&format!("{:04}", today.year())));
        assert!(path.exists());
    }
}
