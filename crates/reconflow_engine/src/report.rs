//! Result artifact: summary counts, issue list and run metadata.

use crate::error::Warning;
use crate::validator::Issue;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub total_business_records: usize,
    pub total_finance_records: usize,
    pub matched_records: usize,
    pub unmatched_records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub rule_version: String,
    /// RFC 3339 timestamp of when the pipeline finished.
    pub processed_at: String,
    /// Side name -> basenames of the files assigned to it, serialized as
    /// an object keyed by side in declaration order.
    #[serde(
        serialize_with = "crate::schema::serialize_pairs",
        deserialize_with = "crate::schema::deserialize_pairs"
    )]
    pub file_assignments: Vec<(String, Vec<String>)>,
    pub warnings: Vec<Warning>,
}

/// The persisted reconciliation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub task_id: String,
    pub status: String,
    pub summary: Summary,
    pub issues: Vec<Issue>,
    pub metadata: Metadata,
}

impl Artifact {
    /// Write to `<dir>/<task_id>.json`, creating the directory if needed.
    pub fn persist(&self, dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", self.task_id));
        let mut file = std::fs::File::create(&path)?;
        serde_json::to_writer_pretty(&mut file, self)?;
        file.flush()?;
        Ok(path)
    }

    pub fn load(dir: &Path, task_id: &str) -> std::io::Result<Self> {
        let path = dir.join(format!("{task_id}.json"));
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn artifact_round_trips_through_disk() {
        let artifact = Artifact {
            task_id: "t-1".into(),
            status: "completed".into(),
            summary: Summary {
                total_business_records: 2,
                total_finance_records: 2,
                matched_records: 2,
                unmatched_records: 0,
            },
            issues: vec![],
            metadata: Metadata {
                rule_version: "1.0".into(),
                processed_at: "2025-01-01T00:00:00+00:00".into(),
                file_assignments: vec![("business".into(), vec!["biz.csv".into()])],
                warnings: vec![],
            },
        };
        let dir = TempDir::new().unwrap();
        let path = artifact.persist(dir.path()).unwrap();
        assert!(path.ends_with("t-1.json"));
        let loaded = Artifact::load(dir.path(), "t-1").unwrap();
        assert_eq!(loaded.summary, artifact.summary);
        assert_eq!(loaded.status, "completed");
    }
}
