//! Error and warning types for the reconciliation pipeline.
//!
//! Fatal errors fail the whole task; warnings are accumulated into the
//! result metadata and the task continues.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Fatal pipeline errors. Any of these fails the task as a whole.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The schema failed validation and cannot be used.
    #[error("invalid schema: {0}")]
    SchemaInvalid(String),

    /// An input file matched no side's file patterns.
    #[error("file not claimed by any side: {0}")]
    FileUnclassified(PathBuf),

    /// A file could not be read or decoded.
    #[error("failed to read {path}: {message}")]
    ReadFailed { path: PathBuf, message: String },

    /// A file contained a header but no data rows (or nothing at all).
    #[error("no data rows in {0}")]
    EmptyFile(PathBuf),

    /// The key role resolved to no column on a side that has data.
    #[error("key role '{role}' not found in the columns of side '{side}'")]
    KeyRoleUnresolved { side: String, role: String },

    /// Cancellation was observed at a phase boundary.
    #[error("reconciliation canceled")]
    Canceled,
}

impl EngineError {
    /// Stable error kind used in task records and tool responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SchemaInvalid(_) => "SchemaInvalid",
            Self::FileUnclassified(_) => "FileUnclassified",
            Self::ReadFailed { .. } => "ReadFailed",
            Self::EmptyFile(_) => "EmptyFile",
            Self::KeyRoleUnresolved { .. } => "KeyRoleUnresolved",
            Self::Canceled => "Canceled",
        }
    }
}

/// Non-fatal degradations recorded in `metadata.warnings`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A cleaning operation could not convert a value, or rows were
    /// discarded for lacking a key value.
    Cleaning { side: String, message: String },

    /// A key value appeared more than once on one side after cleaning.
    DuplicateKey { side: String, key: String, count: usize },

    /// A validation rule failed to evaluate for one candidate.
    Predicate { rule: String, key: String, message: String },
}
