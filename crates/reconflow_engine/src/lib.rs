//! Reconflow engine: schema-driven reconciliation of two-sided tabular
//! records.
//!
//! The pipeline, in order:
//!
//! 1. [`matcher`] assigns each input file to a declared side by pattern.
//! 2. [`reader`] decodes delimited/spreadsheet files into raw row tables.
//! 3. [`resolver`] maps source headers to canonical roles via alias lists.
//! 4. [`cleaner`] applies per-side conversions and grouped aggregation.
//! 5. [`matching`] joins both sides on the key role.
//! 6. [`validator`] evaluates predicate rules and emits typed issues.
//! 7. [`report`] shapes the persisted result artifact.
//!
//! [`engine::reconcile`] drives the phases with cooperative cancellation at
//! each boundary. The crate performs no network I/O; the task service
//! around it lives in `reconflow_mcp`.

pub mod cancel;
pub mod cleaner;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod matching;
pub mod predicate;
pub mod reader;
pub mod report;
pub mod resolver;
pub mod schema;
pub mod validator;
pub mod value;

pub use cancel::CancelToken;
pub use engine::{reconcile, Phase, ReconcileReport};
pub use error::{EngineError, Warning};
pub use report::{Artifact, Metadata, Summary};
pub use schema::{Schema, SideSpec, Tolerance, ValidationRule};
pub use validator::Issue;
pub use value::CellValue;
