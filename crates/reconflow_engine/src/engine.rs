//! Pipeline orchestration: classify files, load sides, clean, join,
//! validate, summarize.
//!
//! The cancel token is observed between phases only; in-flight file reads
//! are never interrupted. The first declared side plays the business role
//! and the second the finance role; an undeclared second side simply joins
//! as empty, leaving every row of the populated side unmatched.

use crate::cancel::CancelToken;
use crate::cleaner;
use crate::error::{EngineError, Warning};
use crate::matcher::FileMatcher;
use crate::matching;
use crate::reader::{self, ReadOptions};
use crate::report::Summary;
use crate::resolver::{self, ResolvedSide};
use crate::schema::Schema;
use crate::validator::{self, Issue};
use std::path::PathBuf;
use tracing::info;

/// Pipeline phases, reported through the progress callback at each
/// boundary (where the cancel flag is also observed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    MatchFiles,
    Read,
    Clean,
    Join,
    Validate,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MatchFiles => "match_files",
            Self::Read => "read",
            Self::Clean => "clean",
            Self::Join => "join",
            Self::Validate => "validate",
        }
    }
}

/// Everything the task layer needs to build and persist the artifact.
#[derive(Debug)]
pub struct ReconcileReport {
    pub summary: Summary,
    pub issues: Vec<Issue>,
    pub rule_version: String,
    pub file_assignments: Vec<(String, Vec<String>)>,
    pub warnings: Vec<Warning>,
}

/// Run the full reconciliation pipeline for one task.
pub fn reconcile(
    schema: &Schema,
    files: &[PathBuf],
    cancel: &CancelToken,
    mut on_phase: impl FnMut(Phase),
) -> Result<ReconcileReport, EngineError> {
    let mut warnings: Vec<Warning> = Vec::new();

    check_cancel(cancel)?;
    on_phase(Phase::MatchFiles);
    let matcher = FileMatcher::new(schema)?;
    let assignments = matcher.assign(files)?;
    let file_assignments = assignments.basenames();

    check_cancel(cancel)?;
    on_phase(Phase::Read);
    let mut sides: Vec<(String, ResolvedSide)> = Vec::new();
    for (side_name, spec) in &schema.sides {
        let options = ReadOptions {
            sheet: spec.sheet.clone(),
        };
        let mut resolved = ResolvedSide::default();
        for path in assignments.files_for(side_name) {
            let table = reader::read(path, &options)?;
            resolved.extend(resolver::resolve(side_name, spec, &schema.key_role, table)?);
        }
        sides.push((side_name.clone(), resolved));
    }

    check_cancel(cancel)?;
    on_phase(Phase::Clean);
    let mut cleaned: Vec<(String, Vec<_>)> = Vec::new();
    for (side_name, resolved) in sides {
        let outcome = cleaner::clean(
            &side_name,
            resolved.rows,
            schema.cleaning_for(&side_name),
            &schema.tolerance,
            &schema.key_role,
        );
        warnings.extend(outcome.warnings);
        cleaned.push((side_name, outcome.rows));
    }

    check_cancel(cancel)?;
    on_phase(Phase::Join);
    let mut cleaned = cleaned.into_iter();
    let business_rows = cleaned.next().map(|(_, rows)| rows).unwrap_or_default();
    let finance_rows = cleaned.next().map(|(_, rows)| rows).unwrap_or_default();
    let total_business = business_rows.len();
    let total_finance = finance_rows.len();
    let match_set = matching::join(
        business_rows,
        finance_rows,
        &schema.key_role,
        schema.tolerance.key_comparator,
    );
    warnings.extend(match_set.warnings.iter().cloned());

    check_cancel(cancel)?;
    on_phase(Phase::Validate);
    let rules = validator::compile_rules(&schema.validations)
        .map_err(|e| EngineError::SchemaInvalid(e.to_string()))?;
    let issues = validator::evaluate(&match_set, &rules, &schema.tolerance, &mut warnings);

    let summary = Summary {
        total_business_records: total_business,
        total_finance_records: total_finance,
        matched_records: match_set.matched_keys,
        unmatched_records: match_set.business_only.len() + match_set.finance_only.len(),
    };

    info!(
        matched = summary.matched_records,
        unmatched = summary.unmatched_records,
        issues = issues.len(),
        warnings = warnings.len(),
        "reconciliation finished"
    );

    Ok(ReconcileReport {
        summary,
        issues,
        rule_version: schema.version.clone(),
        file_assignments,
        warnings,
    })
}

fn check_cancel(cancel: &CancelToken) -> Result<(), EngineError> {
    if cancel.is_canceled() {
        Err(EngineError::Canceled)
    } else {
        Ok(())
    }
}
