//! Data cleaning: per-side numeric conversions, date parsing and grouped
//! aggregation.
//!
//! Field transforms run in declaration order; aggregation always runs last.
//! Rows whose key role is null (or blank) after the transforms are
//! discarded with a warning rather than failing the task.

use crate::error::Warning;
use crate::schema::{AggregateFn, CleaningOp, Tolerance};
use crate::value::CellValue;
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::warn;

type Row = HashMap<String, CellValue>;

/// Cleaned rows plus any degradation warnings.
#[derive(Debug, Default)]
pub struct CleanOutcome {
    pub rows: Vec<Row>,
    pub warnings: Vec<Warning>,
}

/// Apply a side's cleaning directives.
pub fn clean(
    side: &str,
    mut rows: Vec<Row>,
    ops: &[CleaningOp],
    tolerance: &Tolerance,
    key_role: &str,
) -> CleanOutcome {
    let mut warnings = Vec::new();

    for op in ops {
        match op {
            CleaningOp::DivideBy100 { fields } => {
                convert_amounts(side, &mut rows, fields, &mut warnings, |v| {
                    CellValue::Str(format!("{:.2}", v / 100.0))
                });
            }
            CleaningOp::MultiplyBy { fields, factor } => {
                let factor = *factor;
                convert_amounts(side, &mut rows, fields, &mut warnings, move |v| {
                    CellValue::Num(v * factor)
                });
            }
            CleaningOp::TrimWhitespace { fields } => {
                for row in &mut rows {
                    for field in fields {
                        if let Some(CellValue::Str(s)) = row.get_mut(field) {
                            *s = s.trim().to_string();
                        }
                    }
                }
            }
            CleaningOp::DateParse { fields } => {
                parse_dates(side, &mut rows, fields, &tolerance.date_format, &mut warnings);
            }
            // Deferred below so it always sees fully transformed rows.
            CleaningOp::AggregateDuplicates { .. } => {}
        }
    }

    discard_keyless(side, &mut rows, key_role, &mut warnings);

    for op in ops {
        if let CleaningOp::AggregateDuplicates { group_by, aggregations } = op {
            rows = aggregate(rows, group_by, aggregations);
        }
    }

    CleanOutcome { rows, warnings }
}

fn convert_amounts(
    side: &str,
    rows: &mut [Row],
    fields: &[String],
    warnings: &mut Vec<Warning>,
    convert: impl Fn(f64) -> CellValue,
) {
    for field in fields {
        let mut failed = 0usize;
        for row in rows.iter_mut() {
            let Some(cell) = row.get_mut(field) else { continue };
            if cell.is_null() {
                continue;
            }
            match cell.as_f64() {
                Some(v) => *cell = convert(v),
                None => {
                    failed += 1;
                    *cell = CellValue::Null;
                }
            }
        }
        if failed > 0 {
            warn!(side, field, failed, "amount conversion produced nulls");
            warnings.push(Warning::Cleaning {
                side: side.to_string(),
                message: format!("{failed} value(s) in '{field}' were not numeric and became null"),
            });
        }
    }
}

fn parse_dates(
    side: &str,
    rows: &mut [Row],
    fields: &[String],
    format: &str,
    warnings: &mut Vec<Warning>,
) {
    for field in fields {
        let mut failed = 0usize;
        for row in rows.iter_mut() {
            let Some(cell) = row.get_mut(field) else { continue };
            let Some(text) = cell.trimmed() else { continue };
            match NaiveDate::parse_from_str(&text, format) {
                Ok(date) => *cell = CellValue::Date(date),
                Err(_) => {
                    failed += 1;
                    *cell = CellValue::Null;
                }
            }
        }
        if failed > 0 {
            warnings.push(Warning::Cleaning {
                side: side.to_string(),
                message: format!(
                    "{failed} value(s) in '{field}' did not match date format '{format}' and became null"
                ),
            });
        }
    }
}

fn discard_keyless(side: &str, rows: &mut Vec<Row>, key_role: &str, warnings: &mut Vec<Warning>) {
    let before = rows.len();
    rows.retain(|row| {
        row.get(key_role)
            .and_then(|v| v.trimmed())
            .map(|k| !k.is_empty())
            .unwrap_or(false)
    });
    let dropped = before - rows.len();
    if dropped > 0 {
        warn!(side, dropped, key_role, "discarded rows without a key value");
        warnings.push(Warning::Cleaning {
            side: side.to_string(),
            message: format!("discarded {dropped} row(s) with no value for key role '{key_role}'"),
        });
    }
}

/// Group rows by the given role and combine every other field. Fields with
/// no declared aggregation default to `first`.
fn aggregate(
    rows: Vec<Row>,
    group_by: &str,
    aggregations: &HashMap<String, AggregateFn>,
) -> Vec<Row> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<Row>> = HashMap::new();
    for row in rows {
        let key = row
            .get(group_by)
            .and_then(|v| v.trimmed())
            .unwrap_or_default();
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(row);
    }

    order
        .into_iter()
        .map(|key| {
            let members = groups.remove(&key).expect("group recorded in order");
            let mut combined: Row = HashMap::new();
            let fields: Vec<String> = members
                .iter()
                .flat_map(|r| r.keys().cloned())
                .collect::<std::collections::BTreeSet<_>>()
                .into_iter()
                .collect();
            for field in fields {
                if field == group_by {
                    continue;
                }
                let func = aggregations.get(&field).unwrap_or(&AggregateFn::First);
                let value = combine(&members, &field, func);
                combined.insert(field, value);
            }
            // The group key survives as the first member's original value.
            let key_value = members[0]
                .get(group_by)
                .cloned()
                .unwrap_or(CellValue::Null);
            combined.insert(group_by.to_string(), key_value);
            combined
        })
        .collect()
}

fn combine(members: &[Row], field: &str, func: &AggregateFn) -> CellValue {
    let cells: Vec<&CellValue> = members
        .iter()
        .map(|r| r.get(field).unwrap_or(&CellValue::Null))
        .collect();
    match func {
        AggregateFn::First => first_non_null(&cells),
        AggregateFn::Last => cells
            .iter()
            .rev()
            .find(|c| !c.is_null())
            .map(|c| (*c).clone())
            .unwrap_or(CellValue::Null),
        AggregateFn::Count => CellValue::Num(members.len() as f64),
        AggregateFn::Sum => {
            let total: f64 = cells.iter().filter_map(|c| c.as_f64()).sum();
            CellValue::Num(total)
        }
        AggregateFn::Mean => {
            let numbers: Vec<f64> = cells.iter().filter_map(|c| c.as_f64()).collect();
            if numbers.is_empty() {
                CellValue::Null
            } else {
                CellValue::Num(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        AggregateFn::Max => extremum(&cells, true),
        AggregateFn::Min => extremum(&cells, false),
        AggregateFn::Join(sep) => {
            let parts: Vec<String> = cells
                .iter()
                .filter(|c| !c.is_null())
                .map(|c| c.display())
                .collect();
            if parts.is_empty() {
                CellValue::Null
            } else {
                CellValue::Str(parts.join(sep))
            }
        }
    }
}

fn first_non_null(cells: &[&CellValue]) -> CellValue {
    cells
        .iter()
        .find(|c| !c.is_null())
        .map(|c| (*c).clone())
        .unwrap_or(CellValue::Null)
}

/// Numeric comparison when both values coerce, lexicographic otherwise.
fn extremum(cells: &[&CellValue], want_max: bool) -> CellValue {
    let mut best: Option<&CellValue> = None;
    for cell in cells.iter().filter(|c| !c.is_null()) {
        best = match best {
            None => Some(cell),
            Some(current) => {
                let ordering = match (current.as_f64(), cell.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal),
                    _ => current.display().cmp(&cell.display()),
                };
                let replace = if want_max {
                    ordering == std::cmp::Ordering::Less
                } else {
                    ordering == std::cmp::Ordering::Greater
                };
                if replace {
                    Some(cell)
                } else {
                    Some(current)
                }
            }
        };
    }
    best.cloned().unwrap_or(CellValue::Null)
}
