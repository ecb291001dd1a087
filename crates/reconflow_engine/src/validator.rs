//! Rule evaluation over match candidates.
//!
//! Candidates are scanned in a fixed order (matched pairs, then
//! business-only rows, then finance-only rows) and rules in declaration
//! order, which makes the emitted issue order deterministic for identical
//! inputs. A rule whose predicate errors is skipped for that candidate
//! with a warning; a fired rule of issue type `skipped` suppresses every
//! later rule on the same candidate.

use crate::error::Warning;
use crate::matching::MatchSet;
use crate::predicate::{self, truthy, EvalContext, Expr};
use crate::schema::{RuleScope, Tolerance, ValidationRule};
use crate::value::CellValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

type Row = HashMap<String, CellValue>;

/// Issue type that short-circuits the remaining rules on a candidate.
pub const SKIPPED: &str = "skipped";

/// A typed finding produced by a fired rule or built-in check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub key_value: String,
    pub issue_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finance_value: Option<String>,
    pub detail: String,
}

/// A rule with its condition parsed ahead of time.
pub struct CompiledRule {
    pub name: String,
    pub issue_type: String,
    pub detail_template: String,
    pub scope: RuleScope,
    expr: Expr,
}

/// Parse every rule condition. Callers validate schemas first, so this
/// only fails on rules that bypassed validation.
pub fn compile_rules(rules: &[ValidationRule]) -> Result<Vec<CompiledRule>, predicate::ParseError> {
    rules
        .iter()
        .map(|rule| {
            Ok(CompiledRule {
                name: rule.name.clone(),
                issue_type: rule.issue_type.clone(),
                detail_template: rule.detail_template.clone(),
                scope: rule.scope,
                expr: predicate::parse(&rule.condition_expr)?,
            })
        })
        .collect()
}

struct Candidate<'a> {
    key: &'a str,
    business: Option<&'a Row>,
    finance: Option<&'a Row>,
}

impl Candidate<'_> {
    fn scope_applies(&self, scope: RuleScope) -> bool {
        match scope {
            RuleScope::Pair => self.business.is_some() && self.finance.is_some(),
            RuleScope::BusinessOnly => self.finance.is_none(),
            RuleScope::FinanceOnly => self.business.is_none(),
        }
    }

    fn side_value(&self, row: Option<&Row>, role: &str) -> Option<String> {
        row.and_then(|r| r.get(role)).map(|v| v.display())
    }
}

/// Evaluate all rules (and, when enabled, the built-in checks) against the
/// match output.
pub fn evaluate(
    match_set: &MatchSet,
    rules: &[CompiledRule],
    tolerance: &Tolerance,
    warnings: &mut Vec<Warning>,
) -> Vec<Issue> {
    let mut issues = Vec::new();

    for pair in &match_set.matched {
        let candidate = Candidate {
            key: &pair.key,
            business: Some(&pair.business),
            finance: Some(&pair.finance),
        };
        evaluate_candidate(&candidate, rules, tolerance, warnings, &mut issues);
    }
    for (key, row) in &match_set.business_only {
        let candidate = Candidate {
            key,
            business: Some(row),
            finance: None,
        };
        evaluate_candidate(&candidate, rules, tolerance, warnings, &mut issues);
    }
    for (key, row) in &match_set.finance_only {
        let candidate = Candidate {
            key,
            business: None,
            finance: Some(row),
        };
        evaluate_candidate(&candidate, rules, tolerance, warnings, &mut issues);
    }

    issues
}

fn evaluate_candidate(
    candidate: &Candidate<'_>,
    rules: &[CompiledRule],
    tolerance: &Tolerance,
    warnings: &mut Vec<Warning>,
    issues: &mut Vec<Issue>,
) {
    let ctx = EvalContext {
        business: candidate.business,
        finance: candidate.finance,
    };

    for rule in rules {
        if !candidate.scope_applies(rule.scope) {
            continue;
        }
        let fired = match predicate::eval(&rule.expr, &ctx) {
            Ok(value) => truthy(&value),
            Err(e) => {
                warn!(rule = %rule.name, key = candidate.key, error = %e, "rule evaluation failed");
                warnings.push(Warning::Predicate {
                    rule: rule.name.clone(),
                    key: candidate.key.to_string(),
                    message: e.to_string(),
                });
                continue;
            }
        };
        if !fired {
            continue;
        }
        issues.push(Issue {
            key_value: candidate.key.to_string(),
            issue_type: rule.issue_type.clone(),
            business_value: candidate.side_value(candidate.business, "amount"),
            finance_value: candidate.side_value(candidate.finance, "amount"),
            detail: render_template(&rule.detail_template, candidate),
        });
        if rule.issue_type == SKIPPED {
            return;
        }
    }

    if tolerance.builtin_checks {
        builtin_checks(candidate, tolerance, issues);
    }
}

/// Built-in amount and date checks on matched pairs. Diff exactly equal to
/// the tolerance is not a mismatch.
fn builtin_checks(candidate: &Candidate<'_>, tolerance: &Tolerance, issues: &mut Vec<Issue>) {
    let (Some(business), Some(finance)) = (candidate.business, candidate.finance) else {
        return;
    };

    if let (Some(b), Some(f)) = (
        business.get("amount").and_then(|v| v.as_f64()),
        finance.get("amount").and_then(|v| v.as_f64()),
    ) {
        let diff = (b - f).abs();
        if diff > tolerance.amount_diff_max {
            issues.push(Issue {
                key_value: candidate.key.to_string(),
                issue_type: "amount_mismatch".to_string(),
                business_value: Some(format!("{b:.2}")),
                finance_value: Some(format!("{f:.2}")),
                detail: format!(
                    "business amount {b:.2} vs finance amount {f:.2}, diff {diff:.2} exceeds tolerance {}",
                    tolerance.amount_diff_max
                ),
            });
        }
    }

    if let (Some(b), Some(f)) = (
        formatted_date(business.get("date"), &tolerance.date_format),
        formatted_date(finance.get("date"), &tolerance.date_format),
    ) {
        if b != f {
            issues.push(Issue {
                key_value: candidate.key.to_string(),
                issue_type: "date_mismatch".to_string(),
                business_value: candidate.side_value(candidate.business, "date"),
                finance_value: candidate.side_value(candidate.finance, "date"),
                detail: format!("business date {b} does not match finance date {f}"),
            });
        }
    }
}

/// Normalize a date cell through the schema's format for comparison.
/// Unparsable values skip the check rather than raising.
fn formatted_date(cell: Option<&CellValue>, format: &str) -> Option<String> {
    let cell = cell?;
    match cell {
        CellValue::Date(d) => Some(d.format(format).to_string()),
        CellValue::Str(s) => {
            let text = s.trim();
            for candidate in [format, "%Y-%m-%d", "%Y/%m/%d"] {
                if let Ok(d) = chrono::NaiveDate::parse_from_str(text, candidate) {
                    return Some(d.format(format).to_string());
                }
            }
            None
        }
        _ => None,
    }
}

/// Substitute `{role}`, `{business.role}` and `{finance.role}` placeholders
/// with stringified cell values (empty for null). Placeholders that name no
/// known field render literally.
fn render_template(template: &str, candidate: &Candidate<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        let mut name = String::new();
        let mut closed = false;
        for next in chars.by_ref() {
            if next == '}' {
                closed = true;
                break;
            }
            name.push(next);
        }
        if !closed {
            out.push('{');
            out.push_str(&name);
            break;
        }
        match lookup_placeholder(&name, candidate) {
            Some(value) => out.push_str(&value),
            None => {
                out.push('{');
                out.push_str(&name);
                out.push('}');
            }
        }
    }
    out
}

fn lookup_placeholder(name: &str, candidate: &Candidate<'_>) -> Option<String> {
    let get = |row: Option<&Row>, field: &str| -> Option<String> {
        row.and_then(|r| r.get(field)).map(|v| v.display())
    };
    match name.split_once('.') {
        Some(("business", field)) => get(candidate.business, field),
        Some(("finance", field)) => get(candidate.finance, field),
        Some(_) => None,
        // Bare role: whichever side carries it, business first.
        None => get(candidate.business, name).or_else(|| get(candidate.finance, name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::MatchedPair;

    fn rule(name: &str, expr: &str, issue_type: &str, detail: &str, scope: RuleScope) -> ValidationRule {
        ValidationRule {
            name: name.into(),
            condition_expr: expr.into(),
            issue_type: issue_type.into(),
            detail_template: detail.into(),
            scope,
        }
    }

    fn pair_set(business: &[(&str, &str)], finance: &[(&str, &str)]) -> MatchSet {
        let to_row = |pairs: &[(&str, &str)]| -> Row {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), CellValue::Str(v.to_string())))
                .collect()
        };
        MatchSet {
            matched: vec![MatchedPair {
                key: "A001".into(),
                business: to_row(business),
                finance: to_row(finance),
            }],
            matched_keys: 1,
            ..Default::default()
        }
    }

    #[test]
    fn fired_rule_emits_issue_with_rendered_detail() {
        let rules = compile_rules(&[rule(
            "amt",
            "abs(num(business.amount) - num(finance.amount)) > 1.0",
            "amount_mismatch",
            "biz={business.amount} fin={finance.amount}",
            RuleScope::Pair,
        )])
        .unwrap();
        let set = pair_set(&[("amount", "100.00")], &[("amount", "98.00")]);
        let mut warnings = Vec::new();
        let issues = evaluate(&set, &rules, &Tolerance::default(), &mut warnings);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, "amount_mismatch");
        assert_eq!(issues[0].detail, "biz=100.00 fin=98.00");
        assert_eq!(issues[0].key_value, "A001");
        assert!(warnings.is_empty());
    }

    #[test]
    fn skipped_rule_short_circuits() {
        let rules = compile_rules(&[
            rule(
                "test-customer",
                "business.customer == 'TEST'",
                SKIPPED,
                "test data",
                RuleScope::Pair,
            ),
            rule(
                "amt",
                "abs(num(business.amount) - num(finance.amount)) > 0",
                "amount_mismatch",
                "",
                RuleScope::Pair,
            ),
        ])
        .unwrap();
        let set = pair_set(
            &[("customer", "TEST"), ("amount", "1")],
            &[("amount", "99")],
        );
        let mut warnings = Vec::new();
        let issues = evaluate(&set, &rules, &Tolerance::default(), &mut warnings);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, SKIPPED);
    }

    #[test]
    fn all_matching_rules_fire_without_skip() {
        let rules = compile_rules(&[
            rule("one", "true", "first", "", RuleScope::Pair),
            rule("two", "true", "second", "", RuleScope::Pair),
        ])
        .unwrap();
        let set = pair_set(&[("amount", "1")], &[("amount", "1")]);
        let mut warnings = Vec::new();
        let issues = evaluate(&set, &rules, &Tolerance::default(), &mut warnings);
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].issue_type, "first");
        assert_eq!(issues[1].issue_type, "second");
    }

    #[test]
    fn scope_filters_candidates() {
        let rules = compile_rules(&[rule(
            "orphan",
            "true",
            "missing_in_finance",
            "no finance row for {order_id}",
            RuleScope::BusinessOnly,
        )])
        .unwrap();
        let mut set = MatchSet::default();
        set.business_only.push((
            "A001".into(),
            [
                ("order_id".to_string(), CellValue::Str("A001".into())),
                ("amount".to_string(), CellValue::Str("5".into())),
            ]
            .into(),
        ));
        let mut warnings = Vec::new();
        let issues = evaluate(&set, &rules, &Tolerance::default(), &mut warnings);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].detail, "no finance row for A001");
        assert_eq!(issues[0].business_value.as_deref(), Some("5"));
        assert_eq!(issues[0].finance_value, None);
    }

    #[test]
    fn predicate_error_records_warning_and_continues() {
        let rules = compile_rules(&[
            rule("bad", "business.id matches '('", "x", "", RuleScope::Pair),
            rule("good", "true", "fired", "", RuleScope::Pair),
        ])
        .unwrap();
        let set = pair_set(&[("id", "A")], &[("id", "A")]);
        let mut warnings = Vec::new();
        let issues = evaluate(&set, &rules, &Tolerance::default(), &mut warnings);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, "fired");
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn unknown_placeholder_renders_literally() {
        let rules = compile_rules(&[rule(
            "t",
            "true",
            "x",
            "{business.nope} and {mystery}",
            RuleScope::Pair,
        )])
        .unwrap();
        let set = pair_set(&[("amount", "1")], &[("amount", "1")]);
        let mut warnings = Vec::new();
        let issues = evaluate(&set, &rules, &Tolerance::default(), &mut warnings);
        assert_eq!(issues[0].detail, "{business.nope} and {mystery}");
    }

    #[test]
    fn builtin_amount_check_respects_boundary() {
        let tolerance = Tolerance {
            amount_diff_max: 2.0,
            builtin_checks: true,
            ..Default::default()
        };
        // Diff exactly equal to the tolerance: no mismatch.
        let set = pair_set(&[("amount", "100.00")], &[("amount", "98.00")]);
        let mut warnings = Vec::new();
        let issues = evaluate(&set, &[], &tolerance, &mut warnings);
        assert!(issues.is_empty());

        // One cent past it: mismatch.
        let set = pair_set(&[("amount", "100.00")], &[("amount", "97.99")]);
        let issues = evaluate(&set, &[], &tolerance, &mut warnings);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, "amount_mismatch");
    }

    #[test]
    fn builtin_date_check_normalizes_formats() {
        let tolerance = Tolerance {
            builtin_checks: true,
            ..Default::default()
        };
        let set = pair_set(&[("date", "2025-01-01")], &[("date", "2025/01/01")]);
        let mut warnings = Vec::new();
        let issues = evaluate(&set, &[], &tolerance, &mut warnings);
        assert!(issues.is_empty());

        let set = pair_set(&[("date", "2025-01-01")], &[("date", "2025-01-02")]);
        let issues = evaluate(&set, &[], &tolerance, &mut warnings);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, "date_mismatch");
    }

    #[test]
    fn skip_also_suppresses_builtin_checks() {
        let tolerance = Tolerance {
            builtin_checks: true,
            ..Default::default()
        };
        let rules = compile_rules(&[rule(
            "skip-test",
            "business.customer == 'TEST'",
            SKIPPED,
            "",
            RuleScope::Pair,
        )])
        .unwrap();
        let set = pair_set(
            &[("customer", "TEST"), ("amount", "1")],
            &[("amount", "50")],
        );
        let mut warnings = Vec::new();
        let issues = evaluate(&set, &rules, &tolerance, &mut warnings);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, SKIPPED);
    }
}
