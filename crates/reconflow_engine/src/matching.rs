//! Key-based join of the two sides.
//!
//! Produces three disjoint sets: matched pairs, business-only rows and
//! finance-only rows. Duplicate keys within one side survive (they indicate
//! a cleaning misconfiguration) and produce a Cartesian pairing plus a
//! `DuplicateKey` warning.

use crate::error::Warning;
use crate::value::{format_num, CellValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

type Row = HashMap<String, CellValue>;

/// How key values are folded before comparison.
///
/// `Default` trims and additionally folds numeric-looking keys through a
/// parse, so `"123"` and `"000123"` compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyComparator {
    Default,
    Exact,
    Trim,
    Numeric,
}

impl KeyComparator {
    /// Canonical join key for a cell, or None when the cell is null.
    pub fn canonical(&self, value: &CellValue) -> Option<String> {
        if value.is_null() {
            return None;
        }
        let raw = value.display();
        let folded = match self {
            Self::Exact => raw,
            Self::Trim => raw.trim().to_string(),
            Self::Numeric | Self::Default => {
                let trimmed = raw.trim();
                match trimmed.parse::<f64>() {
                    Ok(n) => format_num(n),
                    Err(_) => trimmed.to_string(),
                }
            }
        };
        Some(folded)
    }
}

/// One matched (business, finance) row pair.
#[derive(Debug, Clone)]
pub struct MatchedPair {
    pub key: String,
    pub business: Row,
    pub finance: Row,
}

/// Join output. `matched` holds every pair (Cartesian under duplicate
/// keys); `matched_keys` counts distinct keys present on both sides.
#[derive(Debug, Default)]
pub struct MatchSet {
    pub matched: Vec<MatchedPair>,
    pub matched_keys: usize,
    pub business_only: Vec<(String, Row)>,
    pub finance_only: Vec<(String, Row)>,
    pub warnings: Vec<Warning>,
}

/// Join both sides on the key role.
pub fn join(
    business: Vec<Row>,
    finance: Vec<Row>,
    key_role: &str,
    comparator: KeyComparator,
) -> MatchSet {
    let (business_keys, business_groups) = group_by_key(business, key_role, comparator);
    let (finance_keys, finance_groups) = group_by_key(finance, key_role, comparator);

    let mut out = MatchSet::default();

    for (name, keys, groups) in [
        ("business", &business_keys, &business_groups),
        ("finance", &finance_keys, &finance_groups),
    ] {
        for key in keys {
            let count = groups[key].len();
            if count > 1 {
                warn!(side = name, key = %key, count, "duplicate key after cleaning");
                out.warnings.push(Warning::DuplicateKey {
                    side: name.to_string(),
                    key: key.clone(),
                    count,
                });
            }
        }
    }

    for key in &business_keys {
        let biz_rows = &business_groups[key];
        match finance_groups.get(key) {
            Some(fin_rows) => {
                out.matched_keys += 1;
                for b in biz_rows {
                    for f in fin_rows {
                        out.matched.push(MatchedPair {
                            key: key.clone(),
                            business: b.clone(),
                            finance: f.clone(),
                        });
                    }
                }
            }
            None => {
                for b in biz_rows {
                    out.business_only.push((key.clone(), b.clone()));
                }
            }
        }
    }

    for key in &finance_keys {
        if !business_groups.contains_key(key) {
            for f in &finance_groups[key] {
                out.finance_only.push((key.clone(), f.clone()));
            }
        }
    }

    out
}

/// Group rows by canonical key, preserving first-seen key order. Rows with
/// a null key were already discarded by cleaning; any stragglers are
/// dropped silently here.
fn group_by_key(
    rows: Vec<Row>,
    key_role: &str,
    comparator: KeyComparator,
) -> (Vec<String>, HashMap<String, Vec<Row>>) {
    let mut order = Vec::new();
    let mut groups: HashMap<String, Vec<Row>> = HashMap::new();
    for row in rows {
        let Some(key) = row.get(key_role).and_then(|v| comparator.canonical(v)) else {
            continue;
        };
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(row);
    }
    (order, groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &str, amount: &str) -> Row {
        [
            ("order_id".to_string(), CellValue::Str(key.to_string())),
            ("amount".to_string(), CellValue::Str(amount.to_string())),
        ]
        .into()
    }

    #[test]
    fn partitions_into_three_sets() {
        let business = vec![row("A001", "1"), row("A002", "2")];
        let finance = vec![row("A002", "2"), row("A003", "3")];
        let set = join(business, finance, "order_id", KeyComparator::Default);
        assert_eq!(set.matched_keys, 1);
        assert_eq!(set.matched.len(), 1);
        assert_eq!(set.matched[0].key, "A002");
        assert_eq!(set.business_only.len(), 1);
        assert_eq!(set.business_only[0].0, "A001");
        assert_eq!(set.finance_only.len(), 1);
        assert_eq!(set.finance_only[0].0, "A003");
    }

    #[test]
    fn matched_plus_only_covers_all_unique_keys() {
        let business = vec![row("A", "1"), row("B", "2"), row("C", "3")];
        let finance = vec![row("B", "2")];
        let set = join(business, finance, "order_id", KeyComparator::Default);
        assert_eq!(set.matched_keys + set.business_only.len(), 3);
        assert_eq!(set.matched_keys + set.finance_only.len(), 1);
    }

    #[test]
    fn default_comparator_folds_numeric_keys() {
        let business = vec![row(" 123 ", "1")];
        let finance = vec![row("000123", "1")];
        let set = join(business, finance, "order_id", KeyComparator::Default);
        assert_eq!(set.matched_keys, 1);
        assert!(set.business_only.is_empty());
    }

    #[test]
    fn exact_comparator_keeps_whitespace_distinct() {
        let business = vec![row(" A", "1")];
        let finance = vec![row("A", "1")];
        let set = join(business, finance, "order_id", KeyComparator::Exact);
        assert_eq!(set.matched_keys, 0);

        let business = vec![row(" A", "1")];
        let finance = vec![row("A", "1")];
        let set = join(business, finance, "order_id", KeyComparator::Trim);
        assert_eq!(set.matched_keys, 1);
    }

    #[test]
    fn duplicate_keys_pair_cartesian_with_warning() {
        let business = vec![row("A", "1"), row("A", "2")];
        let finance = vec![row("A", "3")];
        let set = join(business, finance, "order_id", KeyComparator::Default);
        assert_eq!(set.matched.len(), 2);
        assert_eq!(set.matched_keys, 1);
        assert_eq!(
            set.warnings,
            vec![Warning::DuplicateKey {
                side: "business".into(),
                key: "A".into(),
                count: 2
            }]
        );
    }

    #[test]
    fn empty_side_leaves_everything_unmatched() {
        let business = vec![row("A", "1"), row("B", "2")];
        let set = join(business, Vec::new(), "order_id", KeyComparator::Default);
        assert_eq!(set.matched_keys, 0);
        assert_eq!(set.business_only.len(), 2);
        assert!(set.finance_only.is_empty());
    }
}
