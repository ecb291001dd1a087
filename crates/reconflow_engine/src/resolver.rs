//! Field role resolution: map source column headers to canonical roles.
//!
//! Source-specific headers never travel past this layer. Unclaimed columns
//! are preserved under their original header so validation rules can still
//! reach them via the bracket form (`business["原始列"]`).

use crate::error::EngineError;
use crate::reader::Table;
use crate::schema::SideSpec;
use crate::value::CellValue;
use std::collections::HashMap;
use tracing::debug;

/// One side's rows after role resolution, columns in canonical order
/// (resolved roles first, then unclaimed headers).
#[derive(Debug, Clone, Default)]
pub struct ResolvedSide {
    pub columns: Vec<String>,
    pub rows: Vec<HashMap<String, CellValue>>,
}

impl ResolvedSide {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append another resolved table (a later file assigned to the same
    /// side). Columns are unioned, preserving first-seen order.
    pub fn extend(&mut self, other: ResolvedSide) {
        for column in other.columns {
            if !self.columns.contains(&column) {
                self.columns.push(column);
            }
        }
        self.rows.extend(other.rows);
    }
}

/// Resolve one table against a side's alias declarations.
///
/// For each declared role the alias list is scanned in order; the first
/// alias equal to a header (exact after trimming, case-sensitive) claims
/// that column. The key role must resolve or the side is unusable.
pub fn resolve(
    side_name: &str,
    spec: &SideSpec,
    key_role: &str,
    table: Table,
) -> Result<ResolvedSide, EngineError> {
    let mut header_to_role: HashMap<String, String> = HashMap::new();
    let mut claimed: Vec<&str> = Vec::new();

    for (role, aliases) in &spec.field_roles {
        for alias in aliases {
            let alias = alias.trim();
            let hit = table
                .columns
                .iter()
                .find(|header| header.as_str() == alias && !claimed.contains(&header.as_str()));
            if let Some(header) = hit {
                claimed.push(header.as_str());
                header_to_role.insert(header.clone(), role.clone());
                break;
            }
        }
    }

    if !header_to_role.values().any(|role| role == key_role) {
        return Err(EngineError::KeyRoleUnresolved {
            side: side_name.to_string(),
            role: key_role.to_string(),
        });
    }

    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|header| {
            header_to_role
                .get(header)
                .cloned()
                .unwrap_or_else(|| header.clone())
        })
        .collect();

    let rows = table
        .rows
        .into_iter()
        .map(|mut raw| {
            let mut row = HashMap::with_capacity(raw.len());
            for header in &table.columns {
                let value = raw.remove(header).unwrap_or(CellValue::Null);
                let key = header_to_role.get(header).unwrap_or(header);
                row.insert(key.clone(), value);
            }
            row
        })
        .collect();

    debug!(
        side = side_name,
        resolved = header_to_role.len(),
        total_columns = columns.len(),
        "resolved field roles"
    );

    Ok(ResolvedSide { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn side_spec(field_roles: serde_json::Value) -> SideSpec {
        serde_json::from_value(json!({
            "file_pattern": "*",
            "field_roles": field_roles
        }))
        .unwrap()
    }

    fn table(columns: &[&str], rows: &[&[&str]]) -> Table {
        Table {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|cells| {
                    columns
                        .iter()
                        .zip(cells.iter())
                        .map(|(c, v)| (c.to_string(), CellValue::Str(v.to_string())))
                        .collect()
                })
                .collect(),
        }
    }

    #[test]
    fn first_matching_alias_claims_column() {
        let spec = side_spec(json!({
            "order_id": ["单号", "订单号"],
            "amount": "金额"
        }));
        let t = table(&["订单号", "金额"], &[&["A001", "9.5"]]);
        let resolved = resolve("business", &spec, "order_id", t).unwrap();
        assert_eq!(resolved.columns, vec!["order_id", "amount"]);
        assert_eq!(
            resolved.rows[0]["order_id"],
            CellValue::Str("A001".to_string())
        );
    }

    #[test]
    fn unclaimed_columns_keep_their_header() {
        let spec = side_spec(json!({ "order_id": "id" }));
        let t = table(&["id", "memo"], &[&["A", "note"]]);
        let resolved = resolve("business", &spec, "order_id", t).unwrap();
        assert_eq!(resolved.columns, vec!["order_id", "memo"]);
        assert_eq!(resolved.rows[0]["memo"], CellValue::Str("note".to_string()));
    }

    #[test]
    fn missing_key_role_fails() {
        let spec = side_spec(json!({ "order_id": "id", "amount": "amt" }));
        let t = table(&["amt", "other"], &[&["1", "x"]]);
        let err = resolve("finance", &spec, "order_id", t).unwrap_err();
        assert!(matches!(err, EngineError::KeyRoleUnresolved { .. }));
    }

    #[test]
    fn alias_match_is_case_sensitive() {
        let spec = side_spec(json!({ "order_id": "ID" }));
        let t = table(&["id"], &[&["A"]]);
        assert!(resolve("business", &spec, "order_id", t).is_err());
    }

    #[test]
    fn extend_unions_columns_in_order() {
        let spec = side_spec(json!({ "order_id": "id" }));
        let mut first = resolve(
            "business",
            &spec,
            "order_id",
            table(&["id", "a"], &[&["1", "x"]]),
        )
        .unwrap();
        let second = resolve(
            "business",
            &spec,
            "order_id",
            table(&["id", "b"], &[&["2", "y"]]),
        )
        .unwrap();
        first.extend(second);
        assert_eq!(first.columns, vec!["order_id", "a", "b"]);
        assert_eq!(first.rows.len(), 2);
    }
}
