//! Reconciliation schema: parsing, normalization and validation.
//!
//! A schema is immutable for the lifetime of a task. Parsing lifts
//! single-string aliases and patterns to one-element lists and fills the
//! optional sections with defaults, so downstream code never sees the
//! shorthand forms. Side declaration order is preserved: the first declared
//! side plays the business role in rule expressions and the second the
//! finance role.

use crate::error::EngineError;
use crate::matching::KeyComparator;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// Top-level reconciliation schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub version: String,

    /// Declared sides in declaration order.
    #[serde(
        serialize_with = "serialize_pairs",
        deserialize_with = "deserialize_pairs"
    )]
    pub sides: Vec<(String, SideSpec)>,

    /// The role both sides are joined on.
    pub key_role: String,

    #[serde(default)]
    pub tolerance: Tolerance,

    /// Per-side cleaning directives, applied in declaration order.
    #[serde(default)]
    pub cleaning_rules: HashMap<String, Vec<CleaningOp>>,

    #[serde(default)]
    pub validations: Vec<ValidationRule>,
}

/// One declared side: how its files are recognized and how its columns map
/// to canonical roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideSpec {
    /// Glob patterns by default; `re:` prefix switches to a regex.
    #[serde(deserialize_with = "one_or_many")]
    pub file_pattern: Vec<String>,

    /// Role name -> ordered alias list. The first alias matching a header
    /// column claims it.
    #[serde(
        serialize_with = "serialize_pairs",
        deserialize_with = "deserialize_alias_pairs"
    )]
    pub field_roles: Vec<(String, Vec<String>)>,

    /// Worksheet to read for spreadsheet files (first sheet when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
}

impl SideSpec {
    pub fn declares_role(&self, role: &str) -> bool {
        self.field_roles.iter().any(|(r, _)| r == role)
    }
}

/// Comparison slack and key handling knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerance {
    /// Absolute monetary slack: values differing by at most this much are
    /// considered equal.
    pub amount_diff_max: f64,

    /// strftime-style format used by `date_parse` cleaning and the built-in
    /// date check.
    pub date_format: String,

    pub key_comparator: KeyComparator,

    /// Enables the built-in amount/date checks on matched pairs. Off by
    /// default: schemas that rely solely on validation rules see exactly
    /// the issues their rules produce.
    pub builtin_checks: bool,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            amount_diff_max: 0.0,
            date_format: "%Y-%m-%d".to_string(),
            key_comparator: KeyComparator::Default,
            builtin_checks: false,
        }
    }
}

/// A single cleaning directive. Aggregation always runs after the field
/// transforms regardless of where it is declared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op")]
pub enum CleaningOp {
    /// Divide the listed role fields by 100 (cents to currency units).
    /// Results keep two decimal places; unparsable values become null.
    #[serde(rename = "amount_conversion.divide_by_100")]
    DivideBy100 { fields: Vec<String> },

    /// Multiply the listed role fields by a literal factor.
    #[serde(rename = "amount_conversion.multiply_by")]
    MultiplyBy { fields: Vec<String>, factor: f64 },

    #[serde(rename = "trim_whitespace")]
    TrimWhitespace { fields: Vec<String> },

    /// Parse the listed role fields with the schema's `date_format`.
    #[serde(rename = "date_parse")]
    DateParse { fields: Vec<String> },

    /// Group rows by one role and combine the rest.
    #[serde(rename = "aggregate_duplicates")]
    AggregateDuplicates {
        group_by: String,
        #[serde(default)]
        aggregations: HashMap<String, AggregateFn>,
    },
}

/// How one role is combined when duplicate keys are aggregated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AggregateFn {
    Sum,
    Mean,
    First,
    Last,
    Count,
    Max,
    Min,
    /// String concatenation with the given separator (`join:<sep>`).
    Join(String),
}

impl TryFrom<String> for AggregateFn {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "sum" => Ok(Self::Sum),
            "mean" => Ok(Self::Mean),
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            "count" => Ok(Self::Count),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            other => match other.strip_prefix("join:") {
                Some(sep) => Ok(Self::Join(sep.to_string())),
                None => Err(format!("unknown aggregation '{other}'")),
            },
        }
    }
}

impl From<AggregateFn> for String {
    fn from(f: AggregateFn) -> String {
        match f {
            AggregateFn::Sum => "sum".into(),
            AggregateFn::Mean => "mean".into(),
            AggregateFn::First => "first".into(),
            AggregateFn::Last => "last".into(),
            AggregateFn::Count => "count".into(),
            AggregateFn::Max => "max".into(),
            AggregateFn::Min => "min".into(),
            AggregateFn::Join(sep) => format!("join:{sep}"),
        }
    }
}

/// A user-authored predicate rule evaluated against candidates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRule {
    pub name: String,
    pub condition_expr: String,
    pub issue_type: String,
    pub detail_template: String,
    #[serde(default)]
    pub scope: RuleScope,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    #[default]
    Pair,
    BusinessOnly,
    FinanceOnly,
}

impl Schema {
    /// Parse and validate a schema from a JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, EngineError> {
        let schema: Schema = serde_json::from_value(value)
            .map_err(|e| EngineError::SchemaInvalid(e.to_string()))?;
        schema.validate()?;
        Ok(schema)
    }

    /// Parse from JSON text that may carry `//` and `/* */` comments.
    pub fn from_json_text(text: &str) -> Result<Self, EngineError> {
        let stripped = strip_comments(text);
        let value: serde_json::Value = serde_json::from_str(&stripped)
            .map_err(|e| EngineError::SchemaInvalid(e.to_string()))?;
        Self::from_value(value)
    }

    /// Validate structural invariants. Deserialization already enforced the
    /// required fields; this checks everything serde cannot express.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.version.trim().is_empty() {
            return Err(EngineError::SchemaInvalid("version must not be empty".into()));
        }
        if self.sides.is_empty() {
            return Err(EngineError::SchemaInvalid(
                "at least one side must be declared".into(),
            ));
        }
        // The comparison has exactly two active sides; a single declared
        // side joins against an empty counterpart.
        if self.sides.len() > 2 {
            return Err(EngineError::SchemaInvalid(format!(
                "at most two sides are supported, got {}",
                self.sides.len()
            )));
        }
        for (name, side) in &self.sides {
            if side.file_pattern.is_empty() || side.file_pattern.iter().any(|p| p.is_empty()) {
                return Err(EngineError::SchemaInvalid(format!(
                    "side '{name}' has an empty file_pattern"
                )));
            }
            if !side.declares_role(&self.key_role) {
                return Err(EngineError::SchemaInvalid(format!(
                    "key role '{}' is not declared in field_roles of side '{name}'",
                    self.key_role
                )));
            }
            // Patterns must compile.
            for pattern in &side.file_pattern {
                crate::matcher::compile_pattern(pattern).map_err(|e| {
                    EngineError::SchemaInvalid(format!(
                        "side '{name}' pattern '{pattern}': {e}"
                    ))
                })?;
            }
        }
        if self.tolerance.amount_diff_max < 0.0 {
            return Err(EngineError::SchemaInvalid(
                "tolerance.amount_diff_max must be >= 0".into(),
            ));
        }
        for rule in &self.validations {
            crate::predicate::parse(&rule.condition_expr).map_err(|e| {
                EngineError::SchemaInvalid(format!(
                    "validation '{}' has an invalid condition: {e}",
                    rule.name
                ))
            })?;
        }
        Ok(())
    }

    pub fn side(&self, name: &str) -> Option<&SideSpec> {
        self.sides.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    /// Cleaning directives for a side (empty when none declared).
    pub fn cleaning_for(&self, side: &str) -> &[CleaningOp] {
        self.cleaning_rules
            .get(side)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

/// Strip `//` and `/* */` comments, leaving string literals intact.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

// Serde helpers ------------------------------------------------------------

/// Deserialize a JSON object into a Vec of pairs, preserving declaration
/// order (a plain HashMap would lose it, and side order is semantic).
pub(crate) fn deserialize_pairs<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    struct PairsVisitor<V>(PhantomData<V>);

    impl<'de, V: Deserialize<'de>> Visitor<'de> for PairsVisitor<V> {
        type Value = Vec<(String, V)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an object")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut pairs = Vec::new();
            while let Some((key, value)) = map.next_entry::<String, V>()? {
                pairs.push((key, value));
            }
            Ok(pairs)
        }
    }

    deserializer.deserialize_map(PairsVisitor(PhantomData))
}

pub(crate) fn serialize_pairs<S, V>(pairs: &[(String, V)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    V: Serialize,
{
    let mut map = serializer.serialize_map(Some(pairs.len()))?;
    for (key, value) in pairs {
        map.serialize_entry(key, value)?;
    }
    map.end()
}

/// Alias lists accept either a single string or a list of strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Vec<String> {
    fn from(v: OneOrMany) -> Self {
        match v {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(list) => list,
        }
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    OneOrMany::deserialize(deserializer).map(Into::into)
}

fn deserialize_alias_pairs<'de, D>(deserializer: D) -> Result<Vec<(String, Vec<String>)>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<(String, OneOrMany)> = deserialize_pairs(deserializer)?;
    Ok(raw.into_iter().map(|(k, v)| (k, v.into())).collect())
}
