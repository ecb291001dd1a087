//! Scalar cell values flowing through the pipeline.
//!
//! The file reader produces only `Str` and `Null`; `Num` and `Date` first
//! appear after cleaning. Numeric coercion is always done at the point of
//! use so that original formatting survives into issue details.

use chrono::NaiveDate;

/// A single cell in a canonical row.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Str(String),
    Num(f64),
    Date(NaiveDate),
    Null,
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Display form used for issue details, templates and join keys.
    ///
    /// Null renders as the empty string. Whole numbers drop the fractional
    /// part (`100.0` renders as `100`).
    pub fn display(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Num(n) => format_num(*n),
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
            Self::Null => String::new(),
        }
    }

    /// Numeric coercion: `Num` as-is, `Str` parsed after trimming.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Num(n) => Some(*n),
            Self::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// A trimmed string view, or None for null.
    pub fn trimmed(&self) -> Option<String> {
        match self {
            Self::Null => None,
            other => Some(other.display().trim().to_string()),
        }
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

/// Canonical number formatting: integral values without a decimal point.
pub fn format_num(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}
