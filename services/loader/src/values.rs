//! Scalar values flowing between the spreadsheet and the catalog.

use std::fmt;

/// Strings that templates use to mean "no value".
const NULL_SENTINELS: &[&str] = &["", "none", "na", "nan", "null"];

/// True when `s` is one of the nullish sentinels (`na`, `nan`, `none`,
/// `NULL`, blank), compared case-insensitively after trimming.
pub fn is_null_sentinel(s: &str) -> bool {
    let normalized = s.trim().to_lowercase();
    NULL_SENTINELS.contains(&normalized.as_str())
}

/// Formats a float the way catalog items store numbers: integral values
/// without a trailing `.0`, everything else in shortest round-trip form.
pub fn format_number(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

/// A single spreadsheet cell as read from a candidate file.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl CellValue {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Native empty cell or a nullish sentinel string.
    pub fn is_null(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Float(f) => f.is_nan(),
            Self::Text(s) => is_null_sentinel(s),
            Self::Int(_) | Self::Bool(_) => false,
        }
    }

    /// Uniform string form used to match against catalog items, which are
    /// always stored as text. Header cells come back as ints, floats or
    /// strings depending on how the sheet was typed, so `2010`, `2010.0`
    /// and `"2010"` all map to `"2010"`.
    pub fn to_catalog_string(&self) -> Option<String> {
        match self {
            Self::Empty => None,
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) => Some(format_number(*f)),
            Self::Text(s) => Some(s.trim().to_string()),
            Self::Bool(b) => Some(if *b { "True" } else { "False" }.to_string()),
        }
    }

    /// Numeric reading of the cell. `Ok(None)` for nulls; the error carries
    /// the cell text when it is not a number.
    pub fn to_number(&self) -> std::result::Result<Option<f64>, String> {
        if self.is_null() {
            return Ok(None);
        }
        match self {
            Self::Int(i) => Ok(Some(*i as f64)),
            Self::Float(f) => Ok(Some(*f)),
            Self::Text(s) => s.trim().parse::<f64>().map(Some).map_err(|_| s.clone()),
            Self::Bool(_) | Self::Empty => Err(self.to_string()),
        }
    }

    /// Text reading that collapses nulls.
    pub fn to_optional_text(&self) -> Option<String> {
        if self.is_null() {
            None
        } else {
            self.to_catalog_string()
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_catalog_string() {
            Some(s) => write!(f, "{s}"),
            None => write!(f, "<empty>"),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<f64> for CellValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<i64> for CellValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

/// A value read from or written to a catalog table.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SqlValue {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) => Some(format_number(*f)),
            Self::Text(s) => Some(s.clone()),
            Self::Bool(b) => Some(b.to_string()),
        }
    }

    /// Text with nullish sentinels collapsed to `Null`.
    pub fn nullable_text(s: Option<&str>) -> Self {
        match s {
            Some(s) if !is_null_sentinel(s) => Self::Text(s.trim().to_string()),
            _ => Self::Null,
        }
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for SqlValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sentinels_case_insensitive() {
        for s in ["na", "NaN", "none", "NULL", "  ", ""] {
            assert!(is_null_sentinel(s), "{s:?} should be null");
        }
        assert!(!is_null_sentinel("0"));
        assert!(!is_null_sentinel("nanotube"));
    }

    #[test]
    fn test_header_values_share_one_string_form() {
        assert_eq!(CellValue::Int(2010).to_catalog_string().unwrap(), "2010");
        assert_eq!(CellValue::Float(2010.0).to_catalog_string().unwrap(), "2010");
        assert_eq!(CellValue::text(" 2010 ").to_catalog_string().unwrap(), "2010");
        assert_eq!(CellValue::Float(0.5).to_catalog_string().unwrap(), "0.5");
    }

    #[test]
    fn test_cell_to_number() {
        assert_eq!(CellValue::text("3.5").to_number(), Ok(Some(3.5)));
        assert_eq!(CellValue::text("nan").to_number(), Ok(None));
        assert_eq!(CellValue::Empty.to_number(), Ok(None));
        assert!(CellValue::text("abc").to_number().is_err());
    }

    #[test]
    fn test_sql_value_conversions() {
        assert_eq!(SqlValue::from(Some(3_i64)), SqlValue::Int(3));
        assert_eq!(SqlValue::from(None::<String>), SqlValue::Null);
        assert_eq!(SqlValue::Text("42".into()).as_i64(), Some(42));
        assert_eq!(SqlValue::nullable_text(Some("NULL")), SqlValue::Null);
        assert_eq!(SqlValue::nullable_text(Some(" kg ")), SqlValue::Text("kg".into()));
    }
}
