//! Scalar values and result rows.

/// A scalar parameter or result value.
///
/// This is deliberately a small set: the access layer only needs enough
/// type coverage for health probes, migrations, and request-scoped queries.
/// Backends map their native types onto these variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// Any integer width, widened to 64 bits.
    Int(i64),
    /// Any float width, widened to 64 bits.
    Float(f64),
    /// Character data.
    Text(String),
    /// Raw byte data.
    Bytes(Vec<u8>),
}

impl Value {
    /// Whether this value is SQL NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The boolean value, if this is a `Bool`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer value, if this is an `Int`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The float value, if this is a `Float`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The string value, if this is `Text`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// One result row: ordered column names plus their values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row from parallel column/value lists.
    ///
    /// The lists must be the same length; extra entries on either side are
    /// truncated.
    #[must_use]
    pub fn new(columns: Vec<String>, mut values: Vec<Value>) -> Self {
        let len = columns.len().min(values.len());
        values.truncate(len);
        let mut columns = columns;
        columns.truncate(len);
        Self { columns, values }
    }

    /// Column names in result order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Get a value by column name.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value by positional index.
    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Number of columns in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_access_by_name_and_index() {
        let row = Row::new(
            vec!["id".to_string(), "name".to_string()],
            vec![Value::Int(7), Value::Text("ada".to_string())],
        );

        assert_eq!(row.get("id").and_then(Value::as_i64), Some(7));
        assert_eq!(row.get("name").and_then(Value::as_str), Some("ada"));
        assert_eq!(row.get_index(1).and_then(Value::as_str), Some("ada"));
        assert!(row.get("missing").is_none());
    }

    #[test]
    fn test_row_truncates_mismatched_lists() {
        let row = Row::new(vec!["a".to_string()], vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(row.len(), 1);
    }

    #[test]
    fn test_value_accessors() {
        assert!(Value::Null.is_null());
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int(3).as_i64(), Some(3));
        assert_eq!(Value::Int(3).as_str(), None);
        assert_eq!(Value::from("x").as_str(), Some("x"));
    }
}
