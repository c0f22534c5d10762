use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::error::{FusionError, FusionResult};

/// One result cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    pub fn text<S: Into<String>>(s: S) -> Value { Value::Text(s.into()) }

    /// Rendering used for session labels and wide column suffixes.
    /// Integral floats drop their fraction (`2.0` -> `2`); null has no label.
    pub fn as_label(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 => Some(format!("{}", *f as i64)),
            other => Some(other.to_string()),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::Text(s.to_string()) }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self { Value::Int(i) }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self { Value::Float(x) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(o: Option<T>) -> Self { o.map(Into::into).unwrap_or(Value::Null) }
}

/// Rectangular query result: every row has exactly `columns.len()` cells.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultTable {
    pub fn new(columns: Vec<String>) -> Self { ResultTable { columns, rows: Vec::new() } }

    pub fn push_row(&mut self, row: Vec<Value>) -> FusionResult<()> {
        if row.len() != self.columns.len() {
            return Err(FusionError::execution(
                format!("row {}", self.rows.len()),
                format!("row has {} cells, table has {} columns", row.len(), self.columns.len()),
            ));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> { self.columns.iter().position(|c| c == name) }

    pub fn len(&self) -> usize { self.rows.len() }

    pub fn is_empty(&self) -> bool { self.rows.is_empty() }

    /// Cell by row index and column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let i = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(i))
    }
}
