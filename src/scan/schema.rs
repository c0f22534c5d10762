use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use serde::Serialize;

use crate::error::{FusionError, FusionResult};
use crate::ident::{sanitize, Identifier};

/// Logical column type used for filter widgets and filter validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Categorical,
    Text,
    Date,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub table: Identifier,
    pub name: Identifier,
    /// Header text exactly as found in the file
    pub raw_name: String,
    /// Zero-based position in the CSV header
    pub position: usize,
    pub kind: ColumnKind,
    pub observed_min: Option<f64>,
    pub observed_max: Option<f64>,
    /// Distinct values (sorted), categorical columns only
    pub observed_categories: Option<Vec<String>>,
}

/// A column the SQL view computes from other columns of the same file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedColumn {
    pub name: Identifier,
    /// Source columns, cast to text and joined with `_` in this order
    pub parts: Vec<Identifier>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInfo {
    pub name: Identifier,
    /// Absolute path of the backing CSV file, inside the data directory
    pub path: PathBuf,
    pub columns: Vec<ColumnInfo>,
    /// Number of header fields including columns that were skipped
    pub header_width: usize,
    pub row_count_estimate: u64,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub derived: Vec<DerivedColumn>,
}

impl TableInfo {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name.as_str() == name)
    }

    /// True for file columns and derived columns alike.
    pub fn has_column(&self, name: &Identifier) -> bool {
        self.column(name.as_str()).is_some() || self.derived.iter().any(|d| d.name == *name)
    }

    /// Column names exposed to the SQL engine, by header position.
    /// Skipped header fields get placeholder names so positions stay aligned.
    pub fn view_columns(&self) -> Vec<Identifier> {
        (0..self.header_width)
            .map(|pos| match self.columns.iter().find(|c| c.position == pos) {
                Some(c) => c.name.clone(),
                None => Identifier::placeholder(pos),
            })
            .collect()
    }

    /// Build table metadata from names and kinds without reading a file.
    ///
    /// Useful for callers that keep their own metadata store, and for tests.
    pub fn from_columns(name: &str, path: &Path, columns: &[(&str, ColumnKind)]) -> FusionResult<TableInfo> {
        let table = sanitize(name)?;
        let mut out = Vec::with_capacity(columns.len());
        for (pos, (raw, kind)) in columns.iter().enumerate() {
            out.push(ColumnInfo {
                table: table.clone(),
                name: sanitize(raw)?,
                raw_name: raw.to_string(),
                position: pos,
                kind: *kind,
                observed_min: None,
                observed_max: None,
                observed_categories: None,
            });
        }
        Ok(TableInfo { name: table, path: path.to_path_buf(), header_width: out.len(), columns: out, row_count_estimate: 0, size_bytes: 0, derived: Vec::new() })
    }
}

/// A file or column the scanner could not expose, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanIssue {
    pub file: String,
    pub column: Option<String>,
    pub reason: String,
}

/// Immutable metadata snapshot for one data directory.
#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    pub data_dir: PathBuf,
    pub base_table: Identifier,
    pub tables: BTreeMap<Identifier, TableInfo>,
    pub fingerprint: u64,
    pub issues: Vec<ScanIssue>,
}

impl Catalog {
    pub fn new(data_dir: PathBuf, base_table: Identifier, tables: Vec<TableInfo>, fingerprint: u64) -> FusionResult<Catalog> {
        let tables: BTreeMap<Identifier, TableInfo> = tables.into_iter().map(|t| (t.name.clone(), t)).collect();
        if !tables.contains_key(base_table.as_str()) {
            return Err(FusionError::scan(base_table.as_str(), "demographics table not found in data directory"));
        }
        Ok(Catalog { data_dir, base_table, tables, fingerprint, issues: Vec::new() })
    }

    pub fn table(&self, name: &str) -> Option<&TableInfo> { self.tables.get(name) }

    pub fn base(&self) -> &TableInfo {
        // Catalog::new guarantees presence
        &self.tables[self.base_table.as_str()]
    }

    pub fn is_base(&self, name: &Identifier) -> bool { *name == self.base_table }

    pub fn satellites(&self) -> impl Iterator<Item = &TableInfo> {
        self.tables.values().filter(move |t| t.name != self.base_table)
    }
}

pub(crate) fn is_numeric_dtype(dt: &DataType) -> bool {
    use DataType::*;
    matches!(dt, Int8 | Int16 | Int32 | Int64 | UInt8 | UInt16 | UInt32 | UInt64 | Float32 | Float64)
}

/// Observed profile of one sampled column.
pub(crate) struct ColumnProfile {
    pub kind: ColumnKind,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub categories: Option<Vec<String>>,
}

/// Classify a sampled column. Numeric columns get a value range instead of an
/// enumeration; string columns are categorical only up to `categorical_cap` distinct values.
pub(crate) fn profile_column(col: &Column, categorical_cap: usize) -> PolarsResult<ColumnProfile> {
    let dt = col.dtype().clone();
    let series = col.as_materialized_series();
    if is_numeric_dtype(&dt) {
        let f = series.cast(&DataType::Float64)?;
        let ca = f.f64()?;
        return Ok(ColumnProfile { kind: ColumnKind::Numeric, min: ca.min(), max: ca.max(), categories: None });
    }
    match dt {
        DataType::Boolean => {
            let mut seen: Vec<String> = series.bool()?.into_iter().flatten().map(|b| b.to_string()).collect();
            seen.sort();
            seen.dedup();
            Ok(ColumnProfile { kind: ColumnKind::Categorical, min: None, max: None, categories: Some(seen) })
        }
        DataType::Date | DataType::Datetime(_, _) => Ok(ColumnProfile { kind: ColumnKind::Date, min: None, max: None, categories: None }),
        DataType::String => {
            let mut distinct = std::collections::BTreeSet::new();
            for v in series.str()?.into_iter().flatten() {
                distinct.insert(v.to_string());
                if distinct.len() > categorical_cap { break; }
            }
            if distinct.is_empty() || distinct.len() > categorical_cap {
                Ok(ColumnProfile { kind: ColumnKind::Text, min: None, max: None, categories: None })
            } else {
                Ok(ColumnProfile { kind: ColumnKind::Categorical, min: None, max: None, categories: Some(distinct.into_iter().collect()) })
            }
        }
        _ => Ok(ColumnProfile { kind: ColumnKind::Text, min: None, max: None, categories: None }),
    }
}
