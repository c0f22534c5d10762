//! Result export: CSV files through polars, export file naming, and TOML
//! snapshots of query parameters for reproducible re-runs.

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Local, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{FusionError, FusionResult};
use crate::exec::{ResultTable, Value};
use crate::query::QuerySpec;

/// Major version written to and accepted from query parameter files.
pub const QUERY_FORMAT_VERSION: &str = "1.0";

#[derive(Clone, Copy, PartialEq)]
enum CellType {
    Int,
    Float,
    Bool,
    Text,
}

fn column_type(table: &ResultTable, c: usize) -> CellType {
    let mut ty: Option<CellType> = None;
    for row in &table.rows {
        let this = match &row[c] {
            Value::Null => continue,
            Value::Int(_) => CellType::Int,
            Value::Float(_) => CellType::Float,
            Value::Bool(_) => CellType::Bool,
            Value::Text(_) => CellType::Text,
        };
        ty = Some(match (ty, this) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some(CellType::Int), CellType::Float) | (Some(CellType::Float), CellType::Int) => CellType::Float,
            _ => CellType::Text,
        });
        if ty == Some(CellType::Text) { break; }
    }
    ty.unwrap_or(CellType::Text)
}

/// Convert to a polars frame, one typed column per result column.
pub fn to_dataframe(table: &ResultTable) -> FusionResult<DataFrame> {
    let mut columns: Vec<Column> = Vec::with_capacity(table.columns.len());
    for (c, name) in table.columns.iter().enumerate() {
        let cells = table.rows.iter().map(|r| &r[c]);
        let col = match column_type(table, c) {
            CellType::Int => Column::new(name.as_str().into(), cells.map(|v| match v { Value::Int(i) => Some(*i), _ => None }).collect::<Vec<_>>()),
            CellType::Float => Column::new(
                name.as_str().into(),
                cells.map(|v| match v { Value::Int(i) => Some(*i as f64), Value::Float(f) => Some(*f), _ => None }).collect::<Vec<_>>(),
            ),
            CellType::Bool => Column::new(name.as_str().into(), cells.map(|v| match v { Value::Bool(b) => Some(*b), _ => None }).collect::<Vec<_>>()),
            CellType::Text => Column::new(name.as_str().into(), cells.map(|v| if v.is_null() { None } else { Some(v.to_string()) }).collect::<Vec<_>>()),
        };
        columns.push(col);
    }
    DataFrame::new(columns).map_err(|e| FusionError::export("dataframe", e.to_string()))
}

/// Write `table` as CSV with a header row in column order.
pub fn write_csv(table: &ResultTable, path: &Path) -> FusionResult<()> {
    let mut df = to_dataframe(table)?;
    let mut file = File::create(path).map_err(|e| FusionError::export(path.display().to_string(), format!("cannot create file: {}", e)))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut df)
        .map_err(|e| FusionError::export(path.display().to_string(), format!("cannot write CSV: {}", e)))?;
    info!(target: "datafuse::export", "wrote {} rows x {} columns to '{}'", df.height(), df.width(), path.display());
    Ok(())
}

/// `<tables>_<wide|long>_<YYYYmmdd_HHMMSS>.csv`, naming at most three non-base tables.
pub fn export_filename<S: AsRef<str>>(selected_tables: &[S], base_table: &str, wide: bool, now: NaiveDateTime) -> String {
    let others: Vec<&str> = selected_tables.iter().map(|t| t.as_ref()).filter(|t| *t != base_table).collect();
    let stem = match others.len() {
        0 => "demographics_only".to_string(),
        1..=3 => others.join("_"),
        n => format!("{}_and_{}_more", others[0], n - 1),
    };
    format!("{}_{}_{}.csv", stem, if wide { "wide" } else { "long" }, now.format("%Y%m%d_%H%M%S"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub exported_at: String,
    pub app_version: String,
    pub format_version: String,
    #[serde(default)]
    pub user_notes: String,
}

/// A saved `QuerySpec` plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryExport {
    pub metadata: ExportMetadata,
    pub query: QuerySpec,
}

impl QueryExport {
    pub fn new(query: QuerySpec, user_notes: &str, now: DateTime<Local>) -> Self {
        QueryExport {
            metadata: ExportMetadata {
                exported_at: now.to_rfc3339(),
                app_version: env!("CARGO_PKG_VERSION").to_string(),
                format_version: QUERY_FORMAT_VERSION.to_string(),
                user_notes: user_notes.to_string(),
            },
            query,
        }
    }

    pub fn to_toml(&self) -> FusionResult<String> {
        toml::to_string(self).map_err(|e| FusionError::export("query parameters", format!("cannot serialize to TOML: {}", e)))
    }

    /// Parse a saved file; rejects other major format versions.
    pub fn from_toml(text: &str) -> FusionResult<Self> {
        let q: QueryExport = toml::from_str(text).map_err(|e| FusionError::export("query parameters", format!("invalid TOML: {}", e)))?;
        let major = |v: &str| v.split('.').next().unwrap_or("").to_string();
        if major(&q.metadata.format_version) != major(QUERY_FORMAT_VERSION) {
            return Err(FusionError::export(
                q.metadata.format_version.clone(),
                format!("unsupported query format version (expected {})", QUERY_FORMAT_VERSION),
            ));
        }
        Ok(q)
    }

    pub fn load(path: &Path) -> FusionResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| FusionError::export(path.display().to_string(), format!("cannot read file: {}", e)))?;
        Self::from_toml(&text)
    }

    pub fn save(&self, path: &Path) -> FusionResult<()> {
        std::fs::write(path, self.to_toml()?).map_err(|e| FusionError::export(path.display().to_string(), format!("cannot write file: {}", e)))
    }
}

/// `query_params_<YYYYmmdd_HHMMSS>[_<notes>].toml`; notes are cleaned and cut to 30 chars.
pub fn query_export_filename(user_notes: &str, now: NaiveDateTime) -> String {
    let ts = now.format("%Y%m%d_%H%M%S");
    let clean: String = user_notes
        .chars()
        .map(|c| if matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || c.is_control() { '_' } else { c })
        .collect();
    let clean: String = clean.trim().chars().take(30).collect();
    if clean.is_empty() { format!("query_params_{}.toml", ts) } else { format!("query_params_{}_{}.toml", ts, clean) }
}
