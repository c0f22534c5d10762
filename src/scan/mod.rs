//!
//! datafuse metadata scanner
//! -------------------------
//! Discovers the CSV files directly under a data directory and builds an immutable
//! `Catalog`: one `TableInfo` per file with sanitized column names, logical kinds
//! and observed value ranges taken from a bounded sample of rows. Files and
//! columns that cannot be exposed safely are skipped and recorded as issues
//! rather than failing the whole scan.
//!
//! Scans are expensive on large cohorts, so callers normally go through
//! `MetadataCache`, which reuses a snapshot while the directory fingerprint is
//! unchanged and the freshness window has not elapsed.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use polars::prelude::*;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use xxhash_rust::xxh3::Xxh3;

use crate::error::{FusionError, FusionResult};
use crate::ident::sanitize;
use crate::security::{resolve_data_dir, sanitize_path};

pub mod cache;
pub mod schema;

pub use cache::{CacheStats, MetadataCache};
pub use schema::{Catalog, ColumnInfo, ColumnKind, DerivedColumn, ScanIssue, TableInfo};

/// Sampling limits for one scan.
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub sample_rows: usize,
    pub categorical_cap: usize,
}

impl Default for ScanOptions {
    fn default() -> Self { Self { sample_rows: 1000, categorical_cap: 50 } }
}

impl From<&crate::config::ScanConfig> for ScanOptions {
    fn from(c: &crate::config::ScanConfig) -> Self { Self { sample_rows: c.sample_rows.max(1), categorical_cap: c.categorical_cap } }
}

/// A CSV file found directly under the data directory.
#[derive(Debug, Clone)]
struct CsvFile {
    file_name: String,
    path: PathBuf,
    size: u64,
    mtime_ns: u128,
}

fn list_csv_files(root: &Path) -> FusionResult<Vec<CsvFile>> {
    if !root.is_dir() {
        return Err(FusionError::scan(root.display().to_string(), "data directory does not exist or is not a directory"));
    }
    let mut out = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| FusionError::scan(root.display().to_string(), format!("cannot list data directory: {}", e)))?;
        if !entry.file_type().is_file() { continue; }
        let Some(file_name) = entry.file_name().to_str().map(|s| s.to_string()) else {
            warn!(target: "datafuse::scan", "skipping non UTF-8 file name {:?}", entry.file_name());
            continue;
        };
        let is_csv = Path::new(&file_name).extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("csv")).unwrap_or(false);
        if !is_csv { continue; }
        let meta = entry.metadata().map_err(|e| FusionError::scan(file_name.clone(), format!("cannot stat file: {}", e)))?;
        let mtime_ns = meta.modified().ok().and_then(|t| t.duration_since(UNIX_EPOCH).ok()).map(|d| d.as_nanos()).unwrap_or(0);
        out.push(CsvFile { file_name, path: entry.path().to_path_buf(), size: meta.len(), mtime_ns });
    }
    Ok(out)
}

/// Cheap change detector for a data directory: xxh3 over the sorted
/// (file name, size, mtime) triples of its CSV files.
pub fn fingerprint(data_dir: &Path) -> FusionResult<u64> {
    let root = resolve_data_dir(data_dir)?;
    let files = list_csv_files(&root)?;
    Ok(fingerprint_files(&files))
}

fn fingerprint_files(files: &[CsvFile]) -> u64 {
    let mut h = Xxh3::new();
    for f in files {
        h.update(f.file_name.as_bytes());
        h.update(&[0]);
        h.update(&f.size.to_le_bytes());
        h.update(&f.mtime_ns.to_le_bytes());
    }
    h.digest()
}

/// Scan `data_dir` and build a catalog whose base table is `demographics_file`.
pub fn scan(data_dir: &Path, demographics_file: &str, opts: &ScanOptions) -> FusionResult<Catalog> {
    let root = resolve_data_dir(data_dir)?;
    let files = list_csv_files(&root)?;
    let fp = fingerprint_files(&files);
    debug!(target: "datafuse::scan", "scan start: dir='{}' csv_files={} fingerprint={:016x}", root.display(), files.len(), fp);

    let base_stem = Path::new(demographics_file).file_stem().and_then(|s| s.to_str()).unwrap_or(demographics_file);
    let base = sanitize(base_stem).map_err(|e| FusionError::scan(demographics_file, format!("invalid demographics file name: {}", e.message())))?;

    let mut tables: Vec<TableInfo> = Vec::new();
    let mut issues: Vec<ScanIssue> = Vec::new();
    let mut seen_tables: HashSet<String> = HashSet::new();

    for f in &files {
        let stem = Path::new(&f.file_name).file_stem().and_then(|s| s.to_str()).unwrap_or("");
        let table = match sanitize(stem) {
            Ok(t) => t,
            Err(e) => {
                warn!(target: "datafuse::scan", "skipping file '{}': {}", f.file_name, e.message());
                issues.push(ScanIssue { file: f.file_name.clone(), column: None, reason: e.message().to_string() });
                continue;
            }
        };
        if !seen_tables.insert(table.as_str().to_ascii_lowercase()) {
            warn!(target: "datafuse::scan", "skipping file '{}': table name '{}' already taken", f.file_name, table);
            issues.push(ScanIssue { file: f.file_name.clone(), column: None, reason: format!("duplicate table name '{}'", table) });
            continue;
        }
        let path = match sanitize_path(&root, &f.file_name) {
            Ok(p) => p,
            Err(e) => {
                warn!(target: "datafuse::scan", "skipping file '{}': {}", f.file_name, e.message());
                issues.push(ScanIssue { file: f.file_name.clone(), column: None, reason: e.message().to_string() });
                continue;
            }
        };
        match scan_file(&path, &f.file_name, table, f.size, opts, &mut issues) {
            Ok(t) => tables.push(t),
            Err(reason) => {
                if f.file_name.eq_ignore_ascii_case(demographics_file) {
                    return Err(FusionError::scan(demographics_file, format!("demographics file is unreadable: {}", reason)));
                }
                warn!(target: "datafuse::scan", "skipping file '{}': {}", f.file_name, reason);
                issues.push(ScanIssue { file: f.file_name.clone(), column: None, reason });
            }
        }
    }

    if tables.is_empty() {
        return Err(FusionError::scan(root.display().to_string(), "data directory holds no readable CSV files"));
    }
    // file names match case-insensitively, so `Demographics.csv` serves `demographics.csv`
    let Some(base) = tables.iter().find(|t| t.name.as_str().eq_ignore_ascii_case(base.as_str())).map(|t| t.name.clone()) else {
        return Err(FusionError::scan(demographics_file, format!("demographics file not found in '{}'", root.display())));
    };
    let mut catalog = Catalog::new(root, base, tables, fp)?;
    catalog.issues = issues;
    info!(
        target: "datafuse::scan",
        "scan done: dir='{}' tables={} issues={} fingerprint={:016x}",
        catalog.data_dir.display(), catalog.tables.len(), catalog.issues.len(), fp
    );
    Ok(catalog)
}

fn scan_file(
    path: &Path,
    file_name: &str,
    table: crate::ident::Identifier,
    size: u64,
    opts: &ScanOptions,
    issues: &mut Vec<ScanIssue>,
) -> Result<TableInfo, String> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_n_rows(Some(opts.sample_rows))
        .with_infer_schema_length(Some(opts.sample_rows))
        .with_ignore_errors(true)
        .map_parse_options(|p| p.with_try_parse_dates(true))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|r| r.finish())
        .map_err(|e| format!("cannot read CSV: {}", e))?;
    if df.width() == 0 {
        return Err("CSV file has no header".to_string());
    }

    let mut columns = Vec::with_capacity(df.width());
    let mut seen: HashSet<String> = HashSet::new();
    for (position, col) in df.get_columns().iter().enumerate() {
        let raw = col.name().as_str().to_string();
        let name = match sanitize(&raw) {
            Ok(n) => n,
            Err(e) => {
                warn!(target: "datafuse::scan", "{}: hiding column {} '{}': {}", file_name, position, raw.escape_debug(), e.message());
                issues.push(ScanIssue { file: file_name.to_string(), column: Some(raw), reason: e.message().to_string() });
                continue;
            }
        };
        if !seen.insert(name.as_str().to_ascii_lowercase()) {
            warn!(target: "datafuse::scan", "{}: hiding duplicate column '{}'", file_name, name);
            issues.push(ScanIssue { file: file_name.to_string(), column: Some(raw), reason: format!("duplicate column name '{}'", name) });
            continue;
        }
        let profile = schema::profile_column(col, opts.categorical_cap).map_err(|e| format!("cannot profile column '{}': {}", raw, e))?;
        columns.push(ColumnInfo {
            table: table.clone(),
            name,
            raw_name: raw,
            position,
            kind: profile.kind,
            observed_min: profile.min,
            observed_max: profile.max,
            observed_categories: profile.categories,
        });
    }

    let row_count_estimate = estimate_rows(path, df.height(), opts.sample_rows, size);
    debug!(target: "datafuse::scan", "{}: table='{}' columns={} rows~{}", file_name, table, columns.len(), row_count_estimate);
    Ok(TableInfo { name: table, path: path.to_path_buf(), header_width: df.width(), columns, row_count_estimate, size_bytes: size, derived: Vec::new() })
}

/// Exact row count when the sample covered the whole file, otherwise an
/// extrapolation from the byte size of the sampled lines.
fn estimate_rows(path: &Path, sampled: usize, sample_limit: usize, file_size: u64) -> u64 {
    if sampled < sample_limit { return sampled as u64; }
    let Ok(f) = File::open(path) else { return sampled as u64 };
    let mut reader = BufReader::new(f);
    let mut buf = Vec::new();
    let header_bytes = match reader.read_until(b'\n', &mut buf) {
        Ok(n) => n as u64,
        Err(_) => return sampled as u64,
    };
    let mut sample_bytes = 0u64;
    for _ in 0..sampled {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => sample_bytes += n as u64,
        }
    }
    if sample_bytes == 0 { return sampled as u64; }
    let body = file_size.saturating_sub(header_bytes);
    ((body as f64 / sample_bytes as f64) * sampled as f64).round().max(sampled as f64) as u64
}
