//! Engine facade: owns configuration, the metadata cache and the executor, and
//! runs the scan -> detect -> build -> execute -> pivot pipeline for one data directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::FusionConfig;
use crate::error::{FusionError, FusionResult};
use crate::exec::{Executor, ResultTable};
use crate::export::{export_filename, query_export_filename, write_csv, QueryExport};
use crate::merge::{derive_composite_ids, detect, KeyConfig, MergeKeys};
use crate::pivot::{enwiden, EnwidenOptions};
use crate::query::{build, QueryPair, QuerySpec};
use crate::scan::{self, Catalog, MetadataCache, ScanOptions};
use crate::security::resolve_data_dir;

/// Catalog plus the merge keys detected for it; the unit the metadata cache holds.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub catalog: Arc<Catalog>,
    pub merge_keys: MergeKeys,
}

/// What `export_csv` produced.
#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub participant_count: u64,
    pub rows: usize,
    pub columns: usize,
    pub wide: bool,
}

pub struct Engine {
    config: FusionConfig,
    data_dir: PathBuf,
    keys: KeyConfig,
    scan_options: ScanOptions,
    pivot_options: EnwidenOptions,
    cache: MetadataCache<Snapshot>,
    executor: Executor,
}

impl Engine {
    /// Validate `config` and set up the cache and connection pool. Nothing is scanned yet.
    pub fn new(config: FusionConfig) -> FusionResult<Self> {
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(FusionError::configuration("config", problems.join("; ")));
        }
        let keys = KeyConfig::from_data_config(&config.data)?;
        let data_dir = resolve_data_dir(&config.data.data_dir)?;
        info!(
            target: "datafuse::engine",
            "engine ready: data_dir='{}' demographics='{}' pool={} timeout_ms={}",
            data_dir.display(), config.data.demographics_file, config.exec.pool_size, config.exec.query_timeout_ms
        );
        Ok(Engine {
            scan_options: ScanOptions::from(&config.scan),
            pivot_options: EnwidenOptions::from(&config.pivot),
            cache: MetadataCache::new(config.scan.freshness()),
            executor: Executor::new(&config.exec),
            data_dir,
            keys,
            config,
        })
    }

    pub fn config(&self) -> &FusionConfig { &self.config }

    pub fn data_dir(&self) -> &Path { &self.data_dir }

    pub fn cache(&self) -> &MetadataCache<Snapshot> { &self.cache }

    /// Current catalog and merge keys, rescanning only when the directory changed or the entry aged out.
    pub fn snapshot(&self) -> FusionResult<Arc<Snapshot>> {
        let dir = self.data_dir.clone();
        self.cache.get_or_load(
            &self.data_dir,
            || scan::fingerprint(&dir),
            |_| {
                let mut catalog = scan::scan(&self.data_dir, &self.config.data.demographics_file, &self.scan_options)?;
                for issue in &catalog.issues {
                    warn!(target: "datafuse::engine", "scan issue: file='{}' column={:?}: {}", issue.file, issue.column, issue.reason);
                }
                let merge_keys = detect(&catalog, &self.keys)?;
                derive_composite_ids(&mut catalog, &merge_keys);
                Ok(Snapshot { catalog: Arc::new(catalog), merge_keys })
            },
        )
    }

    pub fn build(&self, spec: &QuerySpec) -> FusionResult<QueryPair> {
        let snap = self.snapshot()?;
        build(spec, &snap.merge_keys, &snap.catalog)
    }

    /// Number of distinct participants matching the spec's filters.
    pub fn count(&self, spec: &QuerySpec) -> FusionResult<u64> {
        let snap = self.snapshot()?;
        let q = build(spec, &snap.merge_keys, &snap.catalog)?;
        self.executor.count(&snap.catalog, &q.count)
    }

    /// Run the data query, widening longitudinal results when `pivot_to_wide` is set.
    pub fn fetch(&self, spec: &QuerySpec) -> FusionResult<ResultTable> {
        let snap = self.snapshot()?;
        let q = build(spec, &snap.merge_keys, &snap.catalog)?;
        let table = self.executor.run(&snap.catalog, &q.data)?;
        if spec.pivot_to_wide && snap.merge_keys.is_longitudinal {
            return enwiden(&table, &snap.merge_keys, &self.pivot_options);
        }
        Ok(table)
    }

    /// Fetch and write a CSV into `out_dir` under a generated file name.
    pub fn export_csv(&self, spec: &QuerySpec, out_dir: &Path) -> FusionResult<ExportSummary> {
        let snap = self.snapshot()?;
        let q = build(spec, &snap.merge_keys, &snap.catalog)?;
        let participant_count = self.executor.count(&snap.catalog, &q.count)?;
        let mut table = self.executor.run(&snap.catalog, &q.data)?;
        let wide = spec.pivot_to_wide && snap.merge_keys.is_longitudinal;
        if wide {
            table = enwiden(&table, &snap.merge_keys, &self.pivot_options)?;
        }
        let mut named: Vec<String> = spec.selected_tables.clone();
        named.extend(spec.selected_columns.keys().filter(|t| !spec.selected_tables.contains(t)).cloned());
        let file = export_filename(&named, snap.catalog.base_table.as_str(), wide, Local::now().naive_local());
        let path = out_dir.join(file);
        write_csv(&table, &path)?;
        Ok(ExportSummary { path, participant_count, rows: table.len(), columns: table.columns.len(), wide })
    }

    /// Save `spec` with provenance into `out_dir` once it builds against the current data.
    pub fn save_query(&self, spec: &QuerySpec, user_notes: &str, out_dir: &Path) -> FusionResult<PathBuf> {
        self.build(spec)?;
        let now = Local::now();
        let path = out_dir.join(query_export_filename(user_notes, now.naive_local()));
        QueryExport::new(spec.clone(), user_notes, now).save(&path)?;
        info!(target: "datafuse::engine", "saved query parameters to '{}'", path.display());
        Ok(path)
    }

    /// Distinct session labels of the base table (empty when cross-sectional).
    pub fn session_values(&self) -> FusionResult<Vec<String>> {
        let snap = self.snapshot()?;
        self.executor.session_values(&snap.catalog, &snap.merge_keys)
    }

    /// Force the next call to rescan the data directory.
    pub fn invalidate(&self) { self.cache.invalidate(&self.data_dir); }
}
