//! Engine configuration: TOML file with per-field defaults, overridable from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{FusionError, FusionResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FusionConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub pivot: PivotConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory holding the CSV files (non-recursive)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// File name of the base table every query starts from
    #[serde(default = "default_demographics_file")]
    pub demographics_file: String,
    #[serde(default = "default_primary_id")]
    pub primary_id_column: String,
    #[serde(default = "default_session_column")]
    pub session_column: String,
    #[serde(default = "default_composite_id")]
    pub composite_id_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Rows read per file for dtype inference and value ranges
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,
    /// String columns with at most this many distinct values are categorical
    #[serde(default = "default_categorical_cap")]
    pub categorical_cap: usize,
    /// How long a cached scan stays valid when the file set is unchanged
    #[serde(default = "default_freshness_secs")]
    pub freshness_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Per-query timeout in milliseconds (0 = no timeout)
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PivotConfig {
    /// Fold baseline session spellings into one suffix when widening
    #[serde(default)]
    pub consolidate_baseline: bool,
    #[serde(default = "default_baseline_labels")]
    pub baseline_labels: Vec<String>,
    #[serde(default = "default_baseline_canonical")]
    pub baseline_canonical: String,
}

fn default_data_dir() -> PathBuf { PathBuf::from("data") }
fn default_demographics_file() -> String { "demographics.csv".to_string() }
fn default_primary_id() -> String { "ursi".to_string() }
fn default_session_column() -> String { "session_num".to_string() }
fn default_composite_id() -> String { "customID".to_string() }
fn default_sample_rows() -> usize { 1000 }
fn default_categorical_cap() -> usize { 50 }
fn default_freshness_secs() -> u64 { 600 }
fn default_pool_size() -> usize { 2 }
fn default_query_timeout_ms() -> u64 { 30_000 }
fn default_baseline_labels() -> Vec<String> {
    ["baseline", "BAS1", "BAS2", "BAS3", "BL"].iter().map(|s| s.to_string()).collect()
}
fn default_baseline_canonical() -> String { "baseline".to_string() }

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            demographics_file: default_demographics_file(),
            primary_id_column: default_primary_id(),
            session_column: default_session_column(),
            composite_id_column: default_composite_id(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { sample_rows: default_sample_rows(), categorical_cap: default_categorical_cap(), freshness_secs: default_freshness_secs() }
    }
}

impl Default for ExecConfig {
    fn default() -> Self { Self { pool_size: default_pool_size(), query_timeout_ms: default_query_timeout_ms() } }
}

impl Default for PivotConfig {
    fn default() -> Self {
        Self { consolidate_baseline: false, baseline_labels: default_baseline_labels(), baseline_canonical: default_baseline_canonical() }
    }
}

impl ScanConfig {
    pub fn freshness(&self) -> Duration { Duration::from_secs(self.freshness_secs) }
}

impl ExecConfig {
    pub fn query_timeout(&self) -> Option<Duration> {
        if self.query_timeout_ms == 0 { None } else { Some(Duration::from_millis(self.query_timeout_ms)) }
    }
}

impl FusionConfig {
    /// Defaults for everything except the data directory.
    pub fn for_data_dir<P: Into<PathBuf>>(dir: P) -> Self {
        let mut cfg = Self::default();
        cfg.data.data_dir = dir.into();
        cfg
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> FusionResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| FusionError::configuration(path.display().to_string(), format!("cannot read config file: {}", e)))?;
        let mut cfg: FusionConfig = toml::from_str(&text)
            .map_err(|e| FusionError::configuration(path.display().to_string(), format!("invalid config file: {}", e)))?;
        cfg.apply_env_overrides()?;
        info!(target: "datafuse::config", "loaded config from '{}' data_dir='{}'", path.display(), cfg.data.data_dir.display());
        Ok(cfg)
    }

    /// Defaults plus environment overrides, used when no config file is given.
    pub fn from_env() -> FusionResult<Self> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) -> FusionResult<()> {
        if let Ok(v) = std::env::var("DATAFUSE_DATA_DIR") { self.data.data_dir = PathBuf::from(v); }
        if let Ok(v) = std::env::var("DATAFUSE_DEMOGRAPHICS_FILE") { self.data.demographics_file = v; }
        if let Ok(v) = std::env::var("DATAFUSE_PRIMARY_ID") { self.data.primary_id_column = v; }
        if let Ok(v) = std::env::var("DATAFUSE_SESSION_COLUMN") { self.data.session_column = v; }
        if let Ok(v) = std::env::var("DATAFUSE_COMPOSITE_ID") { self.data.composite_id_column = v; }
        if let Ok(v) = std::env::var("DATAFUSE_QUERY_TIMEOUT_MS") {
            self.exec.query_timeout_ms = v.trim().parse().map_err(|_| FusionError::configuration("DATAFUSE_QUERY_TIMEOUT_MS", format!("not a number: '{}'", v)))?;
        }
        if let Ok(v) = std::env::var("DATAFUSE_POOL_SIZE") {
            self.exec.pool_size = v.trim().parse().map_err(|_| FusionError::configuration("DATAFUSE_POOL_SIZE", format!("not a number: '{}'", v)))?;
        }
        debug!(target: "datafuse::config", "effective config: {:?}", self);
        Ok(())
    }

    /// Collect every problem instead of stopping at the first one.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.data.data_dir.as_os_str().is_empty() { errors.push("data_dir cannot be empty".to_string()); }
        if self.data.demographics_file.trim().is_empty() { errors.push("demographics_file cannot be empty".to_string()); }
        if self.data.primary_id_column.trim().is_empty() { errors.push("primary_id_column cannot be empty".to_string()); }
        if self.scan.sample_rows == 0 { errors.push("scan.sample_rows must be positive".to_string()); }
        if self.scan.freshness_secs == 0 { errors.push("scan.freshness_secs must be positive".to_string()); }
        if self.exec.pool_size == 0 { errors.push("exec.pool_size must be positive".to_string()); }
        if self.pivot.consolidate_baseline && self.pivot.baseline_canonical.trim().is_empty() {
            errors.push("pivot.baseline_canonical cannot be empty when consolidating".to_string());
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: FusionConfig = toml::from_str(
            r#"
            [data]
            data_dir = "/srv/cohort"
            session_column = "visit"

            [exec]
            query_timeout_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(cfg.data.data_dir, PathBuf::from("/srv/cohort"));
        assert_eq!(cfg.data.session_column, "visit");
        assert_eq!(cfg.data.primary_id_column, "ursi");
        assert_eq!(cfg.exec.pool_size, 2);
        assert_eq!(cfg.exec.query_timeout(), Some(Duration::from_millis(500)));
        assert_eq!(cfg.scan.freshness(), Duration::from_secs(600));
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn validate_reports_all_problems() {
        let mut cfg = FusionConfig::default();
        cfg.data.primary_id_column = " ".into();
        cfg.exec.pool_size = 0;
        let errs = cfg.validate();
        assert_eq!(errs.len(), 2, "{:?}", errs);
    }

    #[test]
    fn zero_timeout_disables_it() {
        let mut cfg = FusionConfig::default();
        cfg.exec.query_timeout_ms = 0;
        assert_eq!(cfg.exec.query_timeout(), None);
    }
}
