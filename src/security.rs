//! Data-directory sandbox for CSV file paths.
//!
//! Table names become file lookups (`<data_dir>/<table>.csv`) and the SQL engine
//! is handed absolute paths, so every path that reaches either goes through
//! `sanitize_path` first.

use std::path::{Component, Path, PathBuf};

use path_absolutize::Absolutize;
use tracing::debug;

use crate::error::{FusionError, FusionResult};

/// Resolve the data directory itself to an absolute path, following symlinks when it exists.
pub fn resolve_data_dir(data_dir: &Path) -> FusionResult<PathBuf> {
    let abs = data_dir
        .absolutize()
        .map_err(|e| FusionError::scan(data_dir.display().to_string(), format!("cannot resolve data directory: {}", e)))?
        .to_path_buf();
    Ok(std::fs::canonicalize(&abs).unwrap_or(abs))
}

/// Sanitize `raw` (relative to `data_dir`, or absolute) into an absolute path that stays inside `data_dir`.
///
/// NUL bytes are removed and `.`/`..` segments are dropped before resolution. The
/// result must remain under the data directory both lexically and, when the file
/// exists, after symlink resolution; otherwise the path is rejected.
pub fn sanitize_path(data_dir: &Path, raw: &str) -> FusionResult<PathBuf> {
    let cleaned = raw.replace('\0', "").replace('\\', "/");
    if cleaned.trim().is_empty() {
        return Err(FusionError::path_traversal(raw, "empty path"));
    }
    let root = resolve_data_dir(data_dir)?;

    let is_absolute = cleaned.starts_with('/');
    let mut rel = PathBuf::new();
    for seg in cleaned.split('/') {
        let seg = seg.trim();
        if seg.is_empty() || seg == "." || seg == ".." { continue; }
        rel.push(seg);
    }
    let joined = if is_absolute { Path::new("/").join(&rel) } else { root.join(&rel) };
    let resolved = joined
        .absolutize()
        .map_err(|e| FusionError::path_traversal(raw, format!("cannot resolve path: {}", e)))?
        .to_path_buf();

    if !is_within(&resolved, &root) {
        return Err(FusionError::path_traversal(raw, format!("path resolves outside data directory '{}'", root.display())));
    }
    if resolved.exists() {
        let canonical = std::fs::canonicalize(&resolved)
            .map_err(|e| FusionError::path_traversal(raw, format!("cannot canonicalize path: {}", e)))?;
        if !is_within(&canonical, &root) {
            return Err(FusionError::path_traversal(raw, "symlink target escapes data directory"));
        }
        debug!(target: "datafuse::security", "sanitize_path: raw='{}' resolved='{}'", raw.escape_debug(), canonical.display());
        return Ok(canonical);
    }
    debug!(target: "datafuse::security", "sanitize_path: raw='{}' resolved='{}' (not yet on disk)", raw.escape_debug(), resolved.display());
    Ok(resolved)
}

fn is_within(path: &Path, root: &Path) -> bool {
    path.starts_with(root) && path.components().all(|c| !matches!(c, Component::ParentDir))
}

/// Escape a string for use inside a single-quoted SQL literal (DDL only; queries use bound parameters).
pub fn sql_string_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_names_resolve_inside_root() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("demographics.csv"), "ursi\nS1\n").unwrap();
        let p = sanitize_path(tmp.path(), "demographics.csv").unwrap();
        assert!(p.is_absolute());
        assert!(p.ends_with("demographics.csv"));
        assert!(p.starts_with(resolve_data_dir(tmp.path()).unwrap()));
    }

    #[test]
    fn parent_segments_are_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let p = sanitize_path(tmp.path(), "../../etc/passwd").unwrap();
        // ".." removed: stays inside the root
        assert!(p.starts_with(resolve_data_dir(tmp.path()).unwrap()));
        assert!(p.ends_with("etc/passwd"));
    }

    #[test]
    fn absolute_paths_outside_root_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let err = sanitize_path(tmp.path(), "/etc/passwd").unwrap_err();
        assert_eq!(err.kind(), "path_traversal");
        assert_eq!(err.offending(), "/etc/passwd");
    }

    #[test]
    fn null_bytes_are_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let p = sanitize_path(tmp.path(), "scores\0.csv").unwrap();
        assert!(p.ends_with("scores.csv"));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_rejected() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.csv"), "a\n1\n").unwrap();
        let tmp = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.csv"), tmp.path().join("link.csv")).unwrap();
        let err = sanitize_path(tmp.path(), "link.csv").unwrap_err();
        assert_eq!(err.kind(), "path_traversal");
    }

    #[test]
    fn literal_escaping() {
        assert_eq!(sql_string_literal("/data/o'brien.csv"), "'/data/o''brien.csv'");
    }
}
