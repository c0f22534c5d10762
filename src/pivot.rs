//! Long-to-wide pivoting of longitudinal results.
//!
//! `enwiden` turns one row per subject-session into one row per subject:
//! subject-invariant columns appear once, every session-varying column `c`
//! becomes `c_<session>` for each session label seen in the input. `melt` is
//! the inverse, used to check that nothing was lost.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::PivotConfig;
use crate::error::{FusionError, FusionResult};
use crate::exec::{ResultTable, Value};
use crate::merge::MergeKeys;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnwidenOptions {
    /// Fold baseline spellings (`baseline_labels`, case-insensitive) into `baseline_canonical`
    pub consolidate_baseline: bool,
    pub baseline_labels: Vec<String>,
    pub baseline_canonical: String,
}

impl From<&PivotConfig> for EnwidenOptions {
    fn from(c: &PivotConfig) -> Self {
        EnwidenOptions {
            consolidate_baseline: c.consolidate_baseline,
            baseline_labels: c.baseline_labels.clone(),
            baseline_canonical: c.baseline_canonical.clone(),
        }
    }
}

impl EnwidenOptions {
    fn label(&self, raw: String) -> String {
        if self.consolidate_baseline && self.baseline_labels.iter().any(|b| b.eq_ignore_ascii_case(&raw)) {
            return self.baseline_canonical.clone();
        }
        raw
    }
}

/// How a wide table was derived from its long form.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct WideLayout {
    pub invariant_columns: Vec<String>,
    pub varying_columns: Vec<String>,
    /// Session labels in first-appearance order
    pub sessions: Vec<String>,
    /// `c_s` names that collided with another output column, mapped to the name used instead
    pub renamed: BTreeMap<String, String>,
}

impl WideLayout {
    /// Output name of varying column `column` in session `session`.
    pub fn wide_name(&self, column: &str, session: &str) -> String {
        let wanted = wide_column_name(column, session);
        self.renamed.get(&wanted).cloned().unwrap_or(wanted)
    }
}

pub fn wide_column_name(column: &str, session: &str) -> String { format!("{}_{}", column, session) }

struct Subject {
    id: Value,
    /// row indices with a session label, keyed by label
    by_label: HashMap<String, usize>,
    /// every kept row, in input order
    rows: Vec<usize>,
}

fn distinct_non_null<'a>(values: impl Iterator<Item = &'a Value>) -> usize {
    let mut seen: Vec<&Value> = Vec::new();
    for v in values {
        if v.is_null() || seen.contains(&v) { continue; }
        seen.push(v);
        if seen.len() > 1 { break; }
    }
    seen.len()
}

/// Pivot `table` to one row per subject. Cross-sectional keys return the table unchanged.
pub fn enwiden(table: &ResultTable, keys: &MergeKeys, opts: &EnwidenOptions) -> FusionResult<ResultTable> {
    enwiden_with_layout(table, keys, opts).map(|(t, _)| t)
}

pub fn enwiden_with_layout(table: &ResultTable, keys: &MergeKeys, opts: &EnwidenOptions) -> FusionResult<(ResultTable, WideLayout)> {
    let session_name = match (&keys.session_column, keys.is_longitudinal) {
        (Some(s), true) => s.as_str(),
        _ => return Ok((table.clone(), WideLayout::default())),
    };
    let pid = keys.primary_id_column.as_str();
    let pid_idx = table
        .column_index(pid)
        .ok_or_else(|| FusionError::unknown_identifier(pid, "result has no primary id column to pivot on"))?;
    let Some(sess_idx) = table.column_index(session_name) else {
        debug!(target: "datafuse::pivot", "no '{}' column in result; nothing to widen", session_name);
        return Ok((table.clone(), WideLayout::default()));
    };
    let comp_idx = keys.composite_id_column.as_ref().and_then(|c| table.column_index(c.as_str()));
    let data_cols: Vec<usize> = (0..table.columns.len()).filter(|i| *i != pid_idx && *i != sess_idx && Some(*i) != comp_idx).collect();

    // pass 1: group
    let mut subjects: Vec<Subject> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut sessions: Vec<String> = Vec::new();
    let mut null_ids = 0usize;
    for (r, row) in table.rows.iter().enumerate() {
        let Some(key) = row[pid_idx].as_label() else {
            null_ids += 1;
            continue;
        };
        let si = *index.entry(key).or_insert_with(|| {
            subjects.push(Subject { id: row[pid_idx].clone(), by_label: HashMap::new(), rows: Vec::new() });
            subjects.len() - 1
        });
        let subject = &mut subjects[si];
        match row[sess_idx].as_label().map(|l| opts.label(l)) {
            Some(label) => {
                if subject.by_label.contains_key(&label) {
                    warn!(target: "datafuse::pivot", "duplicate row for subject '{}' session '{}'; keeping the first", row[pid_idx], label);
                    continue;
                }
                if !sessions.contains(&label) { sessions.push(label.clone()); }
                subject.by_label.insert(label, r);
                subject.rows.push(r);
            }
            None => subject.rows.push(r),
        }
    }
    if null_ids > 0 {
        warn!(target: "datafuse::pivot", "dropped {} rows with a null '{}'", null_ids, pid);
    }

    // classify
    let (mut invariant, mut varying) = (Vec::new(), Vec::new());
    for &c in &data_cols {
        let varies = subjects.iter().any(|s| distinct_non_null(s.rows.iter().map(|&r| &table.rows[r][c])) > 1);
        if varies { varying.push(c) } else { invariant.push(c) }
    }

    // pass 2: widen
    let mut columns = vec![table.columns[pid_idx].clone()];
    columns.extend(invariant.iter().map(|&c| table.columns[c].clone()));
    let mut used: HashSet<String> = columns.iter().cloned().collect();
    let mut renamed = BTreeMap::new();
    for &c in &varying {
        for s in &sessions {
            let wanted = wide_column_name(&table.columns[c], s);
            let mut name = wanted.clone();
            let mut n = 2usize;
            while used.contains(&name) {
                name = format!("{}_{}", wanted, n);
                n += 1;
            }
            if name != wanted {
                warn!(target: "datafuse::pivot", "wide column '{}' already exists; writing it as '{}'", wanted, name);
                renamed.insert(wanted, name.clone());
            }
            used.insert(name.clone());
            columns.push(name);
        }
    }
    let mut out = ResultTable::new(columns);
    for s in &subjects {
        let mut row = Vec::with_capacity(out.columns.len());
        row.push(s.id.clone());
        for &c in &invariant {
            row.push(s.rows.iter().map(|&r| &table.rows[r][c]).find(|v| !v.is_null()).cloned().unwrap_or(Value::Null));
        }
        for &c in &varying {
            for label in &sessions {
                row.push(s.by_label.get(label).map(|&r| table.rows[r][c].clone()).unwrap_or(Value::Null));
            }
        }
        out.push_row(row)?;
    }
    debug!(
        target: "datafuse::pivot",
        "enwiden: {} rows -> {} subjects, invariant={} varying={} sessions={:?}",
        table.len(), out.len(), invariant.len(), varying.len(), sessions
    );
    let layout = WideLayout {
        invariant_columns: invariant.iter().map(|&c| table.columns[c].clone()).collect(),
        varying_columns: varying.iter().map(|&c| table.columns[c].clone()).collect(),
        sessions,
        renamed,
    };
    Ok((out, layout))
}

/// Inverse of `enwiden`: one row per (subject, session) that has at least one
/// non-null varying value. Columns: primary id, session, invariant columns, varying columns.
pub fn melt(wide: &ResultTable, keys: &MergeKeys, layout: &WideLayout) -> FusionResult<ResultTable> {
    let (varying_columns, sessions) = (&layout.varying_columns, &layout.sessions);
    let pid = keys.primary_id_column.as_str();
    let session_name = keys.session_column.as_ref().map(|s| s.as_str()).unwrap_or("session");
    let pid_idx = wide
        .column_index(pid)
        .ok_or_else(|| FusionError::unknown_identifier(pid, "wide table has no primary id column"))?;

    let mut cells: HashMap<(usize, usize), usize> = HashMap::new();
    for (vi, c) in varying_columns.iter().enumerate() {
        for (si, s) in sessions.iter().enumerate() {
            let name = layout.wide_name(c, s);
            let idx = wide.column_index(&name).ok_or_else(|| FusionError::unknown_identifier(name.clone(), "wide table lacks this column"))?;
            cells.insert((vi, si), idx);
        }
    }
    let wide_idx: Vec<usize> = cells.values().copied().collect();
    let invariant: Vec<usize> = (0..wide.columns.len()).filter(|i| *i != pid_idx && !wide_idx.contains(i)).collect();

    let mut columns = vec![pid.to_string(), session_name.to_string()];
    columns.extend(invariant.iter().map(|&i| wide.columns[i].clone()));
    columns.extend(varying_columns.iter().cloned());
    let mut out = ResultTable::new(columns);
    for row in &wide.rows {
        for (si, s) in sessions.iter().enumerate() {
            let values: Vec<Value> = (0..varying_columns.len()).map(|vi| row[cells[&(vi, si)]].clone()).collect();
            if values.iter().all(Value::is_null) { continue; }
            let mut r = vec![row[pid_idx].clone(), Value::text(s.as_str())];
            r.extend(invariant.iter().map(|&i| row[i].clone()));
            r.extend(values);
            out.push_row(r)?;
        }
    }
    Ok(out)
}
