//! Spec validation and SQL rendering.
//!
//! Every table and column name in the generated text is a catalog `Identifier`,
//! always double-quoted. Filter values and session labels travel only as bound
//! `?` parameters. Rendering is a pure function of its inputs, so the same spec
//! over the same catalog yields byte-identical SQL.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, warn};

use crate::error::{FusionError, FusionResult};
use crate::ident::{validate_against_catalog, validate_table, Identifier};
use crate::merge::MergeKeys;
use crate::scan::schema::{Catalog, ColumnKind, TableInfo};

use super::query_spec::{Filter, GeneratedQuery, Param, QueryPair, QuerySpec, SessionFilter};

/// Output label of the count query.
pub const COUNT_LABEL: &str = "participant_count";

#[derive(Debug, Clone)]
enum Condition {
    Range { min: Option<f64>, max: Option<f64> },
    OneOf(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct ResolvedFilter {
    table: Identifier,
    column: Identifier,
    cond: Condition,
}

fn resolve_filter(f: &Filter, catalog: &Catalog, base_only: bool) -> FusionResult<ResolvedFilter> {
    let table = validate_table(f.table(), catalog)?;
    if base_only && !catalog.is_base(&table) {
        return Err(FusionError::unknown_identifier(
            f.table(),
            format!("demographic filters must target the base table '{}'", catalog.base_table),
        ));
    }
    let column = validate_against_catalog(f.column(), &table, catalog)?;
    let cond = match f {
        Filter::NumericRange { min, max, .. } => {
            for b in [min, max].into_iter().flatten() {
                if !b.is_finite() {
                    return Err(FusionError::conflicting_filter(format!("{}.{}", table, column), format!("range bound {} is not a finite number", b)));
                }
            }
            Condition::Range { min: *min, max: *max }
        }
        Filter::Categorical { allowed_values, .. } => Condition::OneOf(allowed_values.clone()),
    };
    Ok(ResolvedFilter { table, column, cond })
}

/// Numeric ranges need a numeric column; one column cannot carry both filter shapes.
fn check_conflicts(filters: &[ResolvedFilter], catalog: &Catalog) -> FusionResult<()> {
    let mut shapes: HashMap<(&Identifier, &Identifier), bool> = HashMap::new();
    for f in filters {
        let name = format!("{}.{}", f.table, f.column);
        let is_range = matches!(f.cond, Condition::Range { .. });
        if is_range {
            let kind = catalog.table(f.table.as_str()).and_then(|t| t.column(f.column.as_str())).map(|c| c.kind);
            if kind != Some(ColumnKind::Numeric) {
                return Err(FusionError::conflicting_filter(name, "numeric range filter on a non-numeric column"));
            }
        }
        if let Some(prev) = shapes.insert((&f.table, &f.column), is_range) {
            if prev != is_range {
                return Err(FusionError::conflicting_filter(name, "column is filtered as both numeric and categorical"));
            }
        }
    }
    Ok(())
}

fn push_table(order: &mut Vec<Identifier>, t: &Identifier) {
    if !order.contains(t) { order.push(t.clone()); }
}

fn join_predicate(base: &TableInfo, sat: &TableInfo, keys: &MergeKeys) -> FusionResult<String> {
    let pk = &keys.primary_id_column;
    if !sat.has_column(pk) {
        return Err(FusionError::unknown_identifier(
            format!("{}.{}", sat.name, pk),
            "table lacks the primary id column needed to join it",
        ));
    }
    let on = |c: &Identifier| format!("{} = {}", Identifier::qualified(&base.name, c), Identifier::qualified(&sat.name, c));
    if keys.is_longitudinal {
        if let Some(cid) = &keys.composite_id_column {
            if base.has_column(cid) && sat.has_column(cid) {
                return Ok(on(cid));
            }
        }
        if let Some(sess) = &keys.session_column {
            if sat.has_column(sess) {
                return Ok(format!("{} AND {}", on(pk), on(sess)));
            }
        }
    }
    Ok(on(pk))
}

fn placeholders(n: usize) -> String { vec!["?"; n].join(", ") }

/// Range predicates compare `TRY_CAST(col AS DOUBLE)`, so cells that are not
/// numbers (including ones past the scan sample) compare as NULL.
fn render_condition(target: &str, cond: &Condition, params: &mut Vec<Param>) -> Option<String> {
    match cond {
        Condition::Range { min, max } => {
            let mut parts = Vec::new();
            let numeric = format!("TRY_CAST({} AS DOUBLE)", target);
            if let Some(v) = min {
                parts.push(format!("{} >= ?", numeric));
                params.push(Param::Float(*v));
            }
            if let Some(v) = max {
                parts.push(format!("{} <= ?", numeric));
                params.push(Param::Float(*v));
            }
            if parts.is_empty() { None } else { Some(parts.join(" AND ")) }
        }
        Condition::OneOf(values) => Some(render_in(target, values, params)),
    }
}

fn render_in(target: &str, values: &BTreeSet<String>, params: &mut Vec<Param>) -> String {
    if values.is_empty() {
        return "FALSE".to_string();
    }
    params.extend(values.iter().map(|v| Param::Text(v.clone())));
    format!("CAST({} AS VARCHAR) IN ({})", target, placeholders(values.len()))
}

struct SelectItem {
    expr: String,
    label: Identifier,
}

fn unique_label(table: &Identifier, column: &Identifier, used: &mut HashSet<Identifier>) -> Identifier {
    if used.insert(column.clone()) {
        return column.clone();
    }
    let prefixed = Identifier::joined(table, column);
    if used.insert(prefixed.clone()) {
        return prefixed;
    }
    let mut n = 2usize;
    loop {
        let candidate = Identifier::numbered(&prefixed, n);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Validate `spec` against the catalog and render the count and data queries.
///
/// Fails fast on the first invalid identifier, in this order: selected tables,
/// selected columns, demographic filters, phenotypic filters. Nothing is executed.
pub fn build(spec: &QuerySpec, keys: &MergeKeys, catalog: &Catalog) -> FusionResult<QueryPair> {
    let base = catalog.base();

    // 1. validation
    let mut selection_order: Vec<Identifier> = Vec::new();
    for raw in &spec.selected_tables {
        let t = validate_table(raw, catalog)?;
        push_table(&mut selection_order, &t);
    }
    let mut selections: HashMap<Identifier, Vec<Identifier>> = HashMap::new();
    for (raw_table, cols) in &spec.selected_columns {
        let t = validate_table(raw_table, catalog)?;
        let entry = selections.entry(t.clone()).or_default();
        for raw in cols {
            let c = validate_against_catalog(raw, &t, catalog)?;
            if !entry.contains(&c) { entry.push(c); }
        }
        push_table(&mut selection_order, &t);
    }
    let mut filters: Vec<ResolvedFilter> = Vec::with_capacity(spec.demographic_filters.len() + spec.phenotypic_filters.len());
    for f in &spec.demographic_filters {
        filters.push(resolve_filter(f, catalog, true)?);
    }
    for f in &spec.phenotypic_filters {
        filters.push(resolve_filter(f, catalog, false)?);
    }
    check_conflicts(&filters, catalog)?;
    if selections.values().all(|cols| cols.is_empty()) {
        return Err(FusionError::empty_selection("no columns selected from any table"));
    }

    // 2. joins: selected tables, then column-only tables, then filter-only tables
    let mut join_order: Vec<Identifier> = Vec::new();
    for t in &selection_order {
        if !catalog.is_base(t) { push_table(&mut join_order, t); }
    }
    for f in &filters {
        if !catalog.is_base(&f.table) { push_table(&mut join_order, &f.table); }
    }
    let mut from = format!("FROM {}", base.name.quoted());
    for t in &join_order {
        let Some(sat) = catalog.table(t.as_str()) else {
            return Err(FusionError::unknown_identifier(t.as_str(), "table is not present in the scanned data directory"));
        };
        from.push_str(&format!("\nLEFT JOIN {} ON {}", t.quoted(), join_predicate(base, sat, keys)?));
    }

    // 3/4. predicates, params in the same order
    let mut params: Vec<Param> = Vec::new();
    let mut predicates: Vec<String> = Vec::new();
    for f in &filters {
        if let Some(p) = render_condition(&Identifier::qualified(&f.table, &f.column), &f.cond, &mut params) {
            predicates.push(p);
        }
    }
    if let SessionFilter::Only(labels) = &spec.session_filter {
        match (&keys.session_column, keys.is_longitudinal) {
            (Some(sess), true) => predicates.push(render_in(&Identifier::qualified(&base.name, sess), labels, &mut params)),
            _ => warn!(target: "datafuse::query", "session filter ignored: data set is cross-sectional"),
        }
    }
    let where_clause = if predicates.is_empty() { String::new() } else { format!("\nWHERE {}", predicates.join("\nAND ")) };

    // 5. select list
    let mut items: Vec<SelectItem> = Vec::new();
    let mut used_labels: HashSet<Identifier> = HashSet::new();
    let mut emitted: HashSet<(Identifier, Identifier)> = HashSet::new();
    let mut key_columns: Vec<&Identifier> = vec![&keys.primary_id_column];
    if keys.is_longitudinal {
        if let Some(s) = &keys.session_column { key_columns.push(s); }
        if let Some(c) = &keys.composite_id_column {
            if base.has_column(c) { key_columns.push(c); }
        }
    }
    for k in key_columns {
        if !base.has_column(k) { continue; }
        emitted.insert((base.name.clone(), k.clone()));
        let label = unique_label(&base.name, k, &mut used_labels);
        items.push(SelectItem { expr: Identifier::qualified(&base.name, k), label });
    }
    for t in &selection_order {
        let Some(cols) = selections.get(t) else { continue };
        let satellite = !catalog.is_base(t);
        for c in cols {
            if satellite && keys.is_key(c) { continue; }
            if !emitted.insert((t.clone(), c.clone())) { continue; }
            let label = unique_label(t, c, &mut used_labels);
            items.push(SelectItem { expr: Identifier::qualified(t, c), label });
        }
    }
    let select_list = items.iter().map(|i| format!("{} AS {}", i.expr, i.label.quoted())).collect::<Vec<_>>().join(", ");
    let columns: Vec<String> = items.iter().map(|i| i.label.to_string()).collect();

    // 6. count
    let pk = Identifier::qualified(&base.name, &keys.primary_id_column);
    let count_sql = format!("SELECT COUNT(DISTINCT {}) AS \"{}\"\n{}{}", pk, COUNT_LABEL, from, where_clause);

    // 7. data, ordered for reproducible exports
    let mut order_by = vec![pk];
    if keys.is_longitudinal {
        if let Some(s) = &keys.session_column {
            if base.has_column(s) { order_by.push(Identifier::qualified(&base.name, s)); }
        }
    }
    let data_sql = format!("SELECT {}\n{}{}\nORDER BY {}", select_list, from, where_clause, order_by.join(", "));

    debug!(
        target: "datafuse::query",
        "built query: joins={} predicates={} params={} columns={}",
        join_order.len(), predicates.len(), params.len(), columns.len()
    );
    Ok(QueryPair {
        count: GeneratedQuery { sql_text: count_sql, bound_parameters: params.clone(), columns: vec![COUNT_LABEL.to_string()] },
        data: GeneratedQuery { sql_text: data_sql, bound_parameters: params, columns },
    })
}
