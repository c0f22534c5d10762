//! Query execution over CSV-backed DuckDB views.
//!
//! Each pooled connection gets one view per catalog table, named after the
//! table and exposing the sanitized column names by header position. Views are
//! re-registered whenever a connection sees a catalog with a different
//! fingerprint. Queries run with positional bound parameters only.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate};
use duckdb::types::{TimeUnit, ToSql, ToSqlOutput, Value as DuckValue};
use tracing::{debug, info, warn};

use crate::config::ExecConfig;
use crate::error::{FusionError, FusionResult};
use crate::ident::Identifier;
use crate::merge::MergeKeys;
use crate::query::{GeneratedQuery, Param};
use crate::scan::schema::{Catalog, TableInfo};
use crate::security::sql_string_literal;

pub mod pool;
pub mod result;

pub use pool::{ConnectionPool, PoolGuard, PooledConn};
pub use result::{ResultTable, Value};

impl ToSql for Param {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Param::Float(f) => ToSqlOutput::Owned(DuckValue::Double(*f)),
            Param::Text(s) => ToSqlOutput::Owned(DuckValue::Text(s.clone())),
        })
    }
}

/// DDL for one table view. Paths are inlined as escaped string literals; every
/// other name is a quoted identifier. Derived columns follow the file columns.
pub fn view_ddl(table: &TableInfo) -> String {
    let cols = table.view_columns().iter().map(|c| c.quoted()).collect::<Vec<_>>().join(", ");
    let source = format!("read_csv_auto({}, header = true)", sql_string_literal(&table.path.to_string_lossy()));
    if table.derived.is_empty() {
        return format!("CREATE OR REPLACE VIEW {}({}) AS SELECT * FROM {}", table.name.quoted(), cols, source);
    }
    let derived = table
        .derived
        .iter()
        .map(|d| {
            let parts = d.parts.iter().map(|p| format!("CAST({} AS VARCHAR)", p.quoted())).collect::<Vec<_>>();
            format!("{} AS {}", parts.join(" || '_' || "), d.name.quoted())
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE OR REPLACE VIEW {} AS SELECT *, {} FROM {} AS src({})", table.name.quoted(), derived, source, cols)
}

fn ensure_views(pc: &mut PooledConn, catalog: &Catalog) -> FusionResult<()> {
    let stamp = (catalog.data_dir.clone(), catalog.fingerprint);
    if pc.registered.as_ref() == Some(&stamp) {
        return Ok(());
    }
    let mut ddl = String::new();
    for old in &pc.views {
        if catalog.table(old.as_str()).is_none() {
            ddl.push_str(&format!("DROP VIEW IF EXISTS {};\n", old.quoted()));
        }
    }
    for t in catalog.tables.values() {
        ddl.push_str(&view_ddl(t));
        ddl.push_str(";\n");
    }
    pc.conn.execute_batch(&ddl).map_err(|e| FusionError::execution("view registration", e.to_string()))?;
    pc.views = catalog.tables.keys().cloned().collect();
    pc.registered = Some(stamp);
    debug!(target: "datafuse::exec", "registered {} views for '{}'", pc.views.len(), catalog.data_dir.display());
    Ok(())
}

fn to_value(v: DuckValue) -> Value {
    match v {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(i) => Value::Int(i as i64),
        DuckValue::SmallInt(i) => Value::Int(i as i64),
        DuckValue::Int(i) => Value::Int(i as i64),
        DuckValue::BigInt(i) => Value::Int(i),
        DuckValue::HugeInt(i) => i64::try_from(i).map(Value::Int).unwrap_or(Value::Float(i as f64)),
        DuckValue::UTinyInt(i) => Value::Int(i as i64),
        DuckValue::USmallInt(i) => Value::Int(i as i64),
        DuckValue::UInt(i) => Value::Int(i as i64),
        DuckValue::UBigInt(i) => i64::try_from(i).map(Value::Int).unwrap_or(Value::Float(i as f64)),
        DuckValue::Float(f) => Value::Float(f as f64),
        DuckValue::Double(f) => Value::Float(f),
        DuckValue::Decimal(d) => d.to_string().parse::<f64>().map(Value::Float).unwrap_or_else(|_| Value::Text(d.to_string())),
        DuckValue::Text(s) => Value::Text(s),
        DuckValue::Enum(s) => Value::Text(s),
        DuckValue::Date32(days) => NaiveDate::from_num_days_from_ce_opt(719_163 + days)
            .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Int(days as i64)),
        DuckValue::Timestamp(unit, raw) => {
            let micros = match unit {
                TimeUnit::Second => raw.saturating_mul(1_000_000),
                TimeUnit::Millisecond => raw.saturating_mul(1_000),
                TimeUnit::Microsecond => raw,
                TimeUnit::Nanosecond => raw / 1_000,
            };
            DateTime::from_timestamp_micros(micros)
                .map(|ts| Value::Text(ts.naive_utc().format("%Y-%m-%d %H:%M:%S").to_string()))
                .unwrap_or(Value::Int(raw))
        }
        other => Value::Text(format!("{:?}", other)),
    }
}

fn run_on(pc: &mut PooledConn, catalog: &Catalog, query: &GeneratedQuery) -> FusionResult<ResultTable> {
    ensure_views(pc, catalog)?;
    let mut stmt = pc.conn.prepare(&query.sql_text)?;
    let mut rows = stmt.query(duckdb::params_from_iter(query.bound_parameters.iter()))?;
    let width = query.columns.len();
    let mut out = ResultTable::new(query.columns.clone());
    while let Some(row) = rows.next()? {
        let mut cells = Vec::with_capacity(width);
        for i in 0..width {
            cells.push(to_value(row.get_ref(i)?.to_owned()));
        }
        out.push_row(cells)?;
    }
    Ok(out)
}

/// Runs generated queries on pooled connections with an optional per-query timeout.
#[derive(Clone)]
pub struct Executor {
    pool: ConnectionPool,
    timeout: Option<Duration>,
}

impl Executor {
    pub fn new(cfg: &ExecConfig) -> Self { Self::with_pool(ConnectionPool::new(cfg.pool_size), cfg.query_timeout()) }

    pub fn with_pool(pool: ConnectionPool, timeout: Option<Duration>) -> Self { Executor { pool, timeout } }

    pub fn timeout(&self) -> Option<Duration> { self.timeout }

    pub fn pool(&self) -> &ConnectionPool { &self.pool }

    /// Execute `query` against `catalog`. On timeout the caller gets
    /// `QueryTimeout` immediately; the worker keeps the connection until the
    /// statement completes and then returns it to the pool.
    pub fn run(&self, catalog: &Arc<Catalog>, query: &GeneratedQuery) -> FusionResult<ResultTable> {
        let mut guard = self.pool.checkout(self.timeout)?;
        debug!(target: "datafuse::exec", "run: params={} sql={}", query.bound_parameters.len(), query.sql_text.replace('\n', " "));
        let Some(limit) = self.timeout else {
            return run_on(&mut guard, catalog, query);
        };
        let (tx, rx) = mpsc::channel();
        let catalog = catalog.clone();
        let q = query.clone();
        std::thread::Builder::new()
            .name("datafuse-query".into())
            .spawn(move || {
                let res = run_on(&mut guard, &catalog, &q);
                drop(guard);
                let _ = tx.send(res);
            })
            .map_err(|e| FusionError::execution("worker", format!("cannot spawn query thread: {}", e)))?;
        match rx.recv_timeout(limit) {
            Ok(res) => res,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(target: "datafuse::exec", "query exceeded {}ms", limit.as_millis());
                Err(FusionError::timeout(limit, "query did not finish in time"))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(FusionError::execution("worker", "query thread exited without a result")),
        }
    }

    /// Run a count query and return its single value.
    pub fn count(&self, catalog: &Arc<Catalog>, query: &GeneratedQuery) -> FusionResult<u64> {
        let t = self.run(catalog, query)?;
        match t.rows.first().and_then(|r| r.first()) {
            Some(Value::Int(n)) if *n >= 0 => Ok(*n as u64),
            Some(Value::Float(f)) if *f >= 0.0 => Ok(*f as u64),
            other => Err(FusionError::execution(query.columns.first().cloned().unwrap_or_default(), format!("unexpected count result {:?}", other))),
        }
    }

    /// Distinct session labels present in the base table, sorted. Empty for cross-sectional data.
    pub fn session_values(&self, catalog: &Arc<Catalog>, keys: &MergeKeys) -> FusionResult<Vec<String>> {
        let Some(session) = keys.session_column.as_ref().filter(|_| keys.is_longitudinal) else {
            return Ok(Vec::new());
        };
        let base: &Identifier = &catalog.base_table;
        let col = Identifier::qualified(base, session);
        let q = GeneratedQuery {
            sql_text: format!("SELECT DISTINCT CAST({c} AS VARCHAR) AS {l}\nFROM {b}\nWHERE {c} IS NOT NULL\nORDER BY 1", c = col, l = session.quoted(), b = base.quoted()),
            bound_parameters: Vec::new(),
            columns: vec![session.to_string()],
        };
        let t = self.run(catalog, &q)?;
        let labels: Vec<String> = t.rows.into_iter().filter_map(|mut r| r.pop()).filter_map(|v| v.as_label()).collect();
        info!(target: "datafuse::exec", "found {} session values in '{}'", labels.len(), base);
        Ok(labels)
    }
}
