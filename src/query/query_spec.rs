use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A row filter on one catalog column. Table and column names are raw caller
/// input; they are validated against the catalog when the query is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    /// Inclusive bounds; an unset side is unbounded.
    NumericRange {
        table: String,
        column: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    /// Matches rows whose value is one of `allowed_values`. An empty set matches nothing.
    Categorical {
        table: String,
        column: String,
        #[serde(default)]
        allowed_values: BTreeSet<String>,
    },
}

impl Filter {
    pub fn numeric(table: &str, column: &str, min: Option<f64>, max: Option<f64>) -> Self {
        Filter::NumericRange { table: table.into(), column: column.into(), min, max }
    }

    pub fn categorical<I, S>(table: &str, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::Categorical { table: table.into(), column: column.into(), allowed_values: values.into_iter().map(Into::into).collect() }
    }

    pub fn table(&self) -> &str {
        match self {
            Filter::NumericRange { table, .. } | Filter::Categorical { table, .. } => table,
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::NumericRange { column, .. } | Filter::Categorical { column, .. } => column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionFilter {
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl SessionFilter {
    pub fn only<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SessionFilter::Only(labels.into_iter().map(Into::into).collect())
    }
}

/// Everything a caller chooses for one merge: tables, columns, filters and output shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QuerySpec {
    #[serde(default)]
    pub selected_tables: Vec<String>,
    /// table -> columns, each list in output order
    #[serde(default)]
    pub selected_columns: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub demographic_filters: Vec<Filter>,
    #[serde(default)]
    pub phenotypic_filters: Vec<Filter>,
    #[serde(default)]
    pub session_filter: SessionFilter,
    #[serde(default)]
    pub pivot_to_wide: bool,
}

impl QuerySpec {
    pub fn select(mut self, table: &str, columns: &[&str]) -> Self {
        if !self.selected_tables.iter().any(|t| t == table) {
            self.selected_tables.push(table.to_string());
        }
        self.selected_columns.entry(table.to_string()).or_default().extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn demographic_filter(mut self, f: Filter) -> Self {
        self.demographic_filters.push(f);
        self
    }

    pub fn phenotypic_filter(mut self, f: Filter) -> Self {
        self.phenotypic_filters.push(f);
        self
    }

    pub fn sessions(mut self, s: SessionFilter) -> Self {
        self.session_filter = s;
        self
    }

    pub fn wide(mut self, on: bool) -> Self {
        self.pivot_to_wide = on;
        self
    }
}

/// A bound parameter value. Filter values only ever reach the SQL engine as these.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Param {
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedQuery {
    pub sql_text: String,
    pub bound_parameters: Vec<Param>,
    /// Output header, in SELECT order
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPair {
    pub count: GeneratedQuery,
    pub data: GeneratedQuery,
}
