//! Query specification and SQL generation.
//!
//! `query_spec` holds the caller-facing value types (`QuerySpec`, `Filter`,
//! `SessionFilter`) and the generated output (`GeneratedQuery`, `QueryPair`).
//! `query_build` validates a spec against the scanned catalog and renders the
//! parameterized count and data queries.

pub mod query_build;
pub mod query_spec;

pub use query_build::*;
pub use query_spec::*;

#[cfg(test)]
mod tests;
