//! Identifier sanitization and catalog validation
//! ----------------------------------------------
//! Single source of truth for turning raw table/column names (CSV headers, file
//! stems, configuration values, caller selections) into `Identifier`s that are
//! safe to inline into generated SQL. An `Identifier` can only be produced by
//! `sanitize`, so holding one means the name already passed the whitelist.

use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt::{Display, Formatter};

use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use unicode_normalization::UnicodeNormalization;

use crate::error::{FusionError, FusionResult};
use crate::scan::schema::Catalog;

/// Prefix applied to names that collide with a reserved SQL keyword.
pub const KEYWORD_PREFIX: &str = "FIELD_";

/// Longest identifier accepted. Longer names are rejected, never truncated.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Sequences that terminate statements or open comments.
const FORBIDDEN_SEQUENCES: &[&str] = &["--", ";", "/*", "*/"];

/// Reserved words that cannot be used bare as column or table names.
const RESERVED_KEYWORDS: &[&str] = &[
    "ALL", "ALTER", "ANALYZE", "AND", "ANY", "ARRAY", "AS", "ASC", "ATTACH", "BETWEEN", "BOTH", "BY",
    "CASE", "CAST", "CHECK", "COLLATE", "COLUMN", "CONSTRAINT", "COPY", "CREATE", "CROSS", "CURRENT_DATE",
    "CURRENT_TIME", "CURRENT_TIMESTAMP", "CURRENT_USER", "DATABASE", "DEFAULT", "DELETE", "DESC", "DESCRIBE",
    "DETACH", "DISTINCT", "DO", "DROP", "ELSE", "END", "EXCEPT", "EXEC", "EXECUTE", "EXISTS", "FALSE",
    "FETCH", "FOR", "FOREIGN", "FROM", "FULL", "FUNCTION", "GRANT", "GROUP", "HAVING", "IN", "INDEX",
    "INNER", "INSERT", "INSTALL", "INTERSECT", "INTO", "IS", "JOIN", "LATERAL", "LEADING", "LEFT", "LIKE",
    "LIMIT", "LOAD", "NATURAL", "NOT", "NULL", "OFFSET", "ON", "ONLY", "OR", "ORDER", "OUTER", "PIVOT",
    "PRAGMA", "PRIMARY", "PROCEDURE", "REFERENCES", "RETURNING", "REVOKE", "RIGHT", "SCRIPT", "SELECT",
    "SET", "SOME", "TABLE", "THEN", "TO", "TRAILING", "TRUE", "TRUNCATE", "UNION", "UNIQUE", "UNPIVOT",
    "UPDATE", "USER", "USING", "VALUES", "VIEW", "WHEN", "WHERE", "WINDOW", "WITH",
];

static KEYWORD_SET: Lazy<HashSet<&'static str>> = Lazy::new(|| RESERVED_KEYWORDS.iter().copied().collect());

/// A table or column name that passed sanitization.
///
/// Contains only ASCII letters, digits and underscores. Constructed exclusively
/// through [`sanitize`]; there is no public way to wrap an arbitrary string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(String);

impl Identifier {
    pub fn as_str(&self) -> &str { &self.0 }

    /// Double-quoted form used in SQL text. The whitelist excludes `"`, so no escaping is needed.
    pub fn quoted(&self) -> String { format!("\"{}\"", self.0) }

    /// `"table"."column"` reference.
    pub fn qualified(table: &Identifier, column: &Identifier) -> String {
        format!("{}.{}", table.quoted(), column.quoted())
    }

    /// Join two identifiers with an underscore. Both halves are whitelisted, so the result is too.
    pub(crate) fn joined(a: &Identifier, b: &Identifier) -> Identifier {
        Identifier(format!("{}_{}", a.0, b.0))
    }

    /// `name_2`, `name_3`, ... for label collisions that survive table prefixing.
    pub(crate) fn numbered(a: &Identifier, n: usize) -> Identifier {
        Identifier(format!("{}_{}", a.0, n))
    }

    /// Internal placeholder names for hidden columns (`_skipped_3`).
    pub(crate) fn placeholder(position: usize) -> Identifier {
        Identifier(format!("_skipped_{}", position))
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}

impl Borrow<str> for Identifier {
    fn borrow(&self) -> &str { &self.0 }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str { &self.0 }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Deserialization re-runs the sanitizer, so serialized specs cannot smuggle in
/// a name that `sanitize` would reject.
impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        sanitize(&raw).map_err(serde::de::Error::custom)
    }
}

pub fn is_reserved_keyword(name: &str) -> bool {
    KEYWORD_SET.contains(name.to_ascii_uppercase().as_str())
}

/// Sanitize a raw name into an [`Identifier`].
///
/// Rules, in order:
/// 1. strip control/NUL characters, NFKC-normalize and trim surrounding whitespace;
/// 2. reject path separators and comment/terminator sequences (`--`, `;`, `/*`, `*/`);
/// 3. prefix reserved keywords with `FIELD_` (a column literally named `select` stays usable);
/// 4. reject anything outside `[A-Za-z0-9_]`, empty names and names over 128 chars.
pub fn sanitize(raw: &str) -> FusionResult<Identifier> {
    let stripped: String = raw.chars().filter(|c| !c.is_control()).collect();
    let normalized: String = stripped.nfkc().collect();
    let name = normalized.trim();

    if name.contains('/') || name.contains('\\') {
        return Err(FusionError::rejected(raw, "path separators are not allowed in identifiers"));
    }
    if let Some(seq) = FORBIDDEN_SEQUENCES.iter().find(|s| name.contains(*s)) {
        return Err(FusionError::rejected(raw, format!("identifier contains forbidden sequence '{}'", seq)));
    }
    if name.is_empty() {
        return Err(FusionError::rejected(raw, "identifier is empty"));
    }

    let name = if is_reserved_keyword(name) { format!("{}{}", KEYWORD_PREFIX, name) } else { name.to_string() };

    if let Some(bad) = name.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(FusionError::rejected(raw, format!("character {:?} is not allowed (letters, digits and underscore only)", bad)));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(FusionError::rejected(raw, format!("identifier longer than {} characters", MAX_IDENTIFIER_LEN)));
    }
    Ok(Identifier(name))
}

/// Resolve a caller-supplied table name to the catalog's identifier.
pub fn validate_table(raw: &str, catalog: &Catalog) -> FusionResult<Identifier> {
    let ident = sanitize(raw)?;
    match catalog.table(ident.as_str()) {
        Some(t) => Ok(t.name.clone()),
        None => Err(FusionError::unknown_identifier(raw, "table is not present in the scanned data directory")),
    }
}

/// Resolve a caller-supplied column name against the scanned columns of one table.
///
/// Only identifiers that exist in the catalog for exactly that table are accepted;
/// there is no fuzzy matching and no fallback to another table.
pub fn validate_against_catalog(raw: &str, table: &Identifier, catalog: &Catalog) -> FusionResult<Identifier> {
    let ident = sanitize(raw)?;
    let info = catalog
        .table(table.as_str())
        .ok_or_else(|| FusionError::unknown_identifier(table.as_str(), "table is not present in the scanned data directory"))?;
    match info.column(ident.as_str()) {
        Some(c) => Ok(c.name.clone()),
        None => Err(FusionError::unknown_identifier(
            format!("{}.{}", table, raw),
            format!("column is not present in table '{}'", table),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_lookup_ignores_case() {
        assert_eq!(KEYWORD_SET.len(), RESERVED_KEYWORDS.len());
        assert!(is_reserved_keyword("select"));
        assert!(is_reserved_keyword("Order"));
        assert!(!is_reserved_keyword("ursi"));
    }

    #[test]
    fn plain_names_pass_through() {
        assert_eq!(sanitize("ursi").unwrap().as_str(), "ursi");
        assert_eq!(sanitize("  session_num ").unwrap().as_str(), "session_num");
        assert_eq!(sanitize("customID").unwrap().as_str(), "customID");
        assert_eq!(sanitize("1st_visit").unwrap().as_str(), "1st_visit");
    }

    #[test]
    fn keywords_are_prefixed_not_rejected() {
        assert_eq!(sanitize("select").unwrap().as_str(), "FIELD_select");
        assert_eq!(sanitize("ORDER").unwrap().as_str(), "FIELD_ORDER");
        // keyword as a substring is fine
        assert_eq!(sanitize("selection_score").unwrap().as_str(), "selection_score");
    }

    #[test]
    fn control_characters_are_stripped() {
        assert_eq!(sanitize("ag\u{0}e").unwrap().as_str(), "age");
        assert_eq!(sanitize("score\t\r\n").unwrap().as_str(), "score");
    }

    #[test]
    fn injection_sequences_are_rejected() {
        for raw in ["age; DROP TABLE x", "age--", "a/*b*/", "x'y", "name\"", "../etc", "a\\b", "a b", "a-b", ""] {
            let err = sanitize(raw).unwrap_err();
            assert_eq!(err.kind(), "rejected_identifier", "raw={:?}", raw);
            assert_eq!(err.offending(), raw);
        }
    }

    #[test]
    fn compatibility_forms_are_normalized() {
        // fullwidth letters normalize to ASCII under NFKC
        assert_eq!(sanitize("ａｇｅ").unwrap().as_str(), "age");
    }

    #[test]
    fn long_names_are_rejected_not_truncated() {
        let raw = "a".repeat(MAX_IDENTIFIER_LEN + 1);
        assert!(sanitize(&raw).is_err());
        assert!(sanitize(&"a".repeat(MAX_IDENTIFIER_LEN)).is_ok());
    }

    #[test]
    fn deserialize_sanitizes() {
        let ok: Identifier = serde_json::from_str("\"age\"").unwrap();
        assert_eq!(ok.as_str(), "age");
        assert!(serde_json::from_str::<Identifier>("\"age; drop\"").is_err());
    }

    #[test]
    fn quoting() {
        let t = sanitize("demographics").unwrap();
        let c = sanitize("age").unwrap();
        assert_eq!(Identifier::qualified(&t, &c), "\"demographics\".\"age\"");
    }
}
