//! Merge-key detection: decides whether a cohort is cross-sectional (one row
//! per subject) or longitudinal (one row per subject-session) and which
//! columns join satellite tables onto the demographics table.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::DataConfig;
use crate::error::{FusionError, FusionResult};
use crate::ident::{sanitize, Identifier};
use crate::scan::schema::{Catalog, DerivedColumn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeKeys {
    pub primary_id_column: Identifier,
    pub session_column: Option<Identifier>,
    pub composite_id_column: Option<Identifier>,
    pub is_longitudinal: bool,
}

impl MergeKeys {
    pub fn cross_sectional(primary: Identifier) -> Self {
        MergeKeys { primary_id_column: primary, session_column: None, composite_id_column: None, is_longitudinal: false }
    }

    pub fn longitudinal(primary: Identifier, session: Identifier, composite: Identifier) -> Self {
        MergeKeys { primary_id_column: primary, session_column: Some(session), composite_id_column: Some(composite), is_longitudinal: true }
    }

    /// Column that identifies one output row: composite id when longitudinal, primary id otherwise.
    pub fn merge_column(&self) -> &Identifier {
        match (&self.composite_id_column, self.is_longitudinal) {
            (Some(c), true) => c,
            _ => &self.primary_id_column,
        }
    }

    /// True when `name` is one of the key columns.
    pub fn is_key(&self, name: &Identifier) -> bool {
        *name == self.primary_id_column
            || self.session_column.as_ref() == Some(name)
            || self.composite_id_column.as_ref() == Some(name)
    }
}

/// Configured key column names after sanitization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyConfig {
    pub primary_id: Identifier,
    pub session: Identifier,
    pub composite_id: Identifier,
}

impl KeyConfig {
    pub fn new(primary_id: &str, session: &str, composite_id: &str) -> FusionResult<Self> {
        let s = |field: &str, raw: &str| {
            sanitize(raw).map_err(|e| FusionError::configuration(field, format!("invalid column name '{}': {}", raw, e.message())))
        };
        Ok(KeyConfig {
            primary_id: s("primary_id_column", primary_id)?,
            session: s("session_column", session)?,
            composite_id: s("composite_id_column", composite_id)?,
        })
    }

    pub fn from_data_config(cfg: &DataConfig) -> FusionResult<Self> {
        Self::new(&cfg.primary_id_column, &cfg.session_column, &cfg.composite_id_column)
    }
}

/// Classify the catalog. Longitudinal iff the session column appears in the base
/// table and in at least one satellite table.
pub fn detect(catalog: &Catalog, keys: &KeyConfig) -> FusionResult<MergeKeys> {
    let base = catalog.base();
    if !base.has_column(&keys.primary_id) {
        return Err(FusionError::configuration(
            keys.primary_id.as_str(),
            format!("primary id column not found in base table '{}'", base.name),
        ));
    }
    let session_in_base = base.has_column(&keys.session);
    let satellites_with_session: Vec<&Identifier> =
        catalog.satellites().filter(|t| t.has_column(&keys.session)).map(|t| &t.name).collect();
    debug!(
        target: "datafuse::merge",
        "detect: base='{}' session_in_base={} satellites_with_session={:?}",
        base.name, session_in_base, satellites_with_session
    );
    let mk = if session_in_base && !satellites_with_session.is_empty() {
        MergeKeys::longitudinal(keys.primary_id.clone(), keys.session.clone(), keys.composite_id.clone())
    } else {
        MergeKeys::cross_sectional(keys.primary_id.clone())
    };
    info!(
        target: "datafuse::merge",
        "merge strategy: {} (merge column '{}')",
        if mk.is_longitudinal { "longitudinal" } else { "cross-sectional" }, mk.merge_column()
    );
    Ok(mk)
}

/// Add a derived `<primary>_<session>` composite id column to every table that
/// carries both key columns but no composite id of its own. The files stay as
/// they are; the SQL view computes the value. Returns the tables that gained one.
pub fn derive_composite_ids(catalog: &mut Catalog, keys: &MergeKeys) -> Vec<Identifier> {
    let (Some(session), Some(composite), true) = (&keys.session_column, &keys.composite_id_column, keys.is_longitudinal) else {
        return Vec::new();
    };
    let mut added = Vec::new();
    for t in catalog.tables.values_mut() {
        if t.has_column(composite) || !t.has_column(&keys.primary_id_column) || !t.has_column(session) {
            continue;
        }
        t.derived.push(DerivedColumn { name: composite.clone(), parts: vec![keys.primary_id_column.clone(), session.clone()] });
        added.push(t.name.clone());
    }
    if !added.is_empty() {
        info!(target: "datafuse::merge", "deriving '{}' for tables {:?}", composite, added);
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::schema::{ColumnKind, TableInfo};
    use std::path::{Path, PathBuf};

    fn catalog(tables: &[(&str, &[&str])]) -> Catalog {
        let infos = tables
            .iter()
            .map(|(t, cols)| {
                let cols: Vec<(&str, ColumnKind)> = cols.iter().map(|c| (*c, ColumnKind::Text)).collect();
                TableInfo::from_columns(t, Path::new("/d"), &cols).unwrap()
            })
            .collect();
        Catalog::new(PathBuf::from("/d"), sanitize(tables[0].0).unwrap(), infos, 0).unwrap()
    }

    fn defaults() -> KeyConfig { KeyConfig::new("ursi", "session_num", "customID").unwrap() }

    #[test]
    fn composite_is_derived_where_missing() {
        let mut cat = catalog(&[
            ("demographics", &["ursi", "session_num", "age"]),
            ("flanker", &["ursi", "session_num", "customID", "score"]),
            ("genetics", &["ursi", "apoe"]),
        ]);
        let keys = detect(&cat, &defaults()).unwrap();
        let added = derive_composite_ids(&mut cat, &keys);
        assert_eq!(added, vec![sanitize("demographics").unwrap()]);
        let base = cat.base();
        assert!(base.has_column(&sanitize("customID").unwrap()));
        assert!(base.column("customID").is_none());
        assert_eq!(base.derived[0].parts, vec![sanitize("ursi").unwrap(), sanitize("session_num").unwrap()]);
        assert!(cat.table("flanker").unwrap().derived.is_empty());
        assert!(cat.table("genetics").unwrap().derived.is_empty());
        // running again adds nothing
        assert!(derive_composite_ids(&mut cat, &keys).is_empty());
    }

    #[test]
    fn cross_sectional_derives_nothing() {
        let mut cat = catalog(&[("demographics", &["ursi", "age"]), ("iq", &["ursi", "fsiq"])]);
        let keys = detect(&cat, &defaults()).unwrap();
        assert!(derive_composite_ids(&mut cat, &keys).is_empty());
    }

    #[test]
    fn cross_sectional_when_no_sessions() {
        let c = catalog(&[("demographics", &["ursi", "age"]), ("flanker", &["ursi", "score"])]);
        let mk = detect(&c, &defaults()).unwrap();
        assert!(!mk.is_longitudinal);
        assert_eq!(mk.primary_id_column.as_str(), "ursi");
        assert_eq!(mk.session_column, None);
        assert_eq!(mk.merge_column().as_str(), "ursi");
    }

    #[test]
    fn longitudinal_when_session_in_base_and_satellite() {
        let c = catalog(&[("demographics", &["ursi", "session_num", "age"]), ("flanker", &["ursi", "session_num", "score"])]);
        let mk = detect(&c, &defaults()).unwrap();
        assert!(mk.is_longitudinal);
        assert_eq!(mk.session_column.as_ref().map(|s| s.as_str()), Some("session_num"));
        assert_eq!(mk.merge_column().as_str(), "customID");
    }

    #[test]
    fn session_only_in_base_is_cross_sectional() {
        let c = catalog(&[("demographics", &["ursi", "session_num"]), ("flanker", &["ursi", "score"])]);
        assert!(!detect(&c, &defaults()).unwrap().is_longitudinal);
        let alone = catalog(&[("demographics", &["ursi", "session_num"])]);
        assert!(!detect(&alone, &defaults()).unwrap().is_longitudinal);
    }

    #[test]
    fn missing_primary_is_configuration_error() {
        let c = catalog(&[("demographics", &["subject", "age"])]);
        let err = detect(&c, &defaults()).unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert_eq!(err.offending(), "ursi");
        // case-sensitive
        let c = catalog(&[("demographics", &["URSI"])]);
        assert!(detect(&c, &defaults()).is_err());
    }

    #[test]
    fn merge_keys_json_roundtrip() {
        let mk = MergeKeys::longitudinal(sanitize("ursi").unwrap(), sanitize("session_num").unwrap(), sanitize("customID").unwrap());
        let json = serde_json::to_string(&mk).unwrap();
        let back: MergeKeys = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mk);
    }

    #[test]
    fn rejected_key_names_are_configuration_errors() {
        let err = KeyConfig::new("ursi; drop", "session_num", "customID").unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert_eq!(err.offending(), "primary_id_column");
    }
}
