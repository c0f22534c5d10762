use std::path::{Path, PathBuf};

use super::*;
use crate::ident::sanitize;
use crate::merge::{detect, KeyConfig, MergeKeys};
use crate::scan::schema::{Catalog, ColumnKind, TableInfo};

use ColumnKind::{Categorical as Cat, Numeric as Num, Text};

fn catalog(tables: &[(&str, &[(&str, ColumnKind)])]) -> Catalog {
    let infos = tables.iter().map(|(t, cols)| TableInfo::from_columns(t, Path::new("/d"), cols).unwrap()).collect();
    Catalog::new(PathBuf::from("/d"), sanitize(tables[0].0).unwrap(), infos, 0).unwrap()
}

fn keys(c: &Catalog) -> MergeKeys { detect(c, &KeyConfig::new("ursi", "session_num", "customID").unwrap()).unwrap() }

fn cross() -> Catalog {
    catalog(&[
        ("demographics", &[("ursi", Text), ("age", Num), ("sex", Cat)]),
        ("flanker", &[("ursi", Text), ("score", Num), ("age", Num)]),
        ("rey", &[("ursi", Text), ("recall", Num)]),
    ])
}

fn longitudinal() -> Catalog {
    catalog(&[
        ("demographics", &[("ursi", Text), ("session_num", Cat), ("customID", Text), ("age", Num)]),
        ("flanker", &[("ursi", Text), ("session_num", Cat), ("customID", Text), ("score", Num)]),
        ("rey", &[("ursi", Text), ("session_num", Cat), ("recall", Num)]),
        ("genetics", &[("ursi", Text), ("apoe", Cat)]),
    ])
}

#[test]
fn test_cross_sectional_sql_shape() {
    let c = cross();
    let spec = QuerySpec::default()
        .select("demographics", &["age"])
        .select("flanker", &["score"])
        .demographic_filter(Filter::numeric("demographics", "age", Some(18.0), Some(65.0)));
    let q = build(&spec, &keys(&c), &c).unwrap();
    assert_eq!(
        q.data.sql_text,
        "SELECT \"demographics\".\"ursi\" AS \"ursi\", \"demographics\".\"age\" AS \"age\", \"flanker\".\"score\" AS \"score\"\n\
         FROM \"demographics\"\n\
         LEFT JOIN \"flanker\" ON \"demographics\".\"ursi\" = \"flanker\".\"ursi\"\n\
         WHERE TRY_CAST(\"demographics\".\"age\" AS DOUBLE) >= ? AND TRY_CAST(\"demographics\".\"age\" AS DOUBLE) <= ?\n\
         ORDER BY \"demographics\".\"ursi\""
    );
    assert_eq!(
        q.count.sql_text,
        "SELECT COUNT(DISTINCT \"demographics\".\"ursi\") AS \"participant_count\"\n\
         FROM \"demographics\"\n\
         LEFT JOIN \"flanker\" ON \"demographics\".\"ursi\" = \"flanker\".\"ursi\"\n\
         WHERE TRY_CAST(\"demographics\".\"age\" AS DOUBLE) >= ? AND TRY_CAST(\"demographics\".\"age\" AS DOUBLE) <= ?"
    );
    assert_eq!(q.data.bound_parameters, vec![Param::Float(18.0), Param::Float(65.0)]);
    assert_eq!(q.count.bound_parameters, q.data.bound_parameters);
    assert_eq!(q.data.columns, vec!["ursi", "age", "score"]);
    assert_eq!(q.count.columns, vec![COUNT_LABEL]);
}

#[test]
fn test_longitudinal_join_predicates() {
    let c = longitudinal();
    let k = keys(&c);
    assert!(k.is_longitudinal);
    let spec = QuerySpec::default()
        .select("flanker", &["score"])
        .select("rey", &["recall"])
        .select("genetics", &["apoe"]);
    let sql = build(&spec, &k, &c).unwrap().data.sql_text;
    assert!(sql.contains("LEFT JOIN \"flanker\" ON \"demographics\".\"customID\" = \"flanker\".\"customID\"\n"), "{}", sql);
    assert!(sql.contains(
        "LEFT JOIN \"rey\" ON \"demographics\".\"ursi\" = \"rey\".\"ursi\" AND \"demographics\".\"session_num\" = \"rey\".\"session_num\"\n"
    ), "{}", sql);
    assert!(sql.contains("LEFT JOIN \"genetics\" ON \"demographics\".\"ursi\" = \"genetics\".\"ursi\"\n"), "{}", sql);
    assert!(sql.ends_with("ORDER BY \"demographics\".\"ursi\", \"demographics\".\"session_num\""));
}

#[test]
fn test_longitudinal_select_keys_first_and_skips_satellite_keys() {
    let c = longitudinal();
    let spec = QuerySpec::default().select("flanker", &["ursi", "session_num", "customID", "score"]).select("demographics", &["age", "ursi"]);
    let q = build(&spec, &keys(&c), &c).unwrap();
    assert_eq!(q.data.columns, vec!["ursi", "session_num", "customID", "score", "age"]);
}

#[test]
fn test_derived_composite_is_joined_and_selected() {
    let mut c = catalog(&[
        ("demographics", &[("ursi", Text), ("session_num", Cat), ("age", Num)]),
        ("rey", &[("ursi", Text), ("session_num", Cat), ("recall", Num)]),
    ]);
    let k = keys(&c);
    crate::merge::derive_composite_ids(&mut c, &k);
    let q = build(&QuerySpec::default().select("rey", &["recall"]), &k, &c).unwrap();
    assert_eq!(q.data.columns, vec!["ursi", "session_num", "customID", "recall"]);
    assert!(q.data.sql_text.contains("LEFT JOIN \"rey\" ON \"demographics\".\"customID\" = \"rey\".\"customID\"\n"), "{}", q.data.sql_text);
}

#[test]
fn test_label_collisions_get_table_prefix() {
    let c = cross();
    let spec = QuerySpec::default().select("demographics", &["age"]).select("flanker", &["age"]);
    let q = build(&spec, &keys(&c), &c).unwrap();
    assert_eq!(q.data.columns, vec!["ursi", "age", "flanker_age"]);
    assert!(q.data.sql_text.contains("\"flanker\".\"age\" AS \"flanker_age\""));
}

#[test]
fn test_categorical_params_sorted_and_empty_is_false() {
    let c = cross();
    let spec = QuerySpec::default()
        .select("demographics", &["sex"])
        .demographic_filter(Filter::categorical("demographics", "sex", ["M", "F"]));
    let q = build(&spec, &keys(&c), &c).unwrap();
    assert!(q.data.sql_text.contains("WHERE CAST(\"demographics\".\"sex\" AS VARCHAR) IN (?, ?)"));
    assert_eq!(q.data.bound_parameters, vec![Param::Text("F".into()), Param::Text("M".into())]);

    let empty = QuerySpec::default()
        .select("demographics", &["sex"])
        .demographic_filter(Filter::categorical("demographics", "sex", Vec::<String>::new()));
    let q = build(&empty, &keys(&c), &c).unwrap();
    assert!(q.data.sql_text.contains("WHERE FALSE"));
    assert!(q.data.bound_parameters.is_empty());
}

#[test]
fn test_unbounded_range_adds_nothing() {
    let c = cross();
    let spec = QuerySpec::default().select("demographics", &["age"]).demographic_filter(Filter::numeric("demographics", "age", None, None));
    let q = build(&spec, &keys(&c), &c).unwrap();
    assert!(!q.data.sql_text.contains("WHERE"));
    let spec = QuerySpec::default().select("demographics", &["age"]).demographic_filter(Filter::numeric("demographics", "age", None, Some(30.0)));
    let q = build(&spec, &keys(&c), &c).unwrap();
    assert!(q.data.sql_text.contains("WHERE TRY_CAST(\"demographics\".\"age\" AS DOUBLE) <= ?"));
    assert_eq!(q.data.bound_parameters, vec![Param::Float(30.0)]);
}

#[test]
fn test_param_order_demographic_phenotypic_session() {
    let c = longitudinal();
    let spec = QuerySpec::default()
        .select("flanker", &["score"])
        .phenotypic_filter(Filter::numeric("flanker", "score", Some(1.0), None))
        .demographic_filter(Filter::numeric("demographics", "age", Some(2.0), None))
        .sessions(SessionFilter::only(["BAS1"]));
    let q = build(&spec, &keys(&c), &c).unwrap();
    assert_eq!(q.data.bound_parameters, vec![Param::Float(2.0), Param::Float(1.0), Param::Text("BAS1".into())]);
    assert!(q.data.sql_text.contains("AND CAST(\"demographics\".\"session_num\" AS VARCHAR) IN (?)"));
}

#[test]
fn test_filter_only_tables_are_joined() {
    let c = cross();
    let spec = QuerySpec::default().select("demographics", &["age"]).phenotypic_filter(Filter::numeric("rey", "recall", Some(3.0), None));
    let sql = build(&spec, &keys(&c), &c).unwrap().data.sql_text;
    assert!(sql.contains("LEFT JOIN \"rey\" ON"));
    assert!(!sql.contains("\"rey\".\"recall\" AS"));
}

#[test]
fn test_session_filter_ignored_when_cross_sectional() {
    let c = cross();
    let spec = QuerySpec::default().select("demographics", &["age"]).sessions(SessionFilter::only(["BAS1"]));
    let q = build(&spec, &keys(&c), &c).unwrap();
    assert!(!q.data.sql_text.contains("WHERE"));
    assert!(q.data.bound_parameters.is_empty());
}

#[test]
fn test_empty_session_set_matches_nothing() {
    let c = longitudinal();
    let spec = QuerySpec::default().select("demographics", &["age"]).sessions(SessionFilter::Only(Default::default()));
    let q = build(&spec, &keys(&c), &c).unwrap();
    assert!(q.data.sql_text.contains("WHERE FALSE"));
}

#[test]
fn test_unknown_identifiers_are_named() {
    let c = cross();
    let err = build(&QuerySpec::default().select("flanker", &["iq"]), &keys(&c), &c).unwrap_err();
    assert_eq!(err.kind(), "unknown_identifier");
    assert_eq!(err.offending(), "flanker.iq");

    let err = build(&QuerySpec::default().select("stroop", &["x"]), &keys(&c), &c).unwrap_err();
    assert_eq!(err.kind(), "unknown_identifier");
    assert_eq!(err.offending(), "stroop");

    // column exists, but in another table: no fallback
    let err = build(&QuerySpec::default().select("rey", &["score"]), &keys(&c), &c).unwrap_err();
    assert_eq!(err.offending(), "rey.score");
}

#[test]
fn test_validation_order_tables_first() {
    let c = cross();
    let mut spec = QuerySpec::default().select("flanker", &["nope"]);
    spec.selected_tables.push("missing_table".into());
    let err = build(&spec, &keys(&c), &c).unwrap_err();
    assert_eq!(err.offending(), "missing_table");

    let spec = QuerySpec::default()
        .select("flanker", &["score"])
        .demographic_filter(Filter::numeric("demographics", "nope", None, None))
        .phenotypic_filter(Filter::numeric("flanker", "also_nope", None, None));
    assert_eq!(build(&spec, &keys(&c), &c).unwrap_err().offending(), "demographics.nope");
}

#[test]
fn test_demographic_filter_must_target_base() {
    let c = cross();
    let spec = QuerySpec::default().select("demographics", &["age"]).demographic_filter(Filter::numeric("flanker", "score", Some(1.0), None));
    let err = build(&spec, &keys(&c), &c).unwrap_err();
    assert_eq!(err.kind(), "unknown_identifier");
    assert_eq!(err.offending(), "flanker");
}

#[test]
fn test_conflicting_filters() {
    let c = cross();
    let base = QuerySpec::default().select("demographics", &["age"]);
    let both = base
        .clone()
        .demographic_filter(Filter::numeric("demographics", "age", Some(1.0), None))
        .demographic_filter(Filter::categorical("demographics", "age", ["30"]));
    let err = build(&both, &keys(&c), &c).unwrap_err();
    assert_eq!(err.kind(), "conflicting_filter");
    assert_eq!(err.offending(), "demographics.age");

    let non_numeric = base.clone().demographic_filter(Filter::numeric("demographics", "sex", Some(1.0), None));
    assert_eq!(build(&non_numeric, &keys(&c), &c).unwrap_err().kind(), "conflicting_filter");

    let nan = base.demographic_filter(Filter::numeric("demographics", "age", Some(f64::NAN), None));
    assert_eq!(build(&nan, &keys(&c), &c).unwrap_err().kind(), "conflicting_filter");
}

#[test]
fn test_empty_selection() {
    let c = cross();
    let mut spec = QuerySpec::default();
    spec.selected_tables.push("flanker".into());
    let err = build(&spec, &keys(&c), &c).unwrap_err();
    assert_eq!(err.kind(), "empty_selection");
}

#[test]
fn test_satellite_without_primary_cannot_join() {
    let c = catalog(&[("demographics", &[("ursi", Text), ("age", Num)]), ("orphan", &[("subject", Text), ("x", Num)])]);
    let err = build(&QuerySpec::default().select("orphan", &["x"]), &keys(&c), &c).unwrap_err();
    assert_eq!(err.kind(), "unknown_identifier");
    assert_eq!(err.offending(), "orphan.ursi");
}

#[test]
fn test_injection_attempts_never_reach_sql() {
    let c = cross();
    let spec = QuerySpec::default().select("demographics", &["age; DROP TABLE demographics"]);
    assert_eq!(build(&spec, &keys(&c), &c).unwrap_err().kind(), "rejected_identifier");

    let spec = QuerySpec::default()
        .select("demographics", &["sex"])
        .demographic_filter(Filter::categorical("demographics", "sex", ["F' OR '1'='1"]));
    let q = build(&spec, &keys(&c), &c).unwrap();
    assert!(!q.data.sql_text.contains("OR '1'"));
    assert_eq!(q.data.bound_parameters, vec![Param::Text("F' OR '1'='1".into())]);
}

#[test]
fn test_build_is_idempotent() {
    let c = longitudinal();
    let spec = QuerySpec::default()
        .select("rey", &["recall"])
        .select("flanker", &["score"])
        .phenotypic_filter(Filter::categorical("rey", "session_num", ["BAS2", "BAS1"]))
        .sessions(SessionFilter::only(["BAS1", "BAS2"]));
    let a = build(&spec, &keys(&c), &c).unwrap();
    let b = build(&spec.clone(), &keys(&c), &c).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_spec_toml_roundtrip() {
    let spec = QuerySpec::default()
        .select("demographics", &["age"])
        .demographic_filter(Filter::numeric("demographics", "age", Some(18.0), None))
        .phenotypic_filter(Filter::categorical("flanker", "hand", ["L"]))
        .sessions(SessionFilter::only(["BAS1"]))
        .wide(true);
    let text = toml::to_string(&spec).unwrap();
    let back: QuerySpec = toml::from_str(&text).unwrap();
    assert_eq!(back, spec);
}
