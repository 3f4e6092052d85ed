//! Behavioral properties of expressions, table identity and conflict avoidance

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tsload_common::types::{Precision, Row, Value};
use tsload_ingest::identity::hash_identity;
use tsload_ingest::{ConflictCache, ConflictConfig, Extractor, TableIdentityResolver};

fn eval(extractor: &Extractor, text: &str, row: &Row) -> Value {
    extractor.extract(text, row).expect("Failed to evaluate expression")
}

// ============================================================================
// EXPRESSIONS
// ============================================================================

#[test]
fn test_repeated_parse_hits_cache() {
    let extractor = Extractor::new();
    let first = extractor.parse("a + b * 2").unwrap();
    let second = extractor.parse("a + b * 2").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(extractor.cached_expressions(), 1);
}

#[test]
fn test_arithmetic_follows_operand_types() {
    let extractor = Extractor::new();
    let ints = Row::new().with("a", 1i64).with("b", 2i64);
    let mixed = Row::new().with("a", 1.5).with("b", 2i64);

    assert_eq!(eval(&extractor, "a + b", &ints), Value::Int(3));
    assert_eq!(eval(&extractor, "a + b", &mixed), Value::Float(3.5));
}

#[test]
fn test_string_functions() {
    let extractor = Extractor::new();
    let row = Row::new();
    assert_eq!(eval(&extractor, r#"pad_left("test", "0", 10)"#, &row), Value::from("000000test"));
    assert_eq!(eval(&extractor, r#"pad_left("test", "0", 2)"#, &row), Value::from("test"));
    assert_eq!(eval(&extractor, r#"substring("hello", 1, 3)"#, &row), Value::from("el"));
    assert!(extractor.extract(r#"substring("hello", 3, 1)"#, &row).is_err());
}

#[test]
fn test_date_parse_with_milliseconds() {
    let extractor = Extractor::new();
    let value = eval(
        &extractor,
        r#"date_parse("20221123094625100", "YYYYMMDDHHmmssSSS")"#,
        &Row::new(),
    );
    let expected = Utc.with_ymd_and_hms(2022, 11, 23, 9, 46, 25).unwrap()
        + chrono::Duration::milliseconds(100);
    assert_eq!(value, Value::Timestamp(expected));
}

// ============================================================================
// TABLE IDENTITY
// ============================================================================

#[test]
fn test_pattern_identity() {
    let resolver = TableIdentityResolver::pattern("d_{code}_{name}", Arc::new(Extractor::new())).unwrap();
    let tags = Row::from_text([("code", "100"), ("name", "aaa")]);
    assert_eq!(resolver.resolve(&tags).unwrap(), "d_100_aaa");
    assert!(resolver.resolve(&Row::from_text([("code", "100")])).is_err());
}

#[test]
fn test_hash_identity_known_digest() {
    let tags = Row::from_text([("b", "b"), ("a", "a")]);
    assert_eq!(hash_identity("t_", &tags), "t_187ef4436122d1cc2f40dc2b92f0eba0");
}

proptest! {
    #[test]
    fn prop_hash_identity_ignores_insertion_order(
        tags in proptest::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{0,8}", 1..8)
    ) {
        let forward: Row = tags
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect();
        let mut reversed = Row::new();
        for (k, v) in tags.iter().rev() {
            reversed.insert(k.clone(), v.as_str());
        }

        let name = hash_identity("t_", &forward);
        prop_assert_eq!(&name, &hash_identity("t_", &reversed));
        prop_assert_eq!(name.len(), 2 + 32);
    }

    #[test]
    fn prop_pattern_identity_concatenates_tags(
        code in "[0-9]{1,6}",
        name in "[a-z]{1,10}",
    ) {
        let resolver = TableIdentityResolver::pattern("d_{code}_{name}", Arc::new(Extractor::new())).unwrap();
        let tags: BTreeMap<_, _> = [("code", code.as_str()), ("name", name.as_str())].into_iter().collect();
        let resolved = resolver.resolve(&Row::from_text(tags)).unwrap();
        prop_assert_eq!(resolved, format!("d_{}_{}", code, name));
    }

    #[test]
    fn prop_conflict_avoidance_spreads_identical_timestamps(n in 1usize..200) {
        let cache = ConflictCache::new(ConflictConfig::new(60_000, Precision::Millisecond)).unwrap();
        let ts = Utc.with_ymd_and_hms(2022, 11, 23, 9, 46, 25).unwrap();

        let outputs: Vec<_> = (0..n).map(|_| cache.cache_and_get(ts).unwrap()).collect();
        for (k, out) in outputs.iter().enumerate() {
            prop_assert_eq!(*out, ts + chrono::Duration::milliseconds(k as i64));
        }
    }
}
