//! Statement cache behavior through the public API: LRU residency,
//! tombstone scheduling, key separation, and the terminator rule.

use orathin::row::NumberShape;
use orathin::{Error, Statement, StatementCache};

fn executed(sql: &str, cursor_id: u16) -> Statement {
    let mut stmt = Statement::parse(sql).unwrap();
    stmt.set_cursor_id(cursor_id);
    stmt.set_executed(true);
    stmt
}

#[test]
fn k_most_recent_of_n_survive() {
    const K: usize = 4;
    const N: usize = 10;

    let mut cache = StatementCache::new(K);
    let mut keys = Vec::new();
    for i in 0..N {
        let stmt = executed(&format!("SELECT {i} FROM DUAL"), 1000 + i as u16);
        let key = stmt.cache_key(false, NumberShape::Auto);
        cache.give_back(key.clone(), stmt);
        keys.push(key);
    }

    assert_eq!(cache.len(), K);
    for key in &keys[N - K..] {
        let hit = cache.take(key);
        assert!(hit.is_some(), "recently used {:?} missing", key.sql);
        cache.give_back(key.clone(), hit.unwrap());
    }
    for key in &keys[..N - K] {
        assert!(cache.take(key).is_none(), "evicted {:?} still cached", key.sql);
    }

    // Every evicted cursor is awaiting a server-side close.
    let tombstones = cache.drain_tombstones();
    assert_eq!(tombstones.len(), N - K);
}

#[test]
fn terminator_rule_is_strict() {
    for sql in [
        "SELECT 1 FROM DUAL;",
        "SELECT 1 FROM DUAL ;",
        "SELECT 1 FROM DUAL;\n",
        "BEGIN NULL; END;\n/",
        "BEGIN NULL; END;/",
    ] {
        assert!(
            matches!(Statement::parse(sql), Err(Error::Interface(_))),
            "{sql:?} should be rejected"
        );
    }
    // No implicit stripping: the same text without the terminator works.
    assert!(Statement::parse("SELECT 1 FROM DUAL").is_ok());
    assert!(Statement::parse("BEGIN NULL; END").is_ok());
}

#[test]
fn key_includes_execution_shape() {
    let stmt = Statement::parse("SELECT x FROM t WHERE id = :1").unwrap();
    let plain = stmt.cache_key(false, NumberShape::Auto);
    let array = stmt.cache_key(true, NumberShape::Auto);
    let decimal = stmt.cache_key(false, NumberShape::Decimal);

    let mut cache = StatementCache::new(8);
    cache.give_back(plain.clone(), executed("SELECT x FROM t WHERE id = :1", 1));
    assert!(cache.take(&array).is_none());
    assert!(cache.take(&decimal).is_none());
    assert!(cache.take(&plain).is_some());
}

#[test]
fn returning_clause_separates_keys() {
    let plain = Statement::parse("DELETE FROM t WHERE id = :1").unwrap();
    let returning = Statement::parse("DELETE FROM t WHERE id = :1 RETURNING x INTO :2").unwrap();
    assert!(!plain.is_returning());
    assert!(returning.is_returning());
    assert_ne!(
        plain.cache_key(false, NumberShape::Auto),
        returning.cache_key(false, NumberShape::Auto)
    );
}

#[test]
fn size_zero_disables_and_closes_on_release() {
    let mut cache = StatementCache::new(0);
    assert!(!cache.enabled());

    let stmt = executed("SELECT 1 FROM DUAL", 33);
    let key = stmt.cache_key(false, NumberShape::Auto);
    cache.give_back(key.clone(), stmt);
    assert!(cache.take(&key).is_none());
    assert_eq!(cache.drain_tombstones(), vec![33]);
}

#[test]
fn invalidation_forces_fresh_parse() {
    let mut cache = StatementCache::new(4);
    let stmt = executed("SELECT x FROM t", 7);
    let key = stmt.cache_key(false, NumberShape::Auto);
    cache.give_back(key.clone(), stmt);

    cache.invalidate(&key);
    assert_eq!(cache.drain_tombstones(), vec![7]);

    let fresh = cache.take(&key).expect("entry remains after invalidation");
    assert_eq!(fresh.cursor_id(), 0);
    assert!(!fresh.executed());
}
