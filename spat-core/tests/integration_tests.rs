// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! End-to-end integration tests for spat.
//!
//! These tests drive the full command surface through named databases,
//! the same way independent worker processes would.

use std::collections::HashSet;
use std::time::Duration;

use spat_core::{Config, ConfigLoader, Database, DbName, Namespace, SpatError, ValueTag};
use tempfile::TempDir;

fn test_config(name: &str) -> Config {
    let mut config = Config::default();
    config.database.name = DbName::new(name).expect("valid db name");
    config.database.namespace =
        Namespace::new(format!("spat-it-{}", std::process::id())).expect("valid namespace");
    config.arena.initial_segment_size = 256 * 1024;
    config.arena.max_total_size = 64 * 1024 * 1024;
    config
}

/// Opens a database and unlinks it when the test finishes.
struct TestDb {
    db: Database,
}

impl TestDb {
    fn new(name: &str) -> Self {
        let config = test_config(name);
        // Leftovers from an aborted earlier run with the same pid.
        let _ = Database::purge(&config.database);
        Self {
            db: Database::open(&config).expect("Failed to open database"),
        }
    }
}

impl std::ops::Deref for TestDb {
    type Target = Database;

    fn deref(&self) -> &Database {
        &self.db
    }
}

impl Drop for TestDb {
    fn drop(&mut self) {
        let _ = self.db.unlink();
    }
}

#[test]
fn test_reference_scenario() {
    let db = TestDb::new("scenario");

    assert_eq!(db.set(b"a", b"hello", None).unwrap(), b"hello");
    assert_eq!(db.get(b"a").unwrap(), Some(b"hello".to_vec()));
    assert_eq!(db.type_of(b"a").unwrap(), ValueTag::String);

    assert!(db.sadd(b"s", b"x").unwrap());
    assert!(!db.sadd(b"s", b"x").unwrap());
    assert_eq!(db.scard(b"s").unwrap(), 1);
    assert!(db.sismember(b"s", b"x").unwrap());
    assert!(db.srem(b"s", b"x").unwrap());
    assert_eq!(db.scard(b"s").unwrap(), 0);

    assert!(db.del(b"a").unwrap());
    assert_eq!(db.get(b"a").unwrap(), None);
}

#[test]
fn test_type_after_each_write() {
    let db = TestDb::new("types");

    assert_eq!(db.type_of(b"k").unwrap(), ValueTag::Null);
    db.set(b"str", b"v", None).unwrap();
    db.sadd(b"set", b"m").unwrap();
    db.lpush(b"list", b"v").unwrap();
    db.hset(b"hash", b"f", b"v").unwrap();

    assert_eq!(db.type_of(b"str").unwrap(), ValueTag::String);
    assert_eq!(db.type_of(b"set").unwrap(), ValueTag::Set);
    assert_eq!(db.type_of(b"list").unwrap(), ValueTag::List);
    assert_eq!(db.type_of(b"hash").unwrap(), ValueTag::Hash);
    assert_eq!(db.dbsize().unwrap(), 4);
}

#[test]
fn test_delete_any_type_then_get_is_absent() {
    let db = TestDb::new("delete-any");

    db.set(b"str", b"v", None).unwrap();
    db.sadd(b"set", b"m").unwrap();
    db.rpush(b"list", b"v").unwrap();
    db.hset(b"hash", b"f", b"v").unwrap();

    for key in [&b"str"[..], b"set", b"list", b"hash"] {
        assert!(db.del(key).unwrap());
        assert!(!db.del(key).unwrap());
        assert_eq!(db.get(key).unwrap(), None);
        assert_eq!(db.type_of(key).unwrap(), ValueTag::Null);
    }
    assert_eq!(db.dbsize().unwrap(), 0);
}

#[test]
fn test_wrong_type_operations() {
    let db = TestDb::new("wrongtype");

    db.set(b"str", b"v", None).unwrap();
    db.sadd(b"set", b"m").unwrap();

    assert!(matches!(
        db.sadd(b"str", b"m"),
        Err(SpatError::TypeMismatch { .. })
    ));
    assert!(matches!(
        db.lpush(b"set", b"v"),
        Err(SpatError::TypeMismatch { .. })
    ));
    assert!(matches!(
        db.hget(b"str", b"f"),
        Err(SpatError::TypeMismatch { .. })
    ));
    assert!(matches!(db.get(b"set"), Err(SpatError::TypeMismatch { .. })));
    // SET does not silently replace a composite.
    assert!(matches!(
        db.set(b"set", b"v", None),
        Err(SpatError::TypeMismatch { .. })
    ));

    // Failed writes leave the original values alone.
    assert_eq!(db.get(b"str").unwrap(), Some(b"v".to_vec()));
    assert!(db.sismember(b"set", b"m").unwrap());
}

#[test]
fn test_list_stack_and_queue_order() {
    let db = TestDb::new("lists");

    let n = 50;
    for i in 0..n {
        assert_eq!(db.lpush(b"stack", format!("p{}", i).as_bytes()).unwrap(), i + 1);
    }
    assert_eq!(db.llen(b"stack").unwrap(), n);
    for i in (0..n).rev() {
        assert_eq!(
            db.lpop(b"stack").unwrap(),
            Some(format!("p{}", i).into_bytes())
        );
    }
    assert_eq!(db.lpop(b"stack").unwrap(), None);
    assert_eq!(db.llen(b"stack").unwrap(), 0);

    db.rpush(b"queue", b"first").unwrap();
    db.rpush(b"queue", b"second").unwrap();
    db.lpush(b"queue", b"zeroth").unwrap();
    assert_eq!(db.rpop(b"queue").unwrap(), Some(b"second".to_vec()));
    assert_eq!(db.lpop(b"queue").unwrap(), Some(b"zeroth".to_vec()));
    assert_eq!(db.lpop(b"queue").unwrap(), Some(b"first".to_vec()));

    assert_eq!(db.lpop(b"missing").unwrap(), None);
}

#[test]
fn test_hash_commands() {
    let db = TestDb::new("hashes");

    assert_eq!(db.hset(b"user", b"name", b"ada").unwrap(), b"ada");
    db.hset(b"user", b"lang", b"rust").unwrap();
    db.hset(b"user", b"name", b"grace").unwrap();

    assert_eq!(db.hget(b"user", b"name").unwrap(), Some(b"grace".to_vec()));
    assert_eq!(db.hlen(b"user").unwrap(), 2);
    assert!(db.hdel(b"user", b"lang").unwrap());
    assert!(!db.hdel(b"user", b"lang").unwrap());
    assert_eq!(db.hget(b"user", b"lang").unwrap(), None);
    assert_eq!(db.hget(b"nobody", b"name").unwrap(), None);
    assert_eq!(db.hlen(b"user").unwrap(), 1);
}

#[test]
fn test_many_keys_survive_resizes() {
    let db = TestDb::new("growth");

    // More than 100x the initial 128 buckets.
    let count = 100 * 128 + 1;
    for i in 0..count {
        db.set(format!("key:{}", i).as_bytes(), format!("{}", i).as_bytes(), None)
            .unwrap();
    }
    assert_eq!(db.dbsize().unwrap(), count as u64);
    for i in 0..count {
        assert_eq!(
            db.get(format!("key:{}", i).as_bytes()).unwrap(),
            Some(format!("{}", i).into_bytes()),
            "key:{} lost",
            i
        );
    }
    assert!(db.info().unwrap().buckets > 128);
}

#[test]
fn test_expiry_hides_and_reclaims() {
    let db = TestDb::new("expiry");

    db.set(b"short", b"v", Some(Duration::from_millis(50))).unwrap();
    db.set(b"long", b"v", Some(Duration::from_secs(3600))).unwrap();
    db.set(b"forever", b"v", None).unwrap();

    assert!(db.expire_at(b"short").unwrap().is_some());
    assert_eq!(db.expire_at(b"forever").unwrap(), None);
    assert!(db.ttl(b"long").unwrap().unwrap() > Duration::from_secs(3500));

    std::thread::sleep(Duration::from_millis(120));

    assert_eq!(db.get(b"short").unwrap(), None);
    assert_eq!(db.type_of(b"short").unwrap(), ValueTag::Null);
    assert_eq!(db.expire_at(b"short").unwrap(), None);
    assert_eq!(db.dbsize().unwrap(), 2);

    // An expired key can be rewritten as any type.
    assert!(db.sadd(b"short", b"m").unwrap());
    assert_eq!(db.type_of(b"short").unwrap(), ValueTag::Set);
    assert_eq!(db.expire_at(b"short").unwrap(), None);

    assert!(db.persist(b"long").unwrap());
    assert!(!db.persist(b"long").unwrap());
    assert_eq!(db.ttl(b"long").unwrap(), None);

    assert!(matches!(
        db.expire(b"missing", Duration::from_secs(1)),
        Err(SpatError::KeyNotFound { .. })
    ));
    db.expire(b"forever", Duration::from_millis(10)).unwrap();
    std::thread::sleep(Duration::from_millis(40));
    // Expired keys are reclaimed by DEL but do not count as deleted.
    assert!(!db.del(b"forever").unwrap());
    assert_eq!(db.keys().unwrap().len(), 2);
}

fn fill_mixed(db: &Database, count: usize) {
    for i in 0..count {
        let key = format!("k{}", i);
        match i % 4 {
            0 => {
                db.set(key.as_bytes(), b"some string value", None).unwrap();
            }
            1 => {
                db.sadd(key.as_bytes(), b"a").unwrap();
                db.sadd(key.as_bytes(), b"b").unwrap();
            }
            2 => {
                db.rpush(key.as_bytes(), b"x").unwrap();
                db.rpush(key.as_bytes(), b"y").unwrap();
            }
            _ => {
                db.hset(key.as_bytes(), b"f", b"v").unwrap();
            }
        }
    }
}

#[test]
fn test_flush_returns_memory() {
    let db = TestDb::new("flush");

    // The first round may grow the root directory, which keeps its size.
    fill_mixed(&db, 500);
    assert_eq!(db.flush().unwrap(), 500);
    let settled = db.arena().stats().allocated_bytes;

    fill_mixed(&db, 500);
    assert!(db.arena().stats().allocated_bytes > settled);

    assert_eq!(db.flush().unwrap(), 500);
    assert_eq!(db.dbsize().unwrap(), 0);
    assert!(db.keys().unwrap().is_empty());
    assert_eq!(db.arena().stats().allocated_bytes, settled);
    // The arena keeps its segments.
    assert!(db.dbsize_bytes() >= 256 * 1024);
}

#[test]
fn test_concurrent_sadd_from_independent_attachments() {
    let db = TestDb::new("concurrent-sadd");
    let config = test_config("concurrent-sadd");

    std::thread::scope(|s| {
        for member in [&b"from-a"[..], b"from-b"] {
            let config = config.clone();
            s.spawn(move || {
                // Separate mappings, as a separate process would have.
                let mine = Database::open(&config).unwrap();
                assert!(mine.sadd(b"shared", member).unwrap());
            });
        }
    });

    assert_eq!(db.scard(b"shared").unwrap(), 2);
    let members: HashSet<Vec<u8>> = db.smembers(b"shared").unwrap().into_iter().collect();
    assert!(members.contains(&b"from-a".to_vec()));
    assert!(members.contains(&b"from-b".to_vec()));
}

#[test]
fn test_concurrent_writers_across_segments() {
    let db = TestDb::new("concurrent-writers");
    let config = test_config("concurrent-writers");

    std::thread::scope(|s| {
        for t in 0..4 {
            let config = config.clone();
            s.spawn(move || {
                let mine = Database::open(&config).unwrap();
                for i in 0..1000 {
                    mine.set(format!("t{}:{}", t, i).as_bytes(), &[t as u8; 200], None)
                        .unwrap();
                    mine.rpush(b"log", format!("{}", t).as_bytes()).unwrap();
                }
            });
        }
    });

    assert_eq!(db.llen(b"log").unwrap(), 4000);
    assert_eq!(db.dbsize().unwrap(), 4001);
    // Values written by other attachments, possibly in segments this
    // attachment maps lazily.
    assert_eq!(db.get(b"t3:999").unwrap(), Some(vec![3u8; 200]));
    assert!(db.arena().stats().segments > 1);
}

#[test]
fn test_binary_keys_and_values() {
    let db = TestDb::new("binary");
    let key = [0u8, 1, 2, 255];
    let value = [10u8, 0, 13, 0];
    db.set(&key, &value, None).unwrap();
    assert_eq!(db.get(&key).unwrap(), Some(value.to_vec()));
    db.set(b"empty", b"", None).unwrap();
    assert_eq!(db.get(b"empty").unwrap(), Some(Vec::new()));
}

#[test]
fn test_open_from_config_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("spat.yaml");
    std::fs::write(
        &path,
        format!(
            r#"
database:
  name: from-file
  namespace: spat-it-{}
arena:
  initial_segment_size: 131072
  max_total_size: 8388608
"#,
            std::process::id()
        ),
    )
    .expect("Failed to write config");

    let config = ConfigLoader::load_file(&path).expect("Failed to load config");
    let _ = Database::purge(&config.database);
    let db = Database::open(&config).expect("Failed to open database");
    db.set(b"k", b"v", None).unwrap();
    assert_eq!(db.name().as_str(), "from-file");
    assert!(db.dbsize_bytes() >= 131072);
    db.unlink().unwrap();

    assert!(matches!(
        ConfigLoader::load_file(temp_dir.path().join("missing.yaml")),
        Err(SpatError::ConfigNotFound { .. })
    ));
}
