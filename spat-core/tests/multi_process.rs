// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Cross-process tests: forked children attach to the same database by name.

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};

use spat_core::{Config, Database, DbName, Namespace};

fn test_config() -> Config {
    let mut config = Config::default();
    config.database.name = DbName::new("forked").expect("valid db name");
    config.database.namespace =
        Namespace::new(format!("spat-mp-{}", std::process::id())).expect("valid namespace");
    config.arena.initial_segment_size = 128 * 1024;
    config.arena.max_total_size = 32 * 1024 * 1024;
    config
}

/// Child body. Returns the exit code.
fn child_work(config: &Config, member: &[u8]) -> i32 {
    let Ok(db) = Database::open(config) else {
        return 2;
    };
    let ok = db.sadd(b"shared-set", member).unwrap_or(false)
        && db.rpush(b"arrivals", member).is_ok()
        && (0..2000).all(|i| {
            db.set(
                format!("{}:{}", String::from_utf8_lossy(member), i).as_bytes(),
                &[7u8; 64],
                None,
            )
            .is_ok()
        });
    if ok {
        0
    } else {
        1
    }
}

#[test]
fn test_forked_processes_share_a_database() {
    let config = test_config();
    let _ = Database::purge(&config.database);

    // The parent creates the database so children only ever join.
    let db = Database::open(&config).expect("Failed to open database");
    db.set(b"greeting", b"from parent", None).unwrap();

    let mut children = Vec::new();
    for member in [&b"child-a"[..], b"child-b"] {
        // SAFETY: the child only touches the database and leaves via _exit.
        match unsafe { fork() }.expect("fork failed") {
            ForkResult::Child => {
                let code = child_work(&config, member);
                unsafe { libc::_exit(code) };
            }
            ForkResult::Parent { child } => children.push(child),
        }
    }

    for child in children {
        match waitpid(child, None).expect("waitpid failed") {
            WaitStatus::Exited(_, code) => assert_eq!(code, 0, "child {} failed", child),
            other => panic!("child ended unexpectedly: {:?}", other),
        }
    }

    assert_eq!(db.scard(b"shared-set").unwrap(), 2);
    assert!(db.sismember(b"shared-set", b"child-a").unwrap());
    assert!(db.sismember(b"shared-set", b"child-b").unwrap());
    assert_eq!(db.llen(b"arrivals").unwrap(), 2);
    assert_eq!(db.get(b"child-b:1999").unwrap(), Some(vec![7u8; 64]));
    // Greeting, set, list and 2000 strings per child.
    assert_eq!(db.dbsize().unwrap(), 3 + 4000);

    // A fresh attachment sees the children's work, including segments it
    // has to map on demand.
    let late = Database::open(&config).expect("Failed to attach");
    assert_eq!(late.get(b"greeting").unwrap(), Some(b"from parent".to_vec()));
    assert_eq!(late.get(b"child-a:0").unwrap(), Some(vec![7u8; 64]));

    db.unlink().unwrap();
}
