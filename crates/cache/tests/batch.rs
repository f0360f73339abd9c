//! Multi-cache runs

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{Fixture, config};
use cistash_cache::Phase;

#[tokio::test]
async fn one_failure_does_not_affect_the_rest() {
    let fx = Fixture::new();
    fx.write("a/file.txt", "a");
    fx.write("b/file.txt", "b");
    fx.write("c/file.txt", "c");
    let cache = fx.cache();

    let saves = vec![
        config("a", "key-a", &[], &["a"]),
        config("b", "key-b", &[], &["b"]),
        config("c", "key-c", &[], &["c"]),
    ];
    let saved = cache.save_all(&saves).await;
    assert_eq!(saved.len(), 3);
    assert!(saved.iter().all(|(_, r)| r.as_ref().unwrap().cache_created));

    std::fs::remove_dir_all(fx.work.join("a")).unwrap();
    std::fs::remove_dir_all(fx.work.join("b")).unwrap();

    let restores = vec![
        config("a", "key-a", &[], &["a"]),
        config("b", "broken-b", &[], &["b"]),
        config("c", "key-c", &[], &["c"]),
    ];
    let restored = cache.restore_all(&restores).await;
    assert_eq!(restored.len(), 3);

    let err = restored["b"].as_ref().unwrap_err();
    assert_eq!(err.phase(), Some(Phase::Retrieve));
    assert!(restored["a"].as_ref().unwrap().cache_hit);
    assert!(restored["c"].as_ref().unwrap().cache_restored);
    assert_eq!(
        std::fs::read_to_string(fx.work.join("a/file.txt")).unwrap(),
        "a"
    );
}

#[tokio::test]
async fn save_all_continues_after_failure() {
    let fx = Fixture::new();
    fx.write("present/file.txt", "x");
    let saved = fx
        .cache()
        .save_all(&[
            config("missing", "key-missing", &[], &["absent"]),
            config("present", "key-present", &[], &["present"]),
        ])
        .await;
    assert_eq!(saved[0].0, "missing");
    assert!(saved[0].1.is_err());
    assert!(saved[1].1.as_ref().unwrap().cache_created);
}

#[tokio::test]
async fn duplicate_ids_restore_once() {
    let fx = Fixture::new();
    let restored = fx
        .cache()
        .restore_all(&[
            config("deps", "key-1", &[], &["x"]),
            config("deps", "key-1", &[], &["x"]),
        ])
        .await;
    assert_eq!(restored.len(), 1);
    assert_eq!(fx.registry.count("retrieve"), 1);
}
