// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use crate::ResultCache;

use std::time::Duration;

#[test]
fn get_and_put() {
    let cache: ResultCache<&str, u64> = ResultCache::new();
    assert_eq!(None, cache.get(&"blur", 1));
    cache.put("blur", 1, 42);
    assert_eq!(Some(42), cache.get(&"blur", 1));

    // A different signature for the same key is a distinct entry.
    assert_eq!(None, cache.get(&"blur", 2));
    cache.put("blur", 2, 43);
    assert_eq!(Some(42), cache.get(&"blur", 1));
    assert_eq!(Some(43), cache.get(&"blur", 2));
}

#[test]
fn invalidate_key_drops_all_signatures() {
    let cache: ResultCache<&str, u64> = ResultCache::new();
    cache.put("blur", 1, 42);
    cache.put("blur", 2, 43);
    cache.put("warp", 1, 44);
    assert_eq!(3, cache.len());

    cache.invalidate(&"blur");
    assert_eq!(1, cache.len());
    assert_eq!(None, cache.get(&"blur", 1));
    assert_eq!(Some(44), cache.get(&"warp", 1));

    cache.invalidate_all();
    assert_eq!(0, cache.len());
}

#[test]
fn eviction_keeps_recently_used_half() {
    let cache: ResultCache<u32, u32> = ResultCache::with_capacity(8, Duration::from_secs(300));
    for i in 0..8 {
        cache.put(i, 0, i);
    }
    // Touch the upper half so it is the most recently used.
    for i in 4..8 {
        assert_eq!(Some(i), cache.get(&i, 0));
    }

    // Overflow: the least-recently-used half is evicted in one pass.
    cache.put(100, 0, 100);
    assert!(cache.len() <= 5);
    for i in 4..8 {
        assert_eq!(Some(i), cache.get(&i, 0));
    }
    assert_eq!(Some(100), cache.get(&100, 0));
}

#[test]
fn idle_entries_expire_on_access() {
    let cache: ResultCache<&str, u32> = ResultCache::with_capacity(8, Duration::from_millis(10));
    cache.put("blur", 1, 42);
    std::thread::sleep(Duration::from_millis(25));
    assert_eq!(None, cache.get(&"blur", 1));
    assert_eq!(0, cache.len());
}

#[test]
fn stats() {
    let cache: ResultCache<&str, u32> = ResultCache::with_capacity(10, Duration::from_secs(300));
    cache.put("blur", 1, 42);
    let _ = cache.get(&"blur", 1);
    let _ = cache.get(&"blur", 9);
    let _ = cache.get(&"missing", 1);

    let stats = cache.stats();
    assert_eq!(1, stats.hits);
    assert_eq!(2, stats.misses);
    assert_eq!(1, stats.size);
    assert_eq!(10, stats.capacity);
    assert!((stats.utilization - 0.1).abs() < f64::EPSILON);
}

#[test]
fn replacing_an_entry_does_not_grow_the_cache() {
    let cache: ResultCache<&str, u32> = ResultCache::with_capacity(8, Duration::from_secs(300));
    cache.put("blur", 1, 42);
    cache.put("blur", 1, 43);
    assert_eq!(1, cache.len());
    assert_eq!(Some(43), cache.get(&"blur", 1));
}
