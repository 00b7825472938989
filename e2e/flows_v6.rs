//! E2E: IPv6 flow cache.
//!
//! The flow cache is observable through `info().flow_not_found`: a lookup
//! served from the cache leaves the counter alone, a slow-path lookup
//! bumps it. These suites drive learn, repeat-hit, correlator
//! invalidation, and ager eviction through that signal.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use lpmtab::{EngineKind, Family, LpmError, LpmTable, TableOptions};

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn flow_table(age_secs: u32) -> LpmTable {
    let opts = TableOptions {
        ipv6_flow: true,
        ipv6_max_flows: 1000,
        ipv6_flow_age_time: age_secs,
        ..TableOptions::default()
    };
    LpmTable::new(EngineKind::Hash, Family::Ipv6, 100, &opts).expect("table creation")
}

// ─────────────────────────────────────────────────────────────────────────────
// Learn on first lookup, serve from cache on the second
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn repeat_lookup_is_served_by_the_cache() {
    let t = flow_table(600);
    t.add(ip("2001:db8::"), 32, 7).unwrap();

    let m = t.lpm(ip("2001:db8::1")).unwrap();
    assert_eq!((m.len, m.user_data), (32, 7));
    assert_eq!(t.info().flow_not_found, 1);

    // Same destination again: same answer, no new miss.
    let m = t.lpm(ip("2001:db8::1")).unwrap();
    assert_eq!((m.len, m.user_data), (32, 7));
    assert_eq!(t.info().flow_not_found, 1);

    // A different destination is its own flow.
    let m = t.lpm(ip("2001:db8::2")).unwrap();
    assert_eq!((m.len, m.user_data), (32, 7));
    assert_eq!(t.info().flow_not_found, 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Route mutations invalidate cached flows via the correlator
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn route_change_invalidates_and_relearns() {
    let t = flow_table(600);
    t.add(ip("2001:db8::"), 32, 7).unwrap();

    let dst = ip("2001:db8:1::1");
    let m = t.lpm(dst).unwrap();
    assert_eq!((m.len, m.user_data), (32, 7));
    let m = t.lpm(dst).unwrap();
    assert_eq!((m.len, m.user_data), (32, 7));

    // A more specific route arrives; the stale cached answer must not be
    // served even once.
    t.add(ip("2001:db8:1::"), 48, 8).unwrap();
    let misses_before = t.info().flow_not_found;
    let m = t.lpm(dst).unwrap();
    assert_eq!((m.len, m.user_data), (48, 8));
    assert_eq!(t.info().flow_not_found, misses_before + 1);

    // The re-learned flow serves the new answer from the cache.
    let m = t.lpm(dst).unwrap();
    assert_eq!((m.len, m.user_data), (48, 8));
    assert_eq!(t.info().flow_not_found, misses_before + 1);
}

#[test]
fn delete_invalidates_cached_flows_too() {
    let t = flow_table(600);
    t.add(ip("2001:db8::"), 32, 7).unwrap();
    t.add(ip("2001:db8:1::"), 48, 8).unwrap();

    let dst = ip("2001:db8:1::9");
    let m = t.lpm(dst).unwrap();
    assert_eq!((m.len, m.user_data), (48, 8));
    let m = t.lpm(dst).unwrap();
    assert_eq!((m.len, m.user_data), (48, 8));

    t.delete(ip("2001:db8:1::"), 48).unwrap();
    let m = t.lpm(dst).unwrap();
    assert_eq!((m.len, m.user_data), (32, 7));
}

// ─────────────────────────────────────────────────────────────────────────────
// Ager evicts idle flows after one to two intervals
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn idle_flows_age_out() {
    let t = flow_table(2);
    t.add(ip("2001:db8::"), 32, 7).unwrap();

    let dst = ip("2001:db8::aa");
    t.lpm(dst).unwrap();
    assert_eq!(t.info().flow_not_found, 1);

    // After well over two dispatch intervals with no traffic, the flow
    // must have been evicted: the next lookup misses the cache again.
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        std::thread::sleep(Duration::from_secs(5));
        let before = t.info().flow_not_found;
        let m = t.lpm(dst).unwrap();
        assert_eq!((m.len, m.user_data), (32, 7));
        if t.info().flow_not_found > before {
            break; // evicted and re-learned
        }
        assert!(
            Instant::now() < deadline,
            "flow was never aged out of the cache"
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Misses with no matching route
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn unmatched_destinations_count_misses_and_learn_nothing() {
    let t = flow_table(600);
    assert_eq!(t.lpm(ip("2001:db8::1")), Err(LpmError::NotFound));
    assert_eq!(t.lpm(ip("2001:db8::1")), Err(LpmError::NotFound));
    // No route means nothing to cache: every lookup is a miss.
    assert_eq!(t.info().flow_not_found, 2);
}
