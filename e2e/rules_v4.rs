//! E2E: IPv4 rule-table accelerator.
//!
//! The rule table is rebuilt by a background worker, so these suites poll
//! `info().rules_ready` with generous deadlines. While the table is
//! unpublished, lookups run off the bucket chains; once published, every
//! length-24-or-shorter answer comes from the 2^24-entry table, and the
//! two paths must agree.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use lpmtab::{EngineKind, Family, LpmError, LpmTable, TableOptions};

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn rules_table(max_routes: u32) -> LpmTable {
    let _ = env_logger::builder().is_test(true).try_init();
    let opts = TableOptions {
        ipv4_rules: true,
        ..TableOptions::default()
    };
    LpmTable::new(EngineKind::Hash, Family::Ipv4, max_routes, &opts).expect("table creation")
}

/// Polls until `rules_ready` holds. The sweep covers 16,777,216 slots at
/// one reader-lock acquisition each, so allow a wide margin.
fn wait_ready(t: &LpmTable) {
    let deadline = Instant::now() + Duration::from_secs(120);
    while !t.info().rules_ready {
        assert!(
            Instant::now() < deadline,
            "rule table did not converge in time"
        );
        std::thread::sleep(Duration::from_millis(100));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Convergence and agreement after a single short route
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn rule_table_converges_and_answers_match() {
    let t = rules_table(100);
    t.add(ip("1.1.1.0"), 24, 5).unwrap();
    assert!(!t.info().rules_ready);

    // Correct answers while the table is still unpublished.
    let m = t.lpm(ip("1.1.1.1")).unwrap();
    assert_eq!((m.len, m.user_data), (24, 5));

    wait_ready(&t);

    // Accelerated path: covered /24 answers, uncovered /24 misses.
    let m = t.lpm(ip("1.1.1.200")).unwrap();
    assert_eq!((m.len, m.user_data), (24, 5));
    assert_eq!(t.lpm(ip("2.2.2.2")), Err(LpmError::NotFound));
}

// ─────────────────────────────────────────────────────────────────────────────
// Mutations unpublish, then republish
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn short_route_mutations_cycle_rules_ready() {
    let t = rules_table(100);
    t.add(ip("1.1.1.0"), 24, 5).unwrap();
    wait_ready(&t);

    // A second short route unpublishes synchronously.
    t.add(ip("9.9.9.0"), 24, 6).unwrap();
    assert!(!t.info().rules_ready);

    wait_ready(&t);
    let m = t.lpm(ip("9.9.9.9")).unwrap();
    assert_eq!((m.len, m.user_data), (24, 6));
    let m = t.lpm(ip("1.1.1.9")).unwrap();
    assert_eq!((m.len, m.user_data), (24, 5));

    // Deleting a short route cycles it again.
    t.delete(ip("9.9.9.0"), 24).unwrap();
    assert!(!t.info().rules_ready);
    wait_ready(&t);
    assert_eq!(t.lpm(ip("9.9.9.9")), Err(LpmError::NotFound));
}

// ─────────────────────────────────────────────────────────────────────────────
// Host routes bypass the rule table
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn long_routes_still_win_over_the_rule_table() {
    let t = rules_table(100);
    t.add(ip("1.1.1.0"), 24, 5).unwrap();
    wait_ready(&t);

    // A /32 is longer than the table covers; it must shadow the /24
    // even though /32 mutations leave the published table alone.
    t.add(ip("1.1.1.7"), 32, 77).unwrap();
    let m = t.lpm(ip("1.1.1.7")).unwrap();
    assert_eq!((m.len, m.user_data), (32, 77));
    let m = t.lpm(ip("1.1.1.8")).unwrap();
    assert_eq!((m.len, m.user_data), (24, 5));
}

// ─────────────────────────────────────────────────────────────────────────────
// Nested short prefixes resolve through the table
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn rule_table_encodes_restricted_lpm() {
    let t = rules_table(100);
    t.add(ip("10.0.0.0"), 8, 1).unwrap();
    t.add(ip("10.1.0.0"), 16, 2).unwrap();
    t.add(ip("10.1.2.0"), 24, 3).unwrap();
    wait_ready(&t);

    // Each /24 entry holds the longest covering prefix of length <= 24.
    let m = t.lpm(ip("10.1.2.9")).unwrap();
    assert_eq!((m.len, m.user_data), (24, 3));
    let m = t.lpm(ip("10.1.9.9")).unwrap();
    assert_eq!((m.len, m.user_data), (16, 2));
    let m = t.lpm(ip("10.200.0.1")).unwrap();
    assert_eq!((m.len, m.user_data), (8, 1));
    assert_eq!(t.lpm(ip("11.0.0.0")), Err(LpmError::NotFound));
}
