//! E2E: IPv4 hash engine.
//!
//! Covers the hash engine end to end through the façade:
//! - longest-prefix-match ordering across nested prefixes
//! - default-route and host-route boundary lengths
//! - bucket-array growth under load and shrink back to empty
//! - delete/re-add idempotence

use std::net::IpAddr;

use lpmtab::{EngineKind, Family, LpmError, LpmTable, TableOptions};

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn hash_v4(max_routes: u32) -> LpmTable {
    LpmTable::new(
        EngineKind::Hash,
        Family::Ipv4,
        max_routes,
        &TableOptions::default(),
    )
    .expect("table creation")
}

// ─────────────────────────────────────────────────────────────────────────────
// Nested prefixes resolve longest-first
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn nested_prefixes_resolve_longest_first() {
    let t = hash_v4(10);
    t.add(ip("10.0.0.0"), 8, 1).unwrap();
    t.add(ip("10.1.0.0"), 16, 2).unwrap();
    t.add(ip("10.1.2.0"), 24, 3).unwrap();

    let m = t.lpm(ip("10.1.2.5")).unwrap();
    assert_eq!((m.len, m.user_data), (24, 3));
    let m = t.lpm(ip("10.1.3.5")).unwrap();
    assert_eq!((m.len, m.user_data), (16, 2));
    let m = t.lpm(ip("10.2.0.0")).unwrap();
    assert_eq!((m.len, m.user_data), (8, 1));
    assert_eq!(t.lpm(ip("11.0.0.0")), Err(LpmError::NotFound));
}

// ─────────────────────────────────────────────────────────────────────────────
// Boundary lengths: /0 matches everything, /32 only itself
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn default_route_catches_unmatched_addresses() {
    let t = hash_v4(10);
    t.add(ip("0.0.0.0"), 0, 99).unwrap();
    t.add(ip("192.0.2.0"), 24, 1).unwrap();

    let m = t.lpm(ip("192.0.2.77")).unwrap();
    assert_eq!((m.len, m.user_data), (24, 1));
    let m = t.lpm(ip("8.8.8.8")).unwrap();
    assert_eq!((m.len, m.user_data), (0, 99));
    let m = t.lpm(ip("255.255.255.255")).unwrap();
    assert_eq!((m.len, m.user_data), (0, 99));
}

#[test]
fn host_route_matches_exactly_one_address() {
    let t = hash_v4(10);
    t.add(ip("192.0.2.1"), 32, 5).unwrap();
    let m = t.lpm(ip("192.0.2.1")).unwrap();
    assert_eq!((m.len, m.user_data), (32, 5));
    assert_eq!(t.lpm(ip("192.0.2.0")), Err(LpmError::NotFound));
    assert_eq!(t.lpm(ip("192.0.2.2")), Err(LpmError::NotFound));
}

// ─────────────────────────────────────────────────────────────────────────────
// Bucket growth under a quarter-million routes
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn bucket_array_grows_and_every_route_survives() {
    let t = hash_v4(1_000_000);
    let base = u32::from("10.0.0.0".parse::<std::net::Ipv4Addr>().unwrap());

    let buckets_at = |t: &LpmTable| t.info().num_nodes;

    for i in 0..250_001u32 {
        let addr = IpAddr::V4(std::net::Ipv4Addr::from(base + i));
        t.add(addr, 32, i as u64).unwrap();
        if i == 100_000 {
            // Load factor 5 has crossed several 100,000-entry blocks by now.
            assert!(buckets_at(&t) > 500_000);
        }
    }
    let grown = buckets_at(&t);
    assert!(grown >= 250_001u64 * 5 / 100_000 * 100_000);
    assert_eq!(t.info().num_routes, 250_001);

    // Every route answers with its original payload.
    for i in (0..250_001u32).step_by(97) {
        let addr = IpAddr::V4(std::net::Ipv4Addr::from(base + i));
        assert_eq!(t.get(addr, 32, false).unwrap().user_data, i as u64);
        let m = t.lpm(addr).unwrap();
        assert_eq!((m.len, m.user_data), (32, i as u64));
    }
}

#[test]
fn shrink_to_zero_blocks_and_regrow() {
    let t = hash_v4(100_000);
    let base = u32::from("172.16.0.0".parse::<std::net::Ipv4Addr>().unwrap());

    for i in 0..30_000u32 {
        t.add(IpAddr::V4(std::net::Ipv4Addr::from(base + i)), 32, i as u64)
            .unwrap();
    }
    for i in 0..30_000u32 {
        t.delete(IpAddr::V4(std::net::Ipv4Addr::from(base + i)), 32)
            .unwrap();
    }
    assert_eq!(t.info().num_routes, 0);
    assert_eq!(t.lpm(ip("172.16.0.1")), Err(LpmError::NotFound));

    // Identical lookup results after regrowing from empty.
    for i in 0..30_000u32 {
        t.add(IpAddr::V4(std::net::Ipv4Addr::from(base + i)), 32, i as u64)
            .unwrap();
    }
    for i in (0..30_000u32).step_by(53) {
        let m = t
            .lpm(IpAddr::V4(std::net::Ipv4Addr::from(base + i)))
            .unwrap();
        assert_eq!((m.len, m.user_data), (32, i as u64));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Idempotence laws
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn add_get_set_delete_laws() {
    let t = hash_v4(10);
    let p = ip("198.51.100.0");

    t.add(p, 24, 11).unwrap();
    let d = t.get(p, 24, false).unwrap();
    assert_eq!((d.user_data, d.hit_count), (11, 0));

    t.set(p, 24, 12).unwrap();
    assert_eq!(t.get(p, 24, false).unwrap().user_data, 12);

    t.delete(p, 24).unwrap();
    assert_eq!(t.get(p, 24, false), Err(LpmError::NotFound));
    assert_eq!(t.delete(p, 24), Err(LpmError::NotFound));
    assert_eq!(t.set(p, 24, 1), Err(LpmError::NotFound));

    // Re-adding a deleted key behaves like the first add.
    t.add(p, 24, 13).unwrap();
    assert_eq!(t.get(p, 24, false).unwrap().user_data, 13);
}

#[test]
fn failed_operations_leave_the_table_unchanged() {
    let t = hash_v4(2);
    t.add(ip("10.0.0.0"), 8, 1).unwrap();
    t.add(ip("11.0.0.0"), 8, 2).unwrap();

    assert_eq!(t.add(ip("10.0.0.0"), 8, 9), Err(LpmError::AlreadyExists));
    assert_eq!(t.add(ip("12.0.0.0"), 8, 3), Err(LpmError::CapacityExceeded));
    assert_eq!(t.delete(ip("13.0.0.0"), 8), Err(LpmError::NotFound));

    assert_eq!(t.info().num_routes, 2);
    assert_eq!(t.get(ip("10.0.0.0"), 8, false).unwrap().user_data, 1);
    assert_eq!(t.get(ip("11.0.0.0"), 8, false).unwrap().user_data, 2);
}
