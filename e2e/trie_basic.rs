//! E2E: trie engine.
//!
//! Covers the radix-trie engine through the façade:
//! - delete-time compaction and bottom-up pruning (observable through the
//!   node count in `info`)
//! - default-route fallback after deleting an intermediate prefix
//! - hit counters and ordered iteration
//! - IPv6 deep-prefix behavior

use std::net::IpAddr;

use lpmtab::{EngineKind, Family, LpmError, LpmTable, TableOptions};

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn trie(family: Family, max_routes: u32, opts: &TableOptions) -> LpmTable {
    LpmTable::new(EngineKind::Trie, family, max_routes, opts).expect("table creation")
}

// ─────────────────────────────────────────────────────────────────────────────
// Delete compaction
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn deleting_an_intermediate_prefix_falls_back_to_the_default() {
    let t = trie(Family::Ipv4, 10, &TableOptions::default());
    t.add(ip("0.0.0.0"), 0, 0).unwrap();
    t.add(ip("128.0.0.0"), 1, 1).unwrap();
    t.add(ip("192.0.0.0"), 2, 2).unwrap();
    let nodes_before = t.info().num_nodes;

    t.delete(ip("128.0.0.0"), 1).unwrap();

    let m = t.lpm(ip("150.0.0.0")).unwrap();
    assert_eq!((m.len, m.user_data), (0, 0));
    let m = t.lpm(ip("200.0.0.0")).unwrap();
    assert_eq!((m.len, m.user_data), (2, 2));
    // Only the route disappeared; no orphan nodes appeared.
    assert!(t.info().num_nodes <= nodes_before);
    assert_eq!(t.info().num_routes, 2);
}

#[test]
fn pruning_reclaims_every_node_of_a_private_path() {
    let t = trie(Family::Ipv4, 10, &TableOptions::default());
    t.add(ip("10.0.0.0"), 8, 1).unwrap();
    let baseline = t.info().num_nodes;

    // A /24 under the /8 adds sixteen path nodes; deleting it must return
    // the trie to its previous shape.
    t.add(ip("10.1.2.0"), 24, 2).unwrap();
    assert_eq!(t.info().num_nodes, baseline + 16);
    t.delete(ip("10.1.2.0"), 24).unwrap();
    assert_eq!(t.info().num_nodes, baseline);

    let m = t.lpm(ip("10.1.2.3")).unwrap();
    assert_eq!((m.len, m.user_data), (8, 1));
}

#[test]
fn emptying_the_trie_releases_all_nodes() {
    let t = trie(Family::Ipv4, 10, &TableOptions::default());
    t.add(ip("10.0.0.0"), 8, 1).unwrap();
    t.add(ip("10.128.0.0"), 9, 2).unwrap();
    t.add(ip("0.0.0.0"), 0, 3).unwrap();

    t.delete(ip("10.0.0.0"), 8).unwrap();
    t.delete(ip("0.0.0.0"), 0).unwrap();
    t.delete(ip("10.128.0.0"), 9).unwrap();

    let info = t.info();
    assert_eq!(info.num_routes, 0);
    assert_eq!(info.num_nodes, 0);
    assert_eq!(t.lpm(ip("10.0.0.1")), Err(LpmError::NotFound));
}

// ─────────────────────────────────────────────────────────────────────────────
// Boundary lengths
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn boundary_lengths_v4() {
    let t = trie(Family::Ipv4, 10, &TableOptions::default());
    t.add(ip("0.0.0.0"), 0, 1).unwrap();
    t.add(ip("203.0.113.7"), 32, 2).unwrap();

    let m = t.lpm(ip("203.0.113.7")).unwrap();
    assert_eq!((m.len, m.user_data), (32, 2));
    let m = t.lpm(ip("203.0.113.8")).unwrap();
    assert_eq!((m.len, m.user_data), (0, 1));
}

#[test]
fn boundary_lengths_v6() {
    let t = trie(Family::Ipv6, 10, &TableOptions::default());
    t.add(ip("::"), 0, 1).unwrap();
    t.add(ip("2001:db8::7"), 128, 2).unwrap();

    let m = t.lpm(ip("2001:db8::7")).unwrap();
    assert_eq!((m.len, m.user_data), (128, 2));
    let m = t.lpm(ip("2001:db8::8")).unwrap();
    assert_eq!((m.len, m.user_data), (0, 1));
}

#[test]
fn shadowed_longer_match_survives_shorter_add() {
    let t = trie(Family::Ipv4, 10, &TableOptions::default());
    t.add(ip("10.1.0.0"), 16, 2).unwrap();
    let m = t.lpm(ip("10.1.9.9")).unwrap();
    assert_eq!((m.len, m.user_data), (16, 2));

    // Adding a shorter covering prefix must not change this answer.
    t.add(ip("10.0.0.0"), 8, 1).unwrap();
    let m = t.lpm(ip("10.1.9.9")).unwrap();
    assert_eq!((m.len, m.user_data), (16, 2));
}

// ─────────────────────────────────────────────────────────────────────────────
// Hit counters
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn hit_counters_count_lpm_results_only() {
    let opts = TableOptions {
        hit_count: true,
        ..TableOptions::default()
    };
    let t = trie(Family::Ipv4, 10, &opts);
    t.add(ip("10.0.0.0"), 8, 1).unwrap();
    t.add(ip("10.1.0.0"), 16, 2).unwrap();

    t.lpm(ip("10.1.0.1")).unwrap(); // hits the /16
    t.lpm(ip("10.2.0.1")).unwrap(); // hits the /8
    t.lpm(ip("10.1.0.2")).unwrap(); // hits the /16

    let d = t.get(ip("10.1.0.0"), 16, true).unwrap();
    assert_eq!(d.hit_count, 2);
    let d = t.get(ip("10.0.0.0"), 8, false).unwrap();
    assert_eq!(d.hit_count, 1);
    // The clearing read above reset the /16 counter.
    assert_eq!(t.get(ip("10.1.0.0"), 16, false).unwrap().hit_count, 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Ordered iteration
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn ordered_walk_visits_every_route_once() {
    let opts = TableOptions {
        next_get: true,
        ..TableOptions::default()
    };
    let t = trie(Family::Ipv4, 16, &opts);
    let prefixes = [
        ("10.0.0.0", 8u8),
        ("10.1.0.0", 16),
        ("10.1.2.0", 24),
        ("172.16.0.0", 12),
        ("192.0.2.0", 24),
    ];
    for (i, (a, l)) in prefixes.iter().enumerate() {
        t.add(ip(a), *l, i as u64).unwrap();
    }

    let mut seen = Vec::new();
    let mut cur = t.first_route().unwrap();
    loop {
        seen.push((cur.prefix.to_string(), cur.user_data));
        match t.next_route(cur.prefix.addr, cur.prefix.len) {
            Ok(next) => cur = next,
            Err(LpmError::NotFound) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(
        seen,
        vec![
            ("10.0.0.0/8".to_string(), 0),
            ("10.1.0.0/16".to_string(), 1),
            ("10.1.2.0/24".to_string(), 2),
            ("172.16.0.0/12".to_string(), 3),
            ("192.0.2.0/24".to_string(), 4),
        ]
    );
}
