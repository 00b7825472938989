//! E2E: engine equivalence.
//!
//! The trie and hash engines must be interchangeable: for any sequence of
//! control-plane operations, every public result (add/delete/set/get/lpm,
//! modulo hit counters and memory numbers) is identical. These suites run
//! the same operation stream against both engines and compare outcomes
//! call by call.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use lpmtab::{EngineKind, Family, LpmTable, Result, TableOptions};

fn pair(family: Family, max_routes: u32) -> (LpmTable, LpmTable) {
    let opts = TableOptions::default();
    (
        LpmTable::new(EngineKind::Trie, family, max_routes, &opts).unwrap(),
        LpmTable::new(EngineKind::Hash, family, max_routes, &opts).unwrap(),
    )
}

fn same_lpm(trie: &LpmTable, hash: &LpmTable, addr: IpAddr) {
    let a = trie.lpm(addr);
    let b = hash.lpm(addr);
    assert_eq!(a, b, "engines diverged on lpm({addr})");
}

// ─────────────────────────────────────────────────────────────────────────────
// Randomized IPv4 operation stream
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn random_v4_operations_agree() {
    let (trie, hash) = pair(Family::Ipv4, 4096);
    let mut rng = StdRng::seed_from_u64(0x5eed_0004);

    for step in 0..20_000u32 {
        let len = rng.random_range(0..=32u8);
        let addr = IpAddr::V4(Ipv4Addr::from(rng.random::<u32>()));
        let op = rng.random_range(0..10);

        let (a, b): (Result<()>, Result<()>) = match op {
            0..=4 => (
                trie.add(addr, len, step as u64),
                hash.add(addr, len, step as u64),
            ),
            5..=7 => (trie.delete(addr, len), hash.delete(addr, len)),
            _ => (
                trie.set(addr, len, step as u64 + 1),
                hash.set(addr, len, step as u64 + 1),
            ),
        };
        assert_eq!(a, b, "engines diverged on op {op} at step {step}");

        if step % 64 == 0 {
            let probe = IpAddr::V4(Ipv4Addr::from(rng.random::<u32>()));
            same_lpm(&trie, &hash, probe);
            assert_eq!(
                trie.get(addr, len, false).map(|d| d.user_data),
                hash.get(addr, len, false).map(|d| d.user_data)
            );
        }
    }
    assert_eq!(trie.info().num_routes, hash.info().num_routes);
}

// ─────────────────────────────────────────────────────────────────────────────
// Randomized IPv6 operation stream
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn random_v6_operations_agree() {
    let (trie, hash) = pair(Family::Ipv6, 2048);
    let mut rng = StdRng::seed_from_u64(0x5eed_0006);

    for step in 0..5_000u32 {
        // Cluster prefixes under one /16 so lookups actually collide.
        let addr = (0x2001u128 << 112) | (rng.random::<u64>() as u128) << 48;
        let addr = IpAddr::V6(Ipv6Addr::from(addr));
        let len = rng.random_range(0..=128u8);

        let (a, b) = if rng.random_range(0..3) > 0 {
            (
                trie.add(addr, len, step as u64),
                hash.add(addr, len, step as u64),
            )
        } else {
            (trie.delete(addr, len), hash.delete(addr, len))
        };
        assert_eq!(a, b, "engines diverged at step {step}");

        if step % 32 == 0 {
            let probe = (0x2001u128 << 112) | (rng.random::<u64>() as u128) << 48;
            same_lpm(&trie, &hash, IpAddr::V6(Ipv6Addr::from(probe)));
        }
    }
    assert_eq!(trie.info().num_routes, hash.info().num_routes);
}

// ─────────────────────────────────────────────────────────────────────────────
// Deterministic nested-prefix scenario
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn nested_prefixes_and_deletes_agree() {
    let (trie, hash) = pair(Family::Ipv4, 64);
    let routes: [(&str, u8); 7] = [
        ("0.0.0.0", 0),
        ("10.0.0.0", 8),
        ("10.1.0.0", 16),
        ("10.1.2.0", 24),
        ("10.1.2.128", 25),
        ("10.1.2.192", 26),
        ("10.1.2.200", 32),
    ];
    for (i, (a, l)) in routes.iter().enumerate() {
        let addr: IpAddr = a.parse().unwrap();
        trie.add(addr, *l, i as u64).unwrap();
        hash.add(addr, *l, i as u64).unwrap();
    }

    let probes = [
        "10.1.2.200",
        "10.1.2.201",
        "10.1.2.129",
        "10.1.2.1",
        "10.1.9.9",
        "10.9.9.9",
        "9.9.9.9",
    ];
    for p in probes {
        same_lpm(&trie, &hash, p.parse().unwrap());
    }

    // Peel the nest from the middle outward, re-checking after each delete.
    for (a, l) in ["10.1.2.192/26", "10.1.0.0/16", "0.0.0.0/0"]
        .iter()
        .map(|s| s.split_once('/').unwrap())
    {
        let addr: IpAddr = a.parse().unwrap();
        let len: u8 = l.parse().unwrap();
        trie.delete(addr, len).unwrap();
        hash.delete(addr, len).unwrap();
        for p in probes {
            same_lpm(&trie, &hash, p.parse().unwrap());
        }
    }
}
