//! E2E: concurrent lookups under control-plane churn.
//!
//! Readers hammer `lpm` while writers add and delete host routes on
//! disjoint address ranges. Every lookup must return an answer that was
//! correct for *some* state the table passed through during the call:
//! with a stable covering /8 and toggling /32s whose payload encodes
//! their own address, that reduces to a closed-form check per result.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use lpmtab::{EngineKind, Family, LpmError, LpmTable, TableOptions};

const READERS: usize = 4;
const WRITERS: usize = 2;
const TOGGLES_PER_WRITER: u32 = 512;

fn churn(engine: EngineKind) {
    let _ = env_logger::builder().is_test(true).try_init();
    let table = Arc::new(
        LpmTable::new(engine, Family::Ipv4, 100_000, &TableOptions::default()).unwrap(),
    );
    // Stable covering route: every 10.x.y.z lookup has at least this.
    table.add(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0)), 8, 1).unwrap();

    // Seed half the toggle set so readers see deletes as well as adds.
    for w in 0..WRITERS as u32 {
        for i in (0..TOGGLES_PER_WRITER).step_by(2) {
            let addr = toggle_addr(w, i);
            table.add(IpAddr::V4(addr), 32, u32::from(addr) as u64).unwrap();
        }
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::new();

    for w in 0..WRITERS as u32 {
        let table = table.clone();
        let stop = stop.clone();
        handles.push(thread::spawn(move || {
            // Each writer owns a disjoint /16 under 10/8 and toggles its
            // own host routes; add and delete may hit either state.
            while !stop.load(Ordering::Relaxed) {
                for i in 0..TOGGLES_PER_WRITER {
                    let addr = toggle_addr(w, i);
                    let ip = IpAddr::V4(addr);
                    match table.add(ip, 32, u32::from(addr) as u64) {
                        Ok(()) => {}
                        Err(LpmError::AlreadyExists) => {
                            table.delete(ip, 32).unwrap();
                        }
                        Err(e) => panic!("writer failed: {e}"),
                    }
                }
            }
        }));
    }

    for r in 0..READERS {
        let table = table.clone();
        let stop = stop.clone();
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(r as u64);
            while !stop.load(Ordering::Relaxed) {
                let w = rng.random_range(0..WRITERS as u32);
                let i = rng.random_range(0..TOGGLES_PER_WRITER);
                let addr = toggle_addr(w, i);
                let m = table
                    .lpm(IpAddr::V4(addr))
                    .expect("the /8 always covers the probe");
                // Either the toggled host route was present (payload is
                // its own address) or the /8 answered.
                match m.len {
                    32 => assert_eq!(m.user_data, u32::from(addr) as u64),
                    8 => assert_eq!(m.user_data, 1),
                    other => panic!("impossible match length {other}"),
                }
            }
        }));
    }

    thread::sleep(Duration::from_secs(2));
    stop.store(true, Ordering::Relaxed);
    for h in handles {
        h.join().unwrap();
    }

    // The stable route never moved.
    let m = table.lpm(IpAddr::V4(Ipv4Addr::new(10, 255, 0, 1))).unwrap();
    assert_eq!((m.len, m.user_data), (8, 1));
}

fn toggle_addr(writer: u32, i: u32) -> Ipv4Addr {
    // 10.<writer+1>.<i/256>.<i%256>: writers never collide.
    Ipv4Addr::new(10, writer as u8 + 1, (i >> 8) as u8, i as u8)
}

// ─────────────────────────────────────────────────────────────────────────────
// Both engines under the same churn
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn hash_engine_survives_concurrent_churn() {
    churn(EngineKind::Hash);
}

#[test]
fn trie_engine_survives_concurrent_churn() {
    churn(EngineKind::Trie);
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrent readers with hit counting enabled
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn hit_counts_survive_reader_races() {
    let opts = TableOptions {
        hit_count: true,
        ..TableOptions::default()
    };
    let table = Arc::new(
        LpmTable::new(EngineKind::Hash, Family::Ipv4, 16, &opts).unwrap(),
    );
    let dst = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0));
    table.add(dst, 8, 1).unwrap();

    const PER_THREAD: u64 = 20_000;
    let mut handles = Vec::new();
    for _ in 0..4 {
        let table = table.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..PER_THREAD {
                table.lpm(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    // All increments happen under the read lock with no clearing reader
    // racing them, so none may be lost.
    let d = table.get(dst, 8, false).unwrap();
    assert_eq!(d.hit_count, 4 * PER_THREAD);
}
