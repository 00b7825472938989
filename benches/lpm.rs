//! Criterion benches: LPM throughput and control-plane cycle cost for
//! both engines over an identical 10,000-route table.

use std::hint::black_box;
use std::net::{IpAddr, Ipv4Addr};

use criterion::{criterion_group, criterion_main, Criterion};

use lpmtab::{EngineKind, Family, LpmTable, TableOptions};

const ROUTES: u32 = 10_000;

fn populated(engine: EngineKind) -> LpmTable {
    let t = LpmTable::new(engine, Family::Ipv4, ROUTES * 2, &TableOptions::default()).unwrap();
    t.add(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0)), 8, 1).unwrap();
    for i in 0..ROUTES {
        // Spread /24s across 10.0.0.0/8.
        let addr = Ipv4Addr::from(0x0a00_0000u32 | (i << 8));
        t.add(IpAddr::V4(addr), 24, i as u64).unwrap();
    }
    t
}

fn bench_lpm(c: &mut Criterion) {
    let mut group = c.benchmark_group("lpm");
    for (name, engine) in [("trie", EngineKind::Trie), ("hash", EngineKind::Hash)] {
        let t = populated(engine);
        let hit = IpAddr::V4(Ipv4Addr::new(10, 0, 17, 9));
        let covered = IpAddr::V4(Ipv4Addr::new(10, 200, 0, 1));
        let miss = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));

        group.bench_function(format!("{name}/hit24"), |b| {
            b.iter(|| black_box(t.lpm(black_box(hit))))
        });
        group.bench_function(format!("{name}/hit8"), |b| {
            b.iter(|| black_box(t.lpm(black_box(covered))))
        });
        group.bench_function(format!("{name}/miss"), |b| {
            b.iter(|| black_box(t.lpm(black_box(miss))))
        });
    }
    group.finish();
}

fn bench_add_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_delete");
    for (name, engine) in [("trie", EngineKind::Trie), ("hash", EngineKind::Hash)] {
        let t = populated(engine);
        let p = IpAddr::V4(Ipv4Addr::new(172, 16, 33, 0));
        group.bench_function(name, |b| {
            b.iter(|| {
                t.add(black_box(p), 24, 7).unwrap();
                t.delete(black_box(p), 24).unwrap();
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_lpm, bench_add_delete);
criterion_main!(benches);
