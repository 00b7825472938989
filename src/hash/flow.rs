//! IPv6 destination flow cache and its ager worker.
//!
//! A fixed-size open-addressed cache from full 128-bit destinations to
//! route indices. Each slot carries its own try-lock; a lookup that loses
//! the race for a slot simply skips the cache, so the data-plane fast path
//! never blocks on another reader. Every slot field is written only while
//! the slot lock is held.
//!
//! Invalidation is O(1): the table-wide correlator advances on every route
//! mutation, and a cached flow whose stored correlator no longer matches
//! is treated as absent. The ager gives each flow a TTL between one and
//! two dispatch intervals: a sweep clears the seen flag of live flows and
//! evicts flows whose flag was already clear.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{FLOW_HASH_SALT, WORKER_TICK_SECS};
use crate::key::LpmKey;
use crate::worker::StopSignal;

use super::HashCore;

/// One cache slot, 16-byte aligned.
#[repr(align(16))]
pub(crate) struct FlowSlot {
    lock: AtomicBool,
    seen: AtomicU8,
    route: AtomicU32,
    correlator: AtomicU32,
    addr_hi: AtomicU64,
    addr_lo: AtomicU64,
}

impl FlowSlot {
    fn new() -> Self {
        FlowSlot {
            lock: AtomicBool::new(false),
            seen: AtomicU8::new(0),
            route: AtomicU32::new(0),
            correlator: AtomicU32::new(0),
            addr_hi: AtomicU64::new(0),
            addr_lo: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn try_lock(&self) -> bool {
        !self.lock.swap(true, Ordering::Acquire)
    }

    #[inline]
    pub fn unlock(&self) {
        self.lock.store(false, Ordering::Release);
    }

    #[inline]
    fn addr(&self) -> u128 {
        (self.addr_hi.load(Ordering::Relaxed) as u128) << 64
            | self.addr_lo.load(Ordering::Relaxed) as u128
    }
}

/// What a locked slot probe concluded.
pub(crate) enum FlowProbe {
    /// Valid entry for this destination: the cached route index.
    Hit(u32),
    /// The slot is free or stale; learn the result of the slow path.
    Learn,
    /// Another destination owns the slot; leave it alone.
    Collision,
}

/// Flow cache: slots plus the table-wide correlator and miss counter.
pub(crate) struct FlowCache {
    slots: Box<[FlowSlot]>,
    /// Bumped on every route mutation; stored per flow at learn time.
    correlator: AtomicU32,
    /// Lookups the cache could not serve.
    pub not_found: AtomicU64,
}

impl FlowCache {
    pub fn new(capacity: u32) -> Self {
        let mut v = Vec::with_capacity(capacity as usize);
        v.resize_with(capacity as usize, FlowSlot::new);
        FlowCache {
            slots: v.into_boxed_slice(),
            correlator: AtomicU32::new(0),
            not_found: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Slot for a destination address.
    #[inline]
    pub fn slot_of<K: LpmKey>(&self, addr: K) -> &FlowSlot {
        let i = addr.bucket_hash(FLOW_HASH_SALT) % self.capacity();
        &self.slots[i as usize]
    }

    #[inline]
    pub fn slot(&self, i: u32) -> &FlowSlot {
        &self.slots[i as usize]
    }

    /// Called under the writer lock on every route mutation. Makes every
    /// cached flow stale in one increment.
    pub fn bump_correlator(&self) {
        self.correlator.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn correlator(&self) -> u32 {
        self.correlator.load(Ordering::Relaxed)
    }

    /// Examines a slot the caller has locked. On a stale correlator the
    /// entry is evicted here so a later collision cannot resurrect it.
    pub fn probe(&self, slot: &FlowSlot, addr: u128) -> FlowProbe {
        let route = slot.route.load(Ordering::Relaxed);
        if route == 0 {
            return FlowProbe::Learn;
        }
        if slot.addr() != addr {
            return FlowProbe::Collision;
        }
        if slot.correlator.load(Ordering::Relaxed) != self.correlator() {
            slot.route.store(0, Ordering::Relaxed);
            return FlowProbe::Learn;
        }
        slot.seen.store(1, Ordering::Relaxed);
        FlowProbe::Hit(route)
    }

    /// Fills a slot the caller has locked with a fresh flow.
    pub fn learn(&self, slot: &FlowSlot, addr: u128, route: u32) {
        slot.addr_hi.store((addr >> 64) as u64, Ordering::Relaxed);
        slot.addr_lo.store(addr as u64, Ordering::Relaxed);
        slot.correlator
            .store(self.correlator(), Ordering::Relaxed);
        slot.route.store(route, Ordering::Relaxed);
        slot.seen.store(1, Ordering::Relaxed);
    }

    pub fn bytes(&self) -> usize {
        self.slots.len() * std::mem::size_of::<FlowSlot>()
    }
}

/// Ager worker body. Runs until cancelled.
pub(crate) fn ager_loop<K: LpmKey>(core: Arc<HashCore<K>>, age_secs: u32, stop: StopSignal) {
    let Some(flows) = core.flows.as_ref() else {
        return;
    };
    let tick = Duration::from_secs(WORKER_TICK_SECS);

    loop {
        for _ in 0..age_secs.max(1) {
            if !stop.sleep(tick) {
                return;
            }
        }
        for i in 0..flows.capacity() {
            let _st = core.state.read();
            let slot = flows.slot(i);
            if slot.try_lock() {
                if slot.seen.load(Ordering::Relaxed) != 0 {
                    slot.seen.store(0, Ordering::Relaxed);
                } else if slot.route.load(Ordering::Relaxed) != 0 {
                    slot.route.store(0, Ordering::Relaxed);
                }
                slot.unlock();
            }
            drop(_st);
            if i & 0xfff == 0 && stop.cancelled() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_learns_into_an_empty_slot() {
        let cache = FlowCache::new(64);
        let slot = cache.slot(0);
        assert!(slot.try_lock());
        assert!(matches!(cache.probe(slot, 0xabcd), FlowProbe::Learn));
        cache.learn(slot, 0xabcd, 17);
        slot.unlock();

        assert!(slot.try_lock());
        assert!(matches!(cache.probe(slot, 0xabcd), FlowProbe::Hit(17)));
        slot.unlock();
    }

    #[test]
    fn probe_reports_collisions_without_learning() {
        let cache = FlowCache::new(64);
        let slot = cache.slot(0);
        assert!(slot.try_lock());
        cache.learn(slot, 1, 5);
        assert!(matches!(cache.probe(slot, 2), FlowProbe::Collision));
        // The resident flow survives a collision.
        assert!(matches!(cache.probe(slot, 1), FlowProbe::Hit(5)));
        slot.unlock();
    }

    #[test]
    fn correlator_bump_invalidates_every_flow() {
        let cache = FlowCache::new(64);
        let slot = cache.slot(3);
        assert!(slot.try_lock());
        cache.learn(slot, 9, 5);
        cache.bump_correlator();
        assert!(matches!(cache.probe(slot, 9), FlowProbe::Learn));
        // The stale entry was evicted on detection.
        assert_eq!(slot.route.load(Ordering::Relaxed), 0);
        slot.unlock();
    }

    #[test]
    fn slot_lock_is_exclusive() {
        let cache = FlowCache::new(4);
        let slot = cache.slot(0);
        assert!(slot.try_lock());
        assert!(!slot.try_lock());
        slot.unlock();
        assert!(slot.try_lock());
        slot.unlock();
    }

    #[test]
    fn seen_flag_drives_two_phase_aging() {
        let cache = FlowCache::new(4);
        let slot = cache.slot(0);
        assert!(slot.try_lock());
        cache.learn(slot, 7, 3);
        slot.unlock();

        // First sweep: flow was seen, flag clears, route survives.
        assert!(slot.try_lock());
        assert_eq!(slot.seen.load(Ordering::Relaxed), 1);
        slot.seen.store(0, Ordering::Relaxed);
        slot.unlock();
        assert_eq!(slot.route.load(Ordering::Relaxed), 3);

        // Second sweep with no traffic in between: evict.
        assert!(slot.try_lock());
        assert_eq!(slot.seen.load(Ordering::Relaxed), 0);
        slot.route.store(0, Ordering::Relaxed);
        slot.unlock();
        assert_eq!(slot.route.load(Ordering::Relaxed), 0);
    }
}
