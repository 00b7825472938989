//! Hash-engine storage: route arena, bucket blocks, active-length list.
//!
//! The bucket array is a flat sequence of `u32` route indices (0 = empty
//! chain), carved into fixed blocks of [`HASH_BLOCK_ENTRIES`] entries so
//! growth and shrink stay within the arena's LIFO discipline: blocks are
//! only ever pushed and popped at the tail, and every resize is followed by
//! a full rehash under the new bucket count.
//!
//! Routes form doubly-linked chains through their `next`/`prev` fields.
//! Deleting an interior route copies the arena's top route into the hole
//! and repatches its chain neighbors; the moved route's bucket head is
//! re-derived from its own hash rather than taken from the stale chain.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::arena::Arena;
use crate::config::{HASH_BLOCK_ENTRIES, HASH_FACTOR};
use crate::error::{fatal, LpmError, Result};
use crate::key::LpmKey;

/// One bucket block: the unit of bucket-array growth.
#[repr(C)]
pub(crate) struct BucketBlock {
    slots: [u32; HASH_BLOCK_ENTRIES as usize],
}

/// Route record. `addr` is stored masked; chain links are arena indices.
pub(crate) struct HashRoute<K> {
    pub addr: K,
    pub len: u8,
    pub next: u32,
    pub prev: u32,
    pub hit: AtomicU64,
    pub user_data: u64,
}

/// What a remove did beyond removing: the prefix length of the route that
/// was relocated into the vacated slot, if any. The rule table stores
/// route indices, so the caller must know when a short route moved.
pub(crate) struct RemoveOutcome {
    pub relocated_len: Option<u8>,
}

pub(crate) struct HashState<K: LpmKey> {
    pub routes: Arena<HashRoute<K>>,
    blocks: Arena<BucketBlock>,
    num_blocks: u32,
    pub bucket_count: u32,
    pub num_routes: u32,
    pub max_routes: u32,
    /// Routes per prefix length; index 0..=128.
    pub len_counts: [u32; 129],
    /// Distinct active lengths, strictly descending.
    pub active: Vec<u8>,
    /// With `hash_prealloc` the block count is pinned at the maximum and
    /// resize never runs.
    prealloc_hash: bool,
    /// Secondary ordered view for `next_route`, present under `next_get`.
    pub ordered: Option<BTreeSet<(K, u8)>>,
}

/// Blocks needed to keep `HASH_FACTOR` buckets per route.
#[inline]
pub(crate) fn blocks_needed(num_routes: u32) -> u32 {
    let entries = num_routes as u64 * HASH_FACTOR as u64;
    entries.div_ceil(HASH_BLOCK_ENTRIES as u64) as u32
}

impl<K: LpmKey> HashState<K> {
    pub fn new(max_routes: u32, mem_prealloc: bool, hash_prealloc: bool) -> Self {
        let max_blocks = blocks_needed(max_routes).max(1);
        let mut routes: Arena<HashRoute<K>> = Arena::new(max_routes + 1, mem_prealloc);
        let mut blocks: Arena<BucketBlock> =
            Arena::new(max_blocks, mem_prealloc || hash_prealloc);
        routes.alloc().expect("fresh arena");

        let mut num_blocks = 0;
        if hash_prealloc {
            // Freshly mapped pages read zero, so the blocks start empty
            // without an explicit clear.
            while num_blocks < max_blocks {
                blocks.alloc().expect("fresh arena");
                num_blocks += 1;
            }
        }

        HashState {
            routes,
            blocks,
            num_blocks,
            bucket_count: num_blocks * HASH_BLOCK_ENTRIES,
            num_routes: 0,
            max_routes,
            len_counts: [0; 129],
            active: Vec::new(),
            prealloc_hash: hash_prealloc,
            ordered: None,
        }
    }

    // ── buckets ───────────────────────────────────────────────────────────────

    #[inline]
    fn bucket(&self, i: u32) -> u32 {
        self.blocks.get(i / HASH_BLOCK_ENTRIES).slots[(i % HASH_BLOCK_ENTRIES) as usize]
    }

    #[inline]
    fn set_bucket(&mut self, i: u32, v: u32) {
        self.blocks.get_mut(i / HASH_BLOCK_ENTRIES).slots[(i % HASH_BLOCK_ENTRIES) as usize] = v;
    }

    #[inline]
    fn bucket_of(&self, key: K, len: u8) -> u32 {
        key.bucket_hash(len) % self.bucket_count
    }

    /// Chain search for the exact `(key, len)` route.
    pub fn find(&self, key: K, len: u8) -> Option<u32> {
        if self.bucket_count == 0 {
            return None;
        }
        let mut r = self.bucket(self.bucket_of(key, len));
        while r != 0 {
            let route = self.routes.get(r);
            if route.len == len && route.addr == key {
                return Some(r);
            }
            r = route.next;
        }
        None
    }

    // ── active-length list ────────────────────────────────────────────────────

    fn activate_len(&mut self, len: u8) {
        let pos = self
            .active
            .iter()
            .position(|&l| l < len)
            .unwrap_or(self.active.len());
        self.active.insert(pos, len);
    }

    fn deactivate_len(&mut self, len: u8) {
        if let Some(pos) = self.active.iter().position(|&l| l == len) {
            self.active.remove(pos);
        }
    }

    // ── insert / remove ───────────────────────────────────────────────────────

    /// Inserts `(key, len)`; `key` must already be masked.
    pub fn insert(&mut self, key: K, len: u8, user_data: u64) -> Result<u32> {
        if self.find(key, len).is_some() {
            return Err(LpmError::AlreadyExists);
        }
        if self.num_routes == self.max_routes {
            return Err(LpmError::CapacityExceeded);
        }

        self.num_routes += 1;
        self.len_counts[len as usize] += 1;
        if self.len_counts[len as usize] == 1 {
            self.activate_len(len);
        }
        if !self.prealloc_hash {
            let needed = blocks_needed(self.num_routes);
            if needed > self.num_blocks {
                self.resize(needed);
            }
        }

        let r = self.routes.alloc()?;
        let b = self.bucket_of(key, len);
        let head = self.bucket(b);
        *self.routes.get_mut(r) = HashRoute {
            addr: key,
            len,
            next: head,
            prev: 0,
            hit: AtomicU64::new(0),
            user_data,
        };
        if head != 0 {
            self.routes.get_mut(head).prev = r;
        }
        self.set_bucket(b, r);

        if let Some(ix) = self.ordered.as_mut() {
            ix.insert((key, len));
        }
        Ok(r)
    }

    /// Removes `(key, len)`, compacting the route arena and shrinking the
    /// bucket array when the load allows.
    pub fn remove(&mut self, key: K, len: u8) -> Result<RemoveOutcome> {
        let r = self.find(key, len).ok_or(LpmError::NotFound)?;

        // Unlink from the chain, fixing the bucket head when r led it.
        let (next, prev) = {
            let rt = self.routes.get(r);
            (rt.next, rt.prev)
        };
        if prev != 0 {
            self.routes.get_mut(prev).next = next;
        } else {
            let b = self.bucket_of(key, len);
            self.set_bucket(b, next);
        }
        if next != 0 {
            self.routes.get_mut(next).prev = prev;
        }

        // Copy the top route into the hole and repatch its neighbors.
        let last = self.routes.last();
        let mut relocated_len = None;
        if r != last {
            let (m_addr, m_len, m_next, m_prev, m_hits, m_user) = {
                let m = self.routes.get(last);
                (
                    m.addr,
                    m.len,
                    m.next,
                    m.prev,
                    m.hit.load(Ordering::Relaxed),
                    m.user_data,
                )
            };
            {
                let dst = self.routes.get_mut(r);
                dst.addr = m_addr;
                dst.len = m_len;
                dst.next = m_next;
                dst.prev = m_prev;
                dst.hit = AtomicU64::new(m_hits);
                dst.user_data = m_user;
            }
            if m_prev != 0 {
                self.routes.get_mut(m_prev).next = r;
            } else {
                let b = self.bucket_of(m_addr, m_len);
                self.set_bucket(b, r);
            }
            if m_next != 0 {
                self.routes.get_mut(m_next).prev = r;
            }
            relocated_len = Some(m_len);
        }
        self.routes.free_last();

        self.num_routes -= 1;
        self.len_counts[len as usize] -= 1;
        if self.len_counts[len as usize] == 0 {
            self.deactivate_len(len);
        }
        if let Some(ix) = self.ordered.as_mut() {
            ix.remove(&(key, len));
        }

        if !self.prealloc_hash {
            let needed = blocks_needed(self.num_routes);
            // Two-block hysteresis keeps boundary churn from oscillating.
            if needed == 0 || needed + 2 <= self.num_blocks {
                self.resize(needed);
            }
        }
        Ok(RemoveOutcome { relocated_len })
    }

    // ── resize / rehash ───────────────────────────────────────────────────────

    /// Grows or shrinks to `new_blocks` blocks, then re-chains every live
    /// route under the new bucket count.
    fn resize(&mut self, new_blocks: u32) {
        debug_assert!(!self.prealloc_hash);
        log::debug!(
            "hash resize: {} -> {} blocks ({} routes)",
            self.num_blocks,
            new_blocks,
            self.num_routes
        );

        // Surviving blocks may hold stale chains; popped-and-repushed
        // blocks may hold stale bytes from a partially released page.
        for b in 0..self.num_blocks.min(new_blocks) {
            self.blocks.get_mut(b).slots.fill(0);
        }
        while self.num_blocks < new_blocks {
            match self.blocks.alloc() {
                Ok(b) => {
                    self.blocks.get_mut(b).slots.fill(0);
                    self.num_blocks += 1;
                }
                Err(_) => fatal("hash bucket arena exhausted"),
            }
        }
        while self.num_blocks > new_blocks {
            self.blocks.free_last();
            self.num_blocks -= 1;
        }
        self.bucket_count = self.num_blocks * HASH_BLOCK_ENTRIES;
        if self.bucket_count == 0 {
            return;
        }

        for r in 1..self.routes.len() {
            let (addr, len) = {
                let rt = self.routes.get(r);
                (rt.addr, rt.len)
            };
            let b = self.bucket_of(addr, len);
            let head = self.bucket(b);
            {
                let rt = self.routes.get_mut(r);
                rt.prev = 0;
                rt.next = head;
            }
            if head != 0 {
                self.routes.get_mut(head).prev = r;
            }
            self.set_bucket(b, r);
        }
    }

    // ── lookup ────────────────────────────────────────────────────────────────

    /// Uncached LPM over the active lengths, longest first, considering
    /// only lengths `<= max_len`. Returns `(route_index, length)`.
    pub fn lookup_uncached(&self, addr: K, max_len: u8) -> Option<(u32, u8)> {
        for &len in &self.active {
            if len > max_len {
                continue;
            }
            if let Some(r) = self.find(addr.mask(len), len) {
                return Some((r, len));
            }
        }
        None
    }

    // ── observability ─────────────────────────────────────────────────────────

    pub fn committed_bytes(&self) -> usize {
        self.routes.committed_bytes() + self.blocks.committed_bytes()
    }

    pub fn reserved_bytes(&self) -> usize {
        self.routes.reserved_bytes() + self.blocks.reserved_bytes()
    }

    #[cfg(test)]
    pub fn block_count(&self) -> u32 {
        self.num_blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(max: u32) -> HashState<u32> {
        HashState::new(max, false, false)
    }

    // ── chains and active list ────────────────────────────────────────────────

    #[test]
    fn insert_find_remove_round_trip() {
        let mut st = state(100);
        let key = 0x0a000000u32; // 10.0.0.0
        st.insert(key, 8, 7).unwrap();
        let r = st.find(key, 8).unwrap();
        assert_eq!(st.routes.get(r).user_data, 7);
        assert!(st.find(key, 9).is_none());
        st.remove(key, 8).unwrap();
        assert!(st.find(key, 8).is_none());
        assert_eq!(st.num_routes, 0);
    }

    #[test]
    fn active_list_stays_strictly_descending() {
        let mut st = state(100);
        for (addr, len) in [(0u32, 0u8), (0x0a000000, 8), (0x0a010000, 16), (0x0a010200, 24)] {
            st.insert(addr, len, 1).unwrap();
        }
        assert_eq!(st.active, vec![24, 16, 8, 0]);

        // A second route of an active length must not duplicate the entry.
        st.insert(0x0b000000, 8, 2).unwrap();
        assert_eq!(st.active, vec![24, 16, 8, 0]);

        st.remove(0x0a010000, 16).unwrap();
        assert_eq!(st.active, vec![24, 8, 0]);
        st.remove(0x0a000000, 8).unwrap();
        assert_eq!(st.active, vec![24, 8, 0]);
        st.remove(0x0b000000, 8).unwrap();
        assert_eq!(st.active, vec![24, 0]);
    }

    #[test]
    fn len_counts_track_routes() {
        let mut st = state(100);
        st.insert(0x0a000000, 8, 1).unwrap();
        st.insert(0x0b000000, 8, 2).unwrap();
        st.insert(0, 0, 3).unwrap();
        assert_eq!(st.len_counts[8], 2);
        assert_eq!(st.len_counts[0], 1);
        let total: u32 = st.len_counts.iter().sum();
        assert_eq!(total, st.num_routes);
    }

    // ── compaction ────────────────────────────────────────────────────────────

    #[test]
    fn remove_relocates_top_route_and_repairs_chains() {
        let mut st = state(100);
        // Enough routes that chains and the arena top are distinct.
        for i in 0..10u32 {
            st.insert(0x0a000000 + (i << 8), 24, i as u64).unwrap();
        }
        // Remove an interior route; the top route (index 10) moves into
        // its slot.
        let victim = 0x0a000000 + (3u32 << 8);
        let out = st.remove(victim, 24).unwrap();
        assert_eq!(out.relocated_len, Some(24));
        assert!(st.find(victim, 24).is_none());
        // Every surviving route is still reachable through its chain.
        for i in 0..10u32 {
            if i == 3 {
                continue;
            }
            let r = st.find(0x0a000000 + (i << 8), 24).unwrap();
            assert_eq!(st.routes.get(r).user_data, i as u64);
        }
        // Arena stayed hole-free: indices 1..=9 are the live routes.
        assert_eq!(st.routes.len(), 10);
    }

    #[test]
    fn remove_last_route_skips_relocation() {
        let mut st = state(100);
        st.insert(0x0a000000, 8, 1).unwrap();
        st.insert(0x0b000000, 8, 2).unwrap();
        // Route 2 is the arena top; removing it moves nothing.
        let out = st.remove(0x0b000000, 8).unwrap();
        assert!(out.relocated_len.is_none());
        assert!(st.find(0x0a000000, 8).is_some());
    }

    // ── lookup ────────────────────────────────────────────────────────────────

    #[test]
    fn lookup_prefers_longest_and_honors_cap() {
        let mut st = state(100);
        st.insert(0x0a000000, 8, 1).unwrap();
        st.insert(0x0a010000, 16, 2).unwrap();
        st.insert(0x0a010200, 24, 3).unwrap();
        st.insert(0x0a010205, 32, 4).unwrap();

        let addr = 0x0a010205u32;
        assert_eq!(st.lookup_uncached(addr, 128), Some((st.find(addr, 32).unwrap(), 32)));
        // Restricting to /24 skips the host route.
        let (r24, l24) = st.lookup_uncached(addr, 24).unwrap();
        assert_eq!(l24, 24);
        assert_eq!(st.routes.get(r24).user_data, 3);
    }

    #[test]
    fn empty_state_never_matches() {
        let st = state(10);
        assert!(st.lookup_uncached(0x0a000000, 128).is_none());
        assert!(st.find(0, 0).is_none());
    }

    // ── prealloc ──────────────────────────────────────────────────────────────

    #[test]
    fn hash_prealloc_pins_block_count() {
        let mut st: HashState<u32> = HashState::new(1000, false, true);
        let blocks = st.block_count();
        assert!(blocks >= 1);
        for i in 0..100u32 {
            st.insert(i << 8, 24, 1).unwrap();
        }
        for i in 0..100u32 {
            st.remove(i << 8, 24).unwrap();
        }
        assert_eq!(st.block_count(), blocks);
    }
}
