//! Hash-per-prefix-length engine.
//!
//! Submodules:
//! - [`state`] — route arena, bucket blocks, chains, active-length list
//! - [`rules`] — IPv4 24-bit direct-lookup accelerator + generator worker
//! - [`flow`]  — IPv6 destination flow cache + ager worker
//!
//! A lookup walks the active prefix lengths longest-first and probes one
//! bucket chain per length. Two accelerators shortcut the walk: IPv4
//! tables can answer every length-24-or-shorter question from a
//! precomputed 2^24-entry table, and IPv6 tables can answer repeat
//! destinations from the flow cache. Either worker takes the table lock
//! only in short bursts, so control-plane mutations stay responsive while
//! the accelerators converge.

pub(crate) mod flow;
pub(crate) mod rules;
pub(crate) mod state;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::arena::prefetch;
use crate::config::{
    FLOW_DEFAULT_AGE_SECS, FLOW_DEFAULT_CAPACITY, HASH_MAX_ROUTES, RULE_MAX_PREFIX_LEN,
};
use crate::error::{LpmError, Result};
use crate::key::{Family, LpmKey};
use crate::sync::RwLock;
use crate::table::{TableInfo, TableOptions};
use crate::worker::WorkerHandle;

use flow::{FlowCache, FlowProbe};
use rules::RuleAccel;
use state::HashState;

/// Lock-protected state plus the accelerators that live outside the lock.
///
/// The accelerator blocks are written under the *reader* lock (rule
/// entries by the generator, flow slots by any lookup), which is why they
/// are atomics rather than part of `HashState`.
pub(crate) struct HashCore<K: LpmKey> {
    pub state: RwLock<HashState<K>>,
    pub rules: Option<RuleAccel>,
    pub flows: Option<FlowCache>,
    pub hit_counts: bool,
}

/// Hash-engine routing table for one address family. Reachable only
/// through [`crate::table::LpmTable`], which validates capacity and
/// option combinations before construction.
pub(crate) struct HashTable<K: LpmKey> {
    // Held for their Drop side: workers stop and join before the core
    // they reference goes away.
    _rule_worker: Option<WorkerHandle>,
    _flow_worker: Option<WorkerHandle>,
    core: Arc<HashCore<K>>,
}

impl<K: LpmKey> HashTable<K> {
    /// Builds an empty table able to hold `max_routes` routes, spawning
    /// whichever accelerator workers the options ask for. The façade has
    /// already bounds-checked `max_routes`.
    pub(crate) fn new(max_routes: u32, opts: &TableOptions) -> Self {
        assert!(
            max_routes <= HASH_MAX_ROUTES,
            "max_routes exceeds the hash engine limit"
        );
        let mut st = HashState::new(max_routes, opts.mem_prealloc, opts.hash_prealloc);
        if opts.next_get {
            st.ordered = Some(Default::default());
        }

        let rules = (opts.ipv4_rules && K::FAMILY == Family::Ipv4).then(RuleAccel::new);
        let flows = (opts.ipv6_flow && K::FAMILY == Family::Ipv6).then(|| {
            let capacity = if opts.ipv6_max_flows == 0 {
                FLOW_DEFAULT_CAPACITY
            } else {
                opts.ipv6_max_flows
            };
            FlowCache::new(capacity)
        });

        let core = Arc::new(HashCore {
            state: RwLock::new(st),
            rules,
            flows,
            hit_counts: opts.hit_count,
        });

        let rule_worker = core.rules.is_some().then(|| {
            let core = core.clone();
            WorkerHandle::spawn("lpmtab-rules", move |stop| {
                rules::generator_loop(core, stop)
            })
        });
        let flow_worker = core.flows.is_some().then(|| {
            let core = core.clone();
            let age_secs = if opts.ipv6_flow_age_time == 0 {
                FLOW_DEFAULT_AGE_SECS
            } else {
                opts.ipv6_flow_age_time
            };
            WorkerHandle::spawn("lpmtab-ager", move |stop| {
                flow::ager_loop(core, age_secs, stop)
            })
        });

        HashTable {
            _rule_worker: rule_worker,
            _flow_worker: flow_worker,
            core,
        }
    }

    // ── control plane ─────────────────────────────────────────────────────────

    /// Inserts a route. `key` must already be masked to `len`.
    pub fn add(&self, key: K, len: u8, user_data: u64) -> Result<()> {
        let mut st = self.core.state.write();
        st.insert(key, len, user_data)?;
        if let Some(rules) = self.core.rules.as_ref() {
            if len <= RULE_MAX_PREFIX_LEN {
                rules.invalidate();
            }
        }
        if let Some(flows) = self.core.flows.as_ref() {
            flows.bump_correlator();
        }
        Ok(())
    }

    /// Removes the route at exactly `(key, len)`.
    pub fn delete(&self, key: K, len: u8) -> Result<()> {
        let mut st = self.core.state.write();
        let out = st.remove(key, len)?;
        if let Some(rules) = self.core.rules.as_ref() {
            // The rule table stores route indices, so relocating a short
            // route invalidates it just as surely as deleting one.
            let relocated_short = out
                .relocated_len
                .is_some_and(|l| l <= RULE_MAX_PREFIX_LEN);
            if len <= RULE_MAX_PREFIX_LEN || relocated_short {
                rules.invalidate();
            }
        }
        if let Some(flows) = self.core.flows.as_ref() {
            flows.bump_correlator();
        }
        Ok(())
    }

    /// Overwrites the payload of an existing route. Payload changes do not
    /// move route indices, so neither accelerator needs a signal.
    pub fn set(&self, key: K, len: u8, user_data: u64) -> Result<()> {
        let mut st = self.core.state.write();
        let r = st.find(key, len).ok_or(LpmError::NotFound)?;
        st.routes.get_mut(r).user_data = user_data;
        Ok(())
    }

    /// Exact-match read. Returns `(user_data, hit_count)`.
    pub fn get(&self, key: K, len: u8, clear_hit: bool) -> Result<(u64, u64)> {
        let st = self.core.state.read();
        let r = st.find(key, len).ok_or(LpmError::NotFound)?;
        let route = st.routes.get(r);
        let hits = if clear_hit {
            route.hit.swap(0, Ordering::Relaxed)
        } else {
            route.hit.load(Ordering::Relaxed)
        };
        Ok((route.user_data, hits))
    }

    // ── data plane ────────────────────────────────────────────────────────────

    /// Longest-prefix match for `addr`. Returns `(length, user_data)`.
    pub fn lpm(&self, addr: K) -> Result<(u8, u64)> {
        let st = self.core.state.read();
        if let Some(flows) = self.core.flows.as_ref() {
            return self.lpm_flows(&st, flows, addr);
        }
        match self.search(&st, addr) {
            Some((r, len)) => Ok(self.finish(&st, r, len)),
            None => Err(LpmError::NotFound),
        }
    }

    /// Active-length walk, longest first, with the IPv4 rule shortcut.
    fn search(&self, st: &HashState<K>, addr: K) -> Option<(u32, u8)> {
        let rules = self.core.rules.as_ref();
        for &len in &st.active {
            if let Some(rules) = rules {
                if len <= RULE_MAX_PREFIX_LEN && rules.ready() {
                    // The entry already answers LPM over every length
                    // <= 24; zero means no shorter prefix can match
                    // either.
                    let idx = rules.entry(addr.rule_index());
                    if idx == 0 {
                        return None;
                    }
                    return Some((idx, st.routes.get(idx).len));
                }
            }
            if let Some(r) = st.find(addr.mask(len), len) {
                return Some((r, len));
            }
        }
        None
    }

    /// Flow-cache fast path, falling back to the active-length walk.
    fn lpm_flows(
        &self,
        st: &HashState<K>,
        flows: &FlowCache,
        addr: K,
    ) -> Result<(u8, u64)> {
        let flow_addr = addr.as_flow_addr();
        let slot = flows.slot_of(addr);
        let mut learn = false;
        // A contended slot is skipped outright; waiting would stall the
        // data plane for a cache that is only an optimization.
        if slot.try_lock() {
            match flows.probe(slot, flow_addr) {
                FlowProbe::Hit(r) => {
                    prefetch(st.routes.prefetch_ptr(r));
                    slot.unlock();
                    let len = st.routes.get(r).len;
                    return Ok(self.finish(st, r, len));
                }
                FlowProbe::Learn => learn = true,
                FlowProbe::Collision => {}
            }
            slot.unlock();
        }

        flows.not_found.fetch_add(1, Ordering::Relaxed);
        match st.lookup_uncached(addr, K::MAX_LEN) {
            Some((r, len)) => {
                if learn && slot.try_lock() {
                    flows.learn(slot, flow_addr, r);
                    slot.unlock();
                }
                Ok(self.finish(st, r, len))
            }
            None => Err(LpmError::NotFound),
        }
    }

    fn finish(&self, st: &HashState<K>, r: u32, len: u8) -> (u8, u64) {
        let route = st.routes.get(r);
        if self.core.hit_counts {
            route.hit.fetch_add(1, Ordering::Relaxed);
        }
        (len, route.user_data)
    }

    // ── ordered iteration ─────────────────────────────────────────────────────

    /// First route in `(addr, len)` order. Requires `next_get`.
    pub fn first_route(&self) -> Result<(K, u8, u64)> {
        self.next_after(None)
    }

    /// Route following `(key, len)` in `(addr, len)` order. Requires
    /// `next_get`.
    pub fn next_route(&self, key: K, len: u8) -> Result<(K, u8, u64)> {
        self.next_after(Some((key, len)))
    }

    fn next_after(&self, cur: Option<(K, u8)>) -> Result<(K, u8, u64)> {
        use std::ops::Bound;
        let st = self.core.state.read();
        let ix = st.ordered.as_ref().ok_or(LpmError::InvalidArg)?;
        let next = match cur {
            None => ix.iter().next(),
            Some(cur) => ix.range((Bound::Excluded(cur), Bound::Unbounded)).next(),
        };
        let &(k, l) = next.ok_or(LpmError::NotFound)?;
        let r = st.find(k, l).ok_or(LpmError::NotFound)?;
        Ok((k, l, st.routes.get(r).user_data))
    }

    // ── observability ─────────────────────────────────────────────────────────

    pub fn info(&self) -> TableInfo {
        let st = self.core.state.read();
        let accel_bytes = self.core.rules.as_ref().map_or(0, |r| r.bytes())
            + self.core.flows.as_ref().map_or(0, |f| f.bytes());
        TableInfo {
            num_routes: st.num_routes as u64,
            num_nodes: st.bucket_count as u64,
            phys_bytes: (st.committed_bytes() + accel_bytes) as u64,
            virt_bytes: (st.reserved_bytes() + accel_bytes) as u64,
            flow_not_found: self
                .core
                .flows
                .as_ref()
                .map_or(0, |f| f.not_found.load(Ordering::Relaxed)),
            rules_ready: self.core.rules.as_ref().is_some_and(|r| r.ready()),
        }
    }
}
