//! Binary radix-trie engine.
//!
//! An uncompressed binary trie over the prefix bits, most significant bit
//! first. Nodes and routes live in two arenas and reference each other by
//! `u32` index; index 0 is the reserved "none" element in both. A route
//! hangs off the unique node at depth equal to its prefix length; interior
//! nodes without a route exist only while a descendant route needs the
//! path.
//!
//! Deletes keep both arenas hole-free: the top element is copied into the
//! vacated slot and every inbound index (parent child pointer, children's
//! parent, the route's parent node, the root) is repatched before the top
//! is popped.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::arena::{prefetch, Arena};
use crate::config::TRIE_MAX_ROUTES;
use crate::error::{fatal, LpmError, Result};
use crate::key::LpmKey;
use crate::sync::RwLock;
use crate::table::{TableInfo, TableOptions};

/// Trie node: a route slot plus child and parent links, 16 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
struct TrieNode {
    route: u32,
    left: u32,
    right: u32,
    parent: u32,
}

/// Route payload. The prefix itself is implied by the node's position.
struct TrieRoute {
    parent_node: u32,
    hit: AtomicU64,
    user_data: u64,
}

struct TrieState<K: LpmKey> {
    nodes: Arena<TrieNode>,
    routes: Arena<TrieRoute>,
    /// Root node index, 0 while the trie is empty.
    root: u32,
    num_routes: u32,
    max_routes: u32,
    /// Secondary ordered view for `next_route`, present under `next_get`.
    ordered: Option<BTreeSet<(K, u8)>>,
}

/// Trie-engine routing table for one address family. Reachable only
/// through [`crate::table::LpmTable`], which validates capacity and
/// option combinations before construction.
pub(crate) struct TrieTable<K: LpmKey> {
    state: RwLock<TrieState<K>>,
    hit_counts: bool,
}

impl<K: LpmKey> TrieTable<K> {
    /// Builds an empty table able to hold `max_routes` routes.
    ///
    /// The node arena reserves the worst-case path count, one node per bit
    /// of every route plus the root, so path extension can never run out
    /// of nodes before the route capacity check fires. The façade has
    /// already bounds-checked `max_routes`; the assertion keeps any future
    /// in-crate caller from shrinking the node arena below that worst case
    /// through cast truncation.
    pub(crate) fn new(max_routes: u32, opts: &TableOptions) -> Self {
        assert!(
            max_routes <= TRIE_MAX_ROUTES,
            "max_routes exceeds the trie engine limit"
        );
        let max_nodes = max_routes as u64 * (K::MAX_LEN as u64 + 1) + 2;
        debug_assert!(max_nodes <= u32::MAX as u64);
        let mut nodes: Arena<TrieNode> = Arena::new(max_nodes as u32, opts.mem_prealloc);
        let mut routes: Arena<TrieRoute> = Arena::new(max_routes + 1, opts.mem_prealloc);
        // Reserve index 0 in both arenas as "none".
        nodes.alloc().expect("fresh arena");
        routes.alloc().expect("fresh arena");
        TrieTable {
            state: RwLock::new(TrieState {
                nodes,
                routes,
                root: 0,
                num_routes: 0,
                max_routes,
                ordered: opts.next_get.then(BTreeSet::new),
            }),
            hit_counts: opts.hit_count,
        }
    }

    // ── control plane ─────────────────────────────────────────────────────────

    /// Inserts a route. `key` must already be masked to `len`.
    pub fn add(&self, key: K, len: u8, user_data: u64) -> Result<()> {
        let mut st = self.state.write();

        // Deepest existing node on the path.
        let mut node = st.root;
        let mut depth = 0u8;
        while node != 0 && depth < len {
            let n = st.nodes.get(node);
            let child = if key.bit(depth) == 0 { n.left } else { n.right };
            if child == 0 {
                break;
            }
            node = child;
            depth += 1;
        }
        if node != 0 && depth == len && st.nodes.get(node).route != 0 {
            return Err(LpmError::AlreadyExists);
        }
        if st.num_routes == st.max_routes {
            return Err(LpmError::CapacityExceeded);
        }

        if st.root == 0 {
            let root = st.alloc_node(0);
            st.root = root;
            node = root;
        }
        while depth < len {
            let child = st.alloc_node(node);
            let n = st.nodes.get_mut(node);
            if key.bit(depth) == 0 {
                n.left = child;
            } else {
                n.right = child;
            }
            node = child;
            depth += 1;
        }

        let r = st.routes.alloc()?;
        *st.routes.get_mut(r) = TrieRoute {
            parent_node: node,
            hit: AtomicU64::new(0),
            user_data,
        };
        st.nodes.get_mut(node).route = r;
        st.num_routes += 1;
        if let Some(ix) = st.ordered.as_mut() {
            ix.insert((key, len));
        }
        Ok(())
    }

    /// Removes the route at exactly `(key, len)`, then prunes every node
    /// the route was keeping alive.
    pub fn delete(&self, key: K, len: u8) -> Result<()> {
        let mut st = self.state.write();
        let node = st.find_node(key, len).ok_or(LpmError::NotFound)?;
        let r = st.nodes.get(node).route;
        if r == 0 {
            return Err(LpmError::NotFound);
        }
        st.nodes.get_mut(node).route = 0;
        st.free_route(r);
        st.num_routes -= 1;
        if let Some(ix) = st.ordered.as_mut() {
            ix.remove(&(key, len));
        }
        st.prune(node);
        Ok(())
    }

    /// Overwrites the payload of an existing route.
    pub fn set(&self, key: K, len: u8, user_data: u64) -> Result<()> {
        let mut st = self.state.write();
        let node = st.find_node(key, len).ok_or(LpmError::NotFound)?;
        let r = st.nodes.get(node).route;
        if r == 0 {
            return Err(LpmError::NotFound);
        }
        st.routes.get_mut(r).user_data = user_data;
        Ok(())
    }

    /// Exact-match read. Returns `(user_data, hit_count)`; with `clear_hit`
    /// the counter is read and reset in one atomic swap.
    pub fn get(&self, key: K, len: u8, clear_hit: bool) -> Result<(u64, u64)> {
        let st = self.state.read();
        let node = st.find_node(key, len).ok_or(LpmError::NotFound)?;
        let r = st.nodes.get(node).route;
        if r == 0 {
            return Err(LpmError::NotFound);
        }
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
        let st = self.state.read();
        let mut node = st.root;
        let mut depth = 0u8;
        let mut best_route = 0u32;
        let mut best_len = 0u8;
        while node != 0 {
            let n = *st.nodes.get(node);
            // Overlap the next hop's cache miss with this iteration.
            prefetch(st.nodes.prefetch_ptr(n.left));
            prefetch(st.nodes.prefetch_ptr(n.right));
            if n.route != 0 {
                best_route = n.route;
                best_len = depth;
            }
            if depth == K::MAX_LEN {
                break;
            }
            node = if addr.bit(depth) == 0 { n.left } else { n.right };
            depth += 1;
        }
        if best_route == 0 {
            return Err(LpmError::NotFound);
        }
        let route = st.routes.get(best_route);
        if self.hit_counts {
            route.hit.fetch_add(1, Ordering::Relaxed);
        }
        Ok((best_len, route.user_data))
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
        let st = self.state.read();
        let ix = st.ordered.as_ref().ok_or(LpmError::InvalidArg)?;
        let next = match cur {
            None => ix.iter().next(),
            Some(cur) => ix.range((Bound::Excluded(cur), Bound::Unbounded)).next(),
        };
        let &(k, l) = next.ok_or(LpmError::NotFound)?;
        let node = st.find_node(k, l).ok_or(LpmError::NotFound)?;
        let r = st.nodes.get(node).route;
        Ok((k, l, st.routes.get(r).user_data))
    }

    // ── observability ─────────────────────────────────────────────────────────

    pub fn info(&self) -> TableInfo {
        let st = self.state.read();
        TableInfo {
            num_routes: st.num_routes as u64,
            num_nodes: st.nodes.len().saturating_sub(1) as u64,
            phys_bytes: (st.nodes.committed_bytes() + st.routes.committed_bytes()) as u64,
            virt_bytes: (st.nodes.reserved_bytes() + st.routes.reserved_bytes()) as u64,
            flow_not_found: 0,
            rules_ready: false,
        }
    }
}

impl<K: LpmKey> TrieState<K> {
    /// Exact node at depth `len` on the path of `key`, if present.
    fn find_node(&self, key: K, len: u8) -> Option<u32> {
        let mut node = self.root;
        if node == 0 {
            return None;
        }
        let mut depth = 0u8;
        while depth < len {
            let n = self.nodes.get(node);
            let child = if key.bit(depth) == 0 { n.left } else { n.right };
            if child == 0 {
                return None;
            }
            node = child;
            depth += 1;
        }
        Some(node)
    }

    fn alloc_node(&mut self, parent: u32) -> u32 {
        match self.nodes.alloc() {
            Ok(i) => {
                *self.nodes.get_mut(i) = TrieNode {
                    route: 0,
                    left: 0,
                    right: 0,
                    parent,
                };
                i
            }
            // The arena holds the worst-case path count for max_routes.
            Err(_) => fatal("trie node arena exhausted"),
        }
    }

    /// Frees route `r`, compacting the route arena.
    fn free_route(&mut self, r: u32) {
        let last = self.routes.last();
        if r != last {
            let (parent_node, hits, user_data) = {
                let m = self.routes.get(last);
                (m.parent_node, m.hit.load(Ordering::Relaxed), m.user_data)
            };
            let dst = self.routes.get_mut(r);
            dst.parent_node = parent_node;
            dst.hit = AtomicU64::new(hits);
            dst.user_data = user_data;
            self.nodes.get_mut(parent_node).route = r;
        }
        self.routes.free_last();
    }

    /// Walks upward from `node`, unlinking and freeing every node that no
    /// longer carries a route or a child.
    fn prune(&mut self, mut node: u32) {
        while node != 0 {
            let n = *self.nodes.get(node);
            if n.route != 0 || n.left != 0 || n.right != 0 {
                break;
            }
            let mut parent = n.parent;
            if parent != 0 {
                let p = self.nodes.get_mut(parent);
                if p.left == node {
                    p.left = 0;
                } else {
                    p.right = 0;
                }
            } else {
                self.root = 0;
            }
            let moved_from = self.free_node(node);
            // The compaction may have relocated the parent we are about to
            // visit into the slot we just vacated.
            if parent == moved_from {
                parent = node;
            }
            node = parent;
        }
    }

    /// Frees node `n`, compacting the node arena. Returns the old index of
    /// the element that now lives at `n` (or `n` itself if nothing moved).
    fn free_node(&mut self, n: u32) -> u32 {
        let last = self.nodes.last();
        if n != last {
            let m = *self.nodes.get(last);
            *self.nodes.get_mut(n) = m;
            if m.parent != 0 {
                let p = self.nodes.get_mut(m.parent);
                if p.left == last {
                    p.left = n;
                } else if p.right == last {
                    p.right = n;
                }
            } else if self.root == last {
                self.root = n;
            }
            if m.left != 0 {
                self.nodes.get_mut(m.left).parent = n;
            }
            if m.right != 0 {
                self.nodes.get_mut(m.right).parent = n;
            }
            if m.route != 0 {
                self.routes.get_mut(m.route).parent_node = n;
            }
        }
        self.nodes.free_last();
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn v4(s: &str) -> u32 {
        u32::from(s.parse::<Ipv4Addr>().unwrap())
    }

    fn table(max: u32) -> TrieTable<u32> {
        TrieTable::new(max, &TableOptions::default())
    }

    // ── insert / lookup ───────────────────────────────────────────────────────

    #[test]
    fn lpm_prefers_longest_prefix() {
        let t = table(10);
        t.add(v4("10.0.0.0").mask(8), 8, 1).unwrap();
        t.add(v4("10.1.0.0").mask(16), 16, 2).unwrap();
        t.add(v4("10.1.2.0").mask(24), 24, 3).unwrap();

        assert_eq!(t.lpm(v4("10.1.2.5")).unwrap(), (24, 3));
        assert_eq!(t.lpm(v4("10.1.3.5")).unwrap(), (16, 2));
        assert_eq!(t.lpm(v4("10.2.0.0")).unwrap(), (8, 1));
        assert_eq!(t.lpm(v4("11.0.0.0")), Err(LpmError::NotFound));
    }

    #[test]
    fn default_route_matches_everything() {
        let t = table(4);
        t.add(0, 0, 99).unwrap();
        assert_eq!(t.lpm(v4("1.2.3.4")).unwrap(), (0, 99));
        assert_eq!(t.lpm(v4("255.255.255.255")).unwrap(), (0, 99));
    }

    #[test]
    fn host_route_matches_only_itself() {
        let t = table(4);
        t.add(v4("192.0.2.1"), 32, 7).unwrap();
        assert_eq!(t.lpm(v4("192.0.2.1")).unwrap(), (32, 7));
        assert_eq!(t.lpm(v4("192.0.2.2")), Err(LpmError::NotFound));
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let t = table(4);
        t.add(v4("10.0.0.0"), 8, 1).unwrap();
        assert_eq!(t.add(v4("10.0.0.0"), 8, 2), Err(LpmError::AlreadyExists));
        // Payload untouched by the failed add.
        assert_eq!(t.get(v4("10.0.0.0"), 8, false).unwrap(), (1, 0));
    }

    #[test]
    fn capacity_is_enforced() {
        let t = table(2);
        t.add(v4("10.0.0.0"), 8, 1).unwrap();
        t.add(v4("11.0.0.0"), 8, 2).unwrap();
        assert_eq!(
            t.add(v4("12.0.0.0"), 8, 3),
            Err(LpmError::CapacityExceeded)
        );
        // Delete frees a slot; the add then succeeds.
        t.delete(v4("10.0.0.0"), 8).unwrap();
        t.add(v4("12.0.0.0"), 8, 3).unwrap();
    }

    // ── delete / compaction ───────────────────────────────────────────────────

    #[test]
    fn delete_compacts_nodes_and_keeps_lookups_correct() {
        let t = table(8);
        t.add(0, 0, 0).unwrap();
        t.add(v4("128.0.0.0"), 1, 1).unwrap();
        t.add(v4("192.0.0.0"), 2, 2).unwrap();
        let before = t.info().num_nodes;

        t.delete(v4("128.0.0.0"), 1).unwrap();

        assert_eq!(t.lpm(v4("150.0.0.0")).unwrap(), (0, 0));
        assert_eq!(t.lpm(v4("200.0.0.0")).unwrap(), (2, 2));
        // The /1 node stays (it still carries the /2 subtree); only the
        // route went away, so the node count cannot have grown.
        assert!(t.info().num_nodes <= before);
        assert_eq!(t.info().num_routes, 2);
    }

    #[test]
    fn deleting_a_leaf_prunes_its_whole_private_path() {
        let t = table(8);
        t.add(v4("10.0.0.0"), 8, 1).unwrap();
        let with_one = t.info().num_nodes;
        t.add(v4("10.1.2.0"), 24, 2).unwrap();
        t.delete(v4("10.1.2.0"), 24).unwrap();
        // All 16 nodes between /8 and /24 were private to the deleted route.
        assert_eq!(t.info().num_nodes, with_one);
        assert_eq!(t.lpm(v4("10.1.2.9")).unwrap(), (8, 1));
    }

    #[test]
    fn delete_everything_empties_the_trie() {
        let t = table(8);
        t.add(v4("10.0.0.0"), 8, 1).unwrap();
        t.add(v4("10.128.0.0"), 9, 2).unwrap();
        t.add(0, 0, 3).unwrap();
        t.delete(v4("10.0.0.0"), 8).unwrap();
        t.delete(0, 0).unwrap();
        t.delete(v4("10.128.0.0"), 9).unwrap();
        assert_eq!(t.info().num_nodes, 0);
        assert_eq!(t.info().num_routes, 0);
        assert_eq!(t.lpm(v4("10.0.0.1")), Err(LpmError::NotFound));
    }

    #[test]
    fn readd_after_delete_behaves_like_first_add() {
        let t = table(8);
        t.add(v4("10.1.0.0"), 16, 5).unwrap();
        t.delete(v4("10.1.0.0"), 16).unwrap();
        t.add(v4("10.1.0.0"), 16, 6).unwrap();
        assert_eq!(t.get(v4("10.1.0.0"), 16, false).unwrap(), (6, 0));
    }

    #[test]
    fn delete_missing_route_reports_not_found() {
        let t = table(4);
        t.add(v4("10.0.0.0"), 8, 1).unwrap();
        assert_eq!(t.delete(v4("10.0.0.0"), 9), Err(LpmError::NotFound));
        assert_eq!(t.delete(v4("11.0.0.0"), 8), Err(LpmError::NotFound));
        // An interior node without a route is not a route.
        t.add(v4("10.1.2.0"), 24, 2).unwrap();
        assert_eq!(t.delete(v4("10.1.0.0"), 16), Err(LpmError::NotFound));
    }

    // ── set / get / hit counters ──────────────────────────────────────────────

    #[test]
    fn set_overwrites_user_data_only() {
        let t = table(4);
        t.add(v4("10.0.0.0"), 8, 1).unwrap();
        t.set(v4("10.0.0.0"), 8, 42).unwrap();
        assert_eq!(t.get(v4("10.0.0.0"), 8, false).unwrap(), (42, 0));
        assert_eq!(t.set(v4("11.0.0.0"), 8, 1), Err(LpmError::NotFound));
    }

    #[test]
    fn hit_counter_counts_and_clears() {
        let opts = TableOptions {
            hit_count: true,
            ..TableOptions::default()
        };
        let t: TrieTable<u32> = TrieTable::new(4, &opts);
        t.add(v4("10.0.0.0"), 8, 1).unwrap();
        t.lpm(v4("10.9.9.9")).unwrap();
        t.lpm(v4("10.0.0.1")).unwrap();
        assert_eq!(t.get(v4("10.0.0.0"), 8, true).unwrap(), (1, 2));
        assert_eq!(t.get(v4("10.0.0.0"), 8, false).unwrap(), (1, 0));
    }

    // ── ordered iteration ─────────────────────────────────────────────────────

    #[test]
    fn next_route_walks_in_address_order() {
        let opts = TableOptions {
            next_get: true,
            ..TableOptions::default()
        };
        let t: TrieTable<u32> = TrieTable::new(8, &opts);
        t.add(v4("10.1.0.0"), 16, 2).unwrap();
        t.add(v4("10.0.0.0"), 8, 1).unwrap();
        t.add(v4("192.0.2.0"), 24, 3).unwrap();

        let (k1, l1, u1) = t.first_route().unwrap();
        assert_eq!((k1, l1, u1), (v4("10.0.0.0"), 8, 1));
        let (k2, l2, u2) = t.next_route(k1, l1).unwrap();
        assert_eq!((k2, l2, u2), (v4("10.1.0.0"), 16, 2));
        let (k3, l3, _) = t.next_route(k2, l2).unwrap();
        assert_eq!((k3, l3), (v4("192.0.2.0"), 24));
        assert_eq!(t.next_route(k3, l3), Err(LpmError::NotFound));
    }

    #[test]
    fn next_route_without_the_option_is_an_arg_error() {
        let t = table(4);
        assert_eq!(t.first_route(), Err(LpmError::InvalidArg));
    }

    // ── v6 sanity ─────────────────────────────────────────────────────────────

    #[test]
    fn v6_lpm_walks_deep_prefixes() {
        let t: TrieTable<u128> = TrieTable::new(8, &TableOptions::default());
        let net = u128::from("2001:db8::".parse::<std::net::Ipv6Addr>().unwrap());
        let sub = u128::from("2001:db8:1::".parse::<std::net::Ipv6Addr>().unwrap());
        let host = u128::from("2001:db8:1::1".parse::<std::net::Ipv6Addr>().unwrap());
        t.add(net.mask(32), 32, 7).unwrap();
        t.add(sub.mask(48), 48, 8).unwrap();
        assert_eq!(t.lpm(host).unwrap(), (48, 8));
        assert_eq!(t.lpm(net | 0xffff).unwrap(), (32, 7));
        t.add(host, 128, 9).unwrap();
        assert_eq!(t.lpm(host).unwrap(), (128, 9));
    }
}
