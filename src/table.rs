//! Table façade: engine selection, argument validation, dispatch.
//!
//! [`LpmTable`] is the only type hosts interact with. It owns one engine
//! instance (trie or hash, IPv4 or IPv6), validates every argument at the
//! boundary (family, prefix length, option combinations), masks prefixes
//! into canonical form, and forwards to the engine. It holds no routing
//! state of its own.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::config::{HASH_MAX_ROUTES, TRIE_MAX_ROUTES};
use crate::error::{LpmError, Result};
use crate::hash::HashTable;
use crate::key::{Family, LpmKey, RoutePrefix};
use crate::trie::TrieTable;

/// Storage engine of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Binary radix trie: bounded worst-case lookup, per-bit walk.
    Trie,
    /// Hash per prefix length, with optional rule-table and flow-cache
    /// accelerators.
    Hash,
}

/// Table creation options. The default is every feature off.
#[derive(Debug, Clone, Default)]
pub struct TableOptions {
    /// Per-route atomic hit counters, read (and optionally cleared) by
    /// `get`. Costs roughly a percent of LPM throughput.
    pub hit_count: bool,
    /// Maintain the ordered secondary index behind `first_route` /
    /// `next_route`.
    pub next_get: bool,
    /// Commit all physical memory at creation and never release pages on
    /// shrink.
    pub mem_prealloc: bool,
    /// Allocate the full bucket array at creation and never rehash.
    /// Hash engine only; ignored by the trie.
    pub hash_prealloc: bool,
    /// IPv4 24-bit direct-lookup rule table (hash/IPv4 tables only).
    pub ipv4_rules: bool,
    /// IPv6 destination flow cache (hash/IPv6 tables only).
    pub ipv6_flow: bool,
    /// Flow-cache capacity; 0 selects the default (2,097,152).
    pub ipv6_max_flows: u32,
    /// Flow-ager dispatch interval in seconds; 0 selects the default (30).
    pub ipv6_flow_age_time: u32,
}

/// Snapshot of table counters, from `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableInfo {
    pub num_routes: u64,
    /// Trie nodes for the trie engine, bucket count for the hash engine.
    pub num_nodes: u64,
    pub phys_bytes: u64,
    pub virt_bytes: u64,
    /// Lookups the flow cache could not serve (0 when flows are off).
    pub flow_not_found: u64,
    /// Whether the IPv4 rule table currently answers short lookups.
    pub rules_ready: bool,
}

/// Result of a successful `lpm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LpmMatch {
    pub len: u8,
    pub user_data: u64,
}

/// Result of a successful `get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteData {
    pub user_data: u64,
    pub hit_count: u64,
}

/// One route, as returned by the ordered iteration calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub prefix: RoutePrefix,
    pub user_data: u64,
}

enum Inner {
    TrieV4(TrieTable<u32>),
    TrieV6(TrieTable<u128>),
    HashV4(HashTable<u32>),
    HashV6(HashTable<u128>),
}

/// A longest-prefix-match routing table.
///
/// Concurrent use is the point: any number of threads may call the
/// data-plane (`lpm`) and control-plane (`add`/`delete`/`set`/`get`)
/// operations on a shared reference. Dropping the table stops and joins
/// its background workers.
pub struct LpmTable {
    inner: Inner,
    family: Family,
}

#[inline]
fn key4(addr: Ipv4Addr, len: u8) -> Result<u32> {
    if len > 32 {
        return Err(LpmError::InvalidArg);
    }
    Ok(u32::from(addr).mask(len))
}

#[inline]
fn key6(addr: Ipv6Addr, len: u8) -> Result<u128> {
    if len > 128 {
        return Err(LpmError::InvalidArg);
    }
    Ok(u128::from(addr).mask(len))
}

impl LpmTable {
    /// Creates a table.
    ///
    /// `max_routes` must be nonzero and within the engine limit
    /// (2,000,000 for the trie, 10,000,000 for the hash). The accelerator
    /// options are engine- and family-specific; asking for them elsewhere
    /// is an argument error.
    pub fn new(
        engine: EngineKind,
        family: Family,
        max_routes: u32,
        opts: &TableOptions,
    ) -> Result<LpmTable> {
        let limit = match engine {
            EngineKind::Trie => TRIE_MAX_ROUTES,
            EngineKind::Hash => HASH_MAX_ROUTES,
        };
        if max_routes == 0 || max_routes > limit {
            return Err(LpmError::InvalidArg);
        }
        if opts.ipv4_rules && !(engine == EngineKind::Hash && family == Family::Ipv4) {
            return Err(LpmError::InvalidArg);
        }
        if opts.ipv6_flow && !(engine == EngineKind::Hash && family == Family::Ipv6) {
            return Err(LpmError::InvalidArg);
        }

        let inner = match (engine, family) {
            (EngineKind::Trie, Family::Ipv4) => Inner::TrieV4(TrieTable::new(max_routes, opts)),
            (EngineKind::Trie, Family::Ipv6) => Inner::TrieV6(TrieTable::new(max_routes, opts)),
            (EngineKind::Hash, Family::Ipv4) => Inner::HashV4(HashTable::new(max_routes, opts)),
            (EngineKind::Hash, Family::Ipv6) => Inner::HashV6(HashTable::new(max_routes, opts)),
        };
        log::info!("table created: engine={engine:?} family={family} max_routes={max_routes}");
        Ok(LpmTable { inner, family })
    }

    /// The table's address family.
    pub fn family(&self) -> Family {
        self.family
    }

    /// Adds a route for `prefix/len` carrying `user_data`.
    pub fn add(&self, prefix: IpAddr, len: u8, user_data: u64) -> Result<()> {
        match (&self.inner, prefix) {
            (Inner::TrieV4(t), IpAddr::V4(a)) => t.add(key4(a, len)?, len, user_data),
            (Inner::TrieV6(t), IpAddr::V6(a)) => t.add(key6(a, len)?, len, user_data),
            (Inner::HashV4(t), IpAddr::V4(a)) => t.add(key4(a, len)?, len, user_data),
            (Inner::HashV6(t), IpAddr::V6(a)) => t.add(key6(a, len)?, len, user_data),
            _ => Err(LpmError::InvalidArg),
        }
    }

    /// Deletes the route at exactly `prefix/len`.
    pub fn delete(&self, prefix: IpAddr, len: u8) -> Result<()> {
        match (&self.inner, prefix) {
            (Inner::TrieV4(t), IpAddr::V4(a)) => t.delete(key4(a, len)?, len),
            (Inner::TrieV6(t), IpAddr::V6(a)) => t.delete(key6(a, len)?, len),
            (Inner::HashV4(t), IpAddr::V4(a)) => t.delete(key4(a, len)?, len),
            (Inner::HashV6(t), IpAddr::V6(a)) => t.delete(key6(a, len)?, len),
            _ => Err(LpmError::InvalidArg),
        }
    }

    /// Replaces the payload of the route at exactly `prefix/len`.
    pub fn set(&self, prefix: IpAddr, len: u8, user_data: u64) -> Result<()> {
        match (&self.inner, prefix) {
            (Inner::TrieV4(t), IpAddr::V4(a)) => t.set(key4(a, len)?, len, user_data),
            (Inner::TrieV6(t), IpAddr::V6(a)) => t.set(key6(a, len)?, len, user_data),
            (Inner::HashV4(t), IpAddr::V4(a)) => t.set(key4(a, len)?, len, user_data),
            (Inner::HashV6(t), IpAddr::V6(a)) => t.set(key6(a, len)?, len, user_data),
            _ => Err(LpmError::InvalidArg),
        }
    }

    /// Reads the route at exactly `prefix/len`. With `clear_hit` the hit
    /// counter is returned and atomically reset.
    pub fn get(&self, prefix: IpAddr, len: u8, clear_hit: bool) -> Result<RouteData> {
        let (user_data, hit_count) = match (&self.inner, prefix) {
            (Inner::TrieV4(t), IpAddr::V4(a)) => t.get(key4(a, len)?, len, clear_hit)?,
            (Inner::TrieV6(t), IpAddr::V6(a)) => t.get(key6(a, len)?, len, clear_hit)?,
            (Inner::HashV4(t), IpAddr::V4(a)) => t.get(key4(a, len)?, len, clear_hit)?,
            (Inner::HashV6(t), IpAddr::V6(a)) => t.get(key6(a, len)?, len, clear_hit)?,
            _ => return Err(LpmError::InvalidArg),
        };
        Ok(RouteData {
            user_data,
            hit_count,
        })
    }

    /// Longest-prefix match for a destination address.
    pub fn lpm(&self, addr: IpAddr) -> Result<LpmMatch> {
        let (len, user_data) = match (&self.inner, addr) {
            (Inner::TrieV4(t), IpAddr::V4(a)) => t.lpm(u32::from(a))?,
            (Inner::TrieV6(t), IpAddr::V6(a)) => t.lpm(u128::from(a))?,
            (Inner::HashV4(t), IpAddr::V4(a)) => t.lpm(u32::from(a))?,
            (Inner::HashV6(t), IpAddr::V6(a)) => t.lpm(u128::from(a))?,
            _ => return Err(LpmError::InvalidArg),
        };
        Ok(LpmMatch { len, user_data })
    }

    /// First route in `(addr, len)` order. Requires the `next_get` option.
    pub fn first_route(&self) -> Result<RouteEntry> {
        let (prefix, len, user_data) = match &self.inner {
            Inner::TrieV4(t) => wide3(t.first_route()?),
            Inner::TrieV6(t) => wide3(t.first_route()?),
            Inner::HashV4(t) => wide3(t.first_route()?),
            Inner::HashV6(t) => wide3(t.first_route()?),
        };
        entry(prefix, len, user_data)
    }

    /// Route following `prefix/len` in `(addr, len)` order. Requires the
    /// `next_get` option.
    pub fn next_route(&self, prefix: IpAddr, len: u8) -> Result<RouteEntry> {
        let (p, l, user_data) = match (&self.inner, prefix) {
            (Inner::TrieV4(t), IpAddr::V4(a)) => wide3(t.next_route(key4(a, len)?, len)?),
            (Inner::TrieV6(t), IpAddr::V6(a)) => wide3(t.next_route(key6(a, len)?, len)?),
            (Inner::HashV4(t), IpAddr::V4(a)) => wide3(t.next_route(key4(a, len)?, len)?),
            (Inner::HashV6(t), IpAddr::V6(a)) => wide3(t.next_route(key6(a, len)?, len)?),
            _ => return Err(LpmError::InvalidArg),
        };
        entry(p, l, user_data)
    }

    /// Route and memory counters.
    pub fn info(&self) -> TableInfo {
        match &self.inner {
            Inner::TrieV4(t) => t.info(),
            Inner::TrieV6(t) => t.info(),
            Inner::HashV4(t) => t.info(),
            Inner::HashV6(t) => t.info(),
        }
    }
}

impl Drop for LpmTable {
    fn drop(&mut self) {
        log::debug!("table destroyed: family={}", self.family);
    }
}

#[inline]
fn wide3<K: LpmKey>((k, l, u): (K, u8, u64)) -> (IpAddr, u8, u64) {
    (k.to_ip(), l, u)
}

#[inline]
fn entry(addr: IpAddr, len: u8, user_data: u64) -> Result<RouteEntry> {
    Ok(RouteEntry {
        prefix: RoutePrefix::new(addr, len)?,
        user_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    // ── creation validation ───────────────────────────────────────────────────

    #[test]
    fn zero_and_oversized_capacity_are_rejected() {
        let opts = TableOptions::default();
        assert!(LpmTable::new(EngineKind::Trie, Family::Ipv4, 0, &opts).is_err());
        assert!(
            LpmTable::new(EngineKind::Trie, Family::Ipv4, TRIE_MAX_ROUTES + 1, &opts).is_err()
        );
        assert!(
            LpmTable::new(EngineKind::Hash, Family::Ipv4, HASH_MAX_ROUTES + 1, &opts).is_err()
        );
        assert!(LpmTable::new(EngineKind::Hash, Family::Ipv4, 10, &opts).is_ok());
    }

    #[test]
    fn accelerators_are_engine_and_family_bound() {
        let rules = TableOptions {
            ipv4_rules: true,
            ..TableOptions::default()
        };
        assert!(LpmTable::new(EngineKind::Trie, Family::Ipv4, 10, &rules).is_err());
        assert!(LpmTable::new(EngineKind::Hash, Family::Ipv6, 10, &rules).is_err());
        assert!(LpmTable::new(EngineKind::Hash, Family::Ipv4, 10, &rules).is_ok());

        let flows = TableOptions {
            ipv6_flow: true,
            ipv6_max_flows: 16,
            ..TableOptions::default()
        };
        assert!(LpmTable::new(EngineKind::Hash, Family::Ipv4, 10, &flows).is_err());
        assert!(LpmTable::new(EngineKind::Trie, Family::Ipv6, 10, &flows).is_err());
        assert!(LpmTable::new(EngineKind::Hash, Family::Ipv6, 10, &flows).is_ok());
    }

    // ── boundary validation ───────────────────────────────────────────────────

    #[test]
    fn family_mismatches_are_arg_errors() {
        let t = LpmTable::new(
            EngineKind::Hash,
            Family::Ipv4,
            10,
            &TableOptions::default(),
        )
        .unwrap();
        assert_eq!(t.add(ip("2001:db8::"), 32, 1), Err(LpmError::InvalidArg));
        assert_eq!(t.lpm(ip("2001:db8::1")), Err(LpmError::InvalidArg));
        assert_eq!(t.delete(ip("::"), 0), Err(LpmError::InvalidArg));
    }

    #[test]
    fn overlong_prefix_lengths_are_arg_errors() {
        let t4 = LpmTable::new(
            EngineKind::Trie,
            Family::Ipv4,
            10,
            &TableOptions::default(),
        )
        .unwrap();
        assert_eq!(t4.add(ip("10.0.0.0"), 33, 1), Err(LpmError::InvalidArg));

        let t6 = LpmTable::new(
            EngineKind::Trie,
            Family::Ipv6,
            10,
            &TableOptions::default(),
        )
        .unwrap();
        assert_eq!(t6.add(ip("2001:db8::"), 129, 1), Err(LpmError::InvalidArg));
        assert!(t6.add(ip("2001:db8::"), 128, 1).is_ok());
    }

    #[test]
    fn facade_masks_prefixes_before_storing() {
        let t = LpmTable::new(
            EngineKind::Hash,
            Family::Ipv4,
            10,
            &TableOptions::default(),
        )
        .unwrap();
        // Host bits set on the way in; the canonical key is what's stored.
        t.add(ip("10.1.2.250"), 24, 3).unwrap();
        assert_eq!(
            t.get(ip("10.1.2.0"), 24, false).unwrap(),
            RouteData {
                user_data: 3,
                hit_count: 0
            }
        );
        assert_eq!(t.add(ip("10.1.2.9"), 24, 4), Err(LpmError::AlreadyExists));
    }

    #[test]
    fn ordered_iteration_crosses_the_facade() {
        let opts = TableOptions {
            next_get: true,
            ..TableOptions::default()
        };
        let t = LpmTable::new(EngineKind::Hash, Family::Ipv4, 10, &opts).unwrap();
        t.add(ip("192.0.2.0"), 24, 3).unwrap();
        t.add(ip("10.0.0.0"), 8, 1).unwrap();

        let first = t.first_route().unwrap();
        assert_eq!(first.prefix.to_string(), "10.0.0.0/8");
        let second = t.next_route(first.prefix.addr, first.prefix.len).unwrap();
        assert_eq!(second.prefix.to_string(), "192.0.2.0/24");
        assert_eq!(
            t.next_route(second.prefix.addr, second.prefix.len),
            Err(LpmError::NotFound)
        );
    }
}
