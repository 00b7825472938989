// config.rs — Implementation constants.
//
// Every tunable that affects table geometry or worker pacing lives here so
// the relationships between them stay visible in one place.

/// Upper bound on `max_routes` for trie tables.
pub const TRIE_MAX_ROUTES: u32 = 2_000_000;

/// Upper bound on `max_routes` for hash tables.
pub const HASH_MAX_ROUTES: u32 = 10_000_000;

/// Bucket-array load factor: the table keeps `HASH_FACTOR` buckets per route.
pub const HASH_FACTOR: u32 = 5;

/// Entries per bucket block (20,000 x `HASH_FACTOR`). Blocks are the unit of
/// bucket-array growth and shrink.
pub const HASH_BLOCK_ENTRIES: u32 = 100_000;

/// Entries in the IPv4 direct-lookup rule table: one per /24 prefix.
pub const RULE_TABLE_ENTRIES: usize = 1 << 24;

/// Longest prefix length the rule table can answer for.
pub const RULE_MAX_PREFIX_LEN: u8 = 24;

/// Default IPv6 flow-cache capacity when `ipv6_max_flows` is left at 0.
pub const FLOW_DEFAULT_CAPACITY: u32 = 2_097_152;

/// Default flow-ager dispatch interval in seconds when `ipv6_flow_age_time`
/// is left at 0.
pub const FLOW_DEFAULT_AGE_SECS: u32 = 30;

/// Sleep tick shared by both background workers. Cancellation is observed
/// at this granularity while a worker is idle.
pub const WORKER_TICK_SECS: u64 = 1;

// ── FNV-1a ───────────────────────────────────────────────────────────────────
// The bucket hash is FNV-1a over the big-endian bytes of the masked prefix,
// finished by XORing in the prefix length.

/// FNV-1a 32-bit offset basis.
pub const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;

/// FNV-1a 32-bit prime.
pub const FNV_PRIME: u32 = 0x0100_0193;

/// Pseudo-length mixed into the flow-cache hash in place of a prefix length.
pub const FLOW_HASH_SALT: u8 = 0x55;
