//! Longest-prefix-match routing tables.
//!
//! Two interchangeable storage engines behind one façade:
//!
//! - a **binary radix trie** with arena-allocated, pointer-free nodes, and
//! - a **hash table per prefix length** with online rehashing and two
//!   optional accelerators: a 24-bit IPv4 direct-lookup rule table rebuilt
//!   by a background worker, and an IPv6 destination flow cache aged by a
//!   background worker.
//!
//! Routes map a `(prefix, length)` key to an opaque `u64` payload. A
//! single writer and any number of readers share each table through a
//! one-word reader/writer lock; per-route hit counters and the flow-cache
//! slots use their own atomics so the data plane never blocks on
//! telemetry.
//!
//! ```
//! use lpmtab::{EngineKind, Family, LpmTable, TableOptions};
//!
//! let table = LpmTable::new(
//!     EngineKind::Hash,
//!     Family::Ipv4,
//!     1024,
//!     &TableOptions::default(),
//! )
//! .unwrap();
//! table.add("10.1.2.0".parse().unwrap(), 24, 7).unwrap();
//! let m = table.lpm("10.1.2.5".parse().unwrap()).unwrap();
//! assert_eq!((m.len, m.user_data), (24, 7));
//! ```

pub mod arena;
pub mod config;
pub mod error;
mod hash;
pub mod key;
pub mod sync;
pub mod table;
mod trie;
pub mod worker;

pub use error::{LpmError, Result};
pub use key::{Family, LpmKey, RoutePrefix};
pub use table::{
    EngineKind, LpmMatch, LpmTable, RouteData, RouteEntry, TableInfo, TableOptions,
};
