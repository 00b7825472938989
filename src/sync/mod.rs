//! Lock primitives for the routing tables.
//!
//! Submodules:
//! - [`futex`]  — kernel wait/wake on a single `AtomicU32`
//! - [`rwlock`] — one-word reader/writer lock built on it

pub mod futex;
pub mod rwlock;

pub use rwlock::RwLock;
