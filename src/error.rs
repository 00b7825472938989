//! Result codes for all public table operations.
//!
//! Every fallible operation returns one of the four discrete error kinds
//! below. Conditions with no recovery path (the OS refusing to back an
//! arena reservation it already granted) are not errors; they abort the
//! process via [`fatal`].

use thiserror::Error;

/// Errors returned by routing-table operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LpmError {
    /// An argument is out of range for the table: wrong address family,
    /// prefix length beyond the family maximum, zero or over-limit
    /// capacity, or an option combination the table cannot honor.
    #[error("invalid argument")]
    InvalidArg,

    /// No route matches the request. Returned by exact-match lookups on
    /// absent keys and by LPM when no prefix covers the address.
    #[error("no matching route")]
    NotFound,

    /// An add named a (prefix, length) key that is already present.
    #[error("route already exists")]
    AlreadyExists,

    /// An add would grow the table past its `max_routes`.
    #[error("route capacity exceeded")]
    CapacityExceeded,
}

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, LpmError>;

/// Logs and aborts. Used when virtual memory the table depends on cannot
/// be obtained; the table has no consistent state to fall back to.
pub(crate) fn fatal(what: &str) -> ! {
    log::error!("fatal: {what}");
    std::process::abort();
}
