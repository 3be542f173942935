//! Per-client admission guards consulted before any verification work.
//!
//! Both guards are keyed by a client identifier (typically the source IP) and keep their state
//! in memory only; a restart forgets every window and failure record.

pub mod abuse;
pub mod rate_limit;

pub use abuse::*;
pub use rate_limit::*;
