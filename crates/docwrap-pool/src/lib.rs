//! docwrap-pool — connection reuse for docwrap.
//!
//! One LIFO idle stack per logical database, capped at a shared limit.
//! Idle connections that dropped while pooled are reopened on checkout;
//! fresh connections are retried with exponential backoff.

pub mod backoff;
pub mod pool;

pub use backoff::Backoff;
pub use pool::{ConnectionPool, ConnectionState, PoolEntry, PoolStats};
