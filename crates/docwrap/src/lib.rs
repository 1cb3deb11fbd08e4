//! docwrap — a convenience layer over a document store.
//!
//! Named logical databases, a bounded connection pool with lazy reconnect,
//! and a process-local expiring cache for reads, behind one facade:
//!
//! ```text
//! Docwrap
//!   ├── DatabaseRegistry   logical name → DatabaseConfig
//!   ├── ConnectionPool     per-database idle stacks (docwrap-pool)
//!   ├── ExpiringCache      key → cached read, swept once per tick (docwrap-cache)
//!   └── StoreDriver        the document store itself (injected)
//! ```

pub mod facade;
pub mod handle;

pub use docwrap_cache::{CacheStats, KeyCodec};
pub use docwrap_core::*;
pub use docwrap_pool::PoolStats;
pub use facade::{CachedResult, Docwrap};
pub use handle::{CollectionHandle, DatabaseHandle};
