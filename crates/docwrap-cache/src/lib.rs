//! docwrap-cache — expiring read cache for docwrap.
//!
//! - **key**: [`KeyCodec`] turns (database, collection, operation, query shape) into a key
//! - **cache**: [`ExpiringCache`] stores results with a countdown in ticks
//! - **sweeper**: [`CacheSweeper`] owns the background task that advances ticks

pub mod cache;
pub mod key;
pub mod sweeper;

pub use cache::{CacheStats, ExpiringCache};
pub use key::KeyCodec;
pub use sweeper::CacheSweeper;
