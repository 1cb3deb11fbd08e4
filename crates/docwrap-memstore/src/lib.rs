//! docwrap-memstore — an in-memory document store behind the docwrap driver traits.
//!
//! [`MemoryStore`] implements [`docwrap_core::StoreDriver`] without a
//! server. It evaluates a practical subset of the filter language (see
//! [`matcher`]), enforces `_id` uniqueness, and can require credentials
//! per database. Tests use its call counters to prove cache hits and its
//! fault injection to walk the pool's failure paths.

pub mod matcher;
pub mod store;

pub use store::{MemoryConnection, MemoryStore};
