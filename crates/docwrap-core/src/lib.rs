//! docwrap-core — shared types for the docwrap data-access layer.
//!
//! - **config**: `docwrap.toml` parsing into tunables, retry policy, and databases
//! - **registry**: logical-name → [`DatabaseConfig`] map, replaceable in bulk
//! - **options**: per-call option structs with their documented defaults
//! - **driver**: the [`StoreDriver`] / [`StoreConnection`] seam to the document store
//! - **error**: [`DriverError`] from stores, [`DocwrapError`] to callers

pub mod config;
pub mod driver;
pub mod error;
pub mod options;
pub mod registry;

pub use config::{DocwrapConfig, RetryPolicy, Tunables};
pub use driver::{FindQuery, StoreConnection, StoreDriver, UpdateOutcome, WriteFlags};
pub use error::{DocwrapError, DocwrapResult, DriverError};
pub use options::*;
pub use registry::{Credentials, DatabaseConfig, DatabaseRegistry};
