//! Store driver seam.
//!
//! The document store itself is an external collaborator. A driver knows
//! how to open a connection to one [`DatabaseConfig`]; a connection knows
//! how to authenticate, reopen, and run per-collection operations. The
//! pool and the facade only ever talk to these traits, so tests plug in an
//! in-memory implementation and production plugs in a real client.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DriverError;
use crate::options::{Document, SortKey};
use crate::registry::{Credentials, DatabaseConfig};

/// A resolved find request.
#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    pub filter: Value,
    /// 0 means no limit.
    pub limit: u64,
    pub skip: u64,
    pub sort: Vec<SortKey>,
}

impl FindQuery {
    pub fn matching(filter: Value) -> Self {
        Self {
            filter,
            limit: 0,
            skip: 0,
            sort: Vec::new(),
        }
    }

    pub fn first(filter: Value) -> Self {
        Self {
            limit: 1,
            ..Self::matching(filter)
        }
    }
}

/// Write behaviour for `update`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteFlags {
    /// Wait for the store to acknowledge the write.
    pub safe: bool,
    /// Insert the document when the filter matches nothing.
    pub upsert: bool,
}

/// What an `update` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub upserted: bool,
}

/// One live connection to a store database.
#[async_trait]
pub trait StoreConnection: Send + fmt::Debug {
    /// Whether the transport is still usable.
    fn is_connected(&self) -> bool;

    /// Exchange credentials. Called right after a connect or reopen.
    async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), DriverError>;

    /// Re-establish a dropped transport in place.
    async fn reopen(&mut self) -> Result<(), DriverError>;

    /// Close the transport. Idempotent.
    async fn close(&mut self);

    async fn find(
        &mut self,
        collection: &str,
        query: &FindQuery,
    ) -> Result<Vec<Document>, DriverError>;

    async fn count(&mut self, collection: &str, filter: &Value) -> Result<u64, DriverError>;

    /// Insert one document, returning it as stored (with `_id`).
    async fn insert(
        &mut self,
        collection: &str,
        document: &Document,
        safe: bool,
    ) -> Result<Document, DriverError>;

    /// Replace the first document matching `filter`.
    async fn update(
        &mut self,
        collection: &str,
        filter: &Value,
        document: &Document,
        flags: WriteFlags,
    ) -> Result<UpdateOutcome, DriverError>;

    /// Remove every document matching `filter`, returning how many went.
    async fn remove(&mut self, collection: &str, filter: &Value) -> Result<u64, DriverError>;

    async fn collection_names(&mut self) -> Result<Vec<String>, DriverError>;
}

/// Factory for new connections. The pool never names a concrete client.
#[async_trait]
pub trait StoreDriver: Send + Sync {
    async fn connect(
        &self,
        config: &DatabaseConfig,
    ) -> Result<Box<dyn StoreConnection>, DriverError>;
}
