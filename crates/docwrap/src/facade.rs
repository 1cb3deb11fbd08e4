//! The docwrap data-access facade.
//!
//! Every operation follows the same shape:
//!
//! ```text
//! [cache-enabled read] → cache hit → return
//! acquire connection for the database
//!   → store call(s)
//!   → error: discard the connection, return DocwrapError::Store
//!   → ok: release the connection, populate the cache (reads), return
//! ```
//!
//! Writes never touch the cache; a cached read can outlive the data it
//! describes until its TTL runs out.

use std::sync::{Arc, Mutex, PoisonError};

use docwrap_cache::{CacheStats, CacheSweeper, ExpiringCache, KeyCodec};
use docwrap_core::{
    CountOptions, DatabaseConfig, DatabaseRegistry, Document, DocwrapConfig, DocwrapError,
    DocwrapResult, DriverError, FetchOptions, FindQuery, GetOrInsertOptions, InsertOptions,
    MoveOptions, RemoveOptions, RetryPolicy, StoreDriver, Tunables, UpdateOptions, WriteFlags,
};
use docwrap_pool::{ConnectionPool, PoolEntry, PoolStats};
use tracing::{debug, info, warn};

use crate::handle::{CollectionHandle, DatabaseHandle};

/// A result payload held by the expiring cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedResult {
    Documents(Vec<Document>),
    DocumentsAndCount(Vec<Document>, u64),
    Count(u64),
}

/// Collections whose names start with this are store internals.
const SYSTEM_PREFIX: &str = "system.";

/// Entry point: owns the registry, the connection pool, the cache, and the
/// cache's sweep task.
pub struct Docwrap {
    registry: Arc<DatabaseRegistry>,
    pool: ConnectionPool,
    cache: Arc<ExpiringCache<CachedResult>>,
    sweeper: Mutex<CacheSweeper>,
    tunables: Tunables,
}

impl Docwrap {
    /// Build a facade from a parsed configuration.
    ///
    /// Must be called from within a tokio runtime: the cache sweep task is
    /// spawned here and runs until [`shutdown`](Self::shutdown) or drop.
    pub fn new(config: &DocwrapConfig, driver: Arc<dyn StoreDriver>) -> DocwrapResult<Self> {
        let tunables = config.tunables()?;
        let retry = config.retry_policy()?;
        let databases = config.database_configs()?;
        Self::from_parts(databases, tunables, retry, driver)
    }

    /// Build a facade from already-resolved parts.
    ///
    /// Fails with [`DocwrapError::Config`] on a zero sweep interval.
    pub fn from_parts(
        databases: Vec<DatabaseConfig>,
        tunables: Tunables,
        retry: RetryPolicy,
        driver: Arc<dyn StoreDriver>,
    ) -> DocwrapResult<Self> {
        if tunables.sweep_interval.is_zero() {
            return Err(DocwrapError::Config(
                "sweep_interval must be greater than zero".to_string(),
            ));
        }
        let registry = Arc::new(DatabaseRegistry::new(databases));
        let pool = ConnectionPool::new(
            Arc::clone(&registry),
            driver,
            retry,
            tunables.pooling,
            tunables.pool_limit,
        );
        let cache = Arc::new(ExpiringCache::new(tunables.caching, tunables.default_cache_ttl));
        let sweeper = CacheSweeper::start(Arc::clone(&cache), tunables.sweep_interval);

        info!(
            databases = registry.names().len(),
            pooling = tunables.pooling,
            caching = tunables.caching,
            pool_limit = tunables.pool_limit,
            default_cache_ttl = tunables.default_cache_ttl,
            "docwrap initialized"
        );

        Ok(Self {
            registry,
            pool,
            cache,
            sweeper: Mutex::new(sweeper),
            tunables,
        })
    }

    // ── Navigation ──────────────────────────────────────────────────

    /// Logical database names, sorted.
    pub fn database_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// A handle bound to one registered database.
    pub fn database(&self, database: &str) -> DocwrapResult<DatabaseHandle<'_>> {
        if !self.registry.contains(database) {
            return Err(DocwrapError::UnknownDatabase(database.to_string()));
        }
        Ok(DatabaseHandle::new(self, database))
    }

    /// A handle bound to one collection of a registered database.
    pub fn collection(
        &self,
        database: &str,
        collection: &str,
    ) -> DocwrapResult<CollectionHandle<'_>> {
        Ok(self.database(database)?.collection(collection))
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Insert one document and return it as stored.
    pub async fn insert(
        &self,
        database: &str,
        collection: &str,
        options: InsertOptions,
    ) -> DocwrapResult<Document> {
        debug!(database = %database, collection = %collection, operation = "insert", "store call");
        let mut entry = self.pool.acquire(database).await?;
        let result = entry
            .connection()
            .insert(collection, &options.document, options.safe)
            .await;
        self.settle(entry, result, database, collection, "insert").await
    }

    /// Replace the first document matching the filter. Upserts unless
    /// `upsert` is explicitly false. Returns whether a document was
    /// matched or created.
    pub async fn update(
        &self,
        database: &str,
        collection: &str,
        options: UpdateOptions,
    ) -> DocwrapResult<bool> {
        debug!(database = %database, collection = %collection, operation = "update", "store call");
        let flags = WriteFlags {
            safe: options.safe,
            upsert: options.effective_upsert(),
        };
        let mut entry = self.pool.acquire(database).await?;
        let result = entry
            .connection()
            .update(collection, &options.filter(), &options.document, flags)
            .await;
        let outcome = self.settle(entry, result, database, collection, "update").await?;
        Ok(outcome.matched > 0 || outcome.upserted)
    }

    /// Return the first document matching `filter`, inserting `document`
    /// when nothing matches.
    ///
    /// Two concurrent callers with the same filter may both insert; only a
    /// unique index in the store prevents that.
    pub async fn get_or_insert(
        &self,
        database: &str,
        collection: &str,
        options: GetOrInsertOptions,
    ) -> DocwrapResult<Document> {
        debug!(
            database = %database,
            collection = %collection,
            operation = "get_or_insert",
            "store call"
        );
        let mut entry = self.pool.acquire(database).await?;
        let result = async {
            let connection = entry.connection();
            let existing = connection
                .find(collection, &FindQuery::first(options.filter.clone()))
                .await?;
            match existing.into_iter().next() {
                Some(document) => Ok(document),
                None => {
                    connection
                        .insert(collection, &options.document, options.safe)
                        .await
                }
            }
        }
        .await;
        self.settle(entry, result, database, collection, "get_or_insert")
            .await
    }

    /// Move `document` from `source` to `destination` in one database.
    ///
    /// The destination write happens first. Without `overwrite` it is an
    /// insert, refused when the destination already holds a document with
    /// the same identity; with `overwrite` it is an upsert over that
    /// document. Only once the
    /// destination acknowledges is the document removed from the source.
    /// A failed removal leaves the document in both collections and is
    /// reported as [`DocwrapError::PartialFailure`].
    ///
    /// Returns whether a source document was removed.
    pub async fn move_document(
        &self,
        database: &str,
        source: &str,
        destination: &str,
        options: MoveOptions,
    ) -> DocwrapResult<bool> {
        debug!(
            database = %database,
            source = %source,
            destination = %destination,
            overwrite = options.effective_overwrite(),
            operation = "move",
            "store call"
        );
        let filter = options.identity_filter();

        let mut source_entry = self.pool.acquire(database).await?;
        let mut destination_entry = match self.pool.acquire(database).await {
            Ok(entry) => entry,
            Err(e) => {
                self.pool.release(source_entry).await;
                return Err(e);
            }
        };

        let written = if options.effective_overwrite() {
            let flags = WriteFlags {
                safe: options.safe,
                upsert: true,
            };
            destination_entry
                .connection()
                .update(destination, &filter, &options.document, flags)
                .await
                .map(|_| ())
        } else {
            let connection = destination_entry.connection();
            async {
                let existing = connection
                    .find(destination, &FindQuery::first(filter.clone()))
                    .await?;
                if !existing.is_empty() {
                    return Err(DriverError::DuplicateKey(format!(
                        "{destination} already holds the document"
                    )));
                }
                connection
                    .insert(destination, &options.document, options.safe)
                    .await
                    .map(|_| ())
            }
            .await
        };
        if let Err(e) = self
            .settle(destination_entry, written, database, destination, "move")
            .await
        {
            self.pool.release(source_entry).await;
            return Err(e);
        }

        match source_entry.connection().remove(source, &filter).await {
            Ok(removed) => {
                self.pool.release(source_entry).await;
                Ok(removed > 0)
            }
            Err(source_error) => {
                warn!(
                    database = %database,
                    source = %source,
                    destination = %destination,
                    error = %source_error,
                    "move left the document in both collections"
                );
                self.pool.discard(source_entry).await;
                Err(DocwrapError::PartialFailure {
                    database: database.to_string(),
                    source_collection: source.to_string(),
                    destination_collection: destination.to_string(),
                    source: source_error,
                })
            }
        }
    }

    /// Remove every document matching the filter. Returns whether
    /// anything was removed.
    pub async fn remove(
        &self,
        database: &str,
        collection: &str,
        options: RemoveOptions,
    ) -> DocwrapResult<bool> {
        debug!(database = %database, collection = %collection, operation = "remove", "store call");
        let mut entry = self.pool.acquire(database).await?;
        let result = entry.connection().remove(collection, &options.filter()).await;
        let removed = self.settle(entry, result, database, collection, "remove").await?;
        Ok(removed > 0)
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Documents matching the filter, with limit/skip/sort applied.
    pub async fn fetch(
        &self,
        database: &str,
        collection: &str,
        options: FetchOptions,
    ) -> DocwrapResult<Vec<Document>> {
        let key = options
            .cache
            .then(|| KeyCodec::derive(database, collection, "fetch", &options.cache_shape()));
        if let Some(CachedResult::Documents(documents)) = self.cached(key.as_deref()) {
            return Ok(documents);
        }

        debug!(database = %database, collection = %collection, operation = "fetch", "store call");
        let mut entry = self.pool.acquire(database).await?;
        let result = entry.connection().find(collection, &options.query()).await;
        let documents = self.settle(entry, result, database, collection, "fetch").await?;

        if let Some(key) = key {
            self.cache
                .set(&key, CachedResult::Documents(documents.clone()), options.ttl);
        }
        Ok(documents)
    }

    /// Documents as [`fetch`](Self::fetch) returns them, plus the total
    /// number of documents matching the filter ignoring limit and skip.
    pub async fn fetch_and_count(
        &self,
        database: &str,
        collection: &str,
        options: FetchOptions,
    ) -> DocwrapResult<(Vec<Document>, u64)> {
        let key = options.cache.then(|| {
            KeyCodec::derive(database, collection, "fetch_and_count", &options.cache_shape())
        });
        if let Some(CachedResult::DocumentsAndCount(documents, total)) =
            self.cached(key.as_deref())
        {
            return Ok((documents, total));
        }

        debug!(
            database = %database,
            collection = %collection,
            operation = "fetch_and_count",
            "store call"
        );
        let query = options.query();
        let mut entry = self.pool.acquire(database).await?;
        let result = async {
            let connection = entry.connection();
            let documents = connection.find(collection, &query).await?;
            let total = connection.count(collection, &query.filter).await?;
            Ok::<_, DriverError>((documents, total))
        }
        .await;
        let (documents, total) = self
            .settle(entry, result, database, collection, "fetch_and_count")
            .await?;

        if let Some(key) = key {
            self.cache.set(
                &key,
                CachedResult::DocumentsAndCount(documents.clone(), total),
                options.ttl,
            );
        }
        Ok((documents, total))
    }

    /// Number of documents matching the filter.
    pub async fn count(
        &self,
        database: &str,
        collection: &str,
        options: CountOptions,
    ) -> DocwrapResult<u64> {
        let key = options
            .cache
            .then(|| KeyCodec::derive(database, collection, "count", &options.cache_shape()));
        if let Some(CachedResult::Count(total)) = self.cached(key.as_deref()) {
            return Ok(total);
        }

        debug!(database = %database, collection = %collection, operation = "count", "store call");
        let mut entry = self.pool.acquire(database).await?;
        let result = entry.connection().count(collection, &options.filter()).await;
        let total = self.settle(entry, result, database, collection, "count").await?;

        if let Some(key) = key {
            self.cache.set(&key, CachedResult::Count(total), options.ttl);
        }
        Ok(total)
    }

    /// User collection names in `database`, sorted. Store-internal
    /// `system.*` collections are left out.
    pub async fn collection_names(&self, database: &str) -> DocwrapResult<Vec<String>> {
        let mut entry = self.pool.acquire(database).await?;
        let result = entry.connection().collection_names().await;
        let mut names = self
            .settle(entry, result, database, "*", "collection_names")
            .await?;
        names.retain(|name| !name.starts_with(SYSTEM_PREFIX));
        names.sort();
        Ok(names)
    }

    // ── Configuration & tunables ────────────────────────────────────

    /// Replace every registered database at once.
    ///
    /// Idle connections and cached results of databases whose config
    /// changed or was removed are dropped. Connections checked out under
    /// an old config finish their call and are closed on release. Returns
    /// the affected logical names.
    pub async fn reconfigure(&self, databases: Vec<DatabaseConfig>) -> Vec<String> {
        let stale = self.registry.replace_all(databases);
        let closed = self.pool.flush(&stale).await;
        let invalidated: usize = stale
            .iter()
            .map(|name| self.cache.invalidate_prefix(&KeyCodec::database_prefix(name)))
            .sum();
        info!(
            stale = stale.len(),
            closed,
            invalidated,
            "databases reconfigured"
        );
        stale
    }

    /// Current tunables.
    pub fn tunables(&self) -> Tunables {
        Tunables {
            pooling: self.pool.is_enabled(),
            caching: self.cache.is_enabled(),
            default_cache_ttl: self.cache.default_ttl(),
            pool_limit: self.pool.limit(),
            sweep_interval: self.tunables.sweep_interval,
        }
    }

    /// Turn pooling on or off. Turning it off closes idle connections.
    pub async fn set_pooling_enabled(&self, enabled: bool) {
        self.pool.set_enabled(enabled).await;
    }

    /// Turn the cache on or off. Turning it off drops every cached result.
    pub fn set_cache_enabled(&self, enabled: bool) {
        self.cache.set_enabled(enabled);
    }

    pub fn set_default_cache_ttl(&self, ticks: u32) {
        self.cache.set_default_ttl(ticks);
    }

    pub async fn set_pool_limit(&self, limit: usize) {
        self.pool.set_limit(limit).await;
    }

    // ── Introspection & lifecycle ───────────────────────────────────

    pub async fn pool_stats(&self, database: &str) -> PoolStats {
        self.pool.stats(database).await
    }

    pub async fn log_pool_stats(&self) {
        self.pool.log_stats().await;
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Number of live cache entries.
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// Drop every cached result.
    pub fn clear_cache(&self) -> usize {
        self.cache.clear()
    }

    /// Stop the cache sweeper and close every idle connection.
    pub async fn shutdown(&self) {
        self.sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stop();
        let closed = self.pool.drain().await;
        info!(closed, "docwrap shut down");
    }

    // ── Internals ───────────────────────────────────────────────────

    fn cached(&self, key: Option<&str>) -> Option<CachedResult> {
        key.and_then(|key| self.cache.get(key))
    }

    /// Hand the connection back according to how the call went.
    async fn settle<T>(
        &self,
        entry: PoolEntry,
        result: Result<T, DriverError>,
        database: &str,
        collection: &str,
        operation: &'static str,
    ) -> DocwrapResult<T> {
        match result {
            Ok(value) => {
                self.pool.release(entry).await;
                Ok(value)
            }
            Err(e) => {
                warn!(
                    database = %database,
                    collection = %collection,
                    operation,
                    connection = entry.id(),
                    error = %e,
                    "store operation failed"
                );
                self.pool.discard(entry).await;
                Err(DocwrapError::store(database, collection, operation, e))
            }
        }
    }
}

impl std::fmt::Debug for Docwrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Docwrap")
            .field("databases", &self.registry.names())
            .field("pool", &self.pool)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
