//! Connection pool: per-database idle stacks over a [`StoreDriver`].
//!
//! # Architecture
//!
//! ```text
//! acquire(database)
//!   → pop most-recently-returned idle entry
//!     → connected → hand it out
//!     → disconnected → reopen (+ authenticate) in place, or close it and fall through
//!   → open a fresh connection (connect + authenticate), retrying with backoff
//!
//! release(entry)
//!   → pooling disabled / config replaced / stack at limit → close
//!   → otherwise push onto the idle stack
//! ```
//!
//! Entries move by value: `acquire` gives the caller sole ownership and
//! `release`/`discard` take it back, so no entry can be checked out twice
//! or sit in two idle slots.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use docwrap_core::{
    DatabaseConfig, DatabaseRegistry, DocwrapError, DocwrapResult, DriverError, RetryPolicy,
    StoreConnection, StoreDriver,
};
use tokio::sync::Mutex;

use crate::backoff::Backoff;

/// Connectivity of a pooled connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// A live connection owned either by the pool (idle) or by one caller.
pub struct PoolEntry {
    /// Unique ID for this connection across all databases.
    id: u64,
    /// Registry snapshot the connection was opened with.
    config: Arc<DatabaseConfig>,
    /// When this connection was established.
    created_at: Instant,
    /// When this connection was last handed out or returned.
    last_used: Instant,
    connection: Box<dyn StoreConnection>,
}

impl PoolEntry {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Logical database name this connection belongs to.
    pub fn database(&self) -> &str {
        &self.config.logical_name
    }

    pub fn config(&self) -> &Arc<DatabaseConfig> {
        &self.config
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    pub fn state(&self) -> ConnectionState {
        if self.connection.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// The store connection, for issuing operations while checked out.
    pub fn connection(&mut self) -> &mut dyn StoreConnection {
        self.connection.as_mut()
    }

    async fn close(mut self) {
        self.connection.close().await;
    }
}

impl fmt::Debug for PoolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolEntry")
            .field("id", &self.id)
            .field("database", &self.config.logical_name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Per-database idle stack and counters.
#[derive(Debug, Default)]
struct Pool {
    /// Idle connections; the top of the stack is reused first.
    idle: Vec<PoolEntry>,
    /// Connections currently checked out.
    active: usize,
    opened: u64,
    reused: u64,
    discarded: u64,
}

/// Pool-level statistics for one logical database.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections sitting idle in the pool.
    pub idle: usize,
    /// Connections currently checked out by callers.
    pub active: usize,
    /// Fresh connections established.
    pub opened: u64,
    /// Checkouts served from the idle stack.
    pub reused: u64,
    /// Connections closed instead of pooled.
    pub discarded: u64,
}

/// Why a connection was closed rather than kept.
#[derive(Clone, Copy, Debug)]
enum CloseReason {
    PoolingDisabled,
    PoolFull,
    StaleConfig,
    OperationError,
    ReopenFailed,
    Drained,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::PoolingDisabled => "pooling disabled",
            CloseReason::PoolFull => "idle stack full",
            CloseReason::StaleConfig => "database reconfigured",
            CloseReason::OperationError => "operation error",
            CloseReason::ReopenFailed => "reopen failed",
            CloseReason::Drained => "drained",
        };
        f.write_str(s)
    }
}

/// Bounded per-database connection pool with lazy reconnect.
pub struct ConnectionPool {
    pools: Mutex<HashMap<String, Pool>>,
    registry: Arc<DatabaseRegistry>,
    driver: Arc<dyn StoreDriver>,
    backoff: Backoff,
    /// When false, released connections are closed instead of pooled.
    enabled: AtomicBool,
    /// Maximum idle connections per database.
    limit: AtomicUsize,
    next_id: AtomicU64,
}

impl ConnectionPool {
    pub fn new(
        registry: Arc<DatabaseRegistry>,
        driver: Arc<dyn StoreDriver>,
        retry: RetryPolicy,
        enabled: bool,
        limit: usize,
    ) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            registry,
            driver,
            backoff: Backoff::new(retry),
            enabled: AtomicBool::new(enabled),
            limit: AtomicUsize::new(limit),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    /// Turn pooling on or off. Turning it off closes every idle connection.
    pub async fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::Relaxed);
        if was && !enabled {
            let closed = self.drain().await;
            tracing::info!(closed, "pooling disabled");
        }
    }

    /// Change the per-database idle limit, closing the oldest idle
    /// connections of any stack now above it.
    pub async fn set_limit(&self, limit: usize) {
        self.limit.store(limit, Ordering::Relaxed);
        let excess: Vec<PoolEntry> = {
            let mut pools = self.pools.lock().await;
            pools
                .values_mut()
                .flat_map(|pool| {
                    let over = pool.idle.len().saturating_sub(limit);
                    pool.discarded += over as u64;
                    pool.idle.drain(..over).collect::<Vec<_>>()
                })
                .collect()
        };
        if !excess.is_empty() {
            tracing::debug!(limit, closed = excess.len(), "trimmed idle connections");
        }
        for entry in excess {
            entry.close().await;
        }
    }

    /// Check out a connection for `database`.
    ///
    /// Never returns a disconnected entry: a disconnected idle entry is
    /// reopened in place or closed and replaced with a fresh connection.
    pub async fn acquire(&self, database: &str) -> DocwrapResult<PoolEntry> {
        let config = self.registry.get(database)?;

        let candidate = {
            let mut pools = self.pools.lock().await;
            pools.get_mut(database).and_then(|pool| pool.idle.pop())
        };

        if let Some(entry) = candidate {
            match self.revive(entry).await {
                Ok(mut entry) => {
                    entry.last_used = Instant::now();
                    let mut pools = self.pools.lock().await;
                    let pool = pools.entry(database.to_string()).or_default();
                    pool.active += 1;
                    pool.reused += 1;
                    tracing::debug!(
                        id = entry.id,
                        database = %database,
                        idle = pool.idle.len(),
                        "reused idle connection"
                    );
                    return Ok(entry);
                }
                Err((entry, reason)) => {
                    {
                        let mut pools = self.pools.lock().await;
                        if let Some(pool) = pools.get_mut(database) {
                            pool.discarded += 1;
                        }
                    }
                    self.close_entry(entry, reason).await;
                }
            }
        }

        let connection = self.open(&config).await?;
        let now = Instant::now();
        let entry = PoolEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            config,
            created_at: now,
            last_used: now,
            connection,
        };

        {
            let mut pools = self.pools.lock().await;
            let pool = pools.entry(database.to_string()).or_default();
            pool.active += 1;
            pool.opened += 1;
        }

        tracing::debug!(
            id = entry.id,
            database = %database,
            address = %entry.config.address,
            port = entry.config.port,
            "opened new connection"
        );
        Ok(entry)
    }

    /// Return a checked-out connection to its idle stack.
    pub async fn release(&self, mut entry: PoolEntry) {
        let reason = {
            let mut pools = self.pools.lock().await;
            // Database removed and flushed while this entry was checked out.
            let Some(pool) = pools.get_mut(entry.database()) else {
                drop(pools);
                self.close_entry(entry, CloseReason::StaleConfig).await;
                return;
            };
            pool.active = pool.active.saturating_sub(1);

            let reason = if !self.is_enabled() {
                Some(CloseReason::PoolingDisabled)
            } else if !self.registry.is_current(&entry.config) {
                Some(CloseReason::StaleConfig)
            } else if pool.idle.len() >= self.limit() {
                Some(CloseReason::PoolFull)
            } else {
                None
            };

            match reason {
                Some(reason) => {
                    pool.discarded += 1;
                    reason
                }
                None => {
                    entry.last_used = Instant::now();
                    tracing::debug!(
                        id = entry.id,
                        database = %entry.config.logical_name,
                        idle = pool.idle.len() + 1,
                        "returned connection to pool"
                    );
                    pool.idle.push(entry);
                    return;
                }
            }
        };
        self.close_entry(entry, reason).await;
    }

    /// Close a checked-out connection after an operation error.
    pub async fn discard(&self, entry: PoolEntry) {
        {
            let mut pools = self.pools.lock().await;
            if let Some(pool) = pools.get_mut(entry.database()) {
                pool.active = pool.active.saturating_sub(1);
                pool.discarded += 1;
            }
        }
        self.close_entry(entry, CloseReason::OperationError).await;
    }

    /// Close the idle connections of the given databases. Databases no
    /// longer registered lose their pool entirely.
    pub async fn flush(&self, databases: &[String]) -> usize {
        let mut flushed = Vec::new();
        {
            let mut pools = self.pools.lock().await;
            for name in databases {
                if !self.registry.contains(name) {
                    if let Some(pool) = pools.remove(name) {
                        flushed.extend(pool.idle);
                    }
                } else if let Some(pool) = pools.get_mut(name) {
                    pool.discarded += pool.idle.len() as u64;
                    flushed.extend(pool.idle.drain(..));
                }
            }
        }
        let count = flushed.len();
        for entry in flushed {
            tracing::debug!(
                id = entry.id,
                database = %entry.config.logical_name,
                reason = %CloseReason::StaleConfig,
                "closed idle connection"
            );
            entry.close().await;
        }
        count
    }

    /// Close every idle connection. Checked-out connections are left to
    /// their callers and are closed when released while pooling is off.
    pub async fn drain(&self) -> usize {
        let drained: Vec<PoolEntry> = {
            let mut pools = self.pools.lock().await;
            pools
                .values_mut()
                .flat_map(|pool| {
                    pool.discarded += pool.idle.len() as u64;
                    pool.idle.drain(..).collect::<Vec<_>>()
                })
                .collect()
        };
        let count = drained.len();
        for entry in drained {
            tracing::debug!(
                id = entry.id,
                database = %entry.config.logical_name,
                reason = %CloseReason::Drained,
                "closed idle connection"
            );
            entry.close().await;
        }
        tracing::info!(closed = count, "connection pool drained");
        count
    }

    /// Statistics for one logical database.
    pub async fn stats(&self, database: &str) -> PoolStats {
        let pools = self.pools.lock().await;
        pools
            .get(database)
            .map(|pool| PoolStats {
                idle: pool.idle.len(),
                active: pool.active,
                opened: pool.opened,
                reused: pool.reused,
                discarded: pool.discarded,
            })
            .unwrap_or_default()
    }

    /// Log pool statistics for every database at `tracing::info` level.
    pub async fn log_stats(&self) {
        let pools = self.pools.lock().await;
        for (database, pool) in pools.iter() {
            tracing::info!(
                database = %database,
                idle = pool.idle.len(),
                active = pool.active,
                opened = pool.opened,
                reused = pool.reused,
                discarded = pool.discarded,
                "pool statistics"
            );
        }
    }

    /// Make a popped idle entry usable, or say why it can't be.
    async fn revive(&self, mut entry: PoolEntry) -> Result<PoolEntry, (PoolEntry, CloseReason)> {
        if !self.registry.is_current(&entry.config) {
            return Err((entry, CloseReason::StaleConfig));
        }
        if entry.connection.is_connected() {
            return Ok(entry);
        }

        tracing::debug!(
            id = entry.id,
            database = %entry.config.logical_name,
            "reopening disconnected idle connection"
        );
        let config = Arc::clone(&entry.config);
        let result = match entry.connection.reopen().await {
            Ok(()) => match &config.credentials {
                Some(credentials) => entry.connection.authenticate(credentials).await,
                None => Ok(()),
            },
            Err(e) => Err(e),
        };
        match result {
            Ok(()) if entry.connection.is_connected() => Ok(entry),
            Ok(()) => Err((entry, CloseReason::ReopenFailed)),
            Err(e) => {
                tracing::warn!(
                    id = entry.id,
                    database = %config.logical_name,
                    error = %e,
                    "failed to reopen idle connection"
                );
                Err((entry, CloseReason::ReopenFailed))
            }
        }
    }

    /// Establish a fresh connection, retrying with exponential backoff.
    async fn open(&self, config: &DatabaseConfig) -> DocwrapResult<Box<dyn StoreConnection>> {
        let max_attempts = self.backoff.max_attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.establish(config).await {
                Ok(connection) => return Ok(connection),
                Err(e) => e,
            };

            tracing::warn!(
                database = %config.logical_name,
                address = %config.address,
                port = config.port,
                attempt,
                max_attempts,
                error = %error,
                "connection attempt failed"
            );

            match self.backoff.delay_after(attempt) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    return Err(DocwrapError::Connection {
                        database: config.logical_name.clone(),
                        attempts: attempt,
                        source: error,
                    });
                }
            }
        }
    }

    /// One connect + authenticate round trip. A failed attempt is closed.
    async fn establish(
        &self,
        config: &DatabaseConfig,
    ) -> Result<Box<dyn StoreConnection>, DriverError> {
        let mut connection = self.driver.connect(config).await?;
        if let Some(credentials) = &config.credentials {
            if let Err(e) = connection.authenticate(credentials).await {
                connection.close().await;
                return Err(e);
            }
        }
        Ok(connection)
    }

    /// Close an entry. Counters are the caller's job.
    async fn close_entry(&self, entry: PoolEntry, reason: CloseReason) {
        tracing::debug!(
            id = entry.id,
            database = %entry.config.logical_name,
            reason = %reason,
            "closed connection"
        );
        entry.close().await;
    }
}

// ── Debug ───────────────────────────────────────────────────────────

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("enabled", &self.is_enabled())
            .field("limit", &self.limit())
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docwrap_core::{Credentials, Document, FindQuery, UpdateOutcome, WriteFlags};
    use serde_json::Value;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    // ── Mock connection and driver ───────────────────────────────────

    #[derive(Debug)]
    struct MockConnection {
        connected: Arc<AtomicBool>,
        closes: Arc<AtomicU64>,
        reopen_failures: Arc<AtomicU32>,
        authenticated: bool,
    }

    #[async_trait]
    impl StoreConnection for MockConnection {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::Relaxed)
        }

        async fn authenticate(&mut self, _credentials: &Credentials) -> Result<(), DriverError> {
            self.authenticated = true;
            Ok(())
        }

        async fn reopen(&mut self) -> Result<(), DriverError> {
            if self
                .reopen_failures
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(DriverError::Connect("still down".to_string()));
            }
            self.connected.store(true, Ordering::Relaxed);
            Ok(())
        }

        async fn close(&mut self) {
            self.connected.store(false, Ordering::Relaxed);
            self.closes.fetch_add(1, Ordering::Relaxed);
        }

        async fn find(&mut self, _: &str, _: &FindQuery) -> Result<Vec<Document>, DriverError> {
            Ok(vec![])
        }

        async fn count(&mut self, _: &str, _: &Value) -> Result<u64, DriverError> {
            Ok(0)
        }

        async fn insert(
            &mut self,
            _: &str,
            doc: &Document,
            _: bool,
        ) -> Result<Document, DriverError> {
            Ok(doc.clone())
        }

        async fn update(
            &mut self,
            _: &str,
            _: &Value,
            _: &Document,
            _: WriteFlags,
        ) -> Result<UpdateOutcome, DriverError> {
            Ok(UpdateOutcome::default())
        }

        async fn remove(&mut self, _: &str, _: &Value) -> Result<u64, DriverError> {
            Ok(0)
        }

        async fn collection_names(&mut self) -> Result<Vec<String>, DriverError> {
            Ok(vec![])
        }
    }

    #[derive(Default)]
    struct MockDriver {
        connect_count: AtomicU64,
        connect_failures: AtomicU32,
        auth_failures: Arc<AtomicU32>,
        reopen_failures: Arc<AtomicU32>,
        closes: Arc<AtomicU64>,
        /// Connected flags of every connection handed out, in order.
        flags: std::sync::Mutex<Vec<Arc<AtomicBool>>>,
    }

    impl MockDriver {
        fn connects(&self) -> u64 {
            self.connect_count.load(Ordering::Relaxed)
        }

        fn closes(&self) -> u64 {
            self.closes.load(Ordering::Relaxed)
        }

        fn drop_connection(&self, index: usize) {
            self.flags.lock().unwrap()[index].store(false, Ordering::Relaxed);
        }
    }

    #[async_trait]
    impl StoreDriver for MockDriver {
        async fn connect(
            &self,
            _config: &DatabaseConfig,
        ) -> Result<Box<dyn StoreConnection>, DriverError> {
            if self
                .connect_failures
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(DriverError::Connect("connection refused".to_string()));
            }
            self.connect_count.fetch_add(1, Ordering::Relaxed);
            let connected = Arc::new(AtomicBool::new(true));
            self.flags.lock().unwrap().push(Arc::clone(&connected));
            Ok(Box::new(FailingAuth {
                inner: MockConnection {
                    connected,
                    closes: Arc::clone(&self.closes),
                    reopen_failures: Arc::clone(&self.reopen_failures),
                    authenticated: false,
                },
                auth_failures: Arc::clone(&self.auth_failures),
            }))
        }
    }

    /// Wraps a mock connection so authentication can be made to fail.
    #[derive(Debug)]
    struct FailingAuth {
        inner: MockConnection,
        auth_failures: Arc<AtomicU32>,
    }

    #[async_trait]
    impl StoreConnection for FailingAuth {
        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }

        async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), DriverError> {
            if self
                .auth_failures
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(DriverError::Auth("bad credentials".to_string()));
            }
            self.inner.authenticate(credentials).await
        }

        async fn reopen(&mut self) -> Result<(), DriverError> {
            self.inner.reopen().await
        }

        async fn close(&mut self) {
            self.inner.close().await
        }

        async fn find(&mut self, c: &str, q: &FindQuery) -> Result<Vec<Document>, DriverError> {
            self.inner.find(c, q).await
        }

        async fn count(&mut self, c: &str, f: &Value) -> Result<u64, DriverError> {
            self.inner.count(c, f).await
        }

        async fn insert(
            &mut self,
            c: &str,
            d: &Document,
            s: bool,
        ) -> Result<Document, DriverError> {
            self.inner.insert(c, d, s).await
        }

        async fn update(
            &mut self,
            c: &str,
            f: &Value,
            d: &Document,
            w: WriteFlags,
        ) -> Result<UpdateOutcome, DriverError> {
            self.inner.update(c, f, d, w).await
        }

        async fn remove(&mut self, c: &str, f: &Value) -> Result<u64, DriverError> {
            self.inner.remove(c, f).await
        }

        async fn collection_names(&mut self) -> Result<Vec<String>, DriverError> {
            self.inner.collection_names().await
        }
    }

    fn test_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn test_registry() -> Arc<DatabaseRegistry> {
        Arc::new(DatabaseRegistry::new(vec![
            DatabaseConfig::new("local", "127.0.0.1", 27017),
            DatabaseConfig::new("secure", "127.0.0.1", 27017).with_credentials("svc", "pw"),
        ]))
    }

    fn make_pool(limit: usize) -> (ConnectionPool, Arc<MockDriver>, Arc<DatabaseRegistry>) {
        let driver = Arc::new(MockDriver::default());
        let registry = test_registry();
        let pool = ConnectionPool::new(
            Arc::clone(&registry),
            driver.clone(),
            test_retry(),
            true,
            limit,
        );
        (pool, driver, registry)
    }

    // ── Acquire ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn acquire_opens_connection_via_driver() {
        let (pool, driver, _) = make_pool(3);
        let entry = pool.acquire("local").await.unwrap();
        assert_eq!(driver.connects(), 1);
        assert_eq!(entry.database(), "local");
        assert_eq!(entry.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn acquire_unknown_database_errors() {
        let (pool, driver, _) = make_pool(3);
        let err = pool.acquire("missing").await.unwrap_err();
        assert!(matches!(err, DocwrapError::UnknownDatabase(_)));
        assert_eq!(driver.connects(), 0);
    }

    #[tokio::test]
    async fn acquire_reuses_released_connection() {
        let (pool, driver, _) = make_pool(3);
        let entry = pool.acquire("local").await.unwrap();
        let id = entry.id();
        pool.release(entry).await;

        let again = pool.acquire("local").await.unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(driver.connects(), 1);
        assert_eq!(pool.stats("local").await.reused, 1);
    }

    #[tokio::test]
    async fn acquire_is_last_in_first_out() {
        let (pool, _, _) = make_pool(3);
        let a = pool.acquire("local").await.unwrap();
        let b = pool.acquire("local").await.unwrap();
        let b_id = b.id();
        pool.release(a).await;
        pool.release(b).await;

        assert_eq!(pool.acquire("local").await.unwrap().id(), b_id);
    }

    #[tokio::test]
    async fn databases_get_separate_pools() {
        let (pool, driver, _) = make_pool(3);
        let a = pool.acquire("local").await.unwrap();
        pool.release(a).await;
        let b = pool.acquire("secure").await.unwrap();
        assert_eq!(b.database(), "secure");
        assert_eq!(driver.connects(), 2);
    }

    // ── Release ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn release_never_exceeds_limit() {
        let (pool, driver, _) = make_pool(2);
        let mut entries = Vec::new();
        for _ in 0..5 {
            entries.push(pool.acquire("local").await.unwrap());
        }
        for entry in entries {
            pool.release(entry).await;
            assert!(pool.stats("local").await.idle <= 2);
        }
        let stats = pool.stats("local").await;
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.discarded, 3);
        assert_eq!(driver.closes(), 3);
    }

    #[tokio::test]
    async fn release_with_pooling_disabled_closes() {
        let (pool, driver, _) = make_pool(3);
        let entry = pool.acquire("local").await.unwrap();
        pool.set_enabled(false).await;
        pool.release(entry).await;

        assert_eq!(pool.stats("local").await.idle, 0);
        assert_eq!(driver.closes(), 1);
    }

    #[tokio::test]
    async fn disabling_pooling_drains_idle() {
        let (pool, driver, _) = make_pool(3);
        let entry = pool.acquire("local").await.unwrap();
        pool.release(entry).await;
        assert_eq!(pool.stats("local").await.idle, 1);

        pool.set_enabled(false).await;
        assert_eq!(pool.stats("local").await.idle, 0);
        assert_eq!(driver.closes(), 1);
    }

    #[tokio::test]
    async fn zero_limit_never_pools() {
        let (pool, driver, _) = make_pool(0);
        let entry = pool.acquire("local").await.unwrap();
        pool.release(entry).await;
        assert_eq!(pool.stats("local").await.idle, 0);
        pool.acquire("local").await.unwrap();
        assert_eq!(driver.connects(), 2);
    }

    #[tokio::test]
    async fn lowering_limit_trims_oldest_idle() {
        let (pool, driver, _) = make_pool(3);
        let a = pool.acquire("local").await.unwrap();
        let b = pool.acquire("local").await.unwrap();
        let c = pool.acquire("local").await.unwrap();
        let c_id = c.id();
        pool.release(a).await;
        pool.release(b).await;
        pool.release(c).await;

        pool.set_limit(1).await;
        assert_eq!(pool.stats("local").await.idle, 1);
        assert_eq!(driver.closes(), 2);
        assert_eq!(pool.acquire("local").await.unwrap().id(), c_id);
    }

    // ── Discard ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn discard_closes_and_counts() {
        let (pool, driver, _) = make_pool(3);
        let entry = pool.acquire("local").await.unwrap();
        pool.discard(entry).await;

        let stats = pool.stats("local").await;
        assert_eq!(stats.active, 0);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.discarded, 1);
        assert_eq!(driver.closes(), 1);
    }

    // ── Lazy reconnect ───────────────────────────────────────────────

    #[tokio::test]
    async fn disconnected_idle_entry_is_reopened() {
        let (pool, driver, _) = make_pool(3);
        let entry = pool.acquire("local").await.unwrap();
        let id = entry.id();
        pool.release(entry).await;
        driver.drop_connection(0);

        let entry = pool.acquire("local").await.unwrap();
        assert_eq!(entry.id(), id);
        assert_eq!(entry.state(), ConnectionState::Connected);
        assert_eq!(driver.connects(), 1);
    }

    #[tokio::test]
    async fn failed_reopen_falls_back_to_fresh_connection() {
        let (pool, driver, _) = make_pool(3);
        let entry = pool.acquire("local").await.unwrap();
        let id = entry.id();
        pool.release(entry).await;
        driver.drop_connection(0);
        driver.reopen_failures.store(1, Ordering::Relaxed);

        let entry = pool.acquire("local").await.unwrap();
        assert_ne!(entry.id(), id);
        assert_eq!(entry.state(), ConnectionState::Connected);
        assert_eq!(driver.connects(), 2);
        assert_eq!(pool.stats("local").await.discarded, 1);
    }

    // ── Connection retry ─────────────────────────────────────────────

    #[tokio::test]
    async fn connect_failure_is_retried() {
        let (pool, driver, _) = make_pool(3);
        driver.connect_failures.store(2, Ordering::Relaxed);

        let entry = pool.acquire("local").await;
        assert!(entry.is_ok());
        assert_eq!(driver.connects(), 1);
    }

    #[tokio::test]
    async fn connect_gives_up_after_max_attempts() {
        let (pool, driver, _) = make_pool(3);
        driver.connect_failures.store(10, Ordering::Relaxed);

        let err = pool.acquire("local").await.unwrap_err();
        match err {
            DocwrapError::Connection {
                database,
                attempts,
                source,
            } => {
                assert_eq!(database, "local");
                assert_eq!(attempts, 3);
                assert!(matches!(source, DriverError::Connect(_)));
            }
            other => panic!("expected connection error, got {other:?}"),
        }
        assert_eq!(pool.stats("local").await.active, 0);
    }

    #[tokio::test]
    async fn auth_failure_discards_attempt_and_retries() {
        let (pool, driver, _) = make_pool(3);
        driver.auth_failures.store(1, Ordering::Relaxed);

        let entry = pool.acquire("secure").await.unwrap();
        assert_eq!(entry.state(), ConnectionState::Connected);
        assert_eq!(driver.connects(), 2);
        assert_eq!(driver.closes(), 1);
    }

    #[tokio::test]
    async fn auth_failure_exhaustion_is_a_connection_error() {
        let (pool, driver, _) = make_pool(3);
        driver.auth_failures.store(10, Ordering::Relaxed);

        let err = pool.acquire("secure").await.unwrap_err();
        assert!(matches!(
            err,
            DocwrapError::Connection {
                source: DriverError::Auth(_),
                ..
            }
        ));
        assert_eq!(driver.closes(), 3);
    }

    // ── Reconfiguration ──────────────────────────────────────────────

    #[tokio::test]
    async fn stale_config_connections_are_not_pooled() {
        let (pool, driver, registry) = make_pool(3);
        let entry = pool.acquire("local").await.unwrap();

        registry.replace_all(vec![DatabaseConfig::new("local", "10.0.0.1", 27017)]);
        pool.release(entry).await;

        let stats = pool.stats("local").await;
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.discarded, 1);
        assert_eq!(driver.closes(), 1);
    }

    #[tokio::test]
    async fn stale_idle_entry_is_replaced_on_acquire() {
        let (pool, driver, registry) = make_pool(3);
        let entry = pool.acquire("local").await.unwrap();
        let id = entry.id();
        pool.release(entry).await;

        registry.replace_all(vec![DatabaseConfig::new("local", "10.0.0.1", 27017)]);
        let fresh = pool.acquire("local").await.unwrap();
        assert_ne!(fresh.id(), id);
        assert_eq!(fresh.config().address, "10.0.0.1");
        assert_eq!(pool.stats("local").await.discarded, 1);
        assert_eq!(driver.closes(), 1);
    }

    #[tokio::test]
    async fn removed_database_leaves_no_pool_behind() {
        let (pool, driver, registry) = make_pool(3);
        let idle = pool.acquire("secure").await.unwrap();
        let busy = pool.acquire("secure").await.unwrap();
        pool.release(idle).await;

        registry.replace_all(vec![DatabaseConfig::new("local", "127.0.0.1", 27017)]);
        assert_eq!(pool.flush(&["secure".to_string()]).await, 1);
        pool.release(busy).await;

        assert_eq!(pool.stats("secure").await, PoolStats::default());
        assert_eq!(driver.closes(), 2);
    }

    #[tokio::test]
    async fn flush_closes_named_databases_only() {
        let (pool, driver, _) = make_pool(3);
        let a = pool.acquire("local").await.unwrap();
        let b = pool.acquire("secure").await.unwrap();
        pool.release(a).await;
        pool.release(b).await;

        let flushed = pool.flush(&["local".to_string()]).await;
        assert_eq!(flushed, 1);
        assert_eq!(pool.stats("local").await.idle, 0);
        assert_eq!(pool.stats("secure").await.idle, 1);
        assert_eq!(driver.closes(), 1);
    }

    // ── Drain & stats ────────────────────────────────────────────────

    #[tokio::test]
    async fn drain_closes_all_idle() {
        let (pool, driver, _) = make_pool(3);
        let a = pool.acquire("local").await.unwrap();
        let b = pool.acquire("secure").await.unwrap();
        pool.release(a).await;
        pool.release(b).await;

        assert_eq!(pool.drain().await, 2);
        assert_eq!(driver.closes(), 2);
        assert_eq!(pool.stats("local").await.idle, 0);
    }

    #[tokio::test]
    async fn stats_empty_pool() {
        let (pool, _, _) = make_pool(3);
        assert_eq!(pool.stats("local").await, PoolStats::default());
    }

    #[tokio::test]
    async fn stats_track_active_and_opened() {
        let (pool, _, _) = make_pool(3);
        let a = pool.acquire("local").await.unwrap();
        let _b = pool.acquire("local").await.unwrap();
        let stats = pool.stats("local").await;
        assert_eq!(stats.active, 2);
        assert_eq!(stats.opened, 2);

        pool.release(a).await;
        let stats = pool.stats("local").await;
        assert_eq!(stats.active, 1);
        assert_eq!(stats.idle, 1);
    }

    #[tokio::test]
    async fn acquire_release_cycle_reuses_one_connection() {
        let (pool, driver, _) = make_pool(2);
        for _ in 0..100 {
            let entry = pool.acquire("local").await.unwrap();
            pool.release(entry).await;
        }
        assert_eq!(driver.connects(), 1);
        let stats = pool.stats("local").await;
        assert_eq!(stats.active, 0);
        assert_eq!(stats.idle, 1);
    }
}
