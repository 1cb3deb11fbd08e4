//! MemoryStore: an in-process [`StoreDriver`].
//!
//! Databases are keyed by their physical name, so two logical names that
//! point at the same physical database see the same documents. Every
//! connection shares the store's state; what a connection owns is its
//! transport flags (open, authenticated, which disconnect epoch it
//! belongs to).
//!
//! Fault injection and call counters let tests drive the pool and the
//! facade through their failure paths and verify cache hits.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use docwrap_core::{
    Credentials, DatabaseConfig, Document, DriverError, FindQuery, StoreConnection, StoreDriver,
    UpdateOutcome, WriteFlags,
};
use serde_json::{Map, Value};
use tracing::debug;

use crate::matcher::{compare_documents, matches};

type Collections = BTreeMap<String, Vec<Document>>;

/// Pending failures to inject, consumed one per matching call.
#[derive(Debug, Default)]
struct Faults {
    connects: u32,
    auths: u32,
    reopens: u32,
    operations: HashMap<&'static str, u32>,
}

#[derive(Debug, Default)]
struct StoreState {
    databases: Mutex<HashMap<String, Collections>>,
    users: Mutex<HashMap<String, Credentials>>,
    faults: Mutex<Faults>,
    calls: Mutex<HashMap<&'static str, u64>>,
    next_id: AtomicU64,
    /// Bumped by `disconnect_all`; connections from an older epoch are dead.
    epoch: AtomicU64,
    opened: AtomicU64,
    closed: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StoreState {
    fn record(&self, op: &'static str) {
        *lock(&self.calls).entry(op).or_insert(0) += 1;
    }

    fn take_fault(&self, op: &'static str) -> bool {
        let mut faults = lock(&self.faults);
        let slot = match op {
            "connect" => &mut faults.connects,
            "authenticate" => &mut faults.auths,
            "reopen" => &mut faults.reopens,
            _ => faults.operations.entry(op).or_insert(0),
        };
        if *slot > 0 {
            *slot -= 1;
            true
        } else {
            false
        }
    }

    fn generate_id(&self) -> Value {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        Value::String(format!("{n:024x}"))
    }
}

/// Shared in-memory document store. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `credentials` for connections to the physical database `database`.
    pub fn require_credentials(&self, database: &str, username: &str, password: &str) {
        lock(&self.state.users).insert(
            database.to_string(),
            Credentials {
                username: username.to_string(),
                password: password.to_string(),
            },
        );
    }

    /// Fail the next `n` connect attempts.
    pub fn fail_next_connects(&self, n: u32) {
        lock(&self.state.faults).connects = n;
    }

    /// Fail the next `n` authenticate calls.
    pub fn fail_next_auths(&self, n: u32) {
        lock(&self.state.faults).auths = n;
    }

    /// Fail the next `n` reopen calls.
    pub fn fail_next_reopens(&self, n: u32) {
        lock(&self.state.faults).reopens = n;
    }

    /// Fail the next `n` calls of `op` (`"find"`, `"count"`, `"insert"`,
    /// `"update"`, `"remove"`, `"collection_names"`).
    pub fn fail_next(&self, op: &'static str, n: u32) {
        lock(&self.state.faults).operations.insert(op, n);
    }

    /// Drop every open transport, as if the server restarted.
    pub fn disconnect_all(&self) {
        self.state.epoch.fetch_add(1, Ordering::Relaxed);
        debug!("memory store dropped all connections");
    }

    /// How many times `op` reached the store (including injected failures).
    pub fn calls(&self, op: &str) -> u64 {
        lock(&self.state.calls).get(op).copied().unwrap_or(0)
    }

    /// Successful connects so far.
    pub fn connections_opened(&self) -> u64 {
        self.state.opened.load(Ordering::Relaxed)
    }

    /// Connections closed so far.
    pub fn connections_closed(&self) -> u64 {
        self.state.closed.load(Ordering::Relaxed)
    }

    /// Snapshot of a collection's documents in insertion order.
    pub fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        lock(&self.state.databases)
            .get(database)
            .and_then(|collections| collections.get(collection))
            .cloned()
            .unwrap_or_default()
    }

    /// Insert documents directly, bypassing connections and counters.
    pub fn seed(&self, database: &str, collection: &str, documents: Vec<Document>) {
        let mut databases = lock(&self.state.databases);
        let docs = databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
        for mut doc in documents {
            if let Value::Object(map) = &mut doc {
                if !map.contains_key("_id") {
                    map.insert("_id".to_string(), self.state.generate_id());
                }
            }
            docs.push(doc);
        }
    }
}

#[async_trait]
impl StoreDriver for MemoryStore {
    async fn connect(
        &self,
        config: &DatabaseConfig,
    ) -> Result<Box<dyn StoreConnection>, DriverError> {
        self.state.record("connect");
        if self.state.take_fault("connect") {
            return Err(DriverError::Connect(format!(
                "{}:{} refused the connection",
                config.address, config.port
            )));
        }
        self.state.opened.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
            database: config.database.clone(),
            epoch: self.state.epoch.load(Ordering::Relaxed),
            open: true,
            authenticated: false,
        }))
    }
}

/// One connection into a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryConnection {
    state: Arc<StoreState>,
    database: String,
    epoch: u64,
    open: bool,
    authenticated: bool,
}

impl MemoryConnection {
    fn ready(&self, op: &'static str) -> Result<(), DriverError> {
        self.state.record(op);
        if !self.is_connected() {
            return Err(DriverError::Disconnected);
        }
        if !self.authenticated && lock(&self.state.users).contains_key(&self.database) {
            return Err(DriverError::Auth(format!(
                "{op} on {} requires authentication",
                self.database
            )));
        }
        if self.state.take_fault(op) {
            return Err(DriverError::Operation(format!("injected {op} failure")));
        }
        Ok(())
    }

    fn with_collection<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut Vec<Document>) -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        let mut databases = lock(&self.state.databases);
        let docs = databases
            .entry(self.database.clone())
            .or_default()
            .entry(collection.to_string())
            .or_default();
        f(docs)
    }

    /// Like `with_collection`, but a missing collection yields `missing`
    /// instead of being created.
    fn with_existing<T>(
        &self,
        collection: &str,
        missing: T,
        f: impl FnOnce(&mut Vec<Document>) -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        let mut databases = lock(&self.state.databases);
        match databases
            .get_mut(&self.database)
            .and_then(|collections| collections.get_mut(collection))
        {
            Some(docs) => f(docs),
            None => Ok(missing),
        }
    }
}

/// Apply an update document: `$set` merges fields, anything else replaces.
fn apply_update(existing: &Document, update: &Document) -> Result<Document, DriverError> {
    let Value::Object(update_map) = update else {
        return Err(DriverError::Operation("update document must be an object".to_string()));
    };
    let is_operator = update_map.keys().any(|k| k.starts_with('$'));
    if !is_operator {
        let mut replacement = update_map.clone();
        match (existing.get("_id"), replacement.get("_id")) {
            (Some(old), Some(new)) if old != new => {
                return Err(DriverError::Operation("_id is immutable".to_string()));
            }
            (Some(old), None) => {
                replacement.insert("_id".to_string(), old.clone());
            }
            _ => {}
        }
        return Ok(Value::Object(replacement));
    }

    let mut merged = existing.as_object().cloned().unwrap_or_default();
    for (op, fields) in update_map {
        match (op.as_str(), fields) {
            ("$set", Value::Object(fields)) => {
                for (field, value) in fields {
                    if field == "_id" && merged.get("_id").is_some_and(|id| id != value) {
                        return Err(DriverError::Operation("_id is immutable".to_string()));
                    }
                    merged.insert(field.clone(), value.clone());
                }
            }
            (other, _) => {
                return Err(DriverError::Operation(format!(
                    "unsupported update operator {other}"
                )));
            }
        }
    }
    Ok(Value::Object(merged))
}

/// Seed for an upsert: the filter's plain equality fields.
fn upsert_seed(filter: &Value) -> Document {
    let mut seed = Map::new();
    if let Value::Object(clauses) = filter {
        for (field, condition) in clauses {
            let is_operator = matches!(
                condition,
                Value::Object(map) if map.keys().any(|k| k.starts_with('$'))
            );
            let is_plain = !field.starts_with('$') && !field.contains('.') && !is_operator;
            if is_plain {
                seed.insert(field.clone(), condition.clone());
            }
        }
    }
    Value::Object(seed)
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    fn is_connected(&self) -> bool {
        self.open && self.epoch == self.state.epoch.load(Ordering::Relaxed)
    }

    async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), DriverError> {
        self.state.record("authenticate");
        if self.state.take_fault("authenticate") {
            return Err(DriverError::Auth("injected authentication failure".to_string()));
        }
        let accepted = match lock(&self.state.users).get(&self.database) {
            Some(required) => required == credentials,
            None => true,
        };
        if !accepted {
            return Err(DriverError::Auth(format!(
                "bad credentials for {} on {}",
                credentials.username, self.database
            )));
        }
        self.authenticated = true;
        Ok(())
    }

    async fn reopen(&mut self) -> Result<(), DriverError> {
        self.state.record("reopen");
        if self.state.take_fault("reopen") {
            return Err(DriverError::Connect("injected reopen failure".to_string()));
        }
        self.epoch = self.state.epoch.load(Ordering::Relaxed);
        self.open = true;
        self.authenticated = false;
        Ok(())
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.state.closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn find(
        &mut self,
        collection: &str,
        query: &FindQuery,
    ) -> Result<Vec<Document>, DriverError> {
        self.ready("find")?;
        self.with_existing(collection, Vec::new(), |docs| {
            let mut found = Vec::new();
            for doc in docs.iter() {
                if matches(doc, &query.filter)? {
                    found.push(doc.clone());
                }
            }
            if !query.sort.is_empty() {
                found.sort_by(|a, b| compare_documents(a, b, &query.sort));
            }
            let skipped = found.into_iter().skip(query.skip as usize);
            Ok(if query.limit > 0 {
                skipped.take(query.limit as usize).collect()
            } else {
                skipped.collect()
            })
        })
    }

    async fn count(&mut self, collection: &str, filter: &Value) -> Result<u64, DriverError> {
        self.ready("count")?;
        self.with_existing(collection, 0, |docs| {
            let mut n = 0;
            for doc in docs.iter() {
                if matches(doc, filter)? {
                    n += 1;
                }
            }
            Ok(n)
        })
    }

    async fn insert(
        &mut self,
        collection: &str,
        document: &Document,
        _safe: bool,
    ) -> Result<Document, DriverError> {
        self.ready("insert")?;
        let Value::Object(map) = document else {
            return Err(DriverError::Operation("document must be an object".to_string()));
        };
        let mut stored = map.clone();
        if !stored.contains_key("_id") {
            stored.insert("_id".to_string(), self.state.generate_id());
        }
        let stored = Value::Object(stored);
        self.with_collection(collection, |docs| {
            if docs.iter().any(|d| d.get("_id") == stored.get("_id")) {
                return Err(DriverError::DuplicateKey(format!(
                    "{collection} already has _id {}",
                    stored["_id"]
                )));
            }
            docs.push(stored.clone());
            Ok(stored)
        })
    }

    async fn update(
        &mut self,
        collection: &str,
        filter: &Value,
        document: &Document,
        flags: WriteFlags,
    ) -> Result<UpdateOutcome, DriverError> {
        self.ready("update")?;
        let state = Arc::clone(&self.state);
        self.with_collection(collection, |docs| {
            let mut position = None;
            for (i, doc) in docs.iter().enumerate() {
                if matches(doc, filter)? {
                    position = Some(i);
                    break;
                }
            }

            if let Some(i) = position {
                docs[i] = apply_update(&docs[i], document)?;
                return Ok(UpdateOutcome {
                    matched: 1,
                    upserted: false,
                });
            }
            if !flags.upsert {
                return Ok(UpdateOutcome::default());
            }

            let mut created = apply_update(&upsert_seed(filter), document)?;
            if let Value::Object(map) = &mut created {
                if !map.contains_key("_id") {
                    map.insert("_id".to_string(), state.generate_id());
                }
            }
            if docs.iter().any(|d| d.get("_id") == created.get("_id")) {
                return Err(DriverError::DuplicateKey(format!(
                    "{collection} already has _id {}",
                    created["_id"]
                )));
            }
            docs.push(created);
            Ok(UpdateOutcome {
                matched: 0,
                upserted: true,
            })
        })
    }

    async fn remove(&mut self, collection: &str, filter: &Value) -> Result<u64, DriverError> {
        self.ready("remove")?;
        self.with_existing(collection, 0, |docs| {
            let mut doomed = Vec::with_capacity(docs.len());
            for doc in docs.iter() {
                doomed.push(matches(doc, filter)?);
            }
            let before = docs.len();
            let mut doomed = doomed.into_iter();
            docs.retain(|_| !doomed.next().unwrap_or(false));
            Ok((before - docs.len()) as u64)
        })
    }

    async fn collection_names(&mut self) -> Result<Vec<String>, DriverError> {
        self.ready("collection_names")?;
        Ok(lock(&self.state.databases)
            .get(&self.database)
            .map(|collections| collections.keys().cloned().collect())
            .unwrap_or_default())
    }
}
