//! Typed registry of logical databases.
//!
//! Logical names are the only identity the pool and the cache key on, so
//! the registry is keyed by logical name and a name can map to exactly one
//! [`DatabaseConfig`] at a time. Two logical names may point at the same
//! physical endpoint; they still get separate pools and cache entries.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::error::{DocwrapError, DocwrapResult};

/// Username/password pair exchanged after connecting.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where and how to reach one logical database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// User-chosen key, independent of the physical address.
    pub logical_name: String,
    pub address: String,
    pub port: u16,
    /// Physical database name on the server.
    pub database: String,
    pub credentials: Option<Credentials>,
}

impl DatabaseConfig {
    pub fn new(logical_name: &str, address: &str, port: u16) -> Self {
        Self {
            logical_name: logical_name.to_string(),
            address: address.to_string(),
            port,
            database: logical_name.to_string(),
            credentials: None,
        }
    }

    /// Builder method: set the physical database name.
    pub fn with_database(self, database: &str) -> Self {
        Self {
            database: database.to_string(),
            ..self
        }
    }

    /// Builder method: authenticate with these credentials after connecting.
    pub fn with_credentials(self, username: &str, password: &str) -> Self {
        Self {
            credentials: Some(Credentials {
                username: username.to_string(),
                password: password.to_string(),
            }),
            ..self
        }
    }
}

/// Logical-name → config map, replaceable in bulk.
///
/// Lookups hand out `Arc<DatabaseConfig>` snapshots; a pooled connection
/// remembers the snapshot it was opened with, so the pool can tell whether
/// the config it belongs to is still the registered one.
#[derive(Debug, Default)]
pub struct DatabaseRegistry {
    entries: RwLock<HashMap<String, Arc<DatabaseConfig>>>,
}

impl DatabaseRegistry {
    pub fn new(configs: Vec<DatabaseConfig>) -> Self {
        let registry = Self::default();
        registry.replace_all(configs);
        registry
    }

    /// Look up the current config for a logical name.
    pub fn get(&self, logical_name: &str) -> DocwrapResult<Arc<DatabaseConfig>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(logical_name)
            .cloned()
            .ok_or_else(|| DocwrapError::UnknownDatabase(logical_name.to_string()))
    }

    pub fn contains(&self, logical_name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(logical_name)
    }

    /// Whether `config` is still the registered snapshot for its logical name.
    pub fn is_current(&self, config: &Arc<DatabaseConfig>) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&config.logical_name)
            .is_some_and(|current| Arc::ptr_eq(current, config))
    }

    /// Registered logical names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Replace every registration at once.
    ///
    /// Returns the logical names whose config changed or disappeared.
    /// Names registered with an identical config keep their existing
    /// snapshot, so their pooled connections stay current. If `configs`
    /// repeats a logical name, the last one wins.
    pub fn replace_all(&self, configs: Vec<DatabaseConfig>) -> Vec<String> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut next: HashMap<String, Arc<DatabaseConfig>> = HashMap::new();
        for config in configs {
            let snapshot = match entries.get(&config.logical_name) {
                Some(existing) if **existing == config => Arc::clone(existing),
                _ => Arc::new(config),
            };
            next.insert(snapshot.logical_name.clone(), snapshot);
        }

        let mut stale: Vec<String> = entries
            .iter()
            .filter(|(name, old)| {
                next.get(*name)
                    .is_none_or(|new| !Arc::ptr_eq(new, old))
            })
            .map(|(name, _)| name.clone())
            .collect();
        stale.sort();

        *entries = next;
        info!(
            registered = entries.len(),
            stale = stale.len(),
            "database registry replaced"
        );
        stale
    }
}
