//! docwrap.toml configuration parser.
//!
//! ```toml
//! [tunables]
//! pooling = true
//! caching = true
//! default_cache_ttl = 60
//! pool_limit = 10
//! sweep_interval = "1s"
//!
//! [retry]
//! max_attempts = 5
//! base_delay = "100ms"
//! max_delay = "5s"
//!
//! [databases.local]
//! address = "127.0.0.1"
//! port = 27017
//! name = "local"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{DocwrapError, DocwrapResult};
use crate::registry::{Credentials, DatabaseConfig};

/// Default store port when a database entry omits one.
pub const DEFAULT_PORT: u16 = 27017;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocwrapConfig {
    #[serde(default)]
    pub tunables: TunablesConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunablesConfig {
    pub pooling: Option<bool>,
    pub caching: Option<bool>,
    pub default_cache_ttl: Option<u32>,
    pub pool_limit: Option<usize>,
    pub sweep_interval: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub base_delay: Option<String>,
    pub max_delay: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseEntry {
    pub address: String,
    pub port: Option<u16>,
    /// Physical database name; defaults to the logical name.
    pub name: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Resolved process-wide tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tunables {
    /// Return released connections to the idle stack (default: true).
    pub pooling: bool,
    /// Serve cache-enabled reads from the expiring cache (default: true).
    pub caching: bool,
    /// TTL in ticks used when a call does not give one (default: 60).
    pub default_cache_ttl: u32,
    /// Maximum idle connections kept per logical database (default: 10).
    pub pool_limit: usize,
    /// Length of one cache tick (default: 1s).
    pub sweep_interval: Duration,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            pooling: true,
            caching: true,
            default_cache_ttl: 60,
            pool_limit: 10,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

/// Bounded exponential backoff for connection establishment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connect attempts before giving up, including the first (default: 5).
    pub max_attempts: u32,
    /// Delay after the first failed attempt (default: 100ms).
    pub base_delay: Duration,
    /// Upper bound on any single delay (default: 5s).
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl DocwrapConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a config with a single local database.
    pub fn scaffold(logical_name: &str) -> Self {
        let mut databases = BTreeMap::new();
        databases.insert(
            logical_name.to_string(),
            DatabaseEntry {
                address: "127.0.0.1".to_string(),
                port: Some(DEFAULT_PORT),
                name: Some(logical_name.to_string()),
                username: None,
                password: None,
            },
        );
        Self {
            tunables: TunablesConfig {
                pooling: Some(true),
                caching: Some(true),
                default_cache_ttl: Some(60),
                pool_limit: Some(10),
                sweep_interval: Some("1s".to_string()),
            },
            retry: RetryConfig {
                max_attempts: Some(5),
                base_delay: Some("100ms".to_string()),
                max_delay: Some("5s".to_string()),
            },
            databases,
        }
    }

    pub fn tunables(&self) -> DocwrapResult<Tunables> {
        let defaults = Tunables::default();
        let t = &self.tunables;
        let sweep_interval = match &t.sweep_interval {
            Some(s) => parse_duration(s).ok_or_else(|| {
                DocwrapError::Config(format!("invalid sweep_interval: {s:?}"))
            })?,
            None => defaults.sweep_interval,
        };
        if sweep_interval.is_zero() {
            return Err(DocwrapError::Config(
                "sweep_interval must be greater than zero".to_string(),
            ));
        }
        Ok(Tunables {
            pooling: t.pooling.unwrap_or(defaults.pooling),
            caching: t.caching.unwrap_or(defaults.caching),
            default_cache_ttl: t
                .default_cache_ttl
                .filter(|ttl| *ttl > 0)
                .unwrap_or(defaults.default_cache_ttl),
            pool_limit: t.pool_limit.unwrap_or(defaults.pool_limit),
            sweep_interval,
        })
    }

    pub fn retry_policy(&self) -> DocwrapResult<RetryPolicy> {
        let defaults = RetryPolicy::default();
        let r = &self.retry;
        let max_attempts = r.max_attempts.unwrap_or(defaults.max_attempts);
        if max_attempts == 0 {
            return Err(DocwrapError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        let base_delay = match &r.base_delay {
            Some(s) => parse_duration(s)
                .ok_or_else(|| DocwrapError::Config(format!("invalid base_delay: {s:?}")))?,
            None => defaults.base_delay,
        };
        let max_delay = match &r.max_delay {
            Some(s) => parse_duration(s)
                .ok_or_else(|| DocwrapError::Config(format!("invalid max_delay: {s:?}")))?,
            None => defaults.max_delay,
        };
        Ok(RetryPolicy {
            max_attempts,
            base_delay,
            max_delay: max_delay.max(base_delay),
        })
    }

    /// Resolve every `[databases.*]` entry into a registrable config.
    pub fn database_configs(&self) -> DocwrapResult<Vec<DatabaseConfig>> {
        self.databases
            .iter()
            .map(|(logical, entry)| entry.resolve(logical))
            .collect()
    }
}

impl DatabaseEntry {
    fn resolve(&self, logical: &str) -> DocwrapResult<DatabaseConfig> {
        if self.address.trim().is_empty() {
            return Err(DocwrapError::Config(format!(
                "database {logical:?} has an empty address"
            )));
        }
        let port = self.port.unwrap_or(DEFAULT_PORT);
        if port == 0 {
            return Err(DocwrapError::Config(format!(
                "database {logical:?} has port 0"
            )));
        }
        let credentials = match (&self.username, &self.password) {
            (None, None) => None,
            (user, pass) => Some(Credentials {
                username: user.clone().unwrap_or_default(),
                password: pass.clone().unwrap_or_default(),
            }),
        };
        Ok(DatabaseConfig {
            logical_name: logical.to_string(),
            address: self.address.clone(),
            port,
            database: self.name.clone().unwrap_or_else(|| logical.to_string()),
            credentials,
        })
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_empty_uses_defaults() {
        let config = DocwrapConfig::from_toml_str("").unwrap();
        assert_eq!(config.tunables().unwrap(), Tunables::default());
        assert_eq!(config.retry_policy().unwrap(), RetryPolicy::default());
        assert!(config.database_configs().unwrap().is_empty());
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[tunables]
pooling = false
caching = true
default_cache_ttl = 30
pool_limit = 4
sweep_interval = "250ms"

[retry]
max_attempts = 3
base_delay = "10ms"
max_delay = "1s"

[databases.local]
address = "10.0.0.5"
port = 27018
name = "app"
username = "svc"
password = "hunter2"

[databases.test]
address = "127.0.0.1"
"#;
        let config = DocwrapConfig::from_toml_str(toml_str).unwrap();
        let tunables = config.tunables().unwrap();
        assert!(!tunables.pooling);
        assert_eq!(tunables.default_cache_ttl, 30);
        assert_eq!(tunables.pool_limit, 4);
        assert_eq!(tunables.sweep_interval, Duration::from_millis(250));

        let retry = config.retry_policy().unwrap();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.base_delay, Duration::from_millis(10));

        let dbs = config.database_configs().unwrap();
        assert_eq!(dbs.len(), 2);
        let local = &dbs[0];
        assert_eq!(local.logical_name, "local");
        assert_eq!(local.database, "app");
        assert_eq!(local.port, 27018);
        assert_eq!(local.credentials.as_ref().unwrap().username, "svc");

        let test = &dbs[1];
        assert_eq!(test.database, "test");
        assert_eq!(test.port, DEFAULT_PORT);
        assert!(test.credentials.is_none());
    }

    #[test]
    fn zero_ttl_falls_back_to_default() {
        let config = DocwrapConfig::from_toml_str("[tunables]\ndefault_cache_ttl = 0\n").unwrap();
        assert_eq!(config.tunables().unwrap().default_cache_ttl, 60);
    }

    #[test]
    fn rejects_zero_attempts() {
        let config = DocwrapConfig::from_toml_str("[retry]\nmax_attempts = 0\n").unwrap();
        assert!(matches!(config.retry_policy(), Err(DocwrapError::Config(_))));
    }

    #[test]
    fn rejects_bad_interval() {
        let config =
            DocwrapConfig::from_toml_str("[tunables]\nsweep_interval = \"soon\"\n").unwrap();
        assert!(config.tunables().is_err());
    }

    #[test]
    fn rejects_empty_address() {
        let config =
            DocwrapConfig::from_toml_str("[databases.local]\naddress = \"\"\n").unwrap();
        assert!(config.database_configs().is_err());
    }

    #[test]
    fn password_only_still_authenticates() {
        let config = DocwrapConfig::from_toml_str(
            "[databases.local]\naddress = \"db\"\npassword = \"pw\"\n",
        )
        .unwrap();
        let dbs = config.database_configs().unwrap();
        let creds = dbs[0].credentials.as_ref().unwrap();
        assert_eq!(creds.username, "");
        assert_eq!(creds.password, "pw");
    }

    #[test]
    fn scaffold_round_trips_through_toml() {
        let config = DocwrapConfig::scaffold("local");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("[databases.local]"));
        let parsed = DocwrapConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed.database_configs().unwrap()[0].address, "127.0.0.1");
    }

    #[test]
    fn from_file_reads_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[databases.disk]\naddress = \"db.internal\"").unwrap();
        let config = DocwrapConfig::from_file(file.path()).unwrap();
        assert_eq!(config.database_configs().unwrap()[0].address, "db.internal");
    }

    #[test]
    fn from_file_missing_reports_path() {
        let err = DocwrapConfig::from_file(Path::new("/nonexistent/docwrap.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/docwrap.toml"));
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("1m"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_duration("soon"), None);
    }
}
