//! Cache key derivation.
//!
//! A key names one read result: which logical database, which collection,
//! which operation, and the query shape that produced it. The shape is
//! serialized canonically (object keys sorted at every depth) and hashed,
//! so structurally equal options always produce the same key regardless of
//! how the caller built them.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Stateless key derivation.
pub struct KeyCodec;

impl KeyCodec {
    /// Derive the cache key for `operation` on `database`/`collection`.
    ///
    /// Format: `{database}/{collection}/{operation}/{sha256 hex}`. Names are
    /// escaped so a `/` inside a name cannot shift the dimensions.
    pub fn derive(database: &str, collection: &str, operation: &str, shape: &Value) -> String {
        let mut canonical = String::new();
        write_canonical(shape, &mut canonical);
        let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
        format!(
            "{}/{}/{}/{}",
            escape(database),
            escape(collection),
            escape(operation),
            digest
        )
    }

    /// Prefix shared by every key derived for `database`.
    pub fn database_prefix(database: &str) -> String {
        format!("{}/", escape(database))
    }

    /// Canonical text form of a query shape, as hashed by [`derive`](Self::derive).
    pub fn canonical(shape: &Value) -> String {
        let mut out = String::new();
        write_canonical(shape, &mut out);
        out
    }
}

fn escape(name: &str) -> String {
    name.replace('%', "%25").replace('/', "%2F")
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
