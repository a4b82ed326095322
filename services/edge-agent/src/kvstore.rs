//! Key-value cache (A3): a thin Redis-backed store for cross-process state
//! that must survive a process restart but not a factory reset — cached
//! driver/config blobs, the MAC→host resolver fallback, last-readings
//! snapshots shared with other local consumers.

use redis::Commands;

#[derive(Debug)]
pub enum KvError {
    Connection(redis::RedisError),
    Encoding(serde_json::Error),
}

impl std::fmt::Display for KvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KvError::Connection(e) => write!(f, "kvstore connection error: {e}"),
            KvError::Encoding(e) => write!(f, "kvstore encoding error: {e}"),
        }
    }
}

impl std::error::Error for KvError {}

impl From<redis::RedisError> for KvError {
    fn from(e: redis::RedisError) -> Self {
        KvError::Connection(e)
    }
}

/// Key prefixes, mirroring the layout the environment scanner and
/// resolver expect.
pub mod keys {
    pub const LAST_READINGS: &str = "last_readings";
    pub const LAST_READINGS_TS: &str = "last_readings_ts";
    pub fn mac_host(mac: &str) -> String {
        format!("net:mac:{mac}")
    }
    pub fn cached_config() -> &'static str {
        "config:cached"
    }
}

pub struct KvStore {
    conn: redis::Connection,
}

impl KvStore {
    pub fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection()?;
        Ok(KvStore { conn })
    }

    pub fn get<T: serde::de::DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>, KvError> {
        let raw: Option<String> = self.conn.get(key)?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s).map_err(KvError::Encoding)?)),
            None => Ok(None),
        }
    }

    /// Set `key`, skipping the write when the cached value already
    /// matches (mirrors the original store's no-op-on-unchanged
    /// optimization, which keeps keyspace-notification churn down).
    pub fn set<T: serde::Serialize + serde::de::DeserializeOwned + PartialEq>(&mut self, key: &str, value: &T) -> Result<(), KvError> {
        if let Some(existing) = self.get::<T>(key)? {
            if existing == *value {
                return Ok(());
            }
        }
        let encoded = serde_json::to_string(value).map_err(KvError::Encoding)?;
        let _: () = self.conn.set(key, encoded)?;
        Ok(())
    }
}

pub struct KvStoreCache(pub std::sync::Mutex<KvStore>);

impl edge_resolver::MacHostCache for KvStoreCache {
    fn get(&self, mac: &str) -> Option<String> {
        self.0.lock().unwrap().get::<String>(&keys::mac_host(mac)).ok().flatten()
    }
}

/// Rescan requests have no local scanner to hand off to (out of core
/// scope, same as the resolver crate's own note); log so a persistently
/// mismatched device is at least visible in the agent's own logs.
pub struct LoggingRescanTrigger;

impl edge_resolver::RescanTrigger for LoggingRescanTrigger {
    fn trigger_rescan(&self) {
        tracing::warn!("host resolver requested a network rescan");
    }
}
