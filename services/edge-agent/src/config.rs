//! Configuration loading (A1).
//!
//! JSON is the config format end to end, matching the wire shape the
//! cloud side and the driver files already use (§6). Three layers are
//! merged, base provisioning first:
//!
//! 1. The base provisioning file on disk (`/etc/edge-agent/config.json` by
//!    default) — the device/reading/output set as shipped or last synced.
//! 2. A cached cloud config blob (A3's key-value store), when present —
//!    the most recent config the cloud side pushed, surviving a restart
//!    even if the cloud is unreachable at startup.
//! 3. Inline driver overrides embedded in the config itself
//!    (`config.drivers`), merged field-by-field over the loaded driver
//!    registry — inline always wins.
//!
//! Driver JSON files live alongside the config, one file per driver id,
//! named `<driver_id>.json`.

use std::collections::HashMap;
use std::path::Path;

use edge_model::{Config, Driver, DriverRegistry};

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "parse error: {s}"),
            ConfigError::MissingField(s) => write!(f, "missing required field: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

pub fn load_base_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(format!("reading config file '{}': {e}", path.display())))?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Load every `<id>.json` in `dir` as a driver definition keyed by its
/// file stem.
pub fn load_driver_dir(dir: &Path) -> Result<DriverRegistry, ConfigError> {
    let mut drivers = HashMap::new();
    let entries = std::fs::read_dir(dir).map_err(|e| ConfigError::Io(format!("reading driver dir '{}': {e}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::Io(e.to_string()))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let id = match path.file_stem().and_then(|s| s.to_str()) {
            Some(id) => id.to_string(),
            None => continue,
        };
        let raw = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(format!("reading driver file '{}': {e}", path.display())))?;
        let driver: Driver = serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        drivers.insert(id, driver);
    }
    Ok(DriverRegistry { drivers })
}

/// Best-effort read of the cloud-cached driver blob from the key-value
/// store (A3). Returns `None` on any connection or decode failure — a
/// down cache falls back to the base/inline layers, it never blocks
/// startup or a reload.
pub fn load_cached_driver_registry(redis_url: &str) -> Option<DriverRegistry> {
    let mut store = crate::kvstore::KvStore::connect(redis_url).ok()?;
    let cached: Option<Config> = store.get(crate::kvstore::keys::cached_config()).ok()?;
    cached.map(|c| DriverRegistry { drivers: c.drivers })
}

/// Apply the three-layer precedence: base registry, then the cached
/// cloud registry (if any), then the config's inline overrides.
pub fn merged_driver_registry(base: &DriverRegistry, cached: Option<&DriverRegistry>, config: &Config) -> DriverRegistry {
    let mut registry = match cached {
        Some(cached) => base.merged_with(&cached.drivers),
        None => base.clone(),
    };
    registry = registry.merged_with(&config.drivers);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_overridden_by_cached_overridden_by_inline() {
        let mut base_fields = HashMap::new();
        base_fields.insert("p".to_string(), serde_json::json!({"register": 1}));
        let mut base = HashMap::new();
        base.insert("meter".to_string(), Driver { common: Default::default(), fields: base_fields });
        let base = DriverRegistry { drivers: base };

        let mut cached_fields = HashMap::new();
        cached_fields.insert("p".to_string(), serde_json::json!({"register": 2}));
        let mut cached = HashMap::new();
        cached.insert("meter".to_string(), Driver { common: Default::default(), fields: cached_fields });
        let cached = DriverRegistry { drivers: cached };

        let mut config = sample_config();
        let mut inline_fields = HashMap::new();
        inline_fields.insert("p".to_string(), serde_json::json!({"register": 3}));
        config.drivers.insert("meter".to_string(), Driver { common: Default::default(), fields: inline_fields });

        let merged = merged_driver_registry(&base, Some(&cached), &config);
        assert_eq!(merged.get("meter").unwrap().fields["p"]["register"], 3);
    }

    fn sample_config() -> Config {
        Config {
            node_id: "n".into(),
            devices: HashMap::new(),
            readings: HashMap::new(),
            output: vec![],
            read_interval: None,
            read_roundtime: false,
            push_throttle_delay: 10.0,
            push_timeout: 60.0,
            drivers: HashMap::new(),
            calc_vendor_id: "_calc".into(),
        }
    }
}
