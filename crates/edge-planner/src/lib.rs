//! Reading Planner (C4): turns `(config, driver registry)` into the set of
//! concrete per-device reading specs the reader pool executes each cycle.
//!
//! Pure and side-effect free — no I/O, no mutable state carried between
//! calls, so a cycle's plan can be computed once and handed to every
//! worker thread as an immutable `Arc`.

use std::collections::HashMap;

use edge_model::{Config, Driver, DriverRegistry, ReadingSpec};

/// One device's ignored-reading count, surfaced to the caller for logging
/// rather than swallowed silently (§7: "malformed but recoverable config
/// entries are skipped and counted, not treated as fatal").
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PlanStats {
    pub skipped_disabled_reading: usize,
    pub skipped_unknown_device: usize,
    pub skipped_disabled_device: usize,
    pub skipped_unknown_driver: usize,
    pub skipped_unknown_variable: usize,
}

pub struct Plan {
    pub by_device: HashMap<String, Vec<ReadingSpec>>,
    pub stats: PlanStats,
}

/// Build the plan. `drivers` should already reflect the A1 merge (cached
/// cloud config layered under the base set, inline `config.drivers`
/// layered on top) — this function only does the per-reading resolution
/// documented in §4.4, it does not itself apply config-source precedence.
pub fn plan(config: &Config, drivers: &DriverRegistry) -> Plan {
    let mut by_device: HashMap<String, Vec<ReadingSpec>> = HashMap::new();
    let mut stats = PlanStats::default();

    for (reading_id, entry) in &config.readings {
        if !entry.enabled {
            stats.skipped_disabled_reading += 1;
            continue;
        }

        let Some(device) = config.devices.get(&entry.device) else {
            tracing::error!(device = %entry.device, reading = %reading_id, "reading references undefined device, skipping");
            stats.skipped_unknown_device += 1;
            continue;
        };

        if !device.enabled {
            stats.skipped_disabled_device += 1;
            continue;
        }

        let Some(driver) = drivers.get(&device.driver) else {
            tracing::error!(driver = %device.driver, device = %entry.device, "driver not found, skipping device");
            stats.skipped_unknown_driver += 1;
            continue;
        };

        match build_spec(reading_id, entry, &entry.device, driver) {
            Some(spec) => {
                if spec.deprecated {
                    tracing::warn!(var = %entry.var, driver = %device.driver, "use of deprecated variable");
                }
                by_device.entry(entry.device.clone()).or_default().push(spec);
            }
            None => {
                tracing::warn!(var = %entry.var, driver = %device.driver, "variable not found in driver, or driver definition malformed");
                stats.skipped_unknown_variable += 1;
            }
        }
    }

    Plan { by_device, stats }
}

/// Merge `driver.common` under `driver.fields[var]`, plus the reading
/// identity fields, into one JSON object and deserialize it as a
/// `ReadingSpec`. Mirrors the field-merge order of the original planner:
/// common first, then the per-variable template on top.
fn build_spec(reading_id: &str, entry: &edge_model::ReadingEntry, device_id: &str, driver: &Driver) -> Option<ReadingSpec> {
    let field_template = driver.fields.get(&entry.var)?;

    let mut merged = serde_json::Map::new();
    merged.insert("reading".to_string(), serde_json::json!(reading_id));
    merged.insert("var".to_string(), serde_json::json!(entry.var));
    merged.insert("device".to_string(), serde_json::json!(device_id));
    for (k, v) in &driver.common {
        merged.insert(k.clone(), v.clone());
    }
    match field_template.as_object() {
        Some(obj) => {
            for (k, v) in obj {
                merged.insert(k.clone(), v.clone());
            }
        }
        None => return None,
    }

    serde_json::from_value(serde_json::Value::Object(merged)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_model::config::{Address, DeviceConfig, ReadingEntry, ReadingType};
    use std::collections::HashMap;

    fn sample_config() -> Config {
        let mut devices = HashMap::new();
        devices.insert(
            "meter1".to_string(),
            DeviceConfig {
                driver: "acme_meter".to_string(),
                reading_type: ReadingType::Modbustcp,
                address: Address { host: Some("10.0.0.5".into()), port: Some(502), ..Default::default() },
                enabled: true,
                timeout: 2.0,
                vendor_id: None,
                min_read_interval: None,
                read_delay: None,
                register_offset: None,
                conn_retry: None,
                conn_check: None,
            },
        );
        let mut readings = HashMap::new();
        readings.insert(
            "r1".to_string(),
            ReadingEntry { device: "meter1".to_string(), var: "ac_power".to_string(), enabled: true },
        );
        readings.insert(
            "r2".to_string(),
            ReadingEntry { device: "meter1".to_string(), var: "missing_var".to_string(), enabled: true },
        );

        Config {
            node_id: "node1".to_string(),
            devices,
            readings,
            output: vec![],
            read_interval: Some(60.0),
            read_roundtime: false,
            push_throttle_delay: 10.0,
            push_timeout: 60.0,
            drivers: HashMap::new(),
            calc_vendor_id: "_calc".to_string(),
        }
    }

    fn sample_drivers() -> DriverRegistry {
        let mut fields = HashMap::new();
        fields.insert("ac_power".to_string(), serde_json::json!({"register": "30775", "words": 2, "fncode": 4}));
        let mut drivers = HashMap::new();
        drivers.insert(
            "acme_meter".to_string(),
            Driver { common: serde_json::json!({"fncode": 3}).as_object().unwrap().clone(), fields },
        );
        DriverRegistry { drivers }
    }

    #[test]
    fn builds_one_spec_and_skips_unknown_variable() {
        let config = sample_config();
        let drivers = sample_drivers();
        let plan = plan(&config, &drivers);

        assert_eq!(plan.stats.skipped_unknown_variable, 1);
        let specs = plan.by_device.get("meter1").unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].var, "ac_power");
        // field template's fncode (4) wins over common's (3)
        assert_eq!(specs[0].fncode, Some(4));
    }

    #[test]
    fn disabled_device_drops_all_its_readings() {
        let mut config = sample_config();
        config.devices.get_mut("meter1").unwrap().enabled = false;
        let plan = plan(&config, &sample_drivers());
        assert!(plan.by_device.is_empty());
        assert_eq!(plan.stats.skipped_disabled_device, 2);
    }
}
