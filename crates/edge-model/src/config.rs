//! Declarative configuration: devices, readings, outputs, and the knobs
//! that drive the scheduler and publisher.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::driver::Driver;

/// The transport tag carried on a device; selects both the planner's spec
/// shape and the reader the pool opens for that device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingType {
    Modbustcp,
    Modbusrtu,
    Rawserial,
    Rawtcp,
    Snmp,
    Mqtt,
    SmaSpeedwire,
    SysInfo,
}

/// Transport-specific addressing. Which variant applies is implied by the
/// device's `reading_type`; the resolver only ever touches `Network`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Address {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub unit_id: Option<u8>,
    pub mac: Option<String>,
    pub device: Option<String>,
    pub slave_id: Option<u8>,
    pub baudrate: Option<u32>,
    pub bytesize: Option<u8>,
    pub parity: Option<String>,
    pub stopbits: Option<u8>,
    pub community: Option<String>,
    pub version: Option<String>,
    pub serial: Option<String>,
    pub group: Option<String>,
}

fn default_timeout() -> f64 {
    2.0
}

/// One configured endpoint on the bus or network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub driver: String,
    pub reading_type: ReadingType,
    #[serde(default)]
    pub address: Address,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    pub vendor_id: Option<String>,
    pub min_read_interval: Option<f64>,
    pub read_delay: Option<f64>,
    pub register_offset: Option<i64>,
    pub conn_retry: Option<u32>,
    pub conn_check: Option<bool>,
}

fn default_enabled() -> bool {
    true
}

/// One entry in `readings`: a pointer at a device + variable, resolved by
/// the planner against the driver registry into a concrete `ReadingSpec`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingEntry {
    pub device: String,
    pub var: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// One entry in the output expression list (C6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub source: String,
    pub field: String,
    pub device: Option<String>,
    pub typecast: Option<String>,
}

/// The full, immutable-per-cycle configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node_id: String,
    pub devices: HashMap<String, DeviceConfig>,
    pub readings: HashMap<String, ReadingEntry>,
    #[serde(default)]
    pub output: Vec<OutputSpec>,
    pub read_interval: Option<f64>,
    #[serde(default)]
    pub read_roundtime: bool,
    #[serde(default = "default_push_throttle_delay")]
    pub push_throttle_delay: f64,
    #[serde(default = "default_push_timeout")]
    pub push_timeout: f64,
    /// Inline driver overrides; merged over the loaded driver registry at
    /// the driver level (field-by-field), per the config-sources precedence
    /// documented for A1.
    #[serde(default)]
    pub drivers: HashMap<String, Driver>,
    /// Calculated output fields are attributed to this synthetic device id,
    /// never emitted by the planner itself (§3 invariant).
    #[serde(default = "default_calc_vendor_id")]
    pub calc_vendor_id: String,
}

fn default_push_throttle_delay() -> f64 {
    10.0
}

fn default_push_timeout() -> f64 {
    60.0
}

fn default_calc_vendor_id() -> String {
    "_calc".to_string()
}

impl Address {
    /// Look up a field by name for a raw-schema `device_arg` component.
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "host" => self.host.clone(),
            "port" => self.port.map(|p| p.to_string()),
            "unit_id" => self.unit_id.map(|u| u.to_string()),
            "mac" => self.mac.clone(),
            "device" => self.device.clone(),
            "slave_id" => self.slave_id.map(|s| s.to_string()),
            _ => None,
        }
    }
}

impl Config {
    /// The reserved synthetic device id used for calculated outputs.
    pub const CALC_DEVICE_ID: &'static str = "_calc";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_device() {
        let json = serde_json::json!({
            "driver": "meter",
            "reading_type": "modbustcp",
            "address": {"host": "127.0.0.1", "port": 5020, "unit_id": 1}
        });
        let dev: DeviceConfig = serde_json::from_value(json).unwrap();
        assert!(dev.enabled);
        assert_eq!(dev.address.port, Some(5020));
    }
}
