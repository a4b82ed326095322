//! The driver registry and the merged `ReadingSpec` the planner produces.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One driver JSON document: a `common` block merged into every field, plus
/// the per-variable field templates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Driver {
    #[serde(default)]
    pub common: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub fields: HashMap<String, serde_json::Value>,
}

/// The loaded driver registry, keyed by driver id.
#[derive(Debug, Clone, Default)]
pub struct DriverRegistry {
    pub drivers: HashMap<String, Driver>,
}

impl DriverRegistry {
    pub fn get(&self, driver_id: &str) -> Option<&Driver> {
        self.drivers.get(driver_id)
    }

    /// Merge inline config overrides over the loaded registry, field by
    /// field within a driver (inline wins), per the A1 config-sources
    /// precedence.
    pub fn merged_with(&self, overrides: &HashMap<String, Driver>) -> DriverRegistry {
        let mut merged = self.drivers.clone();
        for (id, over) in overrides {
            let entry = merged.entry(id.clone()).or_default();
            for (k, v) in &over.common {
                entry.common.insert(k.clone(), v.clone());
            }
            for (k, v) in &over.fields {
                entry.fields.insert(k.clone(), v.clone());
            }
        }
        DriverRegistry { drivers: merged }
    }
}

/// Either a request/device-arg literal, or a CRC marker, in request
/// generation order (§4.2.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestComponent {
    /// Pull a byte sequence from the per-reading spec field named `field`.
    Input {
        field: String,
        bytes: usize,
        #[serde(default)]
        big_endian: bool,
    },
    /// Pull a byte sequence from the per-device address block.
    DeviceArg {
        field: String,
        bytes: usize,
        #[serde(default)]
        big_endian: bool,
    },
    /// A literal: `0x…` hex, or a UTF-8 string otherwise.
    Const { value: String },
    /// CRC-16 (poly 0xA001, little-endian output) over all bytes emitted
    /// so far in this request.
    Crc,
}

/// `pos`/`length` in the response schema: a constant, or derived from an
/// input field's value times a multiplier plus an offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PosLen {
    Const(i64),
    FromInput {
        from_input: String,
        #[serde(default = "one")]
        multiplier: f64,
        #[serde(default)]
        offset: f64,
    },
}

fn one() -> f64 {
    1.0
}

/// The full request/response schema for raw-serial / raw-TCP readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub request: Vec<RequestComponent>,
    pub pos: PosLen,
    pub length: PosLen,
    #[serde(default)]
    pub check_crc16: bool,
    pub resp_template: Option<String>,
    pub resp_termination: Option<String>,
}

/// The merged per-reading, per-cycle parameter set consumed by a transport
/// reader. Only the fields relevant to the device's `reading_type` are
/// populated; the rest stay `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadingSpec {
    pub reading: String,
    pub var: String,
    pub device: String,
    #[serde(default)]
    pub deprecated: bool,

    // Modbus (TCP / RTU)
    pub register: Option<String>,
    pub words: Option<u16>,
    pub fncode: Option<u8>,
    pub order: Option<String>,

    // Raw serial / raw TCP
    pub schema: Option<Schema>,

    // SNMP
    pub oid: Option<String>,

    // MQTT subscribe
    pub topic: Option<String>,

    // SMA Speedwire
    pub channel: Option<u32>,
    pub obis_type: Option<u8>,

    // System introspection
    pub module: Option<String>,
    pub method: Option<String>,
    pub args: Option<Vec<serde_json::Value>>,
    pub keypath: Option<Vec<String>>,

    // Response post-processing, shared across transports
    pub parse_as: Option<String>,
    pub datatype: Option<String>,
    pub valuemap: Option<HashMap<String, serde_json::Value>>,
    pub multiplier: Option<f64>,
    pub offset: Option<f64>,
    pub typecast: Option<String>,

    /// Catch-all for driver-declared fields not named above (e.g. a custom
    /// numeric field a raw-schema `input` component references by name).
    /// The raw-serial/raw-TCP request generator reads from this map.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ReadingSpec {
    /// Look up a field by name for a raw-schema `input` component: checks
    /// the modeled fields first (so `words`, `register`, etc. are usable
    /// without duplicating them into `extra`), then the catch-all map.
    pub fn field(&self, name: &str) -> Option<serde_json::Value> {
        match name {
            "register" => self.register.clone().map(serde_json::Value::String),
            "words" => self.words.map(|w| serde_json::json!(w)),
            "fncode" => self.fncode.map(|f| serde_json::json!(f)),
            _ => self.extra.get(name).cloned(),
        }
    }
}

/// Parse a `register`-style field that may be a decimal or `0x`-prefixed /
/// bare hex string (§8 boundary behavior: both `"0x1A"` and `"1A"` parse as
/// hex when the value is not a plain base-10 literal).
pub fn parse_register(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    if let Ok(v) = trimmed.parse::<i64>() {
        return Some(v);
    }
    i64::from_str_radix(trimmed, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_and_hex_registers() {
        assert_eq!(parse_register("30775"), Some(30775));
        assert_eq!(parse_register("0x1A"), Some(0x1A));
        assert_eq!(parse_register("1A"), Some(0x1A));
    }

    #[test]
    fn inline_overrides_win_field_by_field() {
        let mut base = HashMap::new();
        let mut fields = HashMap::new();
        fields.insert("ac_power".to_string(), serde_json::json!({"register": 1}));
        fields.insert("kwh".to_string(), serde_json::json!({"register": 2}));
        base.insert(
            "meter".to_string(),
            Driver {
                common: Default::default(),
                fields,
            },
        );
        let registry = DriverRegistry { drivers: base };

        let mut overrides = HashMap::new();
        let mut over_fields = HashMap::new();
        over_fields.insert("ac_power".to_string(), serde_json::json!({"register": 99}));
        overrides.insert(
            "meter".to_string(),
            Driver {
                common: Default::default(),
                fields: over_fields,
            },
        );

        let merged = registry.merged_with(&overrides);
        let meter = merged.get("meter").unwrap();
        assert_eq!(meter.fields["ac_power"]["register"], 99);
        assert_eq!(meter.fields["kwh"]["register"], 2);
    }
}
