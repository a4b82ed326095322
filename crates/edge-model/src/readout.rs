//! The readout produced once per reading cycle.

use std::collections::BTreeMap;

use serde_json::{Map, Value as Json};

use crate::value::Value;

/// One device's contribution to a readout: the synthetic device-id key,
/// an optional vendor id, and the var→value map. Kept ordered for
/// deterministic serialization in tests.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReading {
    pub device_id: String,
    pub vendor_id: Option<String>,
    pub fields: BTreeMap<String, Value>,
}

impl DeviceReading {
    pub fn new(device_id: impl Into<String>) -> Self {
        DeviceReading {
            device_id: device_id.into(),
            vendor_id: None,
            fields: BTreeMap::new(),
        }
    }

    fn to_json(&self) -> Json {
        let mut map = Map::new();
        map.insert("_d".to_string(), Json::String(self.device_id.clone()));
        if let Some(vid) = &self.vendor_id {
            map.insert("_vid".to_string(), Json::String(vid.clone()));
        }
        for (k, v) in &self.fields {
            map.insert(k.clone(), serde_json::to_value(v).unwrap());
        }
        Json::Object(map)
    }

    fn from_json(json: &Json) -> Option<Self> {
        let obj = json.as_object()?;
        let device_id = obj.get("_d")?.as_str()?.to_string();
        let vendor_id = obj.get("_vid").and_then(|v| v.as_str()).map(str::to_string);
        let mut fields = BTreeMap::new();
        for (k, v) in obj {
            if k == "_d" || k == "_vid" {
                continue;
            }
            if let Some(value) = json_to_value(v) {
                fields.insert(k.clone(), value);
            }
        }
        Some(DeviceReading { device_id, vendor_id, fields })
    }
}

fn json_to_value(v: &Json) -> Option<Value> {
    if let Some(s) = v.as_str() {
        return Some(Value::Str(s.to_string()));
    }
    if let Some(b) = v.as_bool() {
        return Some(Value::Bool(b));
    }
    if let Some(i) = v.as_i64() {
        return Some(Value::Int(i));
    }
    v.as_f64().map(Value::Float)
}

/// Metadata attached to a readout: build identity, timing, and (stamped
/// later by the publisher) config attribution and clock offset.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub snap_rev: Option<i64>,
    pub reading_duration: f64,
    pub config_id: Option<String>,
    pub reading_offset: Option<i64>,
}

impl Metadata {
    fn to_json(&self) -> Json {
        let mut map = Map::new();
        if let Some(rev) = self.snap_rev {
            map.insert("snap_rev".to_string(), Json::from(rev));
        }
        map.insert("reading_duration".to_string(), Json::from(self.reading_duration));
        if let Some(cid) = &self.config_id {
            map.insert("config_id".to_string(), Json::String(cid.clone()));
        }
        if let Some(off) = self.reading_offset {
            map.insert("reading_offset".to_string(), Json::from(off));
        }
        Json::Object(map)
    }

    fn from_json(json: &Json) -> Self {
        let obj = match json.as_object() {
            Some(o) => o,
            None => return Metadata::default(),
        };
        Metadata {
            snap_rev: obj.get("snap_rev").and_then(|v| v.as_i64()),
            reading_duration: obj.get("reading_duration").and_then(|v| v.as_f64()).unwrap_or(0.0),
            config_id: obj.get("config_id").and_then(|v| v.as_str()).map(str::to_string),
            reading_offset: obj.get("reading_offset").and_then(|v| v.as_i64()),
        }
    }
}

/// One record emitted per reading cycle: exactly one `t`, a sequence of
/// per-device field maps, and metadata (§3 invariant).
#[derive(Debug, Clone)]
pub struct Readout {
    pub t: i64,
    pub r: Vec<DeviceReading>,
    pub m: Metadata,
}

impl Readout {
    /// Serialize to the compact wire shape documented in §6.
    pub fn to_json(&self) -> Json {
        let mut map = Map::new();
        map.insert("t".to_string(), Json::from(self.t));
        map.insert(
            "r".to_string(),
            Json::Array(self.r.iter().map(DeviceReading::to_json).collect()),
        );
        map.insert("m".to_string(), self.m.to_json());
        Json::Object(map)
    }

    pub fn to_compact_string(&self) -> String {
        self.to_json().to_string()
    }

    /// Reconstruct a `Readout` from its wire JSON shape, for the durable
    /// spill queue's round trip through SQLite.
    pub fn from_json(json: &Json) -> Option<Self> {
        let obj = json.as_object()?;
        let t = obj.get("t")?.as_i64()?;
        let r = obj
            .get("r")?
            .as_array()?
            .iter()
            .map(DeviceReading::from_json)
            .collect::<Option<Vec<_>>>()?;
        let m = obj.get("m").map(Metadata::from_json).unwrap_or_default();
        Some(Readout { t, r, m })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_matches_contract() {
        let mut dr = DeviceReading::new("meter1");
        dr.fields.insert("ac_power".into(), Value::Int(12345));
        let readout = Readout {
            t: 1_700_000_000,
            r: vec![dr],
            m: Metadata {
                snap_rev: Some(42),
                reading_duration: 0.25,
                config_id: Some("abc123".into()),
                reading_offset: Some(1),
            },
        };
        let json = readout.to_json();
        assert_eq!(json["t"], 1_700_000_000);
        assert_eq!(json["r"][0]["_d"], "meter1");
        assert_eq!(json["r"][0]["ac_power"], 12345);
        assert_eq!(json["m"]["config_id"], "abc123");
    }

    #[test]
    fn no_vendor_id_key_when_absent() {
        let dr = DeviceReading::new("meter1");
        let json = dr.to_json();
        assert!(json.get("_vid").is_none());
    }
}
