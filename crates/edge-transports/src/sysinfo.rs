//! System-introspection reader (§4.2.7): no device on the wire, just a
//! platform metric call traversed by a key path.

use edge_codec::RawInput;
use edge_model::config::DeviceConfig;
use edge_model::ReadingSpec;

use crate::{DeviceReader, ReaderError};

pub struct SysInfoReader;

impl SysInfoReader {
    pub fn open(_device: &DeviceConfig) -> Result<Self, ReaderError> {
        Ok(SysInfoReader)
    }

    fn invoke(&self, module: &str, method: &str) -> Result<serde_json::Value, ReaderError> {
        match (module, method) {
            ("system", "loadavg") => {
                let raw = std::fs::read_to_string("/proc/loadavg").map_err(|e| ReaderError::TransientIo(e.to_string()))?;
                let parts: Vec<&str> = raw.split_whitespace().collect();
                Ok(serde_json::json!({
                    "load1": parts.first().and_then(|s| s.parse::<f64>().ok()),
                    "load5": parts.get(1).and_then(|s| s.parse::<f64>().ok()),
                    "load15": parts.get(2).and_then(|s| s.parse::<f64>().ok()),
                }))
            }
            ("system", "meminfo") => {
                let raw = std::fs::read_to_string("/proc/meminfo").map_err(|e| ReaderError::TransientIo(e.to_string()))?;
                let mut map = serde_json::Map::new();
                for line in raw.lines() {
                    if let Some((key, value)) = line.split_once(':') {
                        let kb: i64 = value.trim().trim_end_matches(" kB").trim().parse().unwrap_or(0);
                        map.insert(key.to_string(), serde_json::json!(kb));
                    }
                }
                Ok(serde_json::Value::Object(map))
            }
            _ => Err(ReaderError::BadSpec(format!("unknown introspection call {module}.{method}"))),
        }
    }
}

fn traverse(value: &serde_json::Value, keypath: &[String]) -> Option<serde_json::Value> {
    let mut cur = value.clone();
    for key in keypath {
        cur = if let Ok(idx) = key.parse::<usize>() {
            cur.get(idx)?.clone()
        } else {
            cur.get(key)?.clone()
        };
    }
    Some(cur)
}

impl DeviceReader for SysInfoReader {
    fn read(&mut self, spec: &ReadingSpec) -> Result<Option<RawInput>, ReaderError> {
        let module = spec.module.as_deref().ok_or_else(|| ReaderError::BadSpec("sysinfo reading missing module".into()))?;
        let method = spec.method.as_deref().ok_or_else(|| ReaderError::BadSpec("sysinfo reading missing method".into()))?;
        let result = self.invoke(module, method)?;
        let leaf = match &spec.keypath {
            Some(kp) => traverse(&result, kp),
            None => Some(result),
        };
        Ok(leaf.map(|v| RawInput::Str(v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))))
    }
}
