//! Pure value coercion: raw bytes/strings → typed [`Value`].
//!
//! No I/O, no global state. `process_reading` never panics and never
//! returns an error — a malformed spec or unparsable payload yields `None`
//! and the caller logs and moves on (§4.1, §7 "Bad spec").

pub mod crc16;

use edge_model::value::Value;
use edge_model::ReadingSpec;

/// The raw payload a transport reader hands to the codec, before
/// `parse_as` is applied.
#[derive(Debug, Clone)]
pub enum RawInput {
    Bytes(Vec<u8>),
    Str(String),
}

/// Canonical datatype → format-char table (§4.1, §9: historical tables
/// disagree on `int16`; this is the one to use).
fn format_char(datatype: &str) -> Option<char> {
    match datatype {
        "int16" => Some('h'),
        "uint16" => Some('H'),
        "int32" => Some('i'),
        "uint32" => Some('I'),
        "int64" => Some('q'),
        "uint64" => Some('Q'),
        "float" | "single" => Some('f'),
        "double" => Some('d'),
        _ => None,
    }
}

/// Byte-length fallback when no `datatype` is declared.
fn fallback_format_char(len: usize) -> Option<char> {
    match len {
        1 => Some('B'),
        2 => Some('H'),
        4 => Some('I'),
        8 => Some('d'),
        _ => None,
    }
}

/// Unpack a big-endian byte slice per a format character. Returns `None`
/// if the slice length doesn't match the format.
fn unpack_be(bytes: &[u8], fmt: char) -> Option<f64> {
    macro_rules! take {
        ($ty:ty, $n:expr) => {{
            let arr: [u8; $n] = bytes.try_into().ok()?;
            Some(<$ty>::from_be_bytes(arr) as f64)
        }};
    }
    match fmt {
        'B' => take!(u8, 1),
        'h' => take!(i16, 2),
        'H' => take!(u16, 2),
        'i' => take!(i32, 4),
        'I' => take!(u32, 4),
        'q' => take!(i64, 8),
        'Q' => take!(u64, 8),
        'f' => take!(f32, 4),
        _ => None,
    }
}

/// `double` is unpacked separately from [`unpack_be`] since its format
/// character `'d'` would otherwise need its own macro arm.
fn unpack_double(bytes: &[u8]) -> Option<f64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(f64::from_be_bytes(arr))
}

fn lowercase_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(2 + bytes.len() * 2);
    s.push_str("0x");
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

fn json_to_value(v: &serde_json::Value) -> Option<Value> {
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

fn apply_typecast(numeric: f64, string: Option<&str>, typecast: Option<&str>) -> Option<Value> {
    match typecast {
        Some("int") => Some(Value::Int(numeric as i64)),
        Some("float") => Some(Value::Float(numeric)),
        Some("str") => Some(Value::Str(string.map(str::to_string).unwrap_or_else(|| numeric.to_string()))),
        Some("bool") => Some(Value::Bool(numeric != 0.0)),
        Some(_) => None,
        None => Some(Value::Float(numeric)),
    }
}

/// Convert a raw reading (bytes or string) into a typed value per the
/// §4.1 precedence: valuemap → numeric unpack → multiplier/offset →
/// typecast. Precedence is not configurable by callers.
pub fn process_reading(raw: RawInput, spec: &ReadingSpec) -> Option<Value> {
    // Step 1: parse_as reinterprets the raw payload before anything else.
    let raw = match (&raw, spec.parse_as.as_deref()) {
        (RawInput::Bytes(b), Some("str")) => RawInput::Str(String::from_utf8(b.clone()).ok()?),
        (RawInput::Bytes(b), Some("hex")) => {
            let ascii = String::from_utf8(b.clone()).ok()?;
            let hex = ascii.trim().trim_start_matches("0x");
            RawInput::Bytes(hex_decode(hex)?)
        }
        (other, _) => other.clone(),
    };

    match raw {
        RawInput::Bytes(bytes) => {
            // Step 2: bytes valuemap short-circuits everything else.
            if let Some(map) = &spec.valuemap {
                let key = lowercase_hex(&bytes);
                if let Some(mapped) = map.get(&key) {
                    return json_to_value(mapped);
                }
            }
            // Step 3: numeric unpack, big-endian.
            let fmt = spec
                .datatype
                .as_deref()
                .and_then(format_char)
                .or_else(|| fallback_format_char(bytes.len()))?;
            let numeric = if fmt == 'd' {
                unpack_double(&bytes)?
            } else {
                unpack_be(&bytes, fmt)?
            };
            // Step 5: multiplier/offset, only for non-str/bool typecasts.
            let numeric = apply_mult_offset(numeric, spec);
            apply_typecast(numeric, None, spec.typecast.as_deref())
        }
        RawInput::Str(s) => {
            // Step 4: string valuemap, exact match.
            if let Some(map) = &spec.valuemap {
                if let Some(mapped) = map.get(&s) {
                    return json_to_value(mapped);
                }
            }
            match spec.typecast.as_deref() {
                Some("str") => Some(Value::Str(s)),
                Some("bool") => s.parse::<bool>().ok().map(Value::Bool).or_else(|| {
                    Value::Str(s).as_bool().map(Value::Bool)
                }),
                _ => {
                    let numeric: f64 = s.trim().parse().ok()?;
                    let numeric = apply_mult_offset(numeric, spec);
                    apply_typecast(numeric, Some(""), spec.typecast.as_deref())
                }
            }
        }
    }
}

fn apply_mult_offset(numeric: f64, spec: &ReadingSpec) -> f64 {
    if matches!(spec.typecast.as_deref(), Some("str") | Some("bool")) {
        return numeric;
    }
    let with_mult = match spec.multiplier {
        Some(m) => numeric * m,
        None => numeric,
    };
    match spec.offset {
        Some(o) => with_mult + o,
        None => with_mult,
    }
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_model::driver::ReadingSpec;

    fn spec(f: impl FnOnce(&mut ReadingSpec)) -> ReadingSpec {
        let mut s = ReadingSpec::default();
        f(&mut s);
        s
    }

    #[test]
    fn scenario_1_single_modbustcp_int32() {
        let s = spec(|s| {
            s.datatype = Some("int32".into());
            s.multiplier = Some(1.0);
        });
        let bytes = vec![0x00, 0x00, 0x30, 0x39]; // 12345
        let v = process_reading(RawInput::Bytes(bytes), &s).unwrap();
        assert_eq!(v, Value::Float(12345.0));
    }

    #[test]
    fn scenario_2_lsr_float_from_reversed_words() {
        let s = spec(|s| {
            s.datatype = Some("float".into());
        });
        // words [0x489E, 0xCC5A] already reversed by caller before codec sees bytes
        let bytes = vec![0x48, 0x9E, 0xCC, 0x5A];
        let v = process_reading(RawInput::Bytes(bytes), &s).unwrap();
        match v {
            Value::Float(f) => assert!((f - 325218.8125).abs() < 1e-3),
            other => panic!("expected float, got {:?}", other),
        }
    }

    #[test]
    fn scenario_3_valuemap_short_circuits_multiplier() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert("0x0001".to_string(), serde_json::json!("running"));
        map.insert("0x0002".to_string(), serde_json::json!("stopped"));
        let s = spec(|s| {
            s.datatype = Some("uint16".into());
            s.valuemap = Some(map);
            s.multiplier = Some(10.0);
        });
        let bytes = vec![0x00, 0x01];
        let v = process_reading(RawInput::Bytes(bytes), &s).unwrap();
        assert_eq!(v, Value::Str("running".to_string()));
    }

    #[test]
    fn fncode_not_3_or_4_is_caller_concern_codec_stays_pure() {
        // The codec has no notion of fncode; null-on-bad-spec is enforced
        // by the transport reader before bytes ever reach process_reading.
        let s = spec(|_| {});
        assert!(process_reading(RawInput::Bytes(vec![]), &s).is_none());
    }

    #[test]
    fn fallback_by_length_when_no_datatype() {
        let s = spec(|_| {});
        let v = process_reading(RawInput::Bytes(vec![0x01, 0x02]), &s).unwrap();
        assert_eq!(v, Value::Float(0x0102 as f64));
    }

    #[test]
    fn bool_and_str_typecasts_skip_mult_offset() {
        let s = spec(|s| {
            s.datatype = Some("uint16".into());
            s.multiplier = Some(1000.0);
            s.typecast = Some("bool".into());
        });
        let v = process_reading(RawInput::Bytes(vec![0x00, 0x01]), &s).unwrap();
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn unparsable_string_returns_none_not_panic() {
        let s = spec(|_| {});
        assert!(process_reading(RawInput::Str("not a number".into()), &s).is_none());
    }
}
