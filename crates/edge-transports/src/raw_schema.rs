//! Shared request-generation / response-parsing logic for the raw-serial
//! and raw-TCP readers (§4.2.3). Both transports differ only in how bytes
//! get to and from the wire; the schema interpretation is identical.

use edge_codec::crc16;
use edge_model::config::Address;
use edge_model::driver::{PosLen, RequestComponent, Schema};
use edge_model::ReadingSpec;

use crate::ReaderError;

/// Build the request frame for `spec`'s schema against `address` (for
/// `device_arg` components).
pub fn generate_request(schema: &Schema, spec: &ReadingSpec, address: &Address) -> Result<Vec<u8>, ReaderError> {
    let mut out = Vec::new();
    for component in &schema.request {
        match component {
            RequestComponent::Input { field, bytes, big_endian } => {
                let v = spec
                    .field(field)
                    .ok_or_else(|| ReaderError::BadSpec(format!("schema references unknown input field '{field}'")))?;
                push_numeric(&mut out, &v, *bytes, *big_endian)?;
            }
            RequestComponent::DeviceArg { field, bytes, big_endian } => {
                let raw = address
                    .field(field)
                    .ok_or_else(|| ReaderError::BadSpec(format!("schema references unknown device arg '{field}'")))?;
                let v = serde_json::Value::String(raw);
                push_numeric(&mut out, &v, *bytes, *big_endian)?;
            }
            RequestComponent::Const { value } => {
                out.extend_from_slice(&get_bytes(value));
            }
            RequestComponent::Crc => {
                crc16::append_crc16(&mut out);
            }
        }
    }
    Ok(out)
}

/// Interpret a `const` component: `0x…`-prefixed hex, or a literal UTF-8
/// string otherwise (mirrors the original reader's `get_bytes` helper).
pub fn get_bytes(literal: &str) -> Vec<u8> {
    if let Some(hex) = literal.strip_prefix("0x").or_else(|| literal.strip_prefix("0X")) {
        if let Ok(bytes) = hex_decode(hex) {
            return bytes;
        }
    }
    literal.as_bytes().to_vec()
}

fn hex_decode(s: &str) -> Result<Vec<u8>, ()> {
    if s.len() % 2 != 0 {
        return Err(());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

fn push_numeric(out: &mut Vec<u8>, v: &serde_json::Value, width: usize, big_endian: bool) -> Result<(), ReaderError> {
    let n: i64 = if let Some(i) = v.as_i64() {
        i
    } else if let Some(s) = v.as_str() {
        edge_model::driver::parse_register(s).ok_or_else(|| ReaderError::BadSpec(format!("cannot parse '{s}' as an integer")))?
    } else {
        return Err(ReaderError::BadSpec("request field is neither a number nor a string".into()));
    };
    let full = (n as u64).to_be_bytes();
    let be_slice = &full[8 - width..];
    if big_endian {
        out.extend_from_slice(be_slice);
    } else {
        out.extend(be_slice.iter().rev());
    }
    Ok(())
}

fn resolve_pos_len(pl: &PosLen, spec: &ReadingSpec) -> Result<i64, ReaderError> {
    match pl {
        PosLen::Const(v) => Ok(*v),
        PosLen::FromInput { from_input, multiplier, offset } => {
            let v = spec
                .field(from_input)
                .ok_or_else(|| ReaderError::BadSpec(format!("schema references unknown input field '{from_input}'")))?;
            let base = v
                .as_f64()
                .or_else(|| v.as_str().and_then(|s| edge_model::driver::parse_register(s)).map(|i| i as f64))
                .ok_or_else(|| ReaderError::BadSpec("from_input field is not numeric".into()))?;
            Ok((base * multiplier + offset) as i64)
        }
    }
}

/// Validate (if requested) and slice the declared field out of a raw
/// response frame.
pub fn parse_response(schema: &Schema, spec: &ReadingSpec, response: &[u8]) -> Result<Vec<u8>, ReaderError> {
    let body = if schema.check_crc16 {
        if !crc16::validate_crc16(response) {
            return Err(ReaderError::TransientIo("CRC-16 mismatch".into()));
        }
        &response[..response.len() - 2]
    } else {
        response
    };

    let pos = resolve_pos_len(&schema.pos, spec)? as usize;
    let len = resolve_pos_len(&schema.length, spec)? as usize;
    body.get(pos..pos + len)
        .map(|s| s.to_vec())
        .ok_or_else(|| ReaderError::TransientIo(format!("response too short: need {len} bytes at {pos}, have {}", body.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_model::driver::RequestComponent;

    fn scenario_4_schema() -> Schema {
        Schema {
            request: vec![
                RequestComponent::DeviceArg { field: "unit_id".into(), bytes: 1, big_endian: true },
                RequestComponent::Const { value: "0x03".into() },
                RequestComponent::Const { value: "0x0002".into() },
                RequestComponent::Input { field: "words".into(), bytes: 2, big_endian: true },
                RequestComponent::Crc,
            ],
            pos: PosLen::Const(3),
            length: PosLen::FromInput { from_input: "words".into(), multiplier: 2.0, offset: 0.0 },
            check_crc16: true,
            resp_template: None,
            resp_termination: None,
        }
    }

    #[test]
    fn scenario_4_generates_documented_request_frame() {
        let schema = scenario_4_schema();
        let mut spec = ReadingSpec::default();
        spec.words = Some(2);
        let mut address = Address::default();
        address.unit_id = Some(1);

        let frame = generate_request(&schema, &spec, &address).unwrap();
        assert_eq!(frame, vec![0x01, 0x03, 0x00, 0x02, 0x00, 0x02, 0x65, 0xCB]);
    }

    #[test]
    fn scenario_4_parses_documented_response_slice() {
        let schema = scenario_4_schema();
        let mut spec = ReadingSpec::default();
        spec.words = Some(2);

        let mut response = vec![0x01, 0x03, 0x04, 0x12, 0x34, 0x56, 0x78];
        edge_codec::crc16::append_crc16(&mut response);

        let slice = parse_response(&schema, &spec, &response).unwrap();
        assert_eq!(slice, vec![0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn bit_flip_in_crc_protected_response_is_rejected() {
        let schema = scenario_4_schema();
        let spec = ReadingSpec { words: Some(2), ..Default::default() };
        let mut response = vec![0x01, 0x03, 0x04, 0x12, 0x34, 0x56, 0x78];
        edge_codec::crc16::append_crc16(&mut response);
        let last = response.len() - 1;
        response[last] ^= 0x01;
        assert!(parse_response(&schema, &spec, &response).is_err());
    }
}
