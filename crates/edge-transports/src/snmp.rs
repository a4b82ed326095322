//! SNMP reader (§4.2.4): v1/v2c GET over UDP.
//!
//! No SNMP crate appears anywhere in the reference corpus this workspace
//! was built from, so the small slice of BER needed for a GET request/
//! response (INTEGER, OCTET STRING, OID, SEQUENCE, NULL) is hand-rolled
//! here rather than guessed at through an unfamiliar dependency's API.

use std::net::UdpSocket;
use std::time::Duration;

use edge_codec::RawInput;
use edge_model::config::DeviceConfig;
use edge_model::ReadingSpec;

use crate::{DeviceReader, ReaderError};

pub struct SnmpReader {
    socket: UdpSocket,
    community: String,
    request_id: i32,
}

impl SnmpReader {
    pub fn open(device: &DeviceConfig) -> Result<Self, ReaderError> {
        let host = device.address.host.clone().ok_or_else(|| ReaderError::BadSpec("snmp device missing address.host".into()))?;
        let port = device.address.port.unwrap_or(161);
        let timeout = Duration::from_secs_f64(device.timeout);

        let socket = UdpSocket::bind("0.0.0.0:0").map_err(|e| ReaderError::ConstructionFailed(e.to_string()))?;
        socket.set_read_timeout(Some(timeout)).ok();
        socket.connect((host.as_str(), port)).map_err(|e| ReaderError::ConstructionFailed(e.to_string()))?;

        Ok(SnmpReader {
            socket,
            community: device.address.community.clone().unwrap_or_else(|| "public".to_string()),
            request_id: 1,
        })
    }

    fn get(&mut self, oid: &str) -> Result<Vec<u8>, ReaderError> {
        self.request_id = self.request_id.wrapping_add(1);
        let packet = ber::encode_get_request(&self.community, self.request_id, oid)
            .map_err(|e| ReaderError::BadSpec(e))?;
        self.socket.send(&packet).map_err(|e| ReaderError::TransientIo(e.to_string()))?;

        let mut buf = [0u8; 1500];
        let n = self.socket.recv(&mut buf).map_err(|_| ReaderError::NoResponse)?;
        ber::decode_varbind_value(&buf[..n]).ok_or(ReaderError::TransientIo("malformed SNMP response".into()))
    }
}

impl DeviceReader for SnmpReader {
    fn read(&mut self, spec: &ReadingSpec) -> Result<Option<RawInput>, ReaderError> {
        let oid = spec.oid.as_deref().ok_or_else(|| ReaderError::BadSpec("snmp reading missing oid".into()))?;
        let bytes = self.get(oid)?;
        Ok(Some(RawInput::Bytes(bytes)))
    }
}

/// Minimal BER (ASN.1) encode/decode for SNMPv1/v2c GET.
mod ber {
    fn encode_len(len: usize) -> Vec<u8> {
        if len < 0x80 {
            vec![len as u8]
        } else {
            let mut bytes = len.to_be_bytes().to_vec();
            while bytes.first() == Some(&0) {
                bytes.remove(0);
            }
            let mut out = vec![0x80 | bytes.len() as u8];
            out.extend(bytes);
            out
        }
    }

    fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend(encode_len(content.len()));
        out.extend_from_slice(content);
        out
    }

    fn encode_integer(value: i64) -> Vec<u8> {
        let mut bytes = value.to_be_bytes().to_vec();
        while bytes.len() > 1 && bytes[0] == 0x00 && bytes[1] & 0x80 == 0 {
            bytes.remove(0);
        }
        tlv(0x02, &bytes)
    }

    fn encode_oid(oid: &str) -> Result<Vec<u8>, String> {
        let parts: Result<Vec<u64>, _> = oid.trim_start_matches('.').split('.').map(|p| p.parse::<u64>()).collect();
        let parts = parts.map_err(|_| format!("invalid OID '{oid}'"))?;
        if parts.len() < 2 {
            return Err(format!("OID '{oid}' too short"));
        }
        let mut body = vec![(parts[0] * 40 + parts[1]) as u8];
        for &p in &parts[2..] {
            body.extend(encode_base128(p));
        }
        Ok(tlv(0x06, &body))
    }

    fn encode_base128(mut v: u64) -> Vec<u8> {
        let mut out = vec![(v & 0x7F) as u8];
        v >>= 7;
        while v > 0 {
            out.push(((v & 0x7F) as u8) | 0x80);
            v >>= 7;
        }
        out.reverse();
        out
    }

    pub fn encode_get_request(community: &str, request_id: i32, oid: &str) -> Result<Vec<u8>, String> {
        let null = tlv(0x05, &[]);
        let oid_bytes = encode_oid(oid)?;
        let varbind = tlv(0x30, &[oid_bytes, null].concat());
        let varbind_list = tlv(0x30, &varbind);

        let mut pdu_body = encode_integer(request_id as i64);
        pdu_body.extend(encode_integer(0)); // error-status
        pdu_body.extend(encode_integer(0)); // error-index
        pdu_body.extend(varbind_list);
        let pdu = tlv(0xA0, &pdu_body);

        let version = encode_integer(1); // v2c
        let community_tlv = tlv(0x04, community.as_bytes());
        let message = [version, community_tlv, pdu].concat();
        Ok(tlv(0x30, &message))
    }

    /// Walk a GetResponse packet to the first varbind's value and return
    /// its raw content bytes (the codec applies datatype/multiplier on
    /// top, identical to the bytes path for any other transport).
    pub fn decode_varbind_value(packet: &[u8]) -> Option<Vec<u8>> {
        let (_tag, message, _) = read_tlv(packet)?;
        let (_tag, _version, rest) = read_tlv(message)?;
        let (_tag, _community, rest) = read_tlv(rest)?;
        let (_pdu_tag, pdu_body, _) = read_tlv(rest)?;
        let (_tag, _request_id, rest) = read_tlv(pdu_body)?;
        let (_tag, _error_status, rest) = read_tlv(rest)?;
        let (_tag, _error_index, rest) = read_tlv(rest)?;
        let (_tag, varbind_list, _) = read_tlv(rest)?;
        let (_tag, varbind, _) = read_tlv(varbind_list)?;
        let (_oid_tag, _oid, rest) = read_tlv(varbind)?;
        let (_value_tag, value, _) = read_tlv(rest)?;
        Some(value.to_vec())
    }

    fn read_tlv(data: &[u8]) -> Option<(u8, &[u8], &[u8])> {
        if data.len() < 2 {
            return None;
        }
        let tag = data[0];
        let (len, header_len) = if data[1] & 0x80 == 0 {
            (data[1] as usize, 2)
        } else {
            let n = (data[1] & 0x7F) as usize;
            let mut len = 0usize;
            for &b in data.get(2..2 + n)? {
                len = (len << 8) | b as usize;
            }
            (len, 2 + n)
        };
        let content = data.get(header_len..header_len + len)?;
        let remainder = data.get(header_len + len..).unwrap_or(&[]);
        Some((tag, content, remainder))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn encodes_a_simple_get_request_without_panicking() {
            let pkt = encode_get_request("public", 7, "1.3.6.1.2.1.1.3.0").unwrap();
            assert_eq!(pkt[0], 0x30);
            assert!(pkt.len() > 10);
        }

        #[test]
        fn tlv_round_trips_integer() {
            let encoded = encode_integer(12345);
            let (tag, content, _) = read_tlv(&encoded).unwrap();
            assert_eq!(tag, 0x02);
            let mut padded = [0u8; 8];
            padded[8 - content.len()..].copy_from_slice(content);
            assert_eq!(i64::from_be_bytes(padded), 12345);
        }
    }
}
