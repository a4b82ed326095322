//! SMA Speedwire (UDP multicast) reader (§4.2.6).

use std::collections::HashMap;
use std::net::{Ipv4Addr, UdpSocket};
use std::time::{Duration, Instant};

use edge_codec::RawInput;
use edge_model::config::DeviceConfig;
use edge_model::ReadingSpec;

use crate::{DeviceReader, ReaderError};

const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 12, 255, 254);
const MULTICAST_PORT: u16 = 9522;
const MAX_RESPONSES: usize = 5;

const OBIS_TYPE_ACTUAL: u8 = 4;
const OBIS_TYPE_COUNTER: u8 = 8;
const OBIS_TYPE_VERSION: u8 = 0;
const OBIS_CHANNEL_VERSION: u16 = 36864;

/// One decoded multicast datagram: its device serial plus the (channel,
/// type) → value-bytes triples found in its body.
#[derive(Debug, Default)]
pub struct SpeedwireFrame {
    pub serial: u32,
    pub values: HashMap<(u16, u8), Vec<u8>>,
}

fn decode_obis(bytes: &[u8]) -> (u16, u8) {
    (u16::from_be_bytes([bytes[0], bytes[1]]), bytes[2])
}

/// Parse a Speedwire/OBIS datagram per the documented header layout.
pub fn parse_datagram(response: &[u8]) -> Option<SpeedwireFrame> {
    if response.len() < 24 {
        return None;
    }
    let data_length = u16::from_be_bytes([response[12], response[13]]) as usize + 16;
    let serial = u32::from_be_bytes([response[20], response[21], response[22], response[23]]);

    let mut values = HashMap::new();
    let mut pos = 28usize;
    while pos < data_length && pos + 4 <= response.len() {
        let (channel, obis_type) = decode_obis(&response[pos..pos + 4]);
        let value = match obis_type {
            OBIS_TYPE_ACTUAL => {
                let v = response.get(pos + 4..pos + 8)?.to_vec();
                pos += 8;
                v
            }
            OBIS_TYPE_COUNTER => {
                let v = response.get(pos + 4..pos + 12)?.to_vec();
                pos += 12;
                v
            }
            OBIS_TYPE_VERSION if channel == OBIS_CHANNEL_VERSION => {
                pos += 8;
                let v = response.get(pos + 4..pos + 8)?.to_vec();
                v
            }
            _ => break,
        };
        values.insert((channel, obis_type), value);
    }

    Some(SpeedwireFrame { serial, values })
}

pub struct SpeedwireReader {
    socket: UdpSocket,
    target_serial: Option<u32>,
    stored: Option<SpeedwireFrame>,
}

impl SpeedwireReader {
    pub fn open(device: &DeviceConfig) -> Result<Self, ReaderError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, MULTICAST_PORT)).map_err(|e| ReaderError::ConstructionFailed(e.to_string()))?;
        socket
            .join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)
            .map_err(|e| ReaderError::ConstructionFailed(e.to_string()))?;
        socket.set_read_timeout(Some(Duration::from_secs_f64(device.timeout))).ok();

        let target_serial = device.address.serial.as_deref().and_then(|s| s.parse().ok());
        let mut reader = SpeedwireReader { socket, target_serial, stored: None };
        reader.fill()?;
        Ok(reader)
    }

    fn fill(&mut self) -> Result<(), ReaderError> {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut buf = [0u8; 1500];
        for _ in 0..MAX_RESPONSES {
            if Instant::now() > deadline {
                break;
            }
            let n = match self.socket.recv(&mut buf) {
                Ok(n) => n,
                Err(_) => break,
            };
            if let Some(frame) = parse_datagram(&buf[..n]) {
                let matches_target = match self.target_serial {
                    Some(want) => want == frame.serial,
                    None => true,
                };
                if matches_target {
                    self.stored = Some(frame);
                    break;
                }
            }
        }
        if self.stored.is_none() {
            return Err(ReaderError::NoResponse);
        }
        Ok(())
    }

    /// Return all distinct device serials observed within the read budget
    /// (used by the autoconfig/env-scan collaborator, not by the core
    /// reading cycle).
    pub fn scan_serials(&mut self) -> Vec<u32> {
        let mut seen = std::collections::HashSet::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut buf = [0u8; 1500];
        while Instant::now() < deadline {
            if let Ok(n) = self.socket.recv(&mut buf) {
                if let Some(frame) = parse_datagram(&buf[..n]) {
                    seen.insert(frame.serial);
                }
            } else {
                break;
            }
        }
        seen.into_iter().collect()
    }
}

impl DeviceReader for SpeedwireReader {
    fn read(&mut self, spec: &ReadingSpec) -> Result<Option<RawInput>, ReaderError> {
        let channel = spec.channel.ok_or_else(|| ReaderError::BadSpec("speedwire reading missing channel".into()))?;
        let obis_type = spec.obis_type.ok_or_else(|| ReaderError::BadSpec("speedwire reading missing obis_type".into()))?;
        let frame = self.stored.as_ref().ok_or(ReaderError::NoResponse)?;
        Ok(frame.values.get(&(channel as u16, obis_type)).cloned().map(RawInput::Bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_datagram(serial: u32, channel: u16, obis_type: u8, value: &[u8]) -> Vec<u8> {
        let mut d = vec![0u8; 28];
        let body_len = (4 + value.len()) as u16;
        d[12..14].copy_from_slice(&body_len.to_be_bytes());
        d[20..24].copy_from_slice(&serial.to_be_bytes());
        d.extend_from_slice(&channel.to_be_bytes());
        d.push(obis_type);
        d.push(0); // datatype byte, unused by the parser
        d.extend_from_slice(value);
        d
    }

    #[test]
    fn parses_actual_value_triple() {
        let datagram = build_datagram(123456, 1, OBIS_TYPE_ACTUAL, &[0, 0, 0, 42]);
        let frame = parse_datagram(&datagram).unwrap();
        assert_eq!(frame.serial, 123456);
        assert_eq!(frame.values.get(&(1, OBIS_TYPE_ACTUAL)), Some(&vec![0, 0, 0, 42]));
    }
}
