//! Raw-TCP reader: schema-driven request/response framing over a plain
//! TCP socket (§4.2.3).

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use edge_codec::RawInput;
use edge_model::config::{Address, DeviceConfig};
use edge_model::ReadingSpec;

use crate::raw_schema::{generate_request, parse_response};
use crate::{DeviceReader, ReaderError};

pub struct RawTcpReader {
    stream: TcpStream,
    address: Address,
    /// Per-session cache keyed by request bytes (§9 open question: this
    /// assumes request bytes uniquely identify the response; two distinct
    /// readings that legitimately emit the same request bytes will share a
    /// cached response, which is the documented behavior, not a bug to fix
    /// here).
    cache: HashMap<Vec<u8>, Vec<u8>>,
}

impl RawTcpReader {
    pub fn open(device: &DeviceConfig) -> Result<Self, ReaderError> {
        let host = device.address.host.clone().ok_or_else(|| ReaderError::BadSpec("rawtcp device missing address.host".into()))?;
        let port = device.address.port.unwrap_or(502);
        let addr = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| ReaderError::ConstructionFailed(e.to_string()))?
            .next()
            .ok_or_else(|| ReaderError::ConstructionFailed(format!("could not resolve {host}:{port}")))?;
        let timeout = Duration::from_secs_f64(device.timeout);
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| ReaderError::ConstructionFailed(e.to_string()))?;
        stream.set_read_timeout(Some(timeout)).ok();
        stream.set_write_timeout(Some(timeout)).ok();
        Ok(RawTcpReader { stream, address: device.address.clone(), cache: HashMap::new() })
    }

    fn drain_response(&mut self) -> Vec<u8> {
        let mut buf = [0u8; 4096];
        let mut out = Vec::new();
        // One settling read with the connection's configured timeout,
        // then opportunistic extra reads until the socket would block.
        if let Ok(n) = self.stream.read(&mut buf) {
            out.extend_from_slice(&buf[..n]);
        }
        self.stream.set_read_timeout(Some(Duration::from_millis(20))).ok();
        while let Ok(n) = self.stream.read(&mut buf) {
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }
}

impl DeviceReader for RawTcpReader {
    fn read(&mut self, spec: &ReadingSpec) -> Result<Option<RawInput>, ReaderError> {
        let schema = spec.schema.as_ref().ok_or_else(|| ReaderError::BadSpec("rawtcp reading missing schema".into()))?;
        let request = generate_request(schema, spec, &self.address)?;

        let response = if let Some(cached) = self.cache.get(&request) {
            cached.clone()
        } else {
            self.stream.write_all(&request).map_err(|e| ReaderError::TransientIo(e.to_string()))?;
            let resp = self.drain_response();
            if resp.is_empty() {
                return Err(ReaderError::NoResponse);
            }
            self.cache.insert(request.clone(), resp.clone());
            resp
        };

        let slice = parse_response(schema, spec, &response)?;
        Ok(Some(RawInput::Bytes(slice)))
    }
}
