//! Raw-serial reader: schema-driven request/response framing over a
//! serial port, with the older template/termination-based framing still
//! supported for drivers that predate the schema format (§4.2.3).

use std::collections::HashMap;
use std::io::{Read, Write};
use std::time::Duration;

use edge_codec::RawInput;
use edge_model::config::{Address, DeviceConfig};
use edge_model::ReadingSpec;

use crate::raw_schema::{generate_request, parse_response};
use crate::{DeviceReader, ReaderError};

pub struct RawSerialReader {
    port: Box<dyn serialport::SerialPort>,
    address: Address,
    cache: HashMap<Vec<u8>, Vec<u8>>,
}

impl RawSerialReader {
    pub fn open(device: &DeviceConfig) -> Result<Self, ReaderError> {
        let addr = &device.address;
        let path = addr.device.clone().ok_or_else(|| ReaderError::BadSpec("rawserial device missing address.device".into()))?;
        let baud = addr.baudrate.unwrap_or(9600);
        let timeout = Duration::from_secs_f64(device.timeout);
        let port = serialport::new(&path, baud)
            .timeout(timeout)
            .open()
            .map_err(|e| ReaderError::ConstructionFailed(e.to_string()))?;
        Ok(RawSerialReader { port, address: device.address.clone(), cache: HashMap::new() })
    }

    fn drain(&mut self, termination: Option<&[u8]>) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 1];
        if termination.is_none() {
            std::thread::sleep(Duration::from_millis(1000));
        }
        loop {
            match self.port.read(&mut buf) {
                Ok(1) => {
                    out.push(buf[0]);
                    if let Some(term) = termination {
                        if out.ends_with(term) {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
        out
    }
}

impl DeviceReader for RawSerialReader {
    fn read(&mut self, spec: &ReadingSpec) -> Result<Option<RawInput>, ReaderError> {
        let schema = spec.schema.as_ref().ok_or_else(|| ReaderError::BadSpec("rawserial reading missing schema".into()))?;
        let request = generate_request(schema, spec, &self.address)?;

        let response = if let Some(cached) = self.cache.get(&request) {
            cached.clone()
        } else {
            self.port.write_all(&request).map_err(|e| ReaderError::TransientIo(e.to_string()))?;
            let termination = schema.resp_termination.as_deref().map(crate::raw_schema::get_bytes);
            let resp = self.drain(termination.as_deref());
            if resp.is_empty() {
                return Err(ReaderError::NoResponse);
            }
            if let Some(template) = &schema.resp_template {
                let re = regex::bytes::Regex::new(template).map_err(|e| ReaderError::BadSpec(e.to_string()))?;
                if !re.is_match(&resp) {
                    tracing::warn!(?resp, template, "response does not match template, discarding");
                    return Err(ReaderError::TransientIo("response did not match template".into()));
                }
            }
            self.cache.insert(request.clone(), resp.clone());
            resp
        };

        let slice = parse_response(schema, spec, &response)?;
        Ok(Some(RawInput::Bytes(slice)))
    }
}
