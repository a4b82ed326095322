//! ModbusRTU / serial reader (§4.2.2). Blocking serial I/O on the
//! worker's own OS thread — each device owns its serial handle for the
//! duration of the read sequence per the per-resource locking in §4.5.

use std::io::{Read, Write};
use std::time::Duration;

use edge_codec::{crc16, RawInput};
use edge_model::config::DeviceConfig;
use edge_model::driver::parse_register;
use edge_model::ReadingSpec;

use crate::{DeviceReader, ReaderError};

pub struct ModbusRtuReader {
    port: Box<dyn serialport::SerialPort>,
    slave_id: u8,
}

fn parity_from_str(p: &str) -> serialport::Parity {
    match p {
        "odd" => serialport::Parity::Odd,
        "even" => serialport::Parity::Even,
        _ => serialport::Parity::None,
    }
}

impl ModbusRtuReader {
    pub fn open(device: &DeviceConfig) -> Result<Self, ReaderError> {
        let addr = &device.address;
        let path = addr.device.clone().ok_or_else(|| ReaderError::BadSpec("modbusrtu device missing address.device".into()))?;
        let baud = addr.baudrate.unwrap_or(9600);
        let data_bits = match addr.bytesize.unwrap_or(8) {
            7 => serialport::DataBits::Seven,
            _ => serialport::DataBits::Eight,
        };
        let stop_bits = match addr.stopbits.unwrap_or(1) {
            2 => serialport::StopBits::Two,
            _ => serialport::StopBits::One,
        };
        let parity = parity_from_str(addr.parity.as_deref().unwrap_or("none"));
        let timeout = Duration::from_secs_f64(device.timeout);

        let port = serialport::new(&path, baud)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .timeout(timeout)
            .open()
            .map_err(|e| ReaderError::ConstructionFailed(e.to_string()))?;

        Ok(ModbusRtuReader {
            port,
            slave_id: addr.slave_id.unwrap_or(1),
        })
    }

    fn read_registers(&mut self, fncode: u8, start_reg: u16, words: u16) -> Result<Vec<u8>, ReaderError> {
        let mut frame = vec![self.slave_id, fncode];
        frame.extend_from_slice(&start_reg.to_be_bytes());
        frame.extend_from_slice(&words.to_be_bytes());
        crc16::append_crc16(&mut frame);

        self.port.write_all(&frame).map_err(|e| ReaderError::TransientIo(e.to_string()))?;

        let mut header = [0u8; 3];
        self.port.read_exact(&mut header).map_err(|_| ReaderError::NoResponse)?;
        if header[1] & 0x80 != 0 {
            return Err(ReaderError::NoResponse);
        }
        let byte_count = header[2] as usize;
        let mut rest = vec![0u8; byte_count + 2]; // + trailing CRC
        self.port.read_exact(&mut rest).map_err(|e| ReaderError::TransientIo(e.to_string()))?;

        let mut full = header.to_vec();
        full.extend_from_slice(&rest);
        if !crc16::validate_crc16(&full) {
            return Err(ReaderError::TransientIo("CRC-16 mismatch on modbus RTU response".into()));
        }
        Ok(rest[..byte_count].to_vec())
    }
}

impl DeviceReader for ModbusRtuReader {
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
        let words = spec.words.unwrap_or(1);

        let data = self.read_registers(fncode, register as u16, words)?;

        let mut word_list: Vec<[u8; 2]> = data.chunks_exact(2).map(|c| [c[0], c[1]]).collect();
        if spec.order.as_deref() == Some("lsr") {
            word_list.reverse();
        }
        let bytes: Vec<u8> = word_list.into_iter().flatten().collect();
        Ok(Some(RawInput::Bytes(bytes)))
    }
}
