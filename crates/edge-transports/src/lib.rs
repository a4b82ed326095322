//! Transport readers (C2): one module per wire protocol, all implementing
//! the same `open → read(spec) → close` lifecycle.
//!
//! `close` is modeled as `Drop` rather than an explicit method: scoped
//! acquisition then falls out of ordinary Rust ownership, and cleanup runs
//! on every exit path — including an early `?` return or a panic unwind —
//! without the caller having to remember to call it.

pub mod modbus_tcp;
pub mod modbus_rtu;
pub mod mqtt_sub;
pub mod raw_schema;
pub mod raw_serial;
pub mod raw_tcp;
pub mod snmp;
pub mod speedwire;
pub mod sysinfo;

use edge_codec::RawInput;
use edge_model::ReadingSpec;

/// The outcome classes §7 distinguishes, minus the ones that are purely a
/// pool-level concern (deadline, MAC mismatch) — those live in
/// `edge-reader-pool`.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("transient I/O error: {0}")]
    TransientIo(String),
    #[error("device did not respond")]
    NoResponse,
    #[error("bad reading spec: {0}")]
    BadSpec(String),
    #[error("reader construction failed: {0}")]
    ConstructionFailed(String),
}

/// A reader bound to one device for the duration of a read sequence.
pub trait DeviceReader {
    /// Read one field. `Ok(None)` means "no value, log and skip" (e.g. an
    /// unmapped `fncode`, or a subscribe-reader with nothing buffered yet)
    /// — distinct from `Err`, which carries the error class for logging.
    fn read(&mut self, spec: &ReadingSpec) -> Result<Option<RawInput>, ReaderError>;
}

/// Open the reader implementation selected by `device.reading_type`. The
/// planner's spec is a discriminated union whose variant matches the
/// transport (§9); the dispatch point is this one `match`.
pub fn open_reader(device: &edge_model::config::DeviceConfig) -> Result<Box<dyn DeviceReader + Send>, ReaderError> {
    use edge_model::config::ReadingType::*;
    match device.reading_type {
        Modbustcp => Ok(Box::new(modbus_tcp::ModbusTcpReader::open(device)?)),
        Modbusrtu => Ok(Box::new(modbus_rtu::ModbusRtuReader::open(device)?)),
        Rawserial => Ok(Box::new(raw_serial::RawSerialReader::open(device)?)),
        Rawtcp => Ok(Box::new(raw_tcp::RawTcpReader::open(device)?)),
        Snmp => Ok(Box::new(snmp::SnmpReader::open(device)?)),
        Mqtt => Ok(Box::new(mqtt_sub::MqttSubReader::open(device)?)),
        SmaSpeedwire => Ok(Box::new(speedwire::SpeedwireReader::open(device)?)),
        SysInfo => Ok(Box::new(sysinfo::SysInfoReader::open(device)?)),
    }
}
