//! Device Reader Pool (C5): executes one cycle's plan, one OS thread per
//! active device, serialized per physical resource by a pre-built mutex
//! table (REDESIGN FLAG: built once at startup, not created lazily on
//! first contention, so two threads racing to read the same serial port
//! for the first time can never both believe they hold it uncontested).
//!
//! Workers are detached, not scoped: a transport call with no internal
//! timeout can block forever, and `thread::scope` would then block the
//! whole cycle with it. Each worker reports back over a channel instead,
//! and the collector gives up on the channel once the cycle's overall
//! deadline passes, leaving the hung device's slot absent from the
//! readout. The abandoned thread may still be running; nothing waits on
//! it again.

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use edge_codec::process_reading;
use edge_model::config::{Address, Config, DeviceConfig};
use edge_model::readout::DeviceReading;
use edge_planner::Plan;
use edge_resolver::HostResolver;
use edge_transports::open_reader;

/// Overall per-device read-sequence deadline, past which remaining
/// fields for that device are abandoned for the cycle (§5).
pub const DEVICE_READ_MAXTIMEOUT: Duration = Duration::from_secs(600);

/// Collapse a device's address into the key its physical resource lock is
/// held under: same serial path / host / MAC never reads concurrently,
/// regardless of how many configured devices share it.
fn resource_key(device_id: &str, address: &Address) -> String {
    if let Some(mac) = &address.mac {
        format!("mac:{mac}")
    } else if let Some(path) = &address.device {
        format!("serial:{path}")
    } else if let Some(host) = &address.host {
        format!("host:{host}:{}", address.port.unwrap_or(0))
    } else {
        format!("device:{device_id}")
    }
}

pub struct ReaderPool {
    resource_locks: HashMap<String, Arc<Mutex<()>>>,
    last_read: RwLock<HashMap<String, Instant>>,
    resolver: Option<Arc<HostResolver>>,
}

impl ReaderPool {
    /// Build the lock table once, from the full device set — not
    /// per-cycle, so it stays stable across config reloads that leave
    /// the device roster unchanged.
    pub fn new(config: &Config) -> Self {
        let mut keys: std::collections::HashSet<String> = std::collections::HashSet::new();
        for (id, dev) in &config.devices {
            keys.insert(resource_key(id, &dev.address));
        }
        let resource_locks = keys.into_iter().map(|k| (k, Arc::new(Mutex::new(())))).collect();
        ReaderPool { resource_locks, last_read: RwLock::new(HashMap::new()), resolver: None }
    }

    /// Attach the host resolver (C3) that resolves MAC-addressed devices
    /// to a live host before the transport is opened, and validates the
    /// mapping again once the read loop is done.
    pub fn with_resolver(mut self, resolver: Arc<HostResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    fn due(&self, device_id: &str, device: &DeviceConfig) -> bool {
        let Some(min_interval) = device.min_read_interval else {
            return true;
        };
        let last_read = self.last_read.read().unwrap();
        match last_read.get(device_id) {
            Some(last) => last.elapsed() >= Duration::from_secs_f64(min_interval),
            None => true,
        }
    }

    fn mark_read(&self, device_id: &str) {
        self.last_read.write().unwrap().insert(device_id.to_string(), Instant::now());
    }

    /// Run one cycle: spawn a detached thread per device that has a
    /// pending reading and is due per `min_read_interval`. Each worker
    /// owns its own copy of everything it touches and reports its result
    /// over `tx`; nothing is borrowed from `self` or `config`, so the
    /// thread outlives this call if it has to. Results are collected
    /// against a single deadline for the whole cycle, not per worker.
    pub fn run_cycle(&self, config: &Config, plan: &Plan) -> HashMap<String, DeviceReading> {
        let (tx, rx) = mpsc::channel::<(String, Option<DeviceReading>)>();
        let mut expected = 0usize;

        for (device_id, specs) in &plan.by_device {
            let Some(device) = config.devices.get(device_id) else {
                continue;
            };
            if !self.due(device_id, device) {
                continue;
            }
            let lock_key = resource_key(device_id, &device.address);
            let Some(lock) = self.resource_locks.get(&lock_key) else {
                tracing::error!(device = %device_id, "no resource lock registered, skipping (config changed since pool was built)");
                continue;
            };

            let device_id = device_id.clone();
            let mut device = device.clone();
            let specs = specs.clone();
            let lock = lock.clone();
            let resolver = self.resolver.clone();
            let tx = tx.clone();
            expected += 1;

            std::thread::spawn(move || {
                let _guard = lock.lock().unwrap();
                if let Some(delay) = device.read_delay {
                    std::thread::sleep(Duration::from_secs_f64(delay));
                }
                let reading = read_device(&device_id, &mut device, &specs, resolver.as_deref());
                let _ = tx.send((device_id, reading));
            });
        }
        drop(tx);

        let deadline = Instant::now() + DEVICE_READ_MAXTIMEOUT;
        let mut results = HashMap::new();
        for _ in 0..expected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((device_id, Some(reading))) => {
                    self.mark_read(&device_id);
                    results.insert(device_id, reading);
                }
                Ok((device_id, None)) => {
                    tracing::warn!(device = %device_id, "device produced no reading this cycle");
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    tracing::warn!("cycle deadline reached with workers still outstanding, abandoning them");
                    break;
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        results
    }
}

/// Read every spec for one device. Returns `None` if the reader can't be
/// opened, or if a MAC↔host mismatch is found after reading (§4.5.3.e) —
/// in either case the whole device's map is discarded for the cycle.
fn read_device(device_id: &str, device: &mut DeviceConfig, specs: &[edge_model::ReadingSpec], resolver: Option<&HostResolver>) -> Option<DeviceReading> {
    if let (Some(mac), Some(resolver)) = (device.address.mac.clone(), resolver) {
        match resolver.resolve(&mac) {
            Some(host) => device.address.host = Some(host),
            None => {
                tracing::warn!(device = %device_id, mac = %mac, "could not resolve host for MAC, skipping device");
                return None;
            }
        }
    }

    let mut reading = DeviceReading::new(device_id);
    reading.vendor_id = device.vendor_id.clone();

    let mut reader = match open_reader(device) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(device = %device_id, error = %e, "failed to open reader");
            return None;
        }
    };

    let deadline = Instant::now() + DEVICE_READ_MAXTIMEOUT;
    for spec in specs {
        if Instant::now() > deadline {
            tracing::warn!(device = %device_id, "device read sequence exceeded maxtimeout, abandoning remaining fields");
            break;
        }
        match reader.read(spec) {
            Ok(Some(raw)) => {
                if let Some(value) = process_reading(raw, spec) {
                    reading.fields.insert(spec.var.clone(), value);
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(device = %device_id, var = %spec.var, error = %e, "read failed for field");
            }
        }
    }
    drop(reader);

    if let (Some(mac), Some(resolver)) = (&device.address.mac, resolver) {
        let Some(host) = &device.address.host else {
            tracing::warn!(device = %device_id, "no host to validate against MAC, discarding readings");
            return None;
        };
        if !resolver.validate(mac, host) {
            tracing::warn!(device = %device_id, mac = %mac, host = %host, "MAC no longer matches resolved host, discarding readings");
            return None;
        }
    }

    Some(reading)
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_model::config::{Address, ReadingType};

    fn device(host: Option<&str>, mac: Option<&str>) -> DeviceConfig {
        DeviceConfig {
            driver: "d".into(),
            reading_type: ReadingType::Modbustcp,
            address: Address { host: host.map(str::to_string), mac: mac.map(str::to_string), ..Default::default() },
            enabled: true,
            timeout: 2.0,
            vendor_id: None,
            min_read_interval: None,
            read_delay: None,
            register_offset: None,
            conn_retry: None,
            conn_check: None,
        }
    }

    #[test]
    fn shared_host_collapses_to_one_lock() {
        let mut config = Config {
            node_id: "n".into(),
            devices: HashMap::new(),
            readings: HashMap::new(),
            output: vec![],
            read_interval: None,
            read_roundtime: false,
            push_throttle_delay: 10.0,
            push_timeout: 60.0,
            drivers: HashMap::new(),
            calc_vendor_id: "_calc".into(),
        };
        config.devices.insert("a".into(), device(Some("10.0.0.1"), None));
        config.devices.insert("b".into(), device(Some("10.0.0.1"), None));
        config.devices.insert("c".into(), device(Some("10.0.0.2"), None));
        let pool = ReaderPool::new(&config);
        assert_eq!(pool.resource_locks.len(), 2);
    }

    #[test]
    fn mac_takes_priority_over_host_for_resource_key() {
        let key = resource_key("x", &Address { host: Some("10.0.0.1".into()), mac: Some("aa:bb:cc:dd:ee:ff".into()), ..Default::default() });
        assert_eq!(key, "mac:aa:bb:cc:dd:ee:ff");
    }
}
