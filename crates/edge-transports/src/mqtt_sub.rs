//! MQTT-subscribe reader (§4.2.5): a persistent client that buffers the
//! latest payload per topic; `read` never blocks waiting for a fresh
//! message, it returns whatever arrived most recently (or `None`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use edge_codec::RawInput;
use edge_model::config::DeviceConfig;
use edge_model::ReadingSpec;
use rumqttc::{Client, Event, MqttOptions, Packet, QoS};

use crate::{DeviceReader, ReaderError};

const POST_CONNECT_SETTLE: Duration = Duration::from_millis(200);

pub struct MqttSubReader {
    client: Client,
    subscribed: std::collections::HashSet<String>,
    payloads: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MqttSubReader {
    pub fn open(device: &DeviceConfig) -> Result<Self, ReaderError> {
        let host = device.address.host.clone().unwrap_or_else(|| "localhost".to_string());
        let port = device.address.port.unwrap_or(1883);
        let client_id = format!("edge-agent-{}", device.vendor_id.clone().unwrap_or_default());
        let mut opts = MqttOptions::new(client_id, host, port);
        opts.set_keep_alive(Duration::from_secs(30));

        let (client, mut connection) = Client::new(opts, 64);
        let payloads: Arc<Mutex<HashMap<String, Vec<u8>>>> = Arc::new(Mutex::new(HashMap::new()));
        let store = payloads.clone();
        std::thread::spawn(move || {
            for notification in connection.iter() {
                if let Ok(Event::Incoming(Packet::Publish(p))) = notification {
                    store.lock().unwrap().insert(p.topic.clone(), p.payload.to_vec());
                }
            }
        });
        std::thread::sleep(POST_CONNECT_SETTLE);

        Ok(MqttSubReader { client, subscribed: Default::default(), payloads })
    }
}

impl DeviceReader for MqttSubReader {
    fn read(&mut self, spec: &ReadingSpec) -> Result<Option<RawInput>, ReaderError> {
        let topic = spec.topic.as_deref().ok_or_else(|| ReaderError::BadSpec("mqtt reading missing topic".into()))?;
        if !self.subscribed.contains(topic) {
            self.client
                .subscribe(topic, QoS::AtMostOnce)
                .map_err(|e| ReaderError::TransientIo(e.to_string()))?;
            self.subscribed.insert(topic.to_string());
        }
        let payload = self.payloads.lock().unwrap().get(topic).cloned();
        Ok(payload.map(RawInput::Bytes))
    }
}
