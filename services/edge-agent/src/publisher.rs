//! Publisher (C10): the sole consumer of the volatile queue. Stamps
//! cycle-relative metadata, serializes to the wire shape (§6), and
//! publishes to the local MQTT bridge at QoS 1 with clean_session=false.
//!
//! Built on `rumqttc`'s blocking client, not the async one — the process
//! as a whole is OS-thread concurrent, not tokio-driven (§5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use edge_queue::{QueueItem, VolatileQueue};
use rumqttc::{Client, MqttOptions, QoS};

pub const DATA_TOPIC: &str = "u/data";

pub struct PublisherConfig {
    pub bridge_host: String,
    pub bridge_port: u16,
    pub client_id: String,
    pub push_timeout: Duration,
    pub push_throttle_delay: Duration,
}

fn mqtt_options(cfg: &PublisherConfig) -> MqttOptions {
    let mut opts = MqttOptions::new(cfg.client_id.clone(), cfg.bridge_host.clone(), cfg.bridge_port);
    opts.set_clean_session(false);
    opts.set_keep_alive(cfg.push_timeout);
    opts.set_inflight(2);
    opts
}

fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Drains `volatile` until the shutdown sentinel is seen, publishing each
/// readout in turn. `config_id` is refreshed by the caller between
/// cycles; `publish_in_progress` lets the spill controller count an
/// in-flight publish toward its depth heuristic (§4.9).
pub fn run(
    cfg: &PublisherConfig,
    volatile: &VolatileQueue,
    config_id: &Arc<std::sync::RwLock<Option<String>>>,
    publish_in_progress: &Arc<AtomicBool>,
    shutdown: &Arc<AtomicBool>,
) {
    let (client, mut connection) = Client::new(mqtt_options(cfg), 10);
    // Drive the event loop on its own thread; the publish loop below only
    // needs the handle, never the notifications themselves.
    std::thread::spawn(move || {
        for notification in connection.iter() {
            if let Err(e) = notification {
                tracing::warn!(error = %e, "mqtt connection event");
            }
        }
    });

    loop {
        let item = volatile.get();
        let mut readout = match item {
            QueueItem::Shutdown => return,
            QueueItem::Readout(r) => r,
        };

        publish_in_progress.store(true, Ordering::SeqCst);
        readout.m.reading_offset = Some(unix_now() - readout.t);
        readout.m.config_id = config_id.read().unwrap().clone();

        let payload = readout.to_compact_string();
        let result = client.publish(DATA_TOPIC, QoS::AtLeastOnce, false, payload.into_bytes());
        publish_in_progress.store(false, Ordering::SeqCst);

        if let Err(e) = result {
            tracing::error!(error = %e, "publish failed, requeuing for retry");
            volatile.put(QueueItem::Readout(readout));
            std::thread::sleep(cfg.push_throttle_delay);
        }

        if shutdown.load(Ordering::SeqCst) && volatile.size() == 0 {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_carry_clean_session_false() {
        let cfg = PublisherConfig {
            bridge_host: "localhost".into(),
            bridge_port: 1883,
            client_id: "edge-agent-test".into(),
            push_timeout: Duration::from_secs(60),
            push_throttle_delay: Duration::from_secs(10),
        };
        let opts = mqtt_options(&cfg);
        assert!(!opts.clean_session());
    }
}
