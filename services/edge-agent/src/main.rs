// edge-agent: polls field devices and forwards readings to the cloud.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use edge_agent::agent::{self, Agent, ConfigPaths};
use edge_agent::config::{load_base_config, load_cached_driver_registry, load_driver_dir, merged_driver_registry};
use edge_agent::config_watch::{ConfigStatusSource, HttpConfigStatusSource, StaticConfigStatusSource};
use edge_agent::kvstore::{KvStore, KvStoreCache, LoggingRescanTrigger};
use edge_agent::publisher::PublisherConfig;
use edge_resolver::{HostResolver, LinuxArpTable};
use tracing::info;

fn env_path(name: &str, default: &str) -> PathBuf {
    std::env::var(name).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level()))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "edge-agent starting");

    let snap = env_path("SNAP", "/snap/edge-agent/current");
    let snap_common = env_path("SNAP_COMMON", "/var/snap/edge-agent/common");
    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
    let base_config_path = snap.join("provisioning/config.json");
    let driver_dir = snap.join("drivers");

    let base_config = match load_base_config(&base_config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let base_drivers = match load_driver_dir(&driver_dir) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("FATAL: failed to load driver registry: {e}");
            std::process::exit(1);
        }
    };

    let cached_drivers = load_cached_driver_registry(&redis_url);
    let drivers = merged_driver_registry(&base_drivers, cached_drivers.as_ref(), &base_config);

    info!(
        node_id = %base_config.node_id,
        devices = base_config.devices.len(),
        readings = base_config.readings.len(),
        "config loaded"
    );

    let node_id = base_config.node_id.clone();
    let config_id = edge_agent::config_watch::config_id(&base_config).ok();
    let resolver = build_host_resolver(&redis_url);

    let queue_db = snap_common.join("queue.db");
    let paths = ConfigPaths { base_config: base_config_path, driver_dir, redis_url: redis_url.clone() };
    let (agent, durable) = match Agent::new(base_config, drivers, &queue_db, paths, resolver) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("FATAL: failed to open durable queue: {e}");
            std::process::exit(1);
        }
    };

    *agent.config_id_cell.write().unwrap() = config_id.clone();

    let publisher_cfg = {
        let config = agent.config.read().unwrap();
        PublisherConfig {
            bridge_host: std::env::var("MQTT_BRIDGE_HOST").unwrap_or_else(|_| "localhost".to_string()),
            bridge_port: std::env::var("MQTT_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(1883),
            client_id: format!("edge-agent-{}", config.node_id),
            push_timeout: Duration::from_secs_f64(config.push_timeout),
            push_throttle_delay: Duration::from_secs_f64(config.push_throttle_delay),
        }
    };

    let config_source = build_config_source(&node_id, config_id);

    info!(
        bridge_host = %publisher_cfg.bridge_host,
        bridge_port = publisher_cfg.bridge_port,
        "starting scheduler, spill controller, publisher, and config watcher"
    );

    let agent = Arc::new(agent);
    let shutdown_agent = agent.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("signal received, shutting down after the current cycle");
        shutdown_agent.shutdown.store(true, Ordering::SeqCst);
    }) {
        tracing::warn!(error = %e, "failed to install signal handler");
    }

    agent::run_to_completion(agent, durable, publisher_cfg, config_source);
}

fn log_level() -> String {
    std::env::var("LOG_LEVEL")
        .or_else(|_| std::env::var("LOGGING_LEVEL"))
        .unwrap_or_else(|_| "info".to_string())
}

/// Build the host resolver (C3) from a best-effort Redis connection; MAC
/// resolution falls back to ARP-only (no cache, no rescan log) if the
/// cache is unreachable rather than blocking startup on it.
fn build_host_resolver(redis_url: &str) -> Option<Arc<HostResolver>> {
    match KvStore::connect(redis_url) {
        Ok(store) => Some(Arc::new(HostResolver::new(Box::new(LinuxArpTable), Box::new(KvStoreCache(Mutex::new(store))), Box::new(LoggingRescanTrigger)))),
        Err(e) => {
            tracing::warn!(error = %e, "kvstore unavailable, host resolver will rely on ARP only");
            None
        }
    }
}

/// Poll the cloud endpoint named by `REMOTE_HOST` when set; otherwise a
/// static source that never reports a change, since there's nothing to
/// poll.
fn build_config_source(node_id: &str, current_id: Option<String>) -> Box<dyn ConfigStatusSource> {
    match std::env::var("REMOTE_HOST") {
        Ok(host) => {
            let api_version = std::env::var("REMOTE_API_VERSION").unwrap_or_else(|_| "v1".to_string());
            let access_key = std::env::var("ACCESS_KEY").unwrap_or_default();
            Box::new(HttpConfigStatusSource::new(&host, &api_version, node_id, access_key))
        }
        Err(_) => Box::new(StaticConfigStatusSource { current_id: current_id.unwrap_or_default() }),
    }
}
