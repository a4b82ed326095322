//! Config identity and watcher (A2).
//!
//! `config_id` is a content digest of the config as loaded — stable
//! across restarts for identical content, so the cloud side can tell
//! "nothing changed" from "new config accepted" without comparing the
//! full document. The watcher polls a remote collaborator for the
//! currently active/candidate config id and reloads when it diverges.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use edge_model::Config;
use sha2::{Digest, Sha256};

pub const CONFIG_REFRESH_DELAY: Duration = Duration::from_secs(900);
pub const API_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Stable content digest, independent of JSON key ordering: serializes to
/// a canonical `serde_json::Value` (whose object keys are sorted under
/// the "preserve_order" feature being off) before hashing.
pub fn config_id(config: &Config) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_vec(config)?;
    let digest = Sha256::digest(&canonical);
    Ok(hex::encode(digest))
}

/// What the cloud side reports as the config it currently wants active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfigStatus {
    pub active_config: Option<String>,
    pub candidate_config: Option<String>,
}

/// The remote collaborator the watcher polls; a thin seam so the polling
/// decision can be unit tested without a real HTTP/MQTT round trip.
/// `Send` so a source can be handed to the watcher thread.
pub trait ConfigStatusSource: Send {
    fn fetch(&self) -> Result<RemoteConfigStatus, String>;
}

/// True when the remote reports a config id (active or candidate) that
/// doesn't match what's currently loaded — time to refetch and reload.
pub fn new_config_available(current_id: &str, remote: &RemoteConfigStatus) -> bool {
    let matches_active = remote.active_config.as_deref() == Some(current_id);
    let matches_candidate = remote.candidate_config.as_deref() == Some(current_id);
    !(matches_active || matches_candidate)
}

/// Polls `https://<host>/api/<api_version>/nodes/<node_id>` with the
/// node's access key, the same endpoint shape the node's own management
/// agent uses to learn about a pending config change.
pub struct HttpConfigStatusSource {
    client: reqwest::blocking::Client,
    url: String,
    access_key: String,
}

impl HttpConfigStatusSource {
    pub fn new(remote_host: &str, api_version: &str, node_id: &str, access_key: String) -> Self {
        HttpConfigStatusSource {
            client: reqwest::blocking::Client::new(),
            url: format!("https://{remote_host}/api/{api_version}/nodes/{node_id}"),
            access_key,
        }
    }
}

impl ConfigStatusSource for HttpConfigStatusSource {
    fn fetch(&self) -> Result<RemoteConfigStatus, String> {
        let resp = self
            .client
            .get(&self.url)
            .header("Authorization", &self.access_key)
            .send()
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;
        let body: serde_json::Value = resp.json().map_err(|e| e.to_string())?;
        Ok(RemoteConfigStatus {
            active_config: body.get("active_config").and_then(|v| v.as_str()).map(str::to_string),
            candidate_config: body.get("candidate_config").and_then(|v| v.as_str()).map(str::to_string),
        })
    }
}

/// Reports the already-loaded id as both active and candidate, so
/// `new_config_available` never fires — used when no remote endpoint is
/// configured and the node has nothing to poll.
pub struct StaticConfigStatusSource {
    pub current_id: String,
}

impl ConfigStatusSource for StaticConfigStatusSource {
    fn fetch(&self) -> Result<RemoteConfigStatus, String> {
        Ok(RemoteConfigStatus { active_config: Some(self.current_id.clone()), candidate_config: None })
    }
}

/// Sleep in short slices so a shutdown request doesn't have to wait out
/// a full `CONFIG_REFRESH_DELAY`.
fn sleep_interruptible(total: Duration, shutdown: &AtomicBool) {
    let step = Duration::from_secs(1);
    let mut slept = Duration::ZERO;
    while slept < total {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let chunk = step.min(total - slept);
        std::thread::sleep(chunk);
        slept += chunk;
    }
}

/// The config watcher thread (A2): poll `source` on `CONFIG_REFRESH_DELAY`,
/// retrying a failed fetch sooner on `API_RETRY_DELAY`, and flag
/// `reload_pending` when the remote id diverges from `current_id`. The
/// actual reload happens at the next cycle boundary — never mid-cycle.
pub fn run(source: Box<dyn ConfigStatusSource>, current_id: Arc<RwLock<Option<String>>>, reload_pending: Arc<AtomicBool>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::SeqCst) {
        let delay = match source.fetch() {
            Ok(remote) => {
                let current = current_id.read().unwrap().clone().unwrap_or_default();
                if new_config_available(&current, &remote) {
                    tracing::info!("remote config id diverges from local, reload requested at next cycle boundary");
                    reload_pending.store(true, Ordering::SeqCst);
                }
                CONFIG_REFRESH_DELAY
            }
            Err(e) => {
                tracing::warn!(error = %e, "config status check failed, retrying sooner");
                API_RETRY_DELAY
            }
        };
        sleep_interruptible(delay, &shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config() -> Config {
        Config {
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
        }
    }

    #[test]
    fn identical_content_yields_identical_id() {
        assert_eq!(config_id(&config()).unwrap(), config_id(&config()).unwrap());
    }

    #[test]
    fn differing_content_yields_differing_id() {
        let mut other = config();
        other.node_id = "different".into();
        assert_ne!(config_id(&config()).unwrap(), config_id(&other).unwrap());
    }

    #[test]
    fn matching_active_means_no_new_config() {
        let remote = RemoteConfigStatus { active_config: Some("abc".into()), candidate_config: None };
        assert!(!new_config_available("abc", &remote));
    }

    #[test]
    fn mismatched_ids_mean_new_config_available() {
        let remote = RemoteConfigStatus { active_config: Some("abc".into()), candidate_config: Some("def".into()) };
        assert!(new_config_available("xyz", &remote));
    }

    #[test]
    fn static_source_never_reports_a_new_config() {
        let source = StaticConfigStatusSource { current_id: "abc".into() };
        let status = source.fetch().unwrap();
        assert!(!new_config_available("abc", &status));
    }

    /// Reports a divergent id once, then stops the watcher loop itself so
    /// the test doesn't have to wait out a real `CONFIG_REFRESH_DELAY`.
    struct OneShotDivergentSource {
        shutdown: Arc<AtomicBool>,
    }

    impl ConfigStatusSource for OneShotDivergentSource {
        fn fetch(&self) -> Result<RemoteConfigStatus, String> {
            self.shutdown.store(true, Ordering::SeqCst);
            Ok(RemoteConfigStatus { active_config: Some("remote".into()), candidate_config: None })
        }
    }

    #[test]
    fn watcher_flags_reload_pending_on_divergence() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let current_id = Arc::new(RwLock::new(Some("local".to_string())));
        let reload_pending = Arc::new(AtomicBool::new(false));
        let source = Box::new(OneShotDivergentSource { shutdown: shutdown.clone() });

        run(source, current_id, reload_pending.clone(), shutdown);

        assert!(reload_pending.load(Ordering::SeqCst));
    }
}
