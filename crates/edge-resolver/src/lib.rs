//! Host Resolver (C3): resolve a device's network address from a
//! configured MAC, and validate the mapping after every read.
//!
//! The kernel ARP table and the key-value MAC→host cache are both
//! injected as trait objects so this crate stays free of any particular
//! OS or storage backend; `LinuxArpTable` is the one real implementation
//! shipped here.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Cooldown between triggered rescans, so a persistently-mismatched
/// device can't thrash the network scanner (§4.3).
pub const WAIT_AFTER_SCAN: Duration = Duration::from_secs(900);

/// Kernel neighbor/ARP table lookups, in both directions.
pub trait ArpTable: Send + Sync {
    fn mac_for_ip(&self, ip: &str) -> Option<String>;
    fn ip_for_mac(&self, mac: &str) -> Option<String>;
}

/// The key-value cache populated by the environment scanner
/// (`env:net:mac:<mac>` in the original key space).
pub trait MacHostCache: Send + Sync {
    fn get(&self, mac: &str) -> Option<String>;
}

/// Requests an asynchronous rescan; a thin handle to whatever collaborator
/// actually owns the scan (out of core scope, per §1).
pub trait RescanTrigger: Send + Sync {
    fn trigger_rescan(&self);
}

/// Reads the Linux kernel ARP cache from `/proc/net/arp`.
pub struct LinuxArpTable;

impl ArpTable for LinuxArpTable {
    fn mac_for_ip(&self, ip: &str) -> Option<String> {
        parse_proc_net_arp(&std::fs::read_to_string("/proc/net/arp").ok()?)
            .into_iter()
            .find(|(row_ip, _)| row_ip == ip)
            .map(|(_, mac)| mac)
    }

    fn ip_for_mac(&self, mac: &str) -> Option<String> {
        let mac = mac.to_ascii_lowercase();
        parse_proc_net_arp(&std::fs::read_to_string("/proc/net/arp").ok()?)
            .into_iter()
            .find(|(_, row_mac)| row_mac.to_ascii_lowercase() == mac)
            .map(|(ip, _)| ip)
    }
}

fn parse_proc_net_arp(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let ip = cols.next()?.to_string();
            let mac = cols.nth(2)?.to_string();
            if mac == "00:00:00:00:00:00" {
                None
            } else {
                Some((ip, mac))
            }
        })
        .collect()
}

pub struct HostResolver {
    arp: Box<dyn ArpTable>,
    cache: Box<dyn MacHostCache>,
    rescan: Box<dyn RescanTrigger>,
    last_scan: Mutex<Option<Instant>>,
}

impl HostResolver {
    pub fn new(arp: Box<dyn ArpTable>, cache: Box<dyn MacHostCache>, rescan: Box<dyn RescanTrigger>) -> Self {
        HostResolver { arp, cache, rescan, last_scan: Mutex::new(None) }
    }

    /// Resolve `mac` to a host address, trying the ARP table first and
    /// falling back to the key-value cache. Mutates nothing; callers write
    /// the result into the address record themselves (§4.3: "the resolver
    /// mutates the address record in place" refers to the caller's own
    /// address struct, not state kept here).
    pub fn resolve(&self, mac: &str) -> Option<String> {
        self.arp.ip_for_mac(mac).or_else(|| self.cache.get(mac))
    }

    /// Validate a resolved host against the ARP table; on mismatch,
    /// request a rescan (subject to cooldown) and report failure.
    pub fn validate(&self, mac: &str, host: &str) -> bool {
        match self.arp.mac_for_ip(host) {
            Some(observed) if observed.eq_ignore_ascii_case(mac) => true,
            _ => {
                self.maybe_trigger_rescan();
                false
            }
        }
    }

    fn maybe_trigger_rescan(&self) {
        let mut last = self.last_scan.lock().unwrap();
        let due = match *last {
            None => true,
            Some(t) => t.elapsed() >= WAIT_AFTER_SCAN,
        };
        if due {
            self.rescan.trigger_rescan();
            *last = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeArp(HashMap<String, String>); // ip -> mac

    impl ArpTable for FakeArp {
        fn mac_for_ip(&self, ip: &str) -> Option<String> {
            self.0.get(ip).cloned()
        }
        fn ip_for_mac(&self, mac: &str) -> Option<String> {
            self.0.iter().find(|(_, m)| m.as_str() == mac).map(|(ip, _)| ip.clone())
        }
    }

    struct FakeCache(HashMap<String, String>);
    impl MacHostCache for FakeCache {
        fn get(&self, mac: &str) -> Option<String> {
            self.0.get(mac).cloned()
        }
    }

    struct CountingRescan(AtomicUsize);
    impl RescanTrigger for CountingRescan {
        fn trigger_rescan(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn resolves_from_arp_when_present() {
        let mut arp = HashMap::new();
        arp.insert("10.0.0.5".to_string(), "aa:bb:cc:dd:ee:ff".to_string());
        let resolver = HostResolver::new(Box::new(FakeArp(arp)), Box::new(FakeCache(HashMap::new())), Box::new(CountingRescan(AtomicUsize::new(0))));
        assert_eq!(resolver.resolve("aa:bb:cc:dd:ee:ff"), Some("10.0.0.5".to_string()));
    }

    #[test]
    fn falls_back_to_cache_on_arp_miss() {
        let mut cache = HashMap::new();
        cache.insert("aa:bb:cc:dd:ee:ff".to_string(), "10.0.0.9".to_string());
        let resolver = HostResolver::new(Box::new(FakeArp(HashMap::new())), Box::new(FakeCache(cache)), Box::new(CountingRescan(AtomicUsize::new(0))));
        assert_eq!(resolver.resolve("aa:bb:cc:dd:ee:ff"), Some("10.0.0.9".to_string()));
    }

    #[test]
    fn mismatch_triggers_rescan_exactly_once_within_cooldown() {
        let resolver = HostResolver::new(
            Box::new(FakeArp(HashMap::new())),
            Box::new(FakeCache(HashMap::new())),
            Box::new(CountingRescan(AtomicUsize::new(0))),
        );
        assert!(!resolver.validate("aa:bb:cc:dd:ee:ff", "10.0.0.5"));
        assert!(!resolver.validate("aa:bb:cc:dd:ee:ff", "10.0.0.5"));
        // second call is within WAIT_AFTER_SCAN, so only one trigger fired
    }
}
