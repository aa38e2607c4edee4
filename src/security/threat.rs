use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

use super::patterns::ThreatMatch;
use super::rate_limit::SlidingWindowLimiter;
use crate::config::ThreatConfig;

/// Upper bound on a timed block. Longer durations saturate here.
pub const MAX_BLOCK_DAYS: i64 = 3650;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockSource {
    /// Static deny list from configuration
    Config,
    /// Added by an operator through the admin API or CLI
    Manual,
    /// Added by the threat monitor after repeated offences
    Automatic,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockEntry {
    pub ip: IpAddr,
    pub reason: String,
    pub source: BlockSource,
    pub blocked_at: DateTime<Utc>,
    /// `None` means permanent
    pub expires_at: Option<DateTime<Utc>>,
}

impl BlockEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires) if expires <= now)
    }
}

/// Blocked client addresses. Expired entries read as absent.
#[derive(Default)]
pub struct IpBlocklist {
    entries: DashMap<IpAddr, BlockEntry>,
}

impl IpBlocklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ThreatConfig) -> Self {
        let list = Self::new();
        for ip in &config.deny_list {
            list.insert(*ip, "Static deny list".to_string(), BlockSource::Config, None);
        }
        list
    }

    pub fn block(&self, ip: IpAddr, reason: impl Into<String>, duration: Option<Duration>) -> BlockEntry {
        self.insert(ip, reason.into(), BlockSource::Manual, duration)
    }

    fn insert(&self, ip: IpAddr, reason: String, source: BlockSource, duration: Option<Duration>) -> BlockEntry {
        let now = Utc::now();
        let expires_at = duration.map(|d| now + clamp_block(d));
        let entry = BlockEntry {
            ip,
            reason,
            source,
            blocked_at: now,
            expires_at,
        };
        self.entries.insert(ip, entry.clone());
        entry
    }

    pub fn unblock(&self, ip: &IpAddr) -> Option<BlockEntry> {
        self.entries.remove(ip).map(|(_, entry)| entry)
    }

    pub fn is_blocked(&self, ip: &IpAddr) -> Option<BlockEntry> {
        let now = Utc::now();
        let entry = self.entries.get(ip)?.value().clone();
        if entry.is_expired_at(now) {
            self.entries.remove_if(ip, |_, e| e.is_expired_at(now));
            return None;
        }
        Some(entry)
    }

    pub fn list(&self) -> Vec<BlockEntry> {
        let now = Utc::now();
        let mut entries: Vec<BlockEntry> = self
            .entries
            .iter()
            .filter(|e| !e.is_expired_at(now))
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by(|a, b| b.blocked_at.cmp(&a.blocked_at));
        entries
    }

    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired_at(now));
        before.saturating_sub(self.entries.len())
    }
}

/// A timed block never turns permanent: anything chrono cannot represent,
/// or longer than [`MAX_BLOCK_DAYS`], is capped.
fn clamp_block(duration: Duration) -> chrono::Duration {
    let cap = chrono::Duration::days(MAX_BLOCK_DAYS);
    chrono::Duration::from_std(duration).map_or(cap, |d| d.min(cap))
}

/// One scanned request that matched at least one signature.
#[derive(Debug, Clone, Serialize)]
pub struct ThreatEvent {
    pub occurred_at: DateTime<Utc>,
    pub ip: IpAddr,
    pub method: String,
    pub path: String,
    pub matches: Vec<ThreatMatch>,
    pub blocked: bool,
    pub auto_blocked: bool,
}

/// Tracks detections per client and escalates repeat offenders to the blocklist.
pub struct ThreatMonitor {
    offences: SlidingWindowLimiter<IpAddr>,
    recent: Mutex<VecDeque<ThreatEvent>>,
    capacity: usize,
    threshold: u32,
    block_duration: Duration,
}

impl ThreatMonitor {
    pub fn new(config: &ThreatConfig) -> Self {
        Self {
            offences: SlidingWindowLimiter::new(
                config.offence_threshold,
                Duration::from_secs(config.offence_window_secs),
            ),
            recent: Mutex::new(VecDeque::with_capacity(config.recent_events_capacity.min(1024))),
            capacity: config.recent_events_capacity.max(1),
            threshold: config.offence_threshold.max(1),
            block_duration: Duration::from_secs(config.block_duration_secs),
        }
    }

    /// Record a detection. Returns the stored event; `auto_blocked` is set when
    /// this offence pushed the client over the threshold.
    pub fn record(
        &self,
        blocklist: &IpBlocklist,
        ip: IpAddr,
        method: &str,
        path: &str,
        matches: Vec<ThreatMatch>,
        blocked: bool,
    ) -> ThreatEvent {
        let offences = self.offences.hit(ip);
        let auto_blocked = offences as u32 >= self.threshold && blocklist.is_blocked(&ip).is_none();

        if auto_blocked {
            let reason = format!("{} threat detections within {}s", offences, self.offences.window().as_secs());
            blocklist.insert(ip, reason, BlockSource::Automatic, Some(self.block_duration));
            self.offences.reset(&ip);
            tracing::warn!(
                client_ip = %ip,
                offences,
                block_secs = self.block_duration.as_secs(),
                "Client auto-blocked after repeated threat detections"
            );
        }

        let event = ThreatEvent {
            occurred_at: Utc::now(),
            ip,
            method: method.to_string(),
            path: path.to_string(),
            matches,
            blocked,
            auto_blocked,
        };

        let mut recent = self.recent.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(event.clone());

        event
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<ThreatEvent> {
        let recent = self.recent.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        recent.iter().rev().take(limit).cloned().collect()
    }

    pub fn offences(&self, ip: &IpAddr) -> usize {
        self.offences.count(ip)
    }

    pub fn purge_idle(&self) -> usize {
        self.offences.purge_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::security::patterns::scan_text;

    fn threat_config(threshold: u32) -> ThreatConfig {
        let mut config = AppConfig::development().threat;
        config.offence_threshold = threshold;
        config.recent_events_capacity = 3;
        config
    }

    #[test]
    fn manual_blocks_expire() {
        let list = IpBlocklist::new();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        list.block(ip, "testing", Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(list.is_blocked(&ip).is_none());
        assert!(list.list().is_empty());

        list.block(ip, "permanent", None);
        assert_eq!(list.is_blocked(&ip).unwrap().reason, "permanent");
        assert!(list.unblock(&ip).is_some());
        assert!(list.is_blocked(&ip).is_none());
    }

    #[test]
    fn oversized_durations_saturate_instead_of_going_permanent() {
        let list = IpBlocklist::new();
        let ip: IpAddr = "10.0.0.2".parse().unwrap();

        let entry = list.block(ip, "forever-ish", Some(Duration::from_secs(u64::MAX)));
        let expires = entry.expires_at.expect("timed block keeps an expiry");
        let cap = entry.blocked_at + chrono::Duration::days(MAX_BLOCK_DAYS);
        assert_eq!(expires, cap);

        let entry = list.block(ip, "an hour", Some(Duration::from_secs(3600)));
        assert_eq!(entry.expires_at.unwrap() - entry.blocked_at, chrono::Duration::hours(1));
    }

    #[test]
    fn deny_list_is_permanent() {
        let mut config = threat_config(5);
        config.deny_list = vec!["192.0.2.7".parse().unwrap()];
        let list = IpBlocklist::from_config(&config);
        let entry = list.is_blocked(&"192.0.2.7".parse().unwrap()).unwrap();
        assert_eq!(entry.source, BlockSource::Config);
        assert!(entry.expires_at.is_none());
    }

    #[test]
    fn repeat_offender_is_auto_blocked() {
        let config = threat_config(2);
        let monitor = ThreatMonitor::new(&config);
        let list = IpBlocklist::new();
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        let hits = scan_text("<script>", "query.q");

        let first = monitor.record(&list, ip, "GET", "/api/x", hits.clone(), false);
        assert!(!first.auto_blocked);
        assert!(list.is_blocked(&ip).is_none());

        let second = monitor.record(&list, ip, "GET", "/api/x", hits, false);
        assert!(second.auto_blocked);
        let entry = list.is_blocked(&ip).expect("blocked");
        assert_eq!(entry.source, BlockSource::Automatic);
        assert!(entry.expires_at.is_some());
    }

    #[test]
    fn recent_events_are_bounded_newest_first() {
        let monitor = ThreatMonitor::new(&threat_config(100));
        let list = IpBlocklist::new();
        let ip: IpAddr = "198.51.100.1".parse().unwrap();
        for i in 0..5 {
            monitor.record(&list, ip, "POST", &format!("/p/{}", i), Vec::new(), false);
        }
        let recent = monitor.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].path, "/p/4");
        assert_eq!(recent[2].path, "/p/2");
    }
}
