//! Per-IP liveness state
//!
//! Every transition takes the current time explicitly; the tracker passes
//! the wall clock, tests pass whatever instant they need.

use crate::config::PulseConfig;
use chrono::{DateTime, Utc};
use dhpc_core::{mac_key, ComputeNodeConfig};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Convert a configured duration to a chrono span, saturating on overflow
pub(crate) fn span(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// Summary of an IP's liveness for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessStatus {
    /// Assumed alive and the last probe answered
    Alive,
    /// Assumed alive, not probed yet
    Assumed,
    /// Assumed alive but the last probe failed; death not yet confirmed
    Suspect,
    /// Confirmed dead, eligible for reuse
    Dead,
}

impl fmt::Display for LivenessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LivenessStatus::Alive => write!(f, "alive"),
            LivenessStatus::Assumed => write!(f, "assumed"),
            LivenessStatus::Suspect => write!(f, "suspect"),
            LivenessStatus::Dead => write!(f, "dead"),
        }
    }
}

/// Liveness record of one IP the tracker cares about
#[derive(Debug, Clone)]
pub struct IpAliveness {
    pub ip: String,

    /// Optimistic flag: set by registration or a successful probe,
    /// cleared only after `death_confirm` of failed probes
    pub assume_alive: bool,

    /// Result of the most recent probe
    pub checked_alive: bool,

    pub last_alive: Option<DateTime<Utc>>,
    pub last_check: Option<DateTime<Utc>>,

    /// Configs claiming this IP, at most one per MAC
    pub bound_configs: Vec<Arc<ComputeNodeConfig>>,
}

impl IpAliveness {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            assume_alive: false,
            checked_alive: false,
            last_alive: None,
            last_check: None,
            bound_configs: Vec::new(),
        }
    }

    /// Take a positive signal other than a probe as evidence of life
    pub fn assume_alive_at(&mut self, now: DateTime<Utc>) {
        self.assume_alive = true;
        self.last_alive = Some(now);
    }

    /// Bind a config, replacing an earlier binding for the same MAC
    pub fn bind(&mut self, cfg: Arc<ComputeNodeConfig>) {
        let key = mac_key(&cfg.mac);
        match self.bound_configs.iter_mut().find(|c| mac_key(&c.mac) == key) {
            Some(existing) => *existing = cfg,
            None => self.bound_configs.push(cfg),
        }
    }

    /// Remove the binding for `mac`, returning whether one existed
    pub fn unbind(&mut self, mac: &str) -> bool {
        let key = mac_key(mac);
        let before = self.bound_configs.len();
        self.bound_configs.retain(|c| mac_key(&c.mac) != key);
        self.bound_configs.len() != before
    }

    pub fn is_bound(&self) -> bool {
        !self.bound_configs.is_empty()
    }

    /// Whether a probe is allowed at `now`
    pub fn is_due(&self, now: DateTime<Utc>, interval: std::time::Duration) -> bool {
        match self.next_check_at(interval) {
            Some(next) => now >= next,
            None => true,
        }
    }

    /// Earliest time the next probe is allowed
    pub fn next_check_at(&self, interval: std::time::Duration) -> Option<DateTime<Utc>> {
        self.last_check
            .map(|last| last.checked_add_signed(span(interval)).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.checked_alive = true;
        self.last_check = Some(now);
        self.assume_alive_at(now);
    }

    /// Record a failed probe; the assumption of life survives until
    /// `death_confirm` has passed since the last sign of life.
    pub fn record_failure(&mut self, now: DateTime<Utc>, death_confirm: std::time::Duration) {
        self.checked_alive = false;
        self.last_check = Some(now);
        if self.assume_alive && self.has_been_silent(now, death_confirm) {
            self.assume_alive = false;
        }
    }

    /// Apply a probe result
    pub fn record_probe(&mut self, alive: bool, now: DateTime<Utc>, config: &PulseConfig) {
        if alive {
            self.record_success(now);
        } else {
            self.record_failure(now, config.death_confirm);
        }
    }

    /// Whether this record should be dropped from tracking
    pub fn is_forgettable(&self, now: DateTime<Utc>, forget_dead: std::time::Duration) -> bool {
        !self.assume_alive && self.has_been_silent(now, forget_dead)
    }

    fn has_been_silent(&self, now: DateTime<Utc>, window: std::time::Duration) -> bool {
        match self.last_alive {
            Some(last) => now.signed_duration_since(last) > span(window),
            None => true,
        }
    }

    /// Fold in the state of the live index after a probe ran without the lock:
    /// bindings always come from the live record, and a positive signal
    /// registered meanwhile wins over an older one.
    pub fn absorb_live(&mut self, live: &IpAliveness) {
        self.bound_configs = live.bound_configs.clone();
        if live.last_alive > self.last_alive {
            self.last_alive = live.last_alive;
            self.assume_alive = live.assume_alive;
        }
    }

    pub fn status(&self) -> LivenessStatus {
        match (self.assume_alive, self.checked_alive, self.last_check) {
            (false, _, _) => LivenessStatus::Dead,
            (true, true, _) => LivenessStatus::Alive,
            (true, false, None) => LivenessStatus::Assumed,
            (true, false, Some(_)) => LivenessStatus::Suspect,
        }
    }

    /// Most recently alive first, ties broken by most recently checked
    pub fn recency_order(a: &IpAliveness, b: &IpAliveness) -> Ordering {
        b.last_alive
            .cmp(&a.last_alive)
            .then_with(|| b.last_check.cmp(&a.last_check))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::{Duration, SystemTime};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn cfg(mac: &str, ip: &str) -> Arc<ComputeNodeConfig> {
        let text = format!("mac: '{}'\nip: {}\n", mac, ip);
        Arc::new(
            ComputeNodeConfig::from_text(format!("{}.yaml", mac), SystemTime::UNIX_EPOCH, text, None)
                .unwrap(),
        )
    }

    fn pulse() -> PulseConfig {
        PulseConfig::new()
            .with_check_interval(Duration::from_secs(10))
            .with_death_confirm(Duration::from_secs(60))
            .with_forget_dead(Duration::from_secs(600))
    }

    #[test]
    fn test_bind_replaces_same_mac() {
        let mut state = IpAliveness::new("10.0.0.5");
        state.bind(cfg("aa", "10.0.0.5"));
        state.bind(cfg("bb", "10.0.0.5"));
        state.bind(cfg("aa", "10.0.0.5"));
        assert_eq!(state.bound_configs.len(), 2);

        assert!(state.unbind("aa"));
        assert!(!state.unbind("aa"));
        assert!(state.unbind("bb"));
        assert!(!state.is_bound());
    }

    #[test]
    fn test_due_checks() {
        let mut state = IpAliveness::new("10.0.0.5");
        let interval = Duration::from_secs(10);
        assert!(state.is_due(t(0), interval));

        state.record_success(t(0));
        assert!(!state.is_due(t(9), interval));
        assert!(state.is_due(t(10), interval));
        assert_eq!(state.next_check_at(interval), Some(t(10)));
    }

    #[test]
    fn test_death_needs_confirmation() {
        let config = pulse();
        let mut state = IpAliveness::new("10.0.0.5");
        state.record_probe(true, t(0), &config);
        assert_eq!(state.status(), LivenessStatus::Alive);

        // within death_confirm of the last sign of life: still assumed alive
        state.record_probe(false, t(30), &config);
        assert!(state.assume_alive);
        assert_eq!(state.status(), LivenessStatus::Suspect);

        state.record_probe(false, t(60), &config);
        assert!(state.assume_alive);

        // strictly after the window the death is confirmed
        state.record_probe(false, t(61), &config);
        assert!(!state.assume_alive);
        assert_eq!(state.status(), LivenessStatus::Dead);
        assert_eq!(state.last_alive, Some(t(0)));
        assert_eq!(state.last_check, Some(t(61)));
    }

    #[test]
    fn test_success_revives() {
        let config = pulse();
        let mut state = IpAliveness::new("10.0.0.5");
        state.record_probe(false, t(0), &config);
        assert!(!state.assume_alive);

        state.record_probe(true, t(5), &config);
        assert!(state.assume_alive);
        assert!(state.checked_alive);
        assert_eq!(state.last_alive, Some(t(5)));
    }

    #[test]
    fn test_forget_window() {
        let config = pulse();
        let mut state = IpAliveness::new("10.0.0.5");
        state.assume_alive_at(t(0));
        assert_eq!(state.status(), LivenessStatus::Assumed);
        assert!(!state.is_forgettable(t(10_000), config.forget_dead));

        state.record_probe(false, t(100), &config);
        assert!(!state.is_forgettable(t(600), config.forget_dead));
        assert!(state.is_forgettable(t(601), config.forget_dead));

        // never seen alive at all
        let never = IpAliveness::new("10.0.0.6");
        assert!(never.is_forgettable(t(0), config.forget_dead));
    }

    #[test]
    fn test_absorb_live() {
        let mut probed = IpAliveness::new("10.0.0.5");
        probed.assume_alive_at(t(0));
        probed.record_failure(t(100), Duration::from_secs(60));
        assert!(!probed.assume_alive);

        let mut live = IpAliveness::new("10.0.0.5");
        live.assume_alive_at(t(90));
        live.bind(cfg("aa", "10.0.0.5"));

        probed.absorb_live(&live);
        assert!(probed.assume_alive);
        assert_eq!(probed.last_alive, Some(t(90)));
        assert_eq!(probed.bound_configs.len(), 1);
        assert!(!probed.checked_alive);
    }

    #[test]
    fn test_recency_order() {
        let mut a = IpAliveness::new("a");
        a.last_alive = Some(t(10));
        a.last_check = Some(t(10));
        let mut b = IpAliveness::new("b");
        b.last_alive = Some(t(20));
        let mut c = IpAliveness::new("c");
        c.last_alive = Some(t(10));
        c.last_check = Some(t(30));
        let d = IpAliveness::new("d");

        let mut list = vec![d, a, c, b];
        list.sort_by(IpAliveness::recency_order);
        let ips: Vec<_> = list.iter().map(|s| s.ip.as_str()).collect();
        assert_eq!(ips, vec!["b", "c", "a", "d"]);
    }
}
