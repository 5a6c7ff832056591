//! Aliveness tracker
//!
//! Holds the per-IP liveness index, a bounded probe queue, and the background
//! loop that drains it. The index lock is never held across a probe: a probe
//! result is merged back into whatever the index holds once the probe returns,
//! and dropped if the IP was forgotten meanwhile.

use crate::aliveness::IpAliveness;
use crate::config::PulseConfig;
use crate::probe::Prober;
use crate::{PulseError, Result};
use chrono::{DateTime, Utc};
use dhpc_core::ComputeNodeConfig;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// Answer of [`AlivenessTracker::check_alive`]
#[derive(Debug, Clone)]
pub struct AliveCheck {
    pub alive: bool,
    pub last_alive: Option<DateTime<Utc>>,
    pub bound_configs: Vec<Arc<ComputeNodeConfig>>,
}

impl AliveCheck {
    fn unknown() -> Self {
        Self {
            alive: false,
            last_alive: None,
            bound_configs: Vec::new(),
        }
    }

    fn of(state: &IpAliveness) -> Self {
        Self {
            alive: state.assume_alive,
            last_alive: state.last_alive,
            bound_configs: state.bound_configs.clone(),
        }
    }

    /// Never seen alive and claimed by no config
    pub fn is_virgin(&self) -> bool {
        !self.alive && self.last_alive.is_none() && self.bound_configs.is_empty()
    }
}

/// What one pass of the probe loop did with a queued IP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The IP is not tracked (never cared about, or forgotten)
    Untracked,
    /// Checked too recently; the check is close enough to be re-queued
    Deferred,
    /// Checked too recently; dropped until something enqueues it again
    Skipped,
    /// Probed, with the resulting assumption
    Probed { alive: bool },
    /// Probed dead for long enough to be dropped from tracking
    Evicted,
    /// The probe could not run
    ProbeFailed,
}

/// Tracker counters
#[derive(Debug, Default)]
struct Counters {
    probes: AtomicU64,
    probe_errors: AtomicU64,
    evictions: AtomicU64,
    dropped_enqueues: AtomicU64,
}

/// Point-in-time statistics of the tracker
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackerStats {
    pub tracked: usize,
    pub queued: usize,
    pub deferred: usize,
    pub probes: u64,
    pub probe_errors: u64,
    pub evictions: u64,
    pub dropped_enqueues: u64,
}

struct Inner {
    config: PulseConfig,
    prober: Arc<dyn Prober>,
    index: Mutex<HashMap<String, IpAliveness>>,
    queue_tx: mpsc::Sender<String>,
    queue_rx: Mutex<Option<mpsc::Receiver<String>>>,
    /// IPs with a re-queue pending in [`AlivenessTracker::defer`]
    deferred: Mutex<HashSet<String>>,
    shutdown_tx: watch::Sender<bool>,
    counters: Counters,
}

/// Tracks liveness of the IPs compute node configs claim
#[derive(Clone)]
pub struct AlivenessTracker {
    inner: Arc<Inner>,
}

impl AlivenessTracker {
    pub fn new(config: PulseConfig, prober: Arc<dyn Prober>) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                prober,
                index: Mutex::new(HashMap::new()),
                queue_tx,
                queue_rx: Mutex::new(Some(queue_rx)),
                deferred: Mutex::new(HashSet::new()),
                shutdown_tx,
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &PulseConfig {
        &self.inner.config
    }

    /// Spawn the probe loop. Only one loop may run per tracker.
    pub fn start(&self) -> Result<JoinHandle<()>> {
        let mut queue_rx = self
            .inner
            .queue_rx
            .lock()
            .take()
            .ok_or(PulseError::AlreadyStarted)?;
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        let tracker = self.clone();

        info!(
            "Starting aliveness tracker: interval={:?}, death_confirm={:?}, forget_dead={:?}",
            self.inner.config.check_interval,
            self.inner.config.death_confirm,
            self.inner.config.forget_dead
        );

        Ok(tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {}
                    next = queue_rx.recv() => match next {
                        Some(ip) => {
                            tracker.check_cycle(&ip, Utc::now()).await;
                        }
                        None => break,
                    },
                }
            }
            info!("Aliveness tracker stopped");
        }))
    }

    /// Ask the probe loop to exit after its current probe
    pub fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
    }

    /// Track `ip` on behalf of `cfg` and queue a check of it.
    ///
    /// With `assume_alive_now` the IP is taken as alive as of now, which
    /// restarts its death confirmation window.
    pub fn care_about(&self, ip: &str, assume_alive_now: bool, cfg: Arc<ComputeNodeConfig>) {
        self.care_about_at(ip, assume_alive_now, cfg, Utc::now());
    }

    fn care_about_at(
        &self,
        ip: &str,
        assume_alive_now: bool,
        cfg: Arc<ComputeNodeConfig>,
        now: DateTime<Utc>,
    ) {
        {
            let mut index = self.inner.index.lock();
            let state = index
                .entry(ip.to_string())
                .or_insert_with(|| IpAliveness::new(ip));
            if assume_alive_now {
                state.assume_alive_at(now);
            }
            trace!("Caring about {} for {}", ip, cfg.mac);
            state.bind(cfg);
        }
        self.enqueue(ip);
    }

    /// Drop the binding of `cfg` to its IP; the IP stops being tracked
    /// once no config claims it.
    pub fn forget(&self, cfg: &ComputeNodeConfig) {
        let mut index = self.inner.index.lock();
        if let Some(state) = index.get_mut(&cfg.ip) {
            state.unbind(&cfg.mac);
            if !state.is_bound() {
                debug!("No config claims {} any more, untracking it", cfg.ip);
                index.remove(&cfg.ip);
            }
        }
    }

    /// Current knowledge of `ip`, probing it directly unless it is tracked
    /// and assumed alive.
    ///
    /// A successful probe of an untracked IP starts tracking it; a failed one
    /// leaves it untracked.
    pub async fn check_alive(&self, ip: &str) -> Result<AliveCheck> {
        let now = Utc::now();
        let (due, known_alive) = {
            let index = self.inner.index.lock();
            match index.get(ip) {
                Some(state) => (
                    state.is_due(now, self.inner.config.check_interval),
                    state.assume_alive.then(|| AliveCheck::of(state)),
                ),
                None => (false, None),
            }
        };
        if due {
            self.enqueue(ip);
        }
        if let Some(check) = known_alive {
            return Ok(check);
        }

        let alive = self.probe(ip).await?;
        let now = Utc::now();

        let mut index = self.inner.index.lock();
        match index.get_mut(ip) {
            Some(state) => {
                state.record_probe(alive, now, &self.inner.config);
                Ok(AliveCheck::of(state))
            }
            None if alive => {
                let mut state = IpAliveness::new(ip);
                state.record_success(now);
                let check = AliveCheck::of(&state);
                index.insert(ip.to_string(), state);
                Ok(check)
            }
            None => Ok(AliveCheck::unknown()),
        }
    }

    /// Snapshot of every tracked IP, most recently alive first.
    /// IPs due for a check are queued.
    pub fn list_cared(&self) -> Vec<IpAliveness> {
        let now = Utc::now();
        let mut states: Vec<IpAliveness> = self.inner.index.lock().values().cloned().collect();

        for state in &states {
            if state.is_due(now, self.inner.config.check_interval) {
                self.enqueue(&state.ip);
            }
        }

        states.sort_by(IpAliveness::recency_order);
        states
    }

    /// Snapshot of one tracked IP
    pub fn state_of(&self, ip: &str) -> Option<IpAliveness> {
        self.inner.index.lock().get(ip).cloned()
    }

    /// Process one queued IP as of `now`
    pub async fn check_cycle(&self, ip: &str, now: DateTime<Utc>) -> CycleOutcome {
        let config = &self.inner.config;
        let snapshot = {
            let index = self.inner.index.lock();
            let Some(state) = index.get(ip) else {
                trace!("{} is no longer tracked", ip);
                return CycleOutcome::Untracked;
            };
            if let Some(next) = state
                .next_check_at(config.check_interval)
                .filter(|next| now < *next)
            {
                let remaining = (next - now).to_std().unwrap_or_default();
                drop(index);
                return self.defer(ip, remaining);
            }
            state.clone()
        };

        let alive = match self.probe(ip).await {
            Ok(alive) => alive,
            Err(e) => {
                error!("Failed to probe {}: {}", ip, e);
                return CycleOutcome::ProbeFailed;
            }
        };

        let mut probed = snapshot;
        probed.record_probe(alive, now, config);

        let mut index = self.inner.index.lock();
        let Some(live) = index.get(ip) else {
            debug!("{} was forgotten while being probed, dropping the result", ip);
            return CycleOutcome::Untracked;
        };
        probed.absorb_live(live);

        if probed.is_forgettable(now, config.forget_dead) {
            index.remove(ip);
            self.inner.counters.evictions.fetch_add(1, Ordering::Relaxed);
            info!("{} has been dead for over {:?}, untracking it", ip, config.forget_dead);
            return CycleOutcome::Evicted;
        }

        let assumed = probed.assume_alive;
        index.insert(ip.to_string(), probed);
        CycleOutcome::Probed { alive: assumed }
    }

    /// Re-queue a check that is due soon, provided the queue has room to spare.
    ///
    /// At most one re-queue is pending per IP, so there are never more
    /// sleeping re-queues than tracked IPs.
    fn defer(&self, ip: &str, remaining: std::time::Duration) -> CycleOutcome {
        let capacity = self.inner.queue_tx.max_capacity();
        if remaining >= self.inner.config.recheck_window() || self.queue_len() * 2 >= capacity {
            trace!("Skipping check of {}, next due in {:?}", ip, remaining);
            return CycleOutcome::Skipped;
        }
        if !self.inner.deferred.lock().insert(ip.to_string()) {
            trace!("Check of {} already re-queued", ip);
            return CycleOutcome::Deferred;
        }

        let inner = self.inner.clone();
        let ip = ip.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            inner.deferred.lock().remove(&ip);
            if inner.queue_tx.try_send(ip.clone()).is_err() {
                debug!("Could not re-queue check of {}", ip);
            }
        });
        CycleOutcome::Deferred
    }

    /// Queue a check of `ip`; when the queue is full the request is dropped
    pub fn enqueue(&self, ip: &str) {
        match self.inner.queue_tx.try_send(ip.to_string()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.inner
                    .counters
                    .dropped_enqueues
                    .fetch_add(1, Ordering::Relaxed);
                debug!("Probe queue full, not queueing {}", ip);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Probe queue closed, not queueing {}", ip);
            }
        }
    }

    /// Number of checks waiting in the queue
    pub fn queue_len(&self) -> usize {
        self.inner.queue_tx.max_capacity() - self.inner.queue_tx.capacity()
    }

    pub fn stats(&self) -> TrackerStats {
        let counters = &self.inner.counters;
        TrackerStats {
            tracked: self.inner.index.lock().len(),
            queued: self.queue_len(),
            deferred: self.inner.deferred.lock().len(),
            probes: counters.probes.load(Ordering::Relaxed),
            probe_errors: counters.probe_errors.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            dropped_enqueues: counters.dropped_enqueues.load(Ordering::Relaxed),
        }
    }

    async fn probe(&self, ip: &str) -> Result<bool> {
        self.inner.counters.probes.fetch_add(1, Ordering::Relaxed);
        let result = self
            .inner
            .prober
            .probe(ip, self.inner.config.ping_count)
            .await;
        if result.is_err() {
            self.inner
                .counters
                .probe_errors
                .fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}
