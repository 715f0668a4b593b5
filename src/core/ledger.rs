//! Per-identity sliding-window request log.
//!
//! Each identity owns a time-ordered queue of request instants guarded by
//! its own mutex, so work on one identity never waits on another. The map
//! shard lock is only held long enough to look up or insert the entry.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::utils::{AdmissionError, AdmissionResult};

/// Time-ordered request instants for a single identity
#[derive(Debug, Default)]
pub struct IdentityLog {
    events: VecDeque<Instant>,
}

impl IdentityLog {
    /// Append a request observed at `now`
    pub fn record(&mut self, now: Instant) {
        // Clock reads are monotonic, but keep the queue ordered even if a
        // caller hands us a stale instant.
        let at = match self.events.back() {
            Some(last) if *last > now => *last,
            _ => now,
        };
        self.events.push_back(at);
    }

    /// Iterate the events within `[now - window, now]`, oldest first
    pub fn within(&self, now: Instant, window: Duration) -> impl Iterator<Item = &Instant> + '_ {
        let cutoff = now.checked_sub(window);
        let start = match cutoff {
            Some(cutoff) => self.events.partition_point(|at| *at < cutoff),
            None => 0,
        };
        self.events.range(start..)
    }

    /// Number of events within `[now - window, now]`
    pub fn count_within(&self, now: Instant, window: Duration) -> usize {
        match now.checked_sub(window) {
            Some(cutoff) => self.events.len() - self.events.partition_point(|at| *at < cutoff),
            None => self.events.len(),
        }
    }

    /// Drop every event older than `now - horizon`; returns how many went
    pub fn prune(&mut self, now: Instant, horizon: Duration) -> usize {
        let Some(cutoff) = now.checked_sub(horizon) else {
            return 0;
        };
        let mut removed = 0;
        while let Some(oldest) = self.events.front() {
            if *oldest >= cutoff {
                break;
            }
            self.events.pop_front();
            removed += 1;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

type SharedLog = Arc<Mutex<IdentityLog>>;

/// Concurrent map of identity to request log
#[derive(Debug, Default)]
pub struct RequestLedger {
    entries: DashMap<String, SharedLog>,
}

impl RequestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to the identity's log, creating it on
    /// first use. Everything `f` does is one atomic step for that identity.
    pub fn with_identity<R>(
        &self,
        identity: &str,
        f: impl FnOnce(&mut IdentityLog) -> R,
    ) -> AdmissionResult<R> {
        let log = self.log_for(identity);
        let mut guard = log
            .lock()
            .map_err(|_| AdmissionError::LockPoisoned("request ledger entry"))?;
        Ok(f(&mut guard))
    }

    /// Record a request for `identity` at the current instant
    pub fn record_request(&self, identity: &str) -> AdmissionResult<()> {
        let now = Instant::now();
        self.with_identity(identity, |log| log.record(now))
    }

    /// Timestamps within the last `window_seconds`, oldest first
    pub fn window(&self, identity: &str, window_seconds: u64) -> AdmissionResult<Vec<Instant>> {
        let Some(log) = self.existing(identity) else {
            return Ok(Vec::new());
        };
        let guard = log
            .lock()
            .map_err(|_| AdmissionError::LockPoisoned("request ledger entry"))?;
        let now = Instant::now();
        Ok(guard
            .within(now, Duration::from_secs(window_seconds))
            .copied()
            .collect())
    }

    /// Drop events older than the horizon for one identity
    pub fn prune(&self, identity: &str, horizon_seconds: u64) -> AdmissionResult<usize> {
        let Some(log) = self.existing(identity) else {
            return Ok(0);
        };
        let mut guard = log
            .lock()
            .map_err(|_| AdmissionError::LockPoisoned("request ledger entry"))?;
        Ok(guard.prune(Instant::now(), Duration::from_secs(horizon_seconds)))
    }

    /// Remove the identity's entry if it holds no events and nobody else is
    /// using it right now. Returns true when the entry was removed.
    pub fn evict_if_empty(&self, identity: &str) -> bool {
        self.entries
            .remove_if(identity, |_, log| {
                // A clone outside the map means a check is in flight.
                Arc::strong_count(log) == 1
                    && log.lock().map(|guard| guard.is_empty()).unwrap_or(false)
            })
            .is_some()
    }

    /// Drop an entry whose lock was poisoned so the identity starts over
    pub fn evict_poisoned(&self, identity: &str) -> bool {
        self.entries
            .remove_if(identity, |_, log| log.is_poisoned())
            .is_some()
    }

    /// Snapshot of every identity currently tracked
    pub fn identities(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of identities currently tracked
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn log_for(&self, identity: &str) -> SharedLog {
        if let Some(existing) = self.existing(identity) {
            return existing;
        }
        self.entries
            .entry(identity.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn existing(&self, identity: &str) -> Option<SharedLog> {
        self.entries.get(identity).map(|entry| entry.value().clone())
    }
}
