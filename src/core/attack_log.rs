//! Bounded in-memory audit trail of blocking decisions.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use crate::utils::{AdmissionError, AdmissionResult};

/// What kind of behaviour produced a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackKind {
    RuleViolation,
    ScriptedPattern,
    Burst,
}

impl fmt::Display for AttackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttackKind::RuleViolation => write!(f, "rule_violation"),
            AttackKind::ScriptedPattern => write!(f, "scripted_pattern"),
            AttackKind::Burst => write!(f, "burst"),
        }
    }
}

/// One audit entry, written whenever a block is created
#[derive(Debug, Clone, Serialize)]
pub struct AttackRecord {
    pub id: Uuid,
    pub identity: String,
    pub endpoint: String,
    pub kind: AttackKind,
    /// Rule name or pattern description
    pub reason: String,
    /// 1-10, informational only
    pub severity: u8,
    pub timestamp: DateTime<Utc>,
    /// Requests in the evaluated window when the block was made
    pub request_count: usize,
    pub blocked: bool,
    /// Restamped on append so ring order matches time order
    #[serde(skip)]
    pub recorded_at: Instant,
    /// Cleared when an operator pardons the identity
    #[serde(skip)]
    pub counts_toward_escalation: bool,
}

impl AttackRecord {
    pub fn new(
        identity: &str,
        endpoint: &str,
        kind: AttackKind,
        reason: &str,
        severity: u8,
        request_count: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: identity.to_string(),
            endpoint: endpoint.to_string(),
            kind,
            reason: reason.to_string(),
            severity: severity.clamp(1, 10),
            timestamp: Utc::now(),
            request_count,
            blocked: true,
            recorded_at: Instant::now(),
            counts_toward_escalation: true,
        }
    }
}

/// Ring buffer of attack records, oldest at the front
#[derive(Debug)]
pub struct AttackLog {
    records: RwLock<VecDeque<AttackRecord>>,
    capacity: usize,
}

impl AttackLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Append a record, dropping the oldest once the ring is full
    pub fn append(&self, mut record: AttackRecord) -> AdmissionResult<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| AdmissionError::LockPoisoned("attack log"))?;
        record.recorded_at = Instant::now();
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        Ok(())
    }

    /// Newest first, at most `limit` entries
    pub fn recent(&self, limit: usize) -> AdmissionResult<Vec<AttackRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| AdmissionError::LockPoisoned("attack log"))?;
        Ok(records.iter().rev().take(limit).cloned().collect())
    }

    /// Records per identity made within the last `window`
    pub fn counts_within(&self, window: Duration) -> AdmissionResult<HashMap<String, usize>> {
        let records = self
            .records
            .read()
            .map_err(|_| AdmissionError::LockPoisoned("attack log"))?;
        let now = Instant::now();
        let mut counts = HashMap::new();
        for record in records.iter().rev() {
            if now.duration_since(record.recorded_at) > window {
                break;
            }
            if !record.counts_toward_escalation {
                continue;
            }
            *counts.entry(record.identity.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Stop the identity's existing records from driving escalation;
    /// returns how many were affected
    pub fn discount(&self, identity: &str) -> AdmissionResult<usize> {
        let mut records = self
            .records
            .write()
            .map_err(|_| AdmissionError::LockPoisoned("attack log"))?;
        let mut affected = 0;
        for record in records.iter_mut().filter(|r| r.identity == identity) {
            if record.counts_toward_escalation {
                record.counts_toward_escalation = false;
                affected += 1;
            }
        }
        Ok(affected)
    }

    /// Drop records older than `retention`; returns how many went
    pub fn purge_older_than(&self, retention: Duration) -> AdmissionResult<usize> {
        let mut records = self
            .records
            .write()
            .map_err(|_| AdmissionError::LockPoisoned("attack log"))?;
        let now = Instant::now();
        let mut removed = 0;
        while let Some(oldest) = records.front() {
            if now.duration_since(oldest.recorded_at) <= retention {
                break;
            }
            records.pop_front();
            removed += 1;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(identity: &str) -> AttackRecord {
        AttackRecord::new(identity, "/login", AttackKind::RuleViolation, "Burst", 5, 21)
    }

    #[test]
    fn recent_is_newest_first_and_limited() {
        let log = AttackLog::new(100);
        for identity in ["a", "b", "c"] {
            log.append(record(identity)).unwrap();
        }

        let recent = log.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].identity, "c");
        assert_eq!(recent[1].identity, "b");
        assert_eq!(log.recent(10).unwrap().len(), 3);
        assert!(log.recent(0).unwrap().is_empty());
    }

    #[test]
    fn ring_drops_oldest_when_full() {
        let log = AttackLog::new(2);
        for identity in ["a", "b", "c"] {
            log.append(record(identity)).unwrap();
        }
        let identities: Vec<String> = log
            .recent(10)
            .unwrap()
            .into_iter()
            .map(|r| r.identity)
            .collect();
        assert_eq!(identities, vec!["c", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn counts_respect_the_window() {
        let log = AttackLog::new(100);
        log.append(record("old")).unwrap();
        tokio::time::advance(Duration::from_secs(3_601)).await;
        log.append(record("y")).unwrap();
        log.append(record("y")).unwrap();

        let counts = log.counts_within(Duration::from_secs(3_600)).unwrap();
        assert_eq!(counts.get("y"), Some(&2));
        assert!(counts.get("old").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn window_is_measured_from_append() {
        let log = AttackLog::new(100);
        let stale = record("late");
        log.append(record("early")).unwrap();
        tokio::time::advance(Duration::from_secs(3_601)).await;
        log.append(stale).unwrap();

        let counts = log.counts_within(Duration::from_secs(3_600)).unwrap();
        assert_eq!(counts.get("late"), Some(&1));
        assert!(counts.get("early").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired_records() {
        let log = AttackLog::new(100);
        log.append(record("a")).unwrap();
        tokio::time::advance(Duration::from_secs(100)).await;
        log.append(record("b")).unwrap();

        assert_eq!(log.purge_older_than(Duration::from_secs(50)).unwrap(), 1);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn discounted_records_do_not_count() {
        let log = AttackLog::new(100);
        for _ in 0..3 {
            log.append(record("y")).unwrap();
        }
        assert_eq!(log.discount("y").unwrap(), 3);
        log.append(record("y")).unwrap();

        let counts = log.counts_within(Duration::from_secs(3_600)).unwrap();
        assert_eq!(counts.get("y"), Some(&1));
        assert_eq!(log.recent(10).unwrap().len(), 4);
    }

    #[test]
    fn severity_is_clamped() {
        let high = AttackRecord::new("a", "/", AttackKind::Burst, "burst", 42, 60);
        let low = AttackRecord::new("a", "/", AttackKind::Burst, "burst", 0, 60);
        assert_eq!(high.severity, 10);
        assert_eq!(low.severity, 1);
    }
}
