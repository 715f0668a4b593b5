//! Threshold rules evaluated against an identity's sliding window.
//!
//! Rules are validated once at construction and never change afterwards, so
//! the engine can be shared behind an `Arc` and read without locking.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::ledger::{IdentityLog, RequestLedger};
use crate::utils::{AdmissionError, AdmissionResult};

/// Rate threshold rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionRule {
    /// Rule name, used as the block reason
    pub name: String,
    /// Requests allowed inside the window; one more is a violation
    pub max_requests: u32,
    /// Sliding window length in seconds
    pub window_seconds: u64,
    /// How long a violating identity stays blocked
    pub block_duration_seconds: u64,
    /// Disabled rules are skipped entirely
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ProtectionRule {
    pub fn new(
        name: impl Into<String>,
        max_requests: u32,
        window_seconds: u64,
        block_duration_seconds: u64,
    ) -> Self {
        Self {
            name: name.into(),
            max_requests,
            window_seconds,
            block_duration_seconds,
            enabled: true,
        }
    }

    /// Same rule, switched off
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    /// Reject rules that could never be satisfied or never trigger
    pub fn validate(&self) -> AdmissionResult<()> {
        if self.name.trim().is_empty() {
            return Err(AdmissionError::invalid_rule(&self.name, "name must not be empty"));
        }
        if self.max_requests == 0 {
            return Err(AdmissionError::invalid_rule(
                &self.name,
                "max_requests must be greater than 0",
            ));
        }
        if self.window_seconds == 0 {
            return Err(AdmissionError::invalid_rule(
                &self.name,
                "window_seconds must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// The rule that tripped and the count that tripped it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleViolation {
    pub rule: ProtectionRule,
    pub request_count: usize,
}

impl RuleViolation {
    /// Informational 1-10 score based on how far over the limit the count is
    pub fn severity(&self) -> u8 {
        let max = self.rule.max_requests.max(1) as usize;
        let ratio = (self.request_count * 5) / max;
        ratio.clamp(1, 10) as u8
    }
}

/// Ordered, immutable set of protection rules
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<ProtectionRule>,
}

impl RuleEngine {
    /// Build an engine from rules in their declared order
    pub fn new(rules: Vec<ProtectionRule>) -> AdmissionResult<Self> {
        let mut names = HashSet::new();
        for rule in &rules {
            rule.validate()?;
            if !names.insert(rule.name.as_str()) {
                return Err(AdmissionError::invalid_rule(&rule.name, "duplicate rule name"));
            }
        }
        Ok(Self { rules })
    }

    /// First enabled rule, in declared order, whose window holds more than
    /// `max_requests` events
    pub fn evaluate(&self, log: &IdentityLog, now: Instant) -> Option<RuleViolation> {
        self.enabled_rules().find_map(|rule| {
            let count = log.count_within(now, rule.window());
            (count > rule.max_requests as usize).then(|| RuleViolation {
                rule: rule.clone(),
                request_count: count,
            })
        })
    }

    /// Evaluate against whatever the ledger currently holds for `identity`
    pub fn evaluate_identity(
        &self,
        identity: &str,
        ledger: &RequestLedger,
    ) -> AdmissionResult<Option<RuleViolation>> {
        let now = Instant::now();
        ledger.with_identity(identity, |log| self.evaluate(log, now))
    }

    pub fn rules(&self) -> &[ProtectionRule] {
        &self.rules
    }

    pub fn enabled_rules(&self) -> impl Iterator<Item = &ProtectionRule> + '_ {
        self.rules.iter().filter(|rule| rule.enabled)
    }

    pub fn enabled_count(&self) -> usize {
        self.enabled_rules().count()
    }
}
