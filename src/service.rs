use std::time::Duration;

use metrics::increment_counter;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::core::{
    AttackKind, AttackLog, AttackRecord, BlockRegistry, BlockStatus, PatternConfig,
    PatternDetector, PatternKind, PatternMatch, ProtectionRule, RequestLedger, RuleEngine,
    RuleViolation, MAX_BLOCK_DURATION,
};
use crate::utils::{
    create_check_span, log_pattern_detection, log_rule_violation, AdmissionError,
    AdmissionResult,
};

/// Engine-wide settings for the admission controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    /// Attack records within the escalation window before an identity is blacklisted
    pub escalation_threshold: usize,
    /// Rolling window for counting attack records toward escalation
    pub escalation_window_seconds: u64,
    /// Block duration used for pattern detections
    pub default_block_duration_seconds: u64,
    /// Interval between cleanup passes
    pub cleanup_interval_seconds: u64,
    /// Interval between escalation passes
    pub escalation_interval_seconds: u64,
    /// Ledger events older than this are pruned
    pub retention_horizon_seconds: u64,
    /// Recent events required before the pattern detector reaches a verdict
    pub pattern_min_events: usize,
    /// Events inside the burst window above which traffic is a burst
    pub pattern_burst_size: usize,
    /// Lookback for the regularity sample
    pub pattern_lookback_seconds: u64,
    /// Sub-window for the burst count
    pub pattern_burst_window_seconds: u64,
    /// Most recent events used for interval statistics
    pub pattern_sample_size: usize,
    /// Interval variance (seconds squared) treated as machine-regular
    pub pattern_variance_epsilon: f64,
    /// Mean interval (seconds) below which regular traffic is implausible for a person
    pub pattern_max_mean_interval_seconds: f64,
    /// Attack records kept in memory
    pub attack_log_capacity: usize,
    /// Attack records older than this are purged
    pub attack_retention_seconds: u64,
    /// Allow requests when the check itself fails
    pub fail_open: bool,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: 5,
            escalation_window_seconds: 3600,
            default_block_duration_seconds: 3600,
            cleanup_interval_seconds: 300,
            escalation_interval_seconds: 60,
            retention_horizon_seconds: 86_400,
            pattern_min_events: 10,
            pattern_burst_size: 50,
            pattern_lookback_seconds: 300,
            pattern_burst_window_seconds: 60,
            pattern_sample_size: 20,
            pattern_variance_epsilon: 0.01,
            pattern_max_mean_interval_seconds: 1.0,
            attack_log_capacity: 10_000,
            attack_retention_seconds: 86_400,
            fail_open: true,
        }
    }
}

impl ProtectionConfig {
    pub fn validate(&self) -> AdmissionResult<()> {
        let non_zero = [
            ("escalation_threshold", self.escalation_threshold as u64),
            ("escalation_window_seconds", self.escalation_window_seconds),
            ("cleanup_interval_seconds", self.cleanup_interval_seconds),
            ("escalation_interval_seconds", self.escalation_interval_seconds),
            ("retention_horizon_seconds", self.retention_horizon_seconds),
            ("pattern_lookback_seconds", self.pattern_lookback_seconds),
            ("pattern_burst_window_seconds", self.pattern_burst_window_seconds),
            ("attack_log_capacity", self.attack_log_capacity as u64),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(AdmissionError::InvalidSettings(format!(
                    "{} must be greater than 0",
                    field
                )));
            }
        }
        for (field, value) in [
            ("cleanup_interval_seconds", self.cleanup_interval_seconds),
            ("escalation_interval_seconds", self.escalation_interval_seconds),
        ] {
            if value > MAX_BLOCK_DURATION.as_secs() {
                return Err(AdmissionError::InvalidSettings(format!(
                    "{} must not exceed {}",
                    field,
                    MAX_BLOCK_DURATION.as_secs()
                )));
            }
        }
        if self.pattern_min_events < 2 {
            return Err(AdmissionError::InvalidSettings(
                "pattern_min_events must be at least 2".to_string(),
            ));
        }
        if !(self.pattern_variance_epsilon > 0.0) || !(self.pattern_max_mean_interval_seconds > 0.0)
        {
            return Err(AdmissionError::InvalidSettings(
                "pattern thresholds must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pattern_config(&self) -> PatternConfig {
        PatternConfig {
            min_events: self.pattern_min_events,
            lookback: Duration::from_secs(self.pattern_lookback_seconds),
            sample_size: self.pattern_sample_size,
            variance_epsilon: self.pattern_variance_epsilon,
            max_mean_interval: self.pattern_max_mean_interval_seconds,
            burst_window: Duration::from_secs(self.pattern_burst_window_seconds),
            burst_size: self.pattern_burst_size,
        }
    }
}

/// Outcome of a single admission check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub reason: String,
}

impl AdmissionDecision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Point-in-time counters for operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProtectionStats {
    pub blocked_count: usize,
    pub whitelist_size: usize,
    pub blacklist_size: usize,
    pub active_identities: usize,
    pub attack_pattern_count: usize,
    pub enabled_rule_count: usize,
}

/// Wall-clock rendering of a monotonic deadline
fn describe_until(until: Instant) -> String {
    let remaining = until.saturating_duration_since(Instant::now());
    let wall = chrono::Duration::from_std(remaining)
        .ok()
        .and_then(|left| chrono::Utc::now().checked_add_signed(left));
    match wall {
        Some(wall) => format!("until {} ({}s remaining)", wall.to_rfc3339(), remaining.as_secs()),
        None => format!("for another {}s", remaining.as_secs()),
    }
}

/// Admission decision point combining rules, heuristics and block lists
#[derive(Debug)]
pub struct AdmissionController {
    config: ProtectionConfig,
    rules: RuleEngine,
    detector: PatternDetector,
    ledger: RequestLedger,
    registry: BlockRegistry,
    attack_log: AttackLog,
}

impl AdmissionController {
    /// Creates a new admission controller
    ///
    /// # Arguments
    ///
    /// * `config` - Engine-wide settings
    /// * `rules` - Protection rules, evaluated in the order given
    ///
    /// # Returns
    ///
    /// * `Ok(AdmissionController)` - If the settings and every rule are valid
    /// * `Err(AdmissionError)` - Naming the first invalid setting or rule
    pub fn new(config: ProtectionConfig, rules: Vec<ProtectionRule>) -> AdmissionResult<Self> {
        config.validate()?;
        let rules = RuleEngine::new(rules)?;
        tracing::info!(
            rules = rules.rules().len(),
            enabled_rules = rules.enabled_count(),
            fail_open = config.fail_open,
            "Admission controller initialized"
        );

        Ok(Self {
            detector: PatternDetector::new(config.pattern_config()),
            attack_log: AttackLog::new(config.attack_log_capacity),
            ledger: RequestLedger::new(),
            registry: BlockRegistry::new(),
            rules,
            config,
        })
    }

    /// Decides whether a request from `identity` may proceed
    ///
    /// Never fails: internal errors are turned into a decision according to
    /// the `fail_open` policy.
    ///
    /// # Arguments
    ///
    /// * `identity` - Client identity, typically the source address
    /// * `endpoint` - Requested endpoint, kept for the audit trail
    pub fn check_request(&self, identity: &str, endpoint: &str) -> AdmissionDecision {
        let span = create_check_span(identity, endpoint);
        let _entered = span.enter();

        let decision = match self.evaluate(identity, endpoint) {
            Ok(decision) => decision,
            Err(err) => self.on_internal_error(identity, &err),
        };

        let outcome = if decision.allowed { "allowed" } else { "denied" };
        increment_counter!("admission_decisions_total", "outcome" => outcome);
        tracing::debug!(allowed = decision.allowed, reason = %decision.reason, "Admission decided");
        decision
    }

    fn evaluate(&self, identity: &str, endpoint: &str) -> AdmissionResult<AdmissionDecision> {
        match self.registry.status(identity) {
            BlockStatus::Whitelisted => return Ok(AdmissionDecision::allow("whitelisted")),
            BlockStatus::Blacklisted => return Ok(AdmissionDecision::deny("blacklisted")),
            BlockStatus::TemporarilyBlocked { reason, until } => {
                return Ok(AdmissionDecision::deny(format!(
                    "temporarily blocked ({}) {}",
                    reason,
                    describe_until(until)
                )));
            }
            BlockStatus::Clear => {}
        }

        self.ledger.with_identity(identity, |log| {
            // Another check for this identity may have blocked it while we
            // waited for the lock.
            if let Some(block) = self.registry.active_block(identity) {
                return Ok(AdmissionDecision::deny(format!(
                    "temporarily blocked ({}) {}",
                    block.reason,
                    describe_until(block.expires_at)
                )));
            }

            let now = Instant::now();
            log.record(now);

            if let Some(violation) = self.rules.evaluate(log, now) {
                return self.block_for_rule(identity, endpoint, &violation);
            }
            if let Some(found) = self.detector.detect(log, now) {
                return self.block_for_pattern(identity, endpoint, &found);
            }
            Ok(AdmissionDecision::allow("allowed"))
        })?
    }

    fn block_for_rule(
        &self,
        identity: &str,
        endpoint: &str,
        violation: &RuleViolation,
    ) -> AdmissionResult<AdmissionDecision> {
        let rule = &violation.rule;
        log_rule_violation(identity, &rule.name, violation.request_count, rule.max_requests);
        self.registry
            .add_temporary_block(identity, &rule.name, rule.block_duration_seconds)?;
        self.audit(AttackRecord::new(
            identity,
            endpoint,
            AttackKind::RuleViolation,
            &rule.name,
            violation.severity(),
            violation.request_count,
        ));

        Ok(AdmissionDecision::deny(format!(
            "rate limit exceeded: rule '{}' ({} requests > {} in {}s)",
            rule.name, violation.request_count, rule.max_requests, rule.window_seconds
        )))
    }

    fn block_for_pattern(
        &self,
        identity: &str,
        endpoint: &str,
        found: &PatternMatch,
    ) -> AdmissionResult<AdmissionDecision> {
        let kind = match found.kind {
            PatternKind::Burst => AttackKind::Burst,
            PatternKind::Regular | PatternKind::RegularBurst => AttackKind::ScriptedPattern,
        };
        let description = found.kind.to_string();
        log_pattern_detection(identity, &description, found.severity, found.recent_events);
        self.registry.add_temporary_block(
            identity,
            "attack pattern detected",
            self.config.default_block_duration_seconds,
        )?;
        self.audit(AttackRecord::new(
            identity,
            endpoint,
            kind,
            &description,
            found.severity,
            found.recent_events,
        ));

        Ok(AdmissionDecision::deny("attack pattern detected"))
    }

    fn audit(&self, record: AttackRecord) {
        increment_counter!("admission_blocks_total", "kind" => record.kind.to_string());
        // The block is already in place; losing the audit entry must not undo it.
        if let Err(err) = self.attack_log.append(record) {
            tracing::error!(error = %err, "Failed to append attack record");
        }
    }

    fn on_internal_error(&self, identity: &str, err: &AdmissionError) -> AdmissionDecision {
        increment_counter!("admission_internal_errors_total");
        if self.config.fail_open {
            tracing::error!(identity = %identity, error = %err, "Protection check failed; failing open");
            AdmissionDecision::allow(format!("protection check failed: {}; failing open", err))
        } else {
            tracing::error!(identity = %identity, error = %err, "Protection check failed; failing closed");
            AdmissionDecision::deny(format!("protection check failed: {}; failing closed", err))
        }
    }

    /// Exempts an identity from every check
    pub fn add_to_whitelist(&self, identity: &str) {
        if self.registry.add_to_whitelist(identity) {
            tracing::info!(identity = %identity, "Identity whitelisted");
        }
    }

    pub fn remove_from_whitelist(&self, identity: &str) -> bool {
        self.registry.remove_from_whitelist(identity)
    }

    /// Denies an identity until it is explicitly removed
    pub fn add_to_blacklist(&self, identity: &str) {
        if self.registry.add_to_blacklist(identity) {
            tracing::warn!(identity = %identity, "Identity blacklisted");
        }
    }

    /// Lifts a permanent block and forgives the attack records that led to
    /// it, so the next escalation pass does not immediately reinstate it
    pub fn remove_from_blacklist(&self, identity: &str) -> bool {
        let removed = self.registry.remove_from_blacklist(identity);
        if removed {
            if let Err(err) = self.attack_log.discount(identity) {
                tracing::error!(identity = %identity, error = %err, "Failed to discount attack records");
            }
            tracing::info!(identity = %identity, "Identity removed from blacklist");
        }
        removed
    }

    /// Clears a temporary block ahead of its expiry
    pub fn unblock(&self, identity: &str) -> bool {
        let removed = self.registry.remove_temporary_block(identity);
        if removed {
            tracing::info!(identity = %identity, "Temporary block lifted");
        }
        removed
    }

    pub fn identity_status(&self, identity: &str) -> BlockStatus {
        self.registry.status(identity)
    }

    pub fn blacklisted_identities(&self) -> Vec<String> {
        self.registry.blacklisted()
    }

    pub fn get_protection_stats(&self) -> ProtectionStats {
        let sizes = self.registry.sizes();
        ProtectionStats {
            blocked_count: sizes.blocked,
            whitelist_size: sizes.whitelisted,
            blacklist_size: sizes.blacklisted,
            active_identities: self.ledger.len(),
            attack_pattern_count: self.attack_log.len(),
            enabled_rule_count: self.rules.enabled_count(),
        }
    }

    /// Most recent attack records, newest first
    pub fn get_attack_logs(&self, limit: usize) -> Vec<AttackRecord> {
        self.attack_log.recent(limit).unwrap_or_else(|err| {
            tracing::error!(error = %err, "Failed to read attack log");
            Vec::new()
        })
    }

    pub fn config(&self) -> &ProtectionConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    pub(crate) fn ledger(&self) -> &RequestLedger {
        &self.ledger
    }

    pub(crate) fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    pub(crate) fn attack_log(&self) -> &AttackLog {
        &self.attack_log
    }
}
