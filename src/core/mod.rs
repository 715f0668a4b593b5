//! Core components of the admission engine.
//! This module contains the request ledger, rule evaluation, pattern
//! heuristics, block lists, the attack audit trail and background upkeep.

mod attack_log;
mod block_registry;
mod ledger;
mod maintenance;
mod pattern_detector;
mod rule_engine;

pub use attack_log::{AttackKind, AttackLog, AttackRecord};
pub use block_registry::{Block, BlockRegistry, BlockStatus, RegistrySizes, MAX_BLOCK_DURATION};
pub use ledger::{IdentityLog, RequestLedger};
pub use maintenance::{CleanupReport, EscalationReport, MaintenanceHandle, MaintenanceScheduler};
pub use pattern_detector::{PatternConfig, PatternDetector, PatternKind, PatternMatch};
pub use rule_engine::{ProtectionRule, RuleEngine, RuleViolation};
