//! Request admission and DDoS mitigation engine.
//!
//! An [`AdmissionController`] decides per request whether an identity may
//! proceed, combining sliding-window rate rules, heuristics for scripted
//! traffic, whitelist/blacklist overrides and time-bounded blocks. A
//! [`MaintenanceScheduler`] prunes stale state and promotes repeat offenders
//! to the blacklist in the background.

pub mod config;
pub mod core;
pub mod service;
pub mod utils;

pub use crate::config::{MetricsConfig, Settings};
pub use crate::core::{
    AttackKind, AttackRecord, BlockStatus, CleanupReport, EscalationReport, MaintenanceHandle,
    MaintenanceScheduler, ProtectionRule,
};
pub use crate::service::{AdmissionController, AdmissionDecision, ProtectionConfig, ProtectionStats};
pub use crate::utils::{init_logging, AdmissionError, AdmissionResult};
