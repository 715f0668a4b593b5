//! Utility modules for the admission engine.
//! This module contains common utilities used across the crate.

mod error;
mod logging;

pub use logging::{
    create_check_span, init_logging, log_maintenance_event, log_pattern_detection,
    log_rule_violation,
};

pub use error::{AdmissionError, AdmissionResult};
