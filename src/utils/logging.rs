use std::env;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Initialize the logging system with the level taken from `RUST_LOG`.
///
/// Safe to call more than once; later calls leave the installed subscriber
/// in place.
pub fn init_logging() {
    // Get the log level from environment variable or default to INFO
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_level(true)
        .try_init();

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Create a span covering a single admission check
pub fn create_check_span(identity: &str, endpoint: &str) -> tracing::Span {
    tracing::debug_span!(
        "check_request",
        identity = %identity,
        endpoint = %endpoint,
    )
}

/// Log a protection rule violation
pub fn log_rule_violation(identity: &str, rule: &str, count: usize, max_requests: u32) {
    tracing::warn!(
        identity = %identity,
        rule = %rule,
        request_count = count,
        max_requests = max_requests,
        event = "rule_violation",
        timestamp = %chrono::Utc::now()
    );
}

/// Log an attack pattern detection event
pub fn log_pattern_detection(identity: &str, kind: &str, severity: u8, sample_size: usize) {
    tracing::warn!(
        identity = %identity,
        kind = %kind,
        severity = severity,
        sample_size = sample_size,
        event = "attack_pattern_detected",
        timestamp = %chrono::Utc::now()
    );
}

/// Log a background maintenance event
pub fn log_maintenance_event(event_type: &str, success: bool, details: Option<&str>) {
    if success {
        tracing::debug!(
            event_type = %event_type,
            success = success,
            details = ?details,
            timestamp = %chrono::Utc::now()
        );
    } else {
        tracing::error!(
            event_type = %event_type,
            success = success,
            details = ?details,
            timestamp = %chrono::Utc::now()
        );
    }
}
