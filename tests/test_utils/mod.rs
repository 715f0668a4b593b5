#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use admission_guard::{
    AdmissionController, AdmissionResult, MaintenanceScheduler, ProtectionConfig, ProtectionRule,
};

/// Advance paused test time and let woken tasks run
pub async fn wait(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Generate a random IP address for testing
pub fn random_ip() -> String {
    format!(
        "{}.{}.{}.{}",
        rand::random::<u8>(),
        rand::random::<u8>(),
        rand::random::<u8>(),
        rand::random::<u8>()
    )
}

/// Settings with the pattern heuristics effectively out of the way, so rule
/// behaviour can be observed on its own
pub fn rules_only_config() -> ProtectionConfig {
    ProtectionConfig {
        pattern_min_events: 1_000,
        pattern_burst_size: 1_000,
        ..ProtectionConfig::default()
    }
}

/// Controller with a single rule and the pattern heuristics disabled
pub fn controller_with_rule(rule: ProtectionRule) -> AdmissionResult<Arc<AdmissionController>> {
    AdmissionController::new(rules_only_config(), vec![rule]).map(Arc::new)
}

/// Controller plus a scheduler over the same instance
pub fn controller_with_scheduler(
    config: ProtectionConfig,
    rules: Vec<ProtectionRule>,
) -> AdmissionResult<(Arc<AdmissionController>, MaintenanceScheduler)> {
    let controller = Arc::new(AdmissionController::new(config, rules)?);
    let scheduler = MaintenanceScheduler::new(controller.clone());
    Ok((controller, scheduler))
}

/// Setup test environment
pub fn setup_test_env() {
    admission_guard::init_logging();
}
