mod test_utils;

use std::time::Duration;

use admission_guard::{AdmissionResult, BlockStatus, ProtectionConfig, ProtectionRule};
use tokio::time::advance;

use test_utils::{controller_with_scheduler, rules_only_config, wait};

#[test_log::test(tokio::test(start_paused = true))]
async fn test_repeat_offender_is_escalated_by_the_loop() -> AdmissionResult<()> {
    let config = ProtectionConfig {
        escalation_threshold: 5,
        ..rules_only_config()
    };
    let (controller, scheduler) =
        controller_with_scheduler(config, vec![ProtectionRule::new("Burst", 3, 10, 30)])?;
    let handle = scheduler.start();

    // Six independent blocking events, each after the previous block lapsed
    for round in 0..6 {
        for _ in 0..3 {
            assert!(
                controller.check_request("203.0.113.5", "/").allowed,
                "Round {} should start unblocked",
                round
            );
        }
        assert!(!controller.check_request("203.0.113.5", "/").allowed);
        advance(Duration::from_secs(31)).await;
    }
    assert_eq!(controller.get_attack_logs(100).len(), 6);

    // Give the escalation loop a tick
    wait(Duration::from_secs(60)).await;

    let stats = controller.get_protection_stats();
    assert_eq!(stats.blacklist_size, 1);
    assert_eq!(
        controller.identity_status("203.0.113.5"),
        BlockStatus::Blacklisted
    );

    wait(Duration::from_secs(4 * 3_600)).await;
    for _ in 0..10 {
        let decision = controller.check_request("203.0.113.5", "/");
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "blacklisted");
    }

    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_blocks_outside_the_escalation_window_do_not_escalate() -> AdmissionResult<()> {
    let config = ProtectionConfig {
        escalation_threshold: 3,
        escalation_window_seconds: 600,
        ..rules_only_config()
    };
    let (controller, scheduler) =
        controller_with_scheduler(config, vec![ProtectionRule::new("Burst", 1, 10, 5)])?;

    for _ in 0..3 {
        controller.check_request("spread", "/");
        controller.check_request("spread", "/");
        advance(Duration::from_secs(400)).await;
    }

    let report = scheduler.run_escalation()?;
    assert!(report.promoted.is_empty());
    assert!(!controller.identity_status("spread").is_denied());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_loop_drops_idle_identities() -> AdmissionResult<()> {
    let config = ProtectionConfig {
        retention_horizon_seconds: 120,
        cleanup_interval_seconds: 60,
        ..rules_only_config()
    };
    let (controller, scheduler) =
        controller_with_scheduler(config, vec![ProtectionRule::new("Burst", 20, 10, 600)])?;
    let handle = scheduler.start();

    for i in 0..10 {
        controller.check_request(&format!("10.0.1.{}", i), "/");
    }
    assert_eq!(controller.get_protection_stats().active_identities, 10);

    wait(Duration::from_secs(181)).await;
    assert_eq!(controller.get_protection_stats().active_identities, 0);

    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_is_observed_promptly() -> AdmissionResult<()> {
    let (_controller, scheduler) =
        controller_with_scheduler(ProtectionConfig::default(), Vec::new())?;
    let handle = scheduler.start();

    wait(Duration::from_secs(5)).await;
    tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
        .await
        .map_err(|_| admission_guard::AdmissionError::Internal("shutdown timed out".into()))?;

    Ok(())
}
