//! Retry, give-up and cancellation behaviour of full runs

use std::time::Duration;
use tokio::time::Instant;

use ledtx::calibration::{CalibrationEvent, CalibrationOutcome, CalibrationPhase};
use ledtx::simulator::FaultPlan;
use ledtx::transport::FrameSink;

use crate::test_utils::{drain_events, rig};

#[tokio::test(start_paused = true)]
async fn test_lost_acks_and_bad_reports_are_retried() {
    let faults = FaultPlan {
        drop_first_acks: 3,
        malformed_reports: 2,
        ignore_snapshots: 2,
        ..FaultPlan::default()
    };
    let rig = rig(4, faults, |_| {});

    let outcome = rig
        .calibrator
        .start()
        .expect("Run should start")
        .await
        .expect("Run panicked");

    match outcome {
        CalibrationOutcome::Done(report) => {
            assert_eq!(report.lights_resolved, 4);
            assert_eq!(report.captures_imported, 21);
        }
        other => panic!("Expected a finished run, got {:?}", other),
    }

    let stats = rig.simulator.stats();
    assert_eq!(stats.acks_dropped, 3);
    assert_eq!(stats.snapshots_ignored, 2);
    assert_eq!(stats.acks_sent, 7);
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_pattern_aborts_after_deadline() {
    let faults = FaultPlan {
        never_ack: true,
        ..FaultPlan::default()
    };
    let rig = rig(4, faults, |_| {});

    let started = Instant::now();
    let outcome = rig
        .calibrator
        .start()
        .expect("Run should start")
        .await
        .expect("Run panicked");

    match outcome {
        CalibrationOutcome::Aborted { reason } => {
            assert!(reason.contains("did not acknowledge pattern 0"), "{}", reason);
        }
        other => panic!("Expected an aborted run, got {:?}", other),
    }
    assert!(started.elapsed() >= Duration::from_millis(rig.config.calibration.ack_deadline_ms));
    assert_eq!(rig.calibrator.phase(), CalibrationPhase::Aborted);
    assert!(!rig.calibrator.store().assignment_exists());
    assert!(!rig.calibrator.store().aggregated_path().exists());
    assert!(!rig.calibrator.display().has_pending());
}

#[tokio::test(start_paused = true)]
async fn test_abort_keeps_previous_assignment() {
    let rig = rig(4, FaultPlan::default(), |_| {});

    let first = rig
        .calibrator
        .start()
        .expect("Run should start")
        .await
        .expect("Run panicked");
    assert!(matches!(first, CalibrationOutcome::Done(_)));
    let before = rig
        .calibrator
        .store()
        .load_assignment()
        .await
        .expect("Assignment should be stored");

    rig.simulator.set_faults(FaultPlan {
        never_ack: true,
        ..FaultPlan::default()
    });
    let second = rig
        .calibrator
        .start()
        .expect("A finished run does not block a new one")
        .await
        .expect("Run panicked");
    assert!(matches!(second, CalibrationOutcome::Aborted { .. }));

    let after = rig
        .calibrator
        .store()
        .load_assignment()
        .await
        .expect("Assignment should survive");
    assert_eq!(before, after);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_message_stops_run() {
    let faults = FaultPlan {
        never_ack: true,
        ..FaultPlan::default()
    };
    let rig = rig(4, faults, |_| {});

    let handle = rig.calibrator.start().expect("Run should start");
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert!(rig.calibrator.phase().is_active());

    rig.simulator.request_cancel().expect("Publish failed");
    let outcome = handle.await.expect("Run panicked");

    assert_eq!(outcome, CalibrationOutcome::Cancelled);
    assert_eq!(rig.calibrator.phase(), CalibrationPhase::Aborted);
    assert!(!rig.calibrator.store().assignment_exists());
    assert_eq!(
        drain_events(&rig.events),
        vec![
            CalibrationEvent::Started,
            CalibrationEvent::Finished(CalibrationOutcome::Cancelled),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_without_run_is_a_no_op() {
    let rig = rig(4, FaultPlan::default(), |_| {});
    assert!(!rig.calibrator.cancel());
    assert_eq!(rig.calibrator.phase(), CalibrationPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_failed_artifact_write_aborts_run() {
    let rig = rig(4, FaultPlan::default(), |_| {});
    let store = rig.calibrator.store();
    std::fs::create_dir_all(store.aggregated_path()).expect("Failed to block artifact path");

    let outcome = rig
        .calibrator
        .start()
        .expect("Run should start")
        .await
        .expect("Run panicked");

    let reason = match &outcome {
        CalibrationOutcome::Aborted { reason } => reason.clone(),
        other => panic!("Expected an aborted run, got {:?}", other),
    };
    assert!(!reason.is_empty());
    assert_eq!(rig.calibrator.phase(), CalibrationPhase::Aborted);
    assert!(!store.assignment_exists());
    assert!(!rig.calibrator.display().has_pending());
    assert_eq!(
        drain_events(&rig.events),
        vec![
            CalibrationEvent::Started,
            CalibrationEvent::Finished(CalibrationOutcome::Aborted { reason }),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_messages_on_the_wrong_topic_are_ignored() {
    let faults = FaultPlan {
        never_ack: true,
        ..FaultPlan::default()
    };
    let rig = rig(4, faults, |_| {});
    let topics = &rig.config.topics;

    rig.bus
        .publish(&topics.ack, br#"{"type":"start"}"#)
        .expect("Publish failed");
    assert_eq!(rig.calibrator.phase(), CalibrationPhase::Idle);
    assert!(drain_events(&rig.events).is_empty());

    let handle = rig.calibrator.start().expect("Run should start");
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    for ack_id in 1..=u8::MAX {
        let ack = format!(r#"{{"type":"ack","ackID":{}}}"#, ack_id);
        rig.bus
            .publish(&topics.calibrate_client, ack.as_bytes())
            .expect("Publish failed");
    }
    rig.bus
        .publish(&topics.ack, br#"{"type":"cancel"}"#)
        .expect("Publish failed");

    match handle.await.expect("Run panicked") {
        CalibrationOutcome::Aborted { reason } => {
            assert!(reason.contains("did not acknowledge pattern 0"), "{}", reason);
        }
        other => panic!("Expected an aborted run, got {:?}", other),
    }
}
