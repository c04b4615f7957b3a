//! Full calibration runs against the simulated display and camera

use ledtx::calibration::pattern::PatternScheme;
use ledtx::calibration::{CalibrationEvent, CalibrationOutcome, CalibrationPhase};
use ledtx::simulator::{FaultPlan, Simulator};

use crate::test_utils::{drain_events, rig};

#[tokio::test(start_paused = true)]
async fn test_every_light_resolved_to_its_position() {
    let rig = rig(4, FaultPlan::default(), |_| {});

    let handle = rig.calibrator.start().expect("Run should start");
    let outcome = handle.await.expect("Run panicked");

    let report = match outcome {
        CalibrationOutcome::Done(report) => report,
        other => panic!("Expected a finished run, got {:?}", other),
    };
    assert_eq!(report.patterns, 7);
    assert_eq!(report.captures_imported, 21);
    assert_eq!(report.captures_skipped, 0);
    assert_eq!(report.bins_total, 4);
    assert_eq!(report.lights_resolved, 4);
    assert_eq!(rig.calibrator.phase(), CalibrationPhase::Done);

    let layout = Simulator::ring_layout(4, 100.0);
    let assignment = rig
        .calibrator
        .store()
        .load_assignment()
        .await
        .expect("Assignment should be stored");
    assert_eq!(assignment.len(), 4);
    for (light, expected) in layout.iter().enumerate() {
        let found = assignment.get(light).expect("Light missing");
        assert!(found.resolved, "light {} unresolved", light);
        assert_eq!(found.location, Some(*expected));
    }

    assert_eq!(
        drain_events(&rig.events),
        vec![
            CalibrationEvent::Started,
            CalibrationEvent::Finished(CalibrationOutcome::Done(report)),
        ]
    );
    assert!(rig.calibrator.display().has_pending());
}

#[tokio::test(start_paused = true)]
async fn test_binary_halving_resolves_larger_string() {
    let rig = rig(37, FaultPlan::default(), |config| {
        config.calibration.scheme = PatternScheme::BinaryHalving;
        config.calibration.captures_per_pattern = 2;
    });

    let outcome = rig
        .calibrator
        .start()
        .expect("Run should start")
        .await
        .expect("Run panicked");

    match outcome {
        CalibrationOutcome::Done(report) => {
            assert_eq!(report.patterns, 12);
            assert_eq!(report.lights_resolved, 37);
        }
        other => panic!("Expected a finished run, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_indistinguishable_lights_stay_unresolved() {
    let rig = rig(4, FaultPlan::default(), |config| {
        config.calibration.scheme = PatternScheme::Modular {
            intervals: vec![1, 2],
        };
    });

    let outcome = rig
        .calibrator
        .start()
        .expect("Run should start")
        .await
        .expect("Run panicked");

    match outcome {
        CalibrationOutcome::Done(report) => {
            assert_eq!(report.bins_total, 4);
            assert_eq!(report.lights_resolved, 0);
        }
        other => panic!("Expected a finished run, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_hit_floor_excludes_sparse_bins() {
    let rig = rig(4, FaultPlan::default(), |config| {
        config.calibration.bin_hit_threshold = 1_000;
    });

    let outcome = rig
        .calibrator
        .start()
        .expect("Run should start")
        .await
        .expect("Run panicked");

    match outcome {
        CalibrationOutcome::Done(report) => {
            assert_eq!(report.bins_total, 4);
            assert_eq!(report.bins_above_floor, 0);
            assert_eq!(report.lights_resolved, 0);
        }
        other => panic!("Expected a finished run, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_message_over_bus_runs_calibration() {
    let rig = rig(4, FaultPlan::default(), |_| {});

    rig.simulator.request_calibration().expect("Publish failed");
    assert!(rig.calibrator.phase().is_active());
    assert!(rig.calibrator.start().is_none(), "second start must be ignored");

    while rig.calibrator.phase().is_active() {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    assert_eq!(rig.calibrator.phase(), CalibrationPhase::Done);
    assert!(rig.calibrator.store().assignment_exists());
    assert!(rig.bus.published_count() > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_back_to_back_runs_report_in_order() {
    let rig = rig(4, FaultPlan::default(), |_| {});

    let mut handles = Vec::new();
    while handles.len() < 20 {
        match rig.calibrator.start() {
            Some(handle) => handles.push(handle),
            None => tokio::task::yield_now().await,
        }
    }
    for handle in handles {
        let outcome = handle.await.expect("Run panicked");
        assert!(matches!(outcome, CalibrationOutcome::Done(_)), "{:?}", outcome);
    }

    let events = drain_events(&rig.events);
    assert_eq!(events.len(), 40);
    for pair in events.chunks(2) {
        assert_eq!(pair[0], CalibrationEvent::Started);
        assert!(matches!(pair[1], CalibrationEvent::Finished(_)), "{:?}", pair[1]);
    }
}
