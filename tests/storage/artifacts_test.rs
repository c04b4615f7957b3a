//! Artifacts written by a finished calibration run

use ledtx::calibration::bins::AggregatedData;
use ledtx::calibration::import::RawCapture;
use ledtx::calibration::CalibrationOutcome;
use ledtx::simulator::FaultPlan;
use ledtx::storage::{ArtifactStore, StorageConfig};

use crate::test_utils::{create_temp_dir, rig};

#[tokio::test(start_paused = true)]
async fn test_run_writes_every_artifact() {
    let rig = rig(4, FaultPlan::default(), |_| {});
    let outcome = rig
        .calibrator
        .start()
        .expect("Run should start")
        .await
        .expect("Run panicked");
    assert!(matches!(outcome, CalibrationOutcome::Done(_)));

    let store = rig.calibrator.store();
    let raw_files = std::fs::read_dir(store.raw_directory())
        .expect("Raw directory missing")
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
        .count();
    assert_eq!(raw_files, 21);

    let first: RawCapture = store.load_raw_capture(0, 0).await.expect("Capture missing");
    assert_eq!(first.pixels, vec![1, 1, 1, 1]);
    assert_eq!(first.locations.len(), 4);

    let raw = std::fs::read_to_string(store.raw_capture_path(1, 2)).expect("Capture missing");
    let json: serde_json::Value = serde_json::from_str(&raw).expect("Invalid JSON");
    assert_eq!(json["pixels"], serde_json::json!([1, -1, 1, -1]));
    assert_eq!(json["locations"].as_array().map(Vec::len), Some(2));

    let filtered: AggregatedData = serde_json::from_str(
        &std::fs::read_to_string(store.filtered_path()).expect("Filtered bins missing"),
    )
    .expect("Invalid JSON");
    assert_eq!(filtered.bins.len(), 4);
    assert!(filtered.bins.iter().all(|bin| bin.pixels.len() == 4));

    let aggregated = store.load_aggregated().await.expect("Bins missing");
    assert_eq!(aggregated, filtered);
    assert!(store.base_directory().starts_with(rig.temp_dir.path()));
}

#[tokio::test]
async fn test_pretty_printed_store() {
    let temp_dir = create_temp_dir();
    let config = StorageConfig {
        pretty_print: true,
        atomic_writes: false,
        ..StorageConfig::new(temp_dir.path())
    };
    let store = ArtifactStore::with_config(config).expect("Failed to create store");

    store
        .store_aggregated(&AggregatedData::default())
        .await
        .expect("Store failed");
    let raw = std::fs::read_to_string(store.aggregated_path()).expect("Read failed");
    assert!(raw.contains('\n'));
    assert_eq!(store.load_aggregated().await.ok(), Some(AggregatedData::default()));
}
