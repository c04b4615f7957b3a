//! Artifact storage for calibration runs
//!
//! Every artifact is JSON. Writes go through a temporary file and a rename
//! so that a reader never sees a half-written artifact.
//!
//! Layout under the output directory:
//!
//! ```text
//! raw/raw-p000-000.json   one file per imported capture
//! aggregated.json         every bin
//! aggregated-hits.json    bins above the hit floor
//! pixels.json             final light assignment
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::calibration::bins::AggregatedData;
use crate::calibration::import::RawCapture;
use crate::calibration::resolve::Assignment;
use crate::error::CalibrationResult;

const RAW_DIRECTORY: &str = "raw";
const AGGREGATED_FILE: &str = "aggregated.json";
const FILTERED_FILE: &str = "aggregated-hits.json";
const ASSIGNMENT_FILE: &str = "pixels.json";

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory all artifacts are written under
    pub base_directory: PathBuf,
    /// Write through a temporary file and rename
    pub atomic_writes: bool,
    /// Indent JSON output
    pub pretty_print: bool,
}

impl StorageConfig {
    pub fn new(base_directory: impl Into<PathBuf>) -> Self {
        Self {
            base_directory: base_directory.into(),
            atomic_writes: true,
            pretty_print: false,
        }
    }
}

/// Reads and writes calibration artifacts
#[derive(Debug)]
pub struct ArtifactStore {
    config: StorageConfig,
}

impl ArtifactStore {
    pub fn new(base_directory: impl Into<PathBuf>) -> CalibrationResult<Self> {
        Self::with_config(StorageConfig::new(base_directory))
    }

    pub fn with_config(config: StorageConfig) -> CalibrationResult<Self> {
        std::fs::create_dir_all(&config.base_directory)?;
        Ok(Self { config })
    }

    pub fn base_directory(&self) -> &Path {
        &self.config.base_directory
    }

    pub fn raw_directory(&self) -> PathBuf {
        self.config.base_directory.join(RAW_DIRECTORY)
    }

    pub fn raw_capture_path(&self, pattern: usize, capture: usize) -> PathBuf {
        self.raw_directory()
            .join(format!("raw-p{:03}-{:03}.json", pattern, capture))
    }

    pub fn aggregated_path(&self) -> PathBuf {
        self.config.base_directory.join(AGGREGATED_FILE)
    }

    pub fn filtered_path(&self) -> PathBuf {
        self.config.base_directory.join(FILTERED_FILE)
    }

    pub fn assignment_path(&self) -> PathBuf {
        self.config.base_directory.join(ASSIGNMENT_FILE)
    }

    /// Clear captures left over from a previous run
    pub async fn prepare_run(&self) -> CalibrationResult<()> {
        let raw = self.raw_directory();
        match fs::remove_dir_all(&raw).await {
            Ok(()) => tracing::debug!("Cleared previous captures in {:?}", raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&raw).await?;
        Ok(())
    }

    pub async fn store_raw_capture(&self, capture: &RawCapture) -> CalibrationResult<()> {
        let path = self.raw_capture_path(capture.pattern, capture.capture);
        self.write_json(&path, capture).await
    }

    pub async fn store_aggregated(&self, data: &AggregatedData) -> CalibrationResult<()> {
        self.write_json(&self.aggregated_path(), data).await
    }

    pub async fn store_filtered(&self, data: &AggregatedData) -> CalibrationResult<()> {
        self.write_json(&self.filtered_path(), data).await
    }

    pub async fn store_assignment(&self, assignment: &Assignment) -> CalibrationResult<()> {
        let path = self.assignment_path();
        self.write_json(&path, assignment).await?;
        tracing::info!("Light assignment written to {:?}", path);
        Ok(())
    }

    pub async fn load_assignment(&self) -> CalibrationResult<Assignment> {
        self.read_json(&self.assignment_path()).await
    }

    pub async fn load_aggregated(&self) -> CalibrationResult<AggregatedData> {
        self.read_json(&self.aggregated_path()).await
    }

    pub async fn load_raw_capture(&self, pattern: usize, capture: usize) -> CalibrationResult<RawCapture> {
        self.read_json(&self.raw_capture_path(pattern, capture)).await
    }

    pub fn assignment_exists(&self) -> bool {
        self.assignment_path().exists()
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> CalibrationResult<T> {
        let contents = fs::read(path).await?;
        Ok(serde_json::from_slice(&contents)?)
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> CalibrationResult<()> {
        let data = if self.config.pretty_print {
            serde_json::to_vec_pretty(value)?
        } else {
            serde_json::to_vec(value)?
        };

        if self.config.atomic_writes {
            self.atomic_write(path, &data).await
        } else {
            self.direct_write(path, &data).await
        }
    }

    /// Atomic write using temporary file and rename
    async fn atomic_write(&self, path: &Path, data: &[u8]) -> CalibrationResult<()> {
        let temp_path = path.with_extension("tmp");

        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        {
            let mut temp_file = fs::File::create(&temp_path).await?;
            temp_file.write_all(data).await?;
            temp_file.flush().await?;
            temp_file.sync_all().await?;
        }

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn direct_write(&self, path: &Path, data: &[u8]) -> CalibrationResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, data).await?;
        Ok(())
    }
}
