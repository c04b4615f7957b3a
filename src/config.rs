//! Runtime configuration
//!
//! Loaded from a TOML file at startup. Every section falls back to its
//! defaults so a config file only needs the values that differ.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::calibration::pattern::PatternScheme;
use crate::frame::Rgb;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pub/sub topic names
    pub topics: TopicConfig,
    /// Frame streaming settings
    pub stream: StreamConfig,
    /// Calibration run parameters
    pub calibration: CalibrationConfig,
    /// Log output settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.topics.validate()?;
        self.stream.validate()?;
        self.calibration.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Topic names used on the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Binary display frames to the display controller
    pub stream: String,
    /// Frame acknowledgements from the display controller
    pub ack: String,
    /// Messages from the camera client (start, data, cancel)
    pub calibrate_client: String,
    /// Commands to the camera client (snapshot)
    pub calibrate_server: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            stream: "ledtx/stream".to_string(),
            ack: "ledtx/ack".to_string(),
            calibrate_client: "ledtx/calibrate/client".to_string(),
            calibrate_server: "ledtx/calibrate/server".to_string(),
        }
    }
}

impl TopicConfig {
    fn validate(&self) -> Result<()> {
        for (name, topic) in [
            ("stream", &self.stream),
            ("ack", &self.ack),
            ("calibrate_client", &self.calibrate_client),
            ("calibrate_server", &self.calibrate_server),
        ] {
            if topic.is_empty() {
                anyhow::bail!("Topic '{}' must not be empty", name);
            }
        }
        Ok(())
    }
}

/// Frame streaming settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Number of lights on the string
    pub light_count: usize,
    /// Interval between frames
    pub frame_time_ms: u64,
    /// How long the calibration status frame stays up before normal animation resumes
    pub status_hold_ms: u64,
    /// Cross-fade length when normal animation resumes
    pub transition_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            light_count: 500,
            frame_time_ms: 21,
            status_hold_ms: 10_000,
            transition_ms: 1_000,
        }
    }
}

impl StreamConfig {
    fn validate(&self) -> Result<()> {
        if self.light_count == 0 || self.light_count > u16::MAX as usize {
            anyhow::bail!("Light count out of range: {}", self.light_count);
        }
        if self.frame_time_ms == 0 || self.frame_time_ms > 1000 {
            anyhow::bail!("Frame time out of range: {}ms", self.frame_time_ms);
        }
        Ok(())
    }

    pub fn frame_time(&self) -> Duration {
        Duration::from_millis(self.frame_time_ms)
    }

    pub fn status_hold(&self) -> Duration {
        Duration::from_millis(self.status_hold_ms)
    }

    pub fn transition(&self) -> Duration {
        Duration::from_millis(self.transition_ms)
    }
}

/// Calibration run parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Illumination pattern family
    pub scheme: PatternScheme,
    /// Snapshots requested per displayed pattern
    pub captures_per_pattern: usize,
    /// Wait per acknowledgement attempt
    pub ack_timeout_ms: u64,
    /// Overall acknowledgement deadline per pattern before the run is abandoned
    pub ack_deadline_ms: u64,
    /// Wait for a coordinate report after a snapshot request
    pub snapshot_timeout_ms: u64,
    /// Pause before re-requesting a snapshot
    pub snapshot_backoff_ms: u64,
    /// Snapshot requests per capture slot before the slot is skipped
    pub max_snapshot_attempts: u32,
    /// Initial settle time so the camera can adjust exposure
    pub warmup_ms: u64,
    /// Settle time after each acknowledged pattern
    pub pattern_settle_ms: u64,
    /// Observations closer than this (pixels) merge into the same bin
    pub bin_similarity_distance: f64,
    /// Minimum hits before a bin is considered for resolution
    pub bin_hit_threshold: u32,
    /// Worker threads used while folding observations into bins
    pub aggregation_workers: usize,
    /// Colour of a lit light while calibrating
    pub lit_color: [u8; 3],
    /// Where calibration artifacts are written
    pub output_directory: PathBuf,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            scheme: PatternScheme::BinaryHalving,
            captures_per_pattern: 30,
            ack_timeout_ms: 1_000,
            ack_deadline_ms: 30_000,
            snapshot_timeout_ms: 1_000,
            snapshot_backoff_ms: 100,
            max_snapshot_attempts: 10,
            warmup_ms: 2_000,
            pattern_settle_ms: 200,
            bin_similarity_distance: 3.0,
            bin_hit_threshold: 100,
            aggregation_workers: 4,
            lit_color: [0x20, 0x20, 0x20],
            output_directory: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ledtx")
                .join("caldata"),
        }
    }
}

impl CalibrationConfig {
    pub fn validate(&self) -> Result<()> {
        if let PatternScheme::Modular { intervals } = &self.scheme {
            if intervals.is_empty() {
                anyhow::bail!("Modular pattern scheme needs at least one interval");
            }
            if intervals.iter().any(|&i| i == 0) {
                anyhow::bail!("Pattern intervals must be non-zero: {:?}", intervals);
            }
        }
        if self.captures_per_pattern == 0 {
            anyhow::bail!("At least one capture per pattern is required");
        }
        if self.ack_timeout_ms == 0 || self.ack_timeout_ms > self.ack_deadline_ms {
            anyhow::bail!(
                "Ack timeout {}ms must be non-zero and within the deadline {}ms",
                self.ack_timeout_ms,
                self.ack_deadline_ms
            );
        }
        if self.snapshot_timeout_ms == 0 {
            anyhow::bail!("Snapshot timeout must be non-zero");
        }
        if self.max_snapshot_attempts == 0 {
            anyhow::bail!("At least one snapshot attempt is required");
        }
        if !self.bin_similarity_distance.is_finite() || self.bin_similarity_distance <= 0.0 {
            anyhow::bail!(
                "Bin similarity distance out of range: {}",
                self.bin_similarity_distance
            );
        }
        if self.aggregation_workers == 0 || self.aggregation_workers > 64 {
            anyhow::bail!("Aggregation workers out of range: {}", self.aggregation_workers);
        }
        if self.lit_color == [0, 0, 0] {
            anyhow::bail!("Lit colour must not be black");
        }
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn ack_deadline(&self) -> Duration {
        Duration::from_millis(self.ack_deadline_ms)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }

    pub fn snapshot_backoff(&self) -> Duration {
        Duration::from_millis(self.snapshot_backoff_ms)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn pattern_settle(&self) -> Duration {
        Duration::from_millis(self.pattern_settle_ms)
    }

    pub fn lit_rgb(&self) -> Rgb {
        Rgb::new(self.lit_color[0], self.lit_color[1], self.lit_color[2])
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Maximum level: trace, debug, info, warn or error
    pub level: String,
    /// Include the module path in each line
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: false,
        }
    }
}

impl LoggingConfig {
    fn validate(&self) -> Result<()> {
        self.max_level()?;
        Ok(())
    }

    /// Parse the configured level
    pub fn max_level(&self) -> Result<tracing::Level> {
        self.level
            .parse::<tracing::Level>()
            .map_err(|_| anyhow::anyhow!("Unknown log level: {}", self.level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml_str(
            r#"
            [stream]
            light_count = 50

            [calibration]
            captures_per_pattern = 3
            scheme = { kind = "modular", intervals = [1, 2, 4] }
            "#,
        )
        .expect("Config should parse");

        assert_eq!(config.stream.light_count, 50);
        assert_eq!(config.stream.frame_time_ms, 21);
        assert_eq!(config.calibration.captures_per_pattern, 3);
        assert_eq!(
            config.calibration.scheme,
            PatternScheme::Modular { intervals: vec![1, 2, 4] }
        );
        assert_eq!(config.topics.ack, "ledtx/ack");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.calibration.ack_timeout_ms = 60_000;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.calibration.scheme = PatternScheme::Modular { intervals: vec![2, 0] };
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.stream.light_count = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }
}
