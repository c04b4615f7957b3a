//! Messages exchanged with the camera client and the display controller

use serde::{Deserialize, Serialize};

use crate::error::{CalibrationError, CalibrationResult};

/// Command published to ask the camera client for a capture
pub const SNAPSHOT_COMMAND: &str = "snapshot";

/// A position in the camera's pixel plane
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Inbound JSON message, discriminated by its `type` field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Begin a calibration run
    Start,
    /// Coordinate report for one snapshot: interleaved x,y values
    Data { locations: Vec<f64> },
    /// Display controller's echo of the rendered frame's token
    Ack {
        #[serde(rename = "ackID")]
        ack_id: u8,
    },
    /// Abandon the current run
    Cancel,
}

impl ClientMessage {
    pub fn parse(payload: &[u8]) -> CalibrationResult<Self> {
        serde_json::from_slice(payload).map_err(|e| CalibrationError::MalformedPayload(e.to_string()))
    }

    pub fn to_json(&self) -> CalibrationResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(Into::into)
    }
}
