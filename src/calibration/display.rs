//! Calibration scene
//!
//! Pattern frames go straight to the display controller through the
//! acknowledgement protocol, so this scene renders nothing while a run is
//! in progress. When a run completes it emits the status frame exactly once.

use crossbeam::queue::ArrayQueue;
use std::sync::Arc;

use super::resolve::Assignment;
use crate::animation::Animation;
use crate::frame::{Frame, Rgb};

/// Colour of a light that was located
pub const RESOLVED_COLOR: Rgb = Rgb::new(0x00, 0x20, 0x00);
/// Colour of a light that was not located
pub const UNRESOLVED_COLOR: Rgb = Rgb::new(0x20, 0x00, 0x00);

/// Shared handle to the pending status frame
#[derive(Debug, Clone)]
pub struct CalibrationDisplay {
    pending: Arc<ArrayQueue<Frame>>,
}

impl Default for CalibrationDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationDisplay {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(ArrayQueue::new(1)),
        }
    }

    /// Queue the frame summarising `assignment`, replacing any frame not yet shown
    pub fn show_status(&self, assignment: &Assignment) {
        self.pending.force_push(status_frame(assignment));
    }

    /// Drop a status frame that was never shown
    pub fn clear(&self) {
        while self.pending.pop().is_some() {}
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

impl Animation for CalibrationDisplay {
    fn render_frame(&mut self, _runtime_ms: u64) -> Option<Frame> {
        self.pending.pop()
    }
}

/// Green for every resolved light, red for the rest
pub fn status_frame(assignment: &Assignment) -> Frame {
    Frame {
        ack_id: 0,
        pixels: assignment
            .iter()
            .map(|light| if light.resolved { RESOLVED_COLOR } else { UNRESOLVED_COLOR })
            .collect(),
    }
}
