//! Simulated display controller and camera client
//!
//! Attaches to a [`MessageBus`] in place of real hardware: frames on the
//! stream topic are decoded and "shown", non-zero tokens are acknowledged,
//! and every snapshot request is answered with the coordinates of the
//! currently lit lights in a synthetic layout. Faults can be injected to
//! exercise the retry paths.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::calibration::messages::{ClientMessage, Point, SNAPSHOT_COMMAND};
use crate::config::TopicConfig;
use crate::error::CalibrationResult;
use crate::frame::{Frame, Rgb};
use crate::transport::{FrameSink, MessageBus, Subscriber};

/// Faults to inject
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Swallow this many acknowledgements before answering normally
    pub drop_first_acks: usize,
    /// Never acknowledge anything
    pub never_ack: bool,
    /// Answer this many snapshot requests with an odd-length coordinate list
    pub malformed_reports: usize,
    /// Ignore this many snapshot requests
    pub ignore_snapshots: usize,
}

/// Counters describing what the simulator has done
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub frames_received: usize,
    pub acks_sent: usize,
    pub acks_dropped: usize,
    pub reports_sent: usize,
    pub snapshots_ignored: usize,
}

#[derive(Debug, Default)]
struct SimulatorState {
    lit: Vec<bool>,
    faults: FaultPlan,
    stats: SimulatorStats,
}

/// Virtual lights watched by a virtual camera
pub struct Simulator {
    bus: Arc<MessageBus>,
    topics: TopicConfig,
    layout: Vec<Point>,
    state: Mutex<SimulatorState>,
}

impl Simulator {
    /// Lights evenly spaced on a circle, far enough apart not to share a bin
    pub fn ring_layout(light_count: usize, radius: f64) -> Vec<Point> {
        (0..light_count)
            .map(|i| {
                let angle = i as f64 / light_count.max(1) as f64 * std::f64::consts::TAU;
                Point::new(radius * (1.0 + angle.cos()), radius * (1.0 + angle.sin()))
            })
            .collect()
    }

    /// Subscribe to the stream and snapshot topics of `bus`
    pub fn attach(
        bus: Arc<MessageBus>,
        topics: TopicConfig,
        layout: Vec<Point>,
        faults: FaultPlan,
    ) -> CalibrationResult<Arc<Self>> {
        let simulator = Arc::new(Self {
            bus: Arc::clone(&bus),
            topics: topics.clone(),
            state: Mutex::new(SimulatorState {
                lit: vec![false; layout.len()],
                faults,
                stats: SimulatorStats::default(),
            }),
            layout,
        });

        let weak = Arc::downgrade(&simulator);
        bus.subscribe(
            &topics.stream,
            Arc::new(move |payload: &[u8]| {
                if let Some(simulator) = weak.upgrade() {
                    simulator.on_frame(payload);
                }
            }),
        )?;

        let weak = Arc::downgrade(&simulator);
        bus.subscribe(
            &topics.calibrate_server,
            Arc::new(move |payload: &[u8]| {
                if let Some(simulator) = weak.upgrade() {
                    simulator.on_command(payload);
                }
            }),
        )?;

        tracing::info!("Simulated display and camera attached");
        Ok(simulator)
    }

    pub fn stats(&self) -> SimulatorStats {
        self.state.lock().stats
    }

    /// Replace the remaining fault plan
    pub fn set_faults(&self, faults: FaultPlan) {
        self.state.lock().faults = faults;
    }

    /// Ask the calibrator to begin a run
    pub fn request_calibration(&self) -> CalibrationResult<()> {
        self.send_client(&ClientMessage::Start)
    }

    /// Ask the calibrator to abandon its run
    pub fn request_cancel(&self) -> CalibrationResult<()> {
        self.send_client(&ClientMessage::Cancel)
    }

    fn send_client(&self, message: &ClientMessage) -> CalibrationResult<()> {
        self.bus.publish(&self.topics.calibrate_client, &message.to_json()?)
    }

    fn on_frame(&self, payload: &[u8]) {
        let frame = match Frame::decode(payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Simulated display rejected frame: {}", e);
                return;
            }
        };

        let ack = {
            let mut state = self.state.lock();
            state.stats.frames_received += 1;
            for (lit, pixel) in state.lit.iter_mut().zip(&frame.pixels) {
                *lit = *pixel != Rgb::BLACK;
            }

            if frame.ack_id == 0 {
                None
            } else if state.faults.never_ack {
                state.stats.acks_dropped += 1;
                None
            } else if state.faults.drop_first_acks > 0 {
                state.faults.drop_first_acks -= 1;
                state.stats.acks_dropped += 1;
                None
            } else {
                state.stats.acks_sent += 1;
                Some(frame.ack_id)
            }
        };

        if let Some(ack_id) = ack {
            let message = ClientMessage::Ack { ack_id };
            if let Err(e) = message
                .to_json()
                .and_then(|json| self.bus.publish(&self.topics.ack, &json))
            {
                tracing::warn!("Simulated display failed to acknowledge: {}", e);
            }
        }
    }

    fn on_command(&self, payload: &[u8]) {
        if payload != SNAPSHOT_COMMAND.as_bytes() {
            tracing::debug!("Simulated camera ignoring {} byte command", payload.len());
            return;
        }

        let locations = {
            let mut state = self.state.lock();
            if state.faults.ignore_snapshots > 0 {
                state.faults.ignore_snapshots -= 1;
                state.stats.snapshots_ignored += 1;
                return;
            }

            let mut locations: Vec<f64> = state
                .lit
                .iter()
                .zip(&self.layout)
                .filter(|(lit, _)| **lit)
                .flat_map(|(_, p)| [p.x, p.y])
                .collect();

            if state.faults.malformed_reports > 0 {
                state.faults.malformed_reports -= 1;
                locations.push(0.0);
            }
            state.stats.reports_sent += 1;
            locations
        };

        if let Err(e) = self.send_client(&ClientMessage::Data { locations }) {
            tracing::warn!("Simulated camera failed to report: {}", e);
        }
    }
}
