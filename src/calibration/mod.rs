//! Camera-based light position calibration
//!
//! A run lights the string in a sequence of structured patterns, asks the
//! camera client for the bright spots seen under each one, clusters the
//! reported spots into bins and finally assigns each light to the bin whose
//! vote for it is strictly the highest.
//!
//! ```text
//! IDLE -> RUNNING -> CAPTURING -> AGGREGATING -> DONE
//!            \            \            \
//!             +------------+------------+-> ABORTED
//! ```
//!
//! Inbound messages reach a run through the channels of
//! [`protocol::inbox`]; handlers never block.

pub mod bins;
pub mod display;
pub mod import;
pub mod messages;
pub mod pattern;
pub mod protocol;
pub mod resolve;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::{CalibrationConfig, Config, TopicConfig};
use crate::error::{CalibrationError, CalibrationResult};
use crate::frame::{Frame, Rgb};
use crate::storage::ArtifactStore;
use crate::transport::{FrameSink, Subscriber};

use bins::{aggregate, BinSet};
use display::CalibrationDisplay;
use import::{points_from_locations, CaptureLog, Importer, RawCapture};
use messages::ClientMessage;
use pattern::{Pattern, PatternSequence};
use protocol::{Inbox, InboxSender, Protocol, ProtocolTiming};
use resolve::resolve;

/// Lifecycle of the calibrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationPhase {
    Idle,
    Running,
    Capturing,
    Aggregating,
    Done,
    Aborted,
}

impl CalibrationPhase {
    /// A run is in progress
    pub fn is_active(self) -> bool {
        matches!(
            self,
            CalibrationPhase::Running | CalibrationPhase::Capturing | CalibrationPhase::Aggregating
        )
    }
}

/// Summary of a completed run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CalibrationReport {
    pub light_count: usize,
    pub patterns: usize,
    pub captures_imported: usize,
    pub captures_skipped: usize,
    pub bins_total: usize,
    pub bins_above_floor: usize,
    pub lights_resolved: usize,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalibrationOutcome {
    Done(CalibrationReport),
    Aborted { reason: String },
    Cancelled,
}

/// Notifications for the frame controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalibrationEvent {
    Started,
    Finished(CalibrationOutcome),
}

/// Runs calibrations on request and owns the resulting artifacts
pub struct Calibrator {
    config: CalibrationConfig,
    topics: TopicConfig,
    light_count: usize,
    sink: Arc<dyn FrameSink>,
    store: Arc<ArtifactStore>,
    display: CalibrationDisplay,
    events: Sender<CalibrationEvent>,
    phase: Mutex<CalibrationPhase>,
    inbox: Mutex<Option<InboxSender>>,
    runtime: Handle,
}

impl Calibrator {
    /// Must be called from within a tokio runtime; runs are spawned onto it
    pub fn new(
        config: &Config,
        sink: Arc<dyn FrameSink>,
        events: Sender<CalibrationEvent>,
    ) -> CalibrationResult<Arc<Self>> {
        let runtime = Handle::try_current()
            .map_err(|e| CalibrationError::InvalidConfig(format!("no tokio runtime: {}", e)))?;
        let store = ArtifactStore::new(&config.calibration.output_directory)?;

        Ok(Arc::new(Self {
            config: config.calibration.clone(),
            topics: config.topics.clone(),
            light_count: config.stream.light_count,
            sink,
            store: Arc::new(store),
            display: CalibrationDisplay::new(),
            events,
            phase: Mutex::new(CalibrationPhase::Idle),
            inbox: Mutex::new(None),
            runtime,
        }))
    }

    /// Register for client messages and acknowledgements
    pub fn subscribe(self: &Arc<Self>, subscriber: &dyn Subscriber) -> CalibrationResult<()> {
        let calibrator: Weak<Self> = Arc::downgrade(self);
        subscriber.subscribe(
            &self.topics.calibrate_client,
            Arc::new(move |payload: &[u8]| {
                if let Some(calibrator) = calibrator.upgrade() {
                    calibrator.handle_client_payload(payload);
                }
            }),
        )?;

        let calibrator: Weak<Self> = Arc::downgrade(self);
        subscriber.subscribe(
            &self.topics.ack,
            Arc::new(move |payload: &[u8]| {
                if let Some(calibrator) = calibrator.upgrade() {
                    calibrator.handle_ack_payload(payload);
                }
            }),
        )?;
        Ok(())
    }

    pub fn phase(&self) -> CalibrationPhase {
        *self.phase.lock()
    }

    pub fn display(&self) -> CalibrationDisplay {
        self.display.clone()
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Dispatch one payload from the camera client topic
    pub fn handle_client_payload(self: &Arc<Self>, payload: &[u8]) {
        let message = match ClientMessage::parse(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping message: {}", e);
                return;
            }
        };

        match message {
            ClientMessage::Start => {
                self.start();
            }
            ClientMessage::Cancel => {
                self.cancel();
            }
            ClientMessage::Data { locations } => {
                let points = match points_from_locations(&locations) {
                    Ok(points) => points,
                    Err(e) => {
                        tracing::warn!("Dropping coordinate report: {}", e);
                        return;
                    }
                };
                let delivered = self.inbox.lock().as_ref().is_some_and(|inbox| inbox.data(points));
                if !delivered {
                    tracing::debug!("Coordinate report outside of a run");
                }
            }
            ClientMessage::Ack { ack_id } => {
                tracing::warn!("Dropping ack {} sent on {}", ack_id, self.topics.calibrate_client);
            }
        }
    }

    /// Dispatch one payload from the display controller's ack topic
    pub fn handle_ack_payload(&self, payload: &[u8]) {
        match ClientMessage::parse(payload) {
            Ok(ClientMessage::Ack { ack_id }) => {
                let delivered = self.inbox.lock().as_ref().is_some_and(|inbox| inbox.ack(ack_id));
                if !delivered {
                    tracing::trace!("Ack {} outside of a run", ack_id);
                }
            }
            Ok(other) => tracing::warn!("Dropping {:?} sent on {}", other, self.topics.ack),
            Err(e) => tracing::warn!("Dropping ack: {}", e),
        }
    }

    /// Begin a run unless one is already in progress
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<CalibrationOutcome>> {
        {
            let mut phase = self.phase.lock();
            if phase.is_active() {
                tracing::info!("Calibration already running, ignoring start");
                return None;
            }
            *phase = CalibrationPhase::Running;
        }

        let (sender, inbox) = protocol::inbox();
        *self.inbox.lock() = Some(sender);

        let calibrator = Arc::clone(self);
        Some(self.runtime.spawn(async move { calibrator.run(inbox).await }))
    }

    /// Ask the active run to stop. Returns false if nothing is running.
    pub fn cancel(&self) -> bool {
        match self.inbox.lock().as_ref() {
            Some(inbox) => {
                tracing::info!("Cancelling calibration");
                inbox.cancel();
                true
            }
            None => false,
        }
    }

    fn set_phase(&self, phase: CalibrationPhase) {
        *self.phase.lock() = phase;
        tracing::debug!("Calibration phase: {:?}", phase);
    }

    fn notify(&self, event: CalibrationEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("No listener for calibration events");
        }
    }

    async fn run(self: Arc<Self>, inbox: Inbox) -> CalibrationOutcome {
        tracing::info!("Starting calibration of {} lights", self.light_count);
        self.notify(CalibrationEvent::Started);

        let result = self.execute(inbox).await;
        *self.inbox.lock() = None;

        let (phase, outcome) = match result {
            Ok(report) => {
                tracing::info!(
                    "Calibration complete: {}/{} lights resolved from {} bins",
                    report.lights_resolved,
                    report.light_count,
                    report.bins_above_floor
                );
                (CalibrationPhase::Done, CalibrationOutcome::Done(report))
            }
            Err(CalibrationError::Cancelled) => {
                tracing::warn!("Calibration cancelled");
                (CalibrationPhase::Aborted, CalibrationOutcome::Cancelled)
            }
            Err(e) => {
                tracing::error!("Calibration aborted: {}", e);
                (
                    CalibrationPhase::Aborted,
                    CalibrationOutcome::Aborted {
                        reason: e.to_string(),
                    },
                )
            }
        };

        // Finished must reach listeners before a new run can send Started
        self.notify(CalibrationEvent::Finished(outcome.clone()));
        self.set_phase(phase);
        outcome
    }

    async fn execute(&self, inbox: Inbox) -> CalibrationResult<CalibrationReport> {
        let n = self.light_count;
        let sequence = PatternSequence::generate(&self.config.scheme, n)?;
        if let Err(e) = sequence.validate_distinguishable() {
            tracing::warn!("{}; affected lights will stay unresolved", e);
        }
        self.store.prepare_run().await?;

        let mut protocol = Protocol::new(
            Arc::clone(&self.sink),
            self.topics.clone(),
            ProtocolTiming::from(&self.config),
            inbox,
        );

        self.set_phase(CalibrationPhase::Capturing);
        protocol.show(&Frame::filled(n, self.config.lit_rgb()))?;
        protocol.pause(self.config.warmup()).await?;

        let log = Arc::new(CaptureLog::default());
        let mut importer = Importer::new(Arc::clone(&self.store), Arc::clone(&log));
        let mut skipped = 0;

        for (index, pattern) in sequence.iter().enumerate() {
            tracing::info!(
                "Pattern {}/{}: interval {} offset {} stride {}",
                index + 1,
                sequence.len(),
                pattern.interval,
                pattern.offset,
                pattern.stride
            );
            protocol
                .display(index, pattern_frame(pattern, n, self.config.lit_rgb()))
                .await?;
            protocol.pause(self.config.pattern_settle()).await?;

            let votes = pattern.votes(n);
            for capture in 0..self.config.captures_per_pattern {
                match protocol.capture(index, capture).await? {
                    Some(locations) => importer.spawn(RawCapture {
                        pattern: index,
                        capture,
                        pixels: votes.clone(),
                        locations,
                    }),
                    None => skipped += 1,
                }
            }
        }

        self.set_phase(CalibrationPhase::Aggregating);
        importer.join_all().await?;
        let captures = log.take();
        tracing::info!("Aggregating {} captures", captures.len());

        let workers = self.config.aggregation_workers;
        let distance = self.config.bin_similarity_distance;
        let imported = captures.len();
        let all = tokio::task::spawn_blocking(move || {
            let bins = BinSet::new(n, distance);
            aggregate(&captures, &bins, workers).map(|()| bins.snapshot())
        })
        .await??;

        let filtered = all.filtered(self.config.bin_hit_threshold);
        tracing::info!(
            "{} bins, {} with at least {} hits",
            all.bins.len(),
            filtered.bins.len(),
            self.config.bin_hit_threshold
        );

        let assignment = resolve(&filtered.bins, n);

        self.store.store_aggregated(&all).await?;
        self.store.store_filtered(&filtered).await?;
        self.store.store_assignment(&assignment).await?;
        self.display.show_status(&assignment);

        Ok(CalibrationReport {
            light_count: n,
            patterns: sequence.len(),
            captures_imported: imported,
            captures_skipped: skipped,
            bins_total: all.bins.len(),
            bins_above_floor: filtered.bins.len(),
            lights_resolved: assignment.resolved_count(),
        })
    }
}

/// Frame with the pattern's lit lights on and everything else off
pub fn pattern_frame(pattern: &Pattern, light_count: usize, lit: Rgb) -> Frame {
    Frame {
        ack_id: 0,
        pixels: (0..light_count)
            .map(|i| if pattern.is_lit(i) { lit } else { Rgb::BLACK })
            .collect(),
    }
}
