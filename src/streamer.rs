//! Frame controller and streaming loop

use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::animation::{Animation, Scene};
use crate::calibration::display::CalibrationDisplay;
use crate::calibration::{CalibrationEvent, CalibrationOutcome};
use crate::frame::Frame;
use crate::transport::FrameSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerMode {
    Idle,
    Calibrating,
    /// Showing the status frame until the given runtime
    Holding { until_ms: u64 },
}

/// Chooses which scene renders each tick
pub struct Controller {
    idle: Scene,
    calibration: Scene,
    events: Receiver<CalibrationEvent>,
    status_hold_ms: u64,
    transition_ms: u64,
    mode: ControllerMode,
    last: Option<Frame>,
    fade_from: Option<(Frame, u64)>,
}

impl Controller {
    pub fn new(
        idle: Scene,
        display: CalibrationDisplay,
        events: Receiver<CalibrationEvent>,
        status_hold: Duration,
    ) -> Self {
        Self {
            idle,
            calibration: Scene::Calibration(display),
            events,
            status_hold_ms: status_hold.as_millis() as u64,
            transition_ms: 0,
            mode: ControllerMode::Idle,
            last: None,
            fade_from: None,
        }
    }

    /// Cross-fade from the last shown frame when returning to the idle scene
    pub fn with_transition(mut self, transition: Duration) -> Self {
        self.transition_ms = transition.as_millis() as u64;
        self
    }

    pub fn mode(&self) -> ControllerMode {
        self.mode
    }

    fn poll_events(&mut self, runtime_ms: u64) {
        while let Ok(event) = self.events.try_recv() {
            self.mode = match event {
                CalibrationEvent::Started => {
                    tracing::info!("Switching to calibration scene");
                    ControllerMode::Calibrating
                }
                CalibrationEvent::Finished(CalibrationOutcome::Done(_)) => ControllerMode::Holding {
                    until_ms: runtime_ms + self.status_hold_ms,
                },
                CalibrationEvent::Finished(_) => {
                    self.resume_idle(runtime_ms);
                    ControllerMode::Idle
                }
            };
        }
    }

    fn resume_idle(&mut self, runtime_ms: u64) {
        tracing::info!("Resuming {} scene", self.idle.name());
        if self.transition_ms > 0 {
            self.fade_from = self.last.clone().map(|frame| (frame, runtime_ms));
        }
    }

    fn render_idle(&mut self, runtime_ms: u64) -> Option<Frame> {
        let frame = self.idle.render_frame(runtime_ms)?;
        let fading = self.fade_from.as_ref().and_then(|(from, started_ms)| {
            let elapsed = runtime_ms.saturating_sub(*started_ms);
            (elapsed < self.transition_ms)
                .then(|| from.blend(&frame, elapsed as f64 / self.transition_ms as f64))
        });
        if fading.is_none() {
            self.fade_from = None;
        }
        Some(fading.unwrap_or(frame))
    }
}

impl Animation for Controller {
    fn render_frame(&mut self, runtime_ms: u64) -> Option<Frame> {
        self.poll_events(runtime_ms);

        let frame = match self.mode {
            ControllerMode::Idle => self.render_idle(runtime_ms),
            ControllerMode::Calibrating => self.calibration.render_frame(runtime_ms),
            ControllerMode::Holding { until_ms } if runtime_ms < until_ms => {
                self.calibration.render_frame(runtime_ms)
            }
            ControllerMode::Holding { .. } => {
                self.resume_idle(runtime_ms);
                self.mode = ControllerMode::Idle;
                self.render_idle(runtime_ms)
            }
        };

        if let Some(frame) = &frame {
            self.last = Some(frame.clone());
        }
        frame
    }
}

/// Publishes one frame per tick to the stream topic
pub struct Streamer<A: Animation> {
    sink: Arc<dyn FrameSink>,
    topic: String,
    frame_time: Duration,
    runtime_ms: u64,
    animation: A,
}

impl<A: Animation> Streamer<A> {
    pub fn new(sink: Arc<dyn FrameSink>, topic: impl Into<String>, frame_time: Duration, animation: A) -> Self {
        Self {
            sink,
            topic: topic.into(),
            frame_time,
            runtime_ms: 0,
            animation,
        }
    }

    pub fn runtime_ms(&self) -> u64 {
        self.runtime_ms
    }

    /// Render and publish the frame for the current tick, then advance the clock.
    /// Returns whether anything was published.
    pub fn tick(&mut self) -> bool {
        let frame = self.animation.render_frame(self.runtime_ms);
        self.runtime_ms += self.frame_time.as_millis() as u64;

        match frame {
            Some(frame) => match self.sink.publish(&self.topic, &frame.encode()) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Failed to publish frame: {}", e);
                    false
                }
            },
            None => false,
        }
    }

    /// Tick every frame time until `shutdown` turns true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.frame_time);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!("Streaming to {} every {:?}", self.topic, self.frame_time);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Streamer stopped after {}ms", self.runtime_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::Solid;
    use crate::calibration::resolve::{Assignment, LightAssignment};
    use crate::calibration::CalibrationReport;
    use crate::frame::Rgb;
    use crate::transport::{MessageBus, Subscriber};
    use parking_lot::Mutex;

    fn controller() -> (Controller, CalibrationDisplay, crossbeam_channel::Sender<CalibrationEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let display = CalibrationDisplay::new();
        let controller = Controller::new(
            Scene::Solid(Solid::new(1, Rgb::new(1, 1, 1))),
            display.clone(),
            rx,
            Duration::from_millis(100),
        );
        (controller, display, tx)
    }

    #[test]
    fn test_status_held_then_idle_resumes() {
        let (mut controller, display, events) = controller();
        assert!(controller.render_frame(0).is_some());

        events.send(CalibrationEvent::Started).expect("Send failed");
        assert_eq!(controller.render_frame(10), None);
        assert_eq!(controller.mode(), ControllerMode::Calibrating);

        display.show_status(&Assignment::new(vec![LightAssignment::unresolved()]));
        events
            .send(CalibrationEvent::Finished(CalibrationOutcome::Done(CalibrationReport::default())))
            .expect("Send failed");

        assert!(controller.render_frame(20).is_some());
        assert_eq!(controller.mode(), ControllerMode::Holding { until_ms: 120 });
        assert_eq!(controller.render_frame(60), None);
        assert_eq!(
            controller.render_frame(120).map(|f| f.pixels),
            Some(vec![Rgb::new(1, 1, 1)])
        );
        assert_eq!(controller.mode(), ControllerMode::Idle);
    }

    #[test]
    fn test_abort_resumes_immediately() {
        let (mut controller, _display, events) = controller();
        events.send(CalibrationEvent::Started).expect("Send failed");
        events
            .send(CalibrationEvent::Finished(CalibrationOutcome::Cancelled))
            .expect("Send failed");

        assert!(controller.render_frame(0).is_some());
        assert_eq!(controller.mode(), ControllerMode::Idle);
    }

    #[test]
    fn test_fade_back_to_idle_after_status() {
        let (controller, display, events) = controller();
        let mut controller = controller.with_transition(Duration::from_millis(100));

        events.send(CalibrationEvent::Started).expect("Send failed");
        display.show_status(&Assignment::new(vec![LightAssignment::resolved(
            crate::calibration::messages::Point::new(0.0, 0.0),
        )]));
        events
            .send(CalibrationEvent::Finished(CalibrationOutcome::Done(CalibrationReport::default())))
            .expect("Send failed");

        let status = controller.render_frame(0).expect("Status frame");
        assert_eq!(status.pixels, vec![Rgb::new(0, 0x20, 0)]);
        assert_eq!(controller.render_frame(50), None);
        assert_eq!(controller.render_frame(100).map(|f| f.pixels), Some(status.pixels));

        let halfway = controller.render_frame(150).expect("Fading frame");
        assert_eq!(halfway.pixels, vec![Rgb::new(1, 0x11, 1)]);
        assert_eq!(
            controller.render_frame(200).map(|f| f.pixels),
            Some(vec![Rgb::new(1, 1, 1)])
        );
    }

    #[test]
    fn test_tick_publishes_encoded_frame() {
        let bus = MessageBus::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        bus.subscribe("frames", Arc::new(move |p: &[u8]| sink.lock().push(p.to_vec())))
            .expect("Subscribe failed");

        let mut streamer = Streamer::new(
            bus.clone(),
            "frames",
            Duration::from_millis(21),
            Solid::new(2, Rgb::new(5, 6, 7)),
        );
        assert!(streamer.tick());
        assert!(streamer.tick());
        assert_eq!(streamer.runtime_ms(), 42);

        let frames = received.lock();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], vec![0, 2, 0, 5, 6, 7, 5, 6, 7]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let bus = MessageBus::new();
        let streamer = Streamer::new(
            bus.clone(),
            "frames",
            Duration::from_millis(20),
            Solid::new(1, Rgb::BLACK),
        );
        let (stop, shutdown) = watch::channel(false);
        let handle = tokio::spawn(streamer.run(shutdown));

        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.send_replace(true);
        handle.await.expect("Streamer panicked");
        assert!(bus.published_count() >= 5);
    }
}
