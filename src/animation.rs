//! Frame sources
//!
//! Anything that produces frames implements [`Animation`]. The set of
//! scenes the controller can switch between is closed, so it is a plain
//! enum rather than a trait object registry.

use crate::calibration::display::CalibrationDisplay;
use crate::frame::{Frame, Rgb};

/// Produces frames over time
pub trait Animation: Send {
    /// Frame to show at `runtime_ms`, or None to leave the lights as they are
    fn render_frame(&mut self, runtime_ms: u64) -> Option<Frame>;
}

/// Every light the same colour
#[derive(Debug, Clone)]
pub struct Solid {
    light_count: usize,
    color: Rgb,
}

impl Solid {
    pub fn new(light_count: usize, color: Rgb) -> Self {
        Self { light_count, color }
    }
}

impl Animation for Solid {
    fn render_frame(&mut self, _runtime_ms: u64) -> Option<Frame> {
        Some(Frame::filled(self.light_count, self.color))
    }
}

/// A rainbow-coloured head running along the string with a fading tail
#[derive(Debug, Clone)]
pub struct GradientTrail {
    light_count: usize,
    /// Time for the head to travel the whole string
    period_ms: u64,
    trail_length: usize,
    brightness: f64,
}

impl GradientTrail {
    pub fn new(light_count: usize, period_ms: u64, trail_length: usize, brightness: f64) -> Self {
        Self {
            light_count,
            period_ms: period_ms.max(1),
            trail_length: trail_length.max(1),
            brightness: brightness.clamp(0.0, 1.0),
        }
    }
}

impl Animation for GradientTrail {
    fn render_frame(&mut self, runtime_ms: u64) -> Option<Frame> {
        let n = self.light_count;
        if n == 0 {
            return Some(Frame::new(0));
        }

        let phase = (runtime_ms % self.period_ms) as f64 / self.period_ms as f64;
        let head = ((phase * n as f64) as usize).min(n - 1);

        let pixels = (0..n)
            .map(|i| {
                let behind = (head + n - i) % n;
                if behind >= self.trail_length {
                    return Rgb::BLACK;
                }
                let fade = 1.0 - behind as f64 / self.trail_length as f64;
                let hue = (i as f64 / n as f64 + phase) * 360.0;
                Rgb::from_hsv(hue, 1.0, self.brightness * fade)
            })
            .collect();

        Some(Frame { ack_id: 0, pixels })
    }
}

/// Scenes the controller can show
pub enum Scene {
    Solid(Solid),
    GradientTrail(GradientTrail),
    Calibration(CalibrationDisplay),
}

impl Scene {
    /// Scene shown while no calibration is active
    pub fn default_idle(light_count: usize) -> Self {
        Scene::GradientTrail(GradientTrail::new(light_count, 8_000, 20, 0.25))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scene::Solid(_) => "solid",
            Scene::GradientTrail(_) => "gradient-trail",
            Scene::Calibration(_) => "calibration",
        }
    }
}

impl Animation for Scene {
    fn render_frame(&mut self, runtime_ms: u64) -> Option<Frame> {
        match self {
            Scene::Solid(scene) => scene.render_frame(runtime_ms),
            Scene::GradientTrail(scene) => scene.render_frame(runtime_ms),
            Scene::Calibration(scene) => scene.render_frame(runtime_ms),
        }
    }
}
