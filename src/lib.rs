//! ledtx: LED string streaming and camera-based position calibration
//!
//! Frames are streamed to a display controller over a publish/subscribe
//! transport. On request, a calibration run lights the string in structured
//! patterns, collects the bright spots a camera client reports for each one
//! and works out where every light sits in the camera image.

pub mod animation;
pub mod calibration;
pub mod config;
pub mod error;
pub mod frame;
pub mod logging;
pub mod simulator;
pub mod storage;
pub mod streamer;
pub mod transport;

pub use animation::{Animation, Scene};
pub use calibration::{CalibrationEvent, CalibrationOutcome, CalibrationPhase, CalibrationReport, Calibrator};
pub use config::Config;
pub use error::{CalibrationError, CalibrationResult};
pub use frame::{Frame, Rgb};
pub use transport::{FrameSink, MessageBus, Subscriber};
