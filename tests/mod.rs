//! Integration tests for ledtx
//!
//! Calibration runs are driven end to end against the simulated display
//! controller and camera on an in-process bus.

pub mod calibration;
pub mod storage;
