//! Calibration run tests
//!
//! Full runs against the simulator: resolution, retries, give-up,
//! cancellation and start handling.

pub mod end_to_end_test;
pub mod protocol_test;
