//! Artifact persistence tests

pub mod artifacts_test;
