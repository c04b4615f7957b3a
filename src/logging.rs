//! Log subscriber setup

use anyhow::Result;

use crate::config::LoggingConfig;

/// Install the global `tracing` subscriber.
///
/// Calling this more than once is harmless; later calls leave the first
/// subscriber in place.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let level = config.max_level()?;

    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(config.with_target)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("Logging initialised at level {}", level);
    }
    Ok(())
}
