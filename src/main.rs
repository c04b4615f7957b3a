use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

use ledtx::animation::Scene;
use ledtx::calibration::Calibrator;
use ledtx::config::Config;
use ledtx::logging;
use ledtx::simulator::{FaultPlan, Simulator};
use ledtx::streamer::{Controller, Streamer};
use ledtx::transport::{FrameSink, MessageBus};

/// Stream frames to an LED string and calibrate light positions on request
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "ledtx.toml")]
    config: PathBuf,

    /// Attach a simulated display controller and camera, then run one calibration
    #[arg(long, default_value_t = false)]
    simulate: bool,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = if args.config.exists() {
        Config::load(&args.config)?
    } else {
        Config::default()
    };
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
        config.validate()?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    logging::init(&config.logging)?;

    if !args.config.exists() {
        tracing::warn!("Config file {:?} not found, using defaults", args.config);
    }
    tracing::info!(
        "Streaming {} lights, artifacts in {:?}",
        config.stream.light_count,
        config.calibration.output_directory
    );

    let bus = MessageBus::new();
    let sink: Arc<dyn FrameSink> = bus.clone();
    let (events_tx, events_rx) = crossbeam_channel::unbounded();

    let calibrator = Calibrator::new(&config, Arc::clone(&sink), events_tx)
        .context("Failed to create calibrator")?;
    calibrator.subscribe(bus.as_ref())?;

    let controller = Controller::new(
        Scene::default_idle(config.stream.light_count),
        calibrator.display(),
        events_rx,
        config.stream.status_hold(),
    )
    .with_transition(config.stream.transition());
    let streamer = Streamer::new(
        Arc::clone(&sink),
        config.topics.stream.clone(),
        config.stream.frame_time(),
        controller,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let streaming = tokio::spawn(streamer.run(shutdown_rx));

    let _simulator = if args.simulate {
        let simulator = Simulator::attach(
            bus.clone(),
            config.topics.clone(),
            Simulator::ring_layout(config.stream.light_count, 400.0),
            FaultPlan::default(),
        )?;
        simulator.request_calibration()?;
        Some(simulator)
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");

    calibrator.cancel();
    shutdown_tx.send_replace(true);
    streaming.await.context("Streamer task failed")?;
    Ok(())
}
