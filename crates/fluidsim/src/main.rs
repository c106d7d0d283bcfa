//! Headless Fluid Simulator
//!
//! Runs a configured simulation on a headless surface and logs per-frame
//! statistics. Frames advance a simulated clock, so a run of `max_frames`
//! frames covers the same simulated time on any machine.
//!
//! Usage: `fluidsim [config.json]`. The path may also come from
//! `FLUIDSIM_CONFIG`; without either, built-in defaults are used.

use std::time::Duration;

use anyhow::{Context, Result};
use fluidsim_engine::{FluidSim, HeadlessSurface, SimulationConfig, StatsPresenter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fluidsim=info,fluidsim_engine=info,fluidsim_kernel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run() {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = load_config()?;
    tracing::info!(
        "Starting '{}': {} particles, backend {:?}",
        config.name,
        config.particle_count,
        config.backend
    );

    if config.max_frames.is_none() {
        tracing::info!("No max_frames set, running until interrupted");
    }

    // One frame per simulation step, run as fast as the backend allows.
    let frame_interval = Duration::from_secs(1) / config.steps_per_second.max(1);
    let mut surface = HeadlessSurface::new(config.max_frames).with_frame_interval(frame_interval);
    let mut presenter = StatsPresenter::default();
    let summary = FluidSim::run(&config, &mut surface, &mut presenter).context("simulation run failed")?;

    tracing::info!(
        "Done: {} frames, {} steps, {:.3}s simulated",
        summary.frames,
        summary.steps,
        summary.simulated_time.as_secs_f64()
    );
    Ok(())
}

fn load_config() -> Result<SimulationConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("FLUIDSIM_CONFIG").ok());

    match path {
        Some(path) => {
            tracing::info!("Loading config from {}", path);
            SimulationConfig::load(&path)
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("could not load {path}"))
        }
        None => {
            tracing::info!("No config given, using defaults");
            Ok(SimulationConfig::default())
        }
    }
}
