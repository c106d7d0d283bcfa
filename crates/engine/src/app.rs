//! Application loop tying surface, simulation and presenter together.

use std::fmt;
use std::time::Duration;

use fluidsim_kernel::SimError;

use crate::config::SimulationConfig;
use crate::presenter::{Presenter, PresenterContext};
use crate::simulation::Simulation;
use crate::surface::{DisplaySurface, SurfaceError, SurfaceEvent};

/// Fatal failure of [`FluidSim::run`].
#[derive(Debug)]
pub enum AppError {
    /// The display surface could not be created.
    Surface(SurfaceError),
    /// The simulation failed to start.
    Simulation(SimError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Surface(e) => write!(f, "{e}"),
            AppError::Simulation(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Surface(e) => Some(e),
            AppError::Simulation(e) => Some(e),
        }
    }
}

impl From<SurfaceError> for AppError {
    fn from(e: SurfaceError) -> Self {
        AppError::Surface(e)
    }
}

impl From<SimError> for AppError {
    fn from(e: SimError) -> Self {
        AppError::Simulation(e)
    }
}

/// Totals for a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Frames presented.
    pub frames: u64,
    /// Simulation steps run.
    pub steps: u64,
    /// Simulated time covered.
    pub simulated_time: Duration,
}

/// The application: one simulation shown on one surface.
pub struct FluidSim;

impl FluidSim {
    /// Run `config` until the surface asks to terminate or `max_frames` is
    /// reached.
    ///
    /// The surface is destroyed on every exit path once it has been created.
    pub fn run(
        config: &SimulationConfig,
        surface: &mut dyn DisplaySurface,
        presenter: &mut dyn Presenter,
    ) -> Result<RunSummary, AppError> {
        surface.create_surface(&config.window)?;
        let result = Self::run_on_surface(config, surface, presenter);
        surface.destroy();
        result
    }

    fn run_on_surface(
        config: &SimulationConfig,
        surface: &mut dyn DisplaySurface,
        presenter: &mut dyn Presenter,
    ) -> Result<RunSummary, AppError> {
        let mut ctx = PresenterContext {
            width: config.window.width,
            height: config.window.height,
        };
        presenter.init(&ctx);

        let mut sim = match Simulation::init(config) {
            Ok(sim) => sim,
            Err(e) => {
                presenter.cleanup();
                return Err(e.into());
            }
        };

        let mut frames = 0u64;
        while !surface.should_terminate() {
            let report = sim.main_loop(surface.now());
            presenter.present(&ctx, sim.particle_buffer(), &report);
            surface.present_frame();
            frames += 1;

            for event in surface.poll_input() {
                match event {
                    SurfaceEvent::Resized { width, height } => {
                        ctx = PresenterContext { width, height };
                        presenter.on_resize(&ctx);
                    }
                    SurfaceEvent::CloseRequested => tracing::info!("Close requested"),
                }
            }

            if config.max_frames.is_some_and(|max| frames >= max) {
                break;
            }
        }

        let summary = RunSummary {
            frames,
            steps: sim.steps_taken(),
            simulated_time: sim.simulated_time(),
        };
        presenter.cleanup();
        sim.cleanup();
        Ok(summary)
    }
}
