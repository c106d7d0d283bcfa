//! Simulation Engine
//!
//! Everything above the compute kernel:
//! - JSON configuration and validation
//! - Fixed-timestep clock with a catch-up cap
//! - The `Simulation` facade (`init`, `main_loop`, `cleanup`)
//! - Display surface and presenter seams, with headless implementations
//! - The `FluidSim` application loop

#![warn(missing_docs)]

pub mod app;
pub mod clock;
pub mod config;
pub mod presenter;
pub mod simulation;
pub mod surface;

pub use app::{AppError, FluidSim, RunSummary};
pub use clock::FixedTimestep;
pub use config::{ForceModelConfig, SimulationConfig, WindowConfig};
pub use presenter::{FrameStats, Presenter, PresenterContext, StatsPresenter};
pub use simulation::{FrameReport, Simulation};
pub use surface::{DisplaySurface, HeadlessSurface, SurfaceError, SurfaceEvent};
