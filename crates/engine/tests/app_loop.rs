//! Application loop on a headless surface
//!
//! Drives `FluidSim::run` with a deterministic frame clock and checks frame
//! and step accounting, resize propagation and surface cleanup on failure.

use std::time::Duration;

use fluidsim_engine::{
    DisplaySurface, FluidSim, ForceModelConfig, HeadlessSurface, Presenter, PresenterContext, SimulationConfig,
    StatsPresenter, SurfaceEvent,
};
use fluidsim_kernel::SmoothingKernel;

fn small_config() -> SimulationConfig {
    SimulationConfig {
        name: "app-loop".to_string(),
        particle_count: 300,
        seed: Some(3),
        force_model: ForceModelConfig::DensityOnly {
            density_kernel: SmoothingKernel::Poly6,
        },
        ..SimulationConfig::default()
    }
}

#[test]
fn bounded_run_counts_frames_and_steps() {
    let mut config = small_config();
    config.max_frames = Some(5);

    // Two 60 Hz steps accrue per 30 Hz frame; the first frame only starts the clock.
    let mut surface = HeadlessSurface::new(None).with_frame_interval(Duration::from_secs_f64(1.0 / 30.0));
    let mut presenter = StatsPresenter::new(1);

    let summary = FluidSim::run(&config, &mut surface, &mut presenter).unwrap();
    assert_eq!(summary.frames, 5);
    assert_eq!(summary.steps, 8);
    assert_eq!(presenter.frames(), 5);
    assert!(presenter.last_stats().unwrap().mean_density > 0.0);
    assert!(!surface.is_open());
}

#[test]
fn surface_bound_stops_the_loop() {
    let config = small_config();
    let mut surface = HeadlessSurface::new(Some(3)).with_frame_interval(Duration::from_millis(10));
    let mut presenter = StatsPresenter::default();

    let summary = FluidSim::run(&config, &mut surface, &mut presenter).unwrap();
    assert_eq!(summary.frames, 3);
    assert_eq!(surface.frames(), 3);
}

#[test]
fn resize_and_close_events_reach_the_loop() {
    let config = small_config();
    let mut surface = HeadlessSurface::new(Some(100));
    surface.push_event(SurfaceEvent::Resized { width: 1024, height: 512 });
    surface.push_event(SurfaceEvent::CloseRequested);
    let mut presenter = StatsPresenter::default();

    let summary = FluidSim::run(&config, &mut surface, &mut presenter).unwrap();
    assert_eq!(summary.frames, 1);
    assert_eq!(
        presenter.viewport(),
        Some(PresenterContext {
            width: 1024,
            height: 512
        })
    );
}

/// Records the order of presenter callbacks.
#[derive(Default)]
struct RecordingPresenter {
    calls: Vec<&'static str>,
    bytes_seen: Vec<usize>,
}

impl Presenter for RecordingPresenter {
    fn init(&mut self, _ctx: &PresenterContext) {
        self.calls.push("init");
    }

    fn present(
        &mut self,
        _ctx: &PresenterContext,
        particles: fluidsim_kernel::ParticleView<'_>,
        _report: &fluidsim_engine::FrameReport,
    ) {
        self.calls.push("present");
        self.bytes_seen.push(particles.as_bytes().len());
    }

    fn on_resize(&mut self, _ctx: &PresenterContext) {
        self.calls.push("resize");
    }

    fn cleanup(&mut self) {
        self.calls.push("cleanup");
    }
}

#[test]
fn presenter_sees_whole_buffer_each_frame() {
    let config = small_config();
    let mut surface = HeadlessSurface::new(Some(2));
    let mut presenter = RecordingPresenter::default();

    FluidSim::run(&config, &mut surface, &mut presenter).unwrap();
    assert_eq!(presenter.calls, ["init", "present", "present", "cleanup"]);
    assert_eq!(presenter.bytes_seen, [300 * 48, 300 * 48]);
}

#[test]
fn failed_simulation_init_still_destroys_surface() {
    let mut config = small_config();
    config.particle_mass = 0.0;

    let mut surface = HeadlessSurface::new(Some(2));
    let mut presenter = RecordingPresenter::default();

    let err = FluidSim::run(&config, &mut surface, &mut presenter).unwrap_err();
    assert!(err.to_string().contains("invalid configuration"));
    assert!(!surface.is_open());
    assert_eq!(surface.frames(), 0);
    assert_eq!(presenter.calls, ["init", "cleanup"]);
}

#[test]
fn surface_creation_failure_runs_nothing() {
    let mut config = small_config();
    config.window.height = 0;

    let mut surface = HeadlessSurface::new(Some(2));
    let mut presenter = RecordingPresenter::default();

    assert!(FluidSim::run(&config, &mut surface, &mut presenter).is_err());
    assert!(presenter.calls.is_empty());
    assert!(!surface.is_open());
    assert!(!surface.should_terminate());
}
