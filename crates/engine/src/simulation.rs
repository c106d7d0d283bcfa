//! The simulation facade: `init`, `main_loop`, `cleanup`.
//!
//! Owns the particle buffer, the neighbor grid, the bound compute backend and
//! the fixed-timestep clock. Presenters get a read-only view of the buffer
//! between frames.

use std::time::{Duration, Instant};

use fluidsim_kernel::{
    create_backend, BackendSetup, CompiledKernel, ComputeBackend, KernelCompiler, KernelSource, NeighborGrid,
    ParticleBuffer, ParticleView, SimError, StepParams, WgslCompiler, PARTICLE_STRIDE_BYTES,
};

use crate::clock::FixedTimestep;
use crate::config::SimulationConfig;

/// What one `main_loop` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Steps run this frame.
    pub steps: u32,
    /// Total simulated time after this frame.
    pub simulated_time: Duration,
}

/// A running particle simulation.
pub struct Simulation {
    particles: ParticleBuffer,
    grid: NeighborGrid,
    backend: Box<dyn ComputeBackend>,
    kernel: CompiledKernel,
    params: StepParams,
    clock: FixedTimestep,
    seed: u64,
    steps_taken: u64,
    simulated_time: Duration,
    released: bool,
}

impl Simulation {
    /// Build a simulation from `config` with the backend it names and the
    /// bundled update kernel.
    pub fn init(config: &SimulationConfig) -> Result<Self, SimError> {
        config.validate().map_err(SimError::InvalidConfig)?;
        let backend = create_backend(config.backend)?;
        Self::init_with(config, backend, &WgslCompiler, &KernelSource::update())
    }

    /// Build a simulation on an explicit backend and kernel source.
    ///
    /// Order: validate, compile, bind, allocate, upload. Nothing is
    /// constructed if any stage fails.
    pub fn init_with(
        config: &SimulationConfig,
        mut backend: Box<dyn ComputeBackend>,
        compiler: &dyn KernelCompiler,
        source: &KernelSource,
    ) -> Result<Self, SimError> {
        config.validate().map_err(SimError::InvalidConfig)?;

        let kernel = compiler.compile(source)?;

        let model = config.build_force_model();
        let params = StepParams {
            h: config.interaction_radius,
            dt: config.dt(),
            particle_mass: config.particle_mass,
            domain: config.domain,
            walls: config.walls,
        };
        backend.bind(
            &kernel,
            &BackendSetup {
                model: model.clone(),
                particle_count: config.particle_count,
                params,
            },
        )?;

        let seed = config.seed.unwrap_or_else(|| {
            let seed = rand::random();
            tracing::info!(seed, "No seed configured, drew a random one");
            seed
        });
        let particles = ParticleBuffer::initialize(
            config.particle_count,
            &config.domain,
            seed,
            config.initial_velocity_scale,
        )?;
        let grid = NeighborGrid::new(params.h, &config.domain, config.particle_count)?;

        backend.upload(&particles);

        tracing::info!(
            "Simulation '{}' initialized: {} particles, h={}, dt={:.5}s, grid {:?}, model={}, backend={}",
            config.name,
            particles.len(),
            params.h,
            params.dt,
            grid.dims(),
            model.name(),
            backend.name(),
        );

        Ok(Self {
            particles,
            grid,
            backend,
            kernel,
            params,
            clock: FixedTimestep::new(config.steps_per_second, config.max_steps_per_frame),
            seed,
            steps_taken: 0,
            simulated_time: Duration::ZERO,
            released: false,
        })
    }

    /// Advance by however many fixed steps have accrued since the last call.
    ///
    /// The first call only starts the clock. The report counts completed
    /// steps only.
    pub fn main_loop(&mut self, now: Instant) -> FrameReport {
        let owed = self.clock.poll(now);
        let mut steps = 0;
        for _ in 0..owed {
            if !self.step() {
                break;
            }
            steps += 1;
        }
        FrameReport {
            steps,
            simulated_time: self.simulated_time,
        }
    }

    /// Run exactly one fixed step, independent of the clock.
    ///
    /// Returns `false` if the step did not complete: after `cleanup`, or when
    /// the backend could not publish its results to the particle buffer.
    pub fn step(&mut self) -> bool {
        if self.released {
            tracing::warn!("step after cleanup ignored");
            return false;
        }
        self.backend.dispatch(&mut self.particles, &mut self.grid, &self.params);
        if !self.backend.barrier(&mut self.particles) {
            tracing::warn!(
                steps = self.steps_taken,
                "step results not published, particle buffer unchanged"
            );
            return false;
        }

        self.steps_taken += 1;
        self.simulated_time += self.clock.step();
        if self.steps_taken % 100 == 0 {
            tracing::debug!(
                steps = self.steps_taken,
                simulated_s = self.simulated_time.as_secs_f64(),
                "simulation progress"
            );
        }
        true
    }

    /// Release backend, grid and particle storage. Safe to call twice.
    pub fn cleanup(&mut self) {
        if self.released {
            return;
        }
        self.backend.release();
        self.grid.release();
        self.particles.release();
        self.released = true;
        tracing::info!(
            "Simulation finished: {} steps, {:.3}s simulated, {:.3}s dropped by catch-up cap",
            self.steps_taken,
            self.simulated_time.as_secs_f64(),
            self.clock.dropped().as_secs_f64(),
        );
    }

    /// Read-only view of the particles for this frame.
    pub fn particle_buffer(&self) -> ParticleView<'_> {
        ParticleView::new(self.particles.read())
    }

    /// Number of particles.
    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    /// Bytes per particle record.
    pub fn particle_stride_bytes(&self) -> usize {
        PARTICLE_STRIDE_BYTES
    }

    /// Step constants.
    pub fn params(&self) -> &StepParams {
        &self.params
    }

    /// Seed used for the initial particle cloud.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Steps run so far.
    pub fn steps_taken(&self) -> u64 {
        self.steps_taken
    }

    /// Simulated time so far.
    pub fn simulated_time(&self) -> Duration {
        self.simulated_time
    }

    /// Name of the bound backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// The compiled update kernel.
    pub fn kernel(&self) -> &CompiledKernel {
        &self.kernel
    }

    /// Neighbor grid dimensions.
    pub fn grid_dims(&self) -> [u32; 3] {
        self.grid.dims()
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForceModelConfig;
    use fluidsim_kernel::{
        BackendSetup, CompileError, ComputeBackend, CpuBackend, NeighborGrid, ParticleBuffer, SmoothingKernel,
        UPDATE_INTERFACE,
    };

    /// CPU backend whose results never reach the host buffer.
    #[derive(Default)]
    struct LostReadback {
        inner: CpuBackend,
        scratch: Option<ParticleBuffer>,
    }

    impl ComputeBackend for LostReadback {
        fn name(&self) -> &'static str {
            "lost-readback"
        }

        fn bind(&mut self, kernel: &CompiledKernel, setup: &BackendSetup) -> Result<(), SimError> {
            self.inner.bind(kernel, setup)
        }

        fn upload(&mut self, particles: &ParticleBuffer) {
            self.scratch = Some(particles.clone());
        }

        fn dispatch(&mut self, _particles: &mut ParticleBuffer, grid: &mut NeighborGrid, params: &StepParams) {
            if let Some(scratch) = self.scratch.as_mut() {
                self.inner.dispatch(scratch, grid, params);
            }
        }

        fn barrier(&mut self, _particles: &mut ParticleBuffer) -> bool {
            false
        }

        fn release(&mut self) {
            self.inner.release();
        }
    }

    fn quiet_config() -> SimulationConfig {
        SimulationConfig {
            seed: Some(7),
            particle_count: 200,
            force_model: ForceModelConfig::DensityOnly {
                density_kernel: SmoothingKernel::Poly6,
            },
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn init_reports_metadata() {
        let sim = Simulation::init(&quiet_config()).unwrap();
        assert_eq!(sim.particle_count(), 200);
        assert_eq!(sim.particle_stride_bytes(), 48);
        assert_eq!(sim.particle_buffer().as_bytes().len(), 200 * 48);
        assert_eq!(sim.seed(), 7);
        assert_eq!(sim.backend_name(), "cpu");
        assert_eq!(sim.grid_dims(), [10, 10, 10]);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = quiet_config();
        config.interaction_radius = 0.0;
        assert!(matches!(Simulation::init(&config), Err(SimError::InvalidConfig(_))));

        let mut config = quiet_config();
        config.steps_per_second = 2_000_000_000;
        assert!(matches!(Simulation::init(&config), Err(SimError::InvalidConfig(_))));

        let mut config = quiet_config();
        config.domain.max[0] = f32::INFINITY;
        assert!(matches!(Simulation::init(&config), Err(SimError::InvalidConfig(_))));
    }

    #[test]
    fn unpublished_steps_are_not_counted() {
        let mut sim = Simulation::init_with(
            &quiet_config(),
            Box::new(LostReadback::default()),
            &WgslCompiler,
            &KernelSource::update(),
        )
        .unwrap();
        let before = sim.particle_buffer().as_bytes().to_vec();

        assert!(!sim.step());
        let t0 = Instant::now();
        sim.main_loop(t0);
        let report = sim.main_loop(t0 + Duration::from_secs_f64(1.0 / 30.0));

        assert_eq!(report.steps, 0);
        assert_eq!(sim.steps_taken(), 0);
        assert_eq!(sim.simulated_time(), Duration::ZERO);
        assert_eq!(sim.particle_buffer().as_bytes(), &before[..]);
    }

    #[test]
    fn malformed_kernel_constructs_nothing() {
        let source = KernelSource::new("broken.wgsl", "fn broken( {", UPDATE_INTERFACE);
        let result = Simulation::init_with(&quiet_config(), Box::new(CpuBackend::new()), &WgslCompiler, &source);
        match result {
            Err(SimError::Compile(CompileError { label, .. })) => assert_eq!(label, "broken.wgsl"),
            Err(other) => panic!("expected a compile error, got {other}"),
            Ok(_) => panic!("simulation constructed from a malformed kernel"),
        }
    }

    #[test]
    fn main_loop_steps_by_elapsed_time() {
        let mut sim = Simulation::init(&quiet_config()).unwrap();
        let t0 = Instant::now();
        assert_eq!(sim.main_loop(t0).steps, 0);

        let report = sim.main_loop(t0 + Duration::from_secs_f64(1.0 / 30.0));
        assert_eq!(report.steps, 2);
        assert_eq!(sim.steps_taken(), 2);
        assert_eq!(report.simulated_time, sim.simulated_time());
    }

    #[test]
    fn cleanup_is_idempotent() {
        let mut sim = Simulation::init(&quiet_config()).unwrap();
        assert!(sim.step());
        sim.cleanup();
        sim.cleanup();
        assert!(!sim.step());
        assert_eq!(sim.steps_taken(), 1);
        assert_eq!(sim.particle_count(), 0);
    }
}
