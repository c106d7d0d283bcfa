//! Compute backends: where the update kernel actually runs.
//!
//! A backend is bound once to a compiled kernel, then driven with
//! `dispatch` / `barrier` pairs. `dispatch` may return before the step has
//! finished; the host particle buffer is only guaranteed to hold the new
//! state after `barrier` returns.

use std::sync::Arc;

use crate::compiler::CompiledKernel;
use crate::error::SimError;
use crate::force::ForceModel;
use crate::neighbor::NeighborGrid;
use crate::particle::ParticleBuffer;
use crate::update::{StepParams, UpdateKernel};

/// Everything a backend needs to size its resources at bind time.
#[derive(Debug, Clone)]
pub struct BackendSetup {
    /// Numeric policy evaluated per particle.
    pub model: Arc<dyn ForceModel>,
    /// Number of particles, fixed for the run.
    pub particle_count: usize,
    /// Constants for every step.
    pub params: StepParams,
}

/// A place to run the update kernel.
pub trait ComputeBackend: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Allocate resources for `kernel` and `setup`.
    fn bind(&mut self, kernel: &CompiledKernel, setup: &BackendSetup) -> Result<(), SimError>;

    /// Copy the initial particle state to wherever the kernel reads it.
    fn upload(&mut self, particles: &ParticleBuffer);

    /// Launch one step.
    ///
    /// `grid` is the host-side index; backends that build their own grid on
    /// the device may ignore it.
    fn dispatch(&mut self, particles: &mut ParticleBuffer, grid: &mut NeighborGrid, params: &StepParams);

    /// Block until the last dispatch has finished and its results are
    /// visible in `particles`.
    ///
    /// Returns `false` if the results could not be made visible; `particles`
    /// then still holds the previous state and the step must not be counted.
    fn barrier(&mut self, particles: &mut ParticleBuffer) -> bool;

    /// Free everything allocated by `bind`.
    fn release(&mut self);
}

/// Rayon backend. Lanes are chunked by the kernel's declared workgroup size.
#[derive(Default)]
pub struct CpuBackend {
    kernel: Option<UpdateKernel>,
}

impl CpuBackend {
    /// Unbound backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn bind(&mut self, kernel: &CompiledKernel, setup: &BackendSetup) -> Result<(), SimError> {
        let lanes = kernel
            .workgroup_size("integrate")
            .map(|size| size[0] as usize)
            .ok_or_else(|| SimError::Initialization(format!("kernel `{}` has no integrate pass", kernel.label())))?;

        self.kernel = Some(UpdateKernel::new(setup.model.clone(), lanes, setup.particle_count)?);
        tracing::info!(
            lanes,
            threads = rayon::current_num_threads(),
            model = setup.model.name(),
            "CPU backend bound"
        );
        Ok(())
    }

    fn upload(&mut self, _particles: &ParticleBuffer) {
        // The kernel reads the host buffer directly.
    }

    fn dispatch(&mut self, particles: &mut ParticleBuffer, grid: &mut NeighborGrid, params: &StepParams) {
        debug_assert!(self.kernel.is_some(), "dispatch before bind");
        let Some(kernel) = self.kernel.as_mut() else {
            return;
        };
        grid.rebuild(particles.read());
        kernel.run(particles, grid, params);
    }

    fn barrier(&mut self, _particles: &mut ParticleBuffer) -> bool {
        // Rayon joins every lane before `run` returns.
        true
    }

    fn release(&mut self) {
        if let Some(mut kernel) = self.kernel.take() {
            kernel.release();
        }
    }
}

/// Which backend to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    /// Always the rayon backend.
    #[default]
    Cpu,
    /// The wgpu backend; fails if the crate was built without `gpu` or no
    /// adapter is available.
    Gpu,
    /// GPU when available, otherwise CPU.
    Auto,
}

/// Create a backend of the requested type.
pub fn create_backend(backend_type: BackendType) -> Result<Box<dyn ComputeBackend>, SimError> {
    match backend_type {
        BackendType::Cpu => Ok(Box::new(CpuBackend::new())),
        #[cfg(feature = "gpu")]
        BackendType::Gpu => {
            let backend = crate::gpu::GpuBackend::new()?;
            Ok(Box::new(backend))
        }
        #[cfg(not(feature = "gpu"))]
        BackendType::Gpu => Err(SimError::Initialization(
            "GPU backend requested but the `gpu` feature is not enabled".into(),
        )),
        #[cfg(feature = "gpu")]
        BackendType::Auto => match crate::gpu::GpuBackend::new() {
            Ok(backend) => Ok(Box::new(backend)),
            Err(e) => {
                tracing::warn!("GPU backend unavailable ({e}), falling back to CPU");
                Ok(Box::new(CpuBackend::new()))
            }
        },
        #[cfg(not(feature = "gpu"))]
        BackendType::Auto => {
            tracing::warn!("built without the `gpu` feature, using the CPU backend");
            Ok(Box::new(CpuBackend::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{KernelCompiler, KernelSource, WgslCompiler};
    use crate::force::DensityOnly;
    use crate::particle::DomainBounds;

    #[test]
    fn cpu_backend_steps_bound_kernel() {
        let kernel = WgslCompiler.compile(&KernelSource::update()).unwrap();
        let bounds = DomainBounds::default();
        let params = StepParams {
            h: 0.2,
            dt: 1.0 / 60.0,
            particle_mass: 1.0,
            domain: bounds,
            walls: None,
        };
        let mut particles = ParticleBuffer::initialize(100, &bounds, 1, 0.1).unwrap();
        let before = particles.read().to_vec();
        let mut grid = NeighborGrid::new(params.h, &bounds, particles.len()).unwrap();

        let mut backend = CpuBackend::new();
        let setup = BackendSetup {
            model: Arc::new(DensityOnly::default()),
            particle_count: particles.len(),
            params,
        };
        backend.bind(&kernel, &setup).unwrap();
        backend.upload(&particles);
        backend.dispatch(&mut particles, &mut grid, &params);
        assert!(backend.barrier(&mut particles));
        backend.release();

        assert_eq!(particles.len(), 100);
        assert_ne!(particles.read(), &before[..]);
        assert!(particles.read().iter().all(|p| p.density() > 0.0));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "dispatch before bind")]
    fn dispatch_before_bind_is_rejected() {
        let bounds = DomainBounds::default();
        let params = StepParams {
            h: 0.2,
            dt: 1.0 / 60.0,
            particle_mass: 1.0,
            domain: bounds,
            walls: None,
        };
        let mut particles = ParticleBuffer::initialize(4, &bounds, 1, 0.1).unwrap();
        let mut grid = NeighborGrid::new(params.h, &bounds, particles.len()).unwrap();
        CpuBackend::new().dispatch(&mut particles, &mut grid, &params);
    }

    #[test]
    fn cpu_backend_type_always_succeeds() {
        let backend = create_backend(BackendType::Cpu).unwrap();
        assert_eq!(backend.name(), "cpu");
    }

    #[test]
    fn backend_type_config_names() {
        let parsed: Vec<BackendType> = serde_json::from_str(r#"["cpu", "gpu", "auto"]"#).unwrap();
        assert_eq!(parsed, [BackendType::Cpu, BackendType::Gpu, BackendType::Auto]);
        assert!(serde_json::from_str::<BackendType>(r#""Cpu""#).is_err());
    }

    #[cfg(not(feature = "gpu"))]
    #[test]
    fn gpu_without_feature_is_an_init_error() {
        assert!(matches!(create_backend(BackendType::Gpu), Err(SimError::Initialization(_))));
        assert_eq!(create_backend(BackendType::Auto).unwrap().name(), "cpu");
    }
}
