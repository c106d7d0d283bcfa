//! Repeatability and the stationary-cloud check on the CPU backend.

use std::sync::Arc;

use fluidsim_kernel::{
    BackendSetup, ComputeBackend, CpuBackend, DensityOnly, DomainBounds, ForceModel, KernelCompiler,
    KernelSource, NeighborGrid, Particle, ParticleBuffer, SmoothingKernel, Sph, StepParams, Walls, WgslCompiler,
};

fn run(model: Arc<dyn ForceModel>, initial: &ParticleBuffer, params: &StepParams, steps: usize) -> Vec<Particle> {
    let kernel = WgslCompiler.compile(&KernelSource::update()).unwrap();
    let mut backend = CpuBackend::new();
    backend
        .bind(
            &kernel,
            &BackendSetup {
                model,
                particle_count: initial.len(),
                params: *params,
            },
        )
        .unwrap();

    let mut particles = initial.clone();
    let mut grid = NeighborGrid::new(params.h, &params.domain, particles.len()).unwrap();
    backend.upload(&particles);
    for _ in 0..steps {
        backend.dispatch(&mut particles, &mut grid, params);
        assert!(backend.barrier(&mut particles));
    }
    backend.release();
    particles.read().to_vec()
}

#[test]
fn same_input_same_bits() {
    let bounds = DomainBounds::default();
    let params = StepParams {
        h: 0.2,
        dt: 1.0 / 60.0,
        particle_mass: 1.0,
        domain: bounds,
        walls: Some(Walls::default()),
    };
    let model: Arc<dyn ForceModel> = Arc::new(Sph {
        density_kernel: SmoothingKernel::WendlandC2,
        rest_density: 20.0,
        stiffness: 0.5,
        viscosity: 0.05,
        gravity: [0.0, -9.81, 0.0],
    });
    let initial = ParticleBuffer::initialize(800, &bounds, 1234, 0.1).unwrap();

    let a = run(model.clone(), &initial, &params, 10);
    let b = run(model, &initial, &params, 10);
    let bytes_a: &[u8] = bytemuck::cast_slice(&a);
    let bytes_b: &[u8] = bytemuck::cast_slice(&b);
    assert_eq!(bytes_a, bytes_b);
}

#[test]
fn stationary_cloud_stays_put() {
    let bounds = DomainBounds::default();
    let params = StepParams {
        h: 0.2,
        dt: 1.0 / 60.0,
        particle_mass: 1.0,
        domain: bounds,
        walls: Some(Walls::default()),
    };
    let initial = ParticleBuffer::initialize(1000, &bounds, 99, 0.0).unwrap();

    let out = run(Arc::new(DensityOnly::default()), &initial, &params, 5);
    for (before, after) in initial.read().iter().zip(&out) {
        assert_eq!(before.pos(), after.pos());
        assert_eq!(after.vel(), [0.0; 3]);
        assert!(after.density() > 0.0);
    }
}

#[test]
fn walls_keep_particles_inside() {
    let bounds = DomainBounds { min: [0.0; 3], max: [1.0; 3] };
    let params = StepParams {
        h: 0.1,
        dt: 1.0 / 60.0,
        particle_mass: 1.0,
        domain: bounds,
        walls: Some(Walls { restitution: 0.5 }),
    };
    let model: Arc<dyn ForceModel> = Arc::new(Sph {
        density_kernel: SmoothingKernel::Poly6,
        rest_density: 1000.0,
        stiffness: 0.01,
        viscosity: 0.0,
        gravity: [0.0, -9.81, 0.0],
    });
    let initial = ParticleBuffer::initialize(300, &bounds, 7, 2.0).unwrap();

    let out = run(model, &initial, &params, 60);
    assert!(out.iter().all(|p| bounds.contains(p.pos())));
}
