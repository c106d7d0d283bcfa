//! Step throughput at increasing particle counts.
//!
//! Run with: cargo bench -p fluidsim-kernel --bench grid_scaling
//! Add `--features gpu` to include the wgpu backend.

use std::sync::Arc;
use std::time::Instant;

use fluidsim_kernel::{
    create_backend, BackendSetup, BackendType, DomainBounds, ForceModel, KernelCompiler, KernelSource,
    NeighborGrid, ParticleBuffer, SmoothingKernel, Sph, StepParams, Walls, WgslCompiler,
};

fn bench(backend_type: BackendType, n: usize, steps: usize) -> Option<(f64, &'static str)> {
    let bounds = DomainBounds::default();
    // Keep ~30 particles per h-sphere as n grows.
    let h = (8.0 * 30.0 / (n as f32 * 4.19)).cbrt();
    let params = StepParams {
        h,
        dt: 1.0 / 60.0,
        particle_mass: 1.0,
        domain: bounds,
        walls: Some(Walls::default()),
    };
    let model: Arc<dyn ForceModel> = Arc::new(Sph {
        density_kernel: SmoothingKernel::Poly6,
        rest_density: n as f32 / 8.0,
        stiffness: 0.1,
        viscosity: 0.01,
        gravity: [0.0, -9.81, 0.0],
    });

    let kernel = WgslCompiler.compile(&KernelSource::update()).ok()?;
    let mut backend = create_backend(backend_type).ok()?;
    backend
        .bind(
            &kernel,
            &BackendSetup {
                model,
                particle_count: n,
                params,
            },
        )
        .ok()?;

    let mut particles = ParticleBuffer::initialize(n, &bounds, 1, 0.1).ok()?;
    let mut grid = NeighborGrid::new(h, &bounds, n).ok()?;
    backend.upload(&particles);

    // Warmup
    for _ in 0..2 {
        backend.dispatch(&mut particles, &mut grid, &params);
        backend.barrier(&mut particles);
    }

    let start = Instant::now();
    for _ in 0..steps {
        backend.dispatch(&mut particles, &mut grid, &params);
        backend.barrier(&mut particles);
    }
    let elapsed = start.elapsed().as_secs_f64();
    let name = backend.name();
    backend.release();
    Some((elapsed, name))
}

fn main() {
    println!("=== Step Scaling ===\n");

    let configs = [(1_000, 50), (8_000, 20), (27_000, 10), (64_000, 5)];
    let backends = if cfg!(feature = "gpu") {
        vec![BackendType::Cpu, BackendType::Gpu]
    } else {
        vec![BackendType::Cpu]
    };

    println!(
        "{:>8} {:>10} {:>8} {:>10} {:>12} {:>12}",
        "Backend", "Particles", "Steps", "Time (s)", "steps/s", "ms/step"
    );

    for backend_type in backends {
        for &(n, steps) in &configs {
            match bench(backend_type, n, steps) {
                Some((elapsed, name)) => println!(
                    "{:>8} {:>10} {:>8} {:>10.3} {:>12.1} {:>12.2}",
                    name,
                    n,
                    steps,
                    elapsed,
                    steps as f64 / elapsed,
                    elapsed * 1000.0 / steps as f64
                ),
                None => println!("{:>8} {:>10} unavailable", format!("{backend_type:?}"), n),
            }
        }
    }
}
