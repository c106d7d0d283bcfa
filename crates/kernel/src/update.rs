//! The per-particle update: density pass, then force + integration pass.
//!
//! Both passes read only the pre-step snapshot (and the density pass output);
//! results go to a separate output array that is swapped into the particle
//! buffer once every lane has finished. Work is split into chunks of the
//! compiled kernel's workgroup size so the CPU lanes mirror device dispatch.

use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{try_alloc, SimError};
use crate::force::{ForceModel, PairTerms};
use crate::neighbor::NeighborGrid;
use crate::particle::{DomainBounds, Particle, ParticleBuffer};

/// Reflective domain walls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Walls {
    /// Fraction of the outward normal velocity kept after a bounce, in [0, 1].
    pub restitution: f32,
}

impl Default for Walls {
    fn default() -> Self {
        Self { restitution: 0.2 }
    }
}

/// Constants for one fixed step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepParams {
    /// Interaction radius.
    pub h: f32,
    /// Fixed timestep (seconds). Never the frame delta.
    pub dt: f32,
    /// Mass shared by all particles.
    pub particle_mass: f32,
    /// Domain used for wall handling.
    pub domain: DomainBounds,
    /// Walls, or `None` to let particles leave the domain.
    pub walls: Option<Walls>,
}

/// Output of the density pass for one particle.
#[derive(Debug, Clone, Copy, Default)]
struct Fields {
    density: f32,
    pressure: f32,
    neighbors: u32,
}

/// CPU implementation of the update kernel.
pub struct UpdateKernel {
    model: Arc<dyn ForceModel>,
    lanes: usize,
    fields: Vec<Fields>,
    next: Vec<Particle>,
}

impl UpdateKernel {
    /// Allocate scratch for `particle_count` particles, running `lanes`
    /// particles per parallel chunk.
    pub fn new(model: Arc<dyn ForceModel>, lanes: usize, particle_count: usize) -> Result<Self, SimError> {
        let mut fields = Vec::new();
        let mut next = Vec::new();
        try_alloc(&mut fields, particle_count, "density scratch")?;
        try_alloc(&mut next, particle_count, "particle output buffer")?;
        fields.resize(particle_count, Fields::default());
        next.resize(particle_count, Particle::default());
        Ok(Self {
            model,
            lanes: lanes.max(1),
            fields,
            next,
        })
    }

    /// The force model being evaluated.
    pub fn model(&self) -> &dyn ForceModel {
        self.model.as_ref()
    }

    /// Particles per parallel chunk.
    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// Advance `buffer` by one step of `params.dt`.
    ///
    /// `grid` must have been rebuilt from the current contents of `buffer`.
    pub fn run(&mut self, buffer: &mut ParticleBuffer, grid: &NeighborGrid, params: &StepParams) {
        let snapshot = buffer.read();
        let n = snapshot.len();
        self.fields.resize(n, Fields::default());
        self.next.resize(n, Particle::default());

        let model = self.model.as_ref();
        let lanes = self.lanes;

        // --- 1. Density + pressure ---
        self.fields
            .par_chunks_mut(lanes)
            .enumerate()
            .for_each(|(group, chunk)| {
                let base = group * lanes;
                for (k, f) in chunk.iter_mut().enumerate() {
                    *f = density_at(model, snapshot, grid, base + k, params);
                }
            });

        // --- 2. Forces + integration into the output array ---
        let fields = &self.fields;
        self.next
            .par_chunks_mut(lanes)
            .enumerate()
            .for_each(|(group, chunk)| {
                let base = group * lanes;
                for (k, out) in chunk.iter_mut().enumerate() {
                    *out = integrate_one(model, snapshot, fields, grid, base + k, params);
                }
            });

        // --- 3. Publish ---
        buffer.swap_in(&mut self.next);
    }

    /// Free scratch storage.
    pub fn release(&mut self) {
        self.fields = Vec::new();
        self.next = Vec::new();
    }
}

fn density_at(
    model: &dyn ForceModel,
    snapshot: &[Particle],
    grid: &NeighborGrid,
    i: usize,
    params: &StepParams,
) -> Fields {
    let h = params.h;
    let mass = params.particle_mass;
    let kernel = model.density_kernel();
    let p = snapshot[i].pos();

    // Self-contribution
    let mut density = mass * kernel.value(0.0, h);
    let mut neighbors = 0u32;
    for j in grid.neighbors_within(snapshot, i, h) {
        density += mass * kernel.value(distance(p, snapshot[j].pos()), h);
        neighbors += 1;
    }

    Fields {
        density,
        pressure: model.pressure(density),
        neighbors,
    }
}

fn integrate_one(
    model: &dyn ForceModel,
    snapshot: &[Particle],
    fields: &[Fields],
    grid: &NeighborGrid,
    i: usize,
    params: &StepParams,
) -> Particle {
    let me = &snapshot[i];
    let fi = fields[i];
    let p = me.pos();
    let v = me.vel();

    let mut accel = model.external_acceleration();
    if model.interacts() {
        for j in grid.neighbors_within(snapshot, i, params.h) {
            let other = &snapshot[j];
            let fj = fields[j];
            let q = other.pos();
            let offset = [p[0] - q[0], p[1] - q[1], p[2] - q[2]];
            let pair = PairTerms {
                offset,
                r: norm(offset),
                vel_i: v,
                vel_j: other.vel(),
                density_i: fi.density,
                density_j: fj.density,
                pressure_i: fi.pressure,
                pressure_j: fj.pressure,
                mass: params.particle_mass,
            };
            let a = model.pair_acceleration(&pair, params.h);
            accel[0] += a[0];
            accel[1] += a[1];
            accel[2] += a[2];
        }
    }

    // Symplectic Euler with the fixed step.
    let dt = params.dt;
    let mut vel = [v[0] + accel[0] * dt, v[1] + accel[1] * dt, v[2] + accel[2] * dt];
    let mut pos = [p[0] + vel[0] * dt, p[1] + vel[1] * dt, p[2] + vel[2] * dt];

    if let Some(walls) = params.walls {
        reflect_at_walls(&mut pos, &mut vel, &params.domain, walls.restitution);
    }

    Particle {
        position: [pos[0], pos[1], pos[2], me.position[3]],
        velocity: [vel[0], vel[1], vel[2], 0.0],
        properties: [fi.density, fi.pressure, fi.neighbors as f32, me.properties[3]],
    }
}

/// Clamp to the domain and damp the outward velocity component.
fn reflect_at_walls(pos: &mut [f32; 3], vel: &mut [f32; 3], domain: &DomainBounds, restitution: f32) {
    for k in 0..3 {
        if pos[k] < domain.min[k] {
            pos[k] = domain.min[k];
            if vel[k] < 0.0 {
                vel[k] = -restitution * vel[k];
            }
        } else if pos[k] > domain.max[k] {
            pos[k] = domain.max[k];
            if vel[k] > 0.0 {
                vel[k] = -restitution * vel[k];
            }
        }
    }
}

#[inline]
fn norm(d: [f32; 3]) -> f32 {
    (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
}

#[inline]
fn distance(a: [f32; 3], b: [f32; 3]) -> f32 {
    norm([a[0] - b[0], a[1] - b[1], a[2] - b[2]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::force::{DensityOnly, Sph};
    use crate::smoothing::{poly6, SmoothingKernel};

    fn params(h: f32, walls: Option<Walls>) -> StepParams {
        StepParams {
            h,
            dt: 1.0 / 60.0,
            particle_mass: 1.0,
            domain: DomainBounds { min: [0.0; 3], max: [1.0; 3] },
            walls,
        }
    }

    fn step(model: Arc<dyn ForceModel>, particles: Vec<Particle>, params: &StepParams) -> Vec<Particle> {
        let mut buffer = ParticleBuffer::from_particles(particles);
        let mut grid = NeighborGrid::new(params.h, &params.domain, buffer.len()).unwrap();
        let mut kernel = UpdateKernel::new(model, 4, buffer.len()).unwrap();
        grid.rebuild(buffer.read());
        kernel.run(&mut buffer, &grid, params);
        buffer.read().to_vec()
    }

    #[test]
    fn isolated_particle_has_self_density() {
        let p = params(0.2, None);
        let out = step(Arc::new(DensityOnly::default()), vec![Particle::at([0.5; 3])], &p);
        assert!((out[0].density() - poly6(0.0, 0.2)).abs() < 1e-3);
        assert_eq!(out[0].neighbor_count(), 0);
    }

    #[test]
    fn density_counts_only_neighbors_within_h() {
        let p = params(0.2, None);
        let ps = vec![
            Particle::at([0.5, 0.5, 0.5]),
            Particle::at([0.6, 0.5, 0.5]),
            Particle::at([0.5, 0.75, 0.5]), // same 3x3x3 block, but 0.25 away
        ];
        let out = step(Arc::new(DensityOnly::default()), ps, &p);
        assert_eq!(out[0].neighbor_count(), 1);
        let expected = poly6(0.0, 0.2) + poly6(0.1, 0.2);
        assert!((out[0].density() - expected).abs() < 1e-2);
    }

    #[test]
    fn integration_uses_fixed_dt() {
        let p = params(0.2, None);
        let ps = vec![Particle::at([0.5; 3]).with_velocity([0.6, 0.0, 0.0])];
        let out = step(Arc::new(DensityOnly::default()), ps, &p);
        assert!((out[0].pos()[0] - (0.5 + 0.6 / 60.0)).abs() < 1e-6);
    }

    #[test]
    fn gravity_accelerates_isolated_particle() {
        let model = Sph {
            density_kernel: SmoothingKernel::Poly6,
            rest_density: 1.0,
            stiffness: 1.0,
            viscosity: 0.0,
            gravity: [0.0, -9.81, 0.0],
        };
        let p = params(0.2, None);
        let out = step(Arc::new(model), vec![Particle::at([0.5; 3])], &p);
        assert!((out[0].vel()[1] + 9.81 / 60.0).abs() < 1e-5);
        assert!(out[0].pos()[1] < 0.5);
    }

    #[test]
    fn walls_clamp_and_damp() {
        let p = params(0.2, Some(Walls { restitution: 0.5 }));
        let ps = vec![Particle::at([0.999, 0.5, 0.5]).with_velocity([6.0, 0.0, 0.0])];
        let out = step(Arc::new(DensityOnly::default()), ps, &p);
        assert_eq!(out[0].pos()[0], 1.0);
        assert!((out[0].vel()[0] + 3.0).abs() < 1e-6);
    }

    #[test]
    fn lane_count_does_not_change_result() {
        let model: Arc<dyn ForceModel> = Arc::new(Sph {
            density_kernel: SmoothingKernel::Poly6,
            rest_density: 100.0,
            stiffness: 5.0,
            viscosity: 0.5,
            gravity: [0.0; 3],
        });
        let p = params(0.2, Some(Walls::default()));
        let bounds = p.domain;
        let initial = ParticleBuffer::initialize(300, &bounds, 5, 0.1).unwrap();

        let run = |lanes: usize| {
            let mut buffer = initial.clone();
            let mut grid = NeighborGrid::new(p.h, &bounds, buffer.len()).unwrap();
            let mut kernel = UpdateKernel::new(model.clone(), lanes, buffer.len()).unwrap();
            grid.rebuild(buffer.read());
            kernel.run(&mut buffer, &grid, &p);
            buffer.read().to_vec()
        };
        assert_eq!(run(1), run(64));
    }
}
