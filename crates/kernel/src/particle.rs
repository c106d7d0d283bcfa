//! Particle records and the buffer that owns them.
//!
//! Particles are stored array-of-structs as packed `vec4` triples so the same
//! bytes can be uploaded as a storage buffer for the update kernel and bound
//! as a vertex buffer by a presenter without any repacking.

use rand::distr::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{try_alloc, SimError};

/// Index of the density slot in [`Particle::properties`].
pub const PROP_DENSITY: usize = 0;
/// Index of the pressure slot in [`Particle::properties`].
pub const PROP_PRESSURE: usize = 1;
/// Index of the neighbor-count slot in [`Particle::properties`].
pub const PROP_NEIGHBORS: usize = 2;

/// One particle. Layout matches `struct Particle` in `shaders/update.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Particle {
    /// xyz position, w is padding.
    pub position: [f32; 4],
    /// xyz velocity, w is padding.
    pub velocity: [f32; 4],
    /// `[density, pressure, neighbor_count, reserved]`.
    pub properties: [f32; 4],
}

/// Size in bytes of one packed [`Particle`] record.
pub const PARTICLE_STRIDE_BYTES: usize = std::mem::size_of::<Particle>();

impl Particle {
    /// A particle at rest at `position` with zeroed properties.
    pub fn at(position: [f32; 3]) -> Self {
        Self {
            position: [position[0], position[1], position[2], 1.0],
            ..Default::default()
        }
    }

    /// Set the xyz velocity, returning the updated record.
    pub fn with_velocity(mut self, velocity: [f32; 3]) -> Self {
        self.velocity = [velocity[0], velocity[1], velocity[2], 0.0];
        self
    }

    /// xyz position.
    #[inline]
    pub fn pos(&self) -> [f32; 3] {
        [self.position[0], self.position[1], self.position[2]]
    }

    /// xyz velocity.
    #[inline]
    pub fn vel(&self) -> [f32; 3] {
        [self.velocity[0], self.velocity[1], self.velocity[2]]
    }

    /// Smoothed density from the last step.
    pub fn density(&self) -> f32 {
        self.properties[PROP_DENSITY]
    }

    /// Pressure from the last step.
    pub fn pressure(&self) -> f32 {
        self.properties[PROP_PRESSURE]
    }

    /// Number of neighbors within `h` found in the last step (self excluded).
    pub fn neighbor_count(&self) -> u32 {
        self.properties[PROP_NEIGHBORS] as u32
    }
}

/// Axis-aligned simulation domain.
///
/// Used both to seed initial positions and to size the neighbor grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomainBounds {
    /// Minimum corner [x, y, z]
    pub min: [f32; 3],
    /// Maximum corner [x, y, z]
    pub max: [f32; 3],
}

impl Default for DomainBounds {
    fn default() -> Self {
        Self {
            min: [-1.0, -1.0, -1.0],
            max: [1.0, 1.0, 1.0],
        }
    }
}

impl DomainBounds {
    /// Extent along each axis.
    pub fn extent(&self) -> [f32; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// Whether `p` lies inside the closed box.
    pub fn contains(&self, p: [f32; 3]) -> bool {
        (0..3).all(|k| p[k] >= self.min[k] && p[k] <= self.max[k])
    }
}

/// Owner of the particle array for one run.
///
/// The length is fixed at [`ParticleBuffer::initialize`]; the update kernel
/// can only replace the contents wholesale via [`ParticleBuffer::swap_in`].
#[derive(Debug, Clone, Default)]
pub struct ParticleBuffer {
    particles: Vec<Particle>,
}

impl ParticleBuffer {
    /// Allocate `count` particles with uniformly random positions inside
    /// `bounds` and velocity components bounded by
    /// `velocity_scale * half_extent` on each axis.
    pub fn initialize(
        count: usize,
        bounds: &DomainBounds,
        seed: u64,
        velocity_scale: f32,
    ) -> Result<Self, SimError> {
        let mut particles = Vec::new();
        try_alloc(&mut particles, count, "particle buffer")?;

        let extent = bounds.extent();
        let mut positions = Vec::with_capacity(3);
        let mut velocities = Vec::with_capacity(3);
        for k in 0..3 {
            let vmax = velocity_scale * 0.5 * extent[k];
            positions.push(sampling_range("position", k, bounds.min[k], bounds.max[k])?);
            velocities.push(sampling_range("velocity", k, -vmax, vmax)?);
        }

        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..count {
            let mut position = [0.0f32; 3];
            let mut velocity = [0.0f32; 3];
            for k in 0..3 {
                position[k] = positions[k].sample(&mut rng);
                velocity[k] = velocities[k].sample(&mut rng);
            }
            particles.push(Particle::at(position).with_velocity(velocity));
        }

        tracing::debug!(count, seed, "particle buffer initialized");
        Ok(Self { particles })
    }

    /// Wrap an existing snapshot, e.g. one saved from a previous step.
    pub fn from_particles(particles: Vec<Particle>) -> Self {
        Self { particles }
    }

    /// Borrowed view of every particle.
    pub fn read(&self) -> &[Particle] {
        &self.particles
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// Return `true` if there are no particles (never the case during a run).
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Exchange the contents with `next`, which must have the same length.
    ///
    /// `next` receives the previous state, so its allocation is reused as the
    /// output of the following step.
    pub fn swap_in(&mut self, next: &mut Vec<Particle>) {
        debug_assert_eq!(next.len(), self.particles.len());
        std::mem::swap(&mut self.particles, next);
    }

    /// Overwrite the contents from `src` (device readback).
    pub fn copy_from(&mut self, src: &[Particle]) {
        self.particles.copy_from_slice(src);
    }

    /// Free the backing storage.
    pub fn release(&mut self) {
        self.particles = Vec::new();
    }
}

/// Closed sampling interval for one axis; non-finite or inverted bounds are a
/// configuration error.
fn sampling_range(what: &str, axis: usize, low: f32, high: f32) -> Result<Uniform<f32>, SimError> {
    Uniform::new_inclusive(low, high).map_err(|e| {
        SimError::InvalidConfig(format!(
            "{what} range on axis {} is [{low}, {high}]: {e}",
            ["x", "y", "z"][axis]
        ))
    })
}

/// Read-only view of the particle buffer handed to a presenter for one frame.
#[derive(Debug, Clone, Copy)]
pub struct ParticleView<'a> {
    particles: &'a [Particle],
}

impl<'a> ParticleView<'a> {
    /// View over `particles`.
    pub fn new(particles: &'a [Particle]) -> Self {
        Self { particles }
    }

    /// The particle records.
    pub fn particles(&self) -> &'a [Particle] {
        self.particles
    }

    /// Raw packed bytes, suitable for a vertex or storage buffer upload.
    pub fn as_bytes(&self) -> &'a [u8] {
        bytemuck::cast_slice(self.particles)
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// Return `true` if the view is empty.
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Bytes between consecutive records in [`ParticleView::as_bytes`].
    pub fn stride_bytes(&self) -> usize {
        PARTICLE_STRIDE_BYTES
    }
}
