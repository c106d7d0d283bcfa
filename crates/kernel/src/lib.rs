//! Particle Simulation Kernel
//!
//! This crate provides the compute core of the fluid simulator: particle
//! storage, the uniform neighbor grid, smoothing kernels, force models and
//! the per-step update kernel, together with the backends that execute it.
//! It has no notion of windows, clocks or frames.
//!
//! # Modules
//! - [`particle`] -- Packed `vec4` particle records and the buffer that owns them.
//! - [`neighbor`] -- Uniform-grid spatial index rebuilt every step.
//! - [`smoothing`] -- Poly6 / Wendland C2 / spiky / viscosity kernels.
//! - [`force`] -- `ForceModel` trait plus density-only and SPH models.
//! - [`update`] -- Two-pass, double-buffered CPU update kernel.
//! - [`compiler`] -- WGSL kernel compilation and interface checks (naga).
//! - [`backend`] -- `ComputeBackend` trait, rayon backend and backend selection.
//! - `gpu` -- wgpu backend (feature `gpu`).

#![warn(missing_docs)]

pub mod backend;
pub mod compiler;
pub mod error;
pub mod force;
pub mod neighbor;
pub mod particle;
pub mod smoothing;
pub mod update;

#[cfg(feature = "gpu")]
#[allow(missing_docs)]
pub mod gpu;

pub use backend::{create_backend, BackendSetup, BackendType, ComputeBackend, CpuBackend};
pub use compiler::{CompiledKernel, KernelCompiler, KernelInterface, KernelSource, WgslCompiler, UPDATE_INTERFACE};
pub use error::{CompileError, SimError};
pub use force::{DensityOnly, ForceModel, ModelCoefficients, PairTerms, Sph};
pub use neighbor::{GridLayout, NeighborGrid};
pub use particle::{DomainBounds, Particle, ParticleBuffer, ParticleView, PARTICLE_STRIDE_BYTES};
pub use smoothing::SmoothingKernel;
pub use update::{StepParams, UpdateKernel, Walls};

#[cfg(feature = "gpu")]
pub use gpu::{gpu_available, GpuBackend};
