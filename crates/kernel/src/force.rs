//! Force models: the numeric policy evaluated by the update kernel.
//!
//! A [`ForceModel`] decides how density turns into pressure and what each
//! neighbor pair contributes to a particle's acceleration. The update kernel
//! owns neighbor traversal and integration; models never see the grid.

use std::fmt;

use crate::smoothing::{spiky_gradient, viscosity_laplacian, SmoothingKernel};

/// Pre-step state of one interacting pair (i, j) as seen by particle i.
#[derive(Debug, Clone, Copy)]
pub struct PairTerms {
    /// Displacement x_i - x_j.
    pub offset: [f32; 3],
    /// |offset|, always <= h.
    pub r: f32,
    /// Velocity of i.
    pub vel_i: [f32; 3],
    /// Velocity of j.
    pub vel_j: [f32; 3],
    /// Density of i from this step's density pass.
    pub density_i: f32,
    /// Density of j from this step's density pass.
    pub density_j: f32,
    /// Pressure of i.
    pub pressure_i: f32,
    /// Pressure of j.
    pub pressure_j: f32,
    /// Mass shared by all particles.
    pub mass: f32,
}

/// Plain coefficients for models the device kernel can evaluate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelCoefficients {
    /// `params.force_model` selector (0 = density only, 1 = SPH).
    pub kind: u32,
    /// Density kernel selector.
    pub density_kernel: u32,
    /// Rest density rho0.
    pub rest_density: f32,
    /// Pressure stiffness k.
    pub stiffness: f32,
    /// Viscosity coefficient mu.
    pub viscosity: f32,
    /// Body acceleration.
    pub gravity: [f32; 3],
}

/// Numeric policy for density, pressure and pair forces.
///
/// Must be evaluated identically for every particle; implementations hold
/// only immutable parameters.
pub trait ForceModel: Send + Sync + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Kernel used for density summation.
    fn density_kernel(&self) -> SmoothingKernel;

    /// Equation of state.
    fn pressure(&self, density: f32) -> f32;

    /// Whether pair forces exist at all. When `false` the force pass skips
    /// neighbor traversal.
    fn interacts(&self) -> bool {
        true
    }

    /// Acceleration of i due to j.
    fn pair_acceleration(&self, pair: &PairTerms, h: f32) -> [f32; 3];

    /// Acceleration applied to every particle regardless of neighbors.
    fn external_acceleration(&self) -> [f32; 3] {
        [0.0; 3]
    }

    /// Coefficients for the device kernel, or `None` if this model only runs
    /// on the CPU backend.
    fn device_coefficients(&self) -> Option<ModelCoefficients> {
        None
    }
}

/// Density and pressure only: no pair forces, no gravity.
///
/// Particles keep their velocity; the smoothed density is still written into
/// each record for presentation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DensityOnly {
    /// Kernel used for density summation.
    pub density_kernel: SmoothingKernel,
}

impl ForceModel for DensityOnly {
    fn name(&self) -> &'static str {
        "density_only"
    }

    fn density_kernel(&self) -> SmoothingKernel {
        self.density_kernel
    }

    fn pressure(&self, _density: f32) -> f32 {
        0.0
    }

    fn interacts(&self) -> bool {
        false
    }

    fn pair_acceleration(&self, _pair: &PairTerms, _h: f32) -> [f32; 3] {
        [0.0; 3]
    }

    fn device_coefficients(&self) -> Option<ModelCoefficients> {
        Some(ModelCoefficients {
            kind: 0,
            density_kernel: self.density_kernel.shader_id(),
            rest_density: 0.0,
            stiffness: 0.0,
            viscosity: 0.0,
            gravity: [0.0; 3],
        })
    }
}

/// Weakly compressible SPH after Müller et al. (2003).
///
/// ```text
/// p_i   = k * (rho_i - rho0)
/// a_i  += -m * (p_i + p_j) / (2 rho_i rho_j) * grad W_spiky(r_ij)
/// a_i  +=  mu * m * (v_j - v_i) / (rho_i rho_j) * lap W_visc(r_ij)
/// a_i  +=  g
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Sph {
    /// Kernel used for density summation.
    pub density_kernel: SmoothingKernel,
    /// Rest density rho0.
    pub rest_density: f32,
    /// Pressure stiffness k.
    pub stiffness: f32,
    /// Viscosity coefficient mu.
    pub viscosity: f32,
    /// Gravitational acceleration.
    pub gravity: [f32; 3],
}

impl ForceModel for Sph {
    fn name(&self) -> &'static str {
        "sph"
    }

    fn density_kernel(&self) -> SmoothingKernel {
        self.density_kernel
    }

    fn pressure(&self, density: f32) -> f32 {
        self.stiffness * (density - self.rest_density)
    }

    fn pair_acceleration(&self, pair: &PairTerms, h: f32) -> [f32; 3] {
        let rho_ij = pair.density_i * pair.density_j;
        if rho_ij <= 0.0 {
            return [0.0; 3];
        }

        let grad = spiky_gradient(pair.offset, pair.r, h);
        let pressure = -pair.mass * (pair.pressure_i + pair.pressure_j) / (2.0 * rho_ij);

        let visc = self.viscosity * pair.mass * viscosity_laplacian(pair.r, h) / rho_ij;

        [
            pressure * grad[0] + visc * (pair.vel_j[0] - pair.vel_i[0]),
            pressure * grad[1] + visc * (pair.vel_j[1] - pair.vel_i[1]),
            pressure * grad[2] + visc * (pair.vel_j[2] - pair.vel_i[2]),
        ]
    }

    fn external_acceleration(&self) -> [f32; 3] {
        self.gravity
    }

    fn device_coefficients(&self) -> Option<ModelCoefficients> {
        Some(ModelCoefficients {
            kind: 1,
            density_kernel: self.density_kernel.shader_id(),
            rest_density: self.rest_density,
            stiffness: self.stiffness,
            viscosity: self.viscosity,
            gravity: self.gravity,
        })
    }
}
