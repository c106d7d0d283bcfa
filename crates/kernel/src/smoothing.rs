//! Smoothing kernel functions with compact support radius `h`.
//!
//! Every function here evaluates to exactly zero at and beyond `r = h`, so a
//! 3x3x3 block of cells of size `h` always contains every contributing pair.
//! The same formulas are implemented in `shaders/update.wgsl`.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

/// Kernel used for density summation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingKernel {
    /// Müller et al. (2003) poly6.
    #[default]
    Poly6,
    /// Wendland C2, rescaled so its support is `h` rather than `2h`.
    WendlandC2,
}

impl SmoothingKernel {
    /// Kernel value W(r, h).
    #[inline]
    pub fn value(self, r: f32, h: f32) -> f32 {
        match self {
            SmoothingKernel::Poly6 => poly6(r, h),
            SmoothingKernel::WendlandC2 => wendland_c2(r, h),
        }
    }

    /// Selector passed to the device kernel (`params.density_kernel`).
    pub fn shader_id(self) -> u32 {
        match self {
            SmoothingKernel::Poly6 => 0,
            SmoothingKernel::WendlandC2 => 1,
        }
    }
}

/// Poly6 kernel in 3D.
///
/// ```text
/// W(r, h) = 315 / (64 pi h^9) * (h^2 - r^2)^3   for r < h
/// ```
#[inline]
pub fn poly6(r: f32, h: f32) -> f32 {
    if r >= h {
        return 0.0;
    }
    let d = h * h - r * r;
    315.0 / (64.0 * PI * h.powi(9)) * d * d * d
}

/// Wendland C2 kernel in 3D with support radius `h`.
///
/// ```text
/// W(r, h) = 21 / (2 pi h^3) * (1 - q)^4 * (1 + 4q)   for q = r/h < 1
/// ```
#[inline]
pub fn wendland_c2(r: f32, h: f32) -> f32 {
    let q = r / h;
    if q >= 1.0 {
        return 0.0;
    }
    let t = 1.0 - q;
    let t2 = t * t;
    21.0 / (2.0 * PI * h * h * h) * t2 * t2 * (1.0 + 4.0 * q)
}

/// Gradient of the spiky kernel, used for pressure forces.
///
/// `d` is the displacement from particle j to particle i and `r = |d|`.
/// Zero for coincident particles.
#[inline]
pub fn spiky_gradient(d: [f32; 3], r: f32, h: f32) -> [f32; 3] {
    if r >= h || r < 1.0e-6 {
        return [0.0; 3];
    }
    let x = h - r;
    let s = -45.0 / (PI * h.powi(6)) * x * x / r;
    [s * d[0], s * d[1], s * d[2]]
}

/// Laplacian of the viscosity kernel.
#[inline]
pub fn viscosity_laplacian(r: f32, h: f32) -> f32 {
    if r >= h {
        return 0.0;
    }
    45.0 / (PI * h.powi(6)) * (h - r)
}
