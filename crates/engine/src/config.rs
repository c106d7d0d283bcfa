//! Configuration parsing and validation for fluid simulations

use std::fs;
use std::sync::Arc;

use fluidsim_kernel::{BackendType, DensityOnly, DomainBounds, ForceModel, SmoothingKernel, Sph, Walls};
use serde::{Deserialize, Serialize};

/// Main simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Human-readable simulation name
    #[serde(default = "default_name")]
    pub name: String,
    /// Interaction radius h; also the grid cell size
    #[serde(default = "default_interaction_radius")]
    pub interaction_radius: f32,
    /// Number of particles, fixed for the run
    #[serde(default = "default_particle_count")]
    pub particle_count: usize,
    /// Fixed simulation rate (steps per simulated second)
    #[serde(default = "default_steps_per_second")]
    pub steps_per_second: u32,
    /// Catch-up cap per frame; `null` disables the cap
    #[serde(default = "default_max_steps_per_frame")]
    pub max_steps_per_frame: Option<u32>,
    /// Simulation domain bounds
    #[serde(default)]
    pub domain: DomainBounds,
    /// RNG seed for initial positions; drawn at random when absent
    #[serde(default)]
    pub seed: Option<u64>,
    /// Initial velocity components are bounded by this fraction of the
    /// domain half-extent
    #[serde(default = "default_velocity_scale")]
    pub initial_velocity_scale: f32,
    /// Mass of every particle
    #[serde(default = "default_particle_mass")]
    pub particle_mass: f32,
    /// Numeric policy evaluated by the update kernel
    #[serde(default)]
    pub force_model: ForceModelConfig,
    /// Reflective walls; `null` lets particles leave the domain
    #[serde(default = "default_walls")]
    pub walls: Option<Walls>,
    /// Compute backend
    #[serde(default)]
    pub backend: BackendType,
    /// Display surface settings
    #[serde(default)]
    pub window: WindowConfig,
    /// Stop after this many frames (headless runs)
    #[serde(default)]
    pub max_frames: Option<u64>,
}

/// Force model selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ForceModelConfig {
    /// Density and pressure only, no pair forces
    DensityOnly {
        /// Kernel used for density summation
        #[serde(default)]
        density_kernel: SmoothingKernel,
    },
    /// Pressure + viscosity + gravity
    Sph {
        /// Rest density; derived from particle count, mass and domain volume
        /// when absent
        #[serde(default)]
        rest_density: Option<f32>,
        /// Pressure stiffness k
        #[serde(default = "default_stiffness")]
        stiffness: f32,
        /// Viscosity coefficient
        #[serde(default = "default_viscosity")]
        viscosity: f32,
        /// Gravity vector
        #[serde(default = "default_gravity")]
        gravity: [f32; 3],
        /// Kernel used for density summation
        #[serde(default)]
        density_kernel: SmoothingKernel,
    },
}

/// Display surface settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowConfig {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Window title
    pub title: String,
}

/// Highest accepted simulation rate: the fixed step is a whole number of
/// nanoseconds and must not round to zero.
pub const MAX_STEPS_PER_SECOND: u64 = 1_000_000_000;

// Default values
fn default_name() -> String {
    "fluidsim".to_string()
}

fn default_interaction_radius() -> f32 {
    0.2
}

fn default_particle_count() -> usize {
    1000
}

fn default_steps_per_second() -> u32 {
    60
}

fn default_max_steps_per_frame() -> Option<u32> {
    Some(5)
}

fn default_velocity_scale() -> f32 {
    0.1
}

fn default_particle_mass() -> f32 {
    1.0
}

fn default_walls() -> Option<Walls> {
    Some(Walls::default())
}

fn default_stiffness() -> f32 {
    2.0
}

fn default_viscosity() -> f32 {
    0.1
}

fn default_gravity() -> [f32; 3] {
    [0.0, -9.81, 0.0]
}

impl Default for ForceModelConfig {
    fn default() -> Self {
        Self::Sph {
            rest_density: None,
            stiffness: default_stiffness(),
            viscosity: default_viscosity(),
            gravity: default_gravity(),
            density_kernel: SmoothingKernel::default(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: "Fluid Sim".to_string(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            interaction_radius: default_interaction_radius(),
            particle_count: default_particle_count(),
            steps_per_second: default_steps_per_second(),
            max_steps_per_frame: default_max_steps_per_frame(),
            domain: DomainBounds::default(),
            seed: None,
            initial_velocity_scale: default_velocity_scale(),
            particle_mass: default_particle_mass(),
            force_model: ForceModelConfig::default(),
            walls: default_walls(),
            backend: BackendType::default(),
            window: WindowConfig::default(),
            max_frames: None,
        }
    }
}

impl SimulationConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &str) -> Result<Self, String> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        Self::from_json(&contents)
    }

    /// Parse and validate configuration from JSON text
    pub fn from_json(text: &str) -> Result<Self, String> {
        let config: SimulationConfig =
            serde_json::from_str(text).map_err(|e| format!("Failed to parse config JSON: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        // Check interaction radius
        if !(self.interaction_radius > 0.0) || !self.interaction_radius.is_finite() {
            return Err("Interaction radius must be positive".to_string());
        }

        // Check particle count
        if self.particle_count == 0 {
            return Err("particle_count must be at least 1".to_string());
        }

        // Check rate and catch-up cap
        if self.steps_per_second == 0 {
            return Err("steps_per_second must be positive".to_string());
        }
        if u64::from(self.steps_per_second) > MAX_STEPS_PER_SECOND {
            return Err(format!(
                "steps_per_second must not exceed {MAX_STEPS_PER_SECOND} (one step per nanosecond)"
            ));
        }
        if self.max_steps_per_frame == Some(0) {
            return Err("max_steps_per_frame must be at least 1 when set".to_string());
        }

        // Check domain bounds (a zero-extent axis is a planar run)
        for (axis, name) in ["x", "y", "z"].iter().enumerate() {
            if !self.domain.min[axis].is_finite() || !self.domain.max[axis].is_finite() {
                return Err(format!("Domain bounds on {name} must be finite"));
            }
            if !self.domain.extent()[axis].is_finite() {
                return Err(format!("Domain extent on {name} overflows"));
            }
            if self.domain.min[axis] > self.domain.max[axis] {
                return Err(format!("Domain min.{name} must not exceed max.{name}"));
            }
        }
        if self.domain.extent().iter().all(|&e| e <= 0.0) {
            return Err("Domain must have a positive extent on at least one axis".to_string());
        }

        // Check particle mass
        if !(self.particle_mass > 0.0) || !self.particle_mass.is_finite() {
            return Err("Particle mass must be positive".to_string());
        }

        // Check initial velocity
        if !(self.initial_velocity_scale >= 0.0) || !self.initial_velocity_scale.is_finite() {
            return Err("initial_velocity_scale must be finite and non-negative".to_string());
        }
        // Initial velocities span [-vmax, vmax]; the span itself must be finite.
        if self
            .domain
            .extent()
            .iter()
            .any(|&e| !(self.initial_velocity_scale * e).is_finite())
        {
            return Err("initial_velocity_scale is too large for the domain".to_string());
        }

        // Check walls
        if let Some(walls) = self.walls {
            if !(0.0..=1.0).contains(&walls.restitution) {
                return Err("Wall restitution must be in range [0, 1]".to_string());
            }
        }

        // Check force model coefficients
        if let ForceModelConfig::Sph {
            rest_density,
            stiffness,
            viscosity,
            gravity,
            ..
        } = &self.force_model
        {
            if !gravity.iter().all(|g| g.is_finite()) {
                return Err("Gravity must be finite".to_string());
            }
            if let Some(rho0) = rest_density {
                if !(*rho0 > 0.0) || !rho0.is_finite() {
                    return Err("rest_density must be positive".to_string());
                }
            }
            if !(*stiffness >= 0.0) || !stiffness.is_finite() {
                return Err("Stiffness must be non-negative".to_string());
            }
            if !(*viscosity >= 0.0) || !viscosity.is_finite() {
                return Err("Viscosity must be non-negative".to_string());
            }
        }

        Ok(())
    }

    /// Fixed timestep in seconds.
    pub fn dt(&self) -> f32 {
        1.0 / self.steps_per_second as f32
    }

    /// Continuum density of the initial cloud: total mass over domain volume.
    ///
    /// A zero-extent axis counts as one interaction radius thick, matching the
    /// single grid layer used for planar runs.
    pub fn continuum_density(&self) -> f32 {
        let volume: f32 = self
            .domain
            .extent()
            .iter()
            .map(|&e| if e > 0.0 { e } else { self.interaction_radius })
            .product();
        self.particle_count as f32 * self.particle_mass / volume
    }

    /// Build the configured force model.
    pub fn build_force_model(&self) -> Arc<dyn ForceModel> {
        match &self.force_model {
            ForceModelConfig::DensityOnly { density_kernel } => Arc::new(DensityOnly {
                density_kernel: *density_kernel,
            }),
            ForceModelConfig::Sph {
                rest_density,
                stiffness,
                viscosity,
                gravity,
                density_kernel,
            } => {
                let rest_density = match rest_density {
                    Some(rho0) => *rho0,
                    None => {
                        let rho0 = self.continuum_density();
                        tracing::info!("Auto rest density: {:.3} (N*m / volume)", rho0);
                        rho0
                    }
                };
                Arc::new(Sph {
                    density_kernel: *density_kernel,
                    rest_density,
                    stiffness: *stiffness,
                    viscosity: *viscosity,
                    gravity: *gravity,
                })
            }
        }
    }
}
