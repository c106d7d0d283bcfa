//! GPU buffer management for the update kernel.
//!
//! Creates the storage buffers bound at `@group(0)` of `update.wgsl` and
//! handles CPU->GPU upload and GPU->CPU readback of the packed particle
//! records.

use wgpu::util::DeviceExt;

use crate::force::ModelCoefficients;
use crate::neighbor::GridLayout;
use crate::particle::{Particle, PARTICLE_STRIDE_BYTES};
use crate::update::StepParams;

/// Uniform buffer layout. Must match `struct StepParams` in `update.wgsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuStepParams {
    pub domain_min: [f32; 4],
    pub domain_max: [f32; 4],
    pub gravity: [f32; 4],
    pub grid_dims: [u32; 4],
    pub h: f32,
    pub dt: f32,
    pub particle_mass: f32,
    pub rest_density: f32,
    pub stiffness: f32,
    pub viscosity: f32,
    pub restitution: f32,
    pub particle_count: u32,
    pub force_model: u32,
    pub density_kernel: u32,
    pub walls: u32,
    pub _pad0: u32,
}

impl GpuStepParams {
    /// Pack host step constants for upload.
    pub fn new(params: &StepParams, coeffs: &ModelCoefficients, layout: &GridLayout, particle_count: u32) -> Self {
        let d = params.domain;
        let dims = layout.dims();
        Self {
            domain_min: [d.min[0], d.min[1], d.min[2], 0.0],
            domain_max: [d.max[0], d.max[1], d.max[2], 0.0],
            gravity: [coeffs.gravity[0], coeffs.gravity[1], coeffs.gravity[2], 0.0],
            grid_dims: [dims[0], dims[1], dims[2], layout.total_cells() as u32],
            h: params.h,
            dt: params.dt,
            particle_mass: params.particle_mass,
            rest_density: coeffs.rest_density,
            stiffness: coeffs.stiffness,
            viscosity: coeffs.viscosity,
            restitution: params.walls.map_or(0.0, |w| w.restitution),
            particle_count,
            force_model: coeffs.kind,
            density_kernel: coeffs.density_kernel,
            walls: params.walls.is_some() as u32,
            _pad0: 0,
        }
    }
}

/// Minimum buffer size (wgpu requires non-zero buffers).
const MIN_BUF_SIZE: u64 = 4;

/// All device buffers for one bound run.
pub struct GpuBuffers {
    pub params_buffer: wgpu::Buffer,

    // Particle records, double buffered.
    pub particles_in: wgpu::Buffer,
    pub particles_out: wgpu::Buffer,

    // Neighbor grid, rebuilt every step.
    pub cell_counts: wgpu::Buffer,
    pub cell_offsets: wgpu::Buffer,
    pub sorted_indices: wgpu::Buffer,
    pub write_heads: wgpu::Buffer,
    pub particle_cells: wgpu::Buffer,

    // Density pass output.
    pub fields: wgpu::Buffer,

    pub staging: wgpu::Buffer,

    /// Number of particles
    pub n_particles: u32,
    /// Total number of grid cells
    pub total_cells: u32,
}

fn create_storage(device: &wgpu::Device, label: &str, size: u64, extra: wgpu::BufferUsages) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(MIN_BUF_SIZE),
        usage: wgpu::BufferUsages::STORAGE | extra,
        mapped_at_creation: false,
    })
}

impl GpuBuffers {
    /// Allocate every buffer for `n_particles` particles and `total_cells`
    /// grid cells.
    pub fn new(device: &wgpu::Device, n_particles: u32, total_cells: u32, params: &GpuStepParams) -> Self {
        let n = n_particles as u64;
        let cells = total_cells as u64;
        let record_bytes = n * PARTICLE_STRIDE_BYTES as u64;

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("step_params"),
            contents: bytemuck::bytes_of(params),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let particles_in = create_storage(
            device,
            "particles_in",
            record_bytes,
            wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::VERTEX,
        );
        let particles_out = create_storage(device, "particles_out", record_bytes, wgpu::BufferUsages::COPY_SRC);

        let none = wgpu::BufferUsages::empty();
        let cell_counts = create_storage(device, "cell_counts", cells * 4, none);
        let cell_offsets = create_storage(device, "cell_offsets", cells * 4, none);
        let write_heads = create_storage(device, "write_heads", cells * 4, none);
        let sorted_indices = create_storage(device, "sorted_indices", n * 4, none);
        let particle_cells = create_storage(device, "particle_cells", n * 4, none);
        let fields = create_storage(device, "fields", n * 16, none);

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("particles_staging"),
            size: record_bytes.max(MIN_BUF_SIZE),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            params_buffer,
            particles_in,
            particles_out,
            cell_counts,
            cell_offsets,
            sorted_indices,
            write_heads,
            particle_cells,
            fields,
            staging,
            n_particles,
            total_cells,
        }
    }

    /// Size of the particle array in bytes.
    pub fn record_bytes(&self) -> u64 {
        self.n_particles as u64 * PARTICLE_STRIDE_BYTES as u64
    }

    /// Update the uniform params buffer.
    pub fn update_params(&self, queue: &wgpu::Queue, params: &GpuStepParams) {
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(params));
    }

    /// Upload particle records into `particles_in`.
    pub fn upload_particles(&self, queue: &wgpu::Queue, particles: &[Particle]) {
        queue.write_buffer(&self.particles_in, 0, bytemuck::cast_slice(particles));
    }

    /// Map the staging buffer (already filled by a submitted copy) and copy
    /// its records into `out`.
    pub fn read_staging(&self, device: &wgpu::Device, out: &mut [Particle]) -> Result<(), wgpu::BufferAsyncError> {
        let slice = self.staging.slice(..self.record_bytes().max(MIN_BUF_SIZE));
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = device.poll(wgpu::Maintain::Wait);
        rx.recv().map_err(|_| wgpu::BufferAsyncError)??;

        {
            let data = slice.get_mapped_range();
            let records: &[Particle] = bytemuck::cast_slice(&data[..self.record_bytes() as usize]);
            out.copy_from_slice(records);
        }
        self.staging.unmap();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_layout_matches_shader() {
        assert_eq!(std::mem::size_of::<GpuStepParams>(), 112);
        assert_eq!(std::mem::size_of::<GpuStepParams>() % 16, 0);
    }
}
