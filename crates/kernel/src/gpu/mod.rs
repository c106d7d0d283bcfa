//! GPU (Metal/Vulkan/DX12 via wgpu) implementation of [`ComputeBackend`].
//!
//! # Architecture
//! - Each step encodes the six passes of `update.wgsl` in one command buffer:
//!   clear, count, prefix-sum and scatter build the neighbor grid, then
//!   density and integrate run the per-particle update.
//! - `integrate` writes `particles_out`; the same submission copies it back
//!   into `particles_in` and into a staging buffer.
//! - `barrier` waits for the submission and reads the staging buffer into
//!   the host particle buffer.
//!
//! All nine bindings live in group 0; the eight storage buffers fit the
//! default per-stage limit.

pub mod buffers;

use buffers::{GpuBuffers, GpuStepParams};

use crate::backend::{BackendSetup, ComputeBackend};
use crate::compiler::CompiledKernel;
use crate::error::{CompileError, SimError};
use crate::force::ModelCoefficients;
use crate::neighbor::{GridLayout, NeighborGrid};
use crate::particle::ParticleBuffer;
use crate::update::StepParams;

/// Check whether a GPU adapter is available.
pub fn gpu_available() -> bool {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }));
    adapter.is_some()
}

struct Pass {
    entry_point: &'static str,
    pipeline: wgpu::ComputePipeline,
    workgroup_size: u32,
}

struct Bound {
    bufs: GpuBuffers,
    bind_group: wgpu::BindGroup,
    passes: Vec<Pass>,
    coeffs: ModelCoefficients,
    layout: GridLayout,
    pending: bool,
}

/// wgpu compute backend.
pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    bound: Option<Bound>,
}

impl GpuBackend {
    /// Acquire an adapter and device.
    ///
    /// Returns [`SimError::Initialization`] if no suitable adapter is found,
    /// allowing callers to fall back to the CPU backend.
    pub fn new() -> Result<Self, SimError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| SimError::Initialization("no suitable GPU adapter found".into()))?;

        let adapter_name = adapter.get_info().name;
        tracing::info!("GPU adapter: {adapter_name:?}");

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("fluidsim_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| SimError::Initialization(format!("failed to create device: {e}")))?;

        Ok(Self {
            device,
            queue,
            adapter_name,
            bound: None,
        })
    }

    /// Name reported by the adapter.
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// The device-side particle buffer (usable as a vertex buffer by a
    /// presenter sharing this device), once bound.
    pub fn particle_device_buffer(&self) -> Option<&wgpu::Buffer> {
        self.bound.as_ref().map(|b| &b.bufs.particles_in)
    }

    fn build_passes(
        &self,
        kernel: &CompiledKernel,
        layout: &wgpu::PipelineLayout,
    ) -> Result<Vec<Pass>, SimError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(kernel.label()),
            source: wgpu::ShaderSource::Wgsl(kernel.source_text().into()),
        });

        let mut passes = Vec::new();
        for entry_point in kernel.entry_points() {
            let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(layout),
                module: &module,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            });
            let workgroup_size = kernel.workgroup_size(entry_point).map_or(1, |s| s[0].max(1));
            passes.push(Pass {
                entry_point,
                pipeline,
                workgroup_size,
            });
        }

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(CompileError::new(kernel.label(), err.to_string()).into());
        }
        Ok(passes)
    }

    fn bind_group_layout(&self) -> wgpu::BindGroupLayout {
        let mut entries = vec![bgl_uniform(0), bgl_storage_ro(1)];
        entries.extend((2..=8).map(bgl_storage_rw));
        self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("update_bgl"),
            entries: &entries,
        })
    }
}

impl ComputeBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn bind(&mut self, kernel: &CompiledKernel, setup: &BackendSetup) -> Result<(), SimError> {
        let coeffs = setup.model.device_coefficients().ok_or_else(|| {
            SimError::Initialization(format!(
                "force model `{}` has no device implementation",
                setup.model.name()
            ))
        })?;
        let particle_count = u32::try_from(setup.particle_count).map_err(|_| SimError::ResourceExhaustion {
            what: "device particle buffer",
            requested: setup.particle_count,
        })?;

        let grid = GridLayout::new(setup.params.h, &setup.params.domain);
        let total_cells = u32::try_from(grid.total_cells()).map_err(|_| SimError::ResourceExhaustion {
            what: "device grid",
            requested: grid.total_cells(),
        })?;

        let bgl = self.bind_group_layout();
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("update_pl"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });
        let passes = self.build_passes(kernel, &pipeline_layout)?;

        let gpu_params = GpuStepParams::new(&setup.params, &coeffs, &grid, particle_count);
        let bufs = GpuBuffers::new(&self.device, particle_count, total_cells, &gpu_params);

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("update_bg"),
            layout: &bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: bufs.params_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: bufs.particles_in.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: bufs.particles_out.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: bufs.cell_counts.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: bufs.cell_offsets.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: bufs.sorted_indices.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 6, resource: bufs.write_heads.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 7, resource: bufs.particle_cells.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 8, resource: bufs.fields.as_entire_binding() },
            ],
        });

        tracing::info!(
            adapter = %self.adapter_name,
            particles = particle_count,
            cells = total_cells,
            model = setup.model.name(),
            "GPU backend bound"
        );

        self.bound = Some(Bound {
            bufs,
            bind_group,
            passes,
            coeffs,
            layout: grid,
            pending: false,
        });
        Ok(())
    }

    fn upload(&mut self, particles: &ParticleBuffer) {
        if let Some(bound) = &self.bound {
            bound.bufs.upload_particles(&self.queue, particles.read());
        }
    }

    fn dispatch(&mut self, _particles: &mut ParticleBuffer, _grid: &mut NeighborGrid, params: &StepParams) {
        debug_assert!(self.bound.is_some(), "dispatch before bind");
        let Some(bound) = self.bound.as_mut() else {
            return;
        };
        let n = bound.bufs.n_particles;
        let cells = bound.bufs.total_cells;

        let gpu_params = GpuStepParams::new(params, &bound.coeffs, &bound.layout, n);
        bound.bufs.update_params(&self.queue, &gpu_params);

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("update_step"),
        });
        for pass in &bound.passes {
            let groups = match pass.entry_point {
                "clear_cells" => cells.div_ceil(pass.workgroup_size),
                "prefix_sum" => 1,
                _ => n.div_ceil(pass.workgroup_size),
            };
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(pass.entry_point),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&pass.pipeline);
            cpass.set_bind_group(0, &bound.bind_group, &[]);
            cpass.dispatch_workgroups(groups, 1, 1);
        }

        let bytes = bound.bufs.record_bytes();
        encoder.copy_buffer_to_buffer(&bound.bufs.particles_out, 0, &bound.bufs.particles_in, 0, bytes);
        encoder.copy_buffer_to_buffer(&bound.bufs.particles_out, 0, &bound.bufs.staging, 0, bytes);
        self.queue.submit(std::iter::once(encoder.finish()));
        bound.pending = true;
    }

    fn barrier(&mut self, particles: &mut ParticleBuffer) -> bool {
        let Some(bound) = self.bound.as_mut() else {
            return false;
        };
        if !bound.pending {
            return true;
        }
        let mut host = particles.read().to_vec();
        match bound.bufs.read_staging(&self.device, &mut host) {
            Ok(()) => {
                particles.copy_from(&host);
                bound.pending = false;
                true
            }
            Err(e) => {
                // The device already advanced; put it back on the host state.
                tracing::error!("particle readback failed, step discarded: {e}");
                bound.bufs.upload_particles(&self.queue, particles.read());
                bound.pending = false;
                false
            }
        }
    }

    fn release(&mut self) {
        // Dropping the buffers and pipelines frees them once the queue is idle.
        self.bound = None;
        let _ = self.device.poll(wgpu::Maintain::Wait);
    }
}

// ---- Bind group layout entry helpers ----

fn bgl_uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_storage_ro(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_storage_rw(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}
