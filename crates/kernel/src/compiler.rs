//! Kernel compilation: parse, validate and link-check WGSL compute kernels.
//!
//! Compilation happens once during initialization. A kernel that fails to
//! parse, fails validation, or does not expose the interface the host expects
//! is rejected with a [`CompileError`] carrying the full diagnostic text, and
//! no simulation is constructed.

use std::borrow::Cow;

use naga::valid::{Capabilities, ValidationFlags, Validator};

use crate::error::CompileError;
use crate::particle::PARTICLE_STRIDE_BYTES;

/// The host-side contract a kernel has to satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelInterface {
    /// Compute entry points, in dispatch order.
    pub entry_points: &'static [&'static str],
    /// (group, binding) of the particle storage array read by every pass.
    pub particle_binding: (u32, u32),
    /// Expected array stride of that binding in bytes.
    pub particle_stride: u32,
}

/// Entry points of the bundled update kernel, in dispatch order.
pub const UPDATE_ENTRY_POINTS: &[&str] = &[
    "clear_cells",
    "count_cells",
    "prefix_sum",
    "scatter_cells",
    "compute_density",
    "integrate",
];

/// Interface of the bundled update kernel.
pub const UPDATE_INTERFACE: KernelInterface = KernelInterface {
    entry_points: UPDATE_ENTRY_POINTS,
    particle_binding: (0, 1),
    particle_stride: PARTICLE_STRIDE_BYTES as u32,
};

/// Kernel source text plus the interface it must expose.
#[derive(Debug, Clone)]
pub struct KernelSource {
    /// Name used in diagnostics and logs.
    pub label: String,
    /// WGSL text.
    pub text: Cow<'static, str>,
    /// Required interface.
    pub interface: KernelInterface,
}

impl KernelSource {
    /// The update kernel shipped with this crate.
    pub fn update() -> Self {
        Self {
            label: "update.wgsl".to_string(),
            text: Cow::Borrowed(include_str!("shaders/update.wgsl")),
            interface: UPDATE_INTERFACE,
        }
    }

    /// Arbitrary source text checked against `interface`.
    pub fn new(label: impl Into<String>, text: impl Into<Cow<'static, str>>, interface: KernelInterface) -> Self {
        Self {
            label: label.into(),
            text: text.into(),
            interface,
        }
    }
}

/// A validated kernel ready to bind to a backend.
#[derive(Debug, Clone)]
pub struct CompiledKernel {
    label: String,
    text: Cow<'static, str>,
    module: naga::Module,
    workgroup_sizes: Vec<(&'static str, [u32; 3])>,
}

impl CompiledKernel {
    /// Label of the source this was compiled from.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Validated WGSL text.
    pub fn source_text(&self) -> &str {
        &self.text
    }

    /// Parsed module.
    pub fn module(&self) -> &naga::Module {
        &self.module
    }

    /// Entry point names in dispatch order.
    pub fn entry_points(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.workgroup_sizes.iter().map(|(name, _)| *name)
    }

    /// Declared `@workgroup_size` of a required entry point.
    pub fn workgroup_size(&self, entry_point: &str) -> Option<[u32; 3]> {
        self.workgroup_sizes
            .iter()
            .find(|(name, _)| *name == entry_point)
            .map(|(_, size)| *size)
    }
}

/// Turns kernel source into a [`CompiledKernel`].
pub trait KernelCompiler {
    /// Compile and link-check `source`.
    fn compile(&self, source: &KernelSource) -> Result<CompiledKernel, CompileError>;
}

/// WGSL front end backed by naga.
#[derive(Debug, Default, Clone, Copy)]
pub struct WgslCompiler;

impl KernelCompiler for WgslCompiler {
    fn compile(&self, source: &KernelSource) -> Result<CompiledKernel, CompileError> {
        let label = source.label.as_str();
        let text = source.text.as_ref();

        let module = naga::front::wgsl::parse_str(text)
            .map_err(|e| CompileError::new(label, e.emit_to_string(text)))?;

        Validator::new(ValidationFlags::all(), Capabilities::default())
            .validate(&module)
            .map_err(|e| CompileError::new(label, e.emit_to_string(text)))?;

        let workgroup_sizes = link(&module, &source.interface).map_err(|msg| CompileError::new(label, msg))?;

        tracing::debug!(label, entry_points = workgroup_sizes.len(), "kernel compiled");
        Ok(CompiledKernel {
            label: source.label.clone(),
            text: source.text.clone(),
            module,
            workgroup_sizes,
        })
    }
}

/// Check the module exposes `interface`; returns each entry point's
/// workgroup size.
fn link(module: &naga::Module, interface: &KernelInterface) -> Result<Vec<(&'static str, [u32; 3])>, String> {
    let mut sizes = Vec::with_capacity(interface.entry_points.len());
    for &name in interface.entry_points {
        let ep = module
            .entry_points
            .iter()
            .find(|ep| ep.name == name)
            .ok_or_else(|| format!("missing entry point `{name}`"))?;
        if ep.stage != naga::ShaderStage::Compute {
            return Err(format!("entry point `{name}` is not a compute shader"));
        }
        sizes.push((name, ep.workgroup_size));
    }

    let (group, binding) = interface.particle_binding;
    let var = module
        .global_variables
        .iter()
        .map(|(_, var)| var)
        .find(|var| matches!(&var.binding, Some(rb) if rb.group == group && rb.binding == binding))
        .ok_or_else(|| format!("no particle buffer at @group({group}) @binding({binding})"))?;

    match &module.types[var.ty].inner {
        naga::TypeInner::Array { stride, .. } if *stride == interface.particle_stride => Ok(sizes),
        naga::TypeInner::Array { stride, .. } => Err(format!(
            "particle buffer stride is {stride} bytes, host records are {} bytes",
            interface.particle_stride
        )),
        _ => Err(format!("@group({group}) @binding({binding}) is not an array")),
    }
}
