//! Error types for simulation start-up.
//!
//! Every variant is fatal: nothing in the per-step path returns an error, so
//! these only surface from `init`-time work (compiling the update program,
//! binding a backend, allocating particle and grid storage).

use std::fmt;

/// A kernel program failed to compile or link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    /// Label of the kernel source that failed.
    pub label: String,
    /// Diagnostic text produced by the compiler front-end or validator.
    pub diagnostics: String,
}

impl CompileError {
    /// Build a compile error for the kernel labelled `label`.
    pub fn new(label: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            diagnostics: diagnostics.into(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kernel `{}` failed to compile:\n{}", self.label, self.diagnostics)
    }
}

impl std::error::Error for CompileError {}

/// Fatal start-up failure of the simulation.
#[derive(Debug)]
pub enum SimError {
    /// The compute backend is unavailable or could not be bound.
    Initialization(String),
    /// The update kernel failed to compile or link.
    Compile(CompileError),
    /// Backing storage for particle or grid buffers could not be allocated.
    ResourceExhaustion {
        /// Which buffer was being allocated.
        what: &'static str,
        /// Number of elements requested.
        requested: usize,
    },
    /// The configuration was rejected before anything was allocated.
    InvalidConfig(String),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::Initialization(msg) => write!(f, "compute backend initialization failed: {msg}"),
            SimError::Compile(e) => write!(f, "{e}"),
            SimError::ResourceExhaustion { what, requested } => {
                write!(f, "failed to allocate {what} ({requested} elements)")
            }
            SimError::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for SimError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimError::Compile(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CompileError> for SimError {
    fn from(e: CompileError) -> Self {
        SimError::Compile(e)
    }
}

/// Reserve exactly `n` elements in `vec`, mapping allocator failure to
/// [`SimError::ResourceExhaustion`].
pub(crate) fn try_alloc<T>(vec: &mut Vec<T>, n: usize, what: &'static str) -> Result<(), SimError> {
    vec.try_reserve_exact(n)
        .map_err(|_| SimError::ResourceExhaustion { what, requested: n })
}
