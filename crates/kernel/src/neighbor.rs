//! Uniform-grid spatial index for neighbor search.
//!
//! Uses sorted-index + cell-offset arrays rather than `HashMap` so the data
//! layout is the same one the device kernel builds (no pointer chasing).

use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

use crate::error::{try_alloc, SimError};
use crate::particle::{DomainBounds, Particle};

/// Integer cell coordinate (cx, cy, cz), always inside the grid.
pub type CellCoord = [u32; 3];

/// Offsets of the 3x3x3 block around a cell, in the order cells are visited.
const BLOCK: usize = 27;

/// Cell geometry: origin, cell size and dimensions. Fixed after construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    cell_size: f32,
    grid_min: [f32; 3],
    grid_dims: [u32; 3],
}

impl GridLayout {
    /// Layout covering `bounds` with cubic cells of edge `cell_size`.
    ///
    /// Each axis gets `ceil(extent / cell_size)` cells, at least one.
    pub fn new(cell_size: f32, bounds: &DomainBounds) -> Self {
        assert!(cell_size > 0.0, "cell_size must be positive");
        let extent = bounds.extent();
        let dims = [
            (extent[0] / cell_size).ceil().max(1.0) as u32,
            (extent[1] / cell_size).ceil().max(1.0) as u32,
            (extent[2] / cell_size).ceil().max(1.0) as u32,
        ];
        Self {
            cell_size,
            grid_min: bounds.min,
            grid_dims: dims,
        }
    }

    /// Cells per axis.
    pub fn dims(&self) -> [u32; 3] {
        self.grid_dims
    }

    /// Edge length of a cell.
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Total number of cells.
    pub fn total_cells(&self) -> usize {
        (self.grid_dims[0] as usize) * (self.grid_dims[1] as usize) * (self.grid_dims[2] as usize)
    }

    /// Map a world-space position to its cell, clamped to grid bounds.
    ///
    /// Particles that drifted outside the domain land in the nearest
    /// boundary cell instead of being rejected.
    #[inline]
    pub fn cell_of(&self, p: [f32; 3]) -> CellCoord {
        let mut c = [0u32; 3];
        for k in 0..3 {
            c[k] = ((p[k] - self.grid_min[k]) / self.cell_size)
                .floor()
                .max(0.0)
                .min((self.grid_dims[k] - 1) as f32) as u32;
        }
        c
    }

    /// Flat cell index from (cx, cy, cz).
    #[inline]
    pub fn linear(&self, c: CellCoord) -> u32 {
        c[0] + c[1] * self.grid_dims[0] + c[2] * self.grid_dims[0] * self.grid_dims[1]
    }

    /// Flat cell index for a signed coordinate, or `None` outside the grid.
    #[inline]
    fn checked_linear(&self, c: [i64; 3]) -> Option<usize> {
        for k in 0..3 {
            if c[k] < 0 || c[k] >= self.grid_dims[k] as i64 {
                return None;
            }
        }
        Some(self.linear([c[0] as u32, c[1] as u32, c[2] as u32]) as usize)
    }
}

/// Uniform grid rebuilt from scratch every step.
///
/// Cell size should be at least the interaction radius `h` so that for any
/// particle the 27 (3x3x3) adjacent cells contain every neighbor within `h`.
pub struct NeighborGrid {
    layout: GridLayout,
    /// Cell index for each particle (parallel to the particle array).
    cell_indices: Vec<u32>,
    /// Particle indices grouped by cell, ascending within each cell.
    sorted_indices: Vec<u32>,
    /// Start offset in `sorted_indices` for each cell.
    cell_offsets: Vec<u32>,
    /// Number of particles in each cell. Atomic so counting runs in parallel.
    cell_counts: Vec<AtomicU32>,
    /// Scratch write cursor per cell for the scatter pass.
    write_heads: Vec<u32>,
}

impl NeighborGrid {
    /// Allocate a grid covering `bounds` for up to `particle_count` particles.
    pub fn new(cell_size: f32, bounds: &DomainBounds, particle_count: usize) -> Result<Self, SimError> {
        let layout = GridLayout::new(cell_size, bounds);
        let total_cells = layout.total_cells();
        if total_cells > u32::MAX as usize || particle_count > u32::MAX as usize {
            return Err(SimError::ResourceExhaustion {
                what: "grid cell table",
                requested: total_cells,
            });
        }

        let mut cell_offsets = Vec::new();
        let mut cell_counts = Vec::new();
        let mut write_heads = Vec::new();
        try_alloc(&mut cell_offsets, total_cells, "grid cell table")?;
        try_alloc(&mut cell_counts, total_cells, "grid cell table")?;
        try_alloc(&mut write_heads, total_cells, "grid cell table")?;
        cell_offsets.resize(total_cells, 0);
        cell_counts.resize_with(total_cells, || AtomicU32::new(0));
        write_heads.resize(total_cells, 0);

        let mut cell_indices = Vec::new();
        let mut sorted_indices = Vec::new();
        try_alloc(&mut cell_indices, particle_count, "grid particle list")?;
        try_alloc(&mut sorted_indices, particle_count, "grid particle list")?;

        Ok(Self {
            layout,
            cell_indices,
            sorted_indices,
            cell_offsets,
            cell_counts,
            write_heads,
        })
    }

    /// Cell geometry.
    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Cells per axis.
    pub fn dims(&self) -> [u32; 3] {
        self.layout.dims()
    }

    /// Total number of cells.
    pub fn cell_count(&self) -> usize {
        self.cell_offsets.len()
    }

    /// Cell containing `p` (clamped to the grid).
    pub fn cell_of(&self, p: [f32; 3]) -> CellCoord {
        self.layout.cell_of(p)
    }

    /// Particle indices currently bucketed in the cell with flat index `cell`.
    pub fn bucket(&self, cell: usize) -> &[u32] {
        let start = self.cell_offsets[cell] as usize;
        let count = self.cell_counts[cell].load(Ordering::Relaxed) as usize;
        &self.sorted_indices[start..start + count]
    }

    /// Rebuild the grid from current particle positions.
    ///
    /// Two-pass count-then-scatter: cell assignment and counting run in
    /// parallel (counts are atomic), the prefix sum and scatter are serial so
    /// each bucket lists its particles in ascending index order.
    pub fn rebuild(&mut self, particles: &[Particle]) {
        let n = particles.len();
        let layout = self.layout;

        // --- 1. Compute cell index for each particle ---
        self.cell_indices.resize(n, 0);
        self.cell_indices
            .par_iter_mut()
            .zip(particles.par_iter())
            .for_each(|(ci, p)| *ci = layout.linear(layout.cell_of(p.pos())));

        // --- 2. Count particles per cell ---
        self.cell_counts
            .par_iter_mut()
            .for_each(|c| *c.get_mut() = 0);
        let counts = &self.cell_counts;
        self.cell_indices.par_iter().for_each(|&ci| {
            counts[ci as usize].fetch_add(1, Ordering::Relaxed);
        });

        // --- 3. Prefix-sum to get cell offsets ---
        let mut running = 0u32;
        for (offset, count) in self.cell_offsets.iter_mut().zip(self.cell_counts.iter_mut()) {
            *offset = running;
            running += *count.get_mut();
        }
        debug_assert_eq!(running as usize, n);

        // --- 4. Scatter particle indices into sorted order ---
        self.sorted_indices.resize(n, 0);
        self.write_heads.copy_from_slice(&self.cell_offsets);
        for (i, &ci) in self.cell_indices.iter().enumerate() {
            let head = &mut self.write_heads[ci as usize];
            self.sorted_indices[*head as usize] = i as u32;
            *head += 1;
        }
    }

    /// Candidate neighbors of a particle in `cell`: every index bucketed in
    /// the 3x3x3 block centered on `cell`.
    ///
    /// Candidates can be up to `sqrt(3) * 2 * cell_size` away; callers filter
    /// by actual distance.
    pub fn query_neighbors(&self, cell: CellCoord) -> NeighborCandidates<'_> {
        NeighborCandidates {
            grid: self,
            center: [cell[0] as i64, cell[1] as i64, cell[2] as i64],
            next_offset: 0,
            current: [].iter(),
        }
    }

    /// Neighbors of particle `i` within `radius`, excluding `i` itself.
    pub fn neighbors_within<'a>(
        &'a self,
        particles: &'a [Particle],
        i: usize,
        radius: f32,
    ) -> impl Iterator<Item = usize> + 'a {
        let p = particles[i].pos();
        let radius_sq = radius * radius;
        self.query_neighbors(self.cell_of(p)).filter(move |&j| {
            if j == i {
                return false;
            }
            let q = particles[j].pos();
            let dx = p[0] - q[0];
            let dy = p[1] - q[1];
            let dz = p[2] - q[2];
            dx * dx + dy * dy + dz * dz <= radius_sq
        })
    }

    /// Free all backing storage.
    pub fn release(&mut self) {
        self.cell_indices = Vec::new();
        self.sorted_indices = Vec::new();
        self.cell_offsets = Vec::new();
        self.cell_counts = Vec::new();
        self.write_heads = Vec::new();
    }
}

/// Lazy, single-use sequence of candidate indices from a 3x3x3 cell block.
pub struct NeighborCandidates<'a> {
    grid: &'a NeighborGrid,
    center: [i64; 3],
    next_offset: usize,
    current: std::slice::Iter<'a, u32>,
}

impl Iterator for NeighborCandidates<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if let Some(&j) = self.current.next() {
                return Some(j as usize);
            }
            if self.next_offset >= BLOCK {
                return None;
            }
            // dx fastest, then dy, then dz; matches the device kernel's loop order.
            let k = self.next_offset as i64;
            self.next_offset += 1;
            let c = [
                self.center[0] + k % 3 - 1,
                self.center[1] + (k / 3) % 3 - 1,
                self.center[2] + k / 9 - 1,
            ];
            if let Some(cell) = self.grid.layout.checked_linear(c) {
                self.current = self.grid.bucket(cell).iter();
            }
        }
    }
}
