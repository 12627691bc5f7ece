//! Radius queries over a point cloud, rebuilt once per step.
//!
//! Both indexes keep a private copy of the points they were built from, so a
//! query always answers against the positions at the last rebuild even if
//! the caller has moved the particles since.

use std::collections::HashMap;

use glam::{DVec3, IVec3, UVec3};
use serde::{Deserialize, Serialize};

/// Upper bound on the number of dense cells. Sparse clouds over a large box
/// get a coarser grid instead of a huge allocation.
const MAX_CELLS: usize = 1 << 22;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeighborSearchMethod {
    #[default]
    UniformGrid,
    SpatialHash,
}

#[derive(Debug, Clone)]
pub enum NeighborSearch {
    UniformGrid(UniformGrid),
    SpatialHash(SpatialHash),
}

impl NeighborSearch {
    pub fn new(method: NeighborSearchMethod, cell_size: f64) -> Self {
        match method {
            NeighborSearchMethod::UniformGrid => Self::UniformGrid(UniformGrid::new(cell_size)),
            NeighborSearchMethod::SpatialHash => Self::SpatialHash(SpatialHash::new(cell_size)),
        }
    }

    pub fn method(&self) -> NeighborSearchMethod {
        match self {
            Self::UniformGrid(_) => NeighborSearchMethod::UniformGrid,
            Self::SpatialHash(_) => NeighborSearchMethod::SpatialHash,
        }
    }

    pub fn rebuild(&mut self, points: &[DVec3]) {
        match self {
            Self::UniformGrid(grid) => grid.rebuild(points),
            Self::SpatialHash(hash) => hash.rebuild(points),
        }
    }

    /// Indices of all indexed points strictly closer than `radius` to
    /// `point`, appended to `out` in no particular order.
    pub fn neighbors_into(&self, point: DVec3, radius: f64, out: &mut Vec<usize>) {
        match self {
            Self::UniformGrid(grid) => grid.query(point, radius, out),
            Self::SpatialHash(hash) => hash.query(point, radius, out),
        }
    }

    pub fn neighbors(&self, point: DVec3, radius: f64) -> Vec<usize> {
        let mut out = Vec::new();
        self.neighbors_into(point, radius, &mut out);
        out
    }

    /// Points as of the last rebuild.
    pub fn points(&self) -> &[DVec3] {
        match self {
            Self::UniformGrid(grid) => &grid.points,
            Self::SpatialHash(hash) => &hash.points,
        }
    }

    pub fn len(&self) -> usize {
        self.points().len()
    }

    pub fn is_empty(&self) -> bool {
        self.points().is_empty()
    }
}

/// Dense grid over the bounding box of the points, filled with a counting
/// sort. Cell `c` owns `sorted[start[c]..start[c + 1]]`.
#[derive(Debug, Clone)]
pub struct UniformGrid {
    requested_cell_size: f64,
    cell_size: f64,
    origin: DVec3,
    dims: UVec3,
    start: Vec<u32>,
    sorted: Vec<u32>,
    points: Vec<DVec3>,
}

impl UniformGrid {
    pub fn new(cell_size: f64) -> Self {
        Self {
            requested_cell_size: cell_size,
            cell_size,
            origin: DVec3::ZERO,
            dims: UVec3::ZERO,
            start: Vec::new(),
            sorted: Vec::new(),
            points: Vec::new(),
        }
    }

    /// The cell size in use, which can be larger than requested.
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn dims(&self) -> UVec3 {
        self.dims
    }

    pub fn rebuild(&mut self, points: &[DVec3]) {
        self.points.clear();
        self.points.extend_from_slice(points);
        self.sorted.clear();
        self.start.clear();

        if points.is_empty() {
            self.dims = UVec3::ZERO;
            return;
        }

        let (min, max) = points
            .iter()
            .fold((DVec3::INFINITY, DVec3::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(*p), hi.max(*p))
            });

        let extent = max - min;
        let mut cell_size = self.requested_cell_size;
        if extent.is_finite() && cell_size > 0.0 {
            while cell_count(extent, cell_size) > MAX_CELLS as f64 {
                cell_size *= 2.0;
            }
        } else {
            tracing::warn!(
                requested = self.requested_cell_size,
                "degenerate neighbor grid, using a single cell"
            );
            cell_size = f64::INFINITY;
        }
        if cell_size != self.requested_cell_size {
            tracing::debug!(
                requested = self.requested_cell_size,
                cell_size,
                "neighbor grid coarsened"
            );
        }

        let dims = if cell_size.is_finite() {
            grid_dims(extent, cell_size).as_uvec3()
        } else {
            UVec3::ONE
        };
        self.origin = min;
        self.cell_size = cell_size;
        self.dims = dims;

        let cells = dims.x as usize * dims.y as usize * dims.z as usize;
        let mut counts = vec![0u32; cells + 1];
        let mut cell_of = Vec::with_capacity(points.len());

        for p in points {
            let cell = self.flat(self.cell_of(*p));
            counts[cell + 1] += 1;
            cell_of.push(cell);
        }
        for i in 1..counts.len() {
            counts[i] += counts[i - 1];
        }

        self.start = counts;
        let mut cursor = self.start.clone();
        self.sorted = vec![0; points.len()];
        for (index, &cell) in cell_of.iter().enumerate() {
            self.sorted[cursor[cell] as usize] = index as u32;
            cursor[cell] += 1;
        }
    }

    fn cell_of(&self, p: DVec3) -> UVec3 {
        let rel = ((p - self.origin) / self.cell_size).floor();
        let max = (self.dims - UVec3::ONE).as_dvec3();
        rel.clamp(DVec3::ZERO, max).as_uvec3()
    }

    fn flat(&self, cell: UVec3) -> usize {
        let d = self.dims.as_u64vec3();
        let c = cell.as_u64vec3();
        ((c.z * d.y + c.y) * d.x + c.x) as usize
    }

    fn query(&self, point: DVec3, radius: f64, out: &mut Vec<usize>) {
        if self.points.is_empty() || !(radius > 0.0) {
            return;
        }

        let max = (self.dims - UVec3::ONE).as_dvec3();
        let lo = ((point - radius - self.origin) / self.cell_size).floor();
        let hi = ((point + radius - self.origin) / self.cell_size).floor();

        // Entirely outside the grid on some axis.
        if hi.cmplt(DVec3::ZERO).any() || lo.cmpgt(max).any() {
            return;
        }

        let lo = lo.clamp(DVec3::ZERO, max).as_uvec3();
        let hi = hi.clamp(DVec3::ZERO, max).as_uvec3();
        let r2 = radius * radius;

        for z in lo.z..=hi.z {
            for y in lo.y..=hi.y {
                for x in lo.x..=hi.x {
                    let cell = self.flat(UVec3::new(x, y, z));
                    let range = self.start[cell] as usize..self.start[cell + 1] as usize;
                    for &index in &self.sorted[range] {
                        let index = index as usize;
                        if self.points[index].distance_squared(point) < r2 {
                            out.push(index);
                        }
                    }
                }
            }
        }
    }
}

/// Cells per axis, in floating point so that huge extents cannot overflow.
fn grid_dims(extent: DVec3, cell_size: f64) -> DVec3 {
    (extent / cell_size).floor() + DVec3::ONE
}

fn cell_count(extent: DVec3, cell_size: f64) -> f64 {
    let dims = grid_dims(extent, cell_size);
    dims.x * dims.y * dims.z
}

/// Sparse cells keyed by integer coordinates; unbounded domain.
#[derive(Debug, Clone)]
pub struct SpatialHash {
    cell_size: f64,
    cells: HashMap<IVec3, Vec<u32>>,
    points: Vec<DVec3>,
}

impl SpatialHash {
    pub fn new(cell_size: f64) -> Self {
        Self {
            cell_size,
            cells: HashMap::new(),
            points: Vec::new(),
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    fn cell_of(&self, p: DVec3) -> IVec3 {
        (p / self.cell_size).floor().as_ivec3()
    }

    pub fn rebuild(&mut self, points: &[DVec3]) {
        self.points.clear();
        self.points.extend_from_slice(points);

        for bucket in self.cells.values_mut() {
            bucket.clear();
        }
        for (index, p) in points.iter().enumerate() {
            let cell = self.cell_of(*p);
            self.cells.entry(cell).or_default().push(index as u32);
        }
        self.cells.retain(|_, bucket| !bucket.is_empty());
    }

    fn query(&self, point: DVec3, radius: f64, out: &mut Vec<usize>) {
        if self.points.is_empty() || !(radius > 0.0) {
            return;
        }

        let lo = self.cell_of(point - radius);
        let hi = self.cell_of(point + radius);
        let r2 = radius * radius;

        let mut visit = |bucket: &Vec<u32>| {
            for &index in bucket {
                let index = index as usize;
                if self.points[index].distance_squared(point) < r2 {
                    out.push(index);
                }
            }
        };

        let span = (hi - lo + IVec3::ONE).as_i64vec3();
        let visited_cells = span.x.saturating_mul(span.y).saturating_mul(span.z);

        if visited_cells as usize > self.cells.len() {
            // Wide query: scanning occupied cells is cheaper than probing.
            for (cell, bucket) in &self.cells {
                if cell.cmpge(lo).all() && cell.cmple(hi).all() {
                    visit(bucket);
                }
            }
            return;
        }

        for z in lo.z..=hi.z {
            for y in lo.y..=hi.y {
                for x in lo.x..=hi.x {
                    if let Some(bucket) = self.cells.get(&IVec3::new(x, y, z)) {
                        visit(bucket);
                    }
                }
            }
        }
    }
}
