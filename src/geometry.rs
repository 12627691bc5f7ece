//! The geometry the collision pipeline works with: point sets and implicit
//! surfaces described by a signed distance (negative inside).

use glam::{DVec3, UVec3};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::ids::next_id;

/// Positions plus a modified flag for whoever renders them.
#[derive(Debug, Clone)]
pub struct PointSet {
    id: u64,
    positions: Vec<DVec3>,
    modified: bool,
}

impl PointSet {
    pub fn new(positions: Vec<DVec3>) -> Self {
        Self {
            id: next_id(),
            positions,
            modified: true,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn positions(&self) -> &[DVec3] {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Replace all positions, reusing the allocation.
    pub fn set_positions(&mut self, positions: &[DVec3]) {
        self.positions.clear();
        self.positions.extend_from_slice(positions);
        self.modified = true;
    }

    pub fn translate(&mut self, offset: DVec3) {
        for p in &mut self.positions {
            *p += offset;
        }
        self.modified = true;
    }

    /// Whether the positions changed since the last call.
    pub fn take_modified(&mut self) -> bool {
        std::mem::take(&mut self.modified)
    }
}

/// Step of the central differences used for gradients without a closed
/// form.
const GRADIENT_STEP: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImplicitGeometry {
    /// Half-space below the plane; `normal` points out of it.
    Plane { point: DVec3, normal: DVec3 },
    Sphere { center: DVec3, radius: f64 },
    /// Axis-aligned box.
    Cuboid { center: DVec3, half_extents: DVec3 },
    #[serde(skip)]
    SignedDistanceField(SignedDistanceField),
}

impl ImplicitGeometry {
    pub fn plane(point: DVec3, normal: DVec3) -> Self {
        Self::Plane {
            point,
            normal: normal.normalize_or_zero(),
        }
    }

    pub fn signed_distance(&self, p: DVec3) -> f64 {
        match self {
            Self::Plane { point, normal } => (p - *point).dot(*normal),
            Self::Sphere { center, radius } => p.distance(*center) - radius,
            Self::Cuboid {
                center,
                half_extents,
            } => {
                let q = (p - *center).abs() - *half_extents;
                q.max(DVec3::ZERO).length() + q.max_element().min(0.0)
            }
            Self::SignedDistanceField(sdf) => sdf.sample(p),
        }
    }

    /// Gradient of the signed distance; zero where it is undefined.
    pub fn gradient(&self, p: DVec3) -> DVec3 {
        match self {
            Self::Plane { normal, .. } => *normal,
            Self::Sphere { center, .. } => (p - *center).normalize_or_zero(),
            Self::Cuboid { .. } => central_difference(|x| self.signed_distance(x), p, GRADIENT_STEP),
            Self::SignedDistanceField(sdf) => sdf.gradient(p),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Plane { .. } => "Plane",
            Self::Sphere { .. } => "Sphere",
            Self::Cuboid { .. } => "Cuboid",
            Self::SignedDistanceField(_) => "SignedDistanceField",
        }
    }
}

fn central_difference(f: impl Fn(DVec3) -> f64, p: DVec3, h: f64) -> DVec3 {
    let dx = DVec3::X * h;
    let dy = DVec3::Y * h;
    let dz = DVec3::Z * h;
    DVec3::new(
        f(p + dx) - f(p - dx),
        f(p + dy) - f(p - dy),
        f(p + dz) - f(p - dz),
    ) / (2.0 * h)
}

/// Signed distances sampled on a regular grid, interpolated trilinearly.
/// Points outside the grid are clamped onto it.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedDistanceField {
    origin: DVec3,
    spacing: DVec3,
    dims: UVec3,
    values: Vec<f64>,
}

fn sample_count(dims: UVec3) -> Option<usize> {
    (dims.x as usize)
        .checked_mul(dims.y as usize)?
        .checked_mul(dims.z as usize)
}

impl SignedDistanceField {
    /// `values` are laid out x fastest, then y, then z.
    pub fn new(origin: DVec3, spacing: DVec3, dims: UVec3, values: Vec<f64>) -> Result<Self, ConfigError> {
        if dims.cmplt(UVec3::splat(2)).any() {
            return Err(ConfigError::FieldShape("every dimension needs two samples"));
        }
        if spacing.cmple(DVec3::ZERO).any() {
            return Err(ConfigError::FieldShape("spacing must be positive"));
        }
        if sample_count(dims) != Some(values.len()) {
            return Err(ConfigError::FieldShape("sample count does not match dimensions"));
        }

        Ok(Self {
            origin,
            spacing,
            dims,
            values,
        })
    }

    /// Sample `f` on the grid.
    pub fn from_fn(
        origin: DVec3,
        spacing: DVec3,
        dims: UVec3,
        f: impl Fn(DVec3) -> f64,
    ) -> Result<Self, ConfigError> {
        let Some(count) = sample_count(dims) else {
            return Err(ConfigError::FieldShape("too many samples"));
        };
        let mut values = Vec::with_capacity(count);
        for z in 0..dims.z {
            for y in 0..dims.y {
                for x in 0..dims.x {
                    values.push(f(origin + UVec3::new(x, y, z).as_dvec3() * spacing));
                }
            }
        }
        Self::new(origin, spacing, dims, values)
    }

    pub fn dims(&self) -> UVec3 {
        self.dims
    }

    fn value(&self, x: u32, y: u32, z: u32) -> f64 {
        let index = (z as usize * self.dims.y as usize + y as usize) * self.dims.x as usize + x as usize;
        self.values[index]
    }

    pub fn sample(&self, p: DVec3) -> f64 {
        let max = (self.dims - UVec3::ONE).as_dvec3();
        let grid = ((p - self.origin) / self.spacing).clamp(DVec3::ZERO, max);

        // Lower corner, kept one cell away from the far edge.
        let base = grid.floor().min(max - DVec3::ONE);
        let t = grid - base;
        let UVec3 { x, y, z } = base.as_uvec3();

        let lerp = |a: f64, b: f64, t: f64| a + (b - a) * t;

        let c00 = lerp(self.value(x, y, z), self.value(x + 1, y, z), t.x);
        let c10 = lerp(self.value(x, y + 1, z), self.value(x + 1, y + 1, z), t.x);
        let c01 = lerp(self.value(x, y, z + 1), self.value(x + 1, y, z + 1), t.x);
        let c11 = lerp(self.value(x, y + 1, z + 1), self.value(x + 1, y + 1, z + 1), t.x);

        lerp(lerp(c00, c10, t.y), lerp(c01, c11, t.y), t.z)
    }

    /// Central difference with a step of half a cell.
    pub fn gradient(&self, p: DVec3) -> DVec3 {
        let h = self.spacing * 0.5;
        DVec3::new(
            (self.sample(p + DVec3::X * h.x) - self.sample(p - DVec3::X * h.x)) / (2.0 * h.x),
            (self.sample(p + DVec3::Y * h.y) - self.sample(p - DVec3::Y * h.y)) / (2.0 * h.y),
            (self.sample(p + DVec3::Z * h.z) - self.sample(p - DVec3::Z * h.z)) / (2.0 * h.z),
        )
    }
}
