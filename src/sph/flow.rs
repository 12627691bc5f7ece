//! Boundary policies for channel flows along the X axis.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::sph::ParticleKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowBoundary {
    /// Particles leaving through one X face re-enter through the other.
    Periodic { min_x: f64, max_x: f64 },
    InletOutlet(InletOutlet),
}

/// Recycling inlet/outlet.
///
/// Along X the channel is laid out as
/// `buffer_x .. inlet_x .. outlet_region_x .. outlet_x`. Particles passing
/// `outlet_x` are shifted back by `outlet_x - buffer_x` into the buffer zone,
/// where they are driven with the inlet profile until they cross `inlet_x`
/// and rejoin the fluid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InletOutlet {
    pub buffer_x: f64,
    pub inlet_x: f64,
    pub outlet_region_x: f64,
    pub outlet_x: f64,
    pub inlet_center: DVec3,
    pub inlet_radius: f64,
    /// Velocity on the channel axis.
    pub inlet_velocity: DVec3,
    pub inlet_density: f64,
    pub outlet_density: f64,
}

impl FlowBoundary {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Periodic { min_x, max_x } => {
                if !(max_x > min_x) {
                    return Err(ConfigError::FlowBoundary("periodic extent is empty"));
                }
            }
            Self::InletOutlet(flow) => flow.validate()?,
        }
        Ok(())
    }

    /// Apply the positional part of the policy to one particle after it
    /// moved.
    pub fn apply(&self, position: &mut DVec3, kind: &mut ParticleKind) {
        if *kind == ParticleKind::Wall {
            return;
        }

        match self {
            Self::Periodic { min_x, max_x } => {
                position.x = min_x + (position.x - min_x).rem_euclid(max_x - min_x);
            }
            Self::InletOutlet(flow) => flow.recycle(position, kind),
        }
    }

    /// Velocity imposed on a particle, if any.
    pub fn prescribed_velocity(&self, position: DVec3, kind: ParticleKind) -> Option<DVec3> {
        match (self, kind) {
            (Self::InletOutlet(flow), ParticleKind::Buffer) => {
                Some(flow.parabolic_velocity(position))
            }
            _ => None,
        }
    }

    /// Density imposed on a particle, if any.
    pub fn prescribed_density(&self, position: DVec3, kind: ParticleKind) -> Option<f64> {
        let Self::InletOutlet(flow) = self else {
            return None;
        };

        match kind {
            ParticleKind::Buffer => Some(flow.inlet_density),
            ParticleKind::Fluid if position.x > flow.outlet_region_x => Some(flow.outlet_density),
            _ => None,
        }
    }
}

impl InletOutlet {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.buffer_x < self.inlet_x
            && self.inlet_x < self.outlet_region_x
            && self.outlet_region_x <= self.outlet_x)
        {
            return Err(ConfigError::FlowBoundary(
                "expected buffer_x < inlet_x < outlet_region_x <= outlet_x",
            ));
        }
        if !(self.inlet_radius > 0.0) {
            return Err(ConfigError::FlowBoundary("inlet radius must be positive"));
        }
        if !(self.inlet_density > 0.0 && self.outlet_density > 0.0) {
            return Err(ConfigError::FlowBoundary("densities must be positive"));
        }
        Ok(())
    }

    /// Poiseuille profile `v_max (1 - r^2 / R^2)`, with `r` the distance
    /// from the channel axis in the Y/Z plane. Zero outside the inlet.
    pub fn parabolic_velocity(&self, position: DVec3) -> DVec3 {
        let dy = position.y - self.inlet_center.y;
        let dz = position.z - self.inlet_center.z;
        let r2 = dy * dy + dz * dz;
        let factor = (1.0 - r2 / (self.inlet_radius * self.inlet_radius)).max(0.0);
        self.inlet_velocity * factor
    }

    fn recycle(&self, position: &mut DVec3, kind: &mut ParticleKind) {
        if position.x > self.outlet_x {
            position.x -= self.outlet_x - self.buffer_x;
            *kind = ParticleKind::Buffer;
        }
        if *kind == ParticleKind::Buffer && position.x >= self.inlet_x {
            *kind = ParticleKind::Fluid;
        }
    }
}
