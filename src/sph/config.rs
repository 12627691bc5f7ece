use std::ops::Deref;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::neighbor::NeighborSearchMethod;

/// Physical constants of an SPH fluid, as supplied by the caller.
///
/// [`finalize`](Self::finalize) validates the inputs and turns them into
/// [`SphParameters`], which also carry the derived quantities. A model only
/// ever works with finalized parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SphModelConfig {
    pub particle_radius: f64,
    pub rest_density: f64,
    /// Scales the lattice mass down slightly to keep the fluid stable.
    pub particle_mass_scale: f64,

    pub pressure_stiffness: f64,
    pub dynamic_viscosity: f64,
    pub boundary_viscosity: f64,
    pub surface_tension_stiffness: f64,
    pub boundary_friction: f64,

    /// Kernel radius over particle radius.
    pub kernel_ratio: f64,
    pub gravity: DVec3,

    pub min_timestep: f64,
    pub max_timestep: f64,
    pub cfl_factor: f64,
    /// Lower bound for the characteristic speed in the CFL condition.
    pub speed_of_sound: f64,

    pub normalize_density: bool,
    pub density_with_boundary: bool,
    pub neighbor_search: NeighborSearchMethod,
}

impl Default for SphModelConfig {
    fn default() -> Self {
        Self {
            particle_radius: 0.1,
            rest_density: 1000.0,
            particle_mass_scale: 1.06,
            pressure_stiffness: 50000.0,
            dynamic_viscosity: 1e-2,
            boundary_viscosity: 1e-5,
            surface_tension_stiffness: 1.0,
            boundary_friction: 0.1,
            kernel_ratio: 4.0,
            gravity: DVec3::new(0.0, -9.81, 0.0),
            min_timestep: 1e-6,
            max_timestep: 1e-3,
            cfl_factor: 1.0,
            speed_of_sound: 0.0,
            normalize_density: false,
            density_with_boundary: false,
            neighbor_search: NeighborSearchMethod::UniformGrid,
        }
    }
}

impl SphModelConfig {
    /// Defaults for the given particle radius.
    pub fn new(particle_radius: f64) -> Self {
        Self {
            particle_radius,
            ..Self::default()
        }
    }

    /// Validate the inputs and compute the derived quantities.
    pub fn finalize(self) -> Result<SphParameters, ConfigError> {
        if !(self.particle_radius > 0.0) {
            return Err(ConfigError::ParticleRadius(self.particle_radius));
        }

        for (name, value) in [
            ("rest_density", self.rest_density),
            ("particle_mass_scale", self.particle_mass_scale),
            ("kernel_ratio", self.kernel_ratio),
            ("min_timestep", self.min_timestep),
            ("max_timestep", self.max_timestep),
            ("cfl_factor", self.cfl_factor),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::NotPositive(name, value));
            }
        }

        if self.min_timestep > self.max_timestep {
            return Err(ConfigError::TimestepBounds {
                min: self.min_timestep,
                max: self.max_timestep,
            });
        }

        let r = self.particle_radius;
        let kernel_radius = r * self.kernel_ratio;
        let diameter = 2.0 * r;

        Ok(SphParameters {
            particle_radius_sqr: r * r,
            rest_density_sqr: self.rest_density * self.rest_density,
            rest_density_inv: 1.0 / self.rest_density,
            particle_mass: diameter * diameter * diameter
                * self.rest_density
                * self.particle_mass_scale,
            kernel_radius,
            kernel_radius_sqr: kernel_radius * kernel_radius,
            config: self,
        })
    }

    /// Fails when a scene built for an exact particle radius is handed a
    /// different one.
    pub fn require_particle_radius(&self, expected: f64) -> Result<(), ConfigError> {
        if (self.particle_radius - expected).abs() > 1e-12 {
            return Err(ConfigError::ParticleRadiusMismatch {
                expected,
                actual: self.particle_radius,
            });
        }
        Ok(())
    }
}

/// A validated [`SphModelConfig`] together with its derived quantities.
///
/// Dereferences to the config it was built from; the derived values can only
/// be obtained through [`SphModelConfig::finalize`], so they always match.
#[derive(Debug, Clone, PartialEq)]
pub struct SphParameters {
    config: SphModelConfig,
    particle_radius_sqr: f64,
    rest_density_sqr: f64,
    rest_density_inv: f64,
    particle_mass: f64,
    kernel_radius: f64,
    kernel_radius_sqr: f64,
}

impl Deref for SphParameters {
    type Target = SphModelConfig;

    fn deref(&self) -> &Self::Target {
        &self.config
    }
}

impl SphParameters {
    pub fn config(&self) -> &SphModelConfig {
        &self.config
    }

    pub fn particle_radius_sqr(&self) -> f64 {
        self.particle_radius_sqr
    }

    pub fn rest_density_sqr(&self) -> f64 {
        self.rest_density_sqr
    }

    pub fn rest_density_inv(&self) -> f64 {
        self.rest_density_inv
    }

    pub fn particle_mass(&self) -> f64 {
        self.particle_mass
    }

    pub fn kernel_radius(&self) -> f64 {
        self.kernel_radius
    }

    pub fn kernel_radius_sqr(&self) -> f64 {
        self.kernel_radius_sqr
    }

    /// Stiff equation of state, clamped so the fluid never pulls itself
    /// together through negative pressure.
    pub fn pressure(&self, density: f64) -> f64 {
        let ratio = density * self.rest_density_inv;
        self.pressure_stiffness * (ratio.powi(7) - 1.0).max(0.0)
    }

    /// Timestep from the CFL condition, clamped to the configured bounds.
    pub fn cfl_timestep(&self, max_speed: f64) -> f64 {
        let speed = self.speed_of_sound.max(max_speed);
        if speed <= 0.0 {
            return self.max_timestep;
        }

        let dt = self.cfl_factor * self.kernel_radius / speed;
        dt.min(self.max_timestep).max(self.min_timestep)
    }
}
